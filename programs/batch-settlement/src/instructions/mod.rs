pub mod admin;
pub mod batch;
pub mod execute;
pub mod ledger;
pub mod netting;
pub mod propose;
pub mod view;

pub use batch::*;
pub use execute::*;
pub use ledger::*;
pub use netting::*;
pub use propose::*;
