//! Background services

pub mod keeper;

pub use keeper::Keeper;
