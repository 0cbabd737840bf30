//! API Routes

pub mod health;
pub mod views;

pub use health::health_router;
pub use views::{views_router, AppState};
