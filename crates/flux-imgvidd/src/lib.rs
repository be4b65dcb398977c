pub mod api;
pub mod cli;
pub mod error;
pub mod handlers;
pub mod startup;
pub mod state;

pub use api::create_router;
pub use error::{ApiError, Result};
pub use state::AppState;
