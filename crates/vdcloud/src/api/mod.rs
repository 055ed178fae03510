//! HTTP API module.
//!
//! Control endpoints for the session lifecycle and the attach upgrade.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
