//! driftsync server library.
//!
//! Exposes the application state, router, and conflict resolution logic so
//! integration tests and the `driftsyncd` binary share one construction
//! path.

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod resolver;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use notify::NotificationBus;
pub use resolver::ConflictResolver;
pub use routes::create_router;
pub use state::AppState;
