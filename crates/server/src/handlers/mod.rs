//! HTTP and WebSocket request handlers.

pub mod auth;
pub mod content;
pub mod health;
pub mod sync;
pub mod uploads;
pub mod ws;

pub use auth::whoami;
pub use content::{get_content, put_content};
pub use health::health_check;
pub use sync::{get_changes, heartbeat, push_event};
pub use uploads::{abandon_upload, create_upload, finalize_upload, upload_chunk};
pub use ws::ws_handler;
