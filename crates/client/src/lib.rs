//! driftsync client library.
//!
//! The client keeps one local directory consistent with the server: the
//! change detector turns filesystem notifications into queued sync events,
//! the coordinator drives push/pull cycles against the API, and the push
//! listener nudges the coordinator when other clients change something.

pub mod api;
pub mod coordinator;
pub mod error;
pub mod push;
pub mod queue;
pub mod watcher;

pub use api::ApiClient;
pub use coordinator::SyncCoordinator;
pub use error::{ClientError, ClientResult};
pub use queue::{LocalEventQueue, PathState, QueuedEvent};
pub use watcher::ChangeDetector;
