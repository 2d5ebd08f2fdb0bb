//! Repository traits implemented by metadata stores.

pub mod events;
pub mod records;
pub mod tokens;

pub use events::AppliedEventRepo;
pub use records::FileRecordRepo;
pub use tokens::TokenRepo;
