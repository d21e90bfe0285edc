// Public modules
pub mod coordinator;
pub mod defaults;
pub mod error;
pub mod image;
pub mod lock;
pub mod registry;
pub mod upstream;
pub mod version;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use coordinator::{UpdateAction, UpdateCoordinator, UpdateOutcome};
pub use error::{Error, ErrorCode, Result};
pub use registry::{BuildRecord, Registry};
