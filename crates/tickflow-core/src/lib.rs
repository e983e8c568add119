pub mod types;
pub mod signature;
pub mod id;
pub mod time;
pub mod error;

// Re-export commonly used types
pub use types::{ScalarType, TsType};
pub use signature::NodeSignature;
pub use id::{BranchKey, NodeId};
pub use time::EngineTime;
pub use error::CoreError;
