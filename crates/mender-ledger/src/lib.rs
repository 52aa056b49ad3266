pub mod jsonl;
pub mod lock;
pub mod memory;
pub mod paths;
pub mod sink;

pub use jsonl::JsonlSink;
pub use lock::WorkspaceLock;
pub use memory::MemorySink;
pub use paths::MenderPaths;
pub use sink::{AuditSink, SinkError};
