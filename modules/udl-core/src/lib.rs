pub mod deletion_log;
pub mod events;
pub mod node;
pub mod store;

pub use deletion_log::{DeletionLog, DeletionLogEntry};
pub use events::{EventBus, NodeEvent};
pub use node::{index_key, Node, NodeInternal};
pub use store::NodeStore;
