pub mod job;
pub mod node;
pub mod queue;
pub mod task;

pub use job::JobInfo;
pub use node::NodeInfo;
pub use queue::QueueInfo;
pub use task::TaskInfo;
