pub mod tasks;

pub use tasks::{TileJob, TileJobHandler, TileJobQueue, TileJobQueueConfig};
