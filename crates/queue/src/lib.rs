//! Priority lanes with admission control and dead-letter lanes.
//!
//! Four fixed lanes map 1:1 to job priority. Each lane is a FIFO of
//! PENDING job ids with a capacity ceiling; a full lane rejects admission.

pub mod error;
pub mod lane;
pub mod manager;

pub use error::QueueError;
pub use lane::IngestionQueue;
pub use manager::QueueManager;
