pub mod config;
pub mod error;
pub mod job;
pub mod quality;
pub mod record;
pub mod source;
pub mod stages;

pub use config::{default_pii_patterns, load_dotenv, EngineConfig, LaneCapacities};
pub use error::*;
pub use job::*;
pub use quality::*;
pub use record::*;
pub use source::*;
pub use stages::*;
