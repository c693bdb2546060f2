//! Common utilities and types shared across clusterd

pub mod config;
pub mod error;
pub mod events;
pub mod storage;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, DaemonConfig};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventKind};
pub use storage::{HttpStore, KVStore, MemStore};
pub use tracing_middleware::RequestId;
pub use utils::{http_url, parse_duration, validate_name};
