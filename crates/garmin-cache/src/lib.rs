pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod rollup;
pub mod storage;
pub mod sync;

pub use error::{CacheError, Result};
pub use storage::CacheStore;
pub use sync::{run_daily, SyncEngine};
