pub mod api;
pub mod rate_limiter;
pub mod source;
pub mod tokens;

pub use api::GarminClient;
pub use rate_limiter::RateLimiter;
pub use source::{ActivitySource, FetchWindow, GarminSession, GarminSource, SyncKind, PAGE_SIZE};
pub use tokens::OAuth2Token;
