//! Fixed-window request rate limiting.

mod counter;
mod limiter;

pub use counter::WindowCounter;
pub use limiter::{IdentityRateLimiter, RateDecision, RateLimiter};
