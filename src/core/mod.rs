pub mod breaker;
pub mod rate_limiter;
pub mod router;
pub mod token;

pub use breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use rate_limiter::{LimitClass, RateLimiter, StoreMode};
pub use router::RequestRouter;
pub use token::{TokenPair, TokenService};
