pub mod health_aggregator;
pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod redis_store;

/// Re-export commonly used types from adapters
pub use health_aggregator::{HealthAggregator, HealthSnapshot};
pub use http_client::UpstreamHttpClient;
pub use http_handler::GatewayHttpHandler;
pub use middleware::*;
pub use redis_store::RedisRateStore;
