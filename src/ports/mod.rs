pub mod http_client;
pub mod rate_store;
