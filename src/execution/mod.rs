pub mod api_worker;
pub mod rate_limiter;
pub mod trader;
pub mod upbit_client;
