//! Request executor
//!
//! Everything between a connector and the network: authentication, retry on
//! rate limits, error classification and response decoding.

pub mod auth;
pub mod executor;
pub mod retry;

pub use auth::AuthStrategy;
pub use executor::{ParsedResponse, RequestBody, RequestExecutor, ResponseFormat};
pub use reqwest::Method;
pub use retry::RetryConfig;
