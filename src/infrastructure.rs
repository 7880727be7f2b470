//! Infrastructure layer: network, parsing, persistence and process plumbing
//!
//! Each module is its own file in the infrastructure/ directory; the types the
//! application layer wires together are re-exported here.

pub mod checkpoint_store;
pub mod config; // Configuration, site constants and defaults
pub mod http_client;
pub mod input_loader;
pub mod logging;
pub mod parsing;
pub mod proxy_pool;
pub mod retry_policy;

pub use checkpoint_store::CheckpointStore;
pub use config::{AppConfig, ConfigError};
pub use http_client::{FetchError, ReqwestTransport, ResilientFetcher, Sleeper, TokioSleeper, Transport, TransportError};
pub use logging::init_logging;
pub use parsing::{DocumentExtractor, ExtractionError};
pub use proxy_pool::{ProxyEndpoint, ProxyPool, ProxySelection};
pub use retry_policy::{RetryLimit, RetryPolicy};
