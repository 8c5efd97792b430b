//! cogcheck-client — test API implementations.
//!
//! Implements the `TestApi` and `HistorySource` traits over HTTP (reqwest)
//! and in memory, plus the file/env configuration that wires them into a
//! `SessionController`.

pub mod config;
pub mod credentials;
pub mod http;
pub mod mock;

pub use config::{create_api, load_config, load_config_from, CogcheckConfig};
pub use credentials::{SharedToken, StaticToken};
pub use http::HttpTestApi;
pub use mock::MockTestApi;
