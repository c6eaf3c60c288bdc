pub mod classify;
pub mod core;
pub mod engine;
pub mod error;
pub mod handler;
pub mod upstream;

pub use classify::{FailureKind, parse_retry_after};
pub use core::{Core, CoreState};
pub use engine::{EngineConfig, ProxyStream, StreamItem, StreamProxy};
pub use error::GatewayError;
pub use upstream::{
    ConnectError, ConnectorConfig, EventStream, StreamError, UpstreamConnector, WreqConnector,
};
