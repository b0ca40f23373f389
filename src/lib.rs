//! TensAI dispatch: routes module invocations to the TensAI platform API
//! with per-module timeouts, bounded retries and exponential backoff.

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod request;
pub mod server;
pub mod transport;

pub use dispatcher::{InvocationResult, ModuleDispatcher};
pub use error::{ConfigError, DispatchError, Error, TransportError};
pub use registry::{EndpointRegistry, ModuleName};
