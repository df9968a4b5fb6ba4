//! Coverage acquisition through a remote management interface.

pub mod client;
pub mod framing;
pub mod jsonrpc;
pub mod message;
pub mod names;

pub use client::{
    credentials_environment, Environment, ManagementConnection, ManagementConnector, RpcClient,
    CREDENTIALS_KEY, FETCH_OPERATION, RUNTIME_OBJECT_NAME,
};
pub use jsonrpc::{JsonRpcConnection, JsonRpcConnector};
pub use message::RemoteValue;
pub use names::{ObjectName, ServiceUrl};
