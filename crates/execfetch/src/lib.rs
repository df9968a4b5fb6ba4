//! execfetch: pull coverage execution data from running agents and merge
//! the resulting `.exec` files.
//!
//! Sources are declared as [`SourceSpec`]s, validated once into a
//! [`ResolvedSource`], then handed to a [`Fetcher`] which talks to the agent
//! over its TCP control protocol or a remote management interface.

pub mod fetch;
pub mod merge;
pub mod rpc;
pub mod source;
pub mod storage;
pub mod tcp;
pub mod types;

pub use fetch::{save_execution_data, FetchOutcome, Fetcher};
pub use merge::{merge, merge_files, MergeEngine, MergeSummary};
pub use rpc::{JsonRpcConnector, ManagementConnection, ManagementConnector, RpcClient};
pub use source::{
    Credentials, Endpoint, HostResolver, ResolvedSource, SourceSpec, SystemResolver,
    TransportKind,
};
pub use storage::{read_file, ExecReader, ExecWriter, Record};
pub use tcp::TcpClient;
pub use types::*;
