//! Single-source acquisition: dispatch a resolved source to its client and
//! save whatever comes back.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rpc::{JsonRpcConnector, ManagementConnector, RpcClient};
use crate::source::{Endpoint, ResolvedSource};
use crate::storage;
use crate::tcp::TcpClient;
use crate::types::{ExecError, ExecResult};

/// Result of fetching one source to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Saved { path: PathBuf, bytes: u64 },
    /// The source answered with no execution data; no file was written.
    Empty,
}

/// Fetches from either transport.
#[derive(Debug, Clone, Default)]
pub struct Fetcher<C = JsonRpcConnector> {
    tcp: TcpClient,
    rpc: RpcClient<C>,
}

impl Fetcher<JsonRpcConnector> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the same timeouts to both transports.
    pub fn with_timeouts(connect_timeout: Option<Duration>, read_timeout: Option<Duration>) -> Self {
        Self {
            tcp: TcpClient::with_timeouts(connect_timeout, read_timeout),
            rpc: RpcClient::with_connector(JsonRpcConnector::with_timeouts(
                connect_timeout,
                read_timeout,
            )),
        }
    }
}

impl<C: ManagementConnector> Fetcher<C> {
    pub fn with_clients(tcp: TcpClient, rpc: RpcClient<C>) -> Self {
        Self { tcp, rpc }
    }

    /// Fetch raw execution data; `None` when the source had nothing to give.
    ///
    /// With `reset_after_fetch` set on the source, the remote counters are
    /// cleared after the dump for every client of that process.
    pub fn fetch(&self, source: &ResolvedSource) -> ExecResult<Option<Vec<u8>>> {
        let fetched = match &source.endpoint {
            Endpoint::Tcp { hostname, port } => {
                self.tcp.fetch(hostname, *port, source.reset_after_fetch)
            }
            Endpoint::Rpc {
                service_url,
                credentials,
            } => self.rpc.fetch(
                service_url,
                credentials.username.as_deref(),
                credentials.password.as_deref(),
                source.reset_after_fetch,
            ),
        };

        match fetched {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(data)),
            Err(ExecError::NoData(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch and write the payload to a new file at `path`.
    pub fn fetch_to_file(&self, source: &ResolvedSource, path: &Path) -> ExecResult<FetchOutcome> {
        storage::ensure_absent(path)?;
        storage::ensure_parent_dir(path)?;

        match self.fetch(source)? {
            Some(data) => {
                let bytes = save_execution_data(&data, path)?;
                Ok(FetchOutcome::Saved {
                    path: path.to_path_buf(),
                    bytes,
                })
            }
            None => {
                tracing::warn!("No execution data received from {}", source.endpoint);
                Ok(FetchOutcome::Empty)
            }
        }
    }
}

/// Write raw execution data to a new file. Returns the number of bytes saved.
pub fn save_execution_data(data: &[u8], path: &Path) -> ExecResult<u64> {
    let bytes = storage::write_new_file(path, |out| out.write_all(data))?;
    tracing::info!("Saved {bytes} bytes of execution data to '{}'", path.display());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::rpc::{Environment, ManagementConnection, ObjectName, RemoteValue, ServiceUrl};
    use crate::source::Credentials;
    use crate::storage::{ExecReader, ExecWriter};
    use crate::types::{ExecutionData, InvokeError};

    /// Agent that ignores the request and answers with `payload`.
    fn spawn_agent(payload: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            use std::io::Read;
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 8];
            let _ = socket.read_exact(&mut request);
            let _ = socket.write_all(&payload);
        });
        port
    }

    fn tcp_source(port: u16) -> ResolvedSource {
        ResolvedSource {
            endpoint: Endpoint::Tcp {
                hostname: "127.0.0.1".to_string(),
                port,
            },
            output_file: None,
            reset_after_fetch: true,
        }
    }

    fn rpc_source() -> ResolvedSource {
        ResolvedSource {
            endpoint: Endpoint::Rpc {
                service_url: "service:jmx:rmi:///jndi/rmi://localhost:9999/jmxrmi".to_string(),
                credentials: Credentials::default(),
            },
            output_file: None,
            reset_after_fetch: false,
        }
    }

    /// Answers every invocation with the same bytes.
    struct BytesConnector(Vec<u8>);

    struct BytesConnection(Vec<u8>);

    impl ManagementConnector for BytesConnector {
        fn connect(
            &self,
            _url: &ServiceUrl,
            _environment: &Environment,
        ) -> ExecResult<Box<dyn ManagementConnection>> {
            Ok(Box::new(BytesConnection(self.0.clone())))
        }
    }

    impl ManagementConnection for BytesConnection {
        fn invoke(
            &mut self,
            _target: &ObjectName,
            _operation: &str,
            _params: &[RemoteValue],
            _signature: &[&str],
        ) -> Result<RemoteValue, InvokeError> {
            Ok(RemoteValue::Bytes(self.0.clone()))
        }

        fn close(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn rpc_fetcher(payload: Vec<u8>) -> Fetcher<BytesConnector> {
        Fetcher::with_clients(
            TcpClient::new(),
            RpcClient::with_connector(BytesConnector(payload)),
        )
    }

    #[test]
    fn test_tcp_fetch_to_file() {
        let mut writer = ExecWriter::new(Vec::new()).unwrap();
        writer
            .write_execution_data(&ExecutionData::new(5, "p/Q", vec![true]))
            .unwrap();
        writer.write_command_ok().unwrap();
        let port = spawn_agent(writer.into_inner());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/jacoco.exec");
        let outcome = Fetcher::new()
            .fetch_to_file(&tcp_source(port), &path)
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::Saved { ref path, .. } if path.exists()));
        let records: Vec<_> = ExecReader::new(std::fs::File::open(&path).unwrap())
            .collect::<ExecResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_tcp_no_data_is_empty_outcome() {
        let header_only = ExecWriter::new(Vec::new()).unwrap().into_inner();
        let port = spawn_agent(header_only);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jacoco.exec");
        let outcome = Fetcher::new()
            .fetch_to_file(&tcp_source(port), &path)
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Empty);
        assert!(!path.exists());
    }

    #[test]
    fn test_rpc_fetch_writes_payload_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jacoco.exec");

        let outcome = rpc_fetcher(vec![1, 2, 3, 4])
            .fetch_to_file(&rpc_source(), &path)
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Saved {
                path: path.clone(),
                bytes: 4
            }
        );
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rpc_empty_payload_is_empty_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jacoco.exec");

        let outcome = rpc_fetcher(Vec::new())
            .fetch_to_file(&rpc_source(), &path)
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Empty);
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_output_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jacoco.exec");
        std::fs::write(&path, b"old").unwrap();

        let err = rpc_fetcher(vec![9])
            .fetch_to_file(&rpc_source(), &path)
            .unwrap_err();

        assert!(matches!(err, ExecError::OutputExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
    }
}
