//! Client for the coverage agent's TCP control protocol.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::storage::{ExecReader, ExecWriter, Record, HEADER_SIZE};
use crate::types::{ExecError, ExecResult};

/// Fetches a coverage dump from an agent running in TCP server mode.
#[derive(Debug, Clone, Default)]
pub struct TcpClient {
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl TcpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(connect_timeout: Option<Duration>, read_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    /// Request a dump and return it re-framed as a standalone `.exec` stream.
    ///
    /// With `reset` the agent clears its probe counters after answering, for
    /// every client of that process. A response carrying no records fails
    /// with [`ExecError::NoData`].
    pub fn fetch(&self, hostname: &str, port: u16, reset: bool) -> ExecResult<Vec<u8>> {
        let target = format!("{hostname}:{port}");
        let context = || format!("Unable to dump coverage data from {target}");

        let stream = self
            .connect(hostname, port)
            .map_err(|e| ExecError::io(context(), e))?;
        stream
            .set_read_timeout(self.read_timeout)
            .map_err(|e| ExecError::io(context(), e))?;
        if let Ok(peer) = stream.peer_addr() {
            tracing::info!("Connected to {peer}");
        }

        let mut request = ExecWriter::new(BufWriter::new(&stream))
            .map_err(|e| ExecError::io(context(), e))?;
        request
            .write_dump_command(true, reset)
            .and_then(|_| request.flush())
            .map_err(|e| ExecError::io(context(), e))?;

        let mut output = ExecWriter::new(Vec::new()).map_err(|e| ExecError::io(context(), e))?;
        let mut reader = ExecReader::remote(BufReader::new(&stream));
        for record in reader.by_ref() {
            let written = match record? {
                Record::SessionInfo(info) => output.write_session_info(&info),
                Record::ExecutionData(data) => output.write_execution_data(&data),
                Record::DumpCommand { .. } => {
                    tracing::debug!("Ignoring dump command sent by {target}");
                    Ok(())
                }
            };
            written.map_err(|e| ExecError::io(context(), e))?;
        }
        if !reader.acknowledged() {
            tracing::debug!("{target} closed the connection without acknowledging the dump");
        }

        let bytes = output.into_inner();
        if bytes.len() <= HEADER_SIZE {
            return Err(ExecError::NoData(target));
        }
        tracing::debug!("{} bytes of execution data received from {target}", bytes.len());
        Ok(bytes)
    }

    fn connect(&self, hostname: &str, port: u16) -> std::io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (hostname, port).to_socket_addrs()?.collect();
        let mut last_err = None;
        for addr in &addrs {
            tracing::debug!("Connecting to {addr}");
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for {hostname}"),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::types::{ExecutionData, SessionInfo};

    /// Minimal agent: reads one dump command, reports it, answers with
    /// `reply`.
    fn spawn_agent<F>(reply: F) -> (u16, mpsc::Receiver<(bool, bool)>)
    where
        F: FnOnce(&mut TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let reader = ExecReader::remote(socket.try_clone().unwrap());
            for record in reader {
                if let Ok(Record::DumpCommand { dump, reset }) = record {
                    tx.send((dump, reset)).unwrap();
                    break;
                }
            }
            reply(&mut socket);
        });
        (port, rx)
    }

    #[test]
    fn test_fetch_relays_records() {
        let (port, commands) = spawn_agent(|socket| {
            let mut writer = ExecWriter::new(socket).unwrap();
            writer
                .write_session_info(&SessionInfo::new("agent-1", 100, 200))
                .unwrap();
            writer
                .write_execution_data(&ExecutionData::new(9, "a/B", vec![true, false]))
                .unwrap();
            writer.write_command_ok().unwrap();
        });

        let bytes = TcpClient::new().fetch("127.0.0.1", port, true).unwrap();
        assert_eq!(commands.recv().unwrap(), (true, true));

        let records: Vec<Record> = ExecReader::new(&bytes[..])
            .collect::<ExecResult<_>>()
            .unwrap();
        assert_eq!(
            records,
            vec![
                Record::SessionInfo(SessionInfo::new("agent-1", 100, 200)),
                Record::ExecutionData(ExecutionData::new(9, "a/B", vec![true, false])),
            ]
        );
    }

    #[test]
    fn test_reset_flag_is_sent() {
        let (port, commands) = spawn_agent(|socket| {
            let mut writer = ExecWriter::new(socket).unwrap();
            writer
                .write_execution_data(&ExecutionData::new(1, "X", vec![true]))
                .unwrap();
        });

        TcpClient::new().fetch("127.0.0.1", port, false).unwrap();
        assert_eq!(commands.recv().unwrap(), (true, false));
    }

    #[test]
    fn test_header_only_response_is_no_data() {
        let (port, _commands) = spawn_agent(|socket| {
            ExecWriter::new(socket).unwrap();
        });

        let err = TcpClient::new().fetch("127.0.0.1", port, true).unwrap_err();
        assert!(matches!(err, ExecError::NoData(_)));
        assert!(err.to_string().to_lowercase().contains("no data received"));
    }

    #[test]
    fn test_immediate_close_is_no_data() {
        let (port, _commands) = spawn_agent(|_socket| {});

        let err = TcpClient::new().fetch("127.0.0.1", port, true).unwrap_err();
        assert!(matches!(err, ExecError::NoData(_)));
    }

    #[test]
    fn test_garbage_response_is_acquisition_error() {
        let (port, _commands) = spawn_agent(|socket| {
            socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").unwrap();
        });

        let err = TcpClient::new().fetch("127.0.0.1", port, true).unwrap_err();
        assert!(matches!(err, ExecError::Format(_)));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = TcpClient::with_timeouts(Some(Duration::from_secs(2)), None);
        let err = client.fetch("127.0.0.1", port, true).unwrap_err();
        assert!(matches!(err, ExecError::Io { .. }));
    }
}
