//! Management connector speaking newline-delimited JSON-RPC 2.0 over TCP.
//!
//! The endpoint named by the service URL receives a `connect` request
//! carrying the URL and connection environment, then one `invoke` request
//! per operation. A `close` notification precedes the socket shutdown.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::Value;

use super::client::{Environment, ManagementConnection, ManagementConnector};
use super::framing::{frame_message, parse_message};
use super::message::{
    error_codes, management_error_codes, ConnectParams, InvokeParams, JsonRpcErrorObject,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RemoteValue, RequestId,
    JSONRPC_VERSION,
};
use super::names::{ObjectName, ServiceUrl};
use crate::types::{ExecError, ExecResult, InvokeError};

/// Default [`ManagementConnector`].
#[derive(Debug, Clone, Default)]
pub struct JsonRpcConnector {
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl JsonRpcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(connect_timeout: Option<Duration>, read_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    fn dial(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        let mut last_err = None;
        for addr in &addrs {
            tracing::debug!("Connecting to management endpoint {addr}");
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
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}"))
        }))
    }
}

impl ManagementConnector for JsonRpcConnector {
    fn connect(
        &self,
        url: &ServiceUrl,
        environment: &Environment,
    ) -> ExecResult<Box<dyn ManagementConnection>> {
        let (host, port) = url.endpoint().ok_or_else(|| ExecError::InvalidServiceUrl {
            url: url.to_string(),
            reason: "no host and port to connect to".to_string(),
        })?;
        let context = || format!("Unable to connect to '{url}'");

        let stream = self
            .dial(&host, port)
            .and_then(|stream| {
                stream.set_read_timeout(self.read_timeout)?;
                Ok(stream)
            })
            .map_err(|e| ExecError::io(context(), e))?;
        let mut connection =
            JsonRpcConnection::new(stream).map_err(|e| ExecError::io(context(), e))?;

        let params = ConnectParams {
            service_url: url.to_string(),
            environment: environment.clone(),
        };
        let params = serde_json::to_value(params)
            .map_err(|e| ExecError::io(context(), io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        match connection.call("connect", params) {
            Ok(_) => {
                tracing::debug!("Management connection to {host}:{port} established");
                Ok(Box::new(connection))
            }
            Err(InvokeError::Io(e)) => Err(ExecError::io(context(), e)),
            Err(source) => Err(ExecError::Invoke {
                context: "Connection rejected".to_string(),
                url: url.to_string(),
                source,
            }),
        }
    }
}

/// An open JSON-RPC session with a management endpoint.
pub struct JsonRpcConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    next_id: i64,
    closed: bool,
}

impl JsonRpcConnection {
    fn new(stream: TcpStream) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            next_id: 1,
            closed: false,
        })
    }

    fn send<T: serde::Serialize>(&mut self, message: &T) -> io::Result<()> {
        let framed = frame_message(message)?;
        self.writer.write_all(framed.as_bytes())?;
        self.writer.flush()
    }

    /// Send a request and wait for the response carrying its id.
    fn call(&mut self, method: &str, params: Value) -> Result<Value, InvokeError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&JsonRpcRequest::new(id, method, Some(params)))?;

        let expected = RequestId::Number(id);
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "management endpoint closed the connection",
                )
                .into());
            }
            if line.trim().is_empty() {
                continue;
            }

            match parse_message(&line)? {
                JsonRpcMessage::Response(response) if response.id == expected => {
                    check_version(&response.jsonrpc)?;
                    return Ok(response.result);
                }
                JsonRpcMessage::Error(error) if error.id == expected => {
                    check_version(&error.jsonrpc)?;
                    return Err(map_error(error.error));
                }
                JsonRpcMessage::Response(response) => {
                    tracing::warn!("Dropping response to unknown request {}", response.id);
                }
                JsonRpcMessage::Error(error) => {
                    tracing::warn!(
                        "Dropping error for unknown request {}: {}",
                        error.id,
                        error.error.message
                    );
                }
                JsonRpcMessage::Notification(notification) => {
                    tracing::debug!("Ignoring notification '{}'", notification.method);
                }
                JsonRpcMessage::Request(request) => {
                    tracing::debug!("Ignoring request '{}' from endpoint", request.method);
                }
            }
        }
    }
}

impl ManagementConnection for JsonRpcConnection {
    fn invoke(
        &mut self,
        target: &ObjectName,
        operation: &str,
        params: &[RemoteValue],
        signature: &[&str],
    ) -> Result<RemoteValue, InvokeError> {
        let params = InvokeParams {
            object_name: target.canonical_name().to_string(),
            operation: operation.to_string(),
            params: params.to_vec(),
            signature: signature.iter().map(|s| s.to_string()).collect(),
        };
        let params = serde_json::to_value(params)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let result = self.call("invoke", params)?;
        decode_value(result)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.send(&JsonRpcNotification::new("close", None)) {
            tracing::debug!("Failed to send close notification: {e}");
        }
        match self.writer.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

fn check_version(version: &str) -> io::Result<()> {
    if version == JSONRPC_VERSION {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported JSON-RPC version '{version}'"),
        ))
    }
}

fn map_error(error: JsonRpcErrorObject) -> InvokeError {
    match error.code {
        management_error_codes::INSTANCE_NOT_FOUND => InvokeError::InstanceNotFound(error.message),
        management_error_codes::REFLECTION_FAILED | error_codes::METHOD_NOT_FOUND => {
            InvokeError::Reflection(error.message)
        }
        management_error_codes::SECURITY => InvokeError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            error.message,
        )),
        _ => InvokeError::Remote(error.message),
    }
}

/// Values of a type this client does not model come back as
/// [`RemoteValue::Opaque`] so the caller can report what it got. A modelled
/// type with a malformed payload is `InvalidData`.
fn decode_value(value: Value) -> Result<RemoteValue, InvokeError> {
    let type_name = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    match serde_json::from_value(value) {
        Ok(value) => Ok(value),
        Err(e) if RemoteValue::TYPE_NAMES.contains(&type_name.as_str()) => {
            Err(InvokeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed '{type_name}' result: {e}"),
            )))
        }
        Err(_) => Ok(RemoteValue::Opaque(type_name)),
    }
}
