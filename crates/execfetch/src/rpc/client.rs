//! Fetching execution data through the remote management interface.

use serde_json::{Map, Value};

use super::jsonrpc::JsonRpcConnector;
use super::message::RemoteValue;
use super::names::{ObjectName, ServiceUrl};
use crate::types::{ExecError, ExecResult, InvokeError};

/// Environment key under which credentials are passed to the connector.
pub const CREDENTIALS_KEY: &str = "jmx.remote.credentials";

/// Object name of the coverage runtime on the managed process.
pub const RUNTIME_OBJECT_NAME: &str = "org.jacoco:type=Runtime";

/// Operation returning the current execution data.
pub const FETCH_OPERATION: &str = "getExecutionData";

/// Connection environment handed to a [`ManagementConnector`].
pub type Environment = Map<String, Value>;

/// Opens connections to a management endpoint.
pub trait ManagementConnector {
    fn connect(
        &self,
        url: &ServiceUrl,
        environment: &Environment,
    ) -> ExecResult<Box<dyn ManagementConnection>>;
}

/// An open connection to a management endpoint.
pub trait ManagementConnection {
    fn invoke(
        &mut self,
        target: &ObjectName,
        operation: &str,
        params: &[RemoteValue],
        signature: &[&str],
    ) -> Result<RemoteValue, InvokeError>;

    fn close(&mut self) -> std::io::Result<()>;
}

/// Closes the wrapped connection when dropped.
struct ConnectionGuard {
    inner: Box<dyn ManagementConnection>,
    url: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            tracing::warn!("Error closing connection to '{}': {e}", self.url);
        }
    }
}

/// Client for the coverage runtime exposed over the management interface.
#[derive(Debug, Clone, Default)]
pub struct RpcClient<C = JsonRpcConnector> {
    connector: C,
}

impl RpcClient<JsonRpcConnector> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: ManagementConnector> RpcClient<C> {
    pub fn with_connector(connector: C) -> Self {
        Self { connector }
    }

    /// Invoke the runtime's dump operation and return its raw bytes.
    ///
    /// With `reset` the remote runtime clears its probe counters after
    /// answering, for every client of that process. The connection is closed
    /// on every path out of this call.
    pub fn fetch(
        &self,
        service_url: &str,
        username: Option<&str>,
        password: Option<&str>,
        reset: bool,
    ) -> ExecResult<Vec<u8>> {
        tracing::debug!("Constructing service URL from '{service_url}'");
        let url = ServiceUrl::parse(service_url)?;

        let environment = credentials_environment(username, password);
        let mut connection = ConnectionGuard {
            inner: self.connector.connect(&url, &environment)?,
            url: url.to_string(),
        };

        tracing::debug!("Constructing object name from '{RUNTIME_OBJECT_NAME}'");
        let object_name = ObjectName::parse(RUNTIME_OBJECT_NAME)?;

        tracing::info!("Invoking '{FETCH_OPERATION}' on {object_name}");
        let result = connection
            .inner
            .invoke(
                &object_name,
                FETCH_OPERATION,
                &[RemoteValue::Boolean(reset)],
                &["boolean"],
            )
            .map_err(|source| invoke_error(&url, source))?;

        match result {
            RemoteValue::Bytes(data) => {
                tracing::debug!("{} bytes of execution data received", data.len());
                Ok(data)
            }
            other => Err(ExecError::UnexpectedResultType(other.type_name().to_string())),
        }
    }
}

/// Credentials are always sent, as empty strings when absent.
pub fn credentials_environment(username: Option<&str>, password: Option<&str>) -> Environment {
    let mut environment = Environment::new();
    environment.insert(
        CREDENTIALS_KEY.to_string(),
        Value::Array(vec![
            Value::String(username.unwrap_or_default().to_string()),
            Value::String(password.unwrap_or_default().to_string()),
        ]),
    );
    environment
}

fn invoke_error(url: &ServiceUrl, source: InvokeError) -> ExecError {
    let context = match &source {
        InvokeError::InstanceNotFound(_) => "Could not find the coverage runtime",
        InvokeError::Remote(_) | InvokeError::Reflection(_) => {
            "Error fetching execution data from the coverage runtime"
        }
        InvokeError::Io(_) => "IO error while communicating with the management endpoint",
    };
    ExecError::Invoke {
        context: context.to_string(),
        url: url.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    type Reply = Box<dyn Fn() -> Result<RemoteValue, InvokeError> + Send + Sync>;

    /// Records what it was asked and answers with a canned reply.
    struct FakeConnector {
        reply: Arc<Reply>,
        closed: Arc<AtomicBool>,
        seen: Arc<Mutex<Vec<String>>>,
        refuse: bool,
    }

    impl FakeConnector {
        fn replying(
            reply: impl Fn() -> Result<RemoteValue, InvokeError> + Send + Sync + 'static,
        ) -> Self {
            let reply: Reply = Box::new(reply);
            Self {
                reply: Arc::new(reply),
                closed: Arc::new(AtomicBool::new(false)),
                seen: Arc::new(Mutex::new(Vec::new())),
                refuse: false,
            }
        }
    }

    struct FakeConnection {
        reply: Arc<Reply>,
        closed: Arc<AtomicBool>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ManagementConnector for FakeConnector {
        fn connect(
            &self,
            url: &ServiceUrl,
            environment: &Environment,
        ) -> ExecResult<Box<dyn ManagementConnection>> {
            self.seen.lock().unwrap().push(format!(
                "connect {url} {}",
                Value::Object(environment.clone())
            ));
            if self.refuse {
                return Err(ExecError::io(
                    "Unable to connect",
                    std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                ));
            }
            Ok(Box::new(FakeConnection {
                reply: self.reply.clone(),
                closed: self.closed.clone(),
                seen: self.seen.clone(),
            }))
        }
    }

    impl ManagementConnection for FakeConnection {
        fn invoke(
            &mut self,
            target: &ObjectName,
            operation: &str,
            params: &[RemoteValue],
            signature: &[&str],
        ) -> Result<RemoteValue, InvokeError> {
            self.seen.lock().unwrap().push(format!(
                "invoke {target} {operation} {params:?} {signature:?}"
            ));
            (self.reply)()
        }

        fn close(&mut self) -> std::io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    const URL: &str = "service:jmx:rmi:///jndi/rmi://localhost:9999/jmxrmi";

    #[test]
    fn test_fetch_returns_bytes() {
        let connector = FakeConnector::replying(|| Ok(RemoteValue::Bytes(vec![1, 2, 3])));
        let closed = connector.closed.clone();
        let seen = connector.seen.clone();

        let data = RpcClient::with_connector(connector)
            .fetch(URL, Some("monitor"), Some("secret"), true)
            .unwrap();

        assert_eq!(data, vec![1, 2, 3]);
        assert!(closed.load(Ordering::SeqCst));
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            format!(r#"connect {URL} {{"jmx.remote.credentials":["monitor","secret"]}}"#)
        );
        assert_eq!(
            seen[1],
            r#"invoke org.jacoco:type=Runtime getExecutionData [Boolean(true)] ["boolean"]"#
        );
    }

    #[test]
    fn test_missing_credentials_are_empty_strings() {
        let env = credentials_environment(None, None);
        assert_eq!(
            Value::Object(env),
            serde_json::json!({"jmx.remote.credentials": ["", ""]})
        );
    }

    #[test]
    fn test_unexpected_result_type_names_actual_type() {
        let connector = FakeConnector::replying(|| Ok(RemoteValue::String("nope".to_string())));
        let closed = connector.closed.clone();

        let err = RpcClient::with_connector(connector)
            .fetch(URL, None, None, false)
            .unwrap_err();

        assert!(matches!(&err, ExecError::UnexpectedResultType(t) if t == "string"));
        assert!(!err.is_validation());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invoke_failures_are_acquisition_errors() {
        fn reply(f: impl Fn() -> Result<RemoteValue, InvokeError> + Send + Sync + 'static) -> Reply {
            Box::new(f)
        }

        let cases = vec![
            (
                reply(|| Err(InvokeError::InstanceNotFound("org.jacoco:type=Runtime".into()))),
                "Could not find",
            ),
            (reply(|| Err(InvokeError::Remote("boom".into()))), "Error fetching"),
            (reply(|| Err(InvokeError::Reflection("no such op".into()))), "Error fetching"),
            (
                reply(|| Err(InvokeError::Io(std::io::ErrorKind::BrokenPipe.into()))),
                "IO error",
            ),
        ];

        for (reply, expected) in cases {
            let connector = FakeConnector {
                reply: Arc::new(reply),
                closed: Arc::new(AtomicBool::new(false)),
                seen: Arc::new(Mutex::new(Vec::new())),
                refuse: false,
            };
            let closed = connector.closed.clone();

            let err = RpcClient::with_connector(connector)
                .fetch(URL, None, None, true)
                .unwrap_err();

            assert!(matches!(err, ExecError::Invoke { .. }));
            assert!(err.to_string().contains(expected), "{err}");
            assert!(!err.is_validation());
            assert!(closed.load(Ordering::SeqCst), "connection left open: {err}");
        }
    }

    #[test]
    fn test_malformed_url_is_validation_error() {
        for locator in [
            "service:jmx:nonsense",
            "service:jmx\u{e9}rmi://h:1",
            "SERVICE:JMX:rmi://localhost:9999",
        ] {
            let connector = FakeConnector::replying(|| Ok(RemoteValue::Null));
            let seen = connector.seen.clone();

            let err = RpcClient::with_connector(connector)
                .fetch(locator, None, None, true)
                .unwrap_err();

            assert!(err.is_validation(), "{locator}");
            assert!(seen.lock().unwrap().is_empty(), "{locator}");
        }
    }

    #[test]
    fn test_connect_failure_propagates() {
        let mut connector = FakeConnector::replying(|| Ok(RemoteValue::Null));
        connector.refuse = true;

        let err = RpcClient::with_connector(connector)
            .fetch(URL, None, None, true)
            .unwrap_err();
        assert!(matches!(err, ExecError::Io { .. }));
    }

    #[test]
    fn test_runtime_object_name_parses() {
        assert!(ObjectName::parse(RUNTIME_OBJECT_NAME).is_ok());
    }
}
