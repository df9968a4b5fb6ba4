//! Source addressing: turn user input into one resolved endpoint.

use std::fmt;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{ExecError, ExecResult};

const MAX_PORT: i64 = 65535;

/// Prefix used to synthesize a service URL from an explicit host and port.
pub const DEFAULT_JMX_URL_PREFIX: &str = "service:jmx:rmi:///jndi/rmi://";
/// Suffix used to synthesize a service URL from an explicit host and port.
pub const DEFAULT_JMX_URL_SUFFIX: &str = "/jmxrmi";

/// Transport used to reach a coverage agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// The agent's own TCP control protocol.
    Tcp,
    /// A call through the remote management (JMX) interface.
    Jmx,
}

impl FromStr for TransportKind {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "jmx" => Ok(TransportKind::Jmx),
            _ => Err(ExecError::UnknownTransport(s.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Jmx => write!(f, "jmx"),
        }
    }
}

/// Name lookup used to validate hostnames before any connection is made.
pub trait HostResolver {
    fn check(&self, hostname: &str, port: u16) -> std::io::Result<()>;
}

/// Resolver backed by the operating system. The lookup result is discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn check(&self, hostname: &str, port: u16) -> std::io::Result<()> {
        let mut addrs = (hostname, port).to_socket_addrs()?;
        match addrs.next() {
            Some(_) => Ok(()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses returned",
            )),
        }
    }
}

/// Username/password pair sent to a management endpoint.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "*****"))
            .finish()
    }
}

/// A source as declared by the user, before validation.
///
/// Either `service_url`, or `type` + `hostname` + `port`, must be set. When
/// both are present the service URL wins.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, rename = "serviceURL", alias = "serviceUrl", skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    /// Clear the agent's probes after the dump. This is a side effect on the
    /// remote process and is visible to every other client of that agent.
    #[serde(default = "default_reset_after_fetch")]
    pub reset_after_fetch: bool,
}

fn default_reset_after_fetch() -> bool {
    true
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            transport: None,
            hostname: None,
            port: None,
            username: None,
            password: None,
            service_url: None,
            output_file: None,
            reset_after_fetch: default_reset_after_fetch(),
        }
    }
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSpec")
            .field("type", &self.transport)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "*****"))
            .field("service_url", &self.service_url)
            .field("output_file", &self.output_file)
            .field("reset_after_fetch", &self.reset_after_fetch)
            .finish()
    }
}

impl SourceSpec {
    /// A TCP source addressed by host and port.
    pub fn tcp(hostname: impl Into<String>, port: i64) -> Self {
        Self {
            transport: Some(TransportKind::Tcp.to_string()),
            hostname: Some(hostname.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    /// A source addressed by a locator string (`tcp://...` or `service:jmx:...`).
    pub fn locator(service_url: impl Into<String>) -> Self {
        Self {
            service_url: Some(service_url.into()),
            ..Self::default()
        }
    }

    /// Label for log lines and reports, available before resolution.
    pub fn describe(&self) -> String {
        match (&self.service_url, &self.hostname, self.port) {
            (Some(url), _, _) => url.clone(),
            (None, Some(host), Some(port)) => format!(
                "{}://{host}:{port}",
                self.transport.as_deref().unwrap_or("tcp").to_ascii_lowercase()
            ),
            (None, Some(host), None) => host.clone(),
            _ => "<unspecified source>".to_string(),
        }
    }

    /// Validate and resolve using the system name resolver.
    pub fn resolve(&self) -> ExecResult<ResolvedSource> {
        self.resolve_with(&SystemResolver)
    }

    /// Validate and resolve. No connection is opened; the only side effect
    /// is the hostname lookup performed by `resolver`.
    pub fn resolve_with(&self, resolver: &dyn HostResolver) -> ExecResult<ResolvedSource> {
        let endpoint = match &self.service_url {
            Some(url) => parse_locator(url, resolver, self.credentials())?,
            None => self.resolve_explicit(resolver)?,
        };

        if matches!(endpoint, Endpoint::Tcp { .. })
            && (self.username.is_some() || self.password.is_some())
        {
            tracing::warn!("Credentials are ignored for tcp sources");
        }

        Ok(ResolvedSource {
            endpoint,
            output_file: self.output_file.clone(),
            reset_after_fetch: self.reset_after_fetch,
        })
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    fn resolve_explicit(&self, resolver: &dyn HostResolver) -> ExecResult<Endpoint> {
        let kind: TransportKind = self
            .transport
            .as_deref()
            .ok_or_else(|| {
                ExecError::InvalidSource(
                    "parameter 'type' is missing; it is required if 'serviceURL' is not set"
                        .to_string(),
                )
            })?
            .parse()?;

        let hostname = self.hostname.as_deref().ok_or_else(|| {
            ExecError::InvalidSource(
                "parameter 'hostname' is missing; it is required if 'serviceURL' is not set"
                    .to_string(),
            )
        })?;
        let port = self.port.ok_or_else(|| {
            ExecError::InvalidSource(
                "parameter 'port' is missing; it is required if 'serviceURL' is not set"
                    .to_string(),
            )
        })?;
        let port = check_port(port)?;
        check_hostname(resolver, hostname, port)?;

        Ok(match kind {
            TransportKind::Tcp => Endpoint::Tcp {
                hostname: hostname.to_string(),
                port,
            },
            TransportKind::Jmx => Endpoint::Rpc {
                service_url: format!(
                    "{DEFAULT_JMX_URL_PREFIX}{hostname}:{port}{DEFAULT_JMX_URL_SUFFIX}"
                ),
                credentials: self.credentials(),
            },
        })
    }
}

fn parse_locator(
    url: &str,
    resolver: &dyn HostResolver,
    credentials: Credentials,
) -> ExecResult<Endpoint> {
    let tokens: Vec<&str> = url.split(':').collect();
    if tokens.len() < 3 {
        return Err(ExecError::InvalidSource(format!(
            "invalid serviceURL '{url}'"
        )));
    }

    if tokens[0].eq_ignore_ascii_case("tcp") {
        if tokens.len() != 3 || !tokens[1].starts_with("//") {
            return Err(ExecError::InvalidSource(format!(
                "invalid serviceURL '{url}'; for tcp it should look like 'tcp://<hostname>:<port>'"
            )));
        }
        let hostname = &tokens[1][2..];
        let port = tokens[2]
            .trim()
            .parse::<i64>()
            .map_err(|_| ExecError::InvalidPort(tokens[2].to_string()))?;
        let port = check_port(port)?;
        check_hostname(resolver, hostname, port)?;
        Ok(Endpoint::Tcp {
            hostname: hostname.to_string(),
            port,
        })
    } else if tokens[0] == "service" && tokens[1] == "jmx" {
        Ok(Endpoint::Rpc {
            service_url: url.to_string(),
            credentials,
        })
    } else {
        Err(ExecError::InvalidSource(format!(
            "invalid serviceURL '{url}'; expected it to start with 'tcp' or 'service:jmx'"
        )))
    }
}

fn check_port(port: i64) -> ExecResult<u16> {
    if !(1..=MAX_PORT).contains(&port) {
        return Err(ExecError::InvalidPort(port.to_string()));
    }
    Ok(port as u16)
}

fn check_hostname(resolver: &dyn HostResolver, hostname: &str, port: u16) -> ExecResult<()> {
    if hostname.trim().is_empty() {
        return Err(ExecError::InvalidSource(
            "parameter 'hostname' is not provided".to_string(),
        ));
    }
    tracing::debug!("Verifying that hostname '{hostname}' can be resolved");
    resolver
        .check(hostname, port)
        .map_err(|source| ExecError::UnresolvableHost {
            host: hostname.to_string(),
            source,
        })
}

/// Where and how to fetch, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { hostname: String, port: u16 },
    Rpc {
        service_url: String,
        credentials: Credentials,
    },
}

impl Endpoint {
    pub fn kind(&self) -> TransportKind {
        match self {
            Endpoint::Tcp { .. } => TransportKind::Tcp,
            Endpoint::Rpc { .. } => TransportKind::Jmx,
        }
    }

    /// Canonical locator string; resolving it again yields the same endpoint.
    pub fn locator(&self) -> String {
        match self {
            Endpoint::Tcp { hostname, port } => format!("tcp://{hostname}:{port}"),
            Endpoint::Rpc { service_url, .. } => service_url.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator())
    }
}

/// A validated source, frozen for the fetch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub endpoint: Endpoint,
    pub output_file: Option<PathBuf>,
    pub reset_after_fetch: bool,
}
