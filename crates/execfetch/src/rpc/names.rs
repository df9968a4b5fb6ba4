//! Service URLs and object names for the remote management interface.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ExecError, ExecResult};

const SERVICE_URL_PREFIX: &str = "service:jmx:";

/// Parsed form of `service:jmx:<protocol>://[host[:port]][url-path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    raw: String,
    pub protocol: String,
    pub host: String,
    /// `None` when the URL carries no port.
    pub port: Option<u16>,
    pub url_path: String,
}

impl ServiceUrl {
    pub fn parse(raw: &str) -> ExecResult<Self> {
        let invalid = |reason: &str| ExecError::InvalidServiceUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix(SERVICE_URL_PREFIX)
            .ok_or_else(|| invalid("must start with 'service:jmx:'"))?;

        let (protocol, rest) = rest
            .split_once("://")
            .ok_or_else(|| invalid("missing '://' after protocol"))?;
        if protocol.is_empty()
            || !protocol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid("bad protocol"));
        }

        let path_start = rest.find(['/', ';']).unwrap_or(rest.len());
        let (authority, url_path) = rest.split_at(path_start);
        let (host, port) = split_authority(authority).map_err(|reason| invalid(&reason))?;

        Ok(Self {
            raw: raw.to_string(),
            protocol: protocol.to_ascii_lowercase(),
            host,
            port,
            url_path: url_path.to_string(),
        })
    }

    /// The host and port a client should dial.
    ///
    /// Registry-style URLs leave the authority empty and name the real
    /// endpoint in a `/jndi/<scheme>://host:port/...` path.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        if !self.host.is_empty() {
            return self.port.map(|port| (self.host.clone(), port));
        }
        let nested = self.url_path.strip_prefix("/jndi/")?;
        let (_, after_scheme) = nested.split_once("://")?;
        let authority = after_scheme
            .split(['/', ';'])
            .next()
            .unwrap_or(after_scheme);
        match split_authority(authority) {
            Ok((host, Some(port))) if !host.is_empty() => Some((host, port)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_authority(authority: &str) -> Result<(String, Option<u16>), String> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        match after {
            "" => (host, None),
            _ => (
                host,
                Some(after.strip_prefix(':').ok_or_else(|| "bad port".to_string())?),
            ),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | '?' | '#'))
    {
        return Err(format!("bad host '{host}'"));
    }
    let port = match port {
        None | Some("") => None,
        Some(p) => match p.parse::<u16>() {
            Ok(0) | Err(_) => return Err(format!("bad port '{p}'")),
            Ok(n) => Some(n),
        },
    };
    Ok((host.to_string(), port))
}

/// A `domain:key=value[,key=value]*` object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    pub domain: String,
    pub properties: BTreeMap<String, String>,
    canonical: String,
}

impl ObjectName {
    pub fn parse(name: &str) -> ExecResult<Self> {
        let invalid = |reason: &str| ExecError::InvalidObjectName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let (domain, props) = name
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' after domain"))?;
        if domain.contains(['*', '?', '\n']) {
            return Err(invalid("patterns are not allowed in the domain"));
        }
        if props.is_empty() {
            return Err(invalid("no key properties"));
        }

        let mut properties = BTreeMap::new();
        for pair in props.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("key property without '='"))?;
            if key.is_empty() || value.is_empty() {
                return Err(invalid("empty key or value"));
            }
            if key.contains([':', '*', '?']) || value.contains([':', '*', '?']) {
                return Err(invalid("illegal character in key property"));
            }
            if properties.insert(key.to_string(), value.to_string()).is_some() {
                return Err(invalid(&format!("duplicate key '{key}'")));
            }
        }

        let canonical = format!(
            "{domain}:{}",
            properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",")
        );
        Ok(Self {
            domain: domain.to_string(),
            properties,
            canonical,
        })
    }

    /// Name with key properties sorted by key.
    pub fn canonical_name(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
