//! Message framing for newline-delimited JSON.

use std::io;

use super::message::JsonRpcMessage;

/// Parse a single line of text as a JSON-RPC message.
pub fn parse_message(line: &str) -> io::Result<JsonRpcMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Empty message"));
    }

    serde_json::from_str(trimmed).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Serialize a value to a JSON line (with trailing newline).
pub fn frame_message<T: serde::Serialize>(value: &T) -> io::Result<String> {
    let mut json =
        serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    json.push('\n');
    Ok(json)
}
