//! Execution-data wire format: a framed stream of typed blocks.
//!
//! The same format is used for `.exec` files and for the agent's TCP
//! control protocol, which adds two remote-control blocks on top.

use std::io::{self, Read, Write};
use std::path::Path;

use crate::types::{ExecError, ExecResult, ExecutionData, SessionInfo};

/// Block id of the stream header.
pub const BLOCK_HEADER: u8 = 0x01;
/// Block id of a session-info record.
pub const BLOCK_SESSION_INFO: u8 = 0x10;
/// Block id of an execution-data record.
pub const BLOCK_EXECUTION_DATA: u8 = 0x11;
/// Remote control: acknowledges that a command finished.
pub const BLOCK_CMD_OK: u8 = 0x20;
/// Remote control: request a dump.
pub const BLOCK_CMD_DUMP: u8 = 0x40;

/// Magic number following the header block id.
const MAGIC_NUMBER: u16 = 0xC0C0;

/// Current format version.
pub const FORMAT_VERSION: u16 = 0x1007;

/// Header size in bytes (block id + magic + version).
pub const HEADER_SIZE: usize = 5;

/// A record decoded from an execution-data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    SessionInfo(SessionInfo),
    ExecutionData(ExecutionData),
    /// Only produced by readers in remote-control mode.
    DumpCommand { dump: bool, reset: bool },
}

/// Writer for execution-data streams. The header is written on construction.
pub struct ExecWriter<W: Write> {
    out: W,
}

impl<W: Write> ExecWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        out.write_all(&[BLOCK_HEADER])?;
        write_u16(&mut out, MAGIC_NUMBER)?;
        write_u16(&mut out, FORMAT_VERSION)?;
        Ok(Self { out })
    }

    pub fn write_session_info(&mut self, info: &SessionInfo) -> io::Result<()> {
        self.out.write_all(&[BLOCK_SESSION_INFO])?;
        write_utf(&mut self.out, &info.id)?;
        write_i64(&mut self.out, info.start)?;
        write_i64(&mut self.out, info.dump)
    }

    pub fn write_execution_data(&mut self, data: &ExecutionData) -> io::Result<()> {
        self.out.write_all(&[BLOCK_EXECUTION_DATA])?;
        write_i64(&mut self.out, data.id as i64)?;
        write_utf(&mut self.out, &data.name)?;
        write_bool_array(&mut self.out, &data.probes)
    }

    /// Ask the agent for a dump. With `reset` the agent clears its probes
    /// after answering.
    pub fn write_dump_command(&mut self, dump: bool, reset: bool) -> io::Result<()> {
        self.out.write_all(&[BLOCK_CMD_DUMP, dump as u8, reset as u8])
    }

    pub fn write_command_ok(&mut self) -> io::Result<()> {
        self.out.write_all(&[BLOCK_CMD_OK])
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl ExecWriter<Vec<u8>> {
    /// Serialize sessions followed by execution records into a fresh buffer.
    pub fn to_bytes(sessions: &[SessionInfo], executions: &[ExecutionData]) -> io::Result<Vec<u8>> {
        let mut writer = ExecWriter::new(Vec::new())?;
        for info in sessions {
            writer.write_session_info(info)?;
        }
        for data in executions {
            writer.write_execution_data(data)?;
        }
        Ok(writer.into_inner())
    }
}

/// Pull decoder over an execution-data stream.
///
/// Yields records lazily until the input ends. After the first error the
/// reader is exhausted. In remote-control mode a command-ok block also ends
/// the sequence.
pub struct ExecReader<R: Read> {
    input: R,
    remote: bool,
    first_block: bool,
    finished: bool,
    acknowledged: bool,
}

impl<R: Read> ExecReader<R> {
    /// Reader for plain `.exec` streams; command blocks are rejected.
    pub fn new(input: R) -> Self {
        Self {
            input,
            remote: false,
            first_block: true,
            finished: false,
            acknowledged: false,
        }
    }

    /// Reader for the agent control protocol.
    pub fn remote(input: R) -> Self {
        Self {
            remote: true,
            ..Self::new(input)
        }
    }

    /// Whether the stream ended with a command-ok block.
    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    fn next_record(&mut self) -> ExecResult<Option<Record>> {
        loop {
            let Some(block) = read_block_id(&mut self.input)? else {
                return Ok(None);
            };
            if self.first_block && block != BLOCK_HEADER {
                return Err(ExecError::Format(format!(
                    "stream does not start with a header (block 0x{block:02x})"
                )));
            }
            self.first_block = false;

            match block {
                BLOCK_HEADER => self.read_header()?,
                BLOCK_SESSION_INFO => {
                    let id = read_utf(&mut self.input).map_err(truncated)?;
                    let start = read_i64(&mut self.input).map_err(truncated)?;
                    let dump = read_i64(&mut self.input).map_err(truncated)?;
                    return Ok(Some(Record::SessionInfo(SessionInfo { id, start, dump })));
                }
                BLOCK_EXECUTION_DATA => {
                    let id = read_i64(&mut self.input).map_err(truncated)? as u64;
                    let name = read_utf(&mut self.input).map_err(truncated)?;
                    let probes = read_bool_array(&mut self.input).map_err(truncated)?;
                    return Ok(Some(Record::ExecutionData(ExecutionData { id, name, probes })));
                }
                BLOCK_CMD_DUMP if self.remote => {
                    let dump = read_bool(&mut self.input).map_err(truncated)?;
                    let reset = read_bool(&mut self.input).map_err(truncated)?;
                    return Ok(Some(Record::DumpCommand { dump, reset }));
                }
                BLOCK_CMD_OK if self.remote => {
                    self.acknowledged = true;
                    return Ok(None);
                }
                other => {
                    return Err(ExecError::Format(format!("unknown block type 0x{other:02x}")));
                }
            }
        }
    }

    fn read_header(&mut self) -> ExecResult<()> {
        let magic = read_u16(&mut self.input).map_err(truncated)?;
        if magic != MAGIC_NUMBER {
            return Err(ExecError::Format(format!(
                "invalid magic: expected 0x{MAGIC_NUMBER:04X}, got 0x{magic:04X}"
            )));
        }
        let version = read_u16(&mut self.input).map_err(truncated)?;
        if version != FORMAT_VERSION {
            return Err(ExecError::Format(format!(
                "incompatible version 0x{version:04X}, expected 0x{FORMAT_VERSION:04X}"
            )));
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ExecReader<R> {
    type Item = ExecResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode every record of a file.
pub fn read_file(path: &Path) -> ExecResult<Vec<Record>> {
    let file = std::fs::File::open(path)
        .map_err(|e| ExecError::io(format!("Unable to open '{}'", path.display()), e))?;
    ExecReader::new(io::BufReader::new(file)).collect()
}

/// Fail with [`ExecError::OutputExists`] when `path` is already present.
pub fn ensure_absent(path: &Path) -> ExecResult<()> {
    if path.exists() {
        return Err(ExecError::OutputExists(path.to_path_buf()));
    }
    Ok(())
}

/// Create the parent directory of `path` if it is missing.
pub fn ensure_parent_dir(path: &Path) -> ExecResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| {
                ExecError::io(
                    format!("Unable to create directory '{}'", parent.display()),
                    e,
                )
            }),
        _ => Ok(()),
    }
}

/// Create a new file at `path` and fill it through `write`.
///
/// Never overwrites: an existing file fails with [`ExecError::OutputExists`].
/// If `write` fails the partially written file is removed. Returns the
/// number of bytes on disk.
pub fn write_new_file<F>(path: &Path, write: F) -> ExecResult<u64>
where
    F: FnOnce(&mut io::BufWriter<std::fs::File>) -> io::Result<()>,
{
    ensure_parent_dir(path)?;
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => ExecError::OutputExists(path.to_path_buf()),
            _ => ExecError::io(format!("Unable to create '{}'", path.display()), e),
        })?;

    let mut out = io::BufWriter::new(file);
    let written = write(&mut out)
        .and_then(|_| out.flush())
        .and_then(|_| out.get_ref().metadata())
        .map(|meta| meta.len());
    drop(out);

    written.map_err(|e| {
        if let Err(cleanup) = std::fs::remove_file(path) {
            tracing::warn!("Unable to remove partial file '{}': {cleanup}", path.display());
        }
        ExecError::io(format!("Unable to write '{}'", path.display()), e)
    })
}

fn read_block_id<R: Read>(input: &mut R) -> ExecResult<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match input.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ExecError::io("Error reading execution data", e)),
        }
    }
}

fn truncated(e: io::Error) -> ExecError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => ExecError::Format("truncated block".to_string()),
        io::ErrorKind::InvalidData => ExecError::Format(e.to_string()),
        _ => ExecError::io("Error reading execution data", e),
    }
}

// Big-endian primitives

fn write_u16<W: Write>(out: &mut W, val: u16) -> io::Result<()> {
    out.write_all(&val.to_be_bytes())
}

fn write_i64<W: Write>(out: &mut W, val: i64) -> io::Result<()> {
    out.write_all(&val.to_be_bytes())
}

fn read_u16<R: Read>(input: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_i64<R: Read>(input: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

fn read_bool<R: Read>(input: &mut R) -> io::Result<bool> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

fn write_var_int<W: Write>(out: &mut W, mut val: u32) -> io::Result<()> {
    while val & !0x7F != 0 {
        out.write_all(&[0x80 | (val & 0x7F) as u8])?;
        val >>= 7;
    }
    out.write_all(&[val as u8])
}

fn read_var_int<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut value = 0u32;
    for shift in (0..35).step_by(7) {
        let mut buf = [0u8; 1];
        input.read_exact(&mut buf)?;
        value |= ((buf[0] & 0x7F) as u32) << shift;
        if buf[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long"))
}

/// Flags are packed eight per byte, least significant bit first.
fn write_bool_array<W: Write>(out: &mut W, values: &[bool]) -> io::Result<()> {
    let len = u32::try_from(values.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many probes"))?;
    write_var_int(out, len)?;
    for chunk in values.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (bit, &hit)| acc | ((hit as u8) << bit));
        out.write_all(&[byte])?;
    }
    Ok(())
}

fn read_bool_array<R: Read>(input: &mut R) -> io::Result<Vec<bool>> {
    let len = read_var_int(input)? as usize;
    let byte_len = len.div_ceil(8);
    let mut packed = Vec::new();
    input.by_ref().take(byte_len as u64).read_to_end(&mut packed)?;
    if packed.len() != byte_len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok((0..len).map(|i| packed[i / 8] & (1 << (i % 8)) != 0).collect())
}

/// Java's modified UTF-8: NUL takes two bytes and supplementary characters
/// are written as two three-byte surrogates.
fn write_utf<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    let mut encoded = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => encoded.push(unit as u8),
            0x0000..=0x07FF => {
                encoded.push(0xC0 | (unit >> 6) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                encoded.push(0xE0 | (unit >> 12) as u8);
                encoded.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    let len = u16::try_from(encoded.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("encoded string too long: {} bytes", encoded.len()),
        )
    })?;
    write_u16(out, len)?;
    out.write_all(&encoded)
}

fn read_utf<R: Read>(input: &mut R) -> io::Result<String> {
    let len = read_u16(input)? as usize;
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;

    let malformed = || io::Error::new(io::ErrorKind::InvalidData, "malformed modified UTF-8");
    let mut units = Vec::with_capacity(len);
    let mut i = 0;
    while i < len {
        let b = bytes[i];
        let cont = |k: usize| -> io::Result<u16> {
            match bytes.get(i + k) {
                Some(&c) if c & 0xC0 == 0x80 => Ok((c & 0x3F) as u16),
                _ => Err(malformed()),
            }
        };
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            units.push(((b & 0x1F) as u16) << 6 | cont(1)?);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            units.push(((b & 0x0F) as u16) << 12 | cont(1)? << 6 | cont(2)?);
            i += 3;
        } else {
            return Err(malformed());
        }
    }
    String::from_utf16(&units).map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> ExecResult<Vec<Record>> {
        ExecReader::new(bytes).collect()
    }

    #[test]
    fn test_header_bytes() {
        let bytes = ExecWriter::new(Vec::new()).unwrap().into_inner();
        assert_eq!(bytes, vec![0x01, 0xC0, 0xC0, 0x10, 0x07]);
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let sessions = vec![
            SessionInfo::new("host-a-1", 1_700_000_000_000, 1_700_000_100_000),
            SessionInfo::new("host-b-1", 1_700_000_050_000, 1_700_000_150_000),
        ];
        let executions = vec![
            ExecutionData::new(0xFFEE_DDCC_BBAA_0099, "org/acme/Main", vec![true, false, true]),
            ExecutionData::new(1, "org/acme/Util", vec![false; 17]),
            ExecutionData::new(2, "org/acme/Empty", vec![]),
        ];
        let bytes = ExecWriter::to_bytes(&sessions, &executions).unwrap();

        let records = decode(&bytes).unwrap();
        let expected: Vec<Record> = sessions
            .into_iter()
            .map(Record::SessionInfo)
            .chain(executions.into_iter().map(Record::ExecutionData))
            .collect();
        assert_eq!(records, expected);
    }

    #[test]
    fn test_probe_packing_is_lsb_first() {
        let mut buf = Vec::new();
        let mut probes = vec![false; 9];
        probes[0] = true;
        probes[3] = true;
        probes[8] = true;
        write_bool_array(&mut buf, &probes).unwrap();
        assert_eq!(buf, vec![9, 0b0000_1001, 0b0000_0001]);
        assert_eq!(read_bool_array(&mut &buf[..]).unwrap(), probes);
    }

    #[test]
    fn test_var_int_multi_byte() {
        let mut buf = Vec::new();
        write_var_int(&mut buf, 300).unwrap();
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(read_var_int(&mut &buf[..]).unwrap(), 300);
    }

    #[test]
    fn test_modified_utf8() {
        let mut buf = Vec::new();
        write_utf(&mut buf, "a\0\u{e9}").unwrap();
        assert_eq!(buf, vec![0, 5, b'a', 0xC0, 0x80, 0xC3, 0xA9]);

        let mut buf = Vec::new();
        write_utf(&mut buf, "\u{1F600}").unwrap();
        assert_eq!(buf.len(), 2 + 6);
        assert_eq!(read_utf(&mut &buf[..]).unwrap(), "\u{1F600}");
    }

    #[test]
    fn test_missing_header_rejected() {
        let err = decode(&[BLOCK_SESSION_INFO, 0, 0]).unwrap_err();
        assert!(matches!(err, ExecError::Format(_)));
    }

    #[test]
    fn test_invalid_magic() {
        let err = decode(&[BLOCK_HEADER, 0x00, 0x00, 0x10, 0x07]).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }

    #[test]
    fn test_incompatible_version() {
        let err = decode(&[BLOCK_HEADER, 0xC0, 0xC0, 0x10, 0x06]).unwrap_err();
        assert!(err.to_string().contains("incompatible version"));
    }

    #[test]
    fn test_truncated_record() {
        let mut bytes =
            ExecWriter::to_bytes(&[], &[ExecutionData::new(1, "A", vec![true])]).unwrap();
        bytes.truncate(bytes.len() - 2);
        let records: Vec<_> = ExecReader::new(&bytes[..]).collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_err());
    }

    #[test]
    fn test_concatenated_streams() {
        let mut bytes = ExecWriter::to_bytes(&[SessionInfo::new("a", 1, 2)], &[]).unwrap();
        bytes.extend(ExecWriter::to_bytes(&[SessionInfo::new("b", 3, 4)], &[]).unwrap());
        assert_eq!(decode(&bytes).unwrap().len(), 2);
    }

    #[test]
    fn test_command_blocks_rejected_in_file_mode() {
        let mut writer = ExecWriter::new(Vec::new()).unwrap();
        writer.write_dump_command(true, false).unwrap();
        let err = decode(&writer.into_inner()).unwrap_err();
        assert!(err.to_string().contains("unknown block type 0x40"));
    }

    #[test]
    fn test_remote_mode_stops_at_command_ok() {
        let mut writer = ExecWriter::new(Vec::new()).unwrap();
        writer.write_dump_command(true, true).unwrap();
        writer.write_command_ok().unwrap();
        writer
            .write_session_info(&SessionInfo::new("after", 0, 0))
            .unwrap();
        let bytes = writer.into_inner();

        let mut reader = ExecReader::remote(&bytes[..]);
        assert_eq!(
            reader.next().unwrap().unwrap(),
            Record::DumpCommand {
                dump: true,
                reset: true
            }
        );
        assert!(reader.next().is_none());
        assert!(reader.acknowledged());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jacoco.exec");
        let bytes = ExecWriter::to_bytes(
            &[SessionInfo::new("s", 10, 20)],
            &[ExecutionData::new(42, "X", vec![true, true])],
        )
        .unwrap();
        std::fs::write(&path, bytes).unwrap();

        let records = read_file(&path).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_write_new_file_creates_parent_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/jacoco.exec");

        let len = write_new_file(&path, |out| out.write_all(b"abc")).unwrap();
        assert_eq!(len, 3);

        let err = write_new_file(&path, |out| out.write_all(b"xyz")).unwrap_err();
        assert!(matches!(err, ExecError::OutputExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn test_write_new_file_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.exec");

        let err = write_new_file(&path, |out| {
            out.write_all(b"half")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();

        assert!(matches!(err, ExecError::Io { .. }));
        assert!(!path.exists());
    }
}
