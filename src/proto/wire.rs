//! Mailbox binary wire codec
//!
//! The mailbox transport carries exactly one message per file, so framing
//! is unnecessary; the encoding is a minimal hand-rolled layout instead of
//! a structured-message library:
//! ```text
//! string:  u32 LE byte length, UTF-8 bytes
//! list:    u32 LE count, strings
//! map:     u32 LE count, key/value string pairs (sorted by key)
//! bytes:   u32 LE length, raw bytes
//! bool:    one byte, 0 or 1
//! integer: fixed-width LE
//! ```

use std::collections::HashMap;

use crate::common::Error;
use crate::proto::types::{Command, CommandResult, ResultKind};

/// Upper bound on any single length field, shared with the socket framing
pub const MAX_FIELD_SIZE: u32 = 10 * 1024 * 1024;

/// Serialize a Command into the mailbox request layout
pub fn encode_command(cmd: &Command) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_str(&cmd.command);
    w.put_str_list(&cmd.parameters);
    w.put_str_map(&cmd.environment);
    w.put_bool(cmd.through_shell);
    w.put_bool(cmd.redirect_stderr);
    w.put_u64(cmd.timeout_ms);
    w.into_bytes()
}

/// Parse a mailbox request file body back into a Command
pub fn decode_command(data: &[u8]) -> Result<Command, Error> {
    let mut r = Reader::new(data);
    let command = r.take_str()?;
    let parameters = r.take_str_list()?;
    let environment = r.take_str_map()?;
    let through_shell = r.take_bool()?;
    let redirect_stderr = r.take_bool()?;
    let timeout_ms = r.take_u64()?;
    r.expect_end()?;
    Ok(Command {
        command,
        parameters,
        environment,
        through_shell,
        redirect_stderr,
        timeout_ms,
    })
}

/// Serialize a CommandResult into the mailbox response layout
pub fn encode_result(result: &CommandResult) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u8(result.kind.to_wire());
    w.put_i32(result.exit_code);
    w.put_bytes(&result.stdout);
    w.put_bytes(&result.stderr);
    w.into_bytes()
}

/// Parse a mailbox response file body back into a CommandResult
pub fn decode_result(data: &[u8]) -> Result<CommandResult, Error> {
    let mut r = Reader::new(data);
    let tag = r.take_u8()?;
    let kind = ResultKind::from_wire(tag)
        .ok_or_else(|| Error::MalformedResponse(format!("unknown result kind tag {}", tag)))?;
    let exit_code = r.take_i32()?;
    let stdout = r.take_bytes()?;
    let stderr = r.take_bytes()?;
    r.expect_end()?;
    Ok(CommandResult {
        kind,
        exit_code,
        stdout,
        stderr,
    })
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    fn put_str_list(&mut self, items: &[String]) {
        self.put_u32(items.len() as u32);
        for item in items {
            self.put_str(item);
        }
    }

    fn put_str_map(&mut self, map: &HashMap<String, String>) {
        // Sorted keys keep the encoding deterministic
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        self.put_u32(keys.len() as u32);
        for key in keys {
            self.put_str(key);
            self.put_str(&map[key]);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.data.len() - self.pos < n {
            return Err(Error::MalformedRequest(format!(
                "truncated message: needed {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn take_bool(&mut self) -> Result<bool, Error> {
        match self.take_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::MalformedRequest(format!(
                "invalid boolean byte {}",
                other
            ))),
        }
    }

    fn take_u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_i32(&mut self) -> Result<i32, Error> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, Error> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn take_len(&mut self) -> Result<usize, Error> {
        let len = self.take_u32()?;
        if len > MAX_FIELD_SIZE {
            return Err(Error::MalformedRequest(format!(
                "field length {} exceeds limit",
                len
            )));
        }
        Ok(len as usize)
    }

    fn take_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.take_len()?;
        Ok(self.take(len)?.to_vec())
    }

    fn take_str(&mut self) -> Result<String, Error> {
        let len = self.take_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::MalformedRequest(format!("invalid UTF-8 string: {}", e)))
    }

    fn take_str_list(&mut self) -> Result<Vec<String>, Error> {
        let count = self.take_len()?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(self.take_str()?);
        }
        Ok(items)
    }

    fn take_str_map(&mut self) -> Result<HashMap<String, String>, Error> {
        let count = self.take_len()?;
        let mut map = HashMap::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.take_str()?;
            let value = self.take_str()?;
            if map.insert(key.clone(), value).is_some() {
                return Err(Error::MalformedRequest(format!(
                    "duplicate environment key '{}'",
                    key
                )));
            }
        }
        Ok(map)
    }

    fn expect_end(&self) -> Result<(), Error> {
        if self.pos != self.data.len() {
            return Err(Error::MalformedRequest(format!(
                "{} trailing bytes after message",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
