//! # Peer Wire Codec
//!
//! Purpose: Frame the single `Get(group, key)` RPC exchanged between
//! cache nodes, with typed error replies and an incremental server-side
//! parser.
//!
//! ## Design Principles
//! 1. **Length-Prefixed Framing**: Requests are arrays of bulk strings;
//!    replies are a bulk value or a coded error line.
//! 2. **Binary-Safe**: Keys and values are raw bytes end to end.
//! 3. **Incremental Parsing**: Partial frames return `None` and consume
//!    nothing, so the read loop can keep appending bytes.
//! 4. **Fail Fast**: Invalid framing is a protocol error, never a guess.
//!
//! ## Frame Layout
//!
//! ```text
//! request:  *3\r\n $3\r\nGET\r\n $G\r\n<group>\r\n $K\r\n<key>\r\n
//! value:    $N\r\n<bytes>\r\n
//! error:    -CODE message\r\n     CODE in {BADREQ, NOTFOUND, ERR}
//! ```

use bytes::{Buf, BytesMut};

use crate::error::{GcacheError, GcacheResult};

/// Upper bound on a single bulk payload; larger frames are rejected.
pub const MAX_BULK_LEN: usize = 16 * 1024 * 1024;

/// Arguments in a request frame (`GET`, group, key).
const REQUEST_ARGS: usize = 3;

/// Error category carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Request validation failure.
    BadRequest,
    /// Unknown group or missing record.
    NotFound,
    /// Any other server-side failure.
    Internal,
}

impl ErrorCode {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            ErrorCode::BadRequest => b"BADREQ",
            ErrorCode::NotFound => b"NOTFOUND",
            ErrorCode::Internal => b"ERR",
        }
    }

    fn from_token(token: &[u8]) -> Self {
        match token {
            b"BADREQ" => ErrorCode::BadRequest,
            b"NOTFOUND" => ErrorCode::NotFound,
            _ => ErrorCode::Internal,
        }
    }
}

/// Decoded reply to a peer Get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Successful lookup payload.
    Value(Vec<u8>),
    /// Server-reported failure.
    Error {
        /// Wire error category.
        code: ErrorCode,
        /// Human-readable message, surfaced verbatim.
        message: String,
    },
}

impl Reply {
    /// Maps a reply into the caller-facing result.
    ///
    /// The `record not found` literal becomes the canonical `NotFound`;
    /// every other message is surfaced verbatim.
    pub fn into_result(self) -> GcacheResult<Vec<u8>> {
        match self {
            Reply::Value(bytes) => Ok(bytes),
            Reply::Error { code, message } => Err(match code {
                ErrorCode::BadRequest => GcacheError::InvalidArgument(message),
                ErrorCode::NotFound if message == "record not found" => GcacheError::NotFound,
                ErrorCode::NotFound | ErrorCode::Internal => GcacheError::Remote(message),
            }),
        }
    }
}

/// Encodes a `Get(group, key)` request frame.
pub fn encode_get(group: &str, key: &str, out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, REQUEST_ARGS);
    out.extend_from_slice(b"\r\n");
    for arg in [b"GET" as &[u8], group.as_bytes(), key.as_bytes()] {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Encodes a successful value reply.
pub fn encode_value(data: &[u8], out: &mut Vec<u8>) {
    out.push(b'$');
    push_usize(out, data.len());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Encodes a coded error reply.
pub fn encode_error(code: ErrorCode, message: &str, out: &mut Vec<u8>) {
    out.push(b'-');
    out.extend_from_slice(code.as_bytes());
    out.push(b' ');
    out.extend_from_slice(message.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Incremental parser for request frames on the server side.
///
/// `parse` consumes a complete frame from the buffer and returns its
/// arguments, or returns `None` and leaves the buffer untouched when
/// more bytes are needed.
#[derive(Debug, Default)]
pub struct FrameParser;

impl FrameParser {
    /// Creates a parser.
    pub fn new() -> Self {
        FrameParser
    }

    /// Attempts to parse one request frame from the front of `buf`.
    pub fn parse(&mut self, buf: &mut BytesMut) -> GcacheResult<Option<Vec<Vec<u8>>>> {
        let mut pos = 0;
        let header = match read_line(buf, &mut pos)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if header.first() != Some(&b'*') {
            return Err(GcacheError::Protocol);
        }
        let count = parse_usize(&header[1..])?;
        if count == 0 || count > REQUEST_ARGS {
            return Err(GcacheError::Protocol);
        }

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let prefix = match read_line(buf, &mut pos)? {
                Some(line) => line,
                None => return Ok(None),
            };
            if prefix.first() != Some(&b'$') {
                return Err(GcacheError::Protocol);
            }
            let len = parse_usize(&prefix[1..])?;
            if len > MAX_BULK_LEN {
                return Err(GcacheError::Protocol);
            }
            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            let payload = buf[pos..pos + len].to_vec();
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(GcacheError::Protocol);
            }
            pos += len + 2;
            args.push(payload);
        }

        buf.advance(pos);
        Ok(Some(args))
    }
}

/// Attempts to decode one reply from the front of `buf`.
///
/// Returns `None` without consuming anything when the frame is still
/// incomplete.
pub fn decode_reply(buf: &mut BytesMut) -> GcacheResult<Option<Reply>> {
    let mut pos = 0;
    let header = match read_line(buf, &mut pos)? {
        Some(line) => line,
        None => return Ok(None),
    };

    match header.first() {
        Some(&b'$') => {
            let len = parse_usize(&header[1..])?;
            if len > MAX_BULK_LEN {
                return Err(GcacheError::Protocol);
            }
            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            let payload = buf[pos..pos + len].to_vec();
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(GcacheError::Protocol);
            }
            pos += len + 2;
            buf.advance(pos);
            Ok(Some(Reply::Value(payload)))
        }
        Some(&b'-') => {
            let line = &header[1..];
            let split = line.iter().position(|&b| b == b' ').unwrap_or(line.len());
            let code = ErrorCode::from_token(&line[..split]);
            let message = String::from_utf8_lossy(&line[(split + 1).min(line.len())..]).into_owned();
            buf.advance(pos);
            Ok(Some(Reply::Error { code, message }))
        }
        _ => Err(GcacheError::Protocol),
    }
}

/// Reads one `\r\n`-terminated line starting at `*pos`, advancing `pos`
/// past the terminator. Returns `None` when the line is incomplete.
fn read_line<'a>(buf: &'a BytesMut, pos: &mut usize) -> GcacheResult<Option<&'a [u8]>> {
    let window = &buf[*pos..];
    let newline = match window.iter().position(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if newline == 0 || window[newline - 1] != b'\r' {
        return Err(GcacheError::Protocol);
    }
    let line = &window[..newline - 1];
    *pos += newline + 1;
    Ok(Some(line))
}

fn parse_usize(data: &[u8]) -> GcacheResult<usize> {
    if data.is_empty() {
        return Err(GcacheError::Protocol);
    }
    let mut value: usize = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(GcacheError::Protocol);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or(GcacheError::Protocol)?;
    }
    Ok(value)
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    let mut digits = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        digits[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            digits[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(digits[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_get_frame() {
        let mut out = Vec::new();
        encode_get("scores", "tom", &mut out);
        assert_eq!(&out, b"*3\r\n$3\r\nGET\r\n$6\r\nscores\r\n$3\r\ntom\r\n");
    }

    #[test]
    fn parses_complete_request() {
        let mut parser = FrameParser::new();
        let mut buf = BytesMut::from(&b"*3\r\n$3\r\nGET\r\n$6\r\nscores\r\n$3\r\ntom\r\n"[..]);
        let args = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"scores".to_vec(), b"tom".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_request_consumes_nothing() {
        let frame = b"*3\r\n$3\r\nGET\r\n$6\r\nscores\r\n$3\r\ntom\r\n";
        let mut parser = FrameParser::new();
        for split in 1..frame.len() {
            let mut buf = BytesMut::from(&frame[..split]);
            let before = buf.len();
            assert!(parser.parse(&mut buf).unwrap().is_none(), "split at {split}");
            assert_eq!(buf.len(), before);
        }
    }

    #[test]
    fn two_pipelined_requests_parse_in_order() {
        let mut parser = FrameParser::new();
        let mut buf = BytesMut::new();
        let mut frame = Vec::new();
        encode_get("g", "a", &mut frame);
        encode_get("g", "b", &mut frame);
        buf.extend_from_slice(&frame);

        let first = parser.parse(&mut buf).unwrap().unwrap();
        let second = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(first[2], b"a".to_vec());
        assert_eq!(second[2], b"b".to_vec());
        assert!(parser.parse(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_junk_header() {
        let mut parser = FrameParser::new();
        let mut buf = BytesMut::from(&b"GET scores tom\r\n"[..]);
        assert!(matches!(parser.parse(&mut buf), Err(GcacheError::Protocol)));
    }

    #[test]
    fn value_reply_round_trips() {
        let mut out = Vec::new();
        encode_value(b"630", &mut out);
        let mut buf = BytesMut::from(&out[..]);
        let reply = decode_reply(&mut buf).unwrap().unwrap();
        assert_eq!(reply, Reply::Value(b"630".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn error_reply_round_trips() {
        let mut out = Vec::new();
        encode_error(ErrorCode::NotFound, "record not found", &mut out);
        let mut buf = BytesMut::from(&out[..]);
        let reply = decode_reply(&mut buf).unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::Error {
                code: ErrorCode::NotFound,
                message: "record not found".to_string(),
            }
        );
    }

    #[test]
    fn not_found_literal_maps_to_canonical_error() {
        let reply = Reply::Error {
            code: ErrorCode::NotFound,
            message: "record not found".to_string(),
        };
        assert!(matches!(reply.into_result(), Err(GcacheError::NotFound)));

        let reply = Reply::Error {
            code: ErrorCode::NotFound,
            message: "group scores not found".to_string(),
        };
        match reply.into_result() {
            Err(GcacheError::Remote(message)) => assert_eq!(message, "group scores not found"),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn bad_request_maps_to_invalid_argument() {
        let reply = Reply::Error {
            code: ErrorCode::BadRequest,
            message: "group and key are required".to_string(),
        };
        assert!(matches!(reply.into_result(), Err(GcacheError::InvalidArgument(_))));
    }

    #[test]
    fn partial_reply_consumes_nothing() {
        let mut out = Vec::new();
        encode_value(b"abcdef", &mut out);
        for split in 1..out.len() {
            let mut buf = BytesMut::from(&out[..split]);
            let before = buf.len();
            assert!(decode_reply(&mut buf).unwrap().is_none(), "split at {split}");
            assert_eq!(buf.len(), before);
        }
    }

    #[test]
    fn unknown_error_code_is_internal() {
        let mut buf = BytesMut::from(&b"-WAT something odd\r\n"[..]);
        let reply = decode_reply(&mut buf).unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::Error {
                code: ErrorCode::Internal,
                message: "something odd".to_string(),
            }
        );
    }
}
