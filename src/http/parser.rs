//! Incremental HTTP/1.x line parsers.
//!
//! # Responsibilities
//! - Parse the request line and header lines from a [`ByteCursor`]
//! - Report `Incomplete` when the buffered bytes end mid-element, so the
//!   caller can read more and retry from the start of the element
//! - Reject invalid characters and line endings as they are seen
//!
//! # Design Decisions
//! - Parsers never allocate except for the decoded element itself
//! - A CR that is the last buffered byte is incomplete; a CR followed by
//!   anything other than LF is fatal
//! - Empty lines before the request line are skipped (robustness for
//!   clients that send an extra CRLF after a body)

use std::fmt;

use crate::buffer::ByteCursor;

use super::error::{Error, Result};

/// Outcome of a single parse step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult<T> {
    /// A full element was parsed.
    Complete(T),
    /// More bytes are needed.
    Incomplete,
    /// The end of a list (the blank line after headers) was reached.
    Finished,
}

/// Protocol version from the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartLine {
    pub method: String,
    pub uri: String,
    pub version: Version,
}

/// A single header line, value trimmed of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    pub name: String,
    pub value: String,
}

macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(ParseResult::Incomplete),
        }
    };
}

/// RFC 7230 `tchar`.
#[inline]
pub(crate) const fn is_tchar(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'*'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~'
    ) || b.is_ascii_alphanumeric()
}

/// Visible ASCII except `<` and `>`.
#[inline]
const fn is_uri_char(b: u8) -> bool {
    b >= 0x21 && b <= 0x7E && b != b'<' && b != b'>'
}

/// HTAB, visible ASCII, space and obs-text.
#[inline]
const fn is_header_value_char(b: u8) -> bool {
    b == b'\t' || (b >= 0x20 && b != 0x7F)
}

/// Skip any CRLF/LF lines at the cursor and consume them.
///
/// Returns `false` when the buffered bytes end before a non-empty line starts.
pub fn skip_empty_lines(cursor: &mut ByteCursor<'_>) -> Result<bool> {
    loop {
        match cursor.peek() {
            None => return Ok(false),
            Some(b'\r') => {
                cursor.bump();
                match cursor.next() {
                    None => return Ok(false),
                    Some(b'\n') => {}
                    Some(_) => return Err(Error::InvalidNewline),
                }
            }
            Some(b'\n') => cursor.bump(),
            Some(_) => break,
        }
    }
    cursor.mark_consumed(0);
    Ok(true)
}

/// Consume a single CRLF or LF.
///
/// Returns `false` if more bytes are needed to decide.
pub fn consume_newline(cursor: &mut ByteCursor<'_>) -> Result<bool> {
    match cursor.next() {
        None => return Ok(false),
        Some(b'\r') => match cursor.next() {
            None => return Ok(false),
            Some(b'\n') => {}
            Some(_) => return Err(Error::InvalidNewline),
        },
        Some(b'\n') => {}
        Some(_) => return Err(Error::InvalidNewline),
    }
    cursor.mark_consumed(0);
    Ok(true)
}

/// Parse `method SP request-target SP HTTP/1.x CRLF`.
pub fn parse_start_line(cursor: &mut ByteCursor<'_>) -> Result<ParseResult<StartLine>> {
    if !skip_empty_lines(cursor)? {
        return Ok(ParseResult::Incomplete);
    }

    let method = need!(parse_method(cursor)?);
    let uri = need!(parse_uri(cursor)?);
    let version = need!(parse_version(cursor)?);
    if !consume_newline(cursor)? {
        return Ok(ParseResult::Incomplete);
    }

    Ok(ParseResult::Complete(StartLine {
        method,
        uri,
        version,
    }))
}

fn parse_method(cursor: &mut ByteCursor<'_>) -> Result<Option<String>> {
    loop {
        match cursor.next() {
            None => return Ok(None),
            Some(b' ') => {
                let method = cursor.take(-1);
                if method.is_empty() {
                    return Err(Error::InvalidToken);
                }
                return Ok(Some(method.to_latin1()));
            }
            Some(b) if !is_tchar(b) => return Err(Error::InvalidToken),
            Some(_) => {}
        }
    }
}

fn parse_uri(cursor: &mut ByteCursor<'_>) -> Result<Option<String>> {
    loop {
        match cursor.next() {
            None => return Ok(None),
            Some(b' ') => {
                let uri = cursor.take(-1);
                if uri.is_empty() {
                    return Err(Error::InvalidUri);
                }
                return Ok(Some(uri.to_latin1()));
            }
            Some(b) if !is_uri_char(b) => return Err(Error::InvalidUri),
            Some(_) => {}
        }
    }
}

fn parse_version(cursor: &mut ByteCursor<'_>) -> Result<Option<Version>> {
    for &expected in b"HTTP/" {
        match cursor.next() {
            None => return Ok(None),
            Some(b) if b == expected => {}
            Some(_) => return Err(Error::InvalidVersion),
        }
    }

    // Any other major or minor digit is a well-formed but unsupported version.
    for &expected in b"1." {
        match cursor.next() {
            None => return Ok(None),
            Some(b) if b == expected => {}
            Some(b) if b.is_ascii_digit() || b == b'.' => return Err(Error::UnsupportedVersion),
            Some(_) => return Err(Error::InvalidVersion),
        }
    }

    let version = match cursor.next() {
        None => return Ok(None),
        Some(b'0') => Version::Http10,
        Some(b'1') => Version::Http11,
        Some(b) if b.is_ascii_digit() => return Err(Error::UnsupportedVersion),
        Some(_) => return Err(Error::InvalidVersion),
    };
    cursor.mark_consumed(0);
    Ok(Some(version))
}

/// Parse one `name: value` line, or `Finished` on the blank line ending the block.
pub fn parse_header(cursor: &mut ByteCursor<'_>) -> Result<ParseResult<HeaderLine>> {
    let name = loop {
        let at_line_start = cursor.position() == cursor.consumed();
        match need!(cursor.next()) {
            b'\r' if at_line_start => match need!(cursor.next()) {
                b'\n' => {
                    cursor.mark_consumed(0);
                    return Ok(ParseResult::Finished);
                }
                _ => return Err(Error::InvalidNewline),
            },
            b'\n' if at_line_start => {
                cursor.mark_consumed(0);
                return Ok(ParseResult::Finished);
            }
            b':' => {
                let name = cursor.take(-1);
                if name.is_empty() {
                    return Err(Error::InvalidHeaderName);
                }
                break name.to_latin1();
            }
            b if !is_tchar(b) => return Err(Error::InvalidHeaderName),
            _ => {}
        }
    };

    while let Some(b' ' | b'\t') = cursor.peek() {
        cursor.bump();
    }
    cursor.mark_consumed(0);

    // Negative distance from the read position back to the end of the last
    // non-whitespace byte.
    let mut trailing: isize = 0;
    let value = loop {
        match need!(cursor.next()) {
            b'\r' => match need!(cursor.next()) {
                b'\n' => break cursor.take(trailing - 2),
                _ => return Err(Error::InvalidNewline),
            },
            b'\n' => break cursor.take(trailing - 1),
            b' ' | b'\t' => trailing -= 1,
            b if !is_header_value_char(b) => return Err(Error::InvalidHeaderValue),
            _ => trailing = 0,
        }
    };

    Ok(ParseResult::Complete(HeaderLine {
        name,
        value: value.to_latin1(),
    }))
}
