//! Message framing rules for requests and responses.
//!
//! # Responsibilities
//! - Decide how a request body is delimited, rejecting ambiguous framing
//! - Decide whether a response carries a body, how it is encoded, and
//!   whether the connection must close after it
//!
//! # Design Decisions
//! - Transfer-Encoding and Content-Length together are always rejected
//!   rather than letting one override the other (request smuggling)
//! - HTTP/1.0 connections always close after one exchange

use super::chunked::ChunkedDecoder;
use super::error::{Error, Result};
use super::headers::Headers;
use super::inbound::BodyFraming;
use super::parser::Version;

/// Framing decided for an incoming request.
#[derive(Debug)]
pub struct RequestFraming {
    pub body: BodyFraming,
    /// Content codings, then transfer codings other than the final `chunked`;
    /// the outermost coding is last.
    pub encodings: Vec<String>,
}

/// Validate request headers and decide how the body is delimited.
pub fn request_framing(version: Version, headers: &Headers) -> Result<RequestFraming> {
    if version == Version::Http11 {
        match headers.get_all("Host") {
            Some([_]) => {}
            _ => return Err(Error::InvalidHost),
        }
    }

    let has_te = headers.contains("Transfer-Encoding");
    let has_cl = headers.contains("Content-Length");
    if has_te && has_cl {
        return Err(Error::TransferEncodingWithContentLength);
    }

    // Content codings were applied first, so they sit below the transfer codings.
    let mut encodings: Vec<String> = headers.tokens("Content-Encoding").map(str::to_string).collect();

    if has_te {
        encodings.extend(
            headers
                .tokens("Transfer-Encoding")
                .map(|coding| coding.to_ascii_lowercase()),
        );
        // Only a body whose final coding is chunked has a knowable end.
        if encodings.last().map(String::as_str) != Some("chunked") {
            return Err(Error::UnknownBodyLength);
        }
        encodings.pop();
        return Ok(RequestFraming {
            body: BodyFraming::Chunked(ChunkedDecoder::new()),
            encodings,
        });
    }

    let body = match content_length(headers)? {
        Some(0) | None => BodyFraming::Empty,
        Some(length) => BodyFraming::Sized { remaining: length },
    };
    Ok(RequestFraming { body, encodings })
}

/// Parse Content-Length, which may repeat only with identical values.
fn content_length(headers: &Headers) -> Result<Option<u64>> {
    let mut length = None;
    for token in headers.tokens("Content-Length") {
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidContentLength);
        }
        let value: u64 = token.parse().map_err(|_| Error::InvalidContentLength)?;
        match length {
            Some(existing) if existing != value => return Err(Error::InvalidContentLength),
            _ => length = Some(value),
        }
    }
    if headers.contains("Content-Length") && length.is_none() {
        return Err(Error::InvalidContentLength);
    }
    Ok(length)
}

/// What the driver needs to remember about a request once it is handed off.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: String,
    pub version: Version,
    pub close_requested: bool,
}

impl RequestSummary {
    pub fn new(method: &str, version: Version, headers: &Headers) -> Self {
        Self {
            method: method.to_string(),
            version,
            close_requested: headers.has_token("Connection", "close"),
        }
    }
}

/// How the body of a response goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// Nothing is written (HEAD, 1xx, 204, 304).
    Omit,
    /// Bytes are copied as-is.
    Raw,
    /// Bytes are wrapped in chunks, ending with the terminal chunk.
    Chunked,
}

/// Framing decided for an outgoing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFraming {
    pub mode: BodyMode,
    pub must_close: bool,
}

/// Check a response against the request it answers and fix up its headers.
///
/// May add `Connection: close`; returns an error for responses that cannot
/// be framed correctly, which is a handler bug rather than a client error.
pub fn response_framing(
    request: &RequestSummary,
    status: u16,
    headers: &mut Headers,
    body_length: Option<u64>,
) -> Result<ResponseFraming> {
    let is_head = request.method == "HEAD";
    let no_body = is_head
        || (request.method == "CONNECT" && (200..300).contains(&status))
        || (100..200).contains(&status)
        || status == 204
        || status == 304;

    let has_te = headers.contains("Transfer-Encoding");
    let has_cl = headers.contains("Content-Length");
    let chunked = has_te
        && headers
            .tokens("Transfer-Encoding")
            .last()
            .is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"));

    if no_body && !(is_head || status == 304) {
        if has_te {
            return Err(Error::InvalidResponse("Transfer-Encoding on a response that cannot have a body"));
        }
        if has_cl {
            return Err(Error::InvalidResponse("Content-Length on a response that cannot have a body"));
        }
        if body_length != Some(0) {
            return Err(Error::InvalidResponse("body on a response that cannot have one"));
        }
    }

    if !no_body {
        if has_te && request.version == Version::Http10 {
            return Err(Error::InvalidResponse("Transfer-Encoding sent to an HTTP/1.0 client"));
        }
        if has_te && has_cl {
            return Err(Error::InvalidResponse("both Transfer-Encoding and Content-Length are set"));
        }
    }

    let must_close = request.version == Version::Http10
        || request.close_requested
        || (!no_body && has_te && !chunked)
        || (!no_body && !has_cl && !chunked);

    if must_close {
        match headers.get("Connection") {
            Some(value) if !value.trim().eq_ignore_ascii_case("close") => {
                return Err(Error::InvalidResponse("Connection header conflicts with closing the connection"));
            }
            Some(_) => {}
            None => headers.set("Connection", "close"),
        }
    }

    let mode = if no_body {
        BodyMode::Omit
    } else if chunked {
        BodyMode::Chunked
    } else {
        BodyMode::Raw
    };
    Ok(ResponseFraming { mode, must_close })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|&(n, v)| (n, v)).collect()
    }

    fn summary(method: &str, version: Version) -> RequestSummary {
        RequestSummary::new(method, version, &Headers::new())
    }

    #[test]
    fn http11_requires_exactly_one_host() {
        assert!(matches!(request_framing(Version::Http11, &Headers::new()), Err(Error::InvalidHost)));
        let twice = headers(&[("Host", "a"), ("Host", "b")]);
        assert!(matches!(request_framing(Version::Http11, &twice), Err(Error::InvalidHost)));
        assert!(request_framing(Version::Http10, &Headers::new()).is_ok());
    }

    #[test]
    fn content_length_framing() {
        let framing = request_framing(Version::Http11, &headers(&[("Host", "h"), ("Content-Length", "12")])).unwrap();
        assert_eq!(framing.body.known_length(), Some(12));

        let repeated = headers(&[("Host", "h"), ("Content-Length", "5"), ("Content-Length", "5")]);
        assert_eq!(request_framing(Version::Http11, &repeated).unwrap().body.known_length(), Some(5));

        let conflicting = headers(&[("Host", "h"), ("Content-Length", "5, 6")]);
        assert!(matches!(request_framing(Version::Http11, &conflicting), Err(Error::InvalidContentLength)));

        let signed = headers(&[("Host", "h"), ("Content-Length", "+5")]);
        assert!(matches!(request_framing(Version::Http11, &signed), Err(Error::InvalidContentLength)));
    }

    #[test]
    fn chunked_framing_exposes_other_codings() {
        let te = headers(&[("Host", "h"), ("Transfer-Encoding", "gzip, deflate"), ("Transfer-Encoding", "Chunked")]);
        let framing = request_framing(Version::Http11, &te).unwrap();
        assert!(matches!(framing.body, BodyFraming::Chunked(_)));
        assert_eq!(framing.encodings, ["gzip", "deflate"]);
    }

    #[test]
    fn content_codings_sit_below_transfer_codings() {
        let both = headers(&[("Host", "h"), ("Content-Encoding", "gzip"), ("Transfer-Encoding", "br, chunked")]);
        assert_eq!(request_framing(Version::Http11, &both).unwrap().encodings, ["gzip", "br"]);

        let sized = headers(&[("Host", "h"), ("Content-Encoding", "deflate, gzip"), ("Content-Length", "4")]);
        let framing = request_framing(Version::Http11, &sized).unwrap();
        assert_eq!(framing.body.known_length(), Some(4));
        assert_eq!(framing.encodings, ["deflate", "gzip"]);

        let empty = headers(&[("Host", "h"), ("Content-Encoding", "gzip")]);
        assert_eq!(request_framing(Version::Http11, &empty).unwrap().encodings, ["gzip"]);
    }

    #[test]
    fn ambiguous_request_framing_is_rejected() {
        let both = headers(&[("Host", "h"), ("Transfer-Encoding", "chunked"), ("Content-Length", "3")]);
        assert!(matches!(
            request_framing(Version::Http11, &both),
            Err(Error::TransferEncodingWithContentLength)
        ));

        let not_chunked = headers(&[("Host", "h"), ("Transfer-Encoding", "chunked, gzip")]);
        assert!(matches!(request_framing(Version::Http11, &not_chunked), Err(Error::UnknownBodyLength)));
    }

    #[test]
    fn sized_response_keeps_connection_open() {
        let mut h = headers(&[("Content-Length", "5")]);
        let framing = response_framing(&summary("GET", Version::Http11), 200, &mut h, Some(5)).unwrap();
        assert_eq!(framing, ResponseFraming { mode: BodyMode::Raw, must_close: false });
        assert!(!h.contains("Connection"));
    }

    #[test]
    fn chunked_response_keeps_connection_open() {
        let mut h = headers(&[("Transfer-Encoding", "chunked")]);
        let framing = response_framing(&summary("GET", Version::Http11), 200, &mut h, None).unwrap();
        assert_eq!(framing, ResponseFraming { mode: BodyMode::Chunked, must_close: false });
    }

    #[test]
    fn unframed_response_closes() {
        let mut h = Headers::new();
        let framing = response_framing(&summary("GET", Version::Http11), 200, &mut h, None).unwrap();
        assert!(framing.must_close);
        assert_eq!(h.get("Connection").as_deref(), Some("close"));
    }

    #[test]
    fn http10_and_close_requests_close() {
        let mut h = headers(&[("Content-Length", "0")]);
        assert!(response_framing(&summary("GET", Version::Http10), 200, &mut h, Some(0)).unwrap().must_close);

        let closing = RequestSummary::new("GET", Version::Http11, &headers(&[("Connection", "Close")]));
        let mut h = headers(&[("Content-Length", "0")]);
        assert!(response_framing(&closing, 200, &mut h, Some(0)).unwrap().must_close);
    }

    #[test]
    fn conflicting_connection_header_is_rejected() {
        let mut h = headers(&[("Connection", "keep-alive")]);
        assert!(response_framing(&summary("GET", Version::Http10), 200, &mut h, Some(0)).is_err());
    }

    #[test]
    fn head_and_not_modified_omit_body() {
        let mut h = headers(&[("Content-Length", "42")]);
        let framing = response_framing(&summary("HEAD", Version::Http11), 200, &mut h, Some(42)).unwrap();
        assert_eq!(framing, ResponseFraming { mode: BodyMode::Omit, must_close: false });

        let mut h = headers(&[("Transfer-Encoding", "chunked")]);
        let framing = response_framing(&summary("GET", Version::Http11), 304, &mut h, None).unwrap();
        assert_eq!(framing.mode, BodyMode::Omit);
    }

    #[test]
    fn successful_connect_has_no_body() {
        let connect = summary("CONNECT", Version::Http11);
        let framing = response_framing(&connect, 200, &mut Headers::new(), Some(0)).unwrap();
        assert_eq!(framing, ResponseFraming { mode: BodyMode::Omit, must_close: false });

        assert!(response_framing(&connect, 200, &mut headers(&[("Content-Length", "0")]), Some(0)).is_err());
        assert!(response_framing(&connect, 204, &mut headers(&[("Transfer-Encoding", "chunked")]), None).is_err());

        // A refused tunnel is an ordinary response.
        let mut h = headers(&[("Content-Length", "5")]);
        let framing = response_framing(&connect, 407, &mut h, Some(5)).unwrap();
        assert_eq!(framing, ResponseFraming { mode: BodyMode::Raw, must_close: false });
    }

    #[test]
    fn bodiless_statuses_reject_bodies() {
        let get = summary("GET", Version::Http11);
        assert!(response_framing(&get, 204, &mut headers(&[("Content-Length", "0")]), Some(0)).is_err());
        assert!(response_framing(&get, 204, &mut Headers::new(), Some(3)).is_err());
        assert!(response_framing(&get, 101, &mut Headers::new(), None).is_err());
        assert!(response_framing(&get, 204, &mut Headers::new(), Some(0)).is_ok());
    }

    #[test]
    fn transfer_encoding_rules_for_bodied_responses() {
        let mut h = headers(&[("Transfer-Encoding", "chunked")]);
        assert!(response_framing(&summary("GET", Version::Http10), 200, &mut h, None).is_err());

        let mut h = headers(&[("Transfer-Encoding", "chunked"), ("Content-Length", "3")]);
        assert!(response_framing(&summary("GET", Version::Http11), 200, &mut h, Some(3)).is_err());
    }
}
