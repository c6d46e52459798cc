//! ## sparhund-protocols::http
//! Incremental HTTP/1.x message parser over a growing byte buffer.
//!
//! The caller keeps appending stream bytes and retries the parse; a
//! `Parsed::Complete` result reports how many bytes the message used so the
//! remainder can be kept for the next (pipelined) message.

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use thiserror::Error;

const MAX_HEADERS: usize = 96;

/// Errors that can occur while parsing an HTTP message.
#[derive(Debug, Error)]
pub enum HttpParseError {
    #[error("Malformed HTTP head: {0}")]
    Head(#[from] httparse::Error),
    #[error("Invalid Content-Length header: {0}")]
    InvalidContentLength(String),
    #[error("Malformed chunked body")]
    InvalidChunk,
    #[error("HTTP message exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Outcome of a parse attempt over the currently buffered bytes.
#[derive(Debug)]
pub enum Parsed<T> {
    Complete { message: T, consumed: usize },
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    /// Minor version, `1` for HTTP/1.1.
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn proto(&self) -> String {
        format!("HTTP/1.{}", self.version)
    }

    pub fn host(&self) -> &str {
        self.header("Host").unwrap_or_default()
    }

    pub fn user_agent(&self) -> &str {
        self.header("User-Agent").unwrap_or_default()
    }

    pub fn referer(&self) -> &str {
        self.header("Referer").unwrap_or_default()
    }

    /// Declared body length, `None` when absent or unparseable.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: u8,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Declared body length, `None` when absent or unparseable.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// All values of a repeated header, in wire order.
pub fn header_values<'a>(
    headers: &'a [(String, String)],
    name: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .iter()
        .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    None,
    Length(usize),
    Chunked,
    UntilClose,
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    raw.iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

fn framing(headers: &[(String, String)], allow_until_close: bool) -> Result<BodyFraming, HttpParseError> {
    let chunked = find_header(headers, "Transfer-Encoding")
        .and_then(|te| te.rsplit(',').next())
        .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    if let Some(value) = find_header(headers, "Content-Length") {
        let length = value
            .trim()
            .parse::<usize>()
            .map_err(|_| HttpParseError::InvalidContentLength(value.to_string()))?;
        return Ok(BodyFraming::Length(length));
    }

    Ok(if allow_until_close {
        BodyFraming::UntilClose
    } else {
        BodyFraming::None
    })
}

fn partial<T>(buffered: usize, limit: usize) -> Result<Parsed<T>, HttpParseError> {
    if buffered > limit {
        Err(HttpParseError::TooLarge { limit })
    } else {
        Ok(Parsed::Partial)
    }
}

/// Reads the body following a `head_len` byte head. Returns the body and the
/// total number of bytes consumed, or `None` when more input is needed.
fn read_body(
    buf: &[u8],
    head_len: usize,
    framing: BodyFraming,
    at_eof: bool,
    limit: usize,
) -> Result<Option<(Bytes, usize)>, HttpParseError> {
    let rest = &buf[head_len..];
    match framing {
        BodyFraming::None => Ok(Some((Bytes::new(), head_len))),
        BodyFraming::Length(n) => {
            if head_len.saturating_add(n) > limit {
                return Err(HttpParseError::TooLarge { limit });
            }
            if rest.len() >= n {
                Ok(Some((Bytes::copy_from_slice(&rest[..n]), head_len + n)))
            } else {
                Ok(None)
            }
        }
        BodyFraming::Chunked => match dechunk(rest)? {
            Some((body, used)) => Ok(Some((Bytes::from(body), head_len + used))),
            None if buf.len() > limit => Err(HttpParseError::TooLarge { limit }),
            None => Ok(None),
        },
        BodyFraming::UntilClose => {
            if buf.len() > limit {
                Err(HttpParseError::TooLarge { limit })
            } else if at_eof {
                Ok(Some((Bytes::copy_from_slice(rest), buf.len())))
            } else {
                Ok(None)
            }
        }
    }
}

/// Decodes a chunked body. Returns the payload and the number of input
/// bytes used (including the trailer section), or `None` if incomplete.
pub fn dechunk(input: &[u8]) -> Result<Option<(Vec<u8>, usize)>, HttpParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let (size_len, size) = match httparse::parse_chunk_size(&input[pos..]) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(HttpParseError::InvalidChunk),
        };
        pos += size_len;

        if size == 0 {
            // trailer fields until an empty line
            loop {
                let Some(eol) = find_line_end(&input[pos..]) else {
                    return Ok(None);
                };
                let line_empty = eol.start == 0;
                pos += eol.end;
                if line_empty {
                    return Ok(Some((body, pos)));
                }
            }
        }

        let size = usize::try_from(size).map_err(|_| HttpParseError::InvalidChunk)?;
        let end = pos.checked_add(size).ok_or(HttpParseError::InvalidChunk)?;
        if input.len() < end {
            return Ok(None);
        }
        body.extend_from_slice(&input[pos..end]);
        pos = end;

        match input.get(pos..pos + 2) {
            Some(b"\r\n") => pos += 2,
            Some(_) => return Err(HttpParseError::InvalidChunk),
            None => return Ok(None),
        }
    }
}

/// Range of the line terminator in `data`, accepting bare LF.
fn find_line_end(data: &[u8]) -> Option<std::ops::Range<usize>> {
    let lf = data.iter().position(|&b| b == b'\n')?;
    if lf > 0 && data[lf - 1] == b'\r' {
        Some(lf - 1..lf + 1)
    } else {
        Some(lf..lf + 1)
    }
}

/// Attempts to parse one request from the front of `buf`.
pub fn parse_request(buf: &[u8], limit: usize) -> Result<Parsed<HttpRequest>, HttpParseError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);
    let head_len = match req.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return partial(buf.len(), limit),
    };

    let method = req.method.unwrap_or_default().to_string();
    let target = req.path.unwrap_or_default().to_string();
    let version = req.version.unwrap_or(1);
    let headers = collect_headers(req.headers);

    let framing = framing(&headers, false)?;
    match read_body(buf, head_len, framing, false, limit)? {
        Some((body, consumed)) => Ok(Parsed::Complete {
            message: HttpRequest {
                method,
                target,
                version,
                headers,
                body,
            },
            consumed,
        }),
        None => Ok(Parsed::Partial),
    }
}

/// Attempts to parse one response from the front of `buf`.
///
/// `request_method` is the method of the request this response answers, when
/// known; `HEAD` responses never carry a body. With `at_eof` set, a response
/// without explicit framing takes every remaining byte as its body.
pub fn parse_response(
    buf: &[u8],
    request_method: Option<&str>,
    at_eof: bool,
    limit: usize,
) -> Result<Parsed<HttpResponse>, HttpParseError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut raw_headers);
    let head_len = match res.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return partial(buf.len(), limit),
    };

    let status = res.code.unwrap_or_default();
    let reason = res.reason.unwrap_or_default().to_string();
    let version = res.version.unwrap_or(1);
    let headers = collect_headers(res.headers);

    let bodiless = request_method.is_some_and(|m| m.eq_ignore_ascii_case("HEAD"))
        || (100..200).contains(&status)
        || status == 204
        || status == 304;
    let framing = if bodiless {
        BodyFraming::None
    } else {
        framing(&headers, true)?
    };

    match read_body(buf, head_len, framing, at_eof, limit)? {
        Some((body, consumed)) => Ok(Parsed::Complete {
            message: HttpResponse {
                version,
                status,
                reason,
                headers,
                body,
            },
            consumed,
        }),
        None => Ok(Parsed::Partial),
    }
}

/// Inflates a gzip-encoded body.
pub fn decompress_gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const LIMIT: usize = 1 << 20;

    fn complete<T>(parsed: Parsed<T>) -> (T, usize) {
        match parsed {
            Parsed::Complete { message, consumed } => (message, consumed),
            Parsed::Partial => panic!("expected a complete message"),
        }
    }

    #[test]
    fn simple_get() {
        let raw = b"GET /index.html?a=1 HTTP/1.1\r\nHost: example.com\r\nUser-Agent: curl/8.0\r\n\r\n";
        let (req, used) = complete(parse_request(raw, LIMIT).unwrap());
        assert_eq!(used, raw.len());
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/index.html?a=1");
        assert_eq!(req.proto(), "HTTP/1.1");
        assert_eq!(req.host(), "example.com");
        assert_eq!(req.user_agent(), "curl/8.0");
        assert!(req.body.is_empty());
    }

    #[test]
    fn request_waits_for_body() {
        let head = b"POST /upload HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nab";
        assert!(matches!(parse_request(head, LIMIT).unwrap(), Parsed::Partial));

        let full = b"POST /upload HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nabcdeGET";
        let (req, used) = complete(parse_request(full, LIMIT).unwrap());
        assert_eq!(&req.body[..], b"abcde");
        assert_eq!(&full[used..], b"GET");
        assert_eq!(req.content_length(), Some(5));
    }

    #[test]
    fn partial_head() {
        assert!(matches!(
            parse_request(b"GET / HTTP/1.1\r\nHo", LIMIT).unwrap(),
            Parsed::Partial
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            parse_request(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03", LIMIT),
            Err(HttpParseError::Head(_))
        ));
    }

    #[test]
    fn chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let (res, used) = complete(parse_response(raw, Some("GET"), false, LIMIT).unwrap());
        assert_eq!(used, raw.len());
        assert_eq!(&res.body[..], b"Wikipedia");

        let cut = &raw[..raw.len() - 3];
        assert!(matches!(
            parse_response(cut, Some("GET"), false, LIMIT).unwrap(),
            Parsed::Partial
        ));
    }

    #[test]
    fn bad_chunk_size() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n";
        assert!(matches!(
            parse_response(raw, None, false, LIMIT),
            Err(HttpParseError::InvalidChunk)
        ));
    }

    #[test]
    fn bodiless_responses() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 120\r\n\r\n";
        let (res, used) = complete(parse_response(head, Some("HEAD"), false, LIMIT).unwrap());
        assert_eq!(used, head.len());
        assert_eq!(res.content_length(), Some(120));

        let not_modified = b"HTTP/1.1 304 Not Modified\r\nContent-Length: 9\r\n\r\n";
        let (res, _) = complete(parse_response(not_modified, Some("GET"), false, LIMIT).unwrap());
        assert!(res.body.is_empty());

        let cont = b"HTTP/1.1 100 Continue\r\n\r\n";
        let (res, _) = complete(parse_response(cont, Some("POST"), false, LIMIT).unwrap());
        assert!(res.is_informational());
    }

    #[test]
    fn body_until_close() {
        let raw = b"HTTP/1.0 200 OK\r\nServer: old\r\n\r\nhello world";
        assert!(matches!(
            parse_response(raw, Some("GET"), false, LIMIT).unwrap(),
            Parsed::Partial
        ));
        let (res, used) = complete(parse_response(raw, Some("GET"), true, LIMIT).unwrap());
        assert_eq!(&res.body[..], b"hello world");
        assert_eq!(used, raw.len());
        assert_eq!(res.version, 0);
    }

    #[test]
    fn oversize_message() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n";
        assert!(matches!(
            parse_response(raw, Some("GET"), false, 1024),
            Err(HttpParseError::TooLarge { limit: 1024 })
        ));
        let endless = vec![b'a'; 2048];
        let mut req = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        req.extend_from_slice(&endless);
        assert!(matches!(
            parse_request(&req, 1024),
            Err(HttpParseError::TooLarge { .. })
        ));
    }

    #[test]
    fn invalid_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(
            parse_response(raw, Some("GET"), false, LIMIT),
            Err(HttpParseError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn gzip_round() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"<html><body>hi</body></html>").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(
            decompress_gzip(&compressed).unwrap(),
            b"<html><body>hi</body></html>"
        );
        assert!(decompress_gzip(b"not gzip at all").is_err());
    }

    #[test]
    fn repeated_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 0\r\n\r\n";
        let (res, _) = complete(parse_response(raw, Some("GET"), false, LIMIT).unwrap());
        let cookies: Vec<_> = header_values(&res.headers, "set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }
}
