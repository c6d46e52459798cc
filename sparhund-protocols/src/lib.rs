//! # Sparhund Protocol Parsers
//!
//! Incremental parsers for the application protocols decoded from
//! reassembled streams, plus the small text helpers shared by the records.

pub mod cookie;
pub mod http;
pub mod sniff;
pub mod ssh;
pub mod text;

pub use cookie::{parse_cookie_header, parse_set_cookie, HttpCookie, SameSite};
pub use http::{
    decompress_gzip, parse_request, parse_response, HttpParseError, HttpRequest, HttpResponse,
    Parsed,
};
pub use sniff::detect_content_type;
pub use ssh::{parse_ident, SshIdent, SshParseError};
pub use text::sanitize_commas;
