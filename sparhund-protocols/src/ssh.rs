//! ## sparhund-protocols::ssh
//! Parser for the SSH identification string exchanged in clear text before
//! key exchange: `SSH-protoversion-softwareversion SP comments CR LF`.
//!
//! This parser uses nom version 8.

use nom::{
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, line_ending},
    combinator::opt,
    sequence::preceded,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of the identification line including CR LF.
pub const MAX_IDENT_LEN: usize = 255;

/// Upper bound on the lines a server may send before its identification.
const MAX_PREAMBLE_LEN: usize = 4096;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SshParseError {
    #[error("Insufficient data to parse SSH identification")]
    Incomplete,
    #[error("Not an SSH identification line")]
    NotSsh,
    #[error("SSH identification line exceeds 255 bytes")]
    TooLong,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SshIdent {
    pub proto_version: String,
    pub software_version: String,
    pub comments: String,
}

impl SshIdent {
    /// The identification line without its terminator.
    pub fn line(&self) -> String {
        if self.comments.is_empty() {
            format!("SSH-{}-{}", self.proto_version, self.software_version)
        } else {
            format!(
                "SSH-{}-{} {}",
                self.proto_version, self.software_version, self.comments
            )
        }
    }
}

fn is_version_byte(b: u8) -> bool {
    b.is_ascii_graphic() && b != b'-'
}

fn ident_line(input: &[u8]) -> IResult<&[u8], SshIdent> {
    let (input, _) = tag("SSH-").parse(input)?;
    let (input, proto) = take_while1(is_version_byte).parse(input)?;
    let (input, _) = char('-').parse(input)?;
    let (input, software) = take_while1(|b: u8| b.is_ascii_graphic()).parse(input)?;
    let (input, comments) =
        opt(preceded(char(' '), take_till(|b: u8| b == b'\r' || b == b'\n'))).parse(input)?;
    let (input, _) = line_ending.parse(input)?;

    Ok((
        input,
        SshIdent {
            proto_version: String::from_utf8_lossy(proto).into_owned(),
            software_version: String::from_utf8_lossy(software).into_owned(),
            comments: comments
                .map(|c| String::from_utf8_lossy(c).trim().to_string())
                .unwrap_or_default(),
        },
    ))
}

/// Finds and parses the identification line at the start of a stream.
///
/// Servers may send other lines before the identification; those are
/// skipped. Returns the ident and the number of bytes consumed.
pub fn parse_ident(data: &[u8]) -> Result<(SshIdent, usize), SshParseError> {
    let mut offset = 0;
    loop {
        let rest = &data[offset..];
        let ident_start = rest.starts_with(b"SSH-");
        let Some(lf) = rest.iter().position(|&b| b == b'\n') else {
            return if rest.len() > MAX_IDENT_LEN {
                Err(if ident_start {
                    SshParseError::TooLong
                } else {
                    SshParseError::NotSsh
                })
            } else if ident_start || b"SSH-".starts_with(rest) || (offset > 0 && printable(rest)) {
                Err(SshParseError::Incomplete)
            } else {
                Err(SshParseError::NotSsh)
            };
        };

        if lf + 1 > MAX_IDENT_LEN {
            return Err(if ident_start {
                SshParseError::TooLong
            } else {
                SshParseError::NotSsh
            });
        }

        if ident_start {
            return match ident_line(&rest[..=lf]) {
                Ok((_, ident)) => Ok((ident, offset + lf + 1)),
                Err(_) => Err(SshParseError::NotSsh),
            };
        }

        // only printable pre-banner lines are tolerated, and not too many
        offset += lf + 1;
        if !printable(&rest[..lf]) || offset > MAX_PREAMBLE_LEN {
            return Err(SshParseError::NotSsh);
        }
    }
}

fn printable(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openssh_ident() {
        let data = b"SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1\r\n\x00\x00\x05\xdc";
        let (ident, used) = parse_ident(data).unwrap();
        assert_eq!(ident.proto_version, "2.0");
        assert_eq!(ident.software_version, "OpenSSH_8.9p1");
        assert_eq!(ident.comments, "Ubuntu-3ubuntu0.1");
        assert_eq!(used, 41);
        assert_eq!(ident.line(), "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1");
    }

    #[test]
    fn bare_lf_and_no_comment() {
        let (ident, _) = parse_ident(b"SSH-1.99-dropbear_2022.83\n").unwrap();
        assert_eq!(ident.proto_version, "1.99");
        assert_eq!(ident.software_version, "dropbear_2022.83");
        assert!(ident.comments.is_empty());
    }

    #[test]
    fn pre_banner_lines_skipped() {
        let data = b"Welcome to host\r\nSSH-2.0-Go\r\n";
        let (ident, used) = parse_ident(data).unwrap();
        assert_eq!(ident.software_version, "Go");
        assert_eq!(used, data.len());
    }

    #[test]
    fn incomplete_and_foreign() {
        assert_eq!(parse_ident(b"SSH-2.0-Open"), Err(SshParseError::Incomplete));
        assert_eq!(parse_ident(b"SS"), Err(SshParseError::Incomplete));
        assert_eq!(parse_ident(b"GET / HTTP/1.1"), Err(SshParseError::NotSsh));
        assert_eq!(parse_ident(b"\x16\x03\x01\n"), Err(SshParseError::NotSsh));
        assert_eq!(parse_ident(&[b'A'; 300]), Err(SshParseError::NotSsh));

        let mut long = b"SSH-2.0-".to_vec();
        long.extend_from_slice(&[b'A'; 300]);
        assert_eq!(parse_ident(&long), Err(SshParseError::TooLong));
    }

    #[test]
    fn endless_text_is_not_ssh() {
        let mut http = Vec::new();
        for _ in 0..200 {
            http.extend_from_slice(b"X-Header: some value\r\n");
        }
        assert_eq!(parse_ident(&http), Err(SshParseError::NotSsh));
    }
}
