//! HTTP cookie parsing for `Cookie` and `Set-Cookie` header values.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    #[default]
    Unset,
    Lax,
    Strict,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: String,
    /// Expiry as unix seconds, `0` when absent or unparseable.
    pub expires: i64,
    /// `0` means unspecified, negative means "delete now".
    pub max_age: i32,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parses a request `Cookie` header into name/value pairs.
pub fn parse_cookie_header(header: &str) -> Vec<HttpCookie> {
    header
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            let name = name.trim();
            valid_name(name).then(|| HttpCookie {
                name: name.to_string(),
                value: unquote(value.trim()).to_string(),
                ..Default::default()
            })
        })
        .collect()
}

fn parse_expires(value: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }
    // Netscape style: "Wed, 21-Oct-2015 07:28:00 GMT"
    NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Parses one `Set-Cookie` header value. Returns `None` for an invalid pair.
pub fn parse_set_cookie(header: &str) -> Option<HttpCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;
    let name = name.trim();
    if !valid_name(name) {
        return None;
    }

    let mut cookie = HttpCookie {
        name: name.to_string(),
        value: unquote(value.trim()).to_string(),
        ..Default::default()
    };

    for attr in parts {
        let attr = attr.trim();
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        let val = val.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "path" => cookie.path = val.to_string(),
            "domain" => cookie.domain = val.trim_start_matches('.').to_string(),
            "expires" => cookie.expires = parse_expires(val).unwrap_or(0),
            "max-age" => {
                if let Ok(secs) = val.parse::<i32>() {
                    cookie.max_age = if secs <= 0 { -1 } else { secs };
                }
            }
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "samesite" => {
                cookie.same_site = match val.to_ascii_lowercase().as_str() {
                    "lax" => SameSite::Lax,
                    "strict" => SameSite::Strict,
                    "none" => SameSite::None,
                    _ => SameSite::Unset,
                }
            }
            _ => {}
        }
    }
    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_cookies() {
        let cookies = parse_cookie_header("session=abc123; theme=\"dark\"; =broken; flag");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].value, "abc123");
        assert_eq!(cookies[1].value, "dark");
    }

    #[test]
    fn response_cookie_attributes() {
        let c = parse_set_cookie(
            "id=a3fWa; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Path=/docs; Domain=.example.com; Secure; HttpOnly; SameSite=Strict",
        )
        .unwrap();
        assert_eq!(c.name, "id");
        assert_eq!(c.value, "a3fWa");
        assert_eq!(c.expires, 1445412480);
        assert_eq!(c.path, "/docs");
        assert_eq!(c.domain, "example.com");
        assert!(c.secure);
        assert!(c.http_only);
        assert_eq!(c.same_site, SameSite::Strict);
    }

    #[test]
    fn netscape_expires_and_max_age() {
        let c = parse_set_cookie("a=b; expires=Wed, 21-Oct-2015 07:28:00 GMT; Max-Age=0").unwrap();
        assert_eq!(c.expires, 1445412480);
        assert_eq!(c.max_age, -1);

        let c = parse_set_cookie("a=b; Max-Age=3600; Expires=garbage").unwrap();
        assert_eq!(c.max_age, 3600);
        assert_eq!(c.expires, 0);
    }

    #[test]
    fn invalid_set_cookie() {
        assert!(parse_set_cookie("no-equals-sign").is_none());
        assert!(parse_set_cookie("bad name=1").is_none());
    }
}
