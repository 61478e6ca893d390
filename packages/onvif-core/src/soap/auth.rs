//! Camera authentication: WS-UsernameToken headers and HTTP Digest.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};

use crate::protocol_constants::{WSSE_BASE64_ENCODING, WSSE_PASSWORD_DIGEST};
use crate::soap::escape_xml;
use crate::utils::{starts_with_ignore_ascii_case, to_hex};

/// How requests to a camera are authenticated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    Digest,
    #[default]
    UsernameToken,
    /// UsernameToken always, Digest after a 401 challenge.
    Both,
    None,
}

impl AuthMode {
    pub fn uses_username_token(self) -> bool {
        matches!(self, Self::UsernameToken | Self::Both)
    }

    pub fn uses_digest(self) -> bool {
        matches!(self, Self::Digest | Self::Both)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Digest => "digest",
            Self::UsernameToken => "usernametoken",
            Self::Both => "both",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "digest" => Ok(Self::Digest),
            "usernametoken" | "username_token" => Ok(Self::UsernameToken),
            "both" => Ok(Self::Both),
            "none" | "noauth" => Ok(Self::None),
            other => Err(format!("unknown auth mode: {other}")),
        }
    }
}

/// Resolved credentials for one camera.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub mode: AuthMode,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>, mode: AuthMode) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            mode,
        }
    }

    /// Unauthenticated access.
    pub fn none() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            mode: AuthMode::None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WS-UsernameToken
// ─────────────────────────────────────────────────────────────────────────────

/// Computes `Base64(SHA-1(nonce + created + password))`.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Builds a `wsse:Security` header with a fresh 16-byte nonce.
pub fn username_token_header(username: &str, password: &str) -> String {
    let nonce: [u8; 16] = rand::random();
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    username_token_header_with(username, password, &nonce, &created)
}

pub(crate) fn username_token_header_with(
    username: &str,
    password: &str,
    nonce: &[u8],
    created: &str,
) -> String {
    format!(
        concat!(
            r#"<wsse:Security s:mustUnderstand="1">"#,
            "<wsse:UsernameToken>",
            "<wsse:Username>{username}</wsse:Username>",
            r#"<wsse:Password Type="{ptype}">{digest}</wsse:Password>"#,
            r#"<wsse:Nonce EncodingType="{etype}">{nonce}</wsse:Nonce>"#,
            "<wsu:Created>{created}</wsu:Created>",
            "</wsse:UsernameToken>",
            "</wsse:Security>"
        ),
        username = escape_xml(username),
        ptype = WSSE_PASSWORD_DIGEST,
        digest = password_digest(nonce, created, password),
        etype = WSSE_BASE64_ENCODING,
        nonce = BASE64.encode(nonce),
        created = created,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Digest
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of a `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Selected quality of protection (`auth` preferred).
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parses a challenge header value. Returns `None` for non-digest schemes.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        if !starts_with_ignore_ascii_case(header, "digest ") {
            return None;
        }
        let mut challenge = Self::default();
        for (key, value) in split_params(&header[7..]) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value,
                "nonce" => challenge.nonce = value,
                "opaque" => challenge.opaque = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                "qop" => {
                    let options: Vec<&str> = value.split(',').map(str::trim).collect();
                    challenge.qop = if options.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
                        Some("auth".to_string())
                    } else {
                        options.first().filter(|q| !q.is_empty()).map(|q| q.to_string())
                    };
                }
                _ => {}
            }
        }
        if challenge.nonce.is_empty() {
            return None;
        }
        Some(challenge)
    }

    fn is_sess(&self) -> bool {
        self.algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("MD5-sess"))
    }

    /// Computes the digest `response` value.
    pub fn response(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nc: u32,
        cnonce: &str,
    ) -> String {
        let mut ha1 = md5_hex(&format!("{}:{}:{}", username, self.realm, password));
        if self.is_sess() {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        match &self.qop {
            Some(qop) => md5_hex(&format!(
                "{}:{}:{:08x}:{}:{}:{}",
                ha1, self.nonce, nc, cnonce, qop, ha2
            )),
            None => md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2)),
        }
    }

    /// Builds the `Authorization` header value.
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nc: u32,
        cnonce: &str,
    ) -> String {
        let response = self.response(username, password, method, uri, nc, cnonce);
        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}""#,
            username, self.realm, self.nonce, uri
        );
        if let Some(qop) = &self.qop {
            header.push_str(&format!(
                r#", cnonce="{cnonce}", nc={nc:08x}, qop="{qop}""#
            ));
        }
        header.push_str(&format!(r#", response="{response}""#));
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{opaque}""#));
        }
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        header
    }
}

/// Returns 16 random lowercase hex digits.
pub fn new_cnonce() -> String {
    to_hex(&rand::random::<[u8; 8]>())
}

fn md5_hex(s: &str) -> String {
    format!("{:x}", md5::compute(s.as_bytes()))
}

/// Splits `k1="v1", k2=v2` honouring quoted commas.
pub(crate) fn split_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut parts = Vec::new();
    for ch in s.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);

    for part in parts {
        if let Some((k, v)) = part.split_once('=') {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v);
            out.push((k.trim().to_string(), v.to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_mode_parses_case_insensitively() {
        assert_eq!("Digest".parse::<AuthMode>().unwrap(), AuthMode::Digest);
        assert_eq!("usernametoken".parse::<AuthMode>().unwrap(), AuthMode::UsernameToken);
        assert_eq!("BOTH".parse::<AuthMode>().unwrap(), AuthMode::Both);
        assert!("kerberos".parse::<AuthMode>().is_err());
    }

    #[test]
    fn password_digest_matches_reference() {
        let nonce: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            password_digest(&nonce, "2024-01-01T00:00:00.000Z", "pass"),
            "X29BHr/kXlVtDtz1ffVljTcxZW4="
        );
    }

    #[test]
    fn username_token_header_carries_all_fields() {
        let nonce: Vec<u8> = (0u8..16).collect();
        let header =
            username_token_header_with("admin", "pass", &nonce, "2024-01-01T00:00:00.000Z");
        assert!(header.contains("<wsse:Username>admin</wsse:Username>"));
        assert!(header.contains("X29BHr/kXlVtDtz1ffVljTcxZW4="));
        assert!(header.contains("AAECAwQFBgcICQoLDA0ODw=="));
        assert!(header.contains("<wsu:Created>2024-01-01T00:00:00.000Z</wsu:Created>"));
    }

    #[test]
    fn fresh_headers_use_fresh_nonces() {
        assert_ne!(
            username_token_header("a", "b"),
            username_token_header("a", "b")
        );
    }

    #[test]
    fn parses_digest_challenge() {
        let c = DigestChallenge::parse(
            r#"Digest realm="cam", nonce="n1", qop="auth,auth-int", opaque="xyz", algorithm=MD5"#,
        )
        .unwrap();
        assert_eq!(c.realm, "cam");
        assert_eq!(c.nonce, "n1");
        assert_eq!(c.qop.as_deref(), Some("auth"));
        assert_eq!(c.opaque.as_deref(), Some("xyz"));
        assert_eq!(c.algorithm.as_deref(), Some("MD5"));
        assert!(DigestChallenge::parse(r#"Basic realm="cam""#).is_none());
    }

    #[test]
    fn digest_response_matches_rfc2617_example() {
        let c = DigestChallenge {
            realm: "testrealm@host.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            qop: Some("auth".into()),
            ..Default::default()
        };
        assert_eq!(
            c.response("Mufasa", "Circle Of Life", "GET", "/dir/index.html", 1, "0a4f113b"),
            "6629fae49393a05397450978507c4ef1"
        );
    }

    #[test]
    fn authorization_header_layout() {
        let c = DigestChallenge::parse(r#"Digest realm="cam", nonce="n1", qop="auth""#).unwrap();
        let header =
            c.authorization("u", "p", "POST", "/onvif/device_service", 1, "0123456789abcdef");
        assert!(header.starts_with(r#"Digest username="u", realm="cam", nonce="n1""#));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains(r#"qop="auth""#));
        assert!(header.contains(r#"response="5dee381f3079fe10497a24e0561618b4""#));
    }

    #[test]
    fn cnonce_is_sixteen_hex_digits() {
        let cnonce = new_cnonce();
        assert_eq!(cnonce.len(), 16);
        assert!(cnonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
