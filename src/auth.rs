// auth.rs - Digest challenge parsing and response computation

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::message::{find_header, start_line};
use crate::{AuthError, DEFAULT_AUTH_USERNAME, HeaderName, Result, STATUS_PROXY_AUTH_REQUIRED, STATUS_UNAUTHORIZED};

// Nonce count is fixed: every challenge is answered exactly once
pub const NONCE_COUNT: &str = "00000001";
pub const CNONCE_BYTES: usize = 12;

// Which challenge triggered the flow, and the headers that go with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    // 401 with WWW-Authenticate, answered with Authorization
    Www,
    // 407 with Proxy-Authenticate, answered with Proxy-Authorization
    Proxy,
}

impl ChallengeKind {
    /// Classifies a response by its status line.
    pub fn from_response(response: &[u8]) -> Option<Self> {
        // Untrimmed: the prefix includes the space after the code
        let status = start_line(response)?.raw;

        if status.starts_with(STATUS_UNAUTHORIZED) {
            Some(ChallengeKind::Www)
        } else if status.starts_with(STATUS_PROXY_AUTH_REQUIRED) {
            Some(ChallengeKind::Proxy)
        } else {
            None
        }
    }

    pub fn challenge_header(self) -> &'static str {
        match self {
            ChallengeKind::Www => HeaderName::WWW_AUTHENTICATE,
            ChallengeKind::Proxy => HeaderName::PROXY_AUTHENTICATE,
        }
    }

    pub fn authorization_header(self) -> &'static str {
        match self {
            ChallengeKind::Www => HeaderName::AUTHORIZATION,
            ChallengeKind::Proxy => HeaderName::PROXY_AUTHORIZATION,
        }
    }
}

// Challenge parameters, augmented with method and uri of the challenged request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeParams(BTreeMap<String, String>);

impl ChallengeParams {
    pub fn new() -> Self {
        ChallengeParams(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn require(&self, key: &'static str) -> std::result::Result<&str, AuthError> {
        self.get(key).ok_or(AuthError::MissingParameter(key))
    }
}

impl fmt::Display for ChallengeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {:?}", key, value)?;
        }
        write!(f, "}}")
    }
}

/// Parses the value of a `WWW-Authenticate` or `Proxy-Authenticate` header.
///
/// The value must be the `Digest` scheme followed by a comma separated list of
/// `key=value` pairs. Quotes and whitespace around keys and values are
/// stripped, and segments without `=` are ignored.
pub fn parse_digest_challenge(header_value: &str) -> std::result::Result<ChallengeParams, AuthError> {
    let (scheme, params_str) = header_value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::NotDigest)?;
    if scheme != "Digest" {
        return Err(AuthError::NotDigest);
    }

    let mut params = ChallengeParams::new();
    for segment in params_str.split(',') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let key = trim_param(key);
        if key.is_empty() {
            continue;
        }
        params.insert(key, trim_param(value));
    }

    Ok(params)
}

fn trim_param(s: &str) -> &str {
    s.trim_matches(|c: char| c == '"' || c.is_whitespace())
}

/// Locates the challenge header of `kind` in a response and parses it.
pub fn find_challenge(response: &[u8], kind: ChallengeKind) -> std::result::Result<ChallengeParams, AuthError> {
    let header = find_header(response, kind.challenge_header()).ok_or(AuthError::NotDigest)?;
    parse_digest_challenge(&header.value())
}

// Credentials plus the challenge they answer. Built per challenge, used once.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub username: String,
    pub password: String,
    pub params: ChallengeParams,
}

impl AuthContext {
    pub fn new(username: Option<&str>, password: &str, params: ChallengeParams) -> Self {
        let username = match username {
            Some(user) if !user.is_empty() => user,
            _ => DEFAULT_AUTH_USERNAME,
        };

        AuthContext {
            username: username.to_string(),
            password: password.to_string(),
            params,
        }
    }

    pub fn requires_cnonce(&self) -> bool {
        self.params.contains("qop")
    }
}

// Computed digest answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub qop: Option<QopFields>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QopFields {
    pub qop: String,
    pub cnonce: String,
    pub opaque: String,
}

impl DigestResponse {
    /// Computes the response hash. `cnonce` is only used when the challenge
    /// carries `qop`; pass `None` otherwise.
    pub fn compute(ctx: &AuthContext, cnonce: Option<&str>) -> std::result::Result<Self, AuthError> {
        let params = &ctx.params;
        let realm = params.require("realm")?;
        let nonce = params.require("nonce")?;
        let method = params.require("method")?;
        let uri = params.require("uri")?;

        let ha1 = calculate_ha1(&ctx.username, realm, &ctx.password);
        let ha2 = calculate_ha2(method, uri);

        let (response, qop) = match params.get("qop") {
            None => (md5_hex(&[ha1.as_str(), nonce, ha2.as_str()].join(":")), None),
            Some(qop) => {
                let cnonce = cnonce.ok_or(AuthError::MissingParameter("cnonce"))?;
                let data = [ha1.as_str(), nonce, NONCE_COUNT, cnonce, qop, ha2.as_str()].join(":");
                let fields = QopFields {
                    qop: qop.to_string(),
                    cnonce: cnonce.to_string(),
                    opaque: params.get("opaque").unwrap_or_default().to_string(),
                };
                (md5_hex(&data), Some(fields))
            }
        };

        Ok(DigestResponse {
            username: ctx.username.clone(),
            realm: realm.to_string(),
            nonce: nonce.to_string(),
            uri: uri.to_string(),
            response,
            qop,
        })
    }

    /// Header value to place after `Authorization:` / `Proxy-Authorization:`.
    pub fn header_value(&self) -> String {
        match &self.qop {
            None => format!(
                r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", algorithm=MD5, response="{}""#,
                self.username, self.realm, self.nonce, self.uri, self.response
            ),
            Some(fields) => format!(
                r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", cnonce="{}", nc={}, qop={}, opaque="{}", algorithm=MD5, response="{}""#,
                self.username,
                self.realm,
                self.nonce,
                self.uri,
                fields.cnonce,
                NONCE_COUNT,
                fields.qop,
                fields.opaque,
                self.response
            ),
        }
    }
}

/// Builds the authorization header value for `ctx`, drawing a fresh client
/// nonce when the challenge asks for `qop`.
pub fn build_authorization(ctx: &AuthContext) -> Result<String> {
    let cnonce = if ctx.requires_cnonce() {
        Some(generate_cnonce()?)
    } else {
        None
    };
    let digest = DigestResponse::compute(ctx, cnonce.as_deref())?;
    Ok(digest.header_value())
}

// H(A1) for the MD5 algorithm
pub fn calculate_ha1(username: &str, realm: &str, password: &str) -> String {
    md5_hex(&format!("{}:{}:{}", username, realm, password))
}

pub fn calculate_ha2(method: &str, uri: &str) -> String {
    md5_hex(&format!("{}:{}", method, uri))
}

pub fn md5_hex(data: &str) -> String {
    let digest = Md5::digest(data.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Random client nonce: 12 bytes from the OS generator, base64 encoded.
/// Failure to get randomness is an error; there is no weaker fallback.
pub fn generate_cnonce() -> Result<String> {
    let mut key = [0u8; CNONCE_BYTES];
    OsRng.try_fill_bytes(&mut key)?;
    Ok(STANDARD.encode(key))
}
