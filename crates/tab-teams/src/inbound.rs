//! Inbound request authentication for `/api/messages`.
//!
//! Checks the Bot Framework bearer token's claims (audience, issuer, expiry).
//! Signature verification against the OpenID signing keys is not done here.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use serde::Deserialize;

use tab_core::{errors::Error, Result};

const TRUSTED_ISSUERS: &[&str] = &["https://api.botframework.com"];
const TRUSTED_ISSUER_PREFIXES: &[&str] = &[
    "https://sts.windows.net/",
    "https://login.microsoftonline.com/",
];

/// Allowed clock skew when checking `exp` / `nbf`.
const CLOCK_SKEW_SECS: i64 = 5 * 60;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, app_id: &str) -> bool {
        match self {
            Audience::One(a) => a == app_id,
            Audience::Many(all) => all.iter().any(|a| a == app_id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    aud: Option<Audience>,
    iss: Option<String>,
    exp: Option<i64>,
    nbf: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct InboundAuth {
    app_id: String,
    development_mode: bool,
}

impl InboundAuth {
    pub fn new(app_id: impl Into<String>, development_mode: bool) -> Self {
        Self {
            app_id: app_id.into(),
            development_mode,
        }
    }

    /// Authentication is skipped in development mode and when no app id is set
    /// (Bot Framework Emulator without credentials).
    pub fn is_enforced(&self) -> bool {
        !self.development_mode && !self.app_id.is_empty()
    }

    /// Verify an `Authorization` header value.
    pub fn verify(&self, authorization: Option<&str>) -> Result<()> {
        if !self.is_enforced() {
            return Ok(());
        }

        let header = authorization
            .ok_or_else(|| Error::Auth("missing Authorization header".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("expected a Bearer token".to_string()))?;

        let claims = decode_claims(token)?;
        self.check_claims(&claims, Utc::now().timestamp())
    }

    fn check_claims(&self, claims: &Claims, now: i64) -> Result<()> {
        match &claims.aud {
            Some(aud) if aud.contains(&self.app_id) => {}
            _ => return Err(Error::Auth("token audience does not match BOT_ID".to_string())),
        }

        let iss = claims.iss.as_deref().unwrap_or("");
        let trusted = TRUSTED_ISSUERS.contains(&iss)
            || TRUSTED_ISSUER_PREFIXES.iter().any(|p| iss.starts_with(p));
        if !trusted {
            return Err(Error::Auth(format!("untrusted token issuer {iss:?}")));
        }

        let Some(exp) = claims.exp else {
            return Err(Error::Auth("token has no expiry".to_string()));
        };
        if now > exp + CLOCK_SKEW_SECS {
            return Err(Error::Auth("token expired".to_string()));
        }
        if let Some(nbf) = claims.nbf {
            if now + CLOCK_SKEW_SECS < nbf {
                return Err(Error::Auth("token not yet valid".to_string()));
            }
        }
        Ok(())
    }
}

fn decode_claims(token: &str) -> Result<Claims> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Auth("malformed JWT".to_string()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::Auth(format!("malformed JWT payload: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Auth(format!("malformed JWT claims: {e}")))
}
