//! Hub identities
//!
//! The identity provider in front of the hub hands us a cookie holding a
//! URL-safe base64 JSON [`AuthRecord`] followed by an HMAC-SHA256 tag over
//! it, keyed with the shared cookie secret: `<payload>.<tag>`. Once
//! admitted, a request carries a [`HubUser`] in its extensions.

use std::collections::BTreeSet;

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Keyed MAC over a cookie payload. `None` for an empty secret.
fn payload_mac(payload: &str, secret: &str) -> Option<HmacSha256> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(mac)
}

/// Identity record issued by the upstream authenticator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    /// Hub username
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Identity-provider groups
    #[serde(default)]
    pub groups: Vec<String>,
    /// Expiration as a unix timestamp, 0 for none
    #[serde(default)]
    pub exp: i64,
}

impl AuthRecord {
    pub fn new(name: impl Into<String>, groups: &[&str]) -> Self {
        Self {
            name: name.into(),
            email: None,
            groups: groups.iter().map(ToString::to_string).collect(),
            exp: 0,
        }
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Domain part of the email address
    pub fn email_domain(&self) -> Option<&str> {
        self.email.as_deref()?.rsplit_once('@').map(|(_, d)| d)
    }

    pub const fn is_expired(&self, now: i64) -> bool {
        self.exp > 0 && self.exp < now
    }

    /// Signed cookie value. With an empty secret the tag is empty and the
    /// value never decodes.
    pub fn encode(&self, secret: &str) -> String {
        // serializing a struct of strings cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let tag = payload_mac(&payload, secret)
            .map(|mac| mac.finalize().into_bytes().to_vec())
            .unwrap_or_default();
        format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag))
    }

    /// Verify and decode a cookie value. Unsigned, tampered or malformed
    /// values yield `None`.
    pub fn decode(encoded: &str, secret: &str) -> Option<Self> {
        let (payload, tag) = encoded.trim().split_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        payload_mac(payload, secret)?.verify_slice(&tag).ok()?;
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// An admitted hub user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubUser {
    pub name: String,
    pub groups: BTreeSet<String>,
    pub admin: bool,
}

impl HubUser {
    pub fn new(name: impl Into<String>, groups: &[&str]) -> Self {
        Self {
            name: name.into(),
            groups: groups.iter().map(ToString::to_string).collect(),
            admin: false,
        }
    }

    pub fn from_record(record: &AuthRecord, admin: bool) -> Self {
        Self {
            name: record.name.clone(),
            groups: record.groups.iter().cloned().collect(),
            admin,
        }
    }

    #[must_use]
    pub const fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }
}

/// Find a cookie value by name in the request headers
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            let (key, value) = c.trim().split_once('=')?;
            (key == name).then_some(value)
        })
}
