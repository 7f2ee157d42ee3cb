//! Visitor identity from the `visitor_id` cookie
//!
//! A request either carries a recognized visitor cookie, or gets a freshly
//! minted UUID v4 that the response persists back with a long expiry.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use std::time::Duration;

use crate::experiment::VisitorId;

/// Longest cookie value accepted as a visitor id (matches the stored column width).
pub const MAX_VISITOR_ID_LEN: usize = 64;

/// How the visitor cookie is named and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    /// Cookie name
    pub name: String,
    /// Lifetime of a minted cookie
    pub max_age: Duration,
    /// Add the `Secure` attribute
    pub secure: bool,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            name: "visitor_id".to_string(),
            max_age: Duration::from_secs(60 * 60 * 24 * 365),
            secure: false,
        }
    }
}

/// The visitor a request is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVisitor {
    visitor_id: VisitorId,
    minted: bool,
}

impl ResolvedVisitor {
    /// Resolve from request headers, minting a new id when no usable cookie is present.
    #[must_use]
    pub fn resolve(headers: &HeaderMap, policy: &CookiePolicy) -> Self {
        match cookie_value(headers, &policy.name).filter(|v| is_recognized(v)) {
            Some(existing) => Self {
                visitor_id: VisitorId::new(existing),
                minted: false,
            },
            None => Self {
                visitor_id: VisitorId::generate(),
                minted: true,
            },
        }
    }

    /// The visitor id.
    #[must_use]
    pub const fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    /// Whether the id was created for this request.
    #[must_use]
    pub const fn is_minted(&self) -> bool {
        self.minted
    }

    /// `Set-Cookie` value to send back, only when the id was minted.
    #[must_use]
    pub fn set_cookie(&self, policy: &CookiePolicy) -> Option<HeaderValue> {
        if !self.minted {
            return None;
        }
        let mut cookie = format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            policy.name,
            self.visitor_id,
            policy.max_age.as_secs()
        );
        if policy.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }

    /// Append the `Set-Cookie` header to `headers` when needed.
    pub fn apply(&self, policy: &CookiePolicy, headers: &mut HeaderMap) {
        if let Some(value) = self.set_cookie(policy) {
            headers.append(SET_COOKIE, value);
        }
    }
}

fn is_recognized(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_VISITOR_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Value of the named cookie across all `Cookie` headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
}
