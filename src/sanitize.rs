//! URL Sanitization & Resource Trust
//!
//! Two policies guard attribute values:
//!
//! - [`UrlSanitizer`] rewrites navigable/media URLs with an unsafe scheme
//!   (`a[href]`, `img[src]`) to `unsafe:<url>`. Nothing is rejected.
//! - [`TrustPolicy`] decides whether a resource URL (templates, `iframe[src]`)
//!   may be loaded at all, failing with `insecurl` otherwise.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};
use crate::value::Value;

lazy_static! {
    static ref SAFE_HREF_RE: Regex = Regex::new(r"(?i)^\s*(https?|s?ftp|mailto|tel|file):").unwrap();
    static ref SAFE_MEDIA_RE: Regex =
        Regex::new(r"(?i)^\s*((https?|ftp|file|blob):|data:image/)").unwrap();
    static ref ABSOLUTE_URL_RE: Regex = Regex::new(r"^\s*([a-zA-Z][a-zA-Z0-9+.\-]*:|//)").unwrap();
}

fn is_absolute(url: &str) -> bool {
    ABSOLUTE_URL_RE.is_match(url)
}

// ═══════════════════════════════════════════════════════════════════════════════
// URL SANITIZER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct UrlSanitizer;

impl UrlSanitizer {
    /// Returns `url` unchanged when its scheme is whitelisted (or it is
    /// relative), otherwise prefixes it with `unsafe:`.
    pub fn sanitize(&self, url: &str, is_media: bool) -> String {
        if !is_absolute(url) || url.trim_start().starts_with("//") {
            return url.to_string();
        }
        let whitelist: &Regex = if is_media { &SAFE_MEDIA_RE } else { &SAFE_HREF_RE };
        if whitelist.is_match(url) {
            url.to_string()
        } else {
            tracing::warn!(url, "unsafe url rewritten");
            format!("unsafe:{}", url)
        }
    }

    /// Whether `attr` on `tag` is sanitized, and if so whether as media.
    pub fn applies_to(tag: &str, attr: &str) -> Option<bool> {
        match (tag, attr) {
            ("a", "href") => Some(false),
            ("img", "src") => Some(true),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE TRUST
// ═══════════════════════════════════════════════════════════════════════════════

/// Context in which an interpolated value must be trusted before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustedContext {
    ResourceUrl,
}

/// Explicitly trusted value, stored as a [`Value::Host`].
#[derive(Debug, Clone)]
pub struct TrustedValue {
    pub context: TrustedContext,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    prefixes: Vec<String>,
}

impl TrustPolicy {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn trust_as(context: TrustedContext, value: &str) -> Value {
        Value::host(TrustedValue {
            context,
            value: value.to_string(),
        })
    }

    pub fn is_trusted_resource_url(&self, url: &str) -> bool {
        !is_absolute(url) || self.prefixes.iter().any(|p| url.starts_with(p.as_str()))
    }

    pub fn check_resource_url(&self, url: &str) -> Result<()> {
        if self.is_trusted_resource_url(url) {
            Ok(())
        } else {
            tracing::warn!(url, "blocked untrusted resource url");
            Err(Error::InsecureUrl {
                url: url.to_string(),
            })
        }
    }

    /// Unwraps a value for use in `context`. Explicitly trusted values pass,
    /// strings are checked against the policy, nullish values become empty.
    pub fn get_trusted(&self, context: TrustedContext, value: &Value) -> Result<Value> {
        if let Some(trusted) = value.downcast_host::<TrustedValue>() {
            if trusted.context == context {
                return Ok(Value::String(trusted.value.clone()));
            }
        }
        match context {
            TrustedContext::ResourceUrl => {
                if value.is_nullish() {
                    return Ok(value.clone());
                }
                let url = value.to_display_string();
                self.check_resource_url(&url)?;
                Ok(Value::String(url))
            }
        }
    }

    /// Context required for an interpolated attribute, if any.
    pub fn context_for(tag: &str, attr: &str) -> Option<TrustedContext> {
        match (tag, attr) {
            ("iframe" | "embed" | "script" | "frame", "src")
            | ("object", "data")
            | ("link" | "base", "href")
            | ("form", "action") => Some(TrustedContext::ResourceUrl),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_href() {
        let s = UrlSanitizer;
        assert_eq!(s.sanitize("http://x.com", false), "http://x.com");
        assert_eq!(s.sanitize("/relative", false), "/relative");
        assert_eq!(
            s.sanitize("javascript:alert(1)", false),
            "unsafe:javascript:alert(1)"
        );
        assert_eq!(s.sanitize("data:image/png;base64,AA", true), "data:image/png;base64,AA");
        assert_eq!(
            s.sanitize("data:image/png;base64,AA", false),
            "unsafe:data:image/png;base64,AA"
        );
    }

    #[test]
    fn test_resource_trust() {
        let policy = TrustPolicy::new(vec!["https://cdn.example.com/".to_string()]);
        assert!(policy.check_resource_url("tpl/a.html").is_ok());
        assert!(policy.check_resource_url("https://cdn.example.com/a.html").is_ok());
        let err = policy.check_resource_url("http://evil.com/a.html").unwrap_err();
        assert_eq!(err.code(), "insecurl");
    }

    #[test]
    fn test_explicitly_trusted_value() {
        let policy = TrustPolicy::default();
        let trusted = TrustPolicy::trust_as(TrustedContext::ResourceUrl, "http://evil.com");
        assert_eq!(
            policy
                .get_trusted(TrustedContext::ResourceUrl, &trusted)
                .unwrap(),
            Value::from("http://evil.com")
        );
        assert!(policy
            .get_trusted(TrustedContext::ResourceUrl, &Value::from("http://evil.com"))
            .is_err());
    }
}
