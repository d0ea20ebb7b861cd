//! HTTP cookies
//!
//! Immutable cookie values plus a validating builder. Request cookies only
//! carry name and value; response cookies also carry the attributes that
//! end up in the `Set-Cookie` line.

use crate::{Error, Result};
use std::collections::BTreeSet;

/// Max-age marker meaning "lives as long as the browser session"
pub const SESSION_LIFETIME: i64 = -1;

/// HTTP Cookie
///
/// Equality and hashing cover every field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    max_age: i64,
    secure: bool,
    ports: BTreeSet<u16>,
}

impl Cookie {
    /// Start building a cookie
    pub fn builder() -> CookieBuilder {
        CookieBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Max age in seconds, [`SESSION_LIFETIME`] when unset
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Ports the cookie is restricted to, ascending
    pub fn ports(&self) -> &BTreeSet<u16> {
        &self.ports
    }
}

/// Validating cookie builder
///
/// The first invalid attribute is remembered and reported by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct CookieBuilder {
    name: Option<String>,
    value: Option<String>,
    domain: Option<String>,
    path: Option<String>,
    max_age: i64,
    secure: bool,
    ports: BTreeSet<u16>,
    error: Option<String>,
}

impl CookieBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            value: None,
            domain: None,
            path: None,
            max_age: SESSION_LIFETIME,
            secure: false,
            ports: BTreeSet::new(),
            error: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = self.non_empty("name", name.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = self.non_empty("value", value.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = self.non_empty("domain", domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = self.non_empty("path", path.into());
        self
    }

    /// Max age in seconds; -1 keeps the cookie for the browser session
    pub fn max_age(mut self, seconds: i64) -> Self {
        if seconds < SESSION_LIFETIME {
            self.fail(format!("max-age must be not less than -1, was {}", seconds));
        } else {
            self.max_age = seconds;
        }
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Restrict the cookie to one more port
    pub fn port(mut self, port: u16) -> Self {
        if port == 0 {
            self.fail("port must be a positive number".to_string());
        } else {
            self.ports.insert(port);
        }
        self
    }

    /// Build the cookie, failing on the first rejected attribute
    pub fn build(self) -> Result<Cookie> {
        if let Some(error) = self.error {
            return Err(Error::InvalidCookie(error));
        }
        let name = self
            .name
            .ok_or_else(|| Error::InvalidCookie("name is required".to_string()))?;
        let value = self
            .value
            .ok_or_else(|| Error::InvalidCookie(format!("value is required for cookie '{}'", name)))?;

        Ok(Cookie {
            name,
            value,
            domain: self.domain,
            path: self.path,
            max_age: self.max_age,
            secure: self.secure,
            ports: self.ports,
        })
    }

    fn non_empty(&mut self, attribute: &str, value: String) -> Option<String> {
        if value.is_empty() {
            self.fail(format!("cookie {} must be not empty", attribute));
            None
        } else {
            Some(value)
        }
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

impl Default for CookieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_cookie() {
        let cookie = Cookie::builder()
            .name("made_write_conn")
            .value("Rg3vHJZnehYLjVg7qi3bZjzg")
            .domain(".foo.com")
            .path("/")
            .max_age(30)
            .port(1234)
            .build()
            .unwrap();

        assert_eq!(cookie.name(), "made_write_conn");
        assert_eq!(cookie.value(), "Rg3vHJZnehYLjVg7qi3bZjzg");
        assert_eq!(cookie.domain(), Some(".foo.com"));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), 30);
        assert!(cookie.ports().contains(&1234));
        assert!(!cookie.is_secure());
    }

    #[test]
    fn test_empty_attributes_rejected() {
        assert!(Cookie::builder().name("").value("v").build().is_err());
        assert!(Cookie::builder().name("n").value("").build().is_err());
        assert!(Cookie::builder().name("n").value("v").domain("").build().is_err());
        assert!(Cookie::builder().name("n").value("v").path("").build().is_err());
    }

    #[test]
    fn test_max_age_and_port_bounds() {
        let err = Cookie::builder().name("n").value("v").max_age(-10).build();
        assert!(matches!(err, Err(Error::InvalidCookie(_))));

        let err = Cookie::builder().name("n").value("v").port(0).build();
        assert!(matches!(err, Err(Error::InvalidCookie(_))));

        let cookie = Cookie::builder().name("n").value("v").max_age(-1).build().unwrap();
        assert_eq!(cookie.max_age(), SESSION_LIFETIME);
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let a = Cookie::builder().name("n").value("v").build().unwrap();
        let b = Cookie::builder().name("n").value("v").build().unwrap();
        let c = Cookie::builder().name("n").value("v").path("/").build().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
