use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::Cookie;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use kvsession_core::{CookieOptions, KvSessionError, KvSessionResult};
use std::collections::HashMap;
use std::fmt;

/// Read access to the cookies of an inbound request.
pub trait RequestCookies {
    /// Value of the cookie called `name`, if the request carries one.
    fn cookie(&self, name: &str) -> Option<String>;
}

/// Write access to the cookies of an outbound response.
pub trait CookieSink {
    /// Emit a `Set-Cookie` directive.
    fn set_cookie(&mut self, cookie: SessionCookie) -> KvSessionResult<()>;
}

/// A session cookie directive, rendered as a `Set-Cookie` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// Cookie name.
    pub name: String,
    /// Sealed token, or empty when clearing.
    pub value: String,
    /// Attributes and lifetime.
    pub options: CookieOptions,
}

impl SessionCookie {
    /// A cookie carrying `value` under `options`.
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            options,
        }
    }

    /// A directive that removes the cookie from the client immediately.
    pub fn removal(name: impl Into<String>, options: &CookieOptions) -> Self {
        let mut options = options.clone();
        options.max_age = 0;
        Self::new(name, "", options)
    }

    /// Whether this directive clears the cookie.
    pub fn is_removal(&self) -> bool {
        self.options.max_age <= 0
    }
}

impl SessionCookie {
    /// Build the `cookie` crate representation of this directive.
    ///
    /// A removal carries `Max-Age=0` and an `Expires` at the Unix epoch.
    pub fn to_cookie(&self) -> Cookie<'static> {
        let opts = &self.options;
        let mut builder = Cookie::build((self.name.clone(), self.value.clone()))
            .path(opts.path.clone())
            .secure(opts.secure)
            .http_only(opts.http_only);
        if let Some(domain) = &opts.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(same_site) = opts.same_site {
            builder = builder.same_site(same_site);
        }
        builder = if opts.max_age > 0 {
            builder.max_age(CookieDuration::seconds(opts.max_age))
        } else {
            builder
                .max_age(CookieDuration::ZERO)
                .expires(OffsetDateTime::UNIX_EPOCH)
        };
        builder.build()
    }
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_cookie().encoded())
    }
}

/// Find `name` in one `Cookie` header value (`a=1; b=2`).
pub fn parse_cookie_header(header: &str, name: &str) -> Option<String> {
    Cookie::split_parse_encoded(header)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value_trimmed().to_string())
}

impl RequestCookies for HeaderMap {
    fn cookie(&self, name: &str) -> Option<String> {
        self.get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|header| parse_cookie_header(header, name))
    }
}

impl RequestCookies for HashMap<String, String> {
    fn cookie(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl CookieSink for HeaderMap {
    fn set_cookie(&mut self, cookie: SessionCookie) -> KvSessionResult<()> {
        let value = HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| KvSessionError::Session(format!("invalid Set-Cookie header: {e}")))?;
        self.append(SET_COOKIE, value);
        Ok(())
    }
}

impl CookieSink for Vec<SessionCookie> {
    fn set_cookie(&mut self, cookie: SessionCookie) -> KvSessionResult<()> {
        self.push(cookie);
        Ok(())
    }
}
