//! Request builders and a browser-like cookie jar

use std::collections::HashMap;

use actix_web::cookie::Cookie;
use url::Url;

use crate::orchestrator::{AuthRequest, RequestMethod};
use crate::session::cookie::is_removal;

/// Builder for [`AuthRequest`]s
#[derive(Debug, Default)]
pub struct RequestBuilder {
    request: AuthRequest,
}

impl RequestBuilder {
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn post() -> Self {
        Self {
            request: AuthRequest {
                method: RequestMethod::Post,
                ..AuthRequest::default()
            },
        }
    }

    #[must_use]
    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.request.query.insert(name.to_string(), value.to_string());
        self
    }

    /// Take the query string of a full URL, such as a sign-in link
    ///
    /// # Panics
    ///
    /// Panics if `url` does not parse
    #[must_use]
    pub fn query_from_url(mut self, url: &str) -> Self {
        let parsed = Url::parse(url).expect("valid URL");
        self.request.query.extend(parsed.query_pairs().into_owned());
        self
    }

    #[must_use]
    pub fn form(mut self, name: &str, value: &str) -> Self {
        self.request.form.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.request.cookies.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn jar(mut self, jar: &CookieJar) -> Self {
        self.request.cookies.extend(jar.values().clone());
        self
    }

    #[must_use]
    pub fn build(self) -> AuthRequest {
        self.request
    }
}

/// Cookies as a browser would hold them across requests
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    values: HashMap<String, String>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `Set-Cookie`s in order; removals delete the cookie
    pub fn apply(&mut self, cookies: &[Cookie<'static>]) {
        for cookie in cookies {
            if is_removal(cookie) {
                self.values.remove(cookie.name());
            } else {
                self.values.insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Names starting with `prefix`, sorted
    #[must_use]
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().filter(|n| n.starts_with(prefix)).cloned().collect();
        names.sort();
        names
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    #[must_use]
    pub const fn values(&self) -> &HashMap<String, String> {
        &self.values
    }
}
