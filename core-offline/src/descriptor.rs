//! Request descriptors: the normalized keys stored responses are filed under.

use crate::error::{OfflineError, Result};
use bridge_traits::{HttpMethod, HttpRequest};
use std::fmt;
use url::Url;

/// Normalized identity of a request.
///
/// The URL is resolved against the controller scope, so `index.html`,
/// `/index.html` and `http://LOCALHOST/index.html#top` all describe the same
/// resource. Query strings are significant; fragments are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    method: HttpMethod,
    url: Url,
}

impl RequestDescriptor {
    /// Resolve `raw` against `scope`.
    pub fn resolve(method: HttpMethod, raw: &str, scope: &Url) -> Result<Self> {
        let mut url = scope.join(raw.trim()).map_err(|e| OfflineError::InvalidRequest {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(OfflineError::InvalidRequest {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        url.set_fragment(None);
        Ok(Self { method, url })
    }

    /// Shorthand for a `GET` descriptor.
    pub fn get(raw: &str, scope: &Url) -> Result<Self> {
        Self::resolve(HttpMethod::Get, raw, scope)
    }

    /// Descriptor of an intercepted request.
    pub fn from_request(request: &HttpRequest, scope: &Url) -> Result<Self> {
        Self::resolve(request.method, &request.url, scope)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether responses to this request may be stored.
    pub fn is_cacheable(&self) -> bool {
        self.method.is_cacheable()
    }

    /// Storage key, `"{METHOD} {absolute url}"`.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// A plain network request for the described resource.
    pub fn to_request(&self) -> HttpRequest {
        HttpRequest::new(self.method, self.url.as_str())
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("http://localhost/").unwrap()
    }

    #[test]
    fn test_relative_and_absolute_forms_share_a_key() {
        let a = RequestDescriptor::get("index.html", &scope()).unwrap();
        let b = RequestDescriptor::get("/index.html", &scope()).unwrap();
        let c = RequestDescriptor::get("http://LOCALHOST/index.html#top", &scope()).unwrap();

        assert_eq!(a.key(), "GET http://localhost/index.html");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_query_is_significant() {
        let plain = RequestDescriptor::get("/a.png", &scope()).unwrap();
        let versioned = RequestDescriptor::get("/a.png?v=2", &scope()).unwrap();
        assert_ne!(plain.key(), versioned.key());
    }

    #[test]
    fn test_cross_origin_identifiers_keep_their_origin() {
        let cdn = RequestDescriptor::get("https://cdn.tailwindcss.com", &scope()).unwrap();
        assert_eq!(cdn.key(), "GET https://cdn.tailwindcss.com/");
    }

    #[test]
    fn test_method_is_part_of_identity() {
        let get = RequestDescriptor::get("/api/likes", &scope()).unwrap();
        let post = RequestDescriptor::resolve(HttpMethod::Post, "/api/likes", &scope()).unwrap();

        assert_ne!(get.key(), post.key());
        assert!(get.is_cacheable());
        assert!(!post.is_cacheable());
    }

    #[test]
    fn test_non_http_schemes_are_rejected() {
        let result = RequestDescriptor::get("data:text/plain,hello", &scope());
        assert!(matches!(result, Err(OfflineError::InvalidRequest { .. })));
    }

    #[test]
    fn test_scope_subdirectory_resolution() {
        let app = Url::parse("https://example.com/app/").unwrap();
        let icon = RequestDescriptor::get("icons/icon-192x192.png", &app).unwrap();
        assert_eq!(icon.url().as_str(), "https://example.com/app/icons/icon-192x192.png");
        assert_eq!(icon.to_request().url, "https://example.com/app/icons/icon-192x192.png");
    }
}
