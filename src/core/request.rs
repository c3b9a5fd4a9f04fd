use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::core::balancer::{BalancerError, BalancerResult};

/// A request addressed relative to whichever instance the balancer picks.
///
/// The URI must be a relative reference without scheme, host, or leading
/// `/`, e.g. `v1/items?limit=10`; it is resolved against the chosen
/// instance's base URI for each attempt.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    pub fn builder(uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(uri)
    }

    /// Convenience constructor for a bodiless GET
    pub fn get(uri: impl Into<String>) -> Self {
        RequestBuilder::new(uri).build()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Check that the URI is a relative reference the balancer can resolve
    pub fn validate_relative(&self) -> BalancerResult<()> {
        match Url::parse(&self.uri) {
            Ok(_) => Err(BalancerError::InvalidRequestUri(format!(
                "{} is not a relative URI",
                self.uri
            ))),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                if self.uri.starts_with("//") {
                    Err(BalancerError::InvalidRequestUri(format!(
                        "{} has a host component",
                        self.uri
                    )))
                } else if self.uri.starts_with('/') {
                    Err(BalancerError::InvalidRequestUri(format!(
                        "{} path starts with '/'",
                        self.uri
                    )))
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(BalancerError::InvalidRequestUri(format!(
                "{}: {e}",
                self.uri
            ))),
        }
    }

    /// Resolve against an instance base URI. The base path is treated as a
    /// directory so the relative path is appended rather than replacing the
    /// last segment.
    pub fn resolve(&self, base: &Url) -> BalancerResult<Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&self.uri).map_err(|e| {
            BalancerError::InvalidRequestUri(format!("Cannot resolve {} against {base}: {e}", self.uri))
        })
    }

    /// Build the absolute transport request for one attempt
    pub(crate) fn to_http(&self, base: &Url) -> BalancerResult<http::Request<Bytes>> {
        let uri = self.resolve(base)?;
        let mut request = http::Request::builder()
            .method(self.method.clone())
            .uri(uri.as_str())
            .body(self.body.clone())
            .map_err(|e| BalancerError::InvalidRequestUri(format!("{uri}: {e}")))?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

/// Builder for [`Request`]
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestBuilder {
    fn new(uri: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Request {
        Request {
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use http::header;

    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_relative_uri_accepted() {
        assert!(Request::get("v1/service?x=1").validate_relative().is_ok());
        assert!(Request::get("").validate_relative().is_ok());
    }

    #[test]
    fn test_absolute_uri_rejected() {
        let err = Request::get("http://a/v1").validate_relative().unwrap_err();
        assert!(matches!(err, BalancerError::InvalidRequestUri(msg) if msg.contains("not a relative URI")));
    }

    #[test]
    fn test_host_component_rejected() {
        let err = Request::get("//a/v1").validate_relative().unwrap_err();
        assert!(matches!(err, BalancerError::InvalidRequestUri(msg) if msg.contains("host component")));
    }

    #[test]
    fn test_leading_slash_rejected() {
        let err = Request::get("/v1").validate_relative().unwrap_err();
        assert!(matches!(err, BalancerError::InvalidRequestUri(msg) if msg.contains("starts with '/'")));
    }

    #[test]
    fn test_resolve_appends_to_base_path() {
        let request = Request::get("v1/items?limit=5");
        assert_eq!(
            request.resolve(&url("http://a:8080/api")).unwrap().as_str(),
            "http://a:8080/api/v1/items?limit=5"
        );
        assert_eq!(
            request.resolve(&url("http://a:8080/api/")).unwrap().as_str(),
            "http://a:8080/api/v1/items?limit=5"
        );
        assert_eq!(
            request.resolve(&url("http://a:8080")).unwrap().as_str(),
            "http://a:8080/v1/items?limit=5"
        );
    }

    #[test]
    fn test_to_http_carries_method_headers_body() {
        let request = Request::builder("v1/items")
            .method(Method::POST)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body("{}")
            .build();

        let http_request = request.to_http(&url("https://b:8443/")).unwrap();
        assert_eq!(http_request.method(), Method::POST);
        assert_eq!(http_request.uri(), "https://b:8443/v1/items");
        assert_eq!(
            http_request.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(http_request.body(), &Bytes::from_static(b"{}"));
    }
}
