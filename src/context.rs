//! Per-request metadata passed explicitly through the call chain.

use crate::directive::Directive;
use reqwest::header::{Entry, HeaderMap, HeaderName, HeaderValue};
use std::sync::{Arc, Mutex, MutexGuard};

/// Request context shared by everything serving one logical request.
///
/// Cloning is cheap and clones observe the same response headers. Build
/// one context per inbound request; never share it across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    request_headers: HeaderMap,
    response_headers: Mutex<HeaderMap>,
}

impl RequestContext {
    pub fn new(request_headers: HeaderMap) -> Self {
        Self {
            inner: Arc::new(Inner {
                request_headers,
                response_headers: Mutex::new(HeaderMap::new()),
            }),
        }
    }

    /// A context without request headers (directive defaults to `public`).
    pub fn empty() -> Self {
        Self::new(HeaderMap::new())
    }

    /// Convenience constructor setting only the `cache-control` request header.
    pub fn with_cache_control(value: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(reqwest::header::CACHE_CONTROL, v);
        }
        Self::new(headers)
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.inner.request_headers
    }

    /// Header lookup is case-insensitive; non-UTF-8 values read as absent.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.inner
            .request_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
    }

    pub fn directive(&self) -> Directive {
        Directive::from_headers(&self.inner.request_headers)
    }

    /// Set a response header unless upstream logic already set it.
    /// Returns `true` when the value was written.
    pub fn set_response_header_if_absent(&self, name: HeaderName, value: HeaderValue) -> bool {
        match self.response_headers_mut().entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Overwrite a response header.
    pub fn insert_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.response_headers_mut().insert(name, value);
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.response_headers_mut()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Snapshot of the response headers set so far.
    pub fn response_headers(&self) -> HeaderMap {
        self.response_headers_mut().clone()
    }

    fn response_headers_mut(&self) -> MutexGuard<'_, HeaderMap> {
        // A panic while holding the guard cannot leave a HeaderMap half-written.
        match self.inner.response_headers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::empty()
    }
}
