use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use http_body_util::BodyExt;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::comparison::UrlParts;
use crate::error::Error;

pub const BODY_PRINT_LIMIT: usize = 10_000;

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Specifies limitations on printing request bodies when logging requests. Test doubles
/// may carry very large payloads and it may be desirable to limit them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyPrintLimit {
    /// Maximum length of a body to print in bytes.
    Limited(usize),
    /// There is no limit to the size of a body that may be printed.
    Unlimited,
}

impl Default for BodyPrintLimit {
    fn default() -> Self {
        BodyPrintLimit::Limited(BODY_PRINT_LIMIT)
    }
}

/// The canonical form of a message exchanged with the system-under-test or one of its
/// depended-on-components.
///
/// The same type represents both sides of a lookup: the *expected* request a test declares
/// when registering a test double, and the *actual* request an adapter builds when the
/// system-under-test makes an outbound call. [`compare`](crate::comparison::compare) decides
/// whether the two are equivalent.
///
/// A `CanonicalRequest` is never mutated after construction, apart from the lazy
/// assignment of its [`exchange_id`](CanonicalRequest::exchange_id).
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub method: Method,
    /// The URL (or bare path) exactly as it was supplied.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    parts: UrlParts,
    exchange_id: OnceCell<u64>,
    timestamp: SystemTime,
}

impl CanonicalRequest {
    /// Start building a request for `method` and `target`.
    ///
    /// `method` is case-insensitive; `"*"` builds a request matching any method.
    pub fn builder(method: impl AsRef<str>, target: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method.as_ref(), target.into())
    }

    /// Shorthand for a bodiless `GET` request.
    pub fn get(target: impl Into<String>) -> Result<Self, Error> {
        Self::builder("GET", target).build()
    }

    /// Shorthand for a `POST` request carrying `body`.
    pub fn post(target: impl Into<String>, body: impl Into<Vec<u8>>) -> Result<Self, Error> {
        Self::builder("POST", target).body(body).build()
    }

    /// The decomposed target used by the comparison algorithm.
    pub fn url_parts(&self) -> &UrlParts {
        &self.parts
    }

    /// `true` if this request was declared with the `*` method.
    pub fn is_any_method(&self) -> bool {
        self.method.as_str() == "*"
    }

    /// A process-unique identifier, assigned the first time it is asked for.
    pub fn exchange_id(&self) -> u64 {
        *self
            .exchange_id
            .get_or_init(|| NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Build the canonical form of an `http::Request`, collecting its body.
    ///
    /// Requests without an authority (e.g. `/hello`) keep a path-only target, so they
    /// only compare equal to expectations that wildcard scheme and host.
    pub async fn from_http<B>(request: http::Request<B>) -> Result<Self, Error>
    where
        B: hyper::body::Body,
        B::Error: fmt::Display,
    {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| Error::RequestNormalization(format!("failed to read body: {}", e)))?
            .to_bytes();
        let mut builder = Self::builder(parts.method.as_str(), parts.uri.to_string());
        builder.headers = parts.headers;
        builder.body(body.to_vec()).build()
    }

    pub(crate) fn print_with_limit(
        &self,
        mut buffer: impl fmt::Write,
        body_print_limit: BodyPrintLimit,
    ) -> fmt::Result {
        writeln!(buffer, "{} {}", self.method, self.target)?;
        for name in self.headers.keys() {
            let values = self
                .headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .collect::<Vec<_>>();
            let values = values.join(",");
            writeln!(buffer, "{}: {}", name, values)?;
        }

        if self.body.is_empty() {
            return Ok(());
        }
        match body_print_limit {
            BodyPrintLimit::Limited(limit) if self.body.len() > limit => {
                // Back off to the closest char boundary below the limit.
                let mut end_byte = limit;
                while end_byte > 0 && std::str::from_utf8(&self.body[..end_byte]).is_err() {
                    end_byte -= 1;
                }
                if end_byte == 0 {
                    return writeln!(
                        buffer,
                        "Body is likely binary (invalid utf-8) size is {} bytes",
                        self.body.len()
                    );
                }
                writeln!(buffer, "{}", String::from_utf8_lossy(&self.body[..end_byte]))?;
                writeln!(
                    buffer,
                    "We truncated the body because it was too large: {} bytes (limit: {} bytes)",
                    self.body.len(),
                    limit
                )?;
                writeln!(
                    buffer,
                    "Increase this limit by setting `MOCKMALL_BODY_PRINT_LIMIT` or the `body_print_limit` configuration key"
                )
            }
            _ => {
                if let Ok(body) = std::str::from_utf8(&self.body) {
                    writeln!(buffer, "{}", body)
                } else {
                    writeln!(
                        buffer,
                        "Body is likely binary (invalid utf-8) size is {} bytes",
                        self.body.len()
                    )
                }
            }
        }
    }

    /// Render the request for diagnostics, honouring `limit`.
    pub fn describe(&self, limit: BodyPrintLimit) -> String {
        let mut out = String::new();
        // Writing into a `String` cannot fail.
        let _ = self.print_with_limit(&mut out, limit);
        out.trim_end().to_owned()
    }
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target)
    }
}

/// Fluent construction of a [`CanonicalRequest`].
///
/// Conversion failures are collected and surface from [`build`](RequestBuilder::build)
/// as [`Error::RequestNormalization`].
#[derive(Debug)]
pub struct RequestBuilder {
    method: Result<Method, Error>,
    target: String,
    pub(crate) headers: HeaderMap,
    body: Vec<u8>,
    error: Option<Error>,
}

impl RequestBuilder {
    fn new(method: &str, target: String) -> Self {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::RequestNormalization(format!("invalid method `{}`: {}", method, e)));
        Self {
            method,
            target,
            headers: HeaderMap::new(),
            body: Vec::new(),
            error: None,
        }
    }

    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: fmt::Display,
    {
        let key = match key.try_into() {
            Ok(key) => key,
            Err(e) => return self.fail(format!("invalid header name: {}", e)),
        };
        match value.try_into() {
            Ok(value) => {
                self.headers.append(key, value);
                self
            }
            Err(e) => self.fail(format!("invalid value for header `{}`: {}", key, e)),
        }
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `body` as JSON and set the matching content type.
    pub fn json<B: Serialize>(mut self, body: &B) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => {
                self.body = bytes;
                self.header(http::header::CONTENT_TYPE, "application/json")
            }
            Err(e) => self.fail(format!("failed to serialize JSON body: {}", e)),
        }
    }

    fn fail(mut self, message: String) -> Self {
        if self.error.is_none() {
            self.error = Some(Error::RequestNormalization(message));
        }
        self
    }

    pub fn build(self) -> Result<CanonicalRequest, Error> {
        if let Some(error) = self.error {
            return Err(error.report(true));
        }
        let method = self.method.map_err(|e| e.report(true))?;
        let parts = UrlParts::parse(&self.target).map_err(|e| e.report(true))?;
        Ok(CanonicalRequest {
            method,
            target: self.target,
            headers: self.headers,
            body: self.body,
            parts,
            exchange_id: OnceCell::new(),
            timestamp: SystemTime::now(),
        })
    }
}
