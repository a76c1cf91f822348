//! Extra constraints that can be layered on top of URL/method comparison.
//!
//! An expectation is routed by [`compare`](crate::comparison::compare) first; matchers
//! added with [`Expectation::and`](crate::Expectation::and) must then all agree before the
//! test double is consumed. Use them when routing on the target alone is not enough, e.g.
//! two `POST`s to the same endpoint that differ only by their JSON payload.
//!
//! `Fn` closures taking a [`CanonicalRequest`] reference and returning a boolean implement
//! [`Match`] out of the box.
use crate::request::CanonicalRequest;
use assert_json_diff::{assert_json_matches_no_panic, CompareMode};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use http::{HeaderName, HeaderValue};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{Debug, Formatter};

/// Anything that implements `Match` can further constrain which requests a test double
/// answers.
pub trait Match: Send + Sync {
    /// Given a reference to a `CanonicalRequest`, determine if it should match or not.
    fn matches(&self, request: &CanonicalRequest) -> bool;
}

/// Implement the `Match` trait for all closures, out of the box,
/// if their signature is compatible.
impl<F> Match for F
where
    F: Fn(&CanonicalRequest) -> bool,
    F: Send + Sync,
{
    fn matches(&self, request: &CanonicalRequest) -> bool {
        self(request)
    }
}

pub(crate) struct Matcher(Box<dyn Match>);

impl Matcher {
    pub(crate) fn new<M: Match + 'static>(matcher: M) -> Self {
        Self(Box::new(matcher))
    }
}

impl Match for Matcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        self.0.matches(request)
    }
}

impl Debug for Matcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Closures do not implement `Debug`.
        f.write_str("Matcher")
    }
}

#[derive(Debug)]
/// Match **exactly** the values of a header. Comma-separated values are split and
/// compared in order.
pub struct HeaderExactMatcher(HeaderName, Vec<HeaderValue>);

/// Shorthand for [`HeaderExactMatcher::new`].
pub fn header<K, V>(key: K, value: V) -> HeaderExactMatcher
where
    K: TryInto<HeaderName>,
    <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
    V: TryInto<HeaderValue>,
    <V as TryInto<HeaderValue>>::Error: std::fmt::Debug,
{
    HeaderExactMatcher::new(key, vec![value])
}

impl HeaderExactMatcher {
    pub fn new<K, V>(key: K, values: Vec<V>) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: std::fmt::Debug,
    {
        let key = key.try_into().expect("Failed to convert to header name.");
        let values = values
            .into_iter()
            .map(|value| value.try_into().expect("Failed to convert to header value."))
            .collect();
        Self(key, values)
    }
}

impl Match for HeaderExactMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        let values = request
            .headers
            .get_all(&self.0)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter_map(|v| HeaderValue::from_str(v).ok())
            })
            .collect::<Vec<_>>();
        values == self.1
    }
}

#[derive(Debug)]
/// Match requests carrying a header, whatever its value.
pub struct HeaderExistsMatcher(HeaderName);

/// Shorthand for [`HeaderExistsMatcher`].
pub fn header_exists<K>(key: K) -> HeaderExistsMatcher
where
    K: TryInto<HeaderName>,
    <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
{
    HeaderExistsMatcher(key.try_into().expect("Failed to convert to header name."))
}

impl Match for HeaderExistsMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        request.headers.contains_key(&self.0)
    }
}

#[derive(Debug)]
enum Body {
    Bytes(Vec<u8>),
    Json(Value),
}

#[derive(Debug)]
/// Match **exactly** the body of a request. JSON bodies are compared as values, so key
/// ordering and whitespace do not matter.
pub struct BodyExactMatcher(Body);

impl BodyExactMatcher {
    pub fn string<T: Into<String>>(body: T) -> Self {
        Self(Body::Bytes(body.into().into_bytes()))
    }

    pub fn bytes<T: Into<Vec<u8>>>(body: T) -> Self {
        Self(Body::Bytes(body.into()))
    }

    pub fn json<T: Serialize>(body: T) -> Self {
        Self(Body::Json(
            serde_json::to_value(body).expect("Failed to serialize JSON body"),
        ))
    }
}

/// Shorthand for [`BodyExactMatcher::string`].
pub fn body_string<T: Into<String>>(body: T) -> BodyExactMatcher {
    BodyExactMatcher::string(body)
}

/// Shorthand for [`BodyExactMatcher::bytes`].
pub fn body_bytes<T: Into<Vec<u8>>>(body: T) -> BodyExactMatcher {
    BodyExactMatcher::bytes(body)
}

/// Shorthand for [`BodyExactMatcher::json`].
pub fn body_json<T: Serialize>(body: T) -> BodyExactMatcher {
    BodyExactMatcher::json(body)
}

impl Match for BodyExactMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        match &self.0 {
            Body::Bytes(bytes) => request.body == *bytes,
            Body::Json(json) => serde_json::from_slice::<Value>(&request.body)
                .map(|body| body == *json)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug)]
/// Match part of the body of a request.
pub struct BodyContainsMatcher(Vec<u8>);

/// Shorthand for [`BodyContainsMatcher`].
pub fn body_string_contains<T: Into<String>>(body: T) -> BodyContainsMatcher {
    BodyContainsMatcher(body.into().into_bytes())
}

impl Match for BodyContainsMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        if self.0.is_empty() {
            return true;
        }
        request.body.windows(self.0.len()).any(|w| w == self.0.as_slice())
    }
}

#[derive(Debug)]
/// Match a JSON body that contains at least the given fields.
pub struct BodyPartialJsonMatcher(Value);

/// Shorthand for [`BodyPartialJsonMatcher`].
pub fn body_partial_json<T: Serialize>(body: T) -> BodyPartialJsonMatcher {
    BodyPartialJsonMatcher(serde_json::to_value(body).expect("Can't serialize to JSON"))
}

impl Match for BodyPartialJsonMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        if let Ok(body) = serde_json::from_slice::<Value>(&request.body) {
            let config = assert_json_diff::Config::new(CompareMode::Inclusive);
            assert_json_matches_no_panic(&body, &self.0, config).is_ok()
        } else {
            false
        }
    }
}

#[derive(Debug)]
/// Match the path of a request against a regular expression.
pub struct PathRegexMatcher(Regex);

/// Shorthand for [`PathRegexMatcher`].
pub fn path_regex<T: AsRef<str>>(path: T) -> PathRegexMatcher {
    PathRegexMatcher(Regex::new(path.as_ref()).expect("Failed to create regex for path matcher"))
}

impl Match for PathRegexMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        self.0
            .is_match(&request.url_parts().path_segments.join("/"))
    }
}

#[derive(Debug)]
/// Match an `Authorization: Basic` header built from the given credentials.
pub struct BasicAuthMatcher(HeaderExactMatcher);

/// Shorthand for [`BasicAuthMatcher`].
pub fn basic_auth<U: AsRef<str>, P: AsRef<str>>(username: U, password: P) -> BasicAuthMatcher {
    let token = BASE64_STANDARD.encode(format!("{}:{}", username.as_ref(), password.as_ref()));
    BasicAuthMatcher(header("Authorization", &*format!("Basic {}", token)))
}

impl Match for BasicAuthMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        self.0.matches(request)
    }
}

#[derive(Debug)]
/// Match an `Authorization: Bearer` header carrying the given token.
pub struct BearerTokenMatcher(HeaderExactMatcher);

/// Shorthand for [`BearerTokenMatcher`].
pub fn bearer_token<T: AsRef<str>>(token: T) -> BearerTokenMatcher {
    BearerTokenMatcher(header(
        "Authorization",
        &*format!("Bearer {}", token.as_ref()),
    ))
}

impl Match for BearerTokenMatcher {
    fn matches(&self, request: &CanonicalRequest) -> bool {
        self.0.matches(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post(body: &str) -> CanonicalRequest {
        CanonicalRequest::builder("POST", "http://svc/x")
            .header("Authorization", "Bearer token")
            .body(body)
            .build()
            .unwrap()
    }

    #[test]
    fn json_body_ignores_key_order() {
        let matcher = body_json(json!({ "a": 1, "b": 2 }));
        assert!(matcher.matches(&post(r#"{"b":2,"a":1}"#)));
        assert!(!matcher.matches(&post(r#"{"a":1}"#)));
    }

    #[test]
    fn partial_json_accepts_extra_fields() {
        let matcher = body_partial_json(json!({ "service": "maps" }));
        assert!(matcher.matches(&post(r#"{"service":"maps","id":3}"#)));
    }

    #[test]
    fn bearer_token_reads_the_authorization_header() {
        assert!(bearer_token("token").matches(&post("")));
        assert!(!bearer_token("other").matches(&post("")));
    }

    #[test]
    fn path_regex_sees_the_full_path() {
        assert!(path_regex("^/x$").matches(&post("")));
    }

    #[test]
    fn closures_are_matchers() {
        let matcher = |request: &CanonicalRequest| request.body.is_empty();
        assert!(matcher.matches(&post("")));
        assert!(!matcher.matches(&post("body")));
    }
}
