//! Similarity comparison between an expected and an actual [`CanonicalRequest`].
//!
//! Two requests are equivalent when their methods agree and every field of their
//! decomposed targets agrees, where:
//! - query parameters are compared as an unordered multimap, so
//!   `/maps?a=0&b=true` and `/maps?b=true&a=0` are the same logical URL;
//! - a field whose value is `*` on either side always matches (a trailing `*` path segment
//!   absorbs any remaining segments, a raw query of `*` absorbs any query);
//! - a field listed in the configured [`WildcardFields`] matches when either side leaves
//!   it empty.
//!
//! Missing scheme or host on one side only is a mismatch unless `scheme` / `netloc` are
//! configured as wildcard fields.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::{ParseError, Url};

use crate::error::Error;
use crate::request::CanonicalRequest;

const WILDCARD: &str = "*";

/// Names of target fields that match whenever either side leaves them empty.
///
/// Recognised names are `scheme`, `netloc`, `path` (all segments), `path_<n>` (a single
/// segment, zero-based, `path_0` being the empty segment before the leading slash),
/// `params`, `query` and `fragment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WildcardFields(BTreeSet<String>);

impl WildcardFields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }
}

impl<S: Into<String>> FromIterator<S> for WildcardFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// The query component of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// The raw query string was literally `*`.
    Wildcard,
    /// Parameter name to values, in the order the values appeared.
    Params(BTreeMap<String, Vec<String>>),
}

impl Query {
    fn is_empty(&self) -> bool {
        matches!(self, Query::Params(params) if params.is_empty())
    }
}

/// A request target decomposed into the fields [`compare`] looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    /// `user:password@host:port`, empty for path-only targets.
    pub netloc: String,
    pub path_segments: Vec<String>,
    /// `;params` trailing the last path segment.
    pub params: String,
    pub query: Query,
    pub fragment: String,
}

impl UrlParts {
    /// Decompose `target`, which may be an absolute URL or a bare path.
    pub fn parse(target: &str) -> Result<Self, Error> {
        let (url, relative) = match Url::parse(target) {
            Ok(url) => (url, false),
            Err(ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse("http://localhost/").map_err(normalization_error)?;
                (base.join(target).map_err(normalization_error)?, true)
            }
            Err(e) => return Err(normalization_error(e)),
        };

        let (scheme, netloc) = if relative {
            (String::new(), String::new())
        } else {
            (url.scheme().to_owned(), netloc(&url))
        };

        let mut path_segments: Vec<String> = if url.cannot_be_a_base() {
            vec![url.path().to_owned()]
        } else {
            url.path().split('/').map(str::to_owned).collect()
        };
        let mut params = String::new();
        if let Some(last) = path_segments.last_mut() {
            if let Some(index) = last.find(';') {
                params = last[index + 1..].to_owned();
                last.truncate(index);
            }
        }

        let query = match url.query() {
            Some(WILDCARD) => Query::Wildcard,
            Some(_) => {
                let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for (name, value) in url.query_pairs() {
                    params
                        .entry(name.into_owned())
                        .or_default()
                        .push(value.into_owned());
                }
                Query::Params(params)
            }
            None => Query::Params(BTreeMap::new()),
        };

        Ok(Self {
            scheme,
            netloc,
            path_segments,
            params,
            query,
            fragment: url.fragment().unwrap_or_default().to_owned(),
        })
    }
}

fn netloc(url: &Url) -> String {
    let mut netloc = String::new();
    if !url.username().is_empty() {
        netloc.push_str(url.username());
        if let Some(password) = url.password() {
            netloc.push(':');
            netloc.push_str(password);
        }
        netloc.push('@');
    }
    netloc.push_str(url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        netloc.push_str(&format!(":{}", port));
    }
    netloc
}

fn normalization_error(e: ParseError) -> Error {
    Error::RequestNormalization(format!("invalid request target: {}", e))
}

/// `true` if `actual` is routed to the test double registered for `expected`.
pub fn compare(
    expected: &CanonicalRequest,
    actual: &CanonicalRequest,
    wildcard_fields: &WildcardFields,
) -> bool {
    mismatch(expected, actual, wildcard_fields).is_none()
}

/// The name of the first field on which the two requests disagree, if any.
pub fn mismatch(
    expected: &CanonicalRequest,
    actual: &CanonicalRequest,
    wildcard_fields: &WildcardFields,
) -> Option<String> {
    if !expected.is_any_method() && !actual.is_any_method() && expected.method != actual.method {
        return Some("method".into());
    }
    let (this, that) = (expected.url_parts(), actual.url_parts());
    let scalars = [
        ("scheme", &this.scheme, &that.scheme),
        ("netloc", &this.netloc, &that.netloc),
        ("params", &this.params, &that.params),
        ("fragment", &this.fragment, &that.fragment),
    ];
    for (field, this_val, that_val) in scalars {
        if !text_matches(field, this_val, that_val, wildcard_fields) {
            return Some(field.into());
        }
    }
    if let Some(field) = path_mismatch(&this.path_segments, &that.path_segments, wildcard_fields) {
        return Some(field);
    }
    let query_matches = match (&this.query, &that.query) {
        (Query::Wildcard, _) | (_, Query::Wildcard) => true,
        (this_query, that_query) if this_query == that_query => true,
        (this_query, that_query) => {
            wildcard_fields.contains("query") && (this_query.is_empty() || that_query.is_empty())
        }
    };
    if !query_matches {
        return Some("query".into());
    }
    None
}

fn text_matches(field: &str, this: &str, that: &str, wildcard_fields: &WildcardFields) -> bool {
    this == WILDCARD
        || that == WILDCARD
        || this == that
        || (wildcard_fields.contains(field) && (this.is_empty() || that.is_empty()))
}

fn path_mismatch(
    this: &[String],
    that: &[String],
    wildcard_fields: &WildcardFields,
) -> Option<String> {
    for index in 0..this.len().max(that.len()) {
        let field = format!("path_{}", index);
        let (this_segment, that_segment) = (this.get(index), that.get(index));
        // A trailing wildcard swallows whatever is left on the other side.
        let trailing_wildcard = |segments: &[String], segment: Option<&String>| {
            segment.map(String::as_str) == Some(WILDCARD) && index + 1 == segments.len()
        };
        if trailing_wildcard(this, this_segment) || trailing_wildcard(that, that_segment) {
            return None;
        }
        let this_segment = this_segment.map(String::as_str).unwrap_or_default();
        let that_segment = that_segment.map(String::as_str).unwrap_or_default();
        let wildcarded = wildcard_fields.contains("path") || wildcard_fields.contains(&field);
        let matched = this_segment == WILDCARD
            || that_segment == WILDCARD
            || this_segment == that_segment
                && this.len() > index
                && that.len() > index
            || wildcarded && (this_segment.is_empty() || that_segment.is_empty());
        if !matched {
            return Some(field);
        }
    }
    None
}
