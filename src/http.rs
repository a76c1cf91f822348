//! Convenient re-exports of http types that are part of `mockmall`'s public API.
pub use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
pub use http_body_util::Full;
pub use hyper::body::Bytes;
