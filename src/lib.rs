#![allow(clippy::needless_doctest_main)]
//! `mockmall` provides test doubles for the HTTP and SMTP dependencies of a
//! system-under-test, for black-box testing of services that talk to third-party APIs.
//!
//! Tests declare the requests they expect their system-under-test to make and the
//! responses to hand back; the system-under-test is given doubled clients that resolve
//! every outbound call against those declarations, counting calls along the way.
//!
//! # Table of Contents
//! 1. [Getting started](#getting-started)
//! 2. [Request comparison](#request-comparison)
//! 3. [Call counting](#call-counting)
//! 4. [Configuration](#configuration)
//! 5. [Plugins](#plugins)
//! 6. [Recordings](#recordings)
//! 7. [Runtime compatibility](#runtime-compatibility)
//!
//! ## Getting started
//! ```rust
//! use mockmall::http::{Bytes, Full, Request};
//! use mockmall::{
//!     CanonicalRequest, DoubleHttpClient, HttpClient, Registry, ResponseTrackingList,
//!     HTTP_FACTORY,
//! };
//!
//! #[async_std::main]
//! async fn main() {
//!     let registry = Registry::new();
//!     // One store per test: dropping the guard audits it.
//!     let guard = registry.open_guarded("test_forecast", "tests/weather").unwrap();
//!
//!     // Two calls are expected, answered in declaration order.
//!     guard.store().write().unwrap().register(
//!         CanonicalRequest::get("http://weather/forecast?days=3&unit=c").unwrap(),
//!         HTTP_FACTORY,
//!         ResponseTrackingList::new(["sunny", "rainy"]),
//!     );
//!
//!     // The system-under-test is handed a client resolving against the store.
//!     let client = DoubleHttpClient::new(guard.store().clone());
//!     for _ in 0..2 {
//!         // Query parameter order does not matter.
//!         let request = Request::get("http://weather/forecast?unit=c&days=3")
//!             .body(Full::new(Bytes::new()))
//!             .unwrap();
//!         let response = client.send(request).await.unwrap();
//!         assert_eq!(response.status(), 200);
//!     }
//! }
//! ```
//!
//! ## Request comparison
//!
//! An expectation is keyed either on a [`CanonicalRequest`], compared field by field with
//! [`compare`], or on a plain string that must be contained in the actual target.
//! A `*` in any field of the expected target matches anything; fields listed in the
//! `http_req_wildcard_fields` setting match whenever one side leaves them empty.
//!
//! Extra constraints on headers or bodies can be layered on top with the [`matchers`]
//! module, or any closure implementing [`Match`].
//!
//! ## Call counting
//!
//! Every double registered for an expectation answers exactly one call. A call past the
//! last double is an over-call, and a double left unconsumed when the test closes is an
//! under-call. Both fail the test by default; turning off `assert_no_extra_calls`
//! (resp. `assert_no_missing_calls`) downgrades them to warnings.
//!
//! ## Configuration
//!
//! Settings are resolved per test directory through a [`ConfigCascade`]: a directory's own
//! section first, then the [`DEFAULT_SECTION`]. The cascade is plain data, deserialized by
//! whatever loads it.
//!
//! ## Plugins
//!
//! A [`PluginRouter`] is mounted like any other expectation but routes requests on its
//! own, e.g. on fields of a JSON body. [`JsonFieldRouter`] covers the common case.
//!
//! ## Recordings
//!
//! Each store logs every request it resolves along with the outcome. The log can be
//! turned into a [`Recording`], a JSON artifact from which a reproduction test can be
//! generated.
//!
//! ## Runtime compatibility
//!
//! The matching engine is synchronous. The async [`HttpClient`] seam is tested with both
//! [`async_std`] and [`tokio`].
//!
//! [`async_std`]: https://docs.rs/async-std/
//! [`tokio`]: https://docs.rs/tokio/
pub mod client;
pub mod comparison;
mod error;
mod factory;
pub mod http;
pub mod matchers;
mod plugin;
pub mod recording;
mod registry;
mod request;
mod respond;
mod response_template;
mod settings;
pub mod smtp;
mod store;
mod tracked;
mod verification;

pub use client::{DoubleHttpClient, HttpClient};
pub use comparison::{compare, WildcardFields};
pub use error::{BoxError, Error};
pub use factory::{Entry, Expectation, FactoryTable, Insertion, RequestKey, Scope};
pub use matchers::Match;
pub use plugin::{JsonFieldRouter, PluginRouter, Routed};
pub use recording::{Exchange, Message, Recording};
pub use registry::{Registry, TestGuard};
pub use request::{BodyPrintLimit, CanonicalRequest, RequestBuilder};
pub use respond::Respond;
pub use response_template::ResponseTemplate;
pub use settings::{ConfigCascade, ScopeConfig, Settings, DEFAULT_SECTION};
pub use store::{
    HandlerContext, Session, SharedStore, Store, HTTP_FACTORY, INBOUND_FACTORY, SMTP_FACTORY,
};
pub use tracked::{
    ConsumptionPolicy, Double, OverCallRepeat, ResponseTrackingList, TrackedResponse,
};
pub use verification::{UncalledEntry, UncalledReport};
