use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Bytes;

use crate::error::Error;
use crate::request::CanonicalRequest;
use crate::response_template::ResponseTemplate;
use crate::store::{SharedStore, HTTP_FACTORY};

/// The seam through which a system-under-test makes outbound HTTP calls.
///
/// Production code gets a real client behind this trait; tests inject a
/// [`DoubleHttpClient`] resolving every call against a store.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Error>;
}

/// An [`HttpClient`] answering from the test doubles of a store.
///
/// A request with no matching double gets a `404` when `assert_no_missing_calls` is off.
/// Doubles that raise surface as [`Error::Injected`].
#[derive(Debug, Clone)]
pub struct DoubleHttpClient {
    store: SharedStore,
    factory_name: String,
}

impl DoubleHttpClient {
    /// Resolve through the outbound HTTP factory of `store`.
    pub fn new(store: SharedStore) -> Self {
        Self::with_factory(store, HTTP_FACTORY)
    }

    pub fn with_factory(store: SharedStore, factory_name: impl Into<String>) -> Self {
        Self {
            store,
            factory_name: factory_name.into(),
        }
    }

    pub fn factory_name(&self) -> &str {
        &self.factory_name
    }
}

#[async_trait]
impl HttpClient for DoubleHttpClient {
    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Error> {
        let request = CanonicalRequest::from_http(request).await?;
        let resolved = self
            .store
            .write()
            .expect("Poisoned lock!")
            .get_next_response(&self.factory_name, &request)?;
        resolved
            .unwrap_or_else(|| ResponseTemplate::new(404))
            .generate_response()
    }
}
