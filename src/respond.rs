use crate::{CanonicalRequest, ResponseTemplate};

/// Anything that implements `Respond` can compute a test double from the request that
/// consumed it.
///
/// Use it when the depended-on-component's answer must correlate with the request, e.g.
/// echoing back the id of the requested asset:
///
/// ```rust
/// use mockmall::{CanonicalRequest, Double, ResponseTemplate};
///
/// let echo = Double::computed(|request: &CanonicalRequest| {
///     let id = request.target.rsplit('/').next().unwrap_or_default().to_owned();
///     ResponseTemplate::ok(id)
/// });
/// # let _ = echo;
/// ```
///
/// For routing that spans several logical services behind one endpoint, write a
/// [`PluginRouter`](crate::PluginRouter) instead.
pub trait Respond: Send + Sync {
    /// Given a reference to a [`CanonicalRequest`] return the [`ResponseTemplate`] handed
    /// back to the caller.
    fn respond(&self, request: &CanonicalRequest) -> ResponseTemplate;
}

impl Respond for ResponseTemplate {
    fn respond(&self, _request: &CanonicalRequest) -> ResponseTemplate {
        self.clone()
    }
}

impl<F> Respond for F
where
    F: Send + Sync + Fn(&CanonicalRequest) -> ResponseTemplate,
{
    fn respond(&self, request: &CanonicalRequest) -> ResponseTemplate {
        (self)(request)
    }
}
