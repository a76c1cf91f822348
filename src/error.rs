use crate::verification::UncalledReport;
use log::{error, warn};
use std::sync::Arc;
use thiserror::Error;

/// Boxed error type produced by plugins and `Raises` test doubles.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong while resolving, consuming or auditing test doubles.
///
/// Most variants can be downgraded to a warning through `assert_no_missing_calls` and
/// `assert_no_extra_calls`: the caller decides whether to return them or only
/// [`report`](Error::report) them. [`Error::InconsistentMessageLog`] is always fatal.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("this test is missing an inbound request or a request handler: no system-under-test to build")]
    MissingHandler,
    #[error("no test doubles were registered for factory `{factory_name}`")]
    MissingFactory { factory_name: String },
    #[error("could not find a test double in factory `{factory_name}` matching request: {request}")]
    MissingTestDouble {
        factory_name: String,
        request: String,
    },
    #[error("expected only {expected} calls to {request}")]
    OverCalledTestDouble { expected: usize, request: String },
    #[error("the following test doubles were NOT used in this test:\n{0}")]
    UnCalledTestDouble(UncalledReport),
    #[error("plugin `{plugin}` failed to resolve a response: {source}")]
    UnhandledPlugin {
        plugin: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to build a canonical request: {0}")]
    RequestNormalization(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("message log has an odd number of entries ({0}): a request was recorded without its response")]
    InconsistentMessageLog(usize),
    #[error(transparent)]
    Injected(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn unhandled_plugin(plugin: &str, source: BoxError) -> Self {
        Error::UnhandledPlugin {
            plugin: plugin.to_owned(),
            source: Arc::from(source),
        }
    }

    /// Log this error and hand it back.
    ///
    /// `fatal` only picks the log level and the wording: whether the error is then
    /// returned to the caller is decided separately by the strictness flags.
    pub fn report(self, fatal: bool) -> Self {
        if fatal {
            error!("{}", self);
        } else {
            warn!("{}{}", self, self.relaxed_hint());
        }
        self
    }

    fn relaxed_hint(&self) -> &'static str {
        match self {
            Error::UnCalledTestDouble(_) => {
                " if this is not expected, set assert_no_missing_calls to true"
            }
            Error::OverCalledTestDouble { .. } => {
                " will repeat the last response; set assert_no_extra_calls to true to fail instead"
            }
            Error::MissingFactory { .. } | Error::MissingTestDouble { .. } => {
                " the caller will receive no response"
            }
            _ => "",
        }
    }

    /// `true` for errors signalling a broken framework invariant rather than a test
    /// authoring mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::InconsistentMessageLog(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_over_call_mentions_the_repeat() {
        let error = Error::OverCalledTestDouble {
            expected: 2,
            request: "GET http://svc/x".into(),
        };
        assert_eq!(error.to_string(), "expected only 2 calls to GET http://svc/x");
        assert!(error.relaxed_hint().contains("repeat the last response"));
    }

    #[test]
    fn only_log_parity_is_internal() {
        assert!(Error::InconsistentMessageLog(3).is_internal());
        assert!(!Error::MissingHandler.is_internal());
    }
}
