//! Test doubles and their consumption bookkeeping.
//!
//! A [`ResponseTrackingList`] holds the doubles registered for one expected request, in
//! declaration order. Every call consumes the first unconsumed entry; once all entries
//! are consumed the list is exhausted and further calls are over-calls.
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::request::CanonicalRequest;
use crate::respond::Respond;
use crate::response_template::ResponseTemplate;

/// What a single registered test double does when it is consumed.
#[derive(Clone)]
pub enum Double {
    /// Hand back a fixed response.
    Literal(ResponseTemplate),
    /// Fail the call with this error, as if the dependency itself had failed.
    Raises(Arc<dyn std::error::Error + Send + Sync>),
    /// Compute the response from the request that consumed the double.
    Computed(Arc<dyn Respond>),
}

impl Double {
    pub fn literal(template: ResponseTemplate) -> Self {
        Double::Literal(template)
    }

    pub fn raises<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Double::Raises(Arc::new(error))
    }

    pub fn computed<R: Respond + 'static>(responder: R) -> Self {
        Double::Computed(Arc::new(responder))
    }

    /// Turn the double into the value handed to the caller.
    pub(crate) fn realize(&self, request: &CanonicalRequest) -> Result<ResponseTemplate, Error> {
        match self {
            Double::Literal(template) => Ok(template.clone()),
            Double::Raises(error) => Err(Error::Injected(error.clone())),
            Double::Computed(responder) => Ok(responder.respond(request)),
        }
    }
}

impl fmt::Debug for Double {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Double::Literal(template) => f.debug_tuple("Literal").field(template).finish(),
            Double::Raises(error) => f.debug_tuple("Raises").field(&error.to_string()).finish(),
            Double::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl fmt::Display for Double {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Double::Literal(template) => {
                write!(f, "{} {}", template.status().as_u16(), template.body_text())
            }
            Double::Raises(error) => write!(f, "raises: {}", error),
            Double::Computed(_) => f.write_str("<computed response>"),
        }
    }
}

impl From<ResponseTemplate> for Double {
    fn from(template: ResponseTemplate) -> Self {
        Double::Literal(template)
    }
}

impl From<&str> for Double {
    fn from(body: &str) -> Self {
        Double::Literal(ResponseTemplate::ok(body))
    }
}

/// What an exhausted list hands back when over-calls are tolerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverCallRepeat {
    /// Realize the last registered double again, re-invoking it if it is computed.
    #[default]
    Reinvoke,
    /// Hand back the value the last double produced when it was consumed.
    LastRealized,
}

/// The knobs of the over-call state transition, resolved per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionPolicy {
    pub assert_no_extra_calls: bool,
    pub over_call_repeat: OverCallRepeat,
}

impl Default for ConsumptionPolicy {
    fn default() -> Self {
        Self {
            assert_no_extra_calls: true,
            over_call_repeat: OverCallRepeat::default(),
        }
    }
}

/// One entry of a [`ResponseTrackingList`].
#[derive(Debug, Clone)]
pub struct TrackedResponse {
    consumed: bool,
    double: Double,
    realized: Option<Result<ResponseTemplate, Error>>,
}

impl TrackedResponse {
    pub fn new(double: Double) -> Self {
        Self {
            consumed: false,
            double,
            realized: None,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn double(&self) -> &Double {
        &self.double
    }

    /// Make the entry consumable again. Never used by the normal request flow.
    pub fn reset(&mut self) {
        self.consumed = false;
        self.realized = None;
    }
}

/// The ordered doubles registered for one expected request.
#[derive(Debug, Clone, Default)]
pub struct ResponseTrackingList {
    responses: Vec<TrackedResponse>,
    n_calls: u64,
}

impl ResponseTrackingList {
    pub fn new<I, D>(doubles: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Double>,
    {
        Self {
            responses: doubles
                .into_iter()
                .map(|double| TrackedResponse::new(double.into()))
                .collect(),
            n_calls: 0,
        }
    }

    /// `n` identical doubles: the endpoint is expected to be called exactly `n` times.
    pub fn repeated(double: impl Into<Double>, n: usize) -> Self {
        let double = double.into();
        Self::new(std::iter::repeat(double).take(n))
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.responses.iter().all(TrackedResponse::is_consumed)
    }

    /// How many times the list has been consumed, over-calls included.
    pub fn n_calls(&self) -> u64 {
        self.n_calls
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedResponse> {
        self.responses.iter()
    }

    /// The doubles that have not been consumed yet, in declaration order.
    pub fn unconsumed(&self) -> Vec<&Double> {
        self.responses
            .iter()
            .filter(|r| !r.consumed)
            .map(|r| &r.double)
            .collect()
    }

    pub fn reset(&mut self) {
        self.responses.iter_mut().for_each(TrackedResponse::reset);
        self.n_calls = 0;
    }

    /// Consume the first unconsumed double and realize it against `request`.
    ///
    /// An exhausted list is an over-call: it fails with
    /// [`Error::OverCalledTestDouble`] when `policy.assert_no_extra_calls` is set, and
    /// otherwise logs a warning and repeats the last registered double. `Ok(None)` is only
    /// returned by a tolerated over-call on an empty list.
    pub fn consume(
        &mut self,
        request: &CanonicalRequest,
        policy: ConsumptionPolicy,
    ) -> Result<Option<ResponseTemplate>, Error> {
        self.n_calls += 1;
        if let Some(next) = self.responses.iter_mut().find(|r| !r.consumed) {
            next.consumed = true;
            let realized = next.double.realize(request);
            next.realized = Some(realized.clone());
            debug!("Consumed test double #{} for {}.", self.n_calls, request);
            return realized.map(Some);
        }

        let error = Error::OverCalledTestDouble {
            expected: self.responses.len(),
            request: request.to_string(),
        }
        .report(policy.assert_no_extra_calls);
        if policy.assert_no_extra_calls {
            return Err(error);
        }
        let Some(last) = self.responses.last() else {
            return Ok(None);
        };
        match (&last.realized, policy.over_call_repeat) {
            (Some(realized), OverCallRepeat::LastRealized) => realized.clone().map(Some),
            _ => last.double.realize(request).map(Some),
        }
    }
}
