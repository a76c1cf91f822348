//! The message log and its serialization into recorded exchanges.
//!
//! Every resolution appends a request and then its outcome to the store's log, so a
//! healthy log alternates requests and responses. A [`Recording`] is the serializable
//! artifact built from a log: the system-under-test's own exchange plus the exchanges it
//! had with its depended-on-components, ready to be turned into a reproduction test by an
//! external generator.
use std::time::UNIX_EPOCH;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::request::CanonicalRequest;
use crate::response_template::ResponseTemplate;

/// One entry of the message log.
#[derive(Debug, Clone)]
pub enum Message {
    Request {
        factory_name: String,
        request: CanonicalRequest,
    },
    Response(ResponseTemplate),
    /// The request was resolved to nothing (relaxed missing double or factory).
    NoResponse,
    /// The request was answered with an error instead of a response.
    Failure(String),
}

/// A request and the outcome it was answered with.
#[derive(Debug, Clone)]
pub struct Exchange<'a> {
    pub factory_name: &'a str,
    pub request: &'a CanonicalRequest,
    pub outcome: &'a Message,
}

/// Pair a message log into exchanges, in the order their requests were logged.
///
/// An outcome answers the most recent unanswered request, so the system-under-test's own
/// exchange may enclose the exchanges it had with its depended-on-components. Fails with
/// [`Error::InconsistentMessageLog`] if an outcome has no request to answer or a request
/// is left unanswered.
pub fn exchanges(messages: &[Message]) -> Result<Vec<Exchange<'_>>, Error> {
    let inconsistent = || Error::InconsistentMessageLog(messages.len());
    if messages.len() % 2 != 0 {
        return Err(inconsistent());
    }
    let mut open = Vec::new();
    let mut paired = Vec::with_capacity(messages.len() / 2);
    for (position, message) in messages.iter().enumerate() {
        match message {
            Message::Request {
                factory_name,
                request,
            } => open.push((position, factory_name.as_str(), request)),
            outcome => {
                let (position, factory_name, request) = open.pop().ok_or_else(inconsistent)?;
                paired.push((
                    position,
                    Exchange {
                        factory_name,
                        request,
                        outcome,
                    },
                ));
            }
        }
    }
    if !open.is_empty() {
        return Err(inconsistent());
    }
    paired.sort_by_key(|(position, _)| *position);
    Ok(paired.into_iter().map(|(_, exchange)| exchange).collect())
}

/// Serializable form of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub exchange_id: u64,
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    /// Base64-encoded.
    pub body: String,
}

/// Serializable form of an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeRecord {
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        /// Base64-encoded.
        body: String,
    },
    NoResponse,
    Failure {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub factory_name: String,
    pub request: RequestRecord,
    pub outcome: OutcomeRecord,
}

fn header_pairs(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

impl From<&Exchange<'_>> for ExchangeRecord {
    fn from(exchange: &Exchange<'_>) -> Self {
        let request = exchange.request;
        let outcome = match exchange.outcome {
            Message::Response(template) => OutcomeRecord::Response {
                status: template.status().as_u16(),
                headers: header_pairs(template.headers()),
                body: BASE64_STANDARD.encode(template.body()),
            },
            Message::Failure(message) => OutcomeRecord::Failure {
                message: message.clone(),
            },
            Message::NoResponse | Message::Request { .. } => OutcomeRecord::NoResponse,
        };
        Self {
            factory_name: exchange.factory_name.to_owned(),
            request: RequestRecord {
                exchange_id: request.exchange_id(),
                method: request.method.to_string(),
                target: request.target.clone(),
                headers: header_pairs(&request.headers),
                body: BASE64_STANDARD.encode(&request.body),
            },
            outcome,
        }
    }
}

impl RequestRecord {
    /// Rebuild the canonical request this record was taken from.
    pub fn to_request(&self) -> Result<CanonicalRequest, Error> {
        let body = BASE64_STANDARD
            .decode(&self.body)
            .map_err(|e| Error::RequestNormalization(format!("invalid recorded body: {}", e)))?;
        let mut builder = CanonicalRequest::builder(&self.method, self.target.clone());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(body).build()
    }
}

/// The inputs and outputs of one test run, including those of every depended-on-component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    /// What made the system-under-test ship this recording out, if anything.
    pub incident: Option<String>,
    pub sut_exchange: Option<ExchangeRecord>,
    pub doc_exchanges: Vec<ExchangeRecord>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Recording {
    /// Build a recording from a message log. Exchanges logged under `sut_factory` are
    /// the system-under-test's own; the first of them becomes the SUT exchange.
    pub fn from_messages(
        messages: &[Message],
        sut_factory: Option<&str>,
        incident: Option<String>,
    ) -> Result<Self, Error> {
        let mut sut_exchange = None;
        let mut doc_exchanges = Vec::new();
        for exchange in exchanges(messages)? {
            let record = ExchangeRecord::from(&exchange);
            if sut_exchange.is_none() && Some(exchange.factory_name) == sut_factory {
                sut_exchange = Some(record);
            } else {
                doc_exchanges.push(record);
            }
        }
        let created_at = UNIX_EPOCH
            .elapsed()
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Ok(Self {
            incident,
            sut_exchange,
            doc_exchanges,
            created_at,
        })
    }

    /// `true` if the system-under-test answered with a failure.
    pub fn raises(&self) -> bool {
        matches!(
            self.sut_exchange,
            Some(ExchangeRecord {
                outcome: OutcomeRecord::Failure { .. },
                ..
            })
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
