//! SMTP doubles.
//!
//! An outgoing mail is canonicalized as a request with the `SENDMAIL` method, a
//! `mailto:` target listing the recipients, the sender in a `from` header and the raw
//! message as body. Expectations are therefore keyed on the recipient list, e.g.
//! `mailto:ops@example.com`, or `mailto:*` for any recipients.
//!
//! Replies are [`ResponseTemplate`]s whose status is the SMTP reply code and whose body is
//! the reply text; see [`reply`].
use crate::error::Error;
use crate::request::CanonicalRequest;
use crate::response_template::ResponseTemplate;
use crate::store::{SharedStore, SMTP_FACTORY};

pub const SENDMAIL: &str = "SENDMAIL";

/// A reply from the mail server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    /// 2xx and 3xx replies accept the mail.
    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }
}

impl From<ResponseTemplate> for Reply {
    fn from(template: ResponseTemplate) -> Self {
        Self {
            code: template.status().as_u16(),
            text: template.body_text(),
        }
    }
}

/// An SMTP reply test double.
pub fn reply(code: u16, text: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_string(text.into())
}

fn mailto(to_addrs: &[&str]) -> String {
    format!("mailto:{}", to_addrs.join(","))
}

/// The canonical request for sending `msg` from `from_addr` to `to_addrs`.
pub fn smtp_request(from_addr: &str, to_addrs: &[&str], msg: &[u8]) -> Result<CanonicalRequest, Error> {
    CanonicalRequest::builder(SENDMAIL, mailto(to_addrs))
        .header("from", from_addr)
        .body(msg)
        .build()
}

/// The expectation for a mail sent to `to_addrs`, whoever sends it.
pub fn expect_mail(to_addrs: &[&str]) -> Result<CanonicalRequest, Error> {
    CanonicalRequest::builder(SENDMAIL, mailto(to_addrs)).build()
}

/// The seam through which a system-under-test sends mail.
pub trait Mailer: Send + Sync {
    fn send_mail(&self, from_addr: &str, to_addrs: &[&str], msg: &[u8]) -> Result<Reply, Error>;
}

/// A [`Mailer`] answering from the `smtp` factory of a store.
///
/// A mail with no matching double is refused with `550` when `assert_no_missing_calls`
/// is off.
#[derive(Debug, Clone)]
pub struct DoubleMailer {
    store: SharedStore,
}

impl DoubleMailer {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl Mailer for DoubleMailer {
    fn send_mail(&self, from_addr: &str, to_addrs: &[&str], msg: &[u8]) -> Result<Reply, Error> {
        let request = smtp_request(from_addr, to_addrs, msg)?;
        let resolved = self
            .store
            .write()
            .expect("Poisoned lock!")
            .get_next_response(SMTP_FACTORY, &request)?;
        Ok(resolved
            .unwrap_or_else(|| reply(550, "Requested action not taken: mailbox unavailable"))
            .into())
    }
}
