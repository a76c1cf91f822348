//! The per-test container of test doubles.
//!
//! A [`Store`] holds one [`FactoryTable`] per integration point, keyed by factory name,
//! together with the settings resolved for its test, the handle of the
//! system-under-test and the message log. Adapters hand every intercepted call to
//! [`Store::get_next_response`]; teardown runs [`Store::verify`].
use std::any::{type_name, Any};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use log::debug;
use once_cell::sync::OnceCell;

use crate::error::{BoxError, Error};
use crate::factory::{Entry, Expectation, FactoryTable, Insertion, Scope};
use crate::plugin::{PluginRouter, Routed};
use crate::recording::{exchanges, Exchange, Message, Recording};
use crate::request::CanonicalRequest;
use crate::response_template::ResponseTemplate;
use crate::settings::Settings;
use crate::tracked::ResponseTrackingList;
use crate::verification::UncalledReport;

/// Factory of outbound HTTP doubles. Every store has one, even if empty.
pub const HTTP_FACTORY: &str = "mock_http_server";
/// Factory of outbound SMTP doubles.
pub const SMTP_FACTORY: &str = "smtp";
/// Factory holding the expected inbound request to the system-under-test. It is never
/// audited.
pub const INBOUND_FACTORY: &str = "inbound_request";

pub type SharedStore = Arc<RwLock<Store>>;

/// What a request handler constructor gets to build the system-under-test from.
pub struct HandlerContext<'a> {
    /// The inbound request registered for the test.
    pub request: &'a CanonicalRequest,
    pub env_vars: &'a BTreeMap<String, String>,
    /// The store the system-under-test's doubled clients should resolve through.
    pub store: &'a SharedStore,
}

pub(crate) type HandlerConstructor =
    Arc<dyn Fn(HandlerContext<'_>) -> Result<Arc<dyn Any + Send + Sync>, BoxError> + Send + Sync>;

pub struct Store {
    test_id: String,
    settings: Settings,
    factories: BTreeMap<String, FactoryTable>,
    written: BTreeSet<String>,
    handler: Option<HandlerConstructor>,
    sut: Arc<OnceCell<Arc<dyn Any + Send + Sync>>>,
    messages: Vec<Message>,
    verified: bool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("test_id", &self.test_id)
            .field("settings", &self.settings)
            .field("factories", &self.factories)
            .field("has_handler", &self.handler.is_some())
            .field("has_sut", &self.sut.get().is_some())
            .field("messages", &self.messages.len())
            .finish()
    }
}

fn tolerate(error: Error, strict: bool) -> Result<Option<ResponseTemplate>, Error> {
    let error = error.report(strict);
    if strict {
        Err(error)
    } else {
        Ok(None)
    }
}

impl Store {
    pub fn new(test_id: impl Into<String>, settings: Settings) -> Self {
        let mut factories = BTreeMap::new();
        factories.insert(HTTP_FACTORY.to_owned(), FactoryTable::new());
        Self {
            test_id: test_id.into(),
            settings,
            factories,
            written: BTreeSet::new(),
            handler: None,
            sut: Arc::default(),
            messages: Vec::new(),
            verified: false,
        }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Environment variables the system-under-test should run with.
    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.settings.env_vars
    }

    pub fn factory(&self, factory_name: &str) -> Option<&FactoryTable> {
        self.factories.get(factory_name)
    }

    /// Names of the factories test doubles were registered in.
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.written.iter().map(String::as_str)
    }

    /// The append-only log of every request resolved through this store, each followed
    /// by its outcome.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn set_handler(&mut self, handler: HandlerConstructor) {
        self.handler = Some(handler);
    }

    /// Register `responses` for `expectation` in `factory_name`, at test scope.
    pub fn register(
        &mut self,
        expectation: impl Into<Expectation>,
        factory_name: &str,
        responses: ResponseTrackingList,
    ) -> Insertion {
        self.update(expectation, factory_name, responses, Scope::Test)
    }

    /// Register `entry` for `expectation` in `factory_name`, creating the factory if
    /// needed.
    ///
    /// An equivalent expectation already present in the factory is overridden only by a
    /// registration at a more specific [`Scope`], unless it has no doubles yet.
    pub fn update(
        &mut self,
        expectation: impl Into<Expectation>,
        factory_name: &str,
        entry: impl Into<Entry>,
        scope: Scope,
    ) -> Insertion {
        let expectation = expectation.into();
        debug!(
            "Registering test doubles for {} in factory `{}` ({:?} scope).",
            expectation, factory_name, scope
        );
        self.written.insert(factory_name.to_owned());
        self.factories
            .entry(factory_name.to_owned())
            .or_default()
            .insert(expectation, scope, entry.into(), &self.settings.wildcard_fields)
    }

    /// Mount `plugin` in `factory_name` under its own route key.
    pub fn mount_plugin(
        &mut self,
        factory_name: &str,
        plugin: Box<dyn PluginRouter>,
        scope: Scope,
    ) -> Insertion {
        let key = plugin.route_key();
        self.update(key, factory_name, Entry::Plugin(plugin), scope)
    }

    /// Register the request the system-under-test is expected to receive.
    pub fn register_inbound(&mut self, request: CanonicalRequest) -> Insertion {
        self.update(
            request,
            INBOUND_FACTORY,
            ResponseTrackingList::default(),
            Scope::Test,
        )
    }

    pub fn inbound_request(&self) -> Option<&CanonicalRequest> {
        self.factories
            .get(INBOUND_FACTORY)?
            .slots()
            .find_map(|slot| slot.expectation.key().as_request())
    }

    /// Resolve `actual` against the doubles registered in `factory_name` and consume the
    /// next response.
    ///
    /// `Ok(None)` means no double was found and `assert_no_missing_calls` is off: adapters
    /// treat it like a `404`. The request and its outcome are appended to the message log
    /// whatever the outcome.
    pub fn get_next_response(
        &mut self,
        factory_name: &str,
        actual: &CanonicalRequest,
    ) -> Result<Option<ResponseTemplate>, Error> {
        debug!(
            "Handling request for factory `{}`:\n{}",
            factory_name,
            actual.describe(self.settings.body_print_limit)
        );
        let outcome = self.resolve(factory_name, actual);
        self.messages.push(Message::Request {
            factory_name: factory_name.to_owned(),
            request: actual.clone(),
        });
        self.log_outcome(&outcome);
        outcome
    }

    fn resolve(
        &mut self,
        factory_name: &str,
        actual: &CanonicalRequest,
    ) -> Result<Option<ResponseTemplate>, Error> {
        let strict = self.settings.assert_no_missing_calls;
        let policy = self.settings.consumption_policy();
        let Some(table) = self.factories.get_mut(factory_name) else {
            let error = Error::MissingFactory {
                factory_name: factory_name.to_owned(),
            };
            return tolerate(error, strict);
        };
        let missing = || Error::MissingTestDouble {
            factory_name: factory_name.to_owned(),
            request: actual.to_string(),
        };
        let Some(slot) = table.route(actual, &self.settings.wildcard_fields) else {
            return tolerate(missing(), strict);
        };

        match &mut slot.entry {
            Entry::Tracked(list) => list.consume(actual, policy),
            Entry::Plugin(plugin) => {
                let plugin_name = plugin.name().to_owned();
                match plugin.get_plugin_responses(actual) {
                    Ok(Routed::Tracked(list)) => list.consume(actual, policy),
                    Ok(Routed::Response(response)) => Ok(Some(response)),
                    Ok(Routed::Unrouted) => tolerate(missing(), strict),
                    Err(source) => Err(match source.downcast::<Error>() {
                        Ok(error) => *error,
                        Err(source) => Error::unhandled_plugin(&plugin_name, source).report(true),
                    }),
                }
            }
        }
    }

    fn log_outcome(&mut self, outcome: &Result<Option<ResponseTemplate>, Error>) {
        self.messages.push(match outcome {
            Ok(Some(response)) => Message::Response(response.clone()),
            Ok(None) => Message::NoResponse,
            Err(error) => Message::Failure(error.to_string()),
        });
    }

    /// Audit the store for test doubles that were never consumed.
    ///
    /// The inbound request factory and plugins are skipped. Uncalled doubles are an
    /// error if `assert_no_missing_calls` is set and a warning otherwise.
    pub fn check_no_uncalled_test_doubles(&self) -> Result<(), Error> {
        let mut report = UncalledReport::default();
        for (factory_name, table) in &self.factories {
            if factory_name == INBOUND_FACTORY {
                continue;
            }
            for slot in table.slots() {
                let Entry::Tracked(list) = &slot.entry else {
                    continue;
                };
                let unconsumed = list.unconsumed();
                if !unconsumed.is_empty() {
                    report.push(
                        factory_name,
                        slot.expectation.to_string(),
                        unconsumed.iter().map(ToString::to_string).collect(),
                    );
                }
            }
        }
        if report.is_empty() {
            return Ok(());
        }
        let strict = self.settings.assert_no_missing_calls;
        let error = Error::UnCalledTestDouble(report).report(strict);
        if strict {
            Err(error)
        } else {
            Ok(())
        }
    }

    /// An odd-length message log means a request was never answered. Always fatal.
    pub fn check_message_parity(&self) -> Result<(), Error> {
        if self.messages.len() % 2 == 0 {
            Ok(())
        } else {
            Err(Error::InconsistentMessageLog(self.messages.len()).report(true))
        }
    }

    /// Check the message log, then audit for uncalled test doubles.
    ///
    /// Only the first call checks anything: a store is verified once, whether by
    /// [`Session::finish`] or at teardown.
    pub fn verify(&mut self) -> Result<(), Error> {
        if std::mem::replace(&mut self.verified, true) {
            return Ok(());
        }
        self.check_message_parity()?;
        self.check_no_uncalled_test_doubles()
    }

    pub fn exchanges(&self) -> Result<Vec<Exchange<'_>>, Error> {
        exchanges(&self.messages)
    }

    pub fn recording(&self, incident: Option<String>) -> Result<Recording, Error> {
        Recording::from_messages(&self.messages, Some(INBOUND_FACTORY), incident)
    }

    /// The requests seen so far, one per line, for diagnostics.
    pub(crate) fn received_requests(&self) -> String {
        let requests: Vec<_> = self
            .messages
            .iter()
            .filter_map(|message| match message {
                Message::Request {
                    factory_name,
                    request,
                } => Some((factory_name, request)),
                _ => None,
            })
            .collect();
        if requests.is_empty() {
            return "No request was resolved through this store.".into();
        }
        let listed: String = requests
            .iter()
            .enumerate()
            .map(|(index, (factory_name, request))| {
                format!(
                    "- Request #{} ({})\n\t{}\n",
                    index + 1,
                    factory_name,
                    request.describe(self.settings.body_print_limit)
                )
            })
            .collect();
        format!("Received requests:\n{}", listed)
    }
}

/// The system-under-test's own exchange, captured around the test body.
///
/// Entering logs the inbound request; [`finish`](Session::finish) logs what the
/// system-under-test answered, checks the message log and audits the store. The
/// exchanges with depended-on-components logged in between end up nested inside it.
#[derive(Debug)]
pub struct Session {
    store: SharedStore,
    request: CanonicalRequest,
}

impl Session {
    /// Fails with [`Error::MissingHandler`] if no inbound request was registered.
    pub fn enter(store: &SharedStore) -> Result<Self, Error> {
        let mut guard = store.write().expect("Poisoned lock!");
        let request = guard
            .inbound_request()
            .cloned()
            .ok_or_else(|| Error::MissingHandler.report(true))?;
        debug!("Entering session for test `{}` with {}.", guard.test_id, request);
        guard.messages.push(Message::Request {
            factory_name: INBOUND_FACTORY.to_owned(),
            request: request.clone(),
        });
        drop(guard);
        Ok(Self {
            store: store.clone(),
            request,
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn request(&self) -> &CanonicalRequest {
        &self.request
    }

    /// The system-under-test, built at most once per store by the configured request
    /// handler.
    pub fn sut<T: Any + Send + Sync>(&self) -> Result<Arc<T>, Error> {
        let (cell, constructor, env_vars) = {
            let store = self.store.read().expect("Poisoned lock!");
            (
                store.sut.clone(),
                store.handler.clone(),
                store.settings.env_vars.clone(),
            )
        };
        // The constructor runs without the store lock: it may need the store itself.
        let sut = cell.get_or_try_init(|| {
            let constructor = constructor.ok_or_else(|| Error::MissingHandler.report(true))?;
            constructor(HandlerContext {
                request: &self.request,
                env_vars: &env_vars,
                store: &self.store,
            })
            .map_err(|e| Error::Injected(Arc::from(e)).report(true))
        })?;
        downcast(sut.clone())
    }

    /// Log the system-under-test's answer, then [`verify`](Store::verify) the store.
    /// Returns `outcome` unless verification fails.
    pub fn finish(
        self,
        outcome: Result<ResponseTemplate, Error>,
    ) -> Result<ResponseTemplate, Error> {
        let mut store = self.store.write().expect("Poisoned lock!");
        let logged = outcome.clone().map(Some);
        store.log_outcome(&logged);
        debug!("Leaving session for test `{}`.", store.test_id);
        store.verify()?;
        outcome
    }
}

fn downcast<T: Any + Send + Sync>(sut: Arc<dyn Any + Send + Sync>) -> Result<Arc<T>, Error> {
    sut.downcast::<T>().map_err(|_| {
        Error::Config(format!(
            "the configured request handler does not build a `{}`",
            type_name::<T>()
        ))
        .report(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(target: &str) -> CanonicalRequest {
        CanonicalRequest::get(target).unwrap()
    }

    #[test]
    fn every_store_has_an_http_factory() {
        let store = Store::new("t", Settings::default());
        assert!(store.factory(HTTP_FACTORY).is_some());
        assert_eq!(store.written().count(), 0);
    }

    #[test]
    fn unknown_factories_are_missing() {
        let mut store = Store::new("t", Settings::default());
        let outcome = store.get_next_response(SMTP_FACTORY, &get("mailto:a@b.c"));
        assert!(matches!(outcome, Err(Error::MissingFactory { .. })));
        assert_eq!(store.messages().len(), 2);
    }

    #[test]
    fn the_inbound_factory_is_not_audited() {
        let mut store = Store::new("t", Settings::default());
        store.register_inbound(get("http://sut/orders"));
        assert!(store.check_no_uncalled_test_doubles().is_ok());
        assert_eq!(store.inbound_request().unwrap().target, "http://sut/orders");
    }

    #[test]
    fn odd_message_logs_are_fatal() {
        let store = Store::new("t", Settings::relaxed()).shared();
        store.write().unwrap().register_inbound(get("http://sut/orders"));

        let _session = Session::enter(&store).unwrap();

        let outcome = store.read().unwrap().check_message_parity();
        assert!(matches!(outcome, Err(Error::InconsistentMessageLog(1))));
    }

    #[test]
    fn stores_are_verified_once() {
        let mut store = Store::new("t", Settings::default());
        store.register(
            get("http://svc/x"),
            HTTP_FACTORY,
            ResponseTrackingList::new(["never"]),
        );

        assert!(matches!(store.verify(), Err(Error::UnCalledTestDouble(_))));
        assert!(store.verify().is_ok());
    }

    #[test]
    fn sessions_require_an_inbound_request() {
        let store = Store::new("t", Settings::default()).shared();
        assert!(matches!(Session::enter(&store), Err(Error::MissingHandler)));
    }
}
