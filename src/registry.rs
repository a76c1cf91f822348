use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::error::{BoxError, Error};
use crate::factory::{RequestKey, Scope};
use crate::plugin::PluginRouter;
use crate::settings::{ConfigCascade, ScopeConfig, DEFAULT_SECTION};
use crate::store::{
    HandlerConstructor, HandlerContext, Session, SharedStore, Store, HTTP_FACTORY,
};
use crate::tracked::ResponseTrackingList;

type PluginConstructor = Arc<dyn Fn() -> Box<dyn PluginRouter> + Send + Sync>;

/// Test doubles registered for every test of a configuration section.
#[derive(Debug, Clone)]
struct DirectoryDouble {
    section: String,
    factory_name: String,
    key: RequestKey,
    responses: ResponseTrackingList,
}

#[derive(Default)]
struct RegistryState {
    config: ConfigCascade,
    plugins: HashMap<String, PluginConstructor>,
    handlers: HashMap<String, HandlerConstructor>,
    defaults: Vec<DirectoryDouble>,
    stores: HashMap<String, SharedStore>,
}

/// Holds the stores of the tests currently running, plus everything needed to set up a
/// new one: the configuration cascade, the catalog of request handlers and plugins, and
/// the test doubles shared by whole directories.
///
/// `Registry` is a cheap handle: clones share the same state.
///
/// ```rust
/// use mockmall::{CanonicalRequest, Registry, ResponseTrackingList, HTTP_FACTORY};
///
/// let registry = Registry::new();
/// let guard = registry.open_guarded("test_weather", "tests/weather").unwrap();
/// guard.store().write().unwrap().register(
///     CanonicalRequest::get("http://weather/today").unwrap(),
///     HTTP_FACTORY,
///     ResponseTrackingList::new(["sunny"]),
/// );
///
/// let actual = CanonicalRequest::get("http://weather/today").unwrap();
/// let response = guard
///     .store()
///     .write()
///     .unwrap()
///     .get_next_response(HTTP_FACTORY, &actual)
///     .unwrap();
/// assert_eq!(response.unwrap().body_text(), "sunny");
/// // Dropping the guard audits the store: every double was consumed.
/// ```
#[derive(Clone, Default)]
pub struct Registry(Arc<RwLock<RegistryState>>);

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConfigCascade) -> Self {
        let registry = Self::default();
        registry.0.write().expect("Poisoned lock!").config = config;
        registry
    }

    /// Load `config` into `section` of the configuration cascade. Stores that are
    /// already open keep the settings they were opened with.
    pub fn configure(&self, section: impl Into<String>, config: ScopeConfig) {
        self.0
            .write()
            .expect("Poisoned lock!")
            .config
            .load(section, config);
    }

    pub fn config(&self) -> ConfigCascade {
        self.0.read().expect("Poisoned lock!").config.clone()
    }

    /// Make a plugin available to the `plugins` configuration key under `name`. Every
    /// store whose settings name it mounts a fresh instance in the outbound HTTP factory.
    pub fn register_plugin<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn PluginRouter> + Send + Sync + 'static,
    {
        self.0
            .write()
            .expect("Poisoned lock!")
            .plugins
            .insert(name.into(), Arc::new(constructor));
    }

    /// Make a system-under-test constructor available to the `request_handler`
    /// configuration key under `name`.
    pub fn register_handler<T, F>(&self, name: impl Into<String>, constructor: F)
    where
        T: Any + Send + Sync,
        F: Fn(HandlerContext<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let constructor: HandlerConstructor = Arc::new(move |context: HandlerContext<'_>| {
            constructor(context).map(|sut| Arc::new(sut) as Arc<dyn Any + Send + Sync>)
        });
        self.0
            .write()
            .expect("Poisoned lock!")
            .handlers
            .insert(name.into(), constructor);
    }

    /// Register test doubles for every test opened in `section` (a directory, or
    /// [`DEFAULT_SECTION`] for all of them). They sit at [`Scope::Directory`], so any
    /// registration made by a test itself overrides them.
    pub fn register_default(
        &self,
        section: impl Into<String>,
        key: impl Into<RequestKey>,
        factory_name: impl Into<String>,
        responses: ResponseTrackingList,
    ) {
        self.0
            .write()
            .expect("Poisoned lock!")
            .defaults
            .push(DirectoryDouble {
                section: section.into(),
                factory_name: factory_name.into(),
                key: key.into(),
                responses,
            });
    }

    /// The store of `test_id`, created on first reference with the settings resolved for
    /// `directory`.
    pub fn open(&self, test_id: &str, directory: &str) -> Result<SharedStore, Error> {
        let mut state = self.0.write().expect("Poisoned lock!");
        if let Some(store) = state.stores.get(test_id) {
            return Ok(store.clone());
        }

        let settings = state.config.resolve(directory);
        let mut store = Store::new(test_id, settings.clone());
        if let Some(name) = &settings.request_handler {
            let handler = state.handlers.get(name).ok_or_else(|| {
                Error::Config(format!("no request handler is registered as `{}`", name))
                    .report(true)
            })?;
            store.set_handler(handler.clone());
        }
        for name in &settings.plugins {
            let constructor = state.plugins.get(name).ok_or_else(|| {
                Error::Config(format!("no plugin is registered as `{}`", name)).report(true)
            })?;
            store.mount_plugin(HTTP_FACTORY, constructor(), Scope::Directory);
        }
        // Directory doubles first: at equal scope the first registration wins.
        let sections = [directory, DEFAULT_SECTION];
        for section in sections {
            for default in state.defaults.iter().filter(|d| d.section == section) {
                store.update(
                    default.key.clone(),
                    &default.factory_name,
                    default.responses.clone(),
                    Scope::Directory,
                );
            }
            if directory == DEFAULT_SECTION {
                break;
            }
        }

        debug!("Opened store for test `{}` in `{}`.", test_id, directory);
        let store = store.shared();
        state.stores.insert(test_id.to_owned(), store.clone());
        Ok(store)
    }

    /// Like [`open`](Registry::open), returning a [`TestGuard`] that closes the store when
    /// dropped.
    pub fn open_guarded(&self, test_id: &str, directory: &str) -> Result<TestGuard, Error> {
        let store = self.open(test_id, directory)?;
        Ok(TestGuard {
            registry: self.clone(),
            test_id: test_id.to_owned(),
            store,
        })
    }

    pub fn store(&self, test_id: &str) -> Option<SharedStore> {
        self.0
            .read()
            .expect("Poisoned lock!")
            .stores
            .get(test_id)
            .cloned()
    }

    /// Discard the store of `test_id` after [verifying](Store::verify) it, unless a
    /// finished [`Session`] already did. Closing a test that is not open is a no-op.
    ///
    /// Poisoned locks are tolerated: a test that panicked mid-request still gets closed.
    pub fn close(&self, test_id: &str) -> Result<(), Error> {
        let removed = self
            .0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .stores
            .remove(test_id);
        let Some(store) = removed else {
            return Ok(());
        };
        debug!("Closing store for test `{}`.", test_id);
        let mut store = store.write().unwrap_or_else(PoisonError::into_inner);
        store.verify()
    }
}

/// Closes its test's store when dropped.
///
/// A failed audit panics, unless the thread is already panicking: the test has failed
/// already and the failure is only logged. Closing never panics on a poisoned store, so
/// a test that panics while holding the store lock fails normally.
pub struct TestGuard {
    registry: Registry,
    test_id: String,
    store: SharedStore,
}

impl TestGuard {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn session(&self) -> Result<Session, Error> {
        Session::enter(&self.store)
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        let Err(error) = self.registry.close(&self.test_id) else {
            return;
        };
        let received_requests = self
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .received_requests();
        let error_message = format!(
            "Verification failed for test `{}`:\n- {}\n\n{}",
            self.test_id, error, received_requests
        );
        if std::thread::panicking() {
            debug!("{}", &error_message);
        } else {
            panic!("{}", &error_message);
        }
    }
}
