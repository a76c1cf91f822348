use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mockmall::{
    CanonicalRequest, DoubleHttpClient, Error, Insertion, JsonFieldRouter, PluginRouter,
    Registry, ResponseTemplate, ResponseTrackingList, ScopeConfig, DEFAULT_SECTION, HTTP_FACTORY,
};
use serde_json::json;

fn get(target: &str) -> CanonicalRequest {
    CanonicalRequest::get(target).unwrap()
}

fn relaxed() -> ScopeConfig {
    ScopeConfig {
        assert_no_missing_calls: Some(false),
        assert_no_extra_calls: Some(false),
        ..ScopeConfig::default()
    }
}

#[test]
#[should_panic(expected = "the following test doubles were NOT used in this test")]
fn dropping_a_guard_panics_on_uncalled_doubles() {
    // Arrange
    let registry = Registry::new();
    let guard = registry.open_guarded("test_uncalled", "tests/x").unwrap();
    guard.store().write().unwrap().register(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["never"]),
    );

    // Act - we never call the double
}

#[test]
fn dropping_a_guard_only_warns_in_relaxed_directories() {
    let registry = Registry::new();
    registry.configure("tests/relaxed", relaxed());
    let guard = registry.open_guarded("test_relaxed", "tests/relaxed").unwrap();
    guard.store().write().unwrap().register(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["never"]),
    );
}

#[test]
#[should_panic(expected = "message log has an odd number of entries (1)")]
fn dropping_a_guard_panics_on_an_unanswered_request() {
    let registry = Registry::new();
    registry.configure(DEFAULT_SECTION, relaxed());
    let guard = registry.open_guarded("test_unanswered", "tests/x").unwrap();
    guard
        .store()
        .write()
        .unwrap()
        .register_inbound(get("http://sut/orders"));

    // Entering without finishing leaves the inbound request unanswered.
    let _session = guard.session().unwrap();
}

#[test]
#[should_panic(expected = "OverCalledTestDouble")]
fn a_strict_over_call_fails_only_its_own_test() {
    // Arrange
    let registry = Registry::new();
    let guard = registry.open_guarded("test_over_call", "tests/x").unwrap();
    let actual = get("http://svc/x");
    guard.store().write().unwrap().register(
        actual.clone(),
        HTTP_FACTORY,
        ResponseTrackingList::new(["ok"]),
    );

    // Act - the second call panics while the store is locked, poisoning it.
    for _ in 0..2 {
        guard
            .store()
            .write()
            .unwrap()
            .get_next_response(HTTP_FACTORY, &actual)
            .unwrap();
    }
}

#[test]
fn a_poisoned_store_can_still_be_closed() {
    let registry = Registry::new();
    let store = registry.open("test_poisoned", "tests/x").unwrap();
    let poisoner = store.clone();
    std::thread::spawn(move || {
        let _lock = poisoner.write().unwrap();
        panic!("the test body failed");
    })
    .join()
    .unwrap_err();
    assert!(store.is_poisoned());

    assert!(registry.close("test_poisoned").is_ok());
    assert!(registry.store("test_poisoned").is_none());
}

#[test]
fn a_failed_session_audit_is_not_repeated_at_teardown() {
    // Arrange
    let registry = Registry::new();
    let guard = registry.open_guarded("test_audit_once", "tests/x").unwrap();
    {
        let mut store = guard.store().write().unwrap();
        store.register_inbound(get("http://sut/orders"));
        store.register(
            get("http://svc/x"),
            HTTP_FACTORY,
            ResponseTrackingList::new(["never"]),
        );
    }
    let session = guard.session().unwrap();

    // Act
    let outcome = session.finish(Ok(ResponseTemplate::new(200)));

    // Assert
    assert!(matches!(outcome, Err(Error::UnCalledTestDouble(_))));
    // Dropping the guard must not fail the test a second time.
    drop(guard);
    assert!(registry.store("test_audit_once").is_none());
}

#[test]
fn closing_reports_uncalled_doubles() {
    let registry = Registry::new();
    let store = registry.open("test_close", "tests/x").unwrap();
    store.write().unwrap().register(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["never"]),
    );

    let outcome = registry.close("test_close");

    assert!(matches!(outcome, Err(Error::UnCalledTestDouble(_))));
    assert!(registry.store("test_close").is_none());
}

#[test]
fn directory_sections_override_the_default_section() {
    // Arrange
    let registry = Registry::new();
    registry.configure(DEFAULT_SECTION, relaxed());
    registry.configure(
        "tests/strict",
        ScopeConfig {
            assert_no_extra_calls: Some(true),
            ..ScopeConfig::default()
        },
    );

    // Act
    let strict = registry.open("a", "tests/strict").unwrap();
    let other = registry.open("b", "tests/other").unwrap();

    // Assert
    let strict = strict.read().unwrap();
    assert!(strict.settings().assert_no_extra_calls);
    assert!(!strict.settings().assert_no_missing_calls);
    assert!(!other.read().unwrap().settings().assert_no_extra_calls);
}

#[test]
fn test_registrations_override_directory_doubles() {
    // Arrange
    let registry = Registry::new();
    registry.register_default(
        "tests/weather",
        get("http://weather/today"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["directory"]),
    );
    registry.register_default(
        DEFAULT_SECTION,
        get("http://weather/today"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["everywhere"]),
    );
    let guard = registry.open_guarded("test_weather", "tests/weather").unwrap();
    let mut store = guard.store().write().unwrap();

    // Act
    let outcome = store.register(
        get("http://weather/today"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["test"]),
    );
    let response = store
        .get_next_response(HTTP_FACTORY, &get("http://weather/today"))
        .unwrap();
    drop(store);

    // Assert
    assert_eq!(outcome, Insertion::Replaced);
    assert_eq!(response.unwrap().body_text(), "test");
}

#[test]
fn directory_doubles_win_over_default_section_doubles() {
    let registry = Registry::new();
    registry.configure(DEFAULT_SECTION, relaxed());
    registry.register_default(
        DEFAULT_SECTION,
        get("http://weather/today"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["everywhere"]),
    );
    registry.register_default(
        "tests/weather",
        get("http://weather/today"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["directory"]),
    );

    let store = registry.open("test_weather", "tests/weather").unwrap();
    let response = store
        .write()
        .unwrap()
        .get_next_response(HTTP_FACTORY, &get("http://weather/today"))
        .unwrap();

    assert_eq!(response.unwrap().body_text(), "directory");
}

#[test]
fn configured_plugins_are_mounted_in_every_store() {
    // Arrange
    let registry = Registry::new();
    registry.register_plugin("gateway", || {
        Box::new(
            JsonFieldRouter::new("gateway", "gateway/rpc", "/service", "/params/id")
                .route("maps", "*", ResponseTrackingList::new(["any map"])),
        ) as Box<dyn PluginRouter>
    });
    registry.configure(
        DEFAULT_SECTION,
        ScopeConfig {
            plugins: Some(vec!["gateway".into()]),
            ..ScopeConfig::default()
        },
    );
    let guard = registry.open_guarded("test_gateway", "tests/x").unwrap();
    let request = CanonicalRequest::builder("POST", "http://gateway/rpc")
        .json(&json!({ "service": "maps", "params": { "id": 1 } }))
        .build()
        .unwrap();

    // Act
    let response = guard
        .store()
        .write()
        .unwrap()
        .get_next_response(HTTP_FACTORY, &request)
        .unwrap();

    // Assert
    assert_eq!(response.unwrap().body_text(), "any map");
}

#[test]
fn unknown_plugins_are_config_errors() {
    let registry = Registry::new();
    registry.configure(
        "tests/x",
        ScopeConfig {
            plugins: Some(vec!["missing".into()]),
            ..ScopeConfig::default()
        },
    );

    assert!(matches!(registry.open("t", "tests/x"), Err(Error::Config(_))));
}

struct OrderService {
    #[allow(dead_code)]
    client: DoubleHttpClient,
    region: Option<String>,
    order_id: String,
}

fn orders_registry() -> Registry {
    let registry = Registry::new();
    registry.register_handler("orders", |context| {
        Ok(OrderService {
            client: DoubleHttpClient::new(context.store.clone()),
            region: context.env_vars.get("REGION").cloned(),
            order_id: context.request.target.rsplit('/').next().unwrap_or_default().to_owned(),
        })
    });
    registry.configure(
        DEFAULT_SECTION,
        ScopeConfig {
            request_handler: Some("orders".into()),
            env_vars: Some([("REGION".to_owned(), "eu".to_owned())].into_iter().collect()),
            ..ScopeConfig::default()
        },
    );
    registry
}

#[test]
fn the_system_under_test_is_built_once_from_the_inbound_request() {
    // Arrange
    let registry = orders_registry();
    let guard = registry.open_guarded("test_orders", "tests/orders").unwrap();
    guard
        .store()
        .write()
        .unwrap()
        .register_inbound(get("http://sut/orders/42"));
    let session = guard.session().unwrap();

    // Act
    let first = session.sut::<OrderService>().unwrap();
    let second = session.sut::<OrderService>().unwrap();

    // Assert
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.order_id, "42");
    assert_eq!(first.region.as_deref(), Some("eu"));
    let response = session.finish(Ok(ResponseTemplate::new(204))).unwrap();
    assert_eq!(response.status(), 204);
}

#[test]
fn asking_for_the_wrong_type_is_a_config_error() {
    let registry = orders_registry();
    let guard = registry.open_guarded("test_orders", "tests/orders").unwrap();
    guard
        .store()
        .write()
        .unwrap()
        .register_inbound(get("http://sut/orders/42"));
    let session = guard.session().unwrap();

    assert!(matches!(session.sut::<String>(), Err(Error::Config(_))));
    session.finish(Ok(ResponseTemplate::new(204))).unwrap();
}

#[test]
fn a_system_under_test_needs_a_request_handler() {
    let registry = Registry::new();
    let guard = registry.open_guarded("test_no_handler", "tests/x").unwrap();
    guard
        .store()
        .write()
        .unwrap()
        .register_inbound(get("http://sut/orders/42"));
    let session = guard.session().unwrap();

    assert!(matches!(session.sut::<OrderService>(), Err(Error::MissingHandler)));
    session.finish(Err(Error::MissingHandler)).unwrap_err();
}

#[test]
fn concurrent_callers_build_the_system_under_test_once() {
    // Arrange
    let builds = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    let counter = builds.clone();
    registry.register_handler("counted", move |_context| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        Ok(String::from("sut"))
    });
    registry.configure(
        DEFAULT_SECTION,
        ScopeConfig {
            request_handler: Some("counted".into()),
            ..ScopeConfig::default()
        },
    );
    let guard = registry.open_guarded("test_counted", "tests/x").unwrap();
    guard
        .store()
        .write()
        .unwrap()
        .register_inbound(get("http://sut/orders"));
    let session = guard.session().unwrap();

    // Act
    let handles: Vec<Arc<String>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| session.sut::<String>().unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    // Assert
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(handles.iter().all(|sut| Arc::ptr_eq(sut, &handles[0])));
    session.finish(Ok(ResponseTemplate::new(200))).unwrap();
}
