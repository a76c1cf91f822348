use std::io::ErrorKind;

use mockmall::matchers::{body_partial_json, header};
use mockmall::{
    BoxError, CanonicalRequest, Double, Error, Expectation, Insertion, JsonFieldRouter,
    Message, OverCallRepeat, PluginRouter, RequestKey, ResponseTemplate, ResponseTrackingList,
    Routed, Scope, Settings, Store, HTTP_FACTORY, SMTP_FACTORY,
};
use serde_json::json;

fn get(target: &str) -> CanonicalRequest {
    CanonicalRequest::get(target).unwrap()
}

fn strict() -> Store {
    Store::new("test", Settings::default())
}

fn relaxed() -> Store {
    Store::new("test", Settings::relaxed())
}

fn body(outcome: Result<Option<ResponseTemplate>, Error>) -> String {
    outcome.unwrap().unwrap().body_text()
}

#[test]
fn a_double_is_consumed_once_then_over_called() {
    // Arrange
    let mut store = strict();
    store.register(get("http://svc/x"), HTTP_FACTORY, ResponseTrackingList::new(["ok"]));

    // Act
    let first = store.get_next_response(HTTP_FACTORY, &get("http://svc/x"));
    let second = store.get_next_response(HTTP_FACTORY, &get("http://svc/x"));

    // Assert
    assert_eq!(body(first), "ok");
    assert!(matches!(
        second,
        Err(Error::OverCalledTestDouble { expected: 1, .. })
    ));
}

#[test]
fn equivalent_registrations_create_a_single_entry() {
    let mut store = strict();

    store.register(
        get("http://svc/x?a=1&b=2"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["first"]),
    );
    let outcome = store.register(
        get("http://svc/x?b=2&a=1"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["second"]),
    );

    assert_eq!(outcome, Insertion::Ignored);
    assert_eq!(store.factory(HTTP_FACTORY).unwrap().len(), 1);
    assert_eq!(
        body(store.get_next_response(HTTP_FACTORY, &get("http://svc/x?a=1&b=2"))),
        "first"
    );
}

#[test]
fn doubles_are_consumed_in_declaration_order() {
    // Arrange
    let mut store = strict();
    store.register(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["R1", "R2", "R3"]),
    );
    store.register(get("http://svc/y"), HTTP_FACTORY, ResponseTrackingList::new(["other"]));

    // Act
    let calls = ["http://svc/x", "http://svc/y", "http://svc/x", "http://svc/x"];
    let bodies: Vec<_> = calls
        .iter()
        .map(|target| body(store.get_next_response(HTTP_FACTORY, &get(target))))
        .collect();

    // Assert
    assert_eq!(bodies, vec!["R1", "other", "R2", "R3"]);
}

#[test]
fn over_calls_fail_when_extra_calls_are_asserted() {
    let mut store = strict();
    store.register(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["R1", "R2", "R3"]),
    );
    for _ in 0..3 {
        store.get_next_response(HTTP_FACTORY, &get("http://svc/x")).unwrap();
    }

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/x"));

    assert!(matches!(
        outcome,
        Err(Error::OverCalledTestDouble { expected: 3, .. })
    ));
}

#[test]
fn over_calls_repeat_the_last_double_when_tolerated() {
    let mut store = relaxed();
    store.register(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["R1", "R2", "R3"]),
    );
    for _ in 0..3 {
        store.get_next_response(HTTP_FACTORY, &get("http://svc/x")).unwrap();
    }

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/x"));

    assert_eq!(body(outcome), "R3");
}

#[test]
fn the_over_call_repeat_policy_is_configurable() {
    let settings = Settings {
        over_call_repeat: OverCallRepeat::LastRealized,
        ..Settings::relaxed()
    };
    let mut store = Store::new("test", settings);
    let echo = Double::computed(|request: &CanonicalRequest| {
        ResponseTemplate::ok(request.target.clone())
    });
    store.register(
        RequestKey::Pattern("svc/items".into()),
        HTTP_FACTORY,
        ResponseTrackingList::new([echo]),
    );

    store.get_next_response(HTTP_FACTORY, &get("http://svc/items/1")).unwrap();
    let repeated = store.get_next_response(HTTP_FACTORY, &get("http://svc/items/2"));

    assert_eq!(body(repeated), "http://svc/items/1");
}

#[test]
fn the_audit_reports_every_unconsumed_double() {
    // Arrange
    let mut store = strict();
    store.register(get("http://svc/x"), HTTP_FACTORY, ResponseTrackingList::new(["R1", "R2"]));
    store.get_next_response(HTTP_FACTORY, &get("http://svc/x")).unwrap();

    // Act
    let outcome = store.check_no_uncalled_test_doubles();

    // Assert
    let Err(Error::UnCalledTestDouble(report)) = outcome else {
        panic!("expected an uncalled test double report");
    };
    assert_eq!(report.factories().collect::<Vec<_>>(), vec![HTTP_FACTORY]);
    let entries = report.get(HTTP_FACTORY).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request, "GET http://svc/x");
    assert_eq!(entries[0].doubles, vec!["200 R2".to_owned()]);
}

#[test]
fn the_audit_only_warns_when_missing_calls_are_tolerated() {
    let mut store = relaxed();
    store.register(get("http://svc/x"), HTTP_FACTORY, ResponseTrackingList::new(["R1", "R2"]));
    store.get_next_response(HTTP_FACTORY, &get("http://svc/x")).unwrap();

    assert!(store.check_no_uncalled_test_doubles().is_ok());
}

#[test]
fn the_message_log_always_has_an_even_length() {
    let mut store = relaxed();
    store.register(get("http://svc/x"), HTTP_FACTORY, ResponseTrackingList::new(["R1"]));

    for target in ["http://svc/x", "http://svc/x", "http://svc/unknown"] {
        let _ = store.get_next_response(HTTP_FACTORY, &get(target));
        assert_eq!(store.messages().len() % 2, 0);
    }
    let _ = store.get_next_response(SMTP_FACTORY, &get("mailto:a@b.c"));

    assert_eq!(store.messages().len(), 8);
    assert!(store.check_message_parity().is_ok());
    assert_eq!(store.exchanges().unwrap().len(), 4);
}

#[test]
fn unregistered_requests_resolve_to_nothing_when_tolerated() {
    let mut store = relaxed();

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/x"));

    assert!(matches!(outcome, Ok(None)));
    assert!(matches!(store.messages()[1], Message::NoResponse));
}

#[test]
fn unregistered_requests_are_missing_test_doubles_when_asserted() {
    let mut store = strict();

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/x"));

    assert!(matches!(outcome, Err(Error::MissingTestDouble { .. })));
    assert!(matches!(store.messages()[1], Message::Failure(_)));
}

#[test]
fn a_wildcard_query_absorbs_any_query() {
    let mut store = strict();
    store.register(get("http://svc/x?*"), HTTP_FACTORY, ResponseTrackingList::new(["wild"]));

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/x?foo=bar"));

    assert_eq!(body(outcome), "wild");
}

#[test]
fn more_specific_scopes_override_registrations_in_any_order() {
    let mut store = strict();
    store.update(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["group"]),
        Scope::Group,
    );

    let outcome = store.register(get("http://svc/x"), HTTP_FACTORY, ResponseTrackingList::new(["test"]));
    let late_group = store.update(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new(["late group"]),
        Scope::Group,
    );

    assert_eq!(outcome, Insertion::Replaced);
    assert_eq!(late_group, Insertion::Ignored);
    assert_eq!(body(store.get_next_response(HTTP_FACTORY, &get("http://svc/x"))), "test");
}

#[test]
fn extra_matchers_split_requests_to_the_same_endpoint() {
    // Arrange
    let mut store = strict();
    let orders = || CanonicalRequest::post("http://svc/orders", "").unwrap();
    store.register(
        Expectation::given(orders()).and(header("x-tenant", "a")),
        HTTP_FACTORY,
        ResponseTrackingList::new(["tenant a"]),
    );
    store.register(
        Expectation::given(orders()).and(body_partial_json(json!({ "priority": "high" }))),
        HTTP_FACTORY,
        ResponseTrackingList::new(["urgent"]),
    );

    // Act
    let urgent = CanonicalRequest::builder("POST", "http://svc/orders")
        .json(&json!({ "priority": "high", "items": [1, 2] }))
        .build()
        .unwrap();
    let tenant_a = CanonicalRequest::builder("POST", "http://svc/orders")
        .header("x-tenant", "a")
        .build()
        .unwrap();

    // Assert
    assert_eq!(body(store.get_next_response(HTTP_FACTORY, &urgent)), "urgent");
    assert_eq!(body(store.get_next_response(HTTP_FACTORY, &tenant_a)), "tenant a");
}

#[test]
fn raised_errors_are_handed_back_and_logged() {
    let mut store = strict();
    let refused = std::io::Error::new(ErrorKind::ConnectionRefused, "connection refused");
    store.register(
        get("http://svc/x"),
        HTTP_FACTORY,
        ResponseTrackingList::new([Double::raises(refused)]),
    );

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/x"));

    let Err(Error::Injected(error)) = outcome else {
        panic!("expected the injected error");
    };
    assert_eq!(error.to_string(), "connection refused");
    assert!(store.check_no_uncalled_test_doubles().is_ok());
}

fn gateway() -> JsonFieldRouter {
    JsonFieldRouter::new("gateway", "gateway/rpc", "/service", "/params/id")
        .route("maps", "3", ResponseTrackingList::new(["map 3"]))
        .route("maps", "*", ResponseTrackingList::new(["any map"]))
}

fn rpc(body: serde_json::Value) -> CanonicalRequest {
    CanonicalRequest::builder("POST", "http://gateway/rpc")
        .json(&body)
        .build()
        .unwrap()
}

#[test]
fn plugins_route_requests_on_their_own() {
    let mut store = strict();
    store.mount_plugin(HTTP_FACTORY, Box::new(gateway()), Scope::Test);

    let exact = store.get_next_response(HTTP_FACTORY, &rpc(json!({ "service": "maps", "params": { "id": 3 } })));
    let fallback = store.get_next_response(HTTP_FACTORY, &rpc(json!({ "service": "maps", "params": { "id": 7 } })));
    let unknown = store.get_next_response(HTTP_FACTORY, &rpc(json!({ "service": "users" })));

    assert_eq!(body(exact), "map 3");
    assert_eq!(body(fallback), "any map");
    assert!(matches!(unknown, Err(Error::MissingTestDouble { .. })));
}

#[test]
fn plugins_are_not_audited() {
    let mut store = strict();
    store.mount_plugin(HTTP_FACTORY, Box::new(gateway()), Scope::Test);

    assert!(store.check_no_uncalled_test_doubles().is_ok());
}

struct Failing(Option<Error>);

impl PluginRouter for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn route_key(&self) -> RequestKey {
        "svc/fail".into()
    }

    fn get_plugin_responses<'a>(
        &'a mut self,
        _request: &CanonicalRequest,
    ) -> Result<Routed<'a>, BoxError> {
        match self.0.clone() {
            Some(error) => Err(Box::new(error)),
            None => Err("the plugin blew up".into()),
        }
    }
}

#[test]
fn foreign_plugin_errors_are_wrapped() {
    let mut store = strict();
    store.mount_plugin(HTTP_FACTORY, Box::new(Failing(None)), Scope::Test);

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/fail"));

    let Err(Error::UnhandledPlugin { plugin, source }) = outcome else {
        panic!("expected an unhandled plugin error");
    };
    assert_eq!(plugin, "failing");
    assert_eq!(source.to_string(), "the plugin blew up");
}

#[test]
fn framework_errors_raised_by_plugins_pass_through() {
    let mut store = strict();
    let error = Error::MissingTestDouble {
        factory_name: "failing".into(),
        request: "GET http://svc/fail".into(),
    };
    store.mount_plugin(HTTP_FACTORY, Box::new(Failing(Some(error))), Scope::Test);

    let outcome = store.get_next_response(HTTP_FACTORY, &get("http://svc/fail"));

    assert!(matches!(outcome, Err(Error::MissingTestDouble { .. })));
}
