use super::*;
use crate::error::Error;
use crate::frame::Variables;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Transport stub answering `Runtime.getProperties` from canned payloads.
struct FakeTransport {
    properties: HashMap<String, Value>,
    posted: Mutex<Vec<(String, Option<Value>)>>,
    handlers: Mutex<HashMap<String, NotificationHandler>>,
}

impl FakeTransport {
    fn new(properties: HashMap<String, Value>) -> Self {
        Self {
            properties,
            posted: Mutex::new(vec![]),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    fn posted_methods(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    fn notify(&self, method: &str, params: Value) {
        let handlers = self.handlers.lock().unwrap();
        handlers[method](params);
    }
}

impl InspectorTransport for Arc<FakeTransport> {
    fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    fn post(&self, method: &str, params: Option<Value>, on_response: Option<ResponseCallback>) {
        self.posted
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        let Some(on_response) = on_response else {
            return;
        };

        if method != "Runtime.getProperties" {
            on_response(Ok(Value::Null));
            return;
        }

        let object_id = params
            .as_ref()
            .and_then(|p| p["objectId"].as_str())
            .unwrap_or_default()
            .to_string();

        match self.properties.get(&object_id) {
            Some(props) => on_response(Ok(props.clone())),
            None => on_response(Err(Error::Protocol(format!("unknown object {object_id}")))),
        }
    }

    fn subscribe(&self, method: &str, handler: NotificationHandler) {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), handler);
    }
}

fn collect_variables(session: &InspectorSession<Arc<FakeTransport>>, object_id: &str) -> Variables {
    let result = Arc::new(Mutex::new(None));
    session.get_local_variables(object_id, {
        let result = Arc::clone(&result);
        Box::new(move |vars| *result.lock().unwrap() = Some(vars))
    });
    let vars = result.lock().unwrap().take();
    vars.expect("fake transport completes synchronously")
}

#[test]
fn test_get_local_variables_unrolls_one_level() {
    let properties = HashMap::from([
        (
            "scope-1".to_string(),
            json!({
                "result": [
                    { "name": "num", "value": { "type": "number", "value": 7 } },
                    { "name": "text", "value": { "type": "string", "value": "hi" } },
                    { "name": "items", "value": { "type": "object", "className": "Array", "objectId": "o-arr" } },
                    { "name": "ctx", "value": { "type": "object", "className": "Object", "objectId": "o-obj" } },
                    { "name": "missing", "value": { "type": "undefined", "description": "undefined" } },
                    { "name": "cb", "value": { "type": "function", "description": "function cb()" } },
                    { "name": "no_value" },
                ]
            }),
        ),
        (
            "o-arr".to_string(),
            json!({
                "result": [
                    { "name": "1", "value": { "type": "number", "value": 2 } },
                    { "name": "0", "value": { "type": "number", "value": 1 } },
                    { "name": "length", "value": { "type": "number", "value": 2 } },
                ]
            }),
        ),
        (
            "o-obj".to_string(),
            json!({
                "result": [
                    { "name": "x", "value": { "type": "number", "value": 1 } },
                    { "name": "y", "value": { "type": "string", "value": "z" } },
                ]
            }),
        ),
    ]);

    let session = InspectorSession::new(Arc::new(FakeTransport::new(properties)));
    let vars = collect_variables(&session, "scope-1");

    assert_eq!(vars["num"], json!(7));
    assert_eq!(vars["text"], json!("hi"));
    // index properties ordered numerically, `length` dropped
    assert_eq!(vars["items"], json!([1, 2]));
    assert_eq!(vars["ctx"], json!({ "x": 1, "y": "z" }));
    // no extractable representation, kept as a tagged placeholder
    assert_eq!(vars["missing"], json!("<undefined>"));
    // functions are dropped, as are descriptors without a value object
    assert!(!vars.contains_key("cb"));
    assert!(!vars.contains_key("no_value"));
}

#[test]
fn test_failed_property_fetch_yields_no_variables() {
    let session = InspectorSession::new(Arc::new(FakeTransport::new(HashMap::new())));
    let vars = collect_variables(&session, "scope-unknown");
    assert!(vars.is_empty());
}

#[test]
fn test_failed_nested_fetch_keeps_other_variables() {
    let properties = HashMap::from([(
        "scope-1".to_string(),
        json!({
            "result": [
                { "name": "num", "value": { "type": "number", "value": 7 } },
                { "name": "bad", "value": { "type": "object", "className": "Object", "objectId": "gone" } },
            ]
        }),
    )]);

    let session = InspectorSession::new(Arc::new(FakeTransport::new(properties)));
    let vars = collect_variables(&session, "scope-1");

    assert_eq!(vars["num"], json!(7));
    // the nested fetch failed, the property unrolls to an empty mapping
    assert_eq!(vars["bad"], json!({}));
}

#[test]
fn test_configure_and_connect_enables_pausing() {
    let transport = Arc::new(FakeTransport::new(HashMap::new()));
    let session = InspectorSession::new(Arc::clone(&transport));

    session
        .configure_and_connect(Box::new(|_, resume| resume()), true)
        .unwrap();

    let posted = transport.posted.lock().unwrap().clone();
    assert_eq!(posted[0].0, "Debugger.enable");
    assert_eq!(posted[1].0, "Debugger.setPauseOnExceptions");
    assert_eq!(posted[1].1, Some(json!({ "state": "all" })));
}

#[test]
fn test_set_pause_on_exceptions_states() {
    let transport = Arc::new(FakeTransport::new(HashMap::new()));
    let session = InspectorSession::new(Arc::clone(&transport));

    session.set_pause_on_exceptions(false);
    session.set_pause_on_exceptions(true);

    let posted = transport.posted.lock().unwrap().clone();
    assert_eq!(posted[0].1, Some(json!({ "state": "uncaught" })));
    assert_eq!(posted[1].1, Some(json!({ "state": "all" })));
}

#[test]
fn test_pause_notification_reaches_handler_with_resume() {
    let transport = Arc::new(FakeTransport::new(HashMap::new()));
    let session = InspectorSession::new(Arc::clone(&transport));

    let seen = Arc::new(Mutex::new(None));
    session
        .configure_and_connect(
            {
                let seen = Arc::clone(&seen);
                Box::new(move |event, resume| {
                    *seen.lock().unwrap() = Some(event.reason);
                    resume();
                })
            },
            true,
        )
        .unwrap();

    transport.notify(
        "Debugger.paused",
        json!({
            "reason": "exception",
            "data": { "description": "Error: boom\n at fail (app.js:1:1)" },
            "callFrames": [],
        }),
    );

    assert_eq!(seen.lock().unwrap().as_deref(), Some("exception"));
    assert!(transport
        .posted_methods()
        .contains(&"Debugger.resume".to_string()));
}

#[test]
fn test_malformed_pause_notification_still_resumes() {
    let transport = Arc::new(FakeTransport::new(HashMap::new()));
    let session = InspectorSession::new(Arc::clone(&transport));

    session
        .configure_and_connect(Box::new(|_, _| panic!("handler must not run")), true)
        .unwrap();

    transport.notify("Debugger.paused", json!({ "reason": 42 }));

    assert!(transport
        .posted_methods()
        .contains(&"Debugger.resume".to_string()));
}
