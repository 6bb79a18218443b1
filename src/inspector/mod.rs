//! Debug session over the inspector protocol.
//!
//! [`DebugSession`] is the single abstraction over the external debugging
//! protocol: pause-on-exception configuration, pause notifications with a
//! resume capability, and local variable extraction for a remote scope
//! object. [`InspectorSession`] implements it on top of an
//! [`InspectorTransport`], the crate's seam to the out-of-scope socket
//! layer (and to fakes in tests).

use crate::chain::CallbackChain;
use crate::error::Error;
use crate::frame::Variables;
use crate::muted_error;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Pause reason delivered for a thrown exception.
pub const PAUSE_REASON_EXCEPTION: &str = "exception";
/// Pause reason delivered for an unhandled promise rejection.
pub const PAUSE_REASON_PROMISE_REJECTION: &str = "promiseRejection";

const LOCAL_SCOPE: &str = "local";

/// Scope chain entry of a paused call frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub r#type: String,
    #[serde(default)]
    pub object: RemoteObject,
}

/// A protocol-level reference to (or inline value of) a remote object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One stack entry as reported by the debugging protocol. Distinct from a
/// reported [`crate::frame::StackFrame`]: call frames arrive
/// innermost-first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
    #[serde(default)]
    pub this: RemoteObject,
}

impl CallFrame {
    /// Protocol-level reference to the local scope bindings, if any.
    pub fn local_scope_id(&self) -> Option<&str> {
        self.scope_chain
            .iter()
            .find(|scope| scope.r#type == LOCAL_SCOPE)
            .and_then(|scope| scope.object.object_id.as_deref())
    }
}

/// Exception details attached to a pause notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionData {
    /// The original stack string of the thrown value.
    #[serde(default)]
    pub description: Option<String>,
}

/// An "execution paused" notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    pub reason: String,
    #[serde(default)]
    pub data: Option<ExceptionData>,
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
}

#[derive(Debug, Deserialize)]
struct GetPropertiesResponse {
    #[serde(default)]
    result: Vec<PropertyDescriptor>,
}

/// One own property of a remote object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
}

/// Lets the paused thread continue. Must be called exactly once per pause;
/// a missed call deadlocks the monitored process's event loop.
pub type Resume = Box<dyn FnOnce() + Send>;
/// Pause notification handler registered by the orchestrator.
pub type OnPause = Box<dyn Fn(PausedEvent, Resume) + Send + Sync>;
/// Receiver of the variables extracted for one scope object.
pub type VariablesSink = Box<dyn FnOnce(Variables) + Send>;
/// Receiver of a protocol command result.
pub type ResponseCallback = Box<dyn FnOnce(Result<Value, Error>) + Send>;
/// Receiver of protocol notification parameters.
pub type NotificationHandler = Box<dyn Fn(Value) + Send + Sync>;

/// The single abstraction over the external debugging protocol.
pub trait DebugSession: Send + Sync {
    /// Establish the connection, enable debugger pausing and register
    /// `on_pause` for every pause notification.
    fn configure_and_connect(&self, on_pause: OnPause, capture_all: bool) -> Result<(), Error>;

    /// Switch between "pause on caught+uncaught" and "pause on uncaught
    /// only" without tearing down the connection.
    fn set_pause_on_exceptions(&self, capture_all: bool);

    /// Asynchronously extract the variables of a scope object.
    fn get_local_variables(&self, object_id: &str, complete: VariablesSink);
}

impl<S: DebugSession + ?Sized> DebugSession for Arc<S> {
    fn configure_and_connect(&self, on_pause: OnPause, capture_all: bool) -> Result<(), Error> {
        (**self).configure_and_connect(on_pause, capture_all)
    }

    fn set_pause_on_exceptions(&self, capture_all: bool) {
        (**self).set_pause_on_exceptions(capture_all)
    }

    fn get_local_variables(&self, object_id: &str, complete: VariablesSink) {
        (**self).get_local_variables(object_id, complete)
    }
}

/// Wire-level primitives of the inspector connection. The socket layer
/// implementing this is an external collaborator.
pub trait InspectorTransport: Send + Sync {
    /// Acquire the debugging connection. Fails when no endpoint is
    /// available or another consumer already holds it.
    fn connect(&self) -> Result<(), Error>;

    /// Send a protocol command. When `on_response` is present the
    /// transport must invoke it exactly once, with `Err` on a failed
    /// round trip.
    fn post(&self, method: &str, params: Option<Value>, on_response: Option<ResponseCallback>);

    /// Register a handler for a protocol notification method.
    fn subscribe(&self, method: &str, handler: NotificationHandler);
}

/// [`DebugSession`] implementation over an inspector transport.
pub struct InspectorSession<T> {
    transport: Arc<T>,
}

impl<T> Clone for InspectorSession<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: InspectorTransport + 'static> InspectorSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Fetch the own properties of a remote object. A failed round trip
    /// yields the empty list: "no variables" is always a valid answer.
    fn get_properties(&self, object_id: &str, next: Box<dyn FnOnce(Vec<PropertyDescriptor>) + Send>) {
        let params = json!({ "objectId": object_id, "ownProperties": true });

        self.transport.post(
            "Runtime.getProperties",
            Some(params),
            Some(Box::new(move |response| {
                let props = response.and_then(|value| {
                    serde_json::from_value::<GetPropertiesResponse>(value)
                        .map(|r| r.result)
                        .map_err(Error::from)
                });
                next(muted_error!(props, "property fetch failed:").unwrap_or_default());
            })),
        );
    }

    /// Unroll an array property into an ordered value list.
    fn unroll_array(
        &self,
        object_id: &str,
        name: String,
        mut vars: Variables,
        chain: CallbackChain<Variables>,
    ) {
        self.get_properties(
            object_id,
            Box::new(move |props| {
                // index properties only; `length` and friends fail the parse
                let mut items: Vec<(i64, Value)> = props
                    .into_iter()
                    .filter_map(|prop| {
                        let index: i64 = prop.name.parse().ok()?;
                        let value = prop.value.and_then(|o| o.value).unwrap_or(Value::Null);
                        Some((index, value))
                    })
                    .collect();
                items.sort_by_key(|(index, _)| *index);

                let values = items.into_iter().map(|(_, value)| value).collect();
                vars.insert(name, Value::Array(values));
                chain.next(vars);
            }),
        );
    }

    /// Unroll an object property into a one-level nested mapping.
    fn unroll_object(
        &self,
        object_id: &str,
        name: String,
        mut vars: Variables,
        chain: CallbackChain<Variables>,
    ) {
        self.get_properties(
            object_id,
            Box::new(move |props| {
                let object: serde_json::Map<String, Value> = props
                    .into_iter()
                    .map(|prop| {
                        let value = prop.value.and_then(|o| o.value).unwrap_or(Value::Null);
                        (prop.name, value)
                    })
                    .collect();

                vars.insert(name, Value::Object(object));
                chain.next(vars);
            }),
        );
    }

    /// Record a property that needs no further round trips. Values with no
    /// extractable representation become a `"<description>"` tagged string
    /// rather than being dropped, preserving shape for the consumer.
    fn unroll_other(object: RemoteObject, name: String, vars: &mut Variables) {
        if let Some(value) = object.value {
            vars.insert(name, value);
        } else if object.r#type.as_deref() != Some("function") {
            if let Some(tag) = object.description.or(object.r#type) {
                vars.insert(name, Value::String(format!("<{tag}>")));
            }
        }
    }
}

impl<T: InspectorTransport + 'static> DebugSession for InspectorSession<T> {
    fn configure_and_connect(&self, on_pause: OnPause, capture_all: bool) -> Result<(), Error> {
        self.transport.connect()?;

        let transport = Arc::clone(&self.transport);
        self.transport.subscribe(
            "Debugger.paused",
            Box::new(move |params| {
                let resume: Resume = {
                    let transport = Arc::clone(&transport);
                    // resume or the exception context memory is leaked
                    Box::new(move || transport.post("Debugger.resume", None, None))
                };

                match muted_error!(
                    serde_json::from_value::<PausedEvent>(params),
                    "malformed pause notification:"
                ) {
                    Some(event) => on_pause(event, resume),
                    // a pause we cannot parse still must not stall the process
                    None => resume(),
                }
            }),
        );

        self.transport.post("Debugger.enable", None, None);
        self.set_pause_on_exceptions(capture_all);

        Ok(())
    }

    fn set_pause_on_exceptions(&self, capture_all: bool) {
        let state = if capture_all { "all" } else { "uncaught" };
        self.transport.post(
            "Debugger.setPauseOnExceptions",
            Some(json!({ "state": state })),
            None,
        );
    }

    fn get_local_variables(&self, object_id: &str, complete: VariablesSink) {
        let session = self.clone();
        self.get_properties(
            object_id,
            Box::new(move |props| {
                let chain = CallbackChain::new(move |vars| complete(vars));

                for prop in props {
                    let Some(object) = prop.value else { continue };
                    let name = prop.name;

                    let class_name = object.class_name.clone();
                    match (object.object_id.clone(), class_name.as_deref()) {
                        (Some(id), Some("Array")) => {
                            let session = session.clone();
                            chain.add(move |chain, vars| {
                                session.unroll_array(&id, name, vars, chain.clone());
                                Ok(())
                            });
                        }
                        (Some(id), Some("Object")) => {
                            let session = session.clone();
                            chain.add(move |chain, vars| {
                                session.unroll_object(&id, name, vars, chain.clone());
                                Ok(())
                            });
                        }
                        _ => {
                            chain.add(move |chain, mut vars| {
                                Self::unroll_other(object, name, &mut vars);
                                chain.next(vars);
                                Ok(())
                            });
                        }
                    }
                }

                chain.next(Variables::new());
            }),
        );
    }
}

#[cfg(test)]
mod test;
