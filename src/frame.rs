//! Data model of reported stack traces and captured frame variables.
//!
//! The reported side (`StackFrame`, `Stacktrace`, `Exception`, `Event`) is
//! the slice of an outgoing error event this subsystem reads and mutates.
//! The captured side (`CapturedFrameVariables`) is what the debug session
//! produces at pause time. The two sides carry frames in opposite order:
//! reported lists are outermost-first, captured batches are innermost-first.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat mapping of variable name to captured value. One level of object
/// identity is unrolled per entry: arrays become ordered value lists,
/// plain objects become nested mappings, everything else is a primitive
/// or a `"<description>"` tagged string.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// One structured frame of a reported stack trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u64>,
    #[serde(default)]
    pub in_app: bool,
    /// Populated by this subsystem when a captured batch matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vars: Option<Variables>,
}

/// Reported stack trace, frames ordered outermost-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stacktrace {
    pub frames: Vec<StackFrame>,
}

/// One exception value of an outgoing error event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exception {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

/// The slice of an outgoing error event visible to this subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub exceptions: Vec<Exception>,
}

/// Captured variables of a single call frame. Batches are ordered
/// innermost-first: index 0 is the frame active at the moment of pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedFrameVariables {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vars: Option<Variables>,
}

/// Turns a raw stack trace string into an ordered (outermost-first)
/// frame list. Provided by the host SDK.
pub trait StackParser: Send + Sync {
    fn parse(&self, raw: &str) -> Vec<StackFrame>;
}

impl<F> StackParser for F
where
    F: Fn(&str) -> Vec<StackFrame> + Send + Sync,
{
    fn parse(&self, raw: &str) -> Vec<StackFrame> {
        self(raw)
    }
}

/// Frame name the runtime assigns to promise-constructor scaffolding.
/// Such frames appear in reported stacks but have no debugger-visible
/// counterpart, so they are dropped before frame alignment.
pub const PROMISE_FRAME: &str = "new Promise";

/// Qualifier the debugger prepends to method names where the stack parser
/// does not. A narrow compatibility shim, not a general rule.
const OBJECT_PREFIX: &str = "Object.";

const ANONYMOUS_NAMES: [&str; 3] = ["", "?", "<anonymous>"];

fn is_anonymous(name: &str) -> bool {
    ANONYMOUS_NAMES.contains(&name)
}

/// True if a reported frame name and a captured frame name refer to the
/// same function. Matching is deliberately loose: exact equality, the
/// `Object.` prefix shim in either direction, or both names anonymous
/// (neither side carries a reliable identifier in that case).
pub fn function_names_match(reported: Option<&str>, captured: &str) -> bool {
    let Some(reported) = reported else {
        return false;
    };

    reported == captured
        || (is_anonymous(reported) && is_anonymous(captured))
        || reported.strip_prefix(OBJECT_PREFIX) == Some(captured)
        || captured.strip_prefix(OBJECT_PREFIX) == Some(reported)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_function_names_match() {
        struct TestCase {
            reported: Option<&'static str>,
            captured: &'static str,
            expected: bool,
        }

        let test_cases = vec![
            TestCase {
                reported: Some("foo"),
                captured: "foo",
                expected: true,
            },
            TestCase {
                reported: Some("foo"),
                captured: "bar",
                expected: false,
            },
            TestCase {
                reported: None,
                captured: "foo",
                expected: false,
            },
            // `Object.` qualifier discrepancy, both directions
            TestCase {
                reported: Some("Object.foo"),
                captured: "foo",
                expected: true,
            },
            TestCase {
                reported: Some("foo"),
                captured: "Object.foo",
                expected: true,
            },
            // anonymous frames always match each other
            TestCase {
                reported: Some(""),
                captured: "<anonymous>",
                expected: true,
            },
            TestCase {
                reported: Some("?"),
                captured: "",
                expected: true,
            },
            TestCase {
                reported: Some("<anonymous>"),
                captured: "<anonymous>",
                expected: true,
            },
            TestCase {
                reported: Some(""),
                captured: "named",
                expected: false,
            },
        ];

        for tc in test_cases {
            assert_eq!(
                function_names_match(tc.reported, tc.captured),
                tc.expected,
                "reported={:?} captured={:?}",
                tc.reported,
                tc.captured,
            );
        }
    }
}
