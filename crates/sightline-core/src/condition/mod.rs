//! Breakpoint condition language.
//!
//! A condition is a small boolean expression evaluated against the
//! [`EventContext`] of one event. Only six read-only variables exist
//! (`payload`, `message`, `severity`, `timestamp`, `event_type`,
//! `source_module`) and five conversion functions (`len`, `str`, `int`,
//! `float`, `bool`). Sources are tokenized and parsed once by
//! [`Condition::compile`]; evaluation walks the resulting tree and never
//! touches anything outside the context.
//!
//! ```text
//! severity == "error" and payload.get("confidence", 1.0) < 0.5
//! source_module in ["Planner", "Critic"] and not message.startswith("retry")
//! ```

mod eval;
mod lexer;
mod parser;
mod value;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{EventType, JsonMap, Severity};

pub use eval::MAX_STEPS;
pub use parser::{BinOp, Builtin, CmpOp, Expr, Method, Variable};
pub use value::Value;

/// Identifiers that may never appear in a condition.
pub const FORBIDDEN_IDENTIFIERS: &[&str] = &["import", "exec", "eval", "open", "file"];

/// Longest accepted condition source, in bytes.
pub const MAX_SOURCE_LEN: usize = 4096;

/// Errors from compiling or evaluating a condition.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConditionError {
    /// The source does not parse.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset of the offending token.
        offset: usize,
        /// What went wrong.
        message: String,
    },
    /// The source uses a banned identifier.
    #[error("forbidden token in condition: {0}")]
    Forbidden(String),
    /// The source references a name outside the closed context.
    #[error("unknown {0}")]
    UnknownName(String),
    /// Evaluation failed (type error, missing key, ...).
    #[error("evaluation error: {0}")]
    Eval(String),
}

/// Read-only view of one event as seen by conditions.
#[derive(Clone, Debug, PartialEq)]
pub struct EventContext {
    /// Event payload.
    pub payload: JsonMap,
    /// Event message.
    pub message: String,
    /// Event severity.
    pub severity: Severity,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    pub event_type: EventType,
    /// Emitting module.
    pub source_module: String,
}

impl EventContext {
    /// Flatten to a JSON object, used for hit snapshots.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "payload": self.payload,
            "message": self.message,
            "severity": self.severity.as_str(),
            "timestamp": self.timestamp.to_rfc3339(),
            "event_type": self.event_type.as_str(),
            "source_module": self.source_module,
        })
    }
}

/// A compiled condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Tokenize, screen and parse `source`.
    pub fn compile(source: &str) -> Result<Self, ConditionError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ConditionError::Syntax {
                offset: MAX_SOURCE_LEN,
                message: format!("condition longer than {MAX_SOURCE_LEN} bytes"),
            });
        }
        let tokens = lexer::tokenize(source)?;
        for spanned in &tokens {
            if let lexer::Token::Ident(name) = &spanned.token {
                if FORBIDDEN_IDENTIFIERS.contains(&name.as_str()) || name.contains("__") {
                    return Err(ConditionError::Forbidden(name.clone()));
                }
            }
        }
        let expr = parser::parse(&tokens, source.len())?;
        Ok(Self { source: source.to_string(), expr })
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed tree.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against `ctx`, reducing the result to its truthiness.
    pub fn evaluate(&self, ctx: &EventContext) -> Result<bool, ConditionError> {
        eval::Evaluator::new(ctx).eval(&self.expr).map(|v| v.truthy())
    }
}

/// Check that `source` would compile.
pub fn validate(source: &str) -> Result<(), ConditionError> {
    Condition::compile(source).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn ctx() -> EventContext {
        let payload = json!({
            "confidence": 0.42,
            "attempts": 3,
            "tags": ["alpha", "beta"],
            "nested": {"depth": 2, "label": "deep"},
            "flag": false,
        });
        EventContext {
            payload: payload.as_object().cloned().unwrap(),
            message: "Chose plan B".to_string(),
            severity: Severity::Error,
            timestamp: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            event_type: EventType::Decision,
            source_module: "Planner".to_string(),
        }
    }

    fn eval(source: &str) -> Result<bool, ConditionError> {
        Condition::compile(source)?.evaluate(&ctx())
    }

    // ── Variables and comparisons ────────────────────────────────────

    #[test]
    fn severity_equality() {
        assert!(eval("severity == 'error'").unwrap());
        assert!(!eval("severity == \"info\"").unwrap());
        assert!(eval("severity != 'info'").unwrap());
    }

    #[test]
    fn event_fields() {
        assert!(eval("event_type == 'decision' and source_module == 'Planner'").unwrap());
        assert!(eval("timestamp > 1700000000").unwrap());
        assert!(eval("'plan' in message").unwrap());
        assert!(eval("'Plan' not in message").unwrap());
    }

    #[test]
    fn payload_access() {
        assert!(eval("payload['confidence'] < 0.5").unwrap());
        assert!(eval("payload.attempts >= 3").unwrap());
        assert!(eval("payload.nested.label == 'deep'").unwrap());
        assert!(eval("payload['nested']['depth'] == 2").unwrap());
        assert!(eval("payload['tags'][-1] == 'beta'").unwrap());
        assert!(eval("'alpha' in payload['tags']").unwrap());
        assert!(eval("'confidence' in payload").unwrap());
    }

    #[test]
    fn get_with_default() {
        assert!(eval("payload.get('missing') == None").unwrap());
        assert!(eval("payload.get('missing', 7) == 7").unwrap());
        assert!(eval("payload.get('attempts', 0) == 3").unwrap());
    }

    #[test]
    fn missing_subscript_is_an_error() {
        assert_matches!(eval("payload['missing'] == 1"), Err(ConditionError::Eval(_)));
    }

    #[test]
    fn chained_comparisons() {
        assert!(eval("0 < payload.attempts < 5").unwrap());
        assert!(!eval("0 < payload.attempts < 2").unwrap());
    }

    #[test]
    fn ordering_type_mismatch_is_an_error() {
        assert_matches!(eval("message > 3"), Err(ConditionError::Eval(_)));
    }

    // ── Builtins and arithmetic ─────────────────────────────────────

    #[test]
    fn builtins() {
        assert!(eval("len(message) == 12").unwrap());
        assert!(eval("len(payload.tags) == 2").unwrap());
        assert!(eval("str(payload.attempts) == '3'").unwrap());
        assert!(eval("int('42') + 1 == 43").unwrap());
        assert!(eval("int(2.9) == 2").unwrap());
        assert!(eval("float('1.5') == 1.5").unwrap());
        assert!(eval("bool(payload.tags)").unwrap());
        assert!(!eval("bool(payload.flag)").unwrap());
        assert!(!eval("bool()").unwrap());
    }

    #[test]
    fn arithmetic() {
        assert!(eval("payload.attempts * 2 - 1 == 5").unwrap());
        assert!(eval("7 / 2 == 3.5").unwrap());
        assert!(eval("-7 % 3 == 2").unwrap());
        assert!(eval("'a' + 'b' == 'ab'").unwrap());
        assert_matches!(eval("1 / 0"), Err(ConditionError::Eval(_)));
        assert_matches!(eval("message - 1"), Err(ConditionError::Eval(_)));
    }

    #[test]
    fn string_methods() {
        assert!(eval("message.lower().startswith('chose')").unwrap());
        assert!(eval("source_module.upper() == 'PLANNER'").unwrap());
        assert!(eval("message.endswith('B')").unwrap());
    }

    #[test]
    fn boolean_operators_short_circuit() {
        assert!(eval("True or payload['missing']").unwrap());
        assert!(!eval("False and payload['missing']").unwrap());
        assert!(eval("not payload.flag").unwrap());
    }

    #[test]
    fn non_boolean_results_use_truthiness() {
        assert!(eval("message").unwrap());
        assert!(!eval("payload.get('missing')").unwrap());
    }

    // ── Safety screening ────────────────────────────────────────────

    #[test]
    fn forbidden_identifiers_are_rejected() {
        for source in [
            "import",
            "exec('x')",
            "eval(message)",
            "open('/etc/passwd')",
            "file",
            "payload.__class__",
            "__builtins__",
            "message.__len__()",
        ] {
            assert_matches!(
                Condition::compile(source),
                Err(ConditionError::Forbidden(_)),
                "{source} should be forbidden"
            );
        }
    }

    #[test]
    fn forbidden_words_inside_strings_are_data() {
        assert!(eval("'file' not in message").unwrap());
        assert!(Condition::compile("message == '__init__'").is_ok());
    }

    #[test]
    fn unknown_names_fail_compilation() {
        assert_matches!(Condition::compile("user == 'x'"), Err(ConditionError::UnknownName(_)));
        assert_matches!(Condition::compile("getattr(payload)"), Err(ConditionError::UnknownName(_)));
    }

    #[test]
    fn overlong_source_is_rejected() {
        let source = format!("message == '{}'", "x".repeat(MAX_SOURCE_LEN));
        assert!(Condition::compile(&source).is_err());
    }

    #[test]
    fn validate_reports_syntax_errors() {
        assert!(validate("severity == 'error'").is_ok());
        assert_matches!(validate("severity =="), Err(ConditionError::Syntax { .. }));
    }

    #[test]
    fn context_to_json() {
        let json = ctx().to_json();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["event_type"], "decision");
        assert_eq!(json["payload"]["attempts"], 3);
    }

    proptest! {
        #[test]
        fn compile_never_panics(source in ".{0,64}") {
            let _ = Condition::compile(&source);
        }

        #[test]
        fn integer_literals_compare_to_themselves(n in any::<i32>()) {
            let source = format!("{n} == {n}");
            prop_assert!(eval(&source).unwrap());
        }
    }
}
