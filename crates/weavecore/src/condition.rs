use crate::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// In-process predicate over a condition scope
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl Predicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn test(&self, scope: &Value) -> bool {
        (self.0)(scope)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Boolean expression evaluated against a scope value.
///
/// The scope is built by the dispatcher from the running workflow context:
/// `input`, `vars`, `steps` and `metadata` are always present, and step kinds
/// add `value`, `item` or `loop` where relevant. Paths are dotted lookups into
/// that scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Never,
    Exists { path: String },
    Truthy { path: String },
    Equals { path: String, value: Value },
    NotEquals { path: String, value: Value },
    LessThan { path: String, value: f64 },
    GreaterThan { path: String, value: f64 },
    Not { condition: Box<Condition> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    #[serde(skip)]
    Custom(Predicate),
}

impl Condition {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Condition::Custom(Predicate::new(f))
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Condition::Exists { path: path.into() }
    }

    pub fn truthy(path: impl Into<String>) -> Self {
        Condition::Truthy { path: path.into() }
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn less_than(path: impl Into<String>, value: f64) -> Self {
        Condition::LessThan {
            path: path.into(),
            value,
        }
    }

    pub fn greater_than(path: impl Into<String>, value: f64) -> Self {
        Condition::GreaterThan {
            path: path.into(),
            value,
        }
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    pub fn evaluate(&self, scope: &Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::Exists { path } => scope.get_path(path).is_some_and(|v| !v.is_null()),
            Condition::Truthy { path } => scope.get_path(path).is_some_and(Value::is_truthy),
            Condition::Equals { path, value } => {
                scope.get_path(path).unwrap_or(&Value::Null) == value
            }
            Condition::NotEquals { path, value } => {
                scope.get_path(path).unwrap_or(&Value::Null) != value
            }
            Condition::LessThan { path, value } => scope
                .get_path(path)
                .and_then(Value::as_f64)
                .is_some_and(|n| n < *value),
            Condition::GreaterThan { path, value } => scope
                .get_path(path)
                .and_then(Value::as_f64)
                .is_some_and(|n| n > *value),
            Condition::Not { condition } => !condition.evaluate(scope),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(scope)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(scope)),
            Condition::Custom(predicate) => predicate.test(scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Value {
        Value::from(serde_json::json!({
            "vars": { "count": 2, "mode": "fast" },
            "value": { "amount": 120 }
        }))
    }

    #[test]
    fn comparisons_read_paths() {
        let scope = scope();
        assert!(Condition::less_than("vars.count", 3.0).evaluate(&scope));
        assert!(!Condition::less_than("vars.count", 2.0).evaluate(&scope));
        assert!(Condition::greater_than("value.amount", 100.0).evaluate(&scope));
        assert!(Condition::equals("vars.mode", "fast").evaluate(&scope));
        assert!(Condition::equals("vars.missing", Value::Null).evaluate(&scope));
        assert!(!Condition::less_than("vars.missing", 10.0).evaluate(&scope));
    }

    #[test]
    fn combinators() {
        let scope = scope();
        let both = Condition::All {
            conditions: vec![Condition::exists("vars.mode"), Condition::truthy("vars.count")],
        };
        assert!(both.evaluate(&scope));
        assert!(!Condition::negate(both).evaluate(&scope));
        let either = Condition::Any {
            conditions: vec![Condition::Never, Condition::custom(|s| s.get_path("value").is_some())],
        };
        assert!(either.evaluate(&scope));
    }

    #[test]
    fn parses_from_json() {
        let condition: Condition =
            serde_json::from_str(r#"{"op": "less_than", "path": "loop.index", "value": 3}"#).unwrap();
        let scope = Value::from(serde_json::json!({ "loop": { "index": 1 } }));
        assert!(condition.evaluate(&scope));
    }
}
