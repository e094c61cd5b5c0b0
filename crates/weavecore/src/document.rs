//! Serializable workflow documents.
//!
//! A document is the on-disk / over-the-wire form of a workflow. Steps refer
//! to capabilities by registered name; the runtime's capability registry turns
//! a document into a [`crate::WorkflowDefinition`].

use crate::{Condition, EngineError, ErrorPolicy, InputSource, StepId, Value, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub id: WorkflowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowDocument {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocument {
    pub id: StepId,
    #[serde(flatten)]
    pub kind: KindDocument,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StepId>,
    /// Step guard; named `guard` so it cannot clash with the `condition`
    /// of conditional and loop kinds
    #[serde(default, rename = "guard", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub input: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<CapabilityRef>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl StepDocument {
    pub fn new(id: impl Into<StepId>, kind: KindDocument) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            condition: None,
            input: InputSource::Auto,
            output_var: None,
            timeout_ms: None,
            retries: 0,
            on_error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Step kind tag plus its configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KindDocument {
    Transform {
        capability: CapabilityRef,
    },
    Route {
        routes: Vec<RouteDocument>,
    },
    Filter {
        predicate: Condition,
    },
    Aggregate {
        capability: CapabilityRef,
    },
    Split {
        capability: CapabilityRef,
    },
    Enrich {
        capability: CapabilityRef,
    },
    Validate {
        rule: Condition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Call {
        capability: CapabilityRef,
    },
    Parallel {
        steps: Vec<StepDocument>,
    },
    Conditional {
        condition: Condition,
        then: Box<StepDocument>,
        #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<StepDocument>>,
    },
    Loop {
        condition: Condition,
        body: Box<StepDocument>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDocument {
    pub when: Condition,
    pub capability: CapabilityRef,
}

/// Reference to a registered capability, either `"name"` or
/// `{ "name": ..., "config": { ... } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CapabilityRefRepr")]
pub struct CapabilityRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
}

impl CapabilityRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CapabilityRefRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        config: HashMap<String, Value>,
    },
}

impl From<CapabilityRefRepr> for CapabilityRef {
    fn from(repr: CapabilityRefRepr) -> Self {
        match repr {
            CapabilityRefRepr::Name(name) => CapabilityRef::new(name),
            CapabilityRefRepr::Full { name, config } => CapabilityRef { name, config },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_kinds_and_shorthand_refs() {
        let doc = WorkflowDocument::from_json(
            r#"{
                "id": "orders",
                "steps": [
                    { "id": "load", "kind": "call", "capability": "value.constant" },
                    { "id": "total", "kind": "aggregate", "depends_on": ["load"],
                      "capability": { "name": "math.sum" } },
                    { "id": "check", "kind": "conditional", "depends_on": ["total"],
                      "condition": { "op": "always" },
                      "then": { "id": "big", "kind": "transform", "capability": "debug.log" } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.steps.len(), 3);
        assert!(matches!(
            &doc.steps[1].kind,
            KindDocument::Aggregate { capability } if capability.name == "math.sum"
        ));
        assert_eq!(doc.steps[2].depends_on, vec!["total".to_string()]);
        assert!(matches!(doc.steps[2].kind, KindDocument::Conditional { .. }));
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let result = WorkflowDocument::from_json(
            r#"{ "id": "x", "steps": [ { "id": "a", "kind": "teleport" } ] }"#,
        );
        assert!(result.is_err());
    }
}
