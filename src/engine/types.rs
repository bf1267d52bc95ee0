use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::json::{decode_json_value, value_as_text};

/// The engine serializes ids as strings but older endpoints return numbers.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_text(&value).ok_or_else(|| serde::de::Error::custom("missing id"))
}

pub(crate) fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_text))
}

/// A deployed process template.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessDefinition {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Case metadata as returned by `bpm/case/{id}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaseInfo {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "processDefinitionId", deserialize_with = "opt_id_string")]
    pub process_definition_id: Option<String>,
}

impl CaseInfo {
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state.to_ascii_lowercase().as_str(),
            "completed" | "aborted" | "cancelled"
        )
    }
}

/// A human task belonging to one case.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HumanTask {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "caseId", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub assigned_id: Option<String>,
}

/// A flow node (task, gateway, event) as seen by `bpm/flowNode`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowNode {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// A case variable together with its declared Java type.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaseVariable {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "case_id", deserialize_with = "opt_id_string")]
    pub case_id: Option<String>,
    #[serde(rename = "type", default = "default_variable_type")]
    pub var_type: String,
    #[serde(default)]
    pub value: Value,
}

fn default_variable_type() -> String {
    DEFAULT_VARIABLE_TYPE.to_string()
}

pub const DEFAULT_VARIABLE_TYPE: &str = "java.lang.String";

impl CaseVariable {
    /// Scalar value as text; empty strings count as absent.
    pub fn text(&self) -> Option<String> {
        value_as_text(&self.value)
    }

    /// Structured value, tolerating JSON stored as a (possibly double-encoded) string.
    pub fn json(&self) -> Option<Value> {
        decode_json_value(&self.value)
    }
}

/// A flat form contract. Engine contract inputs are atomic, so nested
/// documents travel as JSON strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Contract(Map<String, Value>);

impl Contract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic field (string, number or boolean).
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = match value.into() {
            nested @ (Value::Object(_) | Value::Array(_)) => Value::String(nested.to_string()),
            atomic => atomic,
        };
        self.0.insert(key.to_string(), value);
        self
    }

    /// Nested document serialized to a JSON string; null becomes `{}`.
    pub fn document(mut self, key: &str, value: &Value) -> Self {
        let text = match value {
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        };
        self.0.insert(key.to_string(), Value::String(text));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What became of a task after execution, derived from flow-node queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Still ready when the wait ran out.
    StillReady,
    /// Still listed in a transitional state (e.g. `executing`) when the wait ran out.
    InProgress { state: String },
    /// The engine marked the node failed (connector error).
    Failed { node_id: String },
    /// No longer listed: assumed completed.
    Completed,
}
