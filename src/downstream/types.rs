use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::value_as_text;

/// An observation raised by the board against a project.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Observation {
    pub id: Value,
    pub detalle: String,
    pub estado: String,
    pub fecha: Option<String>,
    pub respuesta: Option<String>,
}

/// States that keep a project from being finalized.
pub const BLOCKING_OBSERVATION_STATES: [&str; 3] = ["pendiente", "rechazada", "respondida"];

fn first_text(item: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| item.get(*key).and_then(value_as_text))
}

impl Observation {
    /// Read one list item, tolerating nulls and the API's alternate field names.
    ///
    /// Only non-objects are rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let item = value.as_object()?;
        Some(Self {
            id: item.get("id").cloned().unwrap_or(Value::Null),
            detalle: first_text(item, &["detalle", "descripcion", "texto"]).unwrap_or_default(),
            estado: first_text(item, &["estado"]).unwrap_or_default(),
            fecha: first_text(item, &["fecha", "fecha_creacion"]),
            respuesta: first_text(item, &["respuesta"]),
        })
    }

    pub fn id_text(&self) -> Option<String> {
        value_as_text(&self.id)
    }

    pub fn blocks_finalization(&self) -> bool {
        let estado = self.estado.trim().to_lowercase();
        BLOCKING_OBSERVATION_STATES.contains(&estado.as_str())
    }
}

/// Usage reported by the downstream monthly-limit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyUsage {
    #[serde(alias = "cantidad", alias = "usadas")]
    pub used: u32,
    #[serde(default, alias = "limite")]
    pub limit: Option<u32>,
    #[serde(default, alias = "periodo")]
    pub period: Option<String>,
}

/// How the monthly count was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    Endpoint,
    ManualCount,
}
