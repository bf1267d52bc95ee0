//! Shape checks for the project definition payload.
//!
//! Pure functions: every violation is collected, nothing is sent anywhere.
//! The project-level window is not supplied by the caller; it is derived
//! from the stages once they all check out.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};

pub const MAX_STAGES: usize = 5;
pub const ALLOWED_CURRENCIES: [&str; 3] = ["ARS", "USD", "EUR"];
pub const ALLOWED_CATEGORIES: [&str; 7] = [
    "materiales",
    "mano_de_obra",
    "transporte",
    "equipamiento",
    "servicios",
    "capacitacion",
    "otros",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
const OPTIONAL_STAGE_TEXT: [&str; 3] = ["responsablePropuesto", "criteriosAceptacion", "descripcion"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: &str, message: &str) -> Self {
        Self {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}

/// Project start and end derived from its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectWindow {
    pub inicio: NaiveDate,
    pub fin: NaiveDate,
}

impl ProjectWindow {
    pub fn inicio_iso(&self) -> String {
        self.inicio.format("%Y-%m-%d").to_string()
    }

    pub fn fin_iso(&self) -> String {
        self.fin.format("%Y-%m-%d").to_string()
    }
}

#[derive(Default)]
struct Collector(Vec<FieldError>);

impl Collector {
    fn push(&mut self, path: impl Into<String>, message: &str) {
        let path: String = path.into();
        self.0.push(FieldError::new(&path, message));
    }
}

fn non_empty_text(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Validate against today's local date.
pub fn validate_iniciar_payload(data: &Value) -> Vec<FieldError> {
    validate_iniciar_payload_on(data, Local::now().date_naive())
}

pub fn validate_iniciar_payload_on(data: &Value, today: NaiveDate) -> Vec<FieldError> {
    let mut errors = Collector::default();
    let empty = Map::new();
    let root = data.as_object().unwrap_or(&empty);

    if non_empty_text(root.get("nombre")).is_none() {
        errors.push("nombre", "Requerido (texto no vacío).");
    }
    if let Some(descripcion) = root.get("descripcion") {
        if !descripcion.is_string() && !descripcion.is_null() {
            errors.push("descripcion", "Debe ser texto.");
        }
    }

    check_work_plan(root.get("planTrabajo"), today, &mut errors);
    check_budget(root.get("planEconomico"), &mut errors);

    errors.0
}

/// Read one stage date, reporting a missing or unreadable value.
fn stage_date(
    stage: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Collector,
) -> Option<NaiveDate> {
    let Some(raw) = non_empty_text(stage.get(key)) else {
        errors.push(format!("{path}.{key}"), "Requerido (YYYY-MM-DD).");
        return None;
    };
    let date = parse_date(raw);
    if date.is_none() {
        errors.push(format!("{path}.{key}"), "Formato de fecha inválido (use YYYY-MM-DD).");
    }
    date
}

fn check_work_plan(plan: Option<&Value>, today: NaiveDate, errors: &mut Collector) {
    let Some(plan) = plan.and_then(Value::as_object) else {
        errors.push("planTrabajo", "Debe ser objeto con 'etapas'.");
        return;
    };
    let Some(stages) = plan.get("etapas").and_then(Value::as_array) else {
        errors.push("planTrabajo.etapas", "Debe ser una lista de etapas.");
        return;
    };
    if stages.is_empty() || stages.len() > MAX_STAGES {
        errors.push("planTrabajo.etapas", "Debe tener entre 1 y 5 etapas.");
        return;
    }

    let mut previous_end: Option<NaiveDate> = None;
    for (i, stage) in stages.iter().enumerate() {
        let path = format!("planTrabajo.etapas[{i}]");
        let Some(stage) = stage.as_object() else {
            errors.push(path, "Cada etapa debe ser objeto.");
            previous_end = None;
            continue;
        };

        if non_empty_text(stage.get("nombre")).is_none() {
            errors.push(format!("{path}.nombre"), "Requerido (texto).");
        }
        for key in OPTIONAL_STAGE_TEXT {
            if stage.get(key).is_some_and(|v| !v.is_string()) {
                errors.push(format!("{path}.{key}"), "Debe ser texto.");
            }
        }

        let start = stage_date(stage, "fechaInicioPrevista", &path, errors);
        let end = stage_date(stage, "fechaFinPrevista", &path, errors);

        if let Some(start) = start {
            if start < today {
                errors.push(format!("{path}.fechaInicioPrevista"), "No puede ser anterior a hoy.");
            }
            if let Some(prev) = previous_end {
                if start < prev {
                    errors.push(
                        format!("{path}.fechaInicioPrevista"),
                        "Debe comenzar después del fin de la etapa anterior.",
                    );
                }
            }
        }
        if let Some(end) = end {
            if end < today {
                errors.push(format!("{path}.fechaFinPrevista"), "No puede ser anterior a hoy.");
            }
            if start.is_some_and(|start| end < start) {
                errors.push(format!("{path}.fechaFinPrevista"), "Debe ser >= fechaInicioPrevista.");
            }
        }
        previous_end = end;
    }
}

fn check_budget(budget: Option<&Value>, errors: &mut Collector) {
    let Some(budget) = budget.and_then(Value::as_object) else {
        errors.push(
            "planEconomico",
            "Debe ser objeto con 'monedaBase' y 'presupuestoPorRubro'.",
        );
        return;
    };

    match non_empty_text(budget.get("monedaBase")) {
        None => errors.push("planEconomico.monedaBase", "Requerido (ej. 'ARS', 'USD')."),
        Some(currency) if !ALLOWED_CURRENCIES.contains(&currency.to_uppercase().as_str()) => {
            errors.push("planEconomico.monedaBase", "Moneda no admitida.")
        }
        Some(_) => {}
    }

    let Some(lines) = budget.get("presupuestoPorRubro").and_then(Value::as_array) else {
        errors.push("planEconomico.presupuestoPorRubro", "Debe ser una lista.");
        return;
    };
    if lines.is_empty() {
        errors.push("planEconomico.presupuestoPorRubro", "Debe tener al menos un rubro.");
        return;
    }

    for (i, line) in lines.iter().enumerate() {
        let path = format!("planEconomico.presupuestoPorRubro[{i}]");
        let Some(line) = line.as_object() else {
            errors.push(path, "Cada rubro debe ser objeto.");
            continue;
        };

        let category_ok = non_empty_text(line.get("rubro"))
            .is_some_and(|rubro| ALLOWED_CATEGORIES.contains(&rubro.to_lowercase().as_str()));
        if !category_ok {
            errors.push(format!("{path}.rubro"), "Rubro no admitido.");
        }

        let amount_ok = line
            .get("monto")
            .and_then(Value::as_f64)
            .is_some_and(|monto| monto >= 0.0);
        if !amount_ok {
            errors.push(format!("{path}.monto"), "Requerido (número ≥ 0).");
        }
    }
}

/// Window spanning all stages; `None` unless every stage has readable dates.
pub fn derive_project_window(plan: &Value) -> Option<ProjectWindow> {
    let stages = plan.get("etapas")?.as_array()?;
    if stages.is_empty() {
        return None;
    }

    let mut inicio: Option<NaiveDate> = None;
    let mut fin: Option<NaiveDate> = None;
    for stage in stages {
        let start = parse_date(non_empty_text(stage.get("fechaInicioPrevista"))?)?;
        let end = parse_date(non_empty_text(stage.get("fechaFinPrevista"))?)?;
        inicio = Some(inicio.map_or(start, |current| current.min(start)));
        fin = Some(fin.map_or(end, |current| current.max(end)));
    }

    Some(ProjectWindow {
        inicio: inicio?,
        fin: fin?,
    })
}
