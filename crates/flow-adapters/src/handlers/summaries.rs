//! Resúmenes deterministas por fase.
//!
//! El trabajo de negocio real vive fuera del orquestador; estos resúmenes
//! derivan métricas simples del input para que cada fase deje un rastro
//! verificable en `phase_completion`.
use serde_json::{json, Value};

use flow_core::HandlerError;

fn items(input: &Value, key: &str) -> Result<Vec<Value>, HandlerError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(HandlerError::Failed(format!("`{key}` must be an array"))),
    }
}

fn count_flag(items: &[Value], flag: &str) -> usize {
    items.iter().filter(|i| i.get(flag).and_then(Value::as_bool).unwrap_or(false)).count()
}

pub fn summarize(phase: &str, input: &Value) -> Result<Value, HandlerError> {
    let summary = match phase {
        "data_import" => {
            let records = items(input, "records")?;
            json!({ "records_imported": records.len() })
        }
        "attribute_mapping" => {
            let mappings = input.get("mappings").and_then(Value::as_object).map(|m| m.len()).unwrap_or(0);
            json!({ "fields_mapped": mappings })
        }
        "inventory" => {
            let assets = items(input, "assets")?;
            json!({ "assets_inventoried": assets.len() })
        }
        "readiness_check" => {
            let apps = items(input, "applications")?;
            let ready = count_flag(&apps, "ready");
            let score = if apps.is_empty() { 0.0 } else { ready as f64 / apps.len() as f64 };
            json!({ "applications": apps.len(), "ready": ready, "readiness_score": score })
        }
        "risk_assessment" => {
            let apps = items(input, "applications")?;
            json!({ "applications": apps.len(), "high_risk": count_flag(&apps, "high_risk") })
        }
        "wave_planning" => {
            let apps = items(input, "applications")?;
            let wave_size = input.get("wave_size").and_then(Value::as_u64).filter(|s| *s > 0).unwrap_or(10) as usize;
            json!({ "applications": apps.len(), "waves": apps.len().div_ceil(wave_size), "wave_size": wave_size })
        }
        "migration_execution" => {
            let servers = items(input, "servers")?;
            json!({ "servers_migrated": servers.len(), "failed": count_flag(&servers, "failed") })
        }
        other => json!({ "phase": other, "items_processed": items(input, "items")?.len() }),
    };
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_score_counts_ready_applications() {
        let input = json!({ "applications": [{ "ready": true }, { "ready": false }, { "ready": true }, {}] });
        let summary = summarize("readiness_check", &input).unwrap();
        assert_eq!(summary["ready"], 2);
        assert_eq!(summary["readiness_score"], 0.5);
    }

    #[test]
    fn wave_count_rounds_up() {
        let input = json!({ "applications": [1, 2, 3, 4, 5], "wave_size": 2 });
        assert_eq!(summarize("wave_planning", &input).unwrap()["waves"], 3);
    }

    #[test]
    fn malformed_collection_fails_the_phase() {
        let err = summarize("data_import", &json!({ "records": "nope" })).unwrap_err();
        assert_eq!(err, HandlerError::Failed("`records` must be an array".into()));
    }
}
