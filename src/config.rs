//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) una sola vez y expone una estructura
//! inmutable (`CONFIG`) que se convierte en `OrchestratorConfig`.
use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;

use flow_orchestrator::OrchestratorConfig;

/// Configuración global de la aplicación.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub orchestrator: OrchestratorSettings,
    /// Usuario registrado en auditoría cuando el llamador no indica otro.
    pub actor: String,
    /// URL de Postgres; sólo la usa el backend `flow-persistence`.
    pub database_url: Option<String>,
}

/// Parámetros del orquestador leídos del entorno.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub cache_retry_delay_ms: u64,
    pub stuck_flow_threshold_secs: u64,
    pub default_list_limit: usize,
    pub background_execution: bool,
    pub session_cache_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self { cache_retry_delay_ms: defaults.cache_retry_delay.as_millis() as u64,
               stuck_flow_threshold_secs: defaults.stuck_flow_threshold.as_secs(),
               default_list_limit: defaults.default_list_limit,
               background_execution: defaults.background_execution,
               session_cache_capacity: defaults.session_cache_capacity }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

impl AppConfig {
    /// Construye la configuración a partir de una función de búsqueda de
    /// variables; valores ausentes o ilegibles caen a los defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
        where F: Fn(&str) -> Option<String>
    {
        let defaults = OrchestratorSettings::default();
        let orchestrator =
            OrchestratorSettings { cache_retry_delay_ms: parse_or(lookup("MASTERFLOW_CACHE_RETRY_DELAY_MS"),
                                                                  defaults.cache_retry_delay_ms),
                                   stuck_flow_threshold_secs: parse_or(lookup("MASTERFLOW_STUCK_FLOW_THRESHOLD_SECS"),
                                                                       defaults.stuck_flow_threshold_secs),
                                   default_list_limit: parse_or(lookup("MASTERFLOW_DEFAULT_LIST_LIMIT"),
                                                                defaults.default_list_limit).max(1),
                                   background_execution: parse_flag(lookup("MASTERFLOW_BACKGROUND_EXECUTION"),
                                                                    defaults.background_execution),
                                   session_cache_capacity: parse_or(lookup("MASTERFLOW_SESSION_CACHE_CAPACITY"),
                                                                    defaults.session_cache_capacity).max(1) };
        let actor = lookup("MASTERFLOW_ACTOR").filter(|a| !a.trim().is_empty())
                                              .unwrap_or_else(|| "system".to_string());
        Self { orchestrator,
               actor,
               database_url: lookup("DATABASE_URL").filter(|u| !u.is_empty()) }
    }

    /// Lee el entorno del proceso (tras cargar `.env`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        let s = &self.orchestrator;
        OrchestratorConfig { cache_retry_delay: Duration::from_millis(s.cache_retry_delay_ms),
                             stuck_flow_threshold: Duration::from_secs(s.stuck_flow_threshold_secs),
                             default_list_limit: s.default_list_limit,
                             background_execution: s.background_execution,
                             session_cache_capacity: s.session_cache_capacity }
    }
}

/// Instancia global perezosa de configuración, evaluada una sola vez.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_orchestrator_defaults() {
        let cfg = AppConfig::from_lookup(|_| None);
        assert_eq!(cfg.to_orchestrator_config(), OrchestratorConfig::default());
        assert_eq!(cfg.actor, "system");
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("MASTERFLOW_CACHE_RETRY_DELAY_MS", "5"),
                                                        ("MASTERFLOW_STUCK_FLOW_THRESHOLD_SECS", "60"),
                                                        ("MASTERFLOW_DEFAULT_LIST_LIMIT", "7"),
                                                        ("MASTERFLOW_BACKGROUND_EXECUTION", "off"),
                                                        ("MASTERFLOW_SESSION_CACHE_CAPACITY", "16"),
                                                        ("MASTERFLOW_ACTOR", "ops@example.com")]));
        let orchestrator = cfg.to_orchestrator_config();
        assert_eq!(orchestrator.cache_retry_delay, Duration::from_millis(5));
        assert_eq!(orchestrator.stuck_flow_threshold, Duration::from_secs(60));
        assert_eq!(orchestrator.default_list_limit, 7);
        assert!(!orchestrator.background_execution);
        assert_eq!(orchestrator.session_cache_capacity, 16);
        assert_eq!(cfg.actor, "ops@example.com");
    }

    #[test]
    fn unreadable_values_fall_back() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("MASTERFLOW_DEFAULT_LIST_LIMIT", "many"),
                                                        ("MASTERFLOW_BACKGROUND_EXECUTION", "maybe"),
                                                        ("MASTERFLOW_ACTOR", "  ")]));
        assert_eq!(cfg.orchestrator, OrchestratorSettings::default());
        assert_eq!(cfg.actor, "system");
    }

    #[test]
    fn zero_list_limit_is_raised_to_one() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("MASTERFLOW_DEFAULT_LIST_LIMIT", "0")]));
        assert_eq!(cfg.orchestrator.default_list_limit, 1);
    }
}
