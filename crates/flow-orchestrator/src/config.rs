use std::time::Duration;

/// Parámetros de ejecución del orquestador.
///
/// El crate raíz lo construye desde el entorno; aquí sólo hay valores por
/// defecto razonables.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Espera antes del único reintento de registro en cache.
    pub cache_retry_delay: Duration,
    /// Un flujo `running` sin actualizaciones durante este tiempo se
    /// considera atascado.
    pub stuck_flow_threshold: Duration,
    pub default_list_limit: usize,
    /// Las fases pedidas por `resume_flow` se programan en segundo plano; si
    /// es `false` se ejecutan dentro de la llamada.
    pub background_execution: bool,
    /// Máximo de masters retenidos en la cache de sesión.
    pub session_cache_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { cache_retry_delay: Duration::from_millis(100),
               stuck_flow_threshold: Duration::from_secs(3600),
               default_list_limit: 50,
               background_execution: true,
               session_cache_capacity: 1024 }
    }
}
