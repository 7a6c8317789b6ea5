//! Grafos de fases de los tipos de flujo estándar.
//!
//! Cada fase depende sólo de fases anteriores; `initialization` la completa
//! el orquestador al crear el flujo.
use flow_core::constants::INITIALIZATION_PHASE;
use flow_core::{FlowType, PhaseDefinition};

/// Descripción estática de un tipo de flujo.
#[derive(Debug, Clone, Copy)]
pub struct FlowTypeSpec {
    pub flow_type: FlowType,
    pub display_name: &'static str,
    /// (fase, dependencias, descripción)
    pub phases: &'static [(&'static str, &'static [&'static str], &'static str)],
    /// La tabla child guarda estado espejo.
    pub mirrors_child_status: bool,
    /// La inicialización crea registro child.
    pub creates_child: bool,
}

impl FlowTypeSpec {
    pub fn phase_definitions(&self) -> Vec<PhaseDefinition> {
        self.phases
            .iter()
            .map(|(name, deps, description)| PhaseDefinition::new(*name).depends_on(deps).describe(*description))
            .collect()
    }

    pub fn phase_names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|(name, _, _)| *name).collect()
    }
}

const INIT: (&str, &[&str], &str) = (INITIALIZATION_PHASE, &[], "flow setup");

pub const DISCOVERY: FlowTypeSpec =
    FlowTypeSpec { flow_type: FlowType::Discovery,
                   display_name: "Discovery",
                   phases: &[INIT,
                             ("data_import", &[INITIALIZATION_PHASE], "load raw inventory records"),
                             ("attribute_mapping", &["data_import"], "map source fields to asset attributes"),
                             ("data_cleansing", &["attribute_mapping"], "normalise and deduplicate records"),
                             ("inventory", &["data_cleansing"], "build the asset inventory"),
                             ("dependency_analysis", &["inventory"], "derive application dependencies")],
                   mirrors_child_status: true,
                   creates_child: true };

pub const ASSESSMENT: FlowTypeSpec =
    FlowTypeSpec { flow_type: FlowType::Assessment,
                   display_name: "Assessment",
                   phases: &[INIT,
                             ("readiness_check", &[INITIALIZATION_PHASE], "check migration readiness"),
                             ("complexity_analysis", &["readiness_check"], "score technical complexity"),
                             ("risk_assessment", &["readiness_check"], "identify migration risks"),
                             ("recommendation_generation",
                              &["complexity_analysis", "risk_assessment"],
                              "produce per-application recommendations")],
                   mirrors_child_status: true,
                   creates_child: true };

pub const PLANNING: FlowTypeSpec =
    FlowTypeSpec { flow_type: FlowType::Planning,
                   display_name: "Planning",
                   phases: &[INIT,
                             ("wave_planning", &[INITIALIZATION_PHASE], "group applications into waves"),
                             ("resource_allocation", &["wave_planning"], "assign teams to waves"),
                             ("timeline_generation",
                              &["wave_planning", "resource_allocation"],
                              "schedule waves on a timeline")],
                   mirrors_child_status: true,
                   creates_child: true };

pub const EXECUTION: FlowTypeSpec =
    FlowTypeSpec { flow_type: FlowType::Execution,
                   display_name: "Execution",
                   phases: &[INIT,
                             ("pre_migration", &[INITIALIZATION_PHASE], "pre-cutover checks"),
                             ("migration_execution", &["pre_migration"], "run the migration"),
                             ("post_migration", &["migration_execution"], "validate the target")],
                   mirrors_child_status: true,
                   creates_child: true };

pub const MODERNIZE: FlowTypeSpec =
    FlowTypeSpec { flow_type: FlowType::Modernize,
                   display_name: "Modernize",
                   phases: &[INIT,
                             ("analysis", &[INITIALIZATION_PHASE], "analyse the current architecture"),
                             ("transformation_design", &["analysis"], "design the target architecture"),
                             ("implementation_plan", &["transformation_design"], "plan the implementation")],
                   mirrors_child_status: false,
                   creates_child: true };

pub const DECOMMISSION: FlowTypeSpec =
    FlowTypeSpec { flow_type: FlowType::Decommission,
                   display_name: "Decommission",
                   phases: &[INIT,
                             ("decommission_planning", &[INITIALIZATION_PHASE], "plan system retirement"),
                             ("data_migration", &["decommission_planning"], "archive or move retained data"),
                             ("system_shutdown", &["data_migration"], "shut down and release resources")],
                   mirrors_child_status: false,
                   creates_child: false };

pub static STANDARD_FLOW_TYPES: [FlowTypeSpec; 6] = [DISCOVERY, ASSESSMENT, PLANNING, EXECUTION, MODERNIZE, DECOMMISSION];

pub fn spec_for(flow_type: FlowType) -> &'static FlowTypeSpec {
    match flow_type {
        FlowType::Discovery => &DISCOVERY,
        FlowType::Assessment => &ASSESSMENT,
        FlowType::Planning => &PLANNING,
        FlowType::Execution => &EXECUTION,
        FlowType::Modernize => &MODERNIZE,
        FlowType::Decommission => &DECOMMISSION,
    }
}
