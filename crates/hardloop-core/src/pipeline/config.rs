//! Pipeline configuration: phases, routing table and run-level caps.
//!
//! Routing is an explicit `(phase, outcome) -> Route` table checked by
//! [`PipelineConfig::validate`] before any run starts.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::budget::{RetryBudget, DEFAULT_RETRY_CEILING};
use crate::domain::{Outcome, PhaseId};
use crate::error::{PipelineError, Result};
use crate::gate::{ParseMode, DEFAULT_MAX_DIAGNOSTIC_CHARS};

/// Default cap on repair rounds per run.
pub const DEFAULT_MAX_ROUNDS: u32 = 4;

/// Default cap on phase invocations per run.
pub const DEFAULT_MAX_STEPS: u32 = 64;

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The artifact passed every check it was routed through.
    Safe,
    /// The artifact is still compromised and repair gave up.
    Unsafe,
    /// No conclusion: budget or run caps hit, tools misbehaved, cancelled.
    Inconclusive,
    /// The untouched input failed its initial gate.
    Fatal,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Safe => write!(f, "SAFE"),
            Disposition::Unsafe => write!(f, "UNSAFE"),
            Disposition::Inconclusive => write!(f, "INCONCLUSIVE"),
            Disposition::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Where control goes after a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    /// Advance to another phase.
    Goto { phase: PhaseId },
    /// Charge this phase's budget and hand the diagnostic to a patch phase.
    Repair { with: PhaseId },
    /// Charge `from`'s budget and re-run it with the verdict as feedback.
    Retry { from: PhaseId },
    /// Go back to the phase whose failure opened the pending repair.
    Return,
    /// End the run.
    Terminal { disposition: Disposition },
}

impl Route {
    pub fn goto(phase: impl Into<PhaseId>) -> Self {
        Route::Goto {
            phase: phase.into(),
        }
    }

    pub fn repair(with: impl Into<PhaseId>) -> Self {
        Route::Repair { with: with.into() }
    }

    pub fn retry(from: impl Into<PhaseId>) -> Self {
        Route::Retry { from: from.into() }
    }

    pub fn terminal(disposition: Disposition) -> Self {
        Route::Terminal { disposition }
    }

    /// Phase this route names directly, if any.
    pub fn target(&self) -> Option<&PhaseId> {
        match self {
            Route::Goto { phase } => Some(phase),
            Route::Repair { with } => Some(with),
            Route::Retry { from } => Some(from),
            Route::Return | Route::Terminal { .. } => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Goto { phase } => write!(f, "goto {phase}"),
            Route::Repair { with } => write!(f, "repair with {with}"),
            Route::Retry { from } => write!(f, "retry from {from}"),
            Route::Return => write!(f, "return"),
            Route::Terminal { disposition } => write!(f, "terminal {disposition}"),
        }
    }
}

/// Routing table of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routes {
    pub on_pass: Route,
    pub on_fail: Route,
    pub on_tool_error: Route,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            on_pass: Route::terminal(Disposition::Inconclusive),
            on_fail: Route::terminal(Disposition::Inconclusive),
            on_tool_error: Route::terminal(Disposition::Inconclusive),
        }
    }
}

impl Routes {
    pub fn for_outcome(&self, outcome: Outcome) -> &Route {
        match outcome {
            Outcome::Pass => &self.on_pass,
            Outcome::Fail => &self.on_fail,
            Outcome::ToolError => &self.on_tool_error,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Route> {
        [&self.on_pass, &self.on_fail, &self.on_tool_error].into_iter()
    }
}

/// What a phase does when invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseKind {
    /// Run a registered verifier and classify its output.
    Verify {
        verifier: String,
        parse: ParseMode,
        /// Auxiliary slots handed to the verifier alongside the artifact.
        #[serde(default)]
        include: Vec<String>,
    },
    /// Ask the generator for an auxiliary file (attack script) stored in `slot`.
    Generate {
        slot: String,
        /// Phase whose last diagnostic is passed as context.
        #[serde(default)]
        context_from: Option<PhaseId>,
    },
    /// Ask the generator for a revised artifact.
    Patch,
}

impl PhaseKind {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseKind::Verify { .. } => "verify",
            PhaseKind::Generate { .. } => "generate",
            PhaseKind::Patch => "patch",
        }
    }

    pub fn uses_generator(&self) -> bool {
        !matches!(self, PhaseKind::Verify { .. })
    }
}

/// One node of the pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub id: PhaseId,

    #[serde(flatten)]
    pub kind: PhaseKind,

    #[serde(default)]
    pub routes: Routes,

    /// Override of the pipeline's default retry ceiling for this phase's key.
    #[serde(default)]
    pub retry_ceiling: Option<u32>,

    /// A `Fail` on the untouched input halts the run as `FATAL`.
    #[serde(default)]
    pub initial_gate: bool,

    /// A `Pass` here means the artifact was compromised; budget exhaustion
    /// on its repair route ends the run `UNSAFE`.
    #[serde(default)]
    pub compromise: bool,

    /// Budget keys cleared whenever this phase passes.
    #[serde(default)]
    pub resets_on_pass: Vec<PhaseId>,
}

impl PhaseConfig {
    fn with_kind(id: impl Into<PhaseId>, kind: PhaseKind) -> Self {
        Self {
            id: id.into(),
            kind,
            routes: Routes::default(),
            retry_ceiling: None,
            initial_gate: false,
            compromise: false,
            resets_on_pass: Vec::new(),
        }
    }

    pub fn verify(id: impl Into<PhaseId>, verifier: impl Into<String>, parse: ParseMode) -> Self {
        Self::with_kind(
            id,
            PhaseKind::Verify {
                verifier: verifier.into(),
                parse,
                include: Vec::new(),
            },
        )
    }

    pub fn generate(id: impl Into<PhaseId>, slot: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            PhaseKind::Generate {
                slot: slot.into(),
                context_from: None,
            },
        )
    }

    pub fn patch(id: impl Into<PhaseId>) -> Self {
        Self::with_kind(id, PhaseKind::Patch)
    }

    pub fn on_pass(mut self, route: Route) -> Self {
        self.routes.on_pass = route;
        self
    }

    pub fn on_fail(mut self, route: Route) -> Self {
        self.routes.on_fail = route;
        self
    }

    pub fn on_tool_error(mut self, route: Route) -> Self {
        self.routes.on_tool_error = route;
        self
    }

    /// Auxiliary slots a verify phase passes to its verifier.
    pub fn including(mut self, slots: &[&str]) -> Self {
        if let PhaseKind::Verify { include, .. } = &mut self.kind {
            include.extend(slots.iter().map(|s| s.to_string()));
        }
        self
    }

    /// Phase whose diagnostic seeds a generate phase.
    pub fn with_context_from(mut self, phase: impl Into<PhaseId>) -> Self {
        if let PhaseKind::Generate { context_from, .. } = &mut self.kind {
            *context_from = Some(phase.into());
        }
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = Some(ceiling);
        self
    }

    pub fn initial_gate(mut self) -> Self {
        self.initial_gate = true;
        self
    }

    pub fn compromise(mut self) -> Self {
        self.compromise = true;
        self
    }

    pub fn resets_on_pass(mut self, phases: &[&str]) -> Self {
        self.resets_on_pass = phases.iter().map(|p| PhaseId::from(*p)).collect();
        self
    }
}

fn default_retry_ceiling() -> u32 {
    DEFAULT_RETRY_CEILING
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

fn default_max_diagnostic_chars() -> usize {
    DEFAULT_MAX_DIAGNOSTIC_CHARS
}

/// Complete pipeline definition, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// First phase invoked.
    pub entry: PhaseId,

    pub phases: Vec<PhaseConfig>,

    #[serde(default = "default_retry_ceiling")]
    pub default_retry_ceiling: u32,

    /// Repair rounds allowed before the run stops.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Phase invocations allowed before the run stops.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Tail of diagnostic text kept when forwarding to the generator.
    #[serde(default = "default_max_diagnostic_chars")]
    pub max_diagnostic_chars: usize,
}

impl PipelineConfig {
    pub fn new(entry: impl Into<PhaseId>, phases: Vec<PhaseConfig>) -> Self {
        Self {
            entry: entry.into(),
            phases,
            default_retry_ceiling: DEFAULT_RETRY_CEILING,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_steps: DEFAULT_MAX_STEPS,
            max_diagnostic_chars: DEFAULT_MAX_DIAGNOSTIC_CHARS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_default_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.default_retry_ceiling = ceiling;
        self
    }

    pub fn phase(&self, id: &PhaseId) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| &p.id == id)
    }

    /// Whether any phase needs a generator.
    pub fn needs_generator(&self) -> bool {
        self.phases.iter().any(|p| p.kind.uses_generator())
    }

    /// Verifier names referenced by verify phases, deduplicated.
    pub fn verifier_names(&self) -> BTreeSet<&str> {
        self.phases
            .iter()
            .filter_map(|p| match &p.kind {
                PhaseKind::Verify { verifier, .. } => Some(verifier.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Fresh retry budget carrying the per-phase ceiling overrides.
    pub fn budget(&self) -> RetryBudget {
        self.phases
            .iter()
            .filter_map(|p| p.retry_ceiling.map(|c| (p.id.clone(), c)))
            .fold(RetryBudget::new(self.default_retry_ceiling), |budget, (id, c)| {
                budget.with_ceiling(id, c)
            })
    }

    /// Check structural soundness of the routing graph.
    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(PipelineError::InvalidConfig("no phases defined".into()));
        }
        if self.max_rounds == 0 {
            return Err(PipelineError::InvalidConfig("max_rounds must be at least 1".into()));
        }
        if self.max_steps == 0 {
            return Err(PipelineError::InvalidConfig("max_steps must be at least 1".into()));
        }

        let mut kinds: BTreeMap<&PhaseId, &PhaseKind> = BTreeMap::new();
        for phase in &self.phases {
            if kinds.insert(&phase.id, &phase.kind).is_some() {
                return Err(PipelineError::DuplicatePhase(phase.id.to_string()));
            }
        }

        if !kinds.contains_key(&self.entry) {
            return Err(PipelineError::InvalidConfig(format!(
                "entry phase {} is not defined",
                self.entry
            )));
        }

        let unknown = |from: &PhaseId, target: &PhaseId| PipelineError::UnknownPhase {
            from: from.to_string(),
            target: target.to_string(),
        };

        let mut has_repair = false;
        let mut has_return = false;
        for phase in &self.phases {
            for route in phase.routes.iter() {
                if let Some(target) = route.target() {
                    if !kinds.contains_key(target) {
                        return Err(unknown(&phase.id, target));
                    }
                }
                match route {
                    Route::Repair { with } => {
                        has_repair = true;
                        if !matches!(kinds.get(with), Some(PhaseKind::Patch)) {
                            return Err(PipelineError::InvalidConfig(format!(
                                "phase {} repairs with {with}, which is not a patch phase",
                                phase.id
                            )));
                        }
                    }
                    Route::Return => has_return = true,
                    Route::Terminal {
                        disposition: Disposition::Fatal,
                    } => {
                        return Err(PipelineError::InvalidConfig(format!(
                            "phase {} routes to FATAL; only an initial gate may halt as fatal",
                            phase.id
                        )));
                    }
                    _ => {}
                }
            }

            for key in &phase.resets_on_pass {
                if !kinds.contains_key(key) {
                    return Err(unknown(&phase.id, key));
                }
            }

            match &phase.kind {
                PhaseKind::Generate {
                    context_from: Some(ctx),
                    ..
                } if !kinds.contains_key(ctx) => return Err(unknown(&phase.id, ctx)),
                PhaseKind::Verify { verifier, .. } if verifier.trim().is_empty() => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "phase {} has an empty verifier name",
                        phase.id
                    )));
                }
                _ => {}
            }
        }

        if has_return && !has_repair {
            return Err(PipelineError::InvalidConfig(
                "a phase routes to return but no phase ever opens a repair".into(),
            ));
        }

        self.check_reachability()
    }

    fn check_reachability(&self) -> Result<()> {
        // Return edges lead back to any phase able to open a repair.
        let repair_origins: Vec<&PhaseId> = self
            .phases
            .iter()
            .filter(|p| p.routes.iter().any(|r| matches!(r, Route::Repair { .. })))
            .map(|p| &p.id)
            .collect();

        let mut seen: BTreeSet<&PhaseId> = BTreeSet::new();
        let mut queue: VecDeque<&PhaseId> = VecDeque::from([&self.entry]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(phase) = self.phase(id) else {
                continue;
            };
            for route in phase.routes.iter() {
                match route {
                    Route::Return => queue.extend(repair_origins.iter().copied()),
                    other => queue.extend(other.target()),
                }
            }
        }

        match self.phases.iter().find(|p| !seen.contains(&p.id)) {
            Some(orphan) => Err(PipelineError::UnreachablePhase {
                phase: orphan.id.to_string(),
                entry: self.entry.to_string(),
            }),
            None => Ok(()),
        }
    }
}
