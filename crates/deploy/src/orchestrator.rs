//! The orchestrator: selects scripts, runs their steps in order, and reports.
//!
//! Execution is strictly sequential and follows declaration order, which doubles as
//! the dependency order. The first failing step halts the whole run. Re-running after
//! a fix resumes at the first step whose component is not in the registry yet.

use std::collections::HashMap;

use tokio::sync::watch;

use crate::{
    ExecutionLog, NetworkContext, Registry,
    error::Error,
    executor::{CallExecutor, DeploymentExecutor},
    journal::LogAction,
    script::{Script, TagFilter},
    step::{StepAction, StepContext},
};

/// Terminal state of a script within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// The skip predicate held for the active network.
    Skipped,
    /// Every step succeeded. `fully_reused` means no step had an external side effect.
    Completed { fully_reused: bool },
    Failed,
    Cancelled,
}

impl std::fmt::Display for ScriptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptState::Skipped => write!(f, "skipped"),
            ScriptState::Completed { fully_reused: true } => write!(f, "completed (fully-reused)"),
            ScriptState::Completed { fully_reused: false } => write!(f, "completed (executed)"),
            ScriptState::Failed => write!(f, "failed"),
            ScriptState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A step that completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub description: String,
    pub action: StepAction,
}

/// Everything that happened to one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub name: String,
    pub state: ScriptState,
    /// Steps that completed, in order.
    pub steps: Vec<StepReport>,
}

/// Identifies a step within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRef {
    pub script: String,
    pub step_index: usize,
    pub step: String,
}

impl std::fmt::Display for StepRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} step #{} ({})", self.script, self.step_index, self.step)
    }
}

/// The step that halted a run, and why.
#[derive(Debug)]
pub struct RunFailure {
    pub at: StepRef,
    /// Component the failing step acted on.
    pub target: String,
    pub error: Error,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Failed(Box<RunFailure>),
    /// Halted on request; `last_completed` is the last step that fully finished.
    Cancelled { last_completed: Option<StepRef> },
}

/// Result of [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunReport {
    pub network: String,
    pub tags: TagFilter,
    /// Every script attempted, in execution order.
    pub scripts: Vec<ScriptReport>,
    pub outcome: RunOutcome,
    /// Execution log writes that failed; the audit trail of this run is incomplete.
    pub log_errors: Vec<Error>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match &self.outcome {
            RunOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn script(&self, name: &str) -> Option<&ScriptReport> {
        self.scripts.iter().find(|script| script.name == name)
    }

    /// Number of steps that deployed or called something.
    pub fn side_effects(&self) -> usize {
        self.scripts
            .iter()
            .flat_map(|script| &script.steps)
            .filter(|step| step.action.is_side_effect())
            .count()
    }

    /// Process exit code for the operator-facing command.
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            RunOutcome::Completed => 0,
            RunOutcome::Failed(_) => 1,
            RunOutcome::Cancelled { .. } => 130,
        }
    }
}

/// Runs scripts against one network, owning the registry and execution log.
pub struct Orchestrator<E> {
    registry: Registry,
    log: ExecutionLog,
    executor: E,
    redeploy: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl<E> Orchestrator<E>
where
    E: DeploymentExecutor + CallExecutor,
{
    pub fn new(registry: Registry, log: ExecutionLog, executor: E) -> Self {
        Self {
            registry,
            log,
            executor,
            redeploy: false,
            cancel: None,
        }
    }

    /// Force every deploy step to redeploy and supersede its registry entry.
    pub fn redeploy(mut self, redeploy: bool) -> Self {
        self.redeploy = redeploy;
        self
    }

    /// Halt between steps once `true` is sent on this channel.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_parts(self) -> (Registry, ExecutionLog, E) {
        (self.registry, self.log, self.executor)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Append to the execution log; a failed write is kept in the report.
    fn record(&mut self, report: &mut RunReport, component: &str, action: LogAction) {
        if let Err(error) = self.log.append(&report.network, component, action) {
            tracing::warn!(component, %error, "Failed to write execution log entry");
            report.log_errors.push(error);
        }
    }

    /// Run every script admitted by `tags` and not skipped on `network`.
    ///
    /// Scripts keep their declaration order. The run stops at the first failing step
    /// or at a cancellation request observed between two steps.
    pub async fn run(
        &mut self,
        all_scripts: &[Script],
        tags: &TagFilter,
        network: &NetworkContext,
    ) -> RunReport {
        let mut report = RunReport {
            network: network.name.clone(),
            tags: tags.clone(),
            scripts: Vec::new(),
            outcome: RunOutcome::Completed,
            log_errors: Vec::new(),
        };

        let selected: Vec<&Script> = all_scripts.iter().filter(|s| tags.admits(s)).collect();

        tracing::info!(
            network = %network.name,
            tags = %tags,
            scripts = selected.len(),
            redeploy = self.redeploy,
            "Starting deployment run..."
        );

        if let Err(failure) = check_declaration_order(all_scripts, &selected, network) {
            tracing::error!(at = %failure.at, error = %failure.error, "Declaration order violated");
            report.scripts.push(ScriptReport {
                name: failure.at.script.clone(),
                state: ScriptState::Failed,
                steps: Vec::new(),
            });
            report.outcome = RunOutcome::Failed(Box::new(failure));
            return report;
        }

        let mut last_completed: Option<StepRef> = None;

        for script in selected {
            if script.should_skip(network) {
                tracing::info!(script = %script.name, "Skipping script");
                self.log.set_position(Some(&script.name), None);
                self.record(&mut report, &script.name, LogAction::Skipped);
                report.scripts.push(ScriptReport {
                    name: script.name.clone(),
                    state: ScriptState::Skipped,
                    steps: Vec::new(),
                });
                continue;
            }

            tracing::info!(script = %script.name, steps = script.steps.len(), "Running script...");

            let mut script_report = ScriptReport {
                name: script.name.clone(),
                state: ScriptState::Completed { fully_reused: true },
                steps: Vec::new(),
            };

            for (index, step) in script.steps.iter().enumerate() {
                let at = StepRef {
                    script: script.name.clone(),
                    step_index: index,
                    step: step.to_string(),
                };
                self.log.set_position(Some(&script.name), Some(index));

                if self.is_cancelled() {
                    tracing::warn!(%at, "Cancellation requested, halting before step");
                    self.record(&mut report, step.target(), LogAction::Cancelled);
                    script_report.state = ScriptState::Cancelled;
                    report.scripts.push(script_report);
                    report.outcome = RunOutcome::Cancelled { last_completed };
                    return report;
                }

                let mut ctx = StepContext {
                    network,
                    registry: &mut self.registry,
                    log: &mut self.log,
                    executor: &self.executor,
                    redeploy: self.redeploy,
                };

                match step.execute(&mut ctx).await {
                    Ok(action) => {
                        tracing::debug!(%at, %action, "Step completed");
                        script_report.steps.push(StepReport {
                            index,
                            description: at.step.clone(),
                            action,
                        });
                        last_completed = Some(at);
                    }
                    Err(error) => {
                        tracing::error!(%at, %error, "Step failed, halting run");
                        let entry = LogAction::Failed {
                            error: error.to_string(),
                        };
                        self.record(&mut report, step.target(), entry);
                        script_report.state = ScriptState::Failed;
                        report.scripts.push(script_report);
                        report.outcome = RunOutcome::Failed(Box::new(RunFailure {
                            at,
                            target: step.target().to_string(),
                            error,
                        }));
                        return report;
                    }
                }
            }

            let fully_reused = !script_report.steps.iter().any(|s| s.action.is_side_effect());
            script_report.state = ScriptState::Completed { fully_reused };
            tracing::info!(script = %script.name, state = %script_report.state, "Script finished");
            report.scripts.push(script_report);
        }

        self.log.set_position(None, None);
        tracing::info!(
            network = %network.name,
            side_effects = report.side_effects(),
            "Deployment run complete"
        );
        report
    }
}

/// Reject references to components that are only declared further down.
///
/// A step may reference anything deployed by an earlier step (in the same or a prior
/// script) or anything never declared at all (deployed out of band). Referencing a
/// name whose first declaration comes later is a declaration-order bug, reported even
/// if the registry happens to hold that name from an earlier session.
///
/// Scripts skipped on `network` never run there, so their declarations do not count
/// and their own steps are not checked.
fn check_declaration_order(
    all_scripts: &[Script],
    selected: &[&Script],
    network: &NetworkContext,
) -> Result<(), RunFailure> {
    let runs_here: Vec<bool> = all_scripts.iter().map(|s| !s.should_skip(network)).collect();

    let mut first_declared: HashMap<&str, (usize, usize)> = HashMap::new();
    for (script_index, script) in all_scripts.iter().enumerate() {
        if !runs_here[script_index] {
            continue;
        }
        for (step_index, step) in script.steps.iter().enumerate() {
            if let crate::step::Step::Deploy(deploy) = step {
                first_declared
                    .entry(deploy.name.as_str())
                    .or_insert((script_index, step_index));
            }
        }
    }

    for (script_index, script) in all_scripts.iter().enumerate() {
        if !runs_here[script_index] || !selected.iter().any(|s| std::ptr::eq(*s, script)) {
            continue;
        }
        for (step_index, step) in script.steps.iter().enumerate() {
            for reference in step.references() {
                let Some(&declared_at) = first_declared.get(reference) else {
                    continue;
                };
                if declared_at >= (script_index, step_index) {
                    return Err(RunFailure {
                        at: StepRef {
                            script: script.name.clone(),
                            step_index,
                            step: step.to_string(),
                        },
                        target: step.target().to_string(),
                        error: Error::UnresolvedDependency {
                            network: network.name.clone(),
                            component: reference.to_string(),
                        },
                    });
                }
            }
        }
    }

    Ok(())
}
