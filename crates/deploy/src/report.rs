//! Operator-facing rendering of run reports, registry contents and history.

use std::fmt;

use comfy_table::{Table, presets::UTF8_FULL};

use crate::{
    NetworkContext,
    journal::{LogAction, LogEntry},
    orchestrator::{RunOutcome, RunReport, ScriptState},
    registry::RegistryEntry,
    script::{Script, TagFilter},
};

fn status_icon(state: ScriptState) -> &'static str {
    match state {
        ScriptState::Completed { fully_reused: true } => "=",
        ScriptState::Completed { fully_reused: false } => "✓",
        ScriptState::Skipped => "-",
        ScriptState::Failed => "✗",
        ScriptState::Cancelled => "!",
    }
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.outcome {
            RunOutcome::Completed => "COMPLETED",
            RunOutcome::Failed(_) => "FAILED",
            RunOutcome::Cancelled { .. } => "CANCELLED",
        };
        writeln!(f, "Deployment on {} [tags: {}]: {}", self.network, self.tags, status)?;
        writeln!(f)?;

        for script in &self.scripts {
            writeln!(f, "  {} {} ({})", status_icon(script.state), script.name, script.state)?;
            for step in &script.steps {
                writeln!(f, "      #{} {}: {}", step.index, step.description, step.action)?;
            }
        }

        match &self.outcome {
            RunOutcome::Completed => {}
            RunOutcome::Failed(failure) => {
                writeln!(f)?;
                writeln!(f, "Halted at {}", failure.at)?;
                writeln!(f, "  target: {}", failure.target)?;
                writeln!(f, "  error:  {}", failure.error)?;
            }
            RunOutcome::Cancelled { last_completed } => {
                writeln!(f)?;
                match last_completed {
                    Some(at) => writeln!(f, "Cancelled after {at}")?,
                    None => writeln!(f, "Cancelled before any step completed")?,
                }
            }
        }

        if !self.log_errors.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "Warning: execution log is incomplete ({} failed writes)",
                self.log_errors.len()
            )?;
            for error in &self.log_errors {
                writeln!(f, "  {error}")?;
            }
        }

        Ok(())
    }
}

/// One row per executed step (or per script when it has none).
pub fn run_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Script", "State", "Step", "Result"]);

    for script in &report.scripts {
        if script.steps.is_empty() {
            table.add_row(vec![
                script.name.clone(),
                script.state.to_string(),
                String::new(),
                String::new(),
            ]);
            continue;
        }
        for step in &script.steps {
            table.add_row(vec![
                script.name.clone(),
                script.state.to_string(),
                format!("#{} {}", step.index, step.description),
                step.action.to_string(),
            ]);
        }
    }

    table
}

/// Scripts in execution order and whether a run with `tags` would execute them.
///
/// The skip column is only filled when a network is given.
pub fn scripts_table(
    scripts: &[Script],
    tags: &TagFilter,
    network: Option<&NetworkContext>,
) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Script", "Tags", "Steps", "Selected", "On network"]);

    for (index, script) in scripts.iter().enumerate() {
        let selected = tags.admits(script);
        let on_network = match network {
            Some(_) if !selected => String::new(),
            Some(network) if script.should_skip(network) => format!("skip ({})", network.name),
            Some(network) => format!("run ({})", network.name),
            None => String::new(),
        };
        table.add_row(vec![
            index.to_string(),
            script.name.clone(),
            script.tags.iter().cloned().collect::<Vec<_>>().join(","),
            script.steps.len().to_string(),
            if selected { "yes" } else { "no" }.to_string(),
            on_network,
        ]);
    }

    table
}

pub fn registry_table<'a>(entries: impl IntoIterator<Item = &'a RegistryEntry>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Network", "Name", "Contract", "Address", "Args hash", "Deployed at",
    ]);

    for entry in entries {
        table.add_row(vec![
            entry.network.clone(),
            entry.name.clone(),
            entry.contract_kind.clone(),
            entry.identity.to_string(),
            entry.constructor_args_hash.chars().take(12).collect(),
            format_timestamp(entry.timestamp),
        ]);
    }

    table
}

pub fn history_table<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Time", "Network", "Script", "Step", "Target", "Action", "Details",
    ]);

    for entry in entries {
        table.add_row(vec![
            format_timestamp(entry.timestamp),
            entry.network.clone(),
            entry.script.clone().unwrap_or_default(),
            entry.step.map(|s| s.to_string()).unwrap_or_default(),
            entry.target.clone(),
            entry.action.to_string(),
            action_details(&entry.action),
        ]);
    }

    table
}

fn action_details(action: &LogAction) -> String {
    match action {
        LogAction::Deployed { contract_kind, identity } => format!("{contract_kind} at {identity}"),
        LogAction::Replaced {
            contract_kind,
            previous,
            identity,
        } => format!("{contract_kind} {previous} -> {identity}"),
        LogAction::Reused { identity } => identity.to_string(),
        LogAction::Called {
            method,
            target,
            tx_hash,
        } => format!("{method} on {target} (tx {tx_hash})"),
        LogAction::Failed { error } => error.clone(),
        LogAction::Skipped | LogAction::Cancelled => String::new(),
    }
}
