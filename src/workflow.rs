//! Workflow step runner.
//!
//! Decomposes a workflow into its ordered phase list (before, main, after)
//! and executes each step as an independent child process inheriting the
//! interactive terminal. Individual step failures are recorded, never
//! fatal: the runner always attempts the full phase list and reports an
//! aggregate at the end.

use std::fmt;

use tokio::process::Command;

use crate::constants::{FORMAT_BOLD, FORMAT_GRAY, FORMAT_GREEN, FORMAT_RED, FORMAT_RESET};
use crate::error::{EngineError, Result};
use crate::manifest::Workflow;

/// Which part of the workflow a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    Main,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => write!(f, "before"),
            Phase::Main => write!(f, "main"),
            Phase::After => write!(f, "after"),
        }
    }
}

/// Outcome of one executed step. Accumulated, never discarded mid-run.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub phase: Phase,
    pub command: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub success: bool,
}

impl StepResult {
    fn diagnostic(&self) -> EngineError {
        let cause = match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            (None, None) => "failed to spawn".to_string(),
        };
        EngineError::StepFailure(format!(
            "{} step '{}' ({})",
            self.phase, self.command, cause
        ))
    }
}

/// Decompose a workflow into the ordered phase list: every `before`
/// command, every entry of the single `main` definition in declared order,
/// then every `after` command. Each entry becomes its own child process so
/// an early failure never skips the remaining declared steps. Only the
/// final main entry receives the trailing passthrough arguments.
pub fn phase_list(workflow: &Workflow, passthrough: &[String]) -> Vec<(Phase, String)> {
    let mut phases = Vec::new();
    for command in &workflow.before {
        phases.push((Phase::Before, command.clone()));
    }

    let last = workflow.steps.len().saturating_sub(1);
    for (index, command) in workflow.steps.iter().enumerate() {
        let mut command = command.clone();
        if index == last && !passthrough.is_empty() {
            command = format!("{} {}", command, passthrough.join(" "));
        }
        phases.push((Phase::Main, command));
    }

    for command in &workflow.after {
        phases.push((Phase::After, command.clone()));
    }
    phases
}

/// Execute every declared step in order, tolerating individual failures.
///
/// Spawning errors are recorded like any other step failure; the remaining
/// steps still run. The returned results carry the whole run.
pub async fn run_workflow(workflow: &Workflow, passthrough: &[String]) -> Result<Vec<StepResult>> {
    println!(
        "{}Running workflow{} {} ({} steps)",
        FORMAT_BOLD,
        FORMAT_RESET,
        workflow.name,
        workflow.before.len() + workflow.steps.len() + workflow.after.len()
    );

    let mut results = Vec::new();
    for (phase, command) in phase_list(workflow, passthrough) {
        println!("{}[{}]{} {}", FORMAT_GRAY, phase, FORMAT_RESET, command);
        results.push(run_step(phase, &command, &workflow.env).await);
    }
    Ok(results)
}

async fn run_step(phase: Phase, command: &str, env: &[String]) -> StepResult {
    let mut child = Command::new("sh");
    child.arg("-c").arg(command);

    // Declared workflow env fills gaps; existing process env wins.
    for pair in env {
        if let Some((key, value)) = pair.split_once('=') {
            if std::env::var_os(key).is_none() {
                child.env(key, value);
            }
        }
    }

    let status = match child.status().await {
        Ok(status) => status,
        Err(err) => {
            eprintln!("{}step failed to spawn:{} {}", FORMAT_RED, FORMAT_RESET, err);
            return StepResult {
                phase,
                command: command.to_string(),
                exit_code: None,
                signal: None,
                success: false,
            };
        }
    };

    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    StepResult {
        phase,
        command: command.to_string(),
        exit_code: status.code(),
        signal,
        success: status.success(),
    }
}

/// Report the run: one success line when nothing failed, otherwise the
/// first failure's diagnostic plus the aggregate failure count. Recorded
/// failures deliberately do not change the process exit code.
pub fn report(workflow: &Workflow, results: &[StepResult]) {
    let failures: Vec<&StepResult> = results.iter().filter(|result| !result.success).collect();
    match failures.first() {
        None => println!(
            "{}Workflow '{}' completed successfully{}",
            FORMAT_GREEN, workflow.name, FORMAT_RESET
        ),
        Some(first) => {
            eprintln!("{}{}{}", FORMAT_RED, first.diagnostic(), FORMAT_RESET);
            eprintln!(
                "{}Workflow '{}' finished with {} failed step(s) out of {}{}",
                FORMAT_RED,
                workflow.name,
                failures.len(),
                results.len(),
                FORMAT_RESET
            );
        }
    }
}
