//! Sequential invocation pipeline.
//!
//! A `run` invocation is an ordered list of named stages, each an async
//! function that consumes and returns the accumulated `RunState`. The
//! driver awaits every stage to full completion (prompts included) before
//! starting the next; nothing ever runs concurrently across stages.

use bollard::Docker;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use futures::future::BoxFuture;

use crate::api::CatalogClient;
use crate::constants::{DEBUG_ENV, FORMAT_GREEN, FORMAT_RESET, FORMAT_YELLOW};
use crate::container::{run_session, SessionOutcome};
use crate::error::{EngineError, Result};
use crate::image::{ensure_image, image_tag};
use crate::manifest::{Op, OpOrWorkflow, Workflow};
use crate::resolve::{print_op_help, resolve_target, ResolvedTarget};
use crate::runtime::{build_runtime_spec, RuntimeSpec};
use crate::settings::Settings;
use crate::workflow::{report, run_workflow, StepResult};

/// Options for one `run` invocation, handed in by the CLI surface.
#[derive(Debug, Clone)]
pub struct RunOpts {
    pub name_or_path: String,
    /// Rebuild the image even when it already exists locally.
    pub build: bool,
    /// Print the op's declared help instead of running it.
    pub op_help: bool,
    /// Trailing tokens passed through verbatim to the op or workflow.
    pub args: Vec<String>,
}

/// State threaded through the stage list. Owns the one container session
/// an invocation may hold; discarded at process exit.
pub struct RunState {
    opts: RunOpts,
    settings: Settings,
    client: CatalogClient,
    docker: Option<Docker>,
    target: Option<ResolvedTarget>,
    spec: Option<RuntimeSpec>,
    results: Vec<StepResult>,
    /// Set when a stage finished the invocation early (e.g. op help).
    done: bool,
}

impl RunState {
    fn new(opts: RunOpts) -> Result<Self> {
        let settings = Settings::load()?;
        let client = CatalogClient::new(&settings);
        Ok(Self {
            opts,
            settings,
            client,
            docker: None,
            target: None,
            spec: None,
            results: Vec::new(),
            done: false,
        })
    }

    /// Lazily connected container engine handle. The connection itself is
    /// lazy, so a ping confirms the daemon is actually reachable; either
    /// failure is the `RuntimeUnavailable` case of the taxonomy.
    async fn docker(&mut self) -> Result<Docker> {
        if self.docker.is_none() {
            let docker =
                Docker::connect_with_local_defaults().map_err(EngineError::RuntimeUnavailable)?;
            docker
                .ping()
                .await
                .map_err(EngineError::RuntimeUnavailable)?;
            self.docker = Some(docker);
        }
        self.docker
            .clone()
            .ok_or_else(|| EngineError::Validation("container engine handle missing".to_string()))
    }

    fn target(&self) -> Result<&ResolvedTarget> {
        self.target
            .as_ref()
            .ok_or_else(|| EngineError::Validation("no target resolved yet".to_string()))
    }

    fn op(&self) -> Result<&Op> {
        match &self.target()?.entry {
            OpOrWorkflow::Op(op) => Ok(op),
            OpOrWorkflow::Workflow(_) => {
                Err(EngineError::Validation("expected an op target".to_string()))
            }
        }
    }

    fn workflow(&self) -> Result<&Workflow> {
        match &self.target()?.entry {
            OpOrWorkflow::Workflow(wf) => Ok(wf),
            OpOrWorkflow::Op(_) => Err(EngineError::Validation(
                "expected a workflow target".to_string(),
            )),
        }
    }
}

type StageFn = for<'a> fn(&'a mut RunState) -> BoxFuture<'a, Result<()>>;

/// One named pipeline stage.
struct Stage {
    name: &'static str,
    run: StageFn,
}

const RESOLVE_STAGES: &[Stage] = &[Stage {
    name: "resolve",
    run: stage_resolve,
}];

const OP_STAGES: &[Stage] = &[
    Stage {
        name: "provision-image",
        run: stage_provision,
    },
    Stage {
        name: "configure-runtime",
        run: stage_configure,
    },
    Stage {
        name: "container-session",
        run: stage_session,
    },
];

const WORKFLOW_STAGES: &[Stage] = &[
    Stage {
        name: "run-steps",
        run: stage_steps,
    },
    Stage {
        name: "report",
        run: stage_report,
    },
];

/// Execute one full `run` invocation.
pub async fn run(opts: RunOpts) -> Result<()> {
    let mut state = RunState::new(opts)?;
    drive(&mut state, RESOLVE_STAGES).await?;
    if state.done {
        return Ok(());
    }

    let stages = match state.target()?.entry {
        OpOrWorkflow::Op(_) => OP_STAGES,
        OpOrWorkflow::Workflow(_) => WORKFLOW_STAGES,
    };
    drive(&mut state, stages).await
}

async fn drive(state: &mut RunState, stages: &[Stage]) -> Result<()> {
    for stage in stages {
        if std::env::var_os(DEBUG_ENV).is_some() {
            eprintln!("stage: {}", stage.name);
        }
        (stage.run)(state).await?;
        if state.done {
            break;
        }
    }
    Ok(())
}

fn stage_resolve(state: &mut RunState) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let target = resolve_target(&state.client, &state.opts.name_or_path).await?;

        // Help short-circuits before anything is provisioned or run.
        if state.opts.op_help {
            if let OpOrWorkflow::Op(op) = &target.entry {
                if !op.help.is_empty() {
                    print_op_help(op);
                    state.done = true;
                }
            }
        }
        state.target = Some(target);
        Ok(())
    })
}

fn stage_provision(state: &mut RunState) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let op = state.op()?.clone();
        let manifest_dir = state.target()?.manifest_dir.clone();
        let tag = image_tag(&op, &state.settings);
        let docker = state.docker().await?;
        ensure_image(
            &docker,
            &state.client,
            &op,
            &tag,
            state.opts.build,
            manifest_dir.as_deref(),
        )
        .await
    })
}

fn stage_configure(state: &mut RunState) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let op = state.op()?.clone();
        let tag = image_tag(&op, &state.settings);
        let home = dirs::home_dir().ok_or_else(|| {
            EngineError::Validation("could not determine the home directory".to_string())
        })?;
        let cwd = std::env::current_dir()?;

        let (spec, settings_changed) = build_runtime_spec(
            &op,
            tag,
            &state.opts.args,
            &mut state.settings,
            &home,
            &cwd,
            std::env::vars(),
            confirm,
        )?;

        if settings_changed {
            // Losing the remembered choice is not worth failing the run.
            if let Err(err) = state.settings.save() {
                eprintln!("warning: could not persist mount consent: {}", err);
            }
        }
        state.spec = Some(spec);
        Ok(())
    })
}

fn stage_session(state: &mut RunState) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let spec = state
            .spec
            .take()
            .ok_or_else(|| EngineError::Validation("no runtime spec computed".to_string()))?;
        let docker = state.docker().await?;

        match run_session(&docker, &spec).await? {
            SessionOutcome::Exited(0) => {
                println!("{}Op completed successfully{}", FORMAT_GREEN, FORMAT_RESET);
            }
            SessionOutcome::Exited(code) => {
                println!(
                    "{}Op exited with code {}{}",
                    FORMAT_YELLOW, code, FORMAT_RESET
                );
            }
            SessionOutcome::Detached => {
                println!(
                    "{}Detached; the container keeps running in the background{}",
                    FORMAT_YELLOW, FORMAT_RESET
                );
            }
        }
        Ok(())
    })
}

fn stage_steps(state: &mut RunState) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let workflow = state.workflow()?.clone();
        state.results = run_workflow(&workflow, &state.opts.args).await?;
        Ok(())
    })
}

fn stage_report(state: &mut RunState) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let workflow = state.workflow()?;
        report(workflow, &state.results);
        Ok(())
    })
}

/// Interactive yes/no prompt used by the consent flow.
fn confirm(message: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Err(EngineError::Aborted(format!(
            "cannot prompt without an interactive terminal: {}",
            message
        )));
    }
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(message)
        .default(false)
        .interact()?)
}

/// `ops list` entry point, sharing the resolver's catalog client setup.
pub async fn list() -> Result<()> {
    let settings = Settings::load()?;
    let client = CatalogClient::new(&settings);
    crate::resolve::list_targets(&client).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_engine_is_runtime_unavailable() {
        // Point the engine client at a socket that cannot exist; the
        // connection itself is lazy, so only the ping can catch this.
        std::env::set_var("DOCKER_HOST", "unix:///nonexistent/docker.sock");
        let mut state = RunState::new(RunOpts {
            name_or_path: "x".to_string(),
            build: false,
            op_help: false,
            args: Vec::new(),
        })
        .unwrap();

        match state.docker().await {
            Err(EngineError::RuntimeUnavailable(_)) => {}
            Err(other) => panic!("expected RuntimeUnavailable, got {:?}", other),
            Ok(_) => panic!("expected RuntimeUnavailable, got a live handle"),
        }
        std::env::remove_var("DOCKER_HOST");
    }
}
