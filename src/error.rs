//! Error taxonomy for the op/workflow execution engine.
//!
//! All engine code propagates `EngineError` with `?`; only `main` decides
//! what the process exit code is and what gets printed.

/// Errors surfaced by the execution engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No op or workflow matched the requested name.
    #[error("op or workflow not found: {0}")]
    NotFound(String),

    /// Malformed manifest or definition (e.g. a missing run command).
    #[error("invalid definition: {0}")]
    Validation(String),

    /// The container engine could not be reached.
    #[error("container engine unavailable: {0}")]
    RuntimeUnavailable(#[source] bollard::errors::Error),

    /// Registry credential issue or revocation failed.
    #[error("registry authentication failed: {0}")]
    Auth(String),

    /// A spawned workflow step exited with a non-zero code or a signal.
    #[error("step failed: {0}")]
    StepFailure(String),

    /// Decode failure or error event inside a build/pull/push stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// The user declined a prompt that the run cannot proceed without.
    #[error("run aborted: {0}")]
    Aborted(String),

    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
