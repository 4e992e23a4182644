//! Runtime configuration builder.
//!
//! Computes the launch configuration for a resolved op: the merged
//! environment, expanded bind mounts, working directory and the final argv.
//! Derived per invocation, never persisted.

use std::collections::BTreeMap;
use std::path::Path;

use crate::constants::{HOME_MOUNT_TARGET, WORKDIR_CWD, WORKDIR_OPS};
use crate::error::{EngineError, Result};
use crate::manifest::Op;
use crate::settings::Settings;

/// Everything the container engine needs to launch one op session.
#[derive(Debug, Clone)]
pub struct RuntimeSpec {
    pub image: String,
    pub argv: Vec<String>,
    /// Final serialized `KEY=VAL` environment, sorted by key.
    pub env: Vec<String>,
    /// Absolute `host:container` bind pairs.
    pub binds: Vec<String>,
    pub ports: Vec<String>,
    pub working_dir: String,
    pub network_mode: Option<String>,
}

/// Tokenize the op's run string plus trailing passthrough arguments into an
/// argv array. Splitting is naive whitespace splitting: quoting and
/// escaping semantics are deliberately undefined here (see DESIGN.md).
pub fn tokenize_run(run: &str, passthrough: &[String]) -> Vec<String> {
    let mut argv: Vec<String> = run.split_whitespace().map(str::to_string).collect();
    argv.extend(passthrough.iter().cloned());
    argv
}

/// Merge the fixed default environment with the op's declared env and the
/// process environment. Later sources win on key collision, process env
/// last. Result is re-serialized as a sorted `KEY=VAL` list.
pub fn merge_env<I>(defaults: &[(String, String)], declared: &[String], process: I) -> Vec<String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in defaults {
        merged.insert(key.clone(), value.clone());
    }
    for pair in declared {
        if let Some((key, value)) = pair.split_once('=') {
            merged.insert(key.to_string(), value.to_string());
        }
    }
    for (key, value) in process {
        merged.insert(key, value);
    }
    merged
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}

/// Replace a leading `~` or `$HOME` token in a declared bind pair with the
/// resolved home directory. The host side must end up absolute: a relative
/// path would reach the engine as a named volume instead of a bind.
pub fn resolve_bind(bind: &str, home: &Path) -> Result<String> {
    let home = home.to_string_lossy();
    let expanded = if let Some(rest) = bind.strip_prefix('~') {
        format!("{}{}", home, rest)
    } else if let Some(rest) = bind.strip_prefix("$HOME") {
        format!("{}{}", home, rest)
    } else {
        bind.to_string()
    };

    let host = expanded.split(':').next().unwrap_or(&expanded);
    if !Path::new(host).is_absolute() {
        return Err(EngineError::Validation(format!(
            "bind '{}' does not resolve to an absolute host path",
            bind
        )));
    }
    Ok(expanded)
}

/// Two-stage consent flow guarding `mountHome`.
///
/// Declining the first prompt aborts the run before any container exists.
/// The remember answer is persisted only when no prior choice is stored.
pub fn confirm_home_mount<P>(settings: &mut Settings, mut prompt: P) -> Result<bool>
where
    P: FnMut(&str) -> Result<bool>,
{
    if settings.always_mount_home == Some(true) {
        return Ok(false);
    }

    let allowed = prompt("This op mounts your home directory (read-only). Allow?")?;
    if !allowed {
        return Err(EngineError::Aborted(
            "home directory mount declined".to_string(),
        ));
    }

    if settings.always_mount_home.is_none() {
        let remember = prompt("Always allow and skip this prompt in the future?")?;
        settings.always_mount_home = Some(remember);
        return Ok(true);
    }
    Ok(false)
}

/// Fixed defaults injected into every op container: execution context flag,
/// access token and API endpoint.
pub fn default_env(settings: &Settings) -> Vec<(String, String)> {
    let mut defaults = vec![
        ("OPS_RUNNING".to_string(), "true".to_string()),
        ("OPS_API_HOST".to_string(), settings.api_endpoint()),
    ];
    if let Some(token) = &settings.access_token {
        defaults.push(("OPS_ACCESS_TOKEN".to_string(), token.clone()));
    }
    defaults
}

/// Compute the full runtime launch configuration for a resolved op.
///
/// `prompt` backs the mount-home consent flow; `settings_changed` callers
/// persist the remembered choice. `home` and `cwd` are injected for
/// testability.
#[allow(clippy::too_many_arguments)]
pub fn build_runtime_spec<P, I>(
    op: &Op,
    image: String,
    passthrough: &[String],
    settings: &mut Settings,
    home: &Path,
    cwd: &Path,
    process_env: I,
    prompt: P,
) -> Result<(RuntimeSpec, bool)>
where
    P: FnMut(&str) -> Result<bool>,
    I: IntoIterator<Item = (String, String)>,
{
    let mut binds: Vec<String> = op
        .bind
        .iter()
        .map(|bind| resolve_bind(bind, home))
        .collect::<Result<_>>()?;

    let working_dir = if op.mount_cwd {
        binds.push(format!("{}:{}", cwd.display(), WORKDIR_CWD));
        WORKDIR_CWD.to_string()
    } else {
        WORKDIR_OPS.to_string()
    };

    let mut settings_changed = false;
    if op.mount_home {
        settings_changed = confirm_home_mount(settings, prompt)?;
        binds.push(format!("{}:{}:ro", home.display(), HOME_MOUNT_TARGET));
    }

    let spec = RuntimeSpec {
        image,
        argv: tokenize_run(&op.run, passthrough),
        env: merge_env(&default_env(settings), &op.env, process_env),
        binds,
        ports: op.port.clone(),
        working_dir,
        network_mode: op.network.clone(),
    };
    Ok((spec, settings_changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bare_op(run: &str) -> Op {
        Op {
            name: "test".to_string(),
            version: "0.1.0".to_string(),
            description: None,
            run: run.to_string(),
            image: None,
            env: Vec::new(),
            bind: Vec::new(),
            port: Vec::new(),
            src: Vec::new(),
            mount_cwd: false,
            mount_home: false,
            network: None,
            help: Default::default(),
            team_id: None,
            is_published: false,
        }
    }

    fn no_prompt(_: &str) -> Result<bool> {
        panic!("prompt must not be issued");
    }

    #[test]
    fn bare_op_yields_argv_default_workdir_and_no_binds() {
        let op = bare_op("echo hi");
        let mut settings = Settings::default();
        let (spec, changed) = build_runtime_spec(
            &op,
            "img:latest".to_string(),
            &[],
            &mut settings,
            &PathBuf::from("/home/dev"),
            &PathBuf::from("/work"),
            std::iter::empty(),
            no_prompt,
        )
        .unwrap();
        assert_eq!(spec.argv, vec!["echo", "hi"]);
        assert_eq!(spec.working_dir, WORKDIR_OPS);
        assert!(spec.binds.is_empty());
        assert!(!changed);
    }

    #[test]
    fn passthrough_args_extend_argv() {
        assert_eq!(
            tokenize_run("deploy --stage", &["prod".to_string()]),
            vec!["deploy", "--stage", "prod"]
        );
    }

    #[test]
    fn process_env_wins_exactly_once() {
        let env = merge_env(
            &[],
            &["A=1".to_string()],
            vec![("A".to_string(), "2".to_string())],
        );
        assert_eq!(env, vec!["A=2"]);
    }

    #[test]
    fn declared_env_overrides_defaults() {
        let env = merge_env(
            &[("OPS_RUNNING".to_string(), "true".to_string())],
            &["OPS_RUNNING=nope".to_string(), "B=2".to_string()],
            std::iter::empty(),
        );
        assert_eq!(env, vec!["B=2", "OPS_RUNNING=nope"]);
    }

    #[test]
    fn bind_aliases_resolve_identically() {
        let home = PathBuf::from("/home/dev");
        assert_eq!(
            resolve_bind("~/project:/data", &home).unwrap(),
            "/home/dev/project:/data"
        );
        assert_eq!(
            resolve_bind("$HOME/project:/data", &home).unwrap(),
            "/home/dev/project:/data"
        );
        assert_eq!(
            resolve_bind("/abs/path:/data", &home).unwrap(),
            "/abs/path:/data"
        );
    }

    #[test]
    fn relative_host_bind_is_a_validation_error() {
        let home = PathBuf::from("/home/dev");
        match resolve_bind("data:/data", &home) {
            Err(EngineError::Validation(msg)) => assert!(msg.contains("data:/data")),
            other => panic!("expected validation error, got {:?}", other),
        }

        let mut op = bare_op("ls");
        op.bind = vec!["data:/data".to_string()];
        let mut settings = Settings::default();
        let result = build_runtime_spec(
            &op,
            "img".to_string(),
            &[],
            &mut settings,
            &PathBuf::from("/home/dev"),
            &PathBuf::from("/work"),
            std::iter::empty(),
            no_prompt,
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn mount_cwd_appends_bind_and_sets_workdir() {
        let mut op = bare_op("ls");
        op.mount_cwd = true;
        let mut settings = Settings::default();
        let (spec, _) = build_runtime_spec(
            &op,
            "img".to_string(),
            &[],
            &mut settings,
            &PathBuf::from("/home/dev"),
            &PathBuf::from("/work"),
            std::iter::empty(),
            no_prompt,
        )
        .unwrap();
        assert_eq!(spec.working_dir, WORKDIR_CWD);
        assert_eq!(spec.binds, vec!["/work:/cwd"]);
    }

    #[test]
    fn declined_consent_aborts_the_run() {
        let mut op = bare_op("ls");
        op.mount_home = true;
        let mut settings = Settings::default();
        let result = build_runtime_spec(
            &op,
            "img".to_string(),
            &[],
            &mut settings,
            &PathBuf::from("/home/dev"),
            &PathBuf::from("/work"),
            std::iter::empty(),
            |_| Ok(false),
        );
        match result {
            Err(EngineError::Aborted(_)) => {}
            other => panic!("expected abort, got {:?}", other),
        }
        // nothing was remembered on decline
        assert_eq!(settings.always_mount_home, None);
    }

    #[test]
    fn consent_remember_choice_persists_only_when_unset() {
        let mut settings = Settings::default();
        let mut prompts = 0;
        let changed = confirm_home_mount(&mut settings, |_| {
            prompts += 1;
            Ok(true)
        })
        .unwrap();
        assert_eq!(prompts, 2);
        assert!(changed);
        assert_eq!(settings.always_mount_home, Some(true));

        // stored "always" answer skips both prompts
        let changed = confirm_home_mount(&mut settings, no_prompt).unwrap();
        assert!(!changed);

        // stored "no" answer keeps asking for consent but not to remember
        let mut settings = Settings {
            always_mount_home: Some(false),
            ..Default::default()
        };
        let mut prompts = 0;
        let changed = confirm_home_mount(&mut settings, |_| {
            prompts += 1;
            Ok(true)
        })
        .unwrap();
        assert_eq!(prompts, 1);
        assert!(!changed);
        assert_eq!(settings.always_mount_home, Some(false));
    }

    #[test]
    fn mount_home_appends_read_only_bind() {
        let mut op = bare_op("ls");
        op.mount_home = true;
        let mut settings = Settings {
            always_mount_home: Some(true),
            ..Default::default()
        };
        let (spec, changed) = build_runtime_spec(
            &op,
            "img".to_string(),
            &[],
            &mut settings,
            &PathBuf::from("/home/dev"),
            &PathBuf::from("/work"),
            std::iter::empty(),
            no_prompt,
        )
        .unwrap();
        assert!(!changed);
        assert_eq!(spec.binds, vec!["/home/dev:/root:ro"]);
    }
}
