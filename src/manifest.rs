//! Op and workflow definitions and the local manifest loader.
//!
//! A manifest is a YAML document with top-level `ops`/`workflows` arrays
//! (singular aliases accepted). Entries become immutable snapshots once
//! resolved; missing optional fields default to empty lists.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_VERSION, MANIFEST_NAMES};
use crate::error::{EngineError, Result};

/// Declared help metadata for an op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpHelp {
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl OpHelp {
    pub fn is_empty(&self) -> bool {
        self.usage.is_none() && self.arguments.is_empty() && self.options.is_empty()
    }
}

/// A single containerized command definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Op {
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Command string launched inside the container. Tokenized into argv
    /// before container creation, never handed to a shell.
    #[serde(default)]
    pub run: String,

    /// Explicit image reference overriding the canonical computed tag.
    #[serde(default)]
    pub image: Option<String>,

    /// Declared environment as `KEY=VAL` strings.
    #[serde(default)]
    pub env: Vec<String>,

    /// Bind mounts as `host:container` pairs; `~` and `$HOME` prefixes are
    /// expanded before reaching the container engine.
    #[serde(default)]
    pub bind: Vec<String>,

    /// Port mappings as `host:container` pairs.
    #[serde(default)]
    pub port: Vec<String>,

    /// Build context file list for unpublished ops, relative to the
    /// manifest directory.
    #[serde(default)]
    pub src: Vec<String>,

    #[serde(default, rename = "mountCwd")]
    pub mount_cwd: bool,

    #[serde(default, rename = "mountHome")]
    pub mount_home: bool,

    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub help: OpHelp,

    #[serde(default, rename = "teamID")]
    pub team_id: Option<String>,

    #[serde(default, rename = "isPublished")]
    pub is_published: bool,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

impl Op {
    /// Reject definitions the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("op has no name".to_string()));
        }
        if self.run.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "op '{}' has no run command",
                self.name
            )));
        }
        Ok(())
    }
}

/// An ordered set of steps executed as one named unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub before: Vec<String>,

    /// The single main definition: each entry is one command of the main
    /// phase, run in declared order.
    #[serde(default)]
    pub steps: Vec<String>,

    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default, rename = "teamID")]
    pub team_id: Option<String>,
}

impl Workflow {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("workflow has no name".to_string()));
        }
        if self.steps.is_empty() {
            return Err(EngineError::Validation(format!(
                "workflow '{}' declares no steps",
                self.name
            )));
        }
        Ok(())
    }
}

/// Tagged union over the two runnable definition kinds. Dispatch is always
/// a `match` on this discriminant.
#[derive(Debug, Clone)]
pub enum OpOrWorkflow {
    Op(Op),
    Workflow(Workflow),
}

impl OpOrWorkflow {
    pub fn name(&self) -> &str {
        match self {
            OpOrWorkflow::Op(op) => &op.name,
            OpOrWorkflow::Workflow(wf) => &wf.name,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            OpOrWorkflow::Op(op) => &op.version,
            OpOrWorkflow::Workflow(wf) => &wf.version,
        }
    }

    /// Label used in selection prompts and listings.
    pub fn display(&self) -> String {
        let (kind, description) = match self {
            OpOrWorkflow::Op(op) => ("op", op.description.as_deref()),
            OpOrWorkflow::Workflow(wf) => ("workflow", wf.description.as_deref()),
        };
        match description {
            Some(text) => format!("{}:{} ({}) - {}", self.name(), self.version(), kind, text),
            None => format!("{}:{} ({})", self.name(), self.version(), kind),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            OpOrWorkflow::Op(op) => op.validate(),
            OpOrWorkflow::Workflow(wf) => wf.validate(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ManifestDoc {
    #[serde(default, alias = "op")]
    ops: Vec<Op>,
    #[serde(default, alias = "workflow")]
    workflows: Vec<Workflow>,
}

/// Resolve a name-or-path argument to a manifest file, if one exists there.
///
/// A file argument is taken as the manifest itself; a directory argument is
/// probed for `ops.yml`/`ops.yaml`. A bare name that is not a path yields
/// `None` and falls through to the remote catalog.
pub fn manifest_path_for(name_or_path: &str) -> Option<PathBuf> {
    let path = Path::new(name_or_path);
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if path.is_dir() {
        for candidate in MANIFEST_NAMES {
            let manifest = path.join(candidate);
            if manifest.is_file() {
                return Some(manifest);
            }
        }
    }
    None
}

/// Parse a manifest file and collect all op/workflow entries, validated.
pub fn load_manifest(path: &Path) -> Result<Vec<OpOrWorkflow>> {
    let content = fs::read_to_string(path)?;
    let doc: ManifestDoc = serde_yaml::from_str(&content)?;

    let mut entries = Vec::new();
    for op in doc.ops {
        entries.push(OpOrWorkflow::Op(op));
    }
    for wf in doc.workflows {
        entries.push(OpOrWorkflow::Workflow(wf));
    }

    if entries.is_empty() {
        return Err(EngineError::Validation(format!(
            "manifest {} declares no ops or workflows",
            path.display()
        )));
    }
    for entry in &entries {
        entry.validate()?;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.yml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn parses_ops_and_workflows_with_defaults() {
        let (_dir, path) = write_manifest(
            r#"
ops:
  - name: greet
    run: echo hi
workflows:
  - name: release
    steps:
      - make build
      - make publish
    before:
      - make lint
"#,
        );
        let entries = load_manifest(&path).unwrap();
        assert_eq!(entries.len(), 2);

        match &entries[0] {
            OpOrWorkflow::Op(op) => {
                assert_eq!(op.name, "greet");
                assert_eq!(op.version, DEFAULT_VERSION);
                assert!(op.env.is_empty());
                assert!(op.bind.is_empty());
                assert!(!op.mount_cwd);
                assert!(!op.is_published);
            }
            other => panic!("expected op, got {:?}", other),
        }
        match &entries[1] {
            OpOrWorkflow::Workflow(wf) => {
                assert_eq!(wf.before, vec!["make lint"]);
                assert_eq!(wf.steps.len(), 2);
                assert!(wf.after.is_empty());
            }
            other => panic!("expected workflow, got {:?}", other),
        }
    }

    #[test]
    fn accepts_singular_aliases() {
        let (_dir, path) = write_manifest(
            r#"
op:
  - name: solo
    run: ls -la
"#,
        );
        let entries = load_manifest(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "solo");
    }

    #[test]
    fn missing_run_command_is_a_validation_error() {
        let (_dir, path) = write_manifest(
            r#"
ops:
  - name: broken
"#,
        );
        match load_manifest(&path) {
            Err(EngineError::Validation(msg)) => assert!(msg.contains("broken")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn directory_argument_probes_manifest_names() {
        let (dir, path) = write_manifest("ops:\n  - name: x\n    run: pwd\n");
        let found = manifest_path_for(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(found, path);
        assert!(manifest_path_for("definitely-not-a-path").is_none());
    }

    #[test]
    fn camel_case_flags_parse() {
        let (_dir, path) = write_manifest(
            r#"
ops:
  - name: mounty
    run: cat /cwd/file
    mountCwd: true
    mountHome: true
    isPublished: true
    teamID: t-42
"#,
        );
        let entries = load_manifest(&path).unwrap();
        match &entries[0] {
            OpOrWorkflow::Op(op) => {
                assert!(op.mount_cwd && op.mount_home && op.is_published);
                assert_eq!(op.team_id.as_deref(), Some("t-42"));
            }
            other => panic!("expected op, got {:?}", other),
        }
    }
}
