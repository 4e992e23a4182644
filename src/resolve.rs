//! Op/workflow resolver.
//!
//! Top-level entry point of the engine: locates a definition in a local
//! manifest or the remote catalog, disambiguates multiple candidates with
//! a fuzzy single-select prompt, and short-circuits to formatted help when
//! the op help flag is set.

use std::path::PathBuf;

use dialoguer::theme::ColorfulTheme;
use dialoguer::FuzzySelect;

use crate::api::CatalogClient;
use crate::constants::{FORMAT_BOLD, FORMAT_CYAN, FORMAT_GRAY, FORMAT_RESET};
use crate::error::{EngineError, Result};
use crate::manifest::{load_manifest, manifest_path_for, Op, OpOrWorkflow};

/// A definition picked for this invocation, plus the directory its
/// manifest came from (build context root for unpublished ops).
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub entry: OpOrWorkflow,
    pub manifest_dir: Option<PathBuf>,
}

/// Resolve a name-or-path argument to exactly one op or workflow.
///
/// A local manifest at the resolved path wins; otherwise the remote
/// catalog's op and workflow collections are queried in parallel, filtered
/// by team and the search term derived from `name:version`.
pub async fn resolve_target(client: &CatalogClient, name_or_path: &str) -> Result<ResolvedTarget> {
    if let Some(manifest_path) = manifest_path_for(name_or_path) {
        let entries = load_manifest(&manifest_path)?;
        let entry = select_entry(entries, name_or_path, prompt_select)?;
        return Ok(ResolvedTarget {
            entry,
            manifest_dir: manifest_path.parent().map(PathBuf::from),
        });
    }

    let search = search_term(name_or_path);
    let (ops, workflows) = tokio::join!(client.find_ops(search), client.find_workflows(search));

    let mut entries: Vec<OpOrWorkflow> = ops?.into_iter().map(OpOrWorkflow::Op).collect();
    entries.extend(workflows?.into_iter().map(OpOrWorkflow::Workflow));
    for entry in &entries {
        entry.validate()?;
    }

    let entry = select_entry(entries, name_or_path, prompt_select)?;
    Ok(ResolvedTarget {
        entry,
        manifest_dir: None,
    })
}

/// The catalog search term: the name part of a `name:version` argument.
fn search_term(name_or_path: &str) -> &str {
    name_or_path.split(':').next().unwrap_or(name_or_path)
}

/// Selection policy over the collected candidates: exactly one is taken
/// silently, several go through one selection prompt, none is `NotFound`.
/// The prompt is injected so tests can observe it.
fn select_entry<F>(entries: Vec<OpOrWorkflow>, wanted: &str, select: F) -> Result<OpOrWorkflow>
where
    F: FnOnce(&[String]) -> Result<usize>,
{
    let mut entries = entries;
    match entries.len() {
        0 => Err(EngineError::NotFound(wanted.to_string())),
        1 => Ok(entries.remove(0)),
        _ => {
            let items: Vec<String> = entries.iter().map(OpOrWorkflow::display).collect();
            let index = select(&items)?;
            if index >= entries.len() {
                return Err(EngineError::NotFound(wanted.to_string()));
            }
            Ok(entries.remove(index))
        }
    }
}

/// Fuzzy, incrementally-filtered single-select over the candidate labels.
fn prompt_select(items: &[String]) -> Result<usize> {
    if !atty::is(atty::Stream::Stdin) {
        return Err(EngineError::Aborted(
            "multiple matches but no interactive terminal to choose from".to_string(),
        ));
    }
    let index = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Select an op or workflow")
        .items(items)
        .default(0)
        .interact()?;
    Ok(index)
}

/// Print the op's declared help metadata: usage, arguments and options
/// sections, skipping whatever was not declared.
pub fn print_op_help(op: &Op) {
    println!(
        "{}{}:{}{} {}",
        FORMAT_BOLD,
        op.name,
        op.version,
        FORMAT_RESET,
        op.description.as_deref().unwrap_or("")
    );

    if let Some(usage) = &op.help.usage {
        println!("\n{}Usage:{}", FORMAT_BOLD, FORMAT_RESET);
        println!("  {}", usage);
    }
    if !op.help.arguments.is_empty() {
        println!("\n{}Arguments:{}", FORMAT_BOLD, FORMAT_RESET);
        for (name, description) in &op.help.arguments {
            println!("  {}{:<20}{} {}", FORMAT_CYAN, name, FORMAT_RESET, description);
        }
    }
    if !op.help.options.is_empty() {
        println!("\n{}Options:{}", FORMAT_BOLD, FORMAT_RESET);
        for (name, description) in &op.help.options {
            println!("  {}{:<20}{} {}", FORMAT_CYAN, name, FORMAT_RESET, description);
        }
    }
}

/// `ops list`: enumerate local manifest entries when a manifest exists in
/// the current directory, otherwise the team catalog.
pub async fn list_targets(client: &CatalogClient) -> Result<()> {
    let entries = match manifest_path_for(".") {
        Some(path) => {
            println!("{}Local manifest{} {}", FORMAT_BOLD, FORMAT_RESET, path.display());
            load_manifest(&path)?
        }
        None => {
            let (ops, workflows) = tokio::join!(client.find_ops(""), client.find_workflows(""));
            let mut entries: Vec<OpOrWorkflow> = ops?.into_iter().map(OpOrWorkflow::Op).collect();
            entries.extend(workflows?.into_iter().map(OpOrWorkflow::Workflow));
            entries
        }
    };

    if entries.is_empty() {
        println!("No ops or workflows available.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}{}{}", FORMAT_GRAY, entry.display(), FORMAT_RESET);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Workflow;

    fn op(name: &str) -> OpOrWorkflow {
        OpOrWorkflow::Op(Op {
            name: name.to_string(),
            version: "0.1.0".to_string(),
            description: None,
            run: "echo hi".to_string(),
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
        })
    }

    fn wf(name: &str) -> OpOrWorkflow {
        OpOrWorkflow::Workflow(Workflow {
            name: name.to_string(),
            version: "0.1.0".to_string(),
            description: None,
            before: Vec::new(),
            steps: vec!["true".to_string()],
            after: Vec::new(),
            env: Vec::new(),
            team_id: None,
        })
    }

    #[test]
    fn single_candidate_selects_without_prompting() {
        let picked = select_entry(vec![op("only")], "only", |_| {
            panic!("prompt must not be issued for a single match")
        })
        .unwrap();
        assert_eq!(picked.name(), "only");
    }

    #[test]
    fn multiple_candidates_prompt_exactly_once() {
        let mut prompts = 0;
        let picked = select_entry(vec![op("a"), wf("b"), op("c")], "x", |items| {
            prompts += 1;
            assert_eq!(items.len(), 3);
            Ok(1)
        })
        .unwrap();
        assert_eq!(prompts, 1);
        assert_eq!(picked.name(), "b");
    }

    #[test]
    fn no_candidates_is_not_found() {
        match select_entry(Vec::new(), "ghost", |_| Ok(0)) {
            Err(EngineError::NotFound(name)) => assert_eq!(name, "ghost"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn search_term_splits_version_suffix() {
        assert_eq!(search_term("deploy:1.2.0"), "deploy");
        assert_eq!(search_term("deploy"), "deploy");
    }
}
