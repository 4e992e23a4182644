//! Image provisioner.
//!
//! Ensures a runnable image exists locally before a session starts: builds
//! unpublished ops from their declared source files, pulls published ops
//! with ephemeral registry credentials, and feeds both event streams
//! through the progress parser. Credentials are revoked on every exit
//! path.

use std::path::Path;

use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::{BuildInfo, CreateImageInfo};
use bollard::Docker;
use futures::StreamExt;

use crate::api::{CatalogClient, RegistryCredentials};
use crate::constants::{FORMAT_BOLD, FORMAT_RESET, LOCAL_TEAM, REGISTRY_HOST};
use crate::error::{EngineError, Result};
use crate::manifest::Op;
use crate::progress::{render, ProgressEvent, ProgressParser};
use crate::settings::Settings;

/// Canonical local image tag for an op: either its explicit image
/// reference, or `registry/<team>/<name>:<version>` with the team falling
/// back to the local namespace.
pub fn image_tag(op: &Op, settings: &Settings) -> String {
    if let Some(image) = &op.image {
        return image.clone();
    }
    let team = settings.team_name.as_deref().unwrap_or(LOCAL_TEAM);
    format!("{}/{}/{}:{}", REGISTRY_HOST, team, op.name, op.version)
}

/// Ensure `tag` is runnable locally. Skips provisioning when the image is
/// already present and `--build` was not requested.
pub async fn ensure_image(
    docker: &Docker,
    client: &CatalogClient,
    op: &Op,
    tag: &str,
    force_build: bool,
    manifest_dir: Option<&Path>,
) -> Result<()> {
    if !force_build && docker.inspect_image(tag).await.is_ok() {
        return Ok(());
    }

    if !op.is_published {
        println!("{}Building{} {}", FORMAT_BOLD, FORMAT_RESET, tag);
        build_image(docker, op, tag, manifest_dir).await
    } else {
        println!("{}Pulling{} {}", FORMAT_BOLD, FORMAT_RESET, tag);
        pull_image(docker, client, tag).await
    }
}

/// Build an unpublished op from its declared source file list rooted at the
/// manifest directory.
async fn build_image(docker: &Docker, op: &Op, tag: &str, manifest_dir: Option<&Path>) -> Result<()> {
    let context_dir = manifest_dir.ok_or_else(|| {
        EngineError::Validation(format!(
            "op '{}' is unpublished and has no local manifest directory to build from",
            op.name
        ))
    })?;
    let context = build_context(context_dir, &op.src)?;

    let options = BuildImageOptions {
        dockerfile: "Dockerfile".to_string(),
        t: tag.to_string(),
        rm: true,
        ..Default::default()
    };

    let mut parser = ProgressParser::new();
    let mut stream = docker.build_image(options, None, Some(context.into()));
    while let Some(item) = stream.next().await {
        let info = item?;
        let update = parser.parse(&build_event(info))?;
        render(&update);
    }
    Ok(())
}

/// Pull a published op by tag using single-operation registry credentials,
/// revoking them whether or not the pull succeeds.
async fn pull_image(docker: &Docker, client: &CatalogClient, tag: &str) -> Result<()> {
    let credentials = client.registry_token().await?;
    let outcome = pull_with_credentials(docker, tag, &credentials).await;

    // Revocation is part of every exit path; a failure to revoke is
    // reported but must not mask the pull outcome.
    if let Err(revoke_err) = client
        .revoke_registry_token(&credentials.correlation_id)
        .await
    {
        eprintln!("warning: failed to revoke registry credentials: {}", revoke_err);
    }
    outcome
}

async fn pull_with_credentials(
    docker: &Docker,
    tag: &str,
    credentials: &RegistryCredentials,
) -> Result<()> {
    let options = CreateImageOptions {
        from_image: tag.to_string(),
        ..Default::default()
    };
    let auth = DockerCredentials {
        username: Some(credentials.username.clone()),
        password: Some(credentials.password.clone()),
        serveraddress: Some(credentials.server_address.clone()),
        ..Default::default()
    };

    let mut parser = ProgressParser::new();
    let mut stream = docker.create_image(Some(options), None, Some(auth));
    while let Some(item) = stream.next().await {
        let info = item?;
        let update = parser.parse(&pull_event(info))?;
        render(&update);
    }
    Ok(())
}

/// Assemble the tar build context from the op's declared source files. The
/// Dockerfile is always included when present, even if not listed.
fn build_context(dir: &Path, src: &[String]) -> Result<Vec<u8>> {
    let mut names: Vec<String> = src.to_vec();
    if !names.iter().any(|name| name == "Dockerfile") && dir.join("Dockerfile").is_file() {
        names.push("Dockerfile".to_string());
    }
    if names.is_empty() {
        return Err(EngineError::Validation(format!(
            "no source files declared and no Dockerfile found in {}",
            dir.display()
        )));
    }

    let mut builder = tar::Builder::new(Vec::new());
    for name in &names {
        let path = dir.join(name);
        if path.is_dir() {
            builder.append_dir_all(name, &path)?;
        } else {
            builder.append_path_with_name(&path, name)?;
        }
    }
    Ok(builder.into_inner()?)
}

fn pull_event(info: CreateImageInfo) -> ProgressEvent {
    ProgressEvent {
        status: info.status,
        id: info.id,
        progress_detail: info.progress_detail.map(|detail| crate::progress::ProgressCounts {
            current: detail.current,
            total: detail.total,
        }),
        error: info
            .error
            .or(info.error_detail.and_then(|detail| detail.message)),
    }
}

fn build_event(info: BuildInfo) -> ProgressEvent {
    ProgressEvent {
        // Build streams carry free-form output in `stream` rather than a
        // layer status.
        status: info.stream.map(|s| s.trim_end().to_string()).or(info.status),
        id: info.id,
        progress_detail: info.progress_detail.map(|detail| crate::progress::ProgressCounts {
            current: detail.current,
            total: detail.total,
        }),
        error: info
            .error
            .or(info.error_detail.and_then(|detail| detail.message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_named(name: &str) -> Op {
        Op {
            name: name.to_string(),
            version: "1.2.0".to_string(),
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
        }
    }

    #[test]
    fn canonical_tag_uses_team_then_local_fallback() {
        let op = op_named("deploy");
        let mut settings = Settings::default();
        assert_eq!(image_tag(&op, &settings), "registry.opsctl.dev/local/deploy:1.2.0");

        settings.team_name = Some("acme".to_string());
        assert_eq!(image_tag(&op, &settings), "registry.opsctl.dev/acme/deploy:1.2.0");
    }

    #[test]
    fn explicit_image_reference_wins() {
        let mut op = op_named("deploy");
        op.image = Some("alpine:3.19".to_string());
        assert_eq!(image_tag(&op, &Settings::default()), "alpine:3.19");
    }

    #[test]
    fn build_context_includes_dockerfile_implicitly() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        std::fs::write(dir.path().join("main.sh"), "echo hi\n").unwrap();

        let context = build_context(dir.path(), &["main.sh".to_string()]).unwrap();
        assert!(!context.is_empty());

        let mut archive = tar::Archive::new(context.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert!(names.contains(&"main.sh".to_string()));
        assert!(names.contains(&"Dockerfile".to_string()));
    }

    #[test]
    fn empty_build_context_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        match build_context(dir.path(), &[]) {
            Err(EngineError::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
