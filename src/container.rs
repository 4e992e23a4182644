//! Container lifecycle manager.
//!
//! Drives one interactive container session through an explicit state
//! machine: CREATED -> ATTACHED -> RUNNING -> EXITING -> REMOVED, with
//! FAILED terminal on any step error. The local terminal is switched to
//! raw mode for the session, stdin is forwarded through a detach-sequence
//! scanner, and terminal resizes follow the container's pseudo-terminal.
//! At most one session is live per invocation.

use std::collections::HashMap;

use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, RemoveContainerOptions,
    ResizeContainerTtyOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::constants::{DETACH_FIRST, DETACH_SECOND};
use crate::error::Result;
use crate::runtime::RuntimeSpec;

/// Lifecycle states of one container session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Attached,
    Running,
    Exiting,
    Removed,
    Failed,
}

/// How the local attachment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The contained process exited with this status code. The container
    /// has been removed (best-effort).
    Exited(i64),
    /// The detach sequence ended the local attachment; the remote process
    /// keeps running and the container is left in place.
    Detached,
}

/// Result of scanning one chunk of raw input for the detach sequence.
#[derive(Debug, PartialEq)]
pub enum Scan {
    /// Forward these bytes to the container.
    Forward(Vec<u8>),
    /// Detach now, after forwarding these leading bytes.
    Detach(Vec<u8>),
}

/// Scanner for the two-keystroke detach sequence (Ctrl-P then Ctrl-Q).
///
/// A held first key is replayed into the forwarded stream when the next
/// byte does not complete the sequence, and survives chunk boundaries.
#[derive(Debug, Default)]
pub struct DetachScanner {
    pending: bool,
}

impl DetachScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&mut self, input: &[u8]) -> Scan {
        let mut forward = Vec::with_capacity(input.len());
        for &byte in input {
            if self.pending {
                self.pending = false;
                if byte == DETACH_SECOND {
                    return Scan::Detach(forward);
                }
                // Replay the swallowed first key; a repeated first key
                // starts the sequence over.
                forward.push(DETACH_FIRST);
                if byte == DETACH_FIRST {
                    self.pending = true;
                } else {
                    forward.push(byte);
                }
            } else if byte == DETACH_FIRST {
                self.pending = true;
            } else {
                forward.push(byte);
            }
        }
        Scan::Forward(forward)
    }
}

/// Restores the terminal's original mode on drop, so every exit path of
/// the session leaves the terminal usable.
struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { active: true })
    }

    fn restore(&mut self) {
        if self.active {
            let _ = crossterm::terminal::disable_raw_mode();
            self.active = false;
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// One live container plus its attached duplex stream. At most one exists
/// per invocation, owned by the pipeline run state.
pub struct ContainerHandle {
    pub id: String,
}

/// Run a full interactive session for the given runtime spec.
pub async fn run_session(docker: &Docker, spec: &RuntimeSpec) -> Result<SessionOutcome> {
    let mut session = Session {
        docker: docker.clone(),
        state: SessionState::Created,
        handle: None,
    };
    match session.run(spec).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            session.transition(SessionState::Failed);
            Err(err)
        }
    }
}

struct Session {
    docker: Docker,
    state: SessionState,
    handle: Option<ContainerHandle>,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        if std::env::var_os(crate::constants::DEBUG_ENV).is_some() {
            eprintln!("session: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    async fn run(&mut self, spec: &RuntimeSpec) -> Result<SessionOutcome> {
        let id = self.create(spec).await?;

        let attach = self
            .docker
            .attach_container(
                &id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    ..Default::default()
                }),
            )
            .await?;
        self.transition(SessionState::Attached);

        let interactive = atty::is(atty::Stream::Stdin);
        let mut raw_guard = if interactive {
            Some(RawModeGuard::enable()?)
        } else {
            None
        };

        // Container output -> local terminal.
        let mut output = attach.output;
        let output_task = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(Ok(chunk)) = output.next().await {
                if stdout.write_all(&chunk.into_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        });

        // Local terminal -> container input, watching for the detach
        // sequence.
        let (detach_tx, mut detach_rx) = oneshot::channel::<()>();
        let mut input = attach.input;
        let input_task = tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut scanner = DetachScanner::new();
            let mut buf = [0u8; 1024];
            let mut detach_tx = Some(detach_tx);
            loop {
                let read = match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                match scanner.scan(&buf[..read]) {
                    Scan::Forward(bytes) => {
                        if !bytes.is_empty() && input.write_all(&bytes).await.is_err() {
                            break;
                        }
                        let _ = input.flush().await;
                    }
                    Scan::Detach(bytes) => {
                        if !bytes.is_empty() {
                            let _ = input.write_all(&bytes).await;
                            let _ = input.flush().await;
                        }
                        if let Some(tx) = detach_tx.take() {
                            let _ = tx.send(());
                        }
                        break;
                    }
                }
            }
        });

        self.docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await?;
        self.transition(SessionState::Running);

        // Keep the container's pseudo-terminal sized like the local one
        // for the whole session.
        self.resize_to_terminal(&id).await;
        let resize_task = tokio::spawn(forward_resizes(self.docker.clone(), id.clone()));

        // The wait stream must not borrow the session while teardown runs.
        let wait_docker = self.docker.clone();
        let mut wait = wait_docker.wait_container(&id, None::<WaitContainerOptions<String>>);

        let outcome = tokio::select! {
            waited = wait.next() => {
                let status_code = match waited {
                    Some(Ok(response)) => response.status_code,
                    Some(Err(err)) => {
                        self.teardown(&mut raw_guard, output_task, input_task, resize_task).await;
                        return Err(err.into());
                    }
                    None => 0,
                };
                SessionOutcome::Exited(status_code)
            }
            _ = &mut detach_rx => SessionOutcome::Detached,
        };

        self.teardown(&mut raw_guard, output_task, input_task, resize_task)
            .await;

        // Natural exit removes the container; a detach leaves it running.
        if let SessionOutcome::Exited(_) = outcome {
            self.remove().await;
        }
        Ok(outcome)
    }

    async fn create(&mut self, spec: &RuntimeSpec) -> Result<String> {
        let (exposed, bindings) = port_bindings(&spec.ports);

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.argv.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(false),
            exposed_ports: if exposed.is_empty() { None } else { Some(exposed) },
            host_config: Some(HostConfig {
                binds: if spec.binds.is_empty() {
                    None
                } else {
                    Some(spec.binds.clone())
                },
                network_mode: spec.network_mode.clone(),
                port_bindings: if bindings.is_empty() {
                    None
                } else {
                    Some(bindings)
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        self.transition(SessionState::Created);
        self.handle = Some(ContainerHandle {
            id: created.id.clone(),
        });
        Ok(created.id)
    }

    async fn resize_to_terminal(&self, id: &str) {
        if let Ok((width, height)) = crossterm::terminal::size() {
            let _ = self
                .docker
                .resize_container_tty(id, ResizeContainerTtyOptions { width, height })
                .await;
        }
    }

    /// EXITING: deregister the resize listener, stop the input forwarder,
    /// restore the terminal mode and close the duplex stream.
    async fn teardown(
        &mut self,
        raw_guard: &mut Option<RawModeGuard>,
        output_task: tokio::task::JoinHandle<()>,
        input_task: tokio::task::JoinHandle<()>,
        resize_task: tokio::task::JoinHandle<()>,
    ) {
        self.transition(SessionState::Exiting);
        resize_task.abort();
        input_task.abort();
        // Give buffered output a moment to drain before closing.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(100), output_task).await;
        if let Some(guard) = raw_guard.as_mut() {
            guard.restore();
        }
    }

    /// REMOVED: best-effort deletion; a failure here is logged and never
    /// changes the invocation's reported outcome.
    async fn remove(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self
            .docker
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => self.transition(SessionState::Removed),
            Err(err) => eprintln!("warning: failed to remove container {}: {}", handle.id, err),
        }
    }
}

/// Forward SIGWINCH-driven local terminal resizes to the container tty.
async fn forward_resizes(docker: Docker, id: String) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut winch = match signal(SignalKind::window_change()) {
            Ok(stream) => stream,
            Err(_) => return,
        };
        while winch.recv().await.is_some() {
            if let Ok((width, height)) = crossterm::terminal::size() {
                let _ = docker
                    .resize_container_tty(&id, ResizeContainerTtyOptions { width, height })
                    .await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (docker, id);
    }
}

type ExposedPorts = HashMap<String, HashMap<(), ()>>;
type PortMap = HashMap<String, Option<Vec<PortBinding>>>;

/// Translate `host:container` port pairs into engine port maps. A bare
/// port exposes and binds the same number on both sides.
fn port_bindings(ports: &[String]) -> (ExposedPorts, PortMap) {
    let mut exposed = ExposedPorts::new();
    let mut bindings = PortMap::new();
    for pair in ports {
        let (host, container) = match pair.split_once(':') {
            Some((host, container)) => (host, container),
            None => (pair.as_str(), pair.as_str()),
        };
        let key = format!("{}/tcp", container);
        exposed.insert(key.clone(), HashMap::new());
        bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(host.to_string()),
            }]),
        );
    }
    (exposed, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes_are_forwarded() {
        let mut scanner = DetachScanner::new();
        assert_eq!(scanner.scan(b"hello"), Scan::Forward(b"hello".to_vec()));
    }

    #[test]
    fn full_sequence_detaches() {
        let mut scanner = DetachScanner::new();
        let input = [b'a', DETACH_FIRST, DETACH_SECOND];
        assert_eq!(scanner.scan(&input), Scan::Detach(vec![b'a']));
    }

    #[test]
    fn sequence_split_across_reads_detaches() {
        let mut scanner = DetachScanner::new();
        assert_eq!(scanner.scan(&[DETACH_FIRST]), Scan::Forward(Vec::new()));
        assert_eq!(scanner.scan(&[DETACH_SECOND]), Scan::Detach(Vec::new()));
    }

    #[test]
    fn broken_sequence_replays_the_held_key() {
        let mut scanner = DetachScanner::new();
        assert_eq!(
            scanner.scan(&[DETACH_FIRST, b'x']),
            Scan::Forward(vec![DETACH_FIRST, b'x'])
        );
    }

    #[test]
    fn repeated_first_key_restarts_the_sequence() {
        let mut scanner = DetachScanner::new();
        assert_eq!(
            scanner.scan(&[DETACH_FIRST, DETACH_FIRST]),
            Scan::Forward(vec![DETACH_FIRST])
        );
        // still pending: a second key now completes the sequence
        assert_eq!(scanner.scan(&[DETACH_SECOND]), Scan::Detach(Vec::new()));
    }

    #[test]
    fn port_pairs_map_to_engine_bindings() {
        let (exposed, bindings) = port_bindings(&["8080:80".to_string(), "9000".to_string()]);
        assert!(exposed.contains_key("80/tcp"));
        assert!(exposed.contains_key("9000/tcp"));
        let binding = bindings["80/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8080"));
    }
}
