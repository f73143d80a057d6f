//! Docker-backed sandbox runtime using the bollard crate.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SandboxError;
use crate::sandbox::{CommandResult, Sandbox, SandboxLimits, SandboxRuntime, SandboxState};
use crate::task::Task;

/// Default wall-clock budget for provisioning a sandbox, including the
/// image pull and setup commands.
pub const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 120;

/// Per-command ceiling for task setup commands.
const SETUP_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// SIGTERM grace period before the container is killed on teardown.
const STOP_GRACE_SECS: i64 = 5;

/// Captured output is capped per stream so a runaway command cannot
/// exhaust host memory.
const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Sandbox runtime backed by the local Docker daemon.
///
/// Containers run `sleep infinity` and stay alive for the whole episode;
/// every participant command is a separate exec against the same
/// container, so filesystem and process state persist between turns.
pub struct DockerRuntime {
    docker: Docker,
    limits: SandboxLimits,
    provision_timeout: Duration,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Unavailable` if the daemon is not accessible.
    pub fn new() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::Unavailable(format!("Failed to connect to Docker daemon: {e}"))
        })?;

        Ok(Self {
            docker,
            limits: SandboxLimits::default(),
            provision_timeout: Duration::from_secs(DEFAULT_PROVISION_TIMEOUT_SECS),
        })
    }

    /// Creates a runtime from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self {
            docker,
            limits: SandboxLimits::default(),
            provision_timeout: Duration::from_secs(DEFAULT_PROVISION_TIMEOUT_SECS),
        }
    }

    /// Sets the resource limits applied to every sandbox.
    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the provisioning timeout.
    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    /// Pulls the image if it is not already present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image = image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| {
                SandboxError::ProvisionFailed(format!("Failed to pull image '{image}': {e}"))
            })?;
        }

        Ok(())
    }

    /// Creates, starts, and prepares the container. No timeout of its
    /// own; `create` wraps this in the provisioning window.
    async fn provision(&self, task: &Task, name: &str) -> Result<Sandbox, SandboxError> {
        self.ensure_image(&task.docker_image).await?;

        let env: Vec<String> = task
            .environment
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let host_config = HostConfig {
            memory: Some(self.limits.memory_bytes()),
            cpu_period: Some(self.limits.cpu_period()),
            cpu_quota: Some(self.limits.cpu_quota()),
            pids_limit: Some(self.limits.pids_limit),
            network_mode: Some(self.limits.network_mode.clone()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(task.docker_image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: Some(task.working_directory.clone()),
            host_config: Some(host_config),
            tty: Some(true),
            open_stdin: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(classify_create_error)?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify_create_error)?;

        for command in &task.setup_commands {
            let result = self
                .exec_inner(&response.id, command, &task.working_directory, SETUP_COMMAND_TIMEOUT)
                .await
                .map_err(|e| match e {
                    SandboxError::ExecutionTimeout { seconds, .. } => SandboxError::ProvisionFailed(
                        format!("Setup command '{command}' timed out after {seconds} seconds"),
                    ),
                    other => SandboxError::ProvisionFailed(format!(
                        "Setup command '{command}' failed: {other}"
                    )),
                })?;

            if result.exit_code != 0 {
                return Err(SandboxError::ProvisionFailed(format!(
                    "Setup command '{command}' exited with code {}: {}",
                    result.exit_code,
                    snippet(&result.stderr, 500),
                )));
            }
        }

        let mut sandbox = Sandbox::new(response.id, name.to_string(), task.working_directory.clone());
        sandbox.state = SandboxState::Ready;

        info!(
            sandbox = %sandbox.name,
            image = %task.docker_image,
            task_id = %task.id,
            "Sandbox ready"
        );

        Ok(sandbox)
    }

    /// Runs one shell command via exec and streams its output.
    ///
    /// Raw container-id variant so provisioning can run setup commands
    /// before a `Sandbox` handle exists.
    async fn exec_inner(
        &self,
        container_id: &str,
        command: &str,
        workdir: &str,
        timeout: Duration,
    ) -> Result<CommandResult, SandboxError> {
        let exec_options = CreateExecOptions {
            cmd: Some(vec!["/bin/sh", "-c", command]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(workdir),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(classify_exec_error)?;

        let started = Instant::now();
        let mut stdout = String::new();
        let mut stderr = String::new();

        let streamed = tokio::time::timeout(timeout, async {
            let start_result = self.docker.start_exec(&exec.id, None).await?;

            if let StartExecResults::Attached { mut output, .. } = start_result {
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } => append_capped(&mut stdout, &message),
                        LogOutput::StdErr { message } => append_capped(&mut stderr, &message),
                        _ => {}
                    }
                }
            }

            Ok::<(), BollardError>(())
        })
        .await;

        match streamed {
            Ok(Ok(())) => {
                let exec_info = self
                    .docker
                    .inspect_exec(&exec.id)
                    .await
                    .map_err(classify_exec_error)?;

                Ok(CommandResult {
                    stdout,
                    stderr,
                    exit_code: exec_info.exit_code.unwrap_or(-1),
                    timed_out: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(classify_exec_error(e)),
            Err(_) => {
                let seconds = timeout.as_secs().max(1);
                self.kill_exec(container_id, &exec.id).await;

                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("Command timed out after {seconds}s"));

                Err(SandboxError::ExecutionTimeout {
                    seconds,
                    partial: CommandResult {
                        stdout,
                        stderr,
                        exit_code: -1,
                        timed_out: true,
                        duration_ms: started.elapsed().as_millis() as u64,
                    },
                })
            }
        }
    }

    /// Best-effort SIGKILL of a timed-out exec process so it does not
    /// keep consuming the sandbox's CPU quota for the rest of the episode.
    async fn kill_exec(&self, container_id: &str, exec_id: &str) {
        let pid = match self.docker.inspect_exec(exec_id).await {
            Ok(info) => info.pid,
            Err(e) => {
                debug!(error = %e, "Failed to inspect timed-out exec");
                return;
            }
        };

        let Some(pid) = pid.filter(|p| *p > 0) else {
            return;
        };

        let options = CreateExecOptions {
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("kill -9 {pid}"),
            ]),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let kill = async {
            let exec = self.docker.create_exec(container_id, options).await?;
            self.docker
                .start_exec(
                    &exec.id,
                    Some(StartExecOptions {
                        detach: true,
                        ..Default::default()
                    }),
                )
                .await?;
            Ok::<(), BollardError>(())
        };

        match tokio::time::timeout(Duration::from_secs(5), kill).await {
            Ok(Ok(())) => debug!(container = container_id, pid = pid, "Killed timed-out process"),
            Ok(Err(e)) => {
                debug!(container = container_id, error = %e, "Failed to kill timed-out process");
            }
            Err(_) => {
                debug!(container = container_id, "Kill of timed-out process did not complete");
            }
        }
    }

    /// Force-removes a container by name or id, tolerating absence.
    async fn remove_container(&self, name_or_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        if let Err(e) = self.docker.remove_container(name_or_id, Some(options)).await {
            if !is_status(&e, 404) {
                debug!(container = name_or_id, error = %e, "Failed to remove container");
            }
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn create(&self, task: &Task) -> Result<Sandbox, SandboxError> {
        let name = format!("termbench-sandbox-{}", Uuid::new_v4());
        let provision_secs = self.provision_timeout.as_secs().max(1);

        debug!(sandbox = %name, task_id = %task.id, "Provisioning sandbox");

        match tokio::time::timeout(self.provision_timeout, self.provision(task, &name)).await {
            Ok(Ok(sandbox)) => Ok(sandbox),
            Ok(Err(e)) => {
                // Partial provisioning leaves a container behind; reap it
                // before surfacing the failure.
                self.remove_container(&name).await;
                Err(e)
            }
            Err(_) => {
                self.remove_container(&name).await;
                Err(SandboxError::ProvisionTimeout {
                    seconds: provision_secs,
                })
            }
        }
    }

    async fn exec(
        &self,
        sandbox: &mut Sandbox,
        command: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult, SandboxError> {
        if !sandbox.is_ready() {
            return Err(SandboxError::Unavailable(format!(
                "Sandbox {} is {}, expected ready",
                sandbox.name, sandbox.state
            )));
        }

        sandbox.state = SandboxState::Executing;
        let workdir = workdir.unwrap_or(&sandbox.working_dir).to_string();
        let result = self
            .exec_inner(&sandbox.id, command, &workdir, timeout)
            .await;
        sandbox.state = SandboxState::Ready;

        result
    }

    async fn destroy(&self, sandbox: &mut Sandbox) {
        if sandbox.state == SandboxState::Destroyed {
            debug!(sandbox = %sandbox.name, "Sandbox already destroyed");
            return;
        }

        sandbox.state = SandboxState::Terminating;

        let stop_options = StopContainerOptions { t: STOP_GRACE_SECS };
        if let Err(e) = self.docker.stop_container(&sandbox.id, Some(stop_options)).await {
            if !is_status(&e, 404) && !is_status(&e, 304) {
                warn!(sandbox = %sandbox.name, error = %e, "Failed to stop sandbox container");
            }
        }

        let remove_options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(&sandbox.id, Some(remove_options))
            .await
        {
            if !is_status(&e, 404) {
                warn!(sandbox = %sandbox.name, error = %e, "Failed to remove sandbox container");
            }
        }

        sandbox.state = SandboxState::Destroyed;
        debug!(sandbox = %sandbox.name, "Sandbox destroyed");
    }
}

/// Maps daemon errors during provisioning onto the sandbox taxonomy.
/// The daemon reports allocation failures inconsistently, so both the
/// 507 status and known message fragments are treated as exhaustion.
fn classify_create_error(e: BollardError) -> SandboxError {
    if let BollardError::DockerResponseServerError {
        status_code,
        ref message,
    } = e
    {
        if status_code == 507
            || message.contains("no space left")
            || message.contains("cannot allocate memory")
        {
            return SandboxError::ResourceExhausted(message.clone());
        }
        return SandboxError::ProvisionFailed(format!("Daemon error {status_code}: {message}"));
    }

    SandboxError::ProvisionFailed(e.to_string())
}

/// Any daemon failure during exec means the sandbox can no longer be
/// trusted. A missing container gets a clearer message.
fn classify_exec_error(e: BollardError) -> SandboxError {
    if is_status(&e, 404) {
        return SandboxError::Unavailable(format!("Container no longer exists: {e}"));
    }
    SandboxError::Unavailable(format!("Docker exec failed: {e}"))
}

fn is_status(e: &BollardError, code: u16) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

/// Appends a chunk to a capped buffer, marking truncation once.
fn append_capped(buf: &mut String, chunk: &[u8]) {
    if buf.len() >= MAX_CAPTURED_BYTES {
        return;
    }

    let text = String::from_utf8_lossy(chunk);
    let remaining = MAX_CAPTURED_BYTES - buf.len();

    if text.len() <= remaining {
        buf.push_str(&text);
    } else {
        let mut end = remaining;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        buf.push_str(&text[..end]);
        buf.push_str(TRUNCATION_MARKER);
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}... [truncated]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> BollardError {
        BollardError::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn create_error_classification() {
        let exhausted = classify_create_error(server_error(507, "insufficient storage"));
        assert!(matches!(exhausted, SandboxError::ResourceExhausted(_)));

        let no_space = classify_create_error(server_error(
            500,
            "mkdir /var/lib/docker/overlay2: no space left on device",
        ));
        assert!(matches!(no_space, SandboxError::ResourceExhausted(_)));

        let no_memory = classify_create_error(server_error(500, "fork: cannot allocate memory"));
        assert!(matches!(no_memory, SandboxError::ResourceExhausted(_)));

        let missing_image = classify_create_error(server_error(404, "No such image"));
        assert!(matches!(missing_image, SandboxError::ProvisionFailed(_)));
    }

    #[test]
    fn exec_error_classification() {
        let gone = classify_exec_error(server_error(404, "No such container"));
        match gone {
            SandboxError::Unavailable(msg) => assert!(msg.contains("no longer exists")),
            other => panic!("expected Unavailable, got {other:?}"),
        }

        let daemon = classify_exec_error(server_error(500, "daemon shutting down"));
        assert!(matches!(daemon, SandboxError::Unavailable(_)));
    }

    #[test]
    fn status_matching() {
        assert!(is_status(&server_error(404, "gone"), 404));
        assert!(!is_status(&server_error(500, "boom"), 404));
    }

    #[test]
    fn capped_append_marks_truncation() {
        let mut buf = String::new();
        append_capped(&mut buf, b"hello ");
        append_capped(&mut buf, b"world");
        assert_eq!(buf, "hello world");

        let mut big = String::new();
        append_capped(&mut big, &vec![b'x'; MAX_CAPTURED_BYTES + 100]);
        assert!(big.len() <= MAX_CAPTURED_BYTES + TRUNCATION_MARKER.len());
        assert!(big.ends_with(TRUNCATION_MARKER));

        // once capped, later chunks are dropped entirely
        let len_before = big.len();
        append_capped(&mut big, b"more");
        assert_eq!(big.len(), len_before);
    }

    #[test]
    fn snippet_truncates() {
        assert_eq!(snippet("short", 10), "short");
        let long = "a".repeat(600);
        let cut = snippet(&long, 500);
        assert!(cut.ends_with("... [truncated]"));
        assert_eq!(cut.chars().count(), 500 + "... [truncated]".chars().count());
    }

    #[tokio::test]
    async fn destroy_of_a_destroyed_sandbox_is_a_no_op() {
        let Ok(runtime) = DockerRuntime::new() else {
            return;
        };
        let mut sandbox = Sandbox::new("deadbeef", "termbench-sandbox-test", "/workspace");
        sandbox.state = SandboxState::Destroyed;
        // Returns before any daemon call; no daemon is needed here.
        runtime.destroy(&mut sandbox).await;
        assert_eq!(sandbox.state, SandboxState::Destroyed);
    }

    #[tokio::test]
    async fn exec_refuses_a_sandbox_that_is_not_ready() {
        let Ok(runtime) = DockerRuntime::new() else {
            return;
        };
        let mut sandbox = Sandbox::new("deadbeef", "termbench-sandbox-test", "/workspace");
        let err = runtime
            .exec(&mut sandbox, "true", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            SandboxError::Unavailable(msg) => assert!(msg.contains("expected ready")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
        sandbox.state = SandboxState::Destroyed;
    }
}
