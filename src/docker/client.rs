//! Docker daemon access through bollard.

use anyhow::{Result, anyhow};
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ExecConfig, NetworkCreateRequest};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptions, CreateImageOptions,
    InspectContainerOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::secret::{ContainerInspectResponse, HostConfig, PortBinding};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{
    ContainerRuntime, ContainerSpec, ExecOutput, NetworkStatus, OutputChunk, OutputStream,
    decode_stderr, decode_stdout,
};
use crate::error::CommitError;

/// Container runtime backed by the local docker daemon
#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
}

fn status_code(error: &bollard::errors::Error) -> Option<u16> {
    match error {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

fn is_not_found(error: &bollard::errors::Error) -> bool {
    status_code(error) == Some(404)
}

fn is_conflict(error: &bollard::errors::Error) -> bool {
    status_code(error) == Some(409)
}

impl From<LogOutput> for OutputChunk {
    fn from(output: LogOutput) -> Self {
        match output {
            LogOutput::StdErr { message } => OutputChunk::Stderr(message.to_vec()),
            LogOutput::StdOut { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => OutputChunk::Stdout(message.to_vec()),
        }
    }
}

impl DockerManager {
    /// Connect to the daemon, retrying briefly while it comes up.
    ///
    /// Failure is reported as [`CommitError::DockerUnavailable`].
    pub async fn connect() -> Result<Self> {
        const MAX_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 200;

        for attempt in 0..=MAX_RETRIES {
            match Self::try_connect().await {
                Ok(manager) => {
                    if attempt > 0 {
                        debug!("Connected to Docker after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    debug!("Docker connection attempt {} failed: {}", attempt + 1, e);
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        let (_, debug_info) = Self::is_available_verbose().await;
        Err(CommitError::DockerUnavailable(format!(
            "failed to connect after {} attempts.\n\n{}\nMake sure Docker is running, or point DOCKER_HOST at its socket.",
            MAX_RETRIES + 1,
            debug_info
        ))
        .into())
    }

    /// Check if Docker is available with detailed debug information
    pub async fn is_available_verbose() -> (bool, String) {
        match Self::try_connect_verbose().await {
            Ok((_, debug_info)) => (true, debug_info),
            Err(e) => (false, format!("Docker not available: {}", e)),
        }
    }

    async fn try_connect() -> Result<Self> {
        for (_description, socket_path) in Self::socket_candidates() {
            if let Ok(docker) = Self::try_socket_path(&socket_path).await {
                return Ok(Self { docker });
            }
        }

        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| anyhow!("Failed to connect to Docker daemon: {}", e))?;
        docker
            .ping()
            .await
            .map_err(|e| anyhow!("Docker daemon not responding: {}", e))?;

        Ok(Self { docker })
    }

    async fn try_connect_verbose() -> Result<(Self, String)> {
        let mut debug_info = String::from("Docker socket detection:\n");

        for (description, socket_path) in &Self::socket_candidates() {
            debug_info.push_str(&format!("  • {}: ", description));
            match Self::try_socket_path(socket_path).await {
                Ok(docker) => {
                    debug_info.push_str(&format!("connected ({})\n", socket_path));
                    return Ok((Self { docker }, debug_info));
                }
                Err(e) => debug_info.push_str(&format!("failed - {}\n", e)),
            }
        }

        debug_info.push_str("  • bollard default detection: ");
        match Docker::connect_with_local_defaults() {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    debug_info.push_str("connected\n");
                    return Ok((Self { docker }, debug_info));
                }
                Err(e) => debug_info.push_str(&format!("failed to ping - {}\n", e)),
            },
            Err(e) => debug_info.push_str(&format!("failed to connect - {}\n", e)),
        }

        Err(anyhow!("{}", debug_info))
    }

    /// Sockets to try, in priority order
    fn socket_candidates() -> Vec<(String, String)> {
        let mut candidates = Vec::new();

        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            candidates.push(("DOCKER_HOST environment variable".to_string(), docker_host));
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(home) = std::env::var("HOME") {
                candidates.push((
                    "macOS Docker Desktop".to_string(),
                    format!("unix://{}/.docker/run/docker.sock", home),
                ));
                candidates.push((
                    "Colima".to_string(),
                    format!("unix://{}/.colima/default/docker.sock", home),
                ));
                candidates.push((
                    "OrbStack".to_string(),
                    format!("unix://{}/.orbstack/run/docker.sock", home),
                ));
            }
        }

        candidates.push((
            "Standard Linux location".to_string(),
            "unix:///var/run/docker.sock".to_string(),
        ));

        candidates
    }

    async fn try_socket_path(socket_path: &str) -> Result<Docker> {
        let Some(socket_file) = socket_path.strip_prefix("unix://") else {
            return Err(anyhow!("Unsupported socket protocol: {}", socket_path));
        };

        let docker = Docker::connect_with_socket(socket_file, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| anyhow!("Failed to connect to socket {}: {}", socket_path, e))?;
        docker
            .ping()
            .await
            .map_err(|e| anyhow!("Socket {} not responding: {}", socket_path, e))?;

        Ok(docker)
    }

    fn extract_host_port(inspect: &ContainerInspectResponse, container_port: u16) -> Result<u16> {
        let key = format!("{}/tcp", container_port);
        let host_port = inspect
            .network_settings
            .as_ref()
            .and_then(|settings| settings.ports.as_ref())
            .and_then(|ports| ports.get(&key))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|binding| binding.host_port.as_ref())
            .ok_or_else(|| anyhow!("Container has no host port bound for {}", key))?;

        host_port
            .parse::<u16>()
            .map_err(|e| anyhow!("Invalid host port '{}': {}", host_port, e))
    }
}

impl ContainerRuntime for DockerManager {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| CommitError::DockerUnavailable(e.to_string()).into())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(anyhow!("Failed to inspect image {}: {}", image, e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            if let Err(e) = result {
                return Err(anyhow!("Failed to pull image {}: {}", image, e));
            }
        }

        debug!("Pulled image: {}", image);
        Ok(())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<NetworkStatus> {
        let request = NetworkCreateRequest {
            name: name.to_string(),
            labels: Some(labels.clone()),
            ..Default::default()
        };

        match self.docker.create_network(request).await {
            Ok(_) => Ok(NetworkStatus::Created),
            Err(e) if is_conflict(&e) => Ok(NetworkStatus::AlreadyExists),
            Err(e) => Err(anyhow!("Failed to create network {}: {}", name, e)),
        }
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(anyhow!("Failed to remove network {}: {}", name, e)),
        }
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let port_bindings = spec.publish_port.map(|port| {
            HashMap::from([(
                format!("{}/tcp", port),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: None,
                }]),
            )])
        });

        let host_config = HostConfig {
            network_mode: spec.network.clone(),
            port_bindings,
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            cmd: spec.cmd.clone(),
            entrypoint: spec.entrypoint.clone(),
            labels: Some(spec.labels.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| anyhow!("Failed to create container {}: {}", name, e))?;

        debug!("Created container {} ({})", name, container.id);
        Ok(container.id)
    }

    async fn attach(&self, id: &str) -> Result<OutputStream> {
        let options = AttachContainerOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .stream(true)
            .logs(true)
            .build();

        let attached = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| anyhow!("Failed to attach to container {}: {}", id, e))?;

        Ok(attached
            .output
            .map(|chunk| {
                chunk
                    .map(OutputChunk::from)
                    .map_err(|e| anyhow!("Error reading container output: {}", e))
            })
            .boxed())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| anyhow!("Failed to start container {}: {}", id, e))
    }

    async fn wait_exit_code(&self, id: &str) -> Result<i64> {
        let mut waits = std::pin::pin!(self.docker.wait_container(id, None::<WaitContainerOptions>));

        match waits.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(anyhow!("Failed to wait for container {}: {}", id, e)),
            None => Err(anyhow!("Container {} wait ended without a status", id)),
        }
    }

    async fn published_port(&self, id: &str, container_port: u16) -> Result<u16> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| anyhow!("Failed to inspect container {}: {}", id, e))?;

        Self::extract_host_port(&inspect, container_port)
    }

    async fn exec(&self, id: &str, env: &[String], cmd: &[String]) -> Result<ExecOutput> {
        let config = ExecConfig {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            env: Some(env.to_vec()),
            cmd: Some(cmd.to_vec()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, config)
            .await
            .map_err(|e| anyhow!("Failed to create exec in {}: {}", id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let StartExecResults::Attached { output: mut stream, .. } = self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(|e| anyhow!("Failed to start exec in {}: {}", id, e))?
        {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| anyhow!("Error reading exec output: {}", e))?;
                match OutputChunk::from(chunk) {
                    OutputChunk::Stdout(bytes) => stdout.extend_from_slice(&bytes),
                    OutputChunk::Stderr(bytes) => stderr.extend_from_slice(&bytes),
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| anyhow!("Failed to inspect exec in {}: {}", id, e))?;

        Ok(ExecOutput {
            stdout: decode_stdout(stdout, &format!("exec in {}", id))?,
            stderr: decode_stderr(&stderr),
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        match self
            .docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(anyhow!("Failed to stop container {}: {}", id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(anyhow!("Failed to remove container {}: {}", id, e)),
        }
    }
}
