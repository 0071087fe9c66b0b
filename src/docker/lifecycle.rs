//! Container and network operations with the run's teardown guarantees.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::future::join_all;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    ContainerRuntime, ContainerSpec, ExecOutput, NetworkStatus, OutputChunk, OutputStream,
    decode_stderr, decode_stdout,
};
use super::registry::RunContext;
use crate::cancel::CancelToken;
use crate::config::types::Docker;
use crate::error::CommitError;

/// Retry behaviour for image pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullPolicy {
    pub retries: u32,
    pub backoff_base: Duration,
}

impl From<&Docker> for PullPolicy {
    fn from(docker: &Docker) -> Self {
        Self {
            retries: docker.pull_retries,
            backoff_base: Duration::from_secs(docker.pull_backoff_secs),
        }
    }
}

/// Delay before retry number `attempt` (0-based): `base * 2^(attempt + 1)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt + 1))
}

/// Pull `image` unless it is already in the local cache.
pub async fn pull_image_if_absent<R: ContainerRuntime>(
    runtime: &R,
    image: &str,
    policy: &PullPolicy,
    cancel: &CancelToken,
) -> Result<()> {
    if runtime.image_exists(image).await? {
        debug!("Image {} already cached", image);
        return Ok(());
    }

    info!("Pulling image {}", image);
    let mut attempt = 0;
    loop {
        cancel.check()?;
        match runtime.pull_image(image).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < policy.retries => {
                let delay = backoff_delay(policy.backoff_base, attempt);
                warn!(
                    "Failed to pull {}: {}. Retrying after {:?} ({}/{})",
                    image,
                    e,
                    delay,
                    attempt + 1,
                    policy.retries
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(CommitError::Aborted.into()),
                }
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to pull {} after {} attempts", image, attempt + 1)
                });
            }
        }
    }
}

/// Create the run network; one that already exists is reused.
pub async fn network_create_if_absent<R: ContainerRuntime>(
    runtime: &R,
    ctx: &RunContext,
) -> Result<()> {
    let network = ctx.network();
    match runtime.create_network(&network, ctx.labels()).await? {
        NetworkStatus::Created => debug!("Created network {}", network),
        NetworkStatus::AlreadyExists => debug!("Network {} already exists", network),
    }
    Ok(())
}

/// Drain `output`; stdout is decoded only once every frame has arrived
async fn collect_output(mut output: OutputStream, source: &str) -> Result<(String, String)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(chunk) = output.next().await {
        match chunk? {
            OutputChunk::Stdout(bytes) => stdout.extend_from_slice(&bytes),
            OutputChunk::Stderr(bytes) => stderr.extend_from_slice(&bytes),
        }
    }
    Ok((decode_stdout(stdout, source)?, decode_stderr(&stderr)))
}

/// Run a container to completion and return its stdout.
///
/// The container is removed once it exits. Cancelling the run stops it.
pub async fn run_once<R: ContainerRuntime>(
    runtime: &R,
    ctx: &RunContext,
    name: &str,
    spec: &ContainerSpec,
) -> Result<String> {
    let cancel = ctx.cancel_token();
    cancel.check()?;

    let id = runtime.create_container(name, spec).await?;
    ctx.track(name);

    let finished = async {
        let output = runtime.attach(&id).await?;
        runtime.start_container(&id).await?;
        let (stdout, stderr) = collect_output(output, name).await?;
        let code = runtime.wait_exit_code(&id).await?;
        Ok::<_, anyhow::Error>((stdout, stderr, code))
    };

    let outcome = tokio::select! {
        result = finished => result,
        _ = cancel.cancelled() => {
            debug!("Stopping {} after cancellation", name);
            if let Err(e) = runtime.stop_container(&id).await {
                debug!("Failed to stop {}: {}", name, e);
            }
            Err(CommitError::Aborted.into())
        }
    };

    match runtime.remove_container(&id).await {
        Ok(()) => ctx.untrack(name),
        Err(e) => debug!("Leaving {} for teardown: {}", name, e),
    }

    let (stdout, stderr, code) = outcome?;
    if code != 0 {
        return Err(CommitError::ContainerExit {
            what: format!("container {}", name),
            code,
            output: stderr,
        }
        .into());
    }
    Ok(stdout)
}

/// Start a long-lived container on the run network.
///
/// Output is attached before the container starts so nothing is missed.
/// The container stays tracked; [`remove_all`] tears it down.
pub async fn run<R: ContainerRuntime>(
    runtime: &R,
    ctx: &RunContext,
    name: &str,
    spec: &ContainerSpec,
) -> Result<(String, OutputStream)> {
    ctx.cancel_token().check()?;

    let id = runtime.create_container(name, spec).await?;
    ctx.track(name);

    let output = runtime.attach(&id).await?;
    runtime.start_container(&id).await?;
    debug!("Started {}", name);

    Ok((id, output))
}

/// Execute a command in a running container.
///
/// Fails when the command exits non-zero; stderr is returned for callers
/// that treat any diagnostics as failure.
pub async fn exec_once<R: ContainerRuntime>(
    runtime: &R,
    ctx: &RunContext,
    container: &str,
    env: &[String],
    cmd: &[String],
) -> Result<ExecOutput> {
    let cancel = ctx.cancel_token();
    cancel.check()?;

    let output = tokio::select! {
        result = runtime.exec(container, env, cmd) => result?,
        _ = cancel.cancelled() => return Err(CommitError::Aborted.into()),
    };

    if output.exit_code != 0 {
        return Err(CommitError::ContainerExit {
            what: format!("exec in {}", container),
            code: output.exit_code,
            output: output.stderr,
        }
        .into());
    }
    Ok(output)
}

/// Force-remove every tracked container, then the run network.
///
/// Waits for every removal attempt to finish. Containers that could not be
/// removed are tracked again so a later call retries them. Failures are
/// logged and never returned.
pub async fn remove_all<R: ContainerRuntime>(runtime: &R, ctx: &RunContext) {
    let containers = ctx.take_tracked();
    if !containers.is_empty() {
        debug!("Removing {} container(s)", containers.len());
    }

    let removals = containers.iter().map(|container| async move {
        match runtime.remove_container(container).await {
            Ok(()) => {
                debug!("Removed container {}", container);
                None
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", container, e);
                Some(container)
            }
        }
    });

    for container in join_all(removals).await.into_iter().flatten() {
        ctx.track(container.as_str());
    }

    let network = ctx.network();
    match runtime.remove_network(&network).await {
        Ok(()) => debug!("Removed network {}", network),
        Err(e) => warn!("Failed to remove network {}: {}", network, e),
    }
}
