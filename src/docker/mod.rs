//! Ephemeral containers and networks used by a remote commit.
//!
//! The pipeline only talks to [`ContainerRuntime`]; [`DockerManager`] is the
//! implementation backed by the docker daemon.

pub mod client;
pub mod lifecycle;
pub mod registry;

use anyhow::Result;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::future::Future;

pub use client::DockerManager;
pub use lifecycle::{
    PullPolicy, backoff_delay, exec_once, network_create_if_absent, pull_image_if_absent,
    remove_all, run, run_once,
};
pub use registry::RunContext;

/// How a container should be created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
    pub network: Option<String>,
    /// Container port to publish on 127.0.0.1 with a daemon-assigned host port
    pub publish_port: Option<u16>,
}

/// One piece of demultiplexed container output.
///
/// Frames are raw bytes; a multibyte character may straddle two of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Decode captured stdout once it is complete; invalid UTF-8 is an error
pub fn decode_stdout(bytes: Vec<u8>, source: &str) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| anyhow::anyhow!("Output of {} is not valid UTF-8: {}", source, e))
}

/// Decode captured stderr, which is only ever shown in messages
pub fn decode_stderr(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub type OutputStream = BoxStream<'static, Result<OutputChunk>>;

/// Captured result of a command executed inside a running container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Created,
    AlreadyExists,
}

/// Operations the pipeline needs from a container engine.
///
/// Removal of something that no longer exists is not an error.
pub trait ContainerRuntime: Send + Sync {
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    fn image_exists(&self, image: &str) -> impl Future<Output = Result<bool>> + Send;

    fn pull_image(&self, image: &str) -> impl Future<Output = Result<()>> + Send;

    fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> impl Future<Output = Result<NetworkStatus>> + Send;

    fn remove_network(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Create (but do not start) a container, returning its id
    fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Attach to stdout/stderr; must be called before `start_container` so no
    /// output is lost
    fn attach(&self, id: &str) -> impl Future<Output = Result<OutputStream>> + Send;

    fn start_container(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Block until the container exits and return its exit code
    fn wait_exit_code(&self, id: &str) -> impl Future<Output = Result<i64>> + Send;

    /// Host port the daemon assigned to a published container port
    fn published_port(
        &self,
        id: &str,
        container_port: u16,
    ) -> impl Future<Output = Result<u16>> + Send;

    fn exec(
        &self,
        id: &str,
        env: &[String],
        cmd: &[String],
    ) -> impl Future<Output = Result<ExecOutput>> + Send;

    fn stop_container(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Force-remove a container together with its anonymous volumes
    fn remove_container(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Rewrite a Docker Hub image reference to pull from a registry mirror.
///
/// `docker.io` leaves the reference untouched; any other registry serves the
/// image under `<registry>/<namespace>/<name:tag>`.
pub fn registry_image_url(registry: &str, namespace: &str, image: &str) -> String {
    if registry.is_empty() || registry == "docker.io" {
        return image.to_string();
    }
    let name = image.rsplit('/').next().unwrap_or(image);
    format!("{}/{}/{}", registry, namespace, name)
}
