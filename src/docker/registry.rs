use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::cancel::CancelToken;
use crate::constants::{
    COMPOSE_PROJECT_LABEL, DB_CONTAINER_PREFIX, DIFFER_CONTAINER_PREFIX, DUMP_CONTAINER_PREFIX,
    NETWORK_PREFIX, PROJECT_LABEL,
};

/// Everything one remote commit run creates in docker.
///
/// Containers are tracked here as soon as they exist so teardown can find
/// them, including when the run is interrupted half-way.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    labels: HashMap<String, String>,
    containers: Mutex<Vec<String>>,
    cancel: CancelToken,
}

impl RunContext {
    pub fn new(project_id: &str, cancel: CancelToken) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        Self::with_run_id(run_id, project_id, cancel)
    }

    pub fn with_run_id(run_id: impl Into<String>, project_id: &str, cancel: CancelToken) -> Self {
        let labels = HashMap::from([
            (PROJECT_LABEL.to_string(), project_id.to_string()),
            (COMPOSE_PROJECT_LABEL.to_string(), project_id.to_string()),
        ]);

        Self {
            run_id: run_id.into(),
            labels,
            containers: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn network(&self) -> String {
        format!("{}_{}", NETWORK_PREFIX, self.run_id)
    }

    pub fn db_container(&self) -> String {
        format!("{}_{}", DB_CONTAINER_PREFIX, self.run_id)
    }

    pub fn differ_container(&self) -> String {
        format!("{}_{}", DIFFER_CONTAINER_PREFIX, self.run_id)
    }

    pub fn dump_container(&self) -> String {
        format!("{}_{}", DUMP_CONTAINER_PREFIX, self.run_id)
    }

    /// Labels put on every network and container of this run
    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A panic while holding the lock leaves the list itself intact
        self.containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn track(&self, container: impl Into<String>) {
        let container = container.into();
        let mut containers = self.lock();
        if !containers.contains(&container) {
            containers.push(container);
        }
    }

    pub fn untrack(&self, container: &str) {
        self.lock().retain(|c| c != container);
    }

    pub fn tracked(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Hand every tracked container to the caller and forget them
    pub fn take_tracked(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }
}
