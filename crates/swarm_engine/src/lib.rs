pub mod artifacts;
pub mod config;
pub mod error;
pub mod reaper;
mod registry;
pub mod store;
pub mod submitter;
pub mod watchdog;

pub use config::{ClientSettings, StorageSettings, SwarmConfig};
pub use error::{ArtifactError, StoreError, SubmitError, WatchdogError};
pub use registry::TargetRegistry;
pub use store::SwarmStore;
pub use watchdog::{TriggerOrigin, WatchdogTrigger};

use chrono::{DateTime, Utc};
use swarm_model::{ReapReport, SubmitReceipt, Submission, SubmitterId, WatchdogReport};

/// Job fan-out and lease recovery over one store and one read-only registry.
pub struct SwarmEngine<R: TargetRegistry> {
    registry: R,
    store: SwarmStore,
    client: ClientSettings,
}

impl SwarmEngine<SwarmConfig> {
    pub fn from_config(config: SwarmConfig, store: SwarmStore) -> Self {
        let client = config.client.clone();
        Self::new(config, store).with_client_settings(client)
    }
}

impl<R: TargetRegistry> SwarmEngine<R> {
    pub fn new(registry: R, store: SwarmStore) -> Self {
        Self {
            registry,
            store,
            client: ClientSettings::default(),
        }
    }

    pub fn with_client_settings(mut self, client: ClientSettings) -> Self {
        self.client = client;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn store(&self) -> &SwarmStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SwarmStore {
        &mut self.store
    }

    pub fn submit(
        &mut self,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> Result<SubmitReceipt, SubmitError> {
        submitter::submit(&mut self.store, &self.registry, submission, now)
    }

    pub fn run_watchdog(
        &mut self,
        trigger: &WatchdogTrigger,
        now: DateTime<Utc>,
    ) -> Result<WatchdogReport, WatchdogError> {
        watchdog::run(&mut self.store, &self.client, trigger, now)
    }

    pub fn reap(&mut self, submitter_id: SubmitterId) -> Result<ReapReport, StoreError> {
        reaper::reap(&mut self.store, &self.registry, submitter_id, None)
    }
}
