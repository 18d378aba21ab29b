//! Periodic maintenance
//!
//! Ticks on the configured sweep interval and:
//! 1. Removes sandboxes idle for longer than `maintenance.idle_max_age`
//! 2. Drops finished operations nobody polled within the retention window

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::CodeService;

/// Spawn the maintenance loop; abort the handle to stop it
pub fn spawn_maintenance(service: Arc<CodeService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run(service, interval))
}

async fn run(service: Arc<CodeService>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("Maintenance started, interval: {}s", period.as_secs());

    // Skip the first immediate tick
    interval.tick().await;

    loop {
        interval.tick().await;
        let (sandboxes, operations) = service.maintain().await;
        if sandboxes > 0 || operations > 0 {
            info!(
                "Maintenance removed {} idle sandbox(es) and {} stale operation(s)",
                sandboxes, operations
            );
        } else {
            debug!("Maintenance tick: nothing to clean");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::mock::MockEngine;
    use crate::language::Language;

    #[tokio::test]
    async fn test_maintenance_sweeps_idle_sandboxes() {
        let engine = Arc::new(MockEngine::new());
        let mut config = Config::default();
        config.maintenance.idle_max_age = Duration::ZERO;
        let service = Arc::new(CodeService::with_engine(config, engine.clone()));

        service
            .sandboxes()
            .ensure_sandbox("idle", Language::Python)
            .await
            .unwrap();
        assert_eq!(engine.container_names().len(), 1);

        let handle = spawn_maintenance(service.clone(), Duration::from_millis(20));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !engine.container_names().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "sandbox never swept");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(service.sandboxes().registry().is_empty().await);
    }
}
