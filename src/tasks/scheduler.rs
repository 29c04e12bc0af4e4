use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::shutdown::stopped;
use crate::core::state::AppState;
use crate::services::session_registry::SessionRegistry;

const JANITOR_PERIOD: Duration = Duration::from_secs(60);

/// Spawns the background loops. They exit once `shutdown` flips to `true`.
pub(crate) fn spawn(state: &AppState, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let retention = state.settings().delivery().completed_retention();
    vec![tokio::spawn(prune_lapsed_loop(state.registry().clone(), retention, shutdown))]
}

async fn prune_lapsed_loop(
    registry: Arc<SessionRegistry>,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(JANITOR_PERIOD);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = tick.tick() => {
                let pruned = registry.prune_lapsed(retention).await;
                if pruned > 0 {
                    metrics::counter!("delivery_sessions_pruned_total").increment(pruned as u64);
                    tracing::info!(pruned, live = registry.len(), "Pruned finished sessions");
                }
            }
        }
    }
}
