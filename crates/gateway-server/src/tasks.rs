//! Periodic maintenance tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Run `job` every `interval` until `stop` flips.
///
/// The first run happens one interval after spawning. A zero interval never
/// runs the job.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        if interval.is_zero() {
            warn!(task = name, "Periodic task has a zero interval and will not run");
            while !*stop.borrow() {
                if stop.changed().await.is_err() {
                    break;
                }
            }
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(task = name, "Running periodic task");
                    job().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(task = name, "Periodic task stopped");
    })
}

/// Spawn the registry refresh, monitor sweep, limiter eviction and cache
/// purge loops
pub fn spawn_background_tasks(state: &AppState, stop: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let config = Arc::clone(&state.config);

    let registry = Arc::clone(&state.registry);
    let refresh = spawn_periodic(
        "registry_refresh",
        config.registry.refresh_interval,
        stop.clone(),
        move || {
            let registry = Arc::clone(&registry);
            async move {
                // The previous snapshot stays in place on failure.
                let _ = registry.refresh().await;
            }
        },
    );

    let monitor = Arc::clone(&state.monitor);
    let sweep = spawn_periodic(
        "monitor_sweep",
        config.monitor.sweep_interval,
        stop.clone(),
        move || {
            monitor.sweep();
            std::future::ready(())
        },
    );

    let limiter = Arc::clone(&state.limiter);
    let horizon = config.rate_limit.idle_eviction;
    let evict = spawn_periodic(
        "limiter_eviction",
        config.rate_limit.eviction_interval,
        stop.clone(),
        move || {
            limiter.evict_idle(horizon);
            std::future::ready(())
        },
    );

    let cache = Arc::clone(&state.cache);
    let purge = spawn_periodic(
        "cache_purge",
        config.cache.purge_interval,
        stop.clone(),
        move || {
            cache.purge_expired();
            std::future::ready(())
        },
    );

    vec![refresh, sweep, evict, purge]
}
