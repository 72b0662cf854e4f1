use crate::broadcast::Broadcaster;
use crate::detection::AnomalyDetector;
use crate::events::{Observation, ProbeOrigin};
use crate::probe::Probe;
use crate::store::ObservationStore;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Runs probe cycles on a timer and on demand
///
/// A cycle probes the target, persists the observation, publishes it to
/// live subscribers and hands it to the anomaly detector. Cycles run as
/// independent tasks: a slow or failing cycle never delays the next tick.
pub struct Scheduler {
    probe: Arc<dyn Probe>,
    store: Arc<ObservationStore>,
    broadcaster: Broadcaster,
    detector: Arc<AnomalyDetector>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        probe: Arc<dyn Probe>,
        store: Arc<ObservationStore>,
        broadcaster: Broadcaster,
        detector: Arc<AnomalyDetector>,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            store,
            broadcaster,
            detector,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one probe cycle to completion
    ///
    /// A persistence failure is logged; the observation is still published
    /// and inspected.
    pub async fn run_once(&self, origin: ProbeOrigin) -> Observation {
        let observation = self.probe.probe(origin).await;
        debug!(
            "Probe {} ({:?}) returned {} in {}ms",
            observation.id, origin, observation.status, observation.latency_ms
        );

        if let Err(e) = self.store.append(observation.clone()) {
            error!("Failed to persist observation {}: {}", observation.id, e);
        }

        let delivered = self.broadcaster.publish(&observation);
        debug!("Observation {} delivered to {} subscribers", observation.id, delivered);

        self.detector.inspect(&observation);
        observation
    }

    /// Fire a manual cycle without waiting for it
    pub fn trigger(self: &Arc<Self>) -> JoinHandle<Observation> {
        info!("Manual probe triggered");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_once(ProbeOrigin::Manual).await })
    }

    /// Start the periodic loop
    ///
    /// The first cycle fires one interval after start. The loop ends when
    /// `shutdown` flips to `true` or its sender is dropped; cycles already
    /// running are left to finish on their own.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Scheduler started, probing every {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&self);
                        tokio::spawn(async move {
                            scheduler.run_once(ProbeOrigin::Scheduled).await;
                        });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Scheduler stopped");
        })
    }
}
