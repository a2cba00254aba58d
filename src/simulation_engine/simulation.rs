// simulation.rs
use crate::communication::channels::Switchboard;
use crate::config::SimulationConfig;
use crate::control_system::arbiter::{Arbiter, ArbiterStats};
use crate::control_system::relay::{IntersectionRelay, RelayStats};
use crate::error::{SimError, SimResult};
use crate::monitoring::progress_log::ProgressLog;
use crate::simulation_engine::grid::RoadLayout;
use crate::simulation_engine::intersections::{IntersectionId, SharedTraffic};
use crate::simulation_engine::vehicles::{
    FixedDelay, PauseWindow, RetryPolicy, VehicleAgent, VehicleContext, VehicleId, VehicleReport,
    VehicleSpec,
};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub exited: u32,
    pub relays: Vec<(IntersectionId, RelayStats)>,
    pub arbiter: ArbiterStats,
    /// Finished journeys, ordered by vehicle id.
    pub vehicles: Vec<VehicleReport>,
    /// Set when the run was cancelled before every vehicle left the map.
    pub interrupted: bool,
}

impl SimulationReport {
    pub fn total_authorized(&self) -> u64 {
        self.relays.iter().map(|(_, stats)| stats.authorized).sum()
    }

    pub fn total_applied(&self) -> u64 {
        self.relays.iter().map(|(_, stats)| stats.applied).sum()
    }
}

/// Wires the arbiter, the four relays and the vehicle tasks together and
/// tears them down again. A `Simulation` runs once.
pub struct Simulation {
    config: SimulationConfig,
    log: Arc<ProgressLog>,
    layout: Arc<RoadLayout>,
    traffic: SharedTraffic,
    retry: Arc<dyn RetryPolicy>,
    cancel: CancellationToken,
}

impl Simulation {
    pub fn new(config: SimulationConfig, log: ProgressLog) -> SimResult<Self> {
        config.validate()?;
        let retry = Arc::new(FixedDelay(config.retry_delay()));
        Ok(Self {
            config,
            log: Arc::new(log),
            layout: Arc::new(RoadLayout::standard()),
            traffic: SharedTraffic::new(),
            retry,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Arc::new(policy);
        self
    }

    /// Cancelling this token stops the run and triggers the normal teardown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn traffic(&self) -> SharedTraffic {
        self.traffic.clone()
    }

    pub fn progress_log(&self) -> Arc<ProgressLog> {
        Arc::clone(&self.log)
    }

    pub async fn run(self, vehicles: Vec<VehicleSpec>) -> SimResult<SimulationReport> {
        let switchboard = Arc::new(Switchboard::allocate(self.config.channel_capacity)?);
        log::info!(
            "allocated {} channels for {} vehicles",
            switchboard.channel_count(),
            vehicles.len()
        );
        log::debug!("road layout:\n{}", self.layout.describe());
        self.log.header(vehicles.len());

        let arbiter = Arbiter::new(
            switchboard.arbiter(),
            self.traffic.clone(),
            self.config.max_queue,
            self.cancel.clone(),
        )?;
        let arbiter_task = tokio::spawn(supervise(
            "arbiter".to_string(),
            arbiter.run(),
            self.cancel.clone(),
        ));

        let mut relay_tasks = Vec::new();
        for id in IntersectionId::all() {
            let relay = IntersectionRelay::new(
                id,
                &switchboard,
                self.traffic.clone(),
                self.config.max_queue,
                self.cancel.clone(),
            )?;
            let task = tokio::spawn(supervise(
                format!("relay {id}"),
                relay.run(),
                self.cancel.clone(),
            ));
            relay_tasks.push((id, task));
        }

        let ctx = VehicleContext {
            layout: Arc::clone(&self.layout),
            switchboard: Arc::clone(&switchboard),
            traffic: self.traffic.clone(),
            retry: Arc::clone(&self.retry),
            pause: PauseWindow::from_config(&self.config),
            wake_on_state_change: self.config.wake_on_state_change,
            log: Arc::clone(&self.log),
        };

        let mut journeys = JoinSet::new();
        for (n, spec) in vehicles.into_iter().enumerate() {
            let id = VehicleId(u32::try_from(n).map_err(|_| {
                SimError::exhausted("vehicle ids", "more vehicles than ids")
            })?);
            let agent = VehicleAgent::new(id, spec, ctx.clone());
            let cancel = self.cancel.clone();
            journeys.spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    report = agent.run() => Some(report),
                }
            });
        }
        drop(ctx);

        let mut failure: Option<SimError> = None;
        let mut reports = Vec::new();
        while let Some(joined) = journeys.join_next().await {
            match joined {
                Ok(Some(Ok(report))) => reports.push(report),
                Ok(Some(Err(err))) => {
                    log::error!("vehicle failed: {}", err);
                    self.cancel.cancel();
                    failure.get_or_insert(err);
                }
                Ok(None) => {}
                Err(err) => {
                    self.cancel.cancel();
                    failure.get_or_insert(SimError::Task(err));
                }
            }
        }
        let interrupted = self.cancel.is_cancelled();
        if interrupted {
            log::warn!("run interrupted, {} vehicles finished", reports.len());
        }

        // Teardown: stop infrastructure, then release shared resources.
        self.cancel.cancel();
        let arbiter_stats = match arbiter_task.await? {
            Ok(stats) => stats,
            Err(err) => {
                failure.get_or_insert(err);
                ArbiterStats::default()
            }
        };
        let mut relays = Vec::new();
        for (id, task) in relay_tasks {
            match task.await? {
                Ok(stats) => relays.push((id, stats)),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        let exited = {
            let traffic = self.traffic.lock()?;
            for state in traffic.intersections() {
                log::debug!("final state\n{}", state.render());
            }
            traffic.exited()
        };
        let channels = switchboard.channel_count();
        drop(switchboard);
        log::info!("released {} channels, {} vehicles exited", channels, exited);
        log::debug!("{} shared-state handles still open", self.traffic.handle_count());

        if let Some(err) = failure {
            return Err(err);
        }
        reports.sort_by_key(|report| report.id);
        Ok(SimulationReport {
            exited,
            relays,
            arbiter: arbiter_stats,
            vehicles: reports,
            interrupted,
        })
    }
}

/// Cancels the whole run when an infrastructure task fails.
async fn supervise<T>(
    name: String,
    task: impl Future<Output = SimResult<T>>,
    cancel: CancellationToken,
) -> SimResult<T> {
    let outcome = task.await;
    if let Err(err) = &outcome {
        log::error!("{} failed: {}", name, err);
        cancel.cancel();
    }
    outcome
}
