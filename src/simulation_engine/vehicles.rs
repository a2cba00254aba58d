use crate::communication::channels::{Registration, RelayChannel, Switchboard};
use crate::communication::messages::{Address, Phase, Request, RequestKind};
use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};
use crate::global_variables::{INTERSECTION_COUNT, LANE_COUNT};
use crate::monitoring::progress_log::ProgressLog;
use crate::simulation_engine::grid::RoadLayout;
use crate::simulation_engine::intersections::{IntersectionId, SharedTraffic};
use crate::simulation_engine::lanes::LaneId;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

/// 64-bit fractional golden-ratio constant for seed mixing.
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

/// Represents a vehicle travelling through the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub lane: LaneId,
    pub intersection: IntersectionId,
    /// Index of the crossing being worked on within the lane.
    pub cursor: usize,
}

/// Starting position requested for a vehicle; missing parts are drawn at
/// random when the vehicle is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleSpec {
    pub lane: Option<LaneId>,
    pub intersection: Option<IntersectionId>,
}

impl VehicleSpec {
    pub fn random() -> Self {
        Self::default()
    }

    pub fn at(lane: LaneId, intersection: IntersectionId) -> Self {
        Self {
            lane: Some(lane),
            intersection: Some(intersection),
        }
    }
}

/// How long a denied vehicle waits before resending its request.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` counts denials so far for the current request, from 1.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same wait after every denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl RetryPolicy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Dwell window `[min, min + spread)` sampled after each granted phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseWindow {
    pub min: Duration,
    pub spread: Duration,
}

impl PauseWindow {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            min: Duration::from_millis(config.min_pause_ms),
            spread: Duration::from_millis(config.max_pause_ms),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let spread = u64::try_from(self.spread.as_micros()).unwrap_or(u64::MAX);
        let extra = if spread == 0 { 0 } else { rng.random_range(0..spread) };
        self.min + Duration::from_micros(extra)
    }
}

/// Everything a vehicle task needs besides its own state.
#[derive(Clone)]
pub struct VehicleContext {
    pub layout: Arc<RoadLayout>,
    pub switchboard: Arc<Switchboard>,
    pub traffic: SharedTraffic,
    pub retry: Arc<dyn RetryPolicy>,
    pub pause: PauseWindow,
    pub wake_on_state_change: bool,
    pub log: Arc<ProgressLog>,
}

/// Summary of one finished journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleReport {
    pub id: VehicleId,
    pub intersections_visited: u32,
    /// Authorized AskPass requests.
    pub passes: u32,
    /// Denied AskPass requests, retries included.
    pub denials: u32,
    /// Position among vehicles that left the map (1 = first).
    pub exit_rank: u32,
}

/// Seeds from wall-clock time mixed with the vehicle id so agents started in
/// the same instant still draw different sequences.
fn seed_for(id: VehicleId) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    now ^ u64::from(id.0 + 1).wrapping_mul(MIXING_CONSTANT)
}

/// Drives one vehicle through the admission protocol until it leaves the map.
pub struct VehicleAgent {
    vehicle: Vehicle,
    rng: SmallRng,
    ctx: VehicleContext,
    report: VehicleReport,
}

impl VehicleAgent {
    pub fn new(id: VehicleId, spec: VehicleSpec, ctx: VehicleContext) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed_for(id));
        let intersection = spec
            .intersection
            .unwrap_or_else(|| IntersectionId(rng.random_range(1..=INTERSECTION_COUNT)));
        let lane = spec
            .lane
            .unwrap_or_else(|| LaneId(rng.random_range(1..=LANE_COUNT)));

        Self {
            vehicle: Vehicle {
                id,
                lane,
                intersection,
                cursor: 0,
            },
            rng,
            ctx,
            report: VehicleReport {
                id,
                intersections_visited: 0,
                passes: 0,
                denials: 0,
                exit_rank: 0,
            },
        }
    }

    pub async fn run(mut self) -> SimResult<VehicleReport> {
        log::debug!(
            "vehicle {} starts on lane {} at intersection {}",
            self.vehicle.id.0,
            self.vehicle.lane,
            self.vehicle.intersection
        );
        loop {
            match self.visit().await? {
                Some((next, arrival)) => {
                    self.dwell().await;
                    self.vehicle.intersection = next;
                    self.vehicle.lane =
                        self.ctx.layout.random_approach_lane(arrival, &mut self.rng);
                    self.vehicle.cursor = 0;
                }
                None => {
                    let total = self.ctx.traffic.lock()?.record_exit();
                    self.ctx.log.message(0, &format!("{total} vehicles exited"));
                    log::info!(
                        "vehicle {} left the map after {} intersections ({} denials)",
                        self.vehicle.id.0,
                        self.report.intersections_visited,
                        self.report.denials
                    );
                    self.report.exit_rank = total;
                    return Ok(self.report);
                }
            }
        }
    }

    /// One pass through the current intersection. Returns where the vehicle
    /// goes next, or `None` when it leaves the map.
    async fn visit(&mut self) -> SimResult<Option<(IntersectionId, LaneId)>> {
        let lane = self
            .ctx
            .layout
            .lane(self.vehicle.lane)
            .cloned()
            .ok_or_else(|| {
                SimError::Config(format!("lane {} is not in the layout", self.vehicle.lane))
            })?;
        let channel = self.ctx.switchboard.relay(self.vehicle.intersection)?;
        let mut inbox = channel.register(Address::Vehicle(self.vehicle.id))?;
        self.report.intersections_visited += 1;
        self.vehicle.cursor = 0;

        self.say(format!("Arrive inter {}", self.vehicle.intersection));
        self.say(format!("Arrive lane {}", lane.id));
        channel
            .send(Request::notice(RequestKind::Arrived, self.vehicle, None))
            .await?;
        if lane.passes_straight_through() {
            log::debug!(
                "vehicle {} turns right on lane {} without asking",
                self.vehicle.id.0,
                lane.id
            );
        }

        for (cursor, current) in lane.crossings.iter().copied().enumerate() {
            self.vehicle.cursor = cursor;
            let previous = lane.previous(cursor);
            for phase in Phase::SEQUENCE {
                let request = Request::at_crossing(
                    RequestKind::AskPass,
                    self.vehicle,
                    current,
                    previous,
                    phase,
                );
                self.ask_pass(&channel, &mut inbox, request).await?;
                channel.send(request.with_kind(RequestKind::Info)).await?;
                self.say(format!("{phase} lane {}", current.crossed_lane));
                self.dwell().await;
            }
        }

        channel
            .send(Request::notice(RequestKind::Departed, self.vehicle, lane.last()))
            .await?;
        self.say(format!("Leave lane {}", lane.id));
        self.say(format!("Leave inter {}", self.vehicle.intersection));
        drop(inbox);

        Ok(self.ctx.layout.successor(self.vehicle.intersection, lane.id))
    }

    /// Sends `request` until the relay answers with an authorization.
    async fn ask_pass(
        &mut self,
        channel: &RelayChannel,
        inbox: &mut Registration,
        request: Request,
    ) -> SimResult<()> {
        let label = request.phase.map(Phase::short_label).unwrap_or("?");
        let ask = format!("Ask {label} lane {}", request.lane);
        self.say(ask.clone());

        let mut attempt = 0;
        loop {
            channel.send(request).await?;
            let response = inbox.recv().await?;
            if response.vehicle != self.vehicle.id {
                return Err(SimError::violation(
                    format!("vehicle {}", self.vehicle.id.0),
                    format!("received the decision for vehicle {}", response.vehicle.0),
                ));
            }
            if response.authorized {
                if attempt > 0 {
                    self.say(ask);
                }
                self.say(format!("Auth {label} lane {}", request.lane));
                self.report.passes += 1;
                return Ok(());
            }
            if attempt == 0 {
                self.say(format!("Deny {label} lane {}", request.lane));
            }
            attempt += 1;
            self.report.denials += 1;
            self.wait_before_retry(attempt).await?;
        }
    }

    async fn wait_before_retry(&self, attempt: u32) -> SimResult<()> {
        let delay = self.ctx.retry.delay(attempt);
        if self.ctx.wake_on_state_change {
            let signal = self.ctx.switchboard.state_signal(self.vehicle.intersection)?;
            tokio::select! {
                _ = sleep(delay) => {}
                _ = signal.notified() => {}
            }
        } else {
            sleep(delay).await;
        }
        Ok(())
    }

    async fn dwell(&mut self) {
        let pause = self.ctx.pause.sample(&mut self.rng);
        sleep(pause).await;
    }

    fn say(&self, text: String) {
        self.ctx.log.message(self.vehicle.id.0 as usize, &text);
    }
}

#[cfg(test)]
impl VehicleAgent {
    fn vehicle(&self) -> Vehicle {
        self.vehicle
    }
}
