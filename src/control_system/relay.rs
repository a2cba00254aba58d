use crate::communication::channels::{ArbiterChannel, Registration, RelayChannel, Switchboard};
use crate::communication::messages::{Address, Forwarded, Request, RequestKind, Response};
use crate::error::{SimError, SimResult};
use crate::simulation_engine::intersections::{IntersectionId, IntersectionState, SharedTraffic};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Per-relay counters, reported when the simulation ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub arrivals: u64,
    pub infos: u64,
    pub departures: u64,
    /// AskPass requests sent on to the arbiter.
    pub forwarded: u64,
    pub authorized: u64,
    pub denied: u64,
    /// Transitions written after an authorization.
    pub applied: u64,
    /// Requests dropped because they did not fit the current state.
    pub violations: u64,
}

/// Mediator between the vehicles of one intersection and the arbiter.
///
/// Notices are handled locally. AskPass requests are forwarded one at a
/// time; the next request is not read until the arbiter has answered the
/// current one and the resulting transition has been written.
pub struct IntersectionRelay {
    id: IntersectionId,
    inbox: mpsc::Receiver<Request>,
    vehicles: Arc<RelayChannel>,
    arbiter: Arc<ArbiterChannel>,
    decisions: Registration,
    traffic: SharedTraffic,
    max_queue: u32,
    state_changed: Arc<Notify>,
    cancel: CancellationToken,
    stats: RelayStats,
}

impl IntersectionRelay {
    pub fn new(
        id: IntersectionId,
        switchboard: &Switchboard,
        traffic: SharedTraffic,
        max_queue: u32,
        cancel: CancellationToken,
    ) -> SimResult<Self> {
        let vehicles = switchboard.relay(id)?;
        let inbox = vehicles.take_server_end()?;
        let arbiter = switchboard.arbiter();
        let decisions = arbiter.register(Address::Relay(id))?;
        Ok(Self {
            id,
            inbox,
            vehicles,
            arbiter,
            decisions,
            traffic,
            max_queue,
            state_changed: switchboard.state_signal(id)?,
            cancel,
            stats: RelayStats::default(),
        })
    }

    pub fn address(&self) -> Address {
        Address::Relay(self.id)
    }

    pub async fn run(mut self) -> SimResult<RelayStats> {
        log::info!("relay {} started", self.id);
        loop {
            let request = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.inbox.recv() => match received {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle(request).await?;
        }
        log::info!("relay {} stopped: {:?}", self.id, self.stats);
        Ok(self.stats)
    }

    async fn handle(&mut self, request: Request) -> SimResult<()> {
        if request.intersection != self.id {
            self.report_violation(SimError::violation(
                format!("relay {}", self.id),
                format!(
                    "{:?} from vehicle {} names intersection {}",
                    request.kind, request.vehicle.id.0, request.intersection
                ),
            ));
            if request.kind == RequestKind::AskPass {
                let denial = Response {
                    destination: request.sender,
                    vehicle: request.vehicle.id,
                    authorized: false,
                };
                self.answer(denial).await;
            }
            return Ok(());
        }

        match request.kind {
            RequestKind::Arrived => {
                self.stats.arrivals += 1;
                log::debug!(
                    "relay {}: vehicle {} arrived on lane {}",
                    self.id,
                    request.vehicle.id.0,
                    request.lane
                );
            }
            RequestKind::Info => {
                self.stats.infos += 1;
                log::trace!(
                    "relay {}: vehicle {} entered {:?} at lane {}",
                    self.id,
                    request.vehicle.id.0,
                    request.phase,
                    request.lane
                );
            }
            RequestKind::Departed => {
                self.stats.departures += 1;
                self.apply_departure(&request)?;
            }
            RequestKind::AskPass => self.forward(request).await?,
        }
        Ok(())
    }

    /// Frees the after-queue slot the vehicle held at its last crossing.
    fn apply_departure(&mut self, request: &Request) -> SimResult<()> {
        let Some(previous) = request.previous else {
            return Ok(());
        };
        match self.with_state(|state| state.release_after(previous))? {
            Ok(()) => self.state_changed.notify_waiters(),
            Err(err) => self.report_violation(err),
        }
        Ok(())
    }

    async fn forward(&mut self, request: Request) -> SimResult<()> {
        self.stats.forwarded += 1;
        self.arbiter
            .send(Forwarded {
                route: self.address(),
                request,
            })
            .await?;

        let decision = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            decision = self.decisions.recv() => decision?,
        };
        if decision.vehicle != request.vehicle.id {
            return Err(SimError::violation(
                format!("relay {}", self.id),
                format!(
                    "arbiter answered for vehicle {} while vehicle {} was pending",
                    decision.vehicle.0, request.vehicle.id.0
                ),
            ));
        }

        let mut reply = decision.redirect(request.sender);
        if reply.authorized {
            self.stats.authorized += 1;
            match self.apply_authorized(&request)? {
                Ok(()) => {
                    self.stats.applied += 1;
                    self.state_changed.notify_waiters();
                }
                Err(err) => {
                    // No transition was written, so the vehicle must not move.
                    self.report_violation(err);
                    reply.authorized = false;
                }
            }
        } else {
            self.stats.denied += 1;
        }

        self.answer(reply).await;
        Ok(())
    }

    fn apply_authorized(&self, request: &Request) -> SimResult<SimResult<()>> {
        let max_queue = self.max_queue;
        let component = format!("relay {}", self.id);
        self.with_state(|state| {
            let (Some(phase), Some(current)) = (request.phase, request.crossing) else {
                return Err(SimError::violation(component, "AskPass without phase or crossing"));
            };
            state.apply_transition(phase, current, request.previous, max_queue)?;
            if log::log_enabled!(log::Level::Trace) {
                log::trace!("{}", state.render());
            }
            Ok(())
        })
    }

    async fn answer(&mut self, response: Response) {
        if let Err(err) = self.vehicles.reply(response).await {
            if !self.cancel.is_cancelled() {
                self.report_violation(err);
            }
        }
    }

    /// Runs `f` on this relay's intersection while holding the traffic lock.
    fn with_state<T>(&self, f: impl FnOnce(&mut IntersectionState) -> T) -> SimResult<T> {
        let mut traffic = self.traffic.lock()?;
        let state = traffic.intersection_mut(self.id).ok_or_else(|| {
            SimError::exhausted(format!("intersection {}", self.id), "state was never allocated")
        })?;
        Ok(f(state))
    }

    fn report_violation(&mut self, err: SimError) {
        self.stats.violations += 1;
        log::warn!("relay {}: {} (request dropped)", self.id, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::messages::Phase;
    use crate::simulation_engine::lanes::{CrossingRef, LaneId, Orientation};
    use crate::simulation_engine::vehicles::{Vehicle, VehicleId};

    fn vehicle(id: u32, intersection: u8) -> Vehicle {
        Vehicle {
            id: VehicleId(id),
            lane: LaneId(1),
            intersection: IntersectionId(intersection),
            cursor: 0,
        }
    }

    const SLOT: CrossingRef = CrossingRef {
        crossing: 15,
        orientation: Orientation::Horizontal,
        crossed_lane: LaneId(11),
    };

    #[tokio::test]
    async fn request_for_another_intersection_is_denied_without_forwarding() {
        let switchboard = Switchboard::allocate(4).unwrap();
        let cancel = CancellationToken::new();
        let relay = IntersectionRelay::new(
            IntersectionId(1),
            &switchboard,
            SharedTraffic::new(),
            1,
            cancel.clone(),
        )
        .unwrap();
        let task = tokio::spawn(relay.run());

        let channel = switchboard.relay(IntersectionId(1)).unwrap();
        let mut inbox = channel.register(Address::Vehicle(VehicleId(0))).unwrap();
        let request =
            Request::at_crossing(RequestKind::AskPass, vehicle(0, 2), SLOT, None, Phase::Before);
        channel.send(request).await.unwrap();
        assert!(!inbox.recv().await.unwrap().authorized);

        cancel.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.forwarded, 0);
        assert_eq!(stats.violations, 1);
    }

    #[tokio::test]
    async fn departure_without_previous_crossing_changes_nothing() {
        let switchboard = Switchboard::allocate(4).unwrap();
        let traffic = SharedTraffic::new();
        let cancel = CancellationToken::new();
        let relay = IntersectionRelay::new(
            IntersectionId(3),
            &switchboard,
            traffic.clone(),
            1,
            cancel.clone(),
        )
        .unwrap();
        let task = tokio::spawn(relay.run());

        let channel = switchboard.relay(IntersectionId(3)).unwrap();
        channel
            .send(Request::notice(RequestKind::Arrived, vehicle(1, 3), None))
            .await
            .unwrap();
        channel
            .send(Request::notice(RequestKind::Departed, vehicle(1, 3), None))
            .await
            .unwrap();

        // Let the relay drain its queue before stopping it.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.arrivals, 1);
        assert_eq!(stats.departures, 1);
        assert_eq!(stats.violations, 0);
        assert!(traffic.lock().unwrap().intersection(IntersectionId(3)).unwrap().is_idle());
    }
}
