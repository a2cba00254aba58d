use crate::communication::channels::ArbiterChannel;
use crate::communication::messages::{Forwarded, Phase, Request, RequestKind, Response};
use crate::error::SimResult;
use crate::simulation_engine::intersections::{IntersectionState, SharedTraffic};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The admission rule.
///
/// - `Before`: room left in the before-queue for the request's orientation.
/// - `Crossing`: nobody inside the crossing.
/// - `After`: room left in the after-queue for the request's orientation.
///
/// Anything else, including inert or unknown slots, is denied.
pub fn decide(state: &IntersectionState, request: &Request, max_queue: u32) -> bool {
    if request.kind != RequestKind::AskPass {
        return false;
    }
    let (Some(phase), Some(current)) = (request.phase, request.crossing) else {
        return false;
    };
    let Some(crossing) = state.active_crossing(current.crossing) else {
        return false;
    };
    match phase {
        Phase::Before => crossing.before(current.orientation) < max_queue,
        Phase::Crossing => !crossing.occupied,
        Phase::After => crossing.after(current.orientation) < max_queue,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub decisions: u64,
    pub authorized: u64,
    pub denied: u64,
}

/// Central decision authority. Keeps no state of its own between requests:
/// every decision reads the intersection the request names, under the
/// shared traffic lock.
pub struct Arbiter {
    inbox: mpsc::Receiver<Forwarded>,
    channel: Arc<ArbiterChannel>,
    traffic: SharedTraffic,
    max_queue: u32,
    cancel: CancellationToken,
    stats: ArbiterStats,
}

impl Arbiter {
    pub fn new(
        channel: Arc<ArbiterChannel>,
        traffic: SharedTraffic,
        max_queue: u32,
        cancel: CancellationToken,
    ) -> SimResult<Self> {
        let inbox = channel.take_server_end()?;
        Ok(Self {
            inbox,
            channel,
            traffic,
            max_queue,
            cancel,
            stats: ArbiterStats::default(),
        })
    }

    /// Evaluates one request against the current state.
    pub fn evaluate(&self, request: &Request) -> SimResult<bool> {
        let traffic = self.traffic.lock()?;
        Ok(traffic
            .intersection(request.intersection)
            .map(|state| decide(state, request, self.max_queue))
            .unwrap_or(false))
    }

    /// Drains the shared channel in arrival order until cancelled.
    pub async fn run(mut self) -> SimResult<ArbiterStats> {
        log::info!("arbiter started (max queue {})", self.max_queue);
        loop {
            let forwarded = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.inbox.recv() => match received {
                    Some(forwarded) => forwarded,
                    None => break,
                },
            };

            let request = forwarded.request;
            let authorized = self.evaluate(&request)?;
            self.stats.decisions += 1;
            if authorized {
                self.stats.authorized += 1;
            } else {
                self.stats.denied += 1;
            }
            log::debug!(
                "arbiter: vehicle {} {:?} at intersection {} crossing {:?} -> {}",
                request.vehicle.id.0,
                request.phase,
                request.intersection,
                request.crossing.map(|c| c.crossing),
                if authorized { "authorized" } else { "denied" }
            );

            let response = Response {
                destination: forwarded.route,
                vehicle: request.vehicle.id,
                authorized,
            };
            if let Err(err) = self.channel.reply(response).await {
                if self.cancel.is_cancelled() {
                    break;
                }
                return Err(err);
            }
        }
        log::info!(
            "arbiter stopped after {} decisions ({} authorized, {} denied)",
            self.stats.decisions,
            self.stats.authorized,
            self.stats.denied
        );
        Ok(self.stats)
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("max_queue", &self.max_queue)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::messages::Address;
    use crate::simulation_engine::intersections::IntersectionId;
    use crate::simulation_engine::lanes::{CrossingRef, LaneId, Orientation};
    use crate::simulation_engine::vehicles::{Vehicle, VehicleId};

    fn vehicle() -> Vehicle {
        Vehicle {
            id: VehicleId(0),
            lane: LaneId(1),
            intersection: IntersectionId(1),
            cursor: 0,
        }
    }

    fn ask(crossing: usize, orientation: Orientation, phase: Phase) -> Request {
        let current = CrossingRef {
            crossing,
            orientation,
            crossed_lane: LaneId(11),
        };
        Request::at_crossing(RequestKind::AskPass, vehicle(), current, None, phase)
    }

    #[test]
    fn before_queue_gate() {
        let mut state = IntersectionState::baseline(IntersectionId(1));
        let request = ask(15, Orientation::Horizontal, Phase::Before);
        assert!(decide(&state, &request, 1));
        state
            .apply_transition(Phase::Before, request.crossing.unwrap(), None, 1)
            .unwrap();
        assert!(!decide(&state, &request, 1));
        assert!(decide(&state, &request, 2));
        // The other orientation has its own queue.
        assert!(decide(&state, &ask(15, Orientation::Vertical, Phase::Before), 1));
    }

    #[test]
    fn crossing_gate_is_exclusive() {
        let mut state = IntersectionState::baseline(IntersectionId(1));
        let slot = ask(15, Orientation::Horizontal, Phase::Before).crossing.unwrap();
        state.apply_transition(Phase::Before, slot, None, 1).unwrap();
        let crossing = ask(15, Orientation::Vertical, Phase::Crossing);
        assert!(decide(&state, &crossing, 1));
        state.apply_transition(Phase::Crossing, slot, None, 1).unwrap();
        assert!(!decide(&state, &crossing, 1));
        assert!(!decide(&state, &crossing, 100));
    }

    #[test]
    fn after_queue_gate() {
        let mut state = IntersectionState::baseline(IntersectionId(1));
        let slot = ask(16, Orientation::Horizontal, Phase::Before).crossing.unwrap();
        let after = ask(16, Orientation::Horizontal, Phase::After);
        state.apply_transition(Phase::Before, slot, None, 1).unwrap();
        state.apply_transition(Phase::Crossing, slot, None, 1).unwrap();
        assert!(decide(&state, &after, 1));
        state.apply_transition(Phase::After, slot, None, 1).unwrap();
        assert!(!decide(&state, &after, 1));
    }

    #[test]
    fn everything_else_is_denied() {
        let state = IntersectionState::baseline(IntersectionId(1));
        let info = ask(15, Orientation::Horizontal, Phase::Before).with_kind(RequestKind::Info);
        assert!(!decide(&state, &info, 1));
        assert!(!decide(&state, &ask(12, Orientation::Horizontal, Phase::Before), 1));
        assert!(!decide(&state, &ask(40, Orientation::Horizontal, Phase::Crossing), 1));
        let notice = Request::notice(RequestKind::Arrived, vehicle(), None)
            .with_kind(RequestKind::AskPass);
        assert!(!decide(&state, &notice, 1));
    }

    #[tokio::test]
    async fn replies_to_the_stamped_route() {
        let channel = Arc::new(ArbiterChannel::allocate("arbiter", 4).unwrap());
        let traffic = SharedTraffic::new();
        let cancel = CancellationToken::new();
        let arbiter = Arbiter::new(Arc::clone(&channel), traffic, 1, cancel.clone()).unwrap();
        let task = tokio::spawn(arbiter.run());

        let route = Address::Relay(IntersectionId(1));
        let mut inbox = channel.register(route).unwrap();
        channel
            .send(Forwarded {
                route,
                request: ask(15, Orientation::Horizontal, Phase::Crossing),
            })
            .await
            .unwrap();
        let response = inbox.recv().await.unwrap();
        assert!(response.authorized);
        assert_eq!(response.destination, route);

        cancel.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.decisions, 1);
        assert_eq!(stats.authorized, 1);
    }
}

