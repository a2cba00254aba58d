use crossing_sim::communication::channels::{Registration, RelayChannel, Switchboard};
use crossing_sim::communication::messages::{Address, Phase, Request, RequestKind};
use crossing_sim::control_system::arbiter::{Arbiter, ArbiterStats};
use crossing_sim::control_system::relay::{IntersectionRelay, RelayStats};
use crossing_sim::simulation_engine::intersections::{IntersectionId, SharedTraffic};
use crossing_sim::simulation_engine::lanes::{CrossingRef, LaneId, Orientation};
use crossing_sim::simulation_engine::vehicles::{Vehicle, VehicleId};
use crossing_sim::SimResult;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const HOME: IntersectionId = IntersectionId(1);

/// Arbiter plus the relay of intersection 1.
struct Harness {
    switchboard: Arc<Switchboard>,
    traffic: SharedTraffic,
    cancel: CancellationToken,
    arbiter: JoinHandle<SimResult<ArbiterStats>>,
    relay: JoinHandle<SimResult<RelayStats>>,
}

impl Harness {
    fn start(max_queue: u32) -> Self {
        let switchboard = Arc::new(Switchboard::allocate(32).unwrap());
        let traffic = SharedTraffic::new();
        let cancel = CancellationToken::new();
        let arbiter = Arbiter::new(
            switchboard.arbiter(),
            traffic.clone(),
            max_queue,
            cancel.clone(),
        )
        .unwrap();
        let relay =
            IntersectionRelay::new(HOME, &switchboard, traffic.clone(), max_queue, cancel.clone())
                .unwrap();
        Self {
            switchboard,
            traffic,
            cancel,
            arbiter: tokio::spawn(arbiter.run()),
            relay: tokio::spawn(relay.run()),
        }
    }

    fn driver(&self, id: u32, lane: u8) -> Driver {
        let channel = self.switchboard.relay(HOME).unwrap();
        let inbox = channel.register(Address::Vehicle(VehicleId(id))).unwrap();
        Driver {
            channel,
            inbox,
            vehicle: Vehicle {
                id: VehicleId(id),
                lane: LaneId(lane),
                intersection: HOME,
                cursor: 0,
            },
        }
    }

    fn crossing(&self, slot: usize) -> (u32, u32, bool, u32, u32) {
        let traffic = self.traffic.lock().unwrap();
        let crossing = &traffic.intersection(HOME).unwrap().crossings()[slot];
        (
            crossing.before(Orientation::Horizontal),
            crossing.before(Orientation::Vertical),
            crossing.occupied,
            crossing.after(Orientation::Horizontal),
            crossing.after(Orientation::Vertical),
        )
    }

    async fn stop(self) -> (ArbiterStats, RelayStats) {
        self.cancel.cancel();
        let arbiter = self.arbiter.await.unwrap().unwrap();
        let relay = self.relay.await.unwrap().unwrap();
        (arbiter, relay)
    }
}

/// Plays one vehicle's side of the protocol by hand.
struct Driver {
    channel: Arc<RelayChannel>,
    inbox: Registration,
    vehicle: Vehicle,
}

impl Driver {
    async fn ask(
        &mut self,
        phase: Phase,
        current: CrossingRef,
        previous: Option<CrossingRef>,
    ) -> bool {
        let request =
            Request::at_crossing(RequestKind::AskPass, self.vehicle, current, previous, phase);
        self.channel.send(request).await.unwrap();
        let response = self.inbox.recv().await.unwrap();
        assert_eq!(response.vehicle, self.vehicle.id);
        response.authorized
    }

    async fn ask_until_granted(
        &mut self,
        phase: Phase,
        current: CrossingRef,
        previous: Option<CrossingRef>,
    ) {
        while !self.ask(phase, current, previous).await {
            sleep(Duration::from_millis(1)).await;
        }
    }

    async fn depart(&mut self, last: Option<CrossingRef>) {
        self.channel
            .send(Request::notice(RequestKind::Departed, self.vehicle, last))
            .await
            .unwrap();
    }
}

fn slot(crossing: usize, orientation: Orientation, crossed_lane: u8) -> CrossingRef {
    CrossingRef {
        crossing,
        orientation,
        crossed_lane: LaneId(crossed_lane),
    }
}

#[tokio::test]
async fn crossing_is_exclusive_until_the_holder_moves_on() {
    let harness = Harness::start(1);
    let mut a = harness.driver(0, 1);
    let mut b = harness.driver(1, 11);
    let a_slot = slot(15, Orientation::Horizontal, 11);
    let b_slot = slot(15, Orientation::Vertical, 1);

    assert!(a.ask(Phase::Before, a_slot, None).await);
    assert!(a.ask(Phase::Crossing, a_slot, None).await);
    assert!(b.ask(Phase::Before, b_slot, None).await);
    assert_eq!(harness.crossing(15), (0, 1, true, 0, 0));

    assert!(!b.ask(Phase::Crossing, b_slot, None).await);
    // A repeated denial leaves the counters alone.
    assert!(!b.ask(Phase::Crossing, b_slot, None).await);
    assert_eq!(harness.crossing(15), (0, 1, true, 0, 0));

    assert!(a.ask(Phase::After, a_slot, None).await);
    assert_eq!(harness.crossing(15), (0, 1, false, 1, 0));
    assert!(b.ask(Phase::Crossing, b_slot, None).await);
    assert_eq!(harness.crossing(15), (0, 0, true, 1, 0));

    let (arbiter, relay) = harness.stop().await;
    assert_eq!(arbiter.decisions, 7);
    assert_eq!(arbiter.denied, 2);
    assert_eq!(relay.applied, 5);
    assert_eq!(relay.violations, 0);
}

#[tokio::test]
async fn full_before_queue_denies_a_second_vehicle() {
    let harness = Harness::start(1);
    let mut a = harness.driver(0, 1);
    let mut b = harness.driver(1, 1);
    let first = slot(15, Orientation::Horizontal, 11);

    assert!(a.ask(Phase::Before, first, None).await);
    assert!(!b.ask(Phase::Before, first, None).await);
    assert_eq!(harness.crossing(15), (1, 0, false, 0, 0));
    harness.stop().await;
}

#[tokio::test]
async fn moving_on_releases_the_previous_after_queue() {
    let harness = Harness::start(1);
    let mut a = harness.driver(0, 1);
    let first = slot(15, Orientation::Horizontal, 11);
    let second = slot(16, Orientation::Horizontal, 7);

    for phase in Phase::SEQUENCE {
        assert!(a.ask(phase, first, None).await);
    }
    assert_eq!(harness.crossing(15).3, 1);
    assert!(a.ask(Phase::Before, second, Some(first)).await);
    assert_eq!(harness.crossing(15).3, 0);
    assert_eq!(harness.crossing(16).0, 1);
    harness.stop().await;
}

#[tokio::test]
async fn departure_frees_the_last_after_queue() {
    let harness = Harness::start(1);
    let mut a = harness.driver(0, 1);
    let last = slot(3, Orientation::Vertical, 8);

    for phase in Phase::SEQUENCE {
        assert!(a.ask(phase, last, None).await);
    }
    assert_eq!(harness.crossing(3).4, 1);
    a.depart(Some(last)).await;

    timeout(Duration::from_secs(5), async {
        while harness.crossing(3).4 != 0 {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("departure was never applied");
    let (_, relay) = harness.stop().await;
    assert_eq!(relay.departures, 1);
}

#[tokio::test]
async fn authorization_that_cannot_be_applied_becomes_a_denial() {
    let harness = Harness::start(1);
    let mut a = harness.driver(0, 1);
    let current = slot(15, Orientation::Horizontal, 11);

    // Free crossing, but nobody queued before it.
    assert!(!a.ask(Phase::Crossing, current, None).await);
    assert_eq!(harness.crossing(15), (0, 0, false, 0, 0));

    let (arbiter, relay) = harness.stop().await;
    assert_eq!(arbiter.authorized, 1);
    assert_eq!(relay.authorized, 1);
    assert_eq!(relay.applied, 0);
    assert_eq!(relay.violations, 1);
}

#[tokio::test]
async fn contending_vehicles_never_share_a_crossing() {
    const VEHICLES: u32 = 6;
    let harness = Arc::new(Harness::start(1));
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let current = slot(8, Orientation::Vertical, 7);

    // Watches the shared counters for the whole run, not just at grants.
    let done = Arc::new(AtomicBool::new(false));
    let queue_peak = Arc::new(AtomicU32::new(0));
    let sampler = {
        let harness = Arc::clone(&harness);
        let done = Arc::clone(&done);
        let queue_peak = Arc::clone(&queue_peak);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let (_, before_v, _, _, after_v) = harness.crossing(8);
                queue_peak.fetch_max(before_v.max(after_v), Ordering::SeqCst);
                sleep(Duration::from_micros(200)).await;
            }
        })
    };

    let mut tasks = Vec::new();
    for id in 0..VEHICLES {
        let mut driver = harness.driver(id, 1);
        let harness = Arc::clone(&harness);
        let holders = Arc::clone(&holders);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            driver.ask_until_granted(Phase::Before, current, None).await;
            assert!(harness.crossing(8).1 <= 1);
            driver.ask_until_granted(Phase::Crossing, current, None).await;
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(2)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            driver.ask_until_granted(Phase::After, current, None).await;
            driver.depart(Some(current)).await;
        }));
    }

    timeout(Duration::from_secs(20), async {
        for task in tasks {
            task.await.unwrap();
        }
    })
    .await
    .expect("vehicles starved");
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    timeout(Duration::from_secs(5), async {
        while harness.crossing(8) != (0, 0, false, 0, 0) {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("crossing never drained");

    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();
    assert!(queue_peak.load(Ordering::SeqCst) <= 1);

    let harness = Arc::try_unwrap(harness).unwrap_or_else(|_| panic!("harness still shared"));
    let (arbiter, relay) = harness.stop().await;
    // Exactly one Before, Crossing and After grant per vehicle.
    assert_eq!(relay.applied, 3 * u64::from(VEHICLES));
    assert_eq!(relay.authorized, relay.applied);
    assert_eq!(relay.violations, 0);
    assert_eq!(relay.departures, u64::from(VEHICLES));
    assert_eq!(arbiter.authorized, 3 * u64::from(VEHICLES));
}
