use crate::communication::messages::Phase;
use crate::error::{SimError, SimResult};
use crate::global_variables::{
    CROSSINGS_PER_INTERSECTION, GRID_SIDE, INERT_CROSSINGS, INTERSECTION_COUNT,
};
use crate::simulation_engine::lanes::{CrossingRef, Orientation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Unique identifier for an intersection (1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntersectionId(pub u8);

impl IntersectionId {
    pub fn new(number: u8) -> Option<Self> {
        (1..=INTERSECTION_COUNT)
            .contains(&number)
            .then_some(IntersectionId(number))
    }

    pub fn all() -> impl Iterator<Item = IntersectionId> {
        (1..=INTERSECTION_COUNT).map(IntersectionId)
    }

    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Occupancy and queue counters of one conflict point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crossing {
    /// Placeholder slot that no lane passes over.
    pub inert: bool,
    /// A vehicle is currently inside the crossing.
    pub occupied: bool,
    pub before_h: u32,
    pub after_h: u32,
    pub before_v: u32,
    pub after_v: u32,
}

impl Crossing {
    fn inert() -> Self {
        Self {
            inert: true,
            ..Self::default()
        }
    }

    /// Vehicles queued before the crossing in the given orientation.
    pub fn before(&self, orientation: Orientation) -> u32 {
        match orientation {
            Orientation::Horizontal => self.before_h,
            Orientation::Vertical => self.before_v,
        }
    }

    /// Vehicles queued after the crossing in the given orientation.
    pub fn after(&self, orientation: Orientation) -> u32 {
        match orientation {
            Orientation::Horizontal => self.after_h,
            Orientation::Vertical => self.after_v,
        }
    }

    fn before_mut(&mut self, orientation: Orientation) -> &mut u32 {
        match orientation {
            Orientation::Horizontal => &mut self.before_h,
            Orientation::Vertical => &mut self.before_v,
        }
    }

    fn after_mut(&mut self, orientation: Orientation) -> &mut u32 {
        match orientation {
            Orientation::Horizontal => &mut self.after_h,
            Orientation::Vertical => &mut self.after_v,
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.occupied
            && self.before_h == 0
            && self.after_h == 0
            && self.before_v == 0
            && self.after_v == 0
    }
}

/// The crossing grid of one intersection.
///
/// Only the relay serving the intersection mutates it; the arbiter reads it.
/// Every transition validates first and writes second, so a rejected
/// transition leaves the state untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntersectionState {
    pub id: IntersectionId,
    crossings: [Crossing; CROSSINGS_PER_INTERSECTION],
}

impl IntersectionState {
    /// Fresh state: inert slots flagged, every active slot zeroed.
    pub fn baseline(id: IntersectionId) -> Self {
        let mut crossings = [Crossing::default(); CROSSINGS_PER_INTERSECTION];
        for slot in INERT_CROSSINGS {
            crossings[slot] = Crossing::inert();
        }
        Self { id, crossings }
    }

    pub fn crossings(&self) -> &[Crossing] {
        &self.crossings
    }

    /// Lookup that skips out-of-range and inert slots.
    pub fn active_crossing(&self, slot: usize) -> Option<&Crossing> {
        self.crossings.get(slot).filter(|c| !c.inert)
    }

    pub fn is_idle(&self) -> bool {
        self.crossings.iter().all(Crossing::is_idle)
    }

    fn active_slot(&self, slot: usize) -> SimResult<usize> {
        match self.active_crossing(slot) {
            Some(_) => Ok(slot),
            None => Err(self.violation(format!("crossing {slot} is not an active slot"))),
        }
    }

    fn violation(&self, detail: String) -> SimError {
        SimError::violation(format!("intersection {}", self.id), detail)
    }

    /// Applies the state change that follows an authorized request for `phase`.
    pub fn apply_transition(
        &mut self,
        phase: Phase,
        current: CrossingRef,
        previous: Option<CrossingRef>,
        max_queue: u32,
    ) -> SimResult<()> {
        let slot = self.active_slot(current.crossing)?;
        let orientation = current.orientation;

        match phase {
            Phase::Before => {
                if let Some(previous) = previous {
                    let prev_slot = self.active_slot(previous.crossing)?;
                    if self.crossings[prev_slot].after(previous.orientation) == 0 {
                        return Err(self.violation(format!(
                            "after-queue of crossing {prev_slot} is already empty"
                        )));
                    }
                }
                if self.crossings[slot].before(orientation) >= max_queue {
                    return Err(self.violation(format!(
                        "before-queue of crossing {slot} is full"
                    )));
                }
                if let Some(previous) = previous {
                    *self.crossings[previous.crossing].after_mut(previous.orientation) -= 1;
                }
                *self.crossings[slot].before_mut(orientation) += 1;
            }
            Phase::Crossing => {
                let crossing = &self.crossings[slot];
                if crossing.occupied {
                    return Err(self.violation(format!("crossing {slot} is already occupied")));
                }
                if crossing.before(orientation) == 0 {
                    return Err(self.violation(format!(
                        "nobody is queued before crossing {slot}"
                    )));
                }
                let crossing = &mut self.crossings[slot];
                *crossing.before_mut(orientation) -= 1;
                crossing.occupied = true;
            }
            Phase::After => {
                let crossing = &self.crossings[slot];
                if !crossing.occupied {
                    return Err(self.violation(format!("crossing {slot} is not occupied")));
                }
                if crossing.after(orientation) >= max_queue {
                    return Err(self.violation(format!(
                        "after-queue of crossing {slot} is full"
                    )));
                }
                let crossing = &mut self.crossings[slot];
                crossing.occupied = false;
                *crossing.after_mut(orientation) += 1;
            }
        }
        Ok(())
    }

    /// A vehicle left the intersection from the after-queue of `previous`.
    pub fn release_after(&mut self, previous: CrossingRef) -> SimResult<()> {
        let slot = self.active_slot(previous.crossing)?;
        let counter = self.crossings[slot].after_mut(previous.orientation);
        if *counter == 0 {
            return Err(self.violation(format!(
                "after-queue of crossing {slot} is already empty"
            )));
        }
        *counter -= 1;
        Ok(())
    }

    /// Draws the occupancy grid: `1` occupied, `0` free, blank for inert slots.
    pub fn render(&self) -> String {
        let mut out = format!("Intersection {}\n", self.id);
        for row in self.crossings.chunks(GRID_SIDE) {
            let cells: Vec<&str> = row
                .iter()
                .map(|c| match (c.inert, c.occupied) {
                    (true, _) => " ",
                    (false, true) => "1",
                    (false, false) => "0",
                })
                .collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        out
    }
}

pub fn create_intersections() -> Vec<IntersectionState> {
    IntersectionId::all().map(IntersectionState::baseline).collect()
}

/// Everything vehicles, relays and the arbiter share: the four crossing
/// grids and the count of vehicles that left the map.
#[derive(Debug, Clone)]
pub struct TrafficState {
    intersections: Vec<IntersectionState>,
    exited: u32,
}

impl TrafficState {
    pub fn new() -> Self {
        Self {
            intersections: create_intersections(),
            exited: 0,
        }
    }

    pub fn intersection(&self, id: IntersectionId) -> Option<&IntersectionState> {
        self.intersections.get(id.index())
    }

    pub fn intersection_mut(&mut self, id: IntersectionId) -> Option<&mut IntersectionState> {
        self.intersections.get_mut(id.index())
    }

    pub fn intersections(&self) -> &[IntersectionState] {
        &self.intersections
    }

    /// Counts one more vehicle off the map and returns the new total.
    pub fn record_exit(&mut self) -> u32 {
        self.exited += 1;
        self.exited
    }

    pub fn exited(&self) -> u32 {
        self.exited
    }
}

impl Default for TrafficState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on the single lock guarding every piece of shared state.
#[derive(Debug, Clone, Default)]
pub struct SharedTraffic(Arc<Mutex<TrafficState>>);

impl SharedTraffic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> SimResult<MutexGuard<'_, TrafficState>> {
        self.0
            .lock()
            .map_err(|_| SimError::exhausted("shared traffic state", "lock poisoned"))
    }

    /// Number of live handles, used to confirm teardown released everything.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}
