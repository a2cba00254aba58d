use crate::global_variables::{INTERSECTION_COUNT, LANE_COUNT};
use crate::simulation_engine::intersections::IntersectionId;
use crate::simulation_engine::lanes::{create_lanes, Lane, LaneId};
use rand::Rng;
use std::fmt::Write;

const LANES: usize = LANE_COUNT as usize;
const INTERSECTIONS: usize = INTERSECTION_COUNT as usize;

/// Lane on the next intersection that a vehicle leaving by lane `i + 1`
/// arrives on.
const ARRIVAL_LANES: [u8; LANES] = [4, 2, 12, 7, 5, 3, 10, 8, 6, 1, 11, 9];

/// Intersection reached when leaving intersection `row + 1` by lane
/// `col + 1`; `0` means the lane leaves the map.
const NEXT_INTERSECTION: [[u8; LANES]; INTERSECTIONS] = [
    [0, 2, 3, 0, 0, 2, 3, 0, 0, 2, 3, 0],
    [0, 0, 4, 1, 0, 0, 4, 1, 0, 0, 4, 1],
    [1, 4, 0, 0, 1, 4, 0, 0, 1, 4, 0, 0],
    [2, 0, 0, 3, 2, 0, 0, 3, 2, 0, 0, 3],
];

/// The static road network: lane layout inside every intersection and how
/// intersections connect. Built once and shared read-only by every task.
#[derive(Debug, Clone)]
pub struct RoadLayout {
    lanes: Vec<Lane>,
    arrival_lanes: [u8; LANES],
    next_intersection: [[u8; LANES]; INTERSECTIONS],
}

impl RoadLayout {
    /// The 2x2 grid of identical intersections.
    pub fn standard() -> Self {
        Self {
            lanes: create_lanes(),
            arrival_lanes: ARRIVAL_LANES,
            next_intersection: NEXT_INTERSECTION,
        }
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id.index()).filter(|lane| lane.id == id)
    }

    /// Where a vehicle leaving `from` by `exit_lane` ends up, as the next
    /// intersection and the lane it arrives on. `None` once it leaves the map.
    pub fn successor(
        &self,
        from: IntersectionId,
        exit_lane: LaneId,
    ) -> Option<(IntersectionId, LaneId)> {
        let next = *self
            .next_intersection
            .get(from.index())?
            .get(exit_lane.index())?;
        let arrival = *self.arrival_lanes.get(exit_lane.index())?;
        Some((IntersectionId::new(next)?, LaneId::new(arrival)?))
    }

    /// Picks one of the three lanes entering from the side `arrival` comes
    /// in on, so drivers may change lane when they reach a new intersection.
    pub fn random_approach_lane<R: Rng + ?Sized>(&self, arrival: LaneId, rng: &mut R) -> LaneId {
        let candidates = arrival.approach();
        candidates[rng.random_range(0..candidates.len())]
    }

    /// Human-readable routing table, one line per intersection and lane.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for intersection in IntersectionId::all() {
            let _ = writeln!(out, "Intersection {intersection}:");
            for lane in LaneId::all() {
                match self.successor(intersection, lane) {
                    Some((next, arrival)) => {
                        let _ = writeln!(
                            out,
                            "  lane {lane} leads to intersection {next} lane {arrival}"
                        );
                    }
                    None => {
                        let _ = writeln!(out, "  lane {lane} leaves the map");
                    }
                }
            }
        }
        out
    }
}

impl Default for RoadLayout {
    fn default() -> Self {
        Self::standard()
    }
}
