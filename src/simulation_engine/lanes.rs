use crate::global_variables::{LANES_PER_APPROACH, LANE_COUNT, MAX_CROSSINGS_PER_LANE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a lane within an intersection (1..=12).
///
/// Lanes are grouped by approach side: 1-3, 4-6, 7-9 and 10-12 enter the
/// intersection from the same side of the road.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaneId(pub u8);

impl LaneId {
    pub fn new(number: u8) -> Option<Self> {
        (1..=LANE_COUNT).contains(&number).then_some(LaneId(number))
    }

    pub fn all() -> impl Iterator<Item = LaneId> {
        (1..=LANE_COUNT).map(LaneId)
    }

    /// Zero-based position in per-lane tables.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// The three lanes entering from the same side as this one.
    pub fn approach(self) -> [LaneId; 3] {
        let first = (self.0 - 1) / LANES_PER_APPROACH * LANES_PER_APPROACH + 1;
        [LaneId(first), LaneId(first + 1), LaneId(first + 2)]
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction in which a lane passes over a crossing. Each orientation has
/// its own before/after queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[cfg(test)]
impl Orientation {
    pub fn opposite(self) -> Self {
        match self {
            Orientation::Horizontal => Orientation::Vertical,
            Orientation::Vertical => Orientation::Horizontal,
        }
    }
}

/// One conflict point on a lane's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingRef {
    /// Slot index in the intersection's crossing grid.
    pub crossing: usize,
    pub orientation: Orientation,
    /// The lane this one conflicts with at the slot.
    pub crossed_lane: LaneId,
}

/// Represents a path through an intersection as an ordered list of crossings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lane {
    pub id: LaneId,
    pub crossings: Vec<CrossingRef>,
}

impl Lane {
    /// Builds a lane from `(slot, orientation, crossed lane)` triples.
    pub fn new(id: u8, crossings: &[(usize, Orientation, u8)]) -> Self {
        debug_assert!(crossings.len() <= MAX_CROSSINGS_PER_LANE);
        Self {
            id: LaneId(id),
            crossings: crossings
                .iter()
                .map(|&(crossing, orientation, crossed)| CrossingRef {
                    crossing,
                    orientation,
                    crossed_lane: LaneId(crossed),
                })
                .collect(),
        }
    }

    /// Right-turn lanes meet no other lane.
    pub fn passes_straight_through(&self) -> bool {
        self.crossings.is_empty()
    }

    /// The crossing visited before `cursor`, if any.
    pub fn previous(&self, cursor: usize) -> Option<CrossingRef> {
        cursor.checked_sub(1).and_then(|i| self.crossings.get(i).copied())
    }

    /// The crossing whose after-queue the vehicle sits in when it leaves.
    pub fn last(&self) -> Option<CrossingRef> {
        self.crossings.last().copied()
    }
}

pub fn create_lanes() -> Vec<Lane> {
    use Orientation::{Horizontal as H, Vertical as V};

    vec![
        Lane::new(1, &[(15, H, 11), (16, H, 7), (17, V, 10), (13, V, 4), (8, V, 7), (3, V, 8)]),
        Lane::new(2, &[(20, H, 11), (21, H, 7), (23, H, 4), (24, H, 5)]),
        Lane::new(3, &[]),
        Lane::new(4, &[(23, V, 2), (18, V, 10), (13, H, 1), (7, H, 7), (6, H, 10), (5, H, 11)]),
        Lane::new(5, &[(24, V, 2), (19, V, 10), (9, V, 7), (4, V, 8)]),
        Lane::new(6, &[]),
        Lane::new(7, &[(9, H, 5), (8, H, 1), (7, V, 4), (11, V, 10), (16, V, 1), (21, V, 2)]),
        Lane::new(8, &[(4, H, 5), (3, H, 1), (1, H, 10), (0, H, 11)]),
        Lane::new(9, &[]),
        Lane::new(10, &[(1, V, 8), (6, V, 4), (11, H, 7), (17, H, 1), (18, H, 4), (19, H, 5)]),
        Lane::new(11, &[(0, V, 8), (5, V, 4), (15, V, 1), (20, V, 2)]),
        Lane::new(12, &[]),
    ]
}
