use crate::simulation_engine::intersections::IntersectionId;
use crate::simulation_engine::lanes::{CrossingRef, LaneId};
use crate::simulation_engine::vehicles::{Vehicle, VehicleId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity a message is delivered to. Responses carry one so a channel
/// shared by several requesters can hand each reply to the right inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Vehicle(VehicleId),
    Relay(IntersectionId),
    Arbiter,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Vehicle(id) => write!(f, "vehicle {}", id.0),
            Address::Relay(id) => write!(f, "relay {id}"),
            Address::Arbiter => write!(f, "arbiter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Vehicle entered the intersection. Display only.
    Arrived,
    /// Vehicle asks to move into a phase. Needs an arbiter decision.
    AskPass,
    /// Vehicle moved into the phase it was granted. Display only.
    Info,
    /// Vehicle left the intersection and frees its last after-queue slot.
    Departed,
}

/// Where a vehicle stands relative to a crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Before,
    Crossing,
    After,
}

impl Phase {
    /// The order a vehicle goes through at every crossing.
    pub const SEQUENCE: [Phase; 3] = [Phase::Before, Phase::Crossing, Phase::After];

    /// Short form used in request/decision progress lines.
    pub fn short_label(self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::Crossing => "cross",
            Phase::After => "after",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Phase::Before => "Before",
            Phase::Crossing => "Crossing",
            Phase::After => "After",
        };
        f.write_str(label)
    }
}

/// Fixed-size record sent from a vehicle to the relay of its intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub kind: RequestKind,
    pub sender: Address,
    /// Snapshot of the sending vehicle.
    pub vehicle: Vehicle,
    pub intersection: IntersectionId,
    pub crossing: Option<CrossingRef>,
    pub previous: Option<CrossingRef>,
    /// Own lane for arrival/departure, crossed lane for crossing requests.
    pub lane: LaneId,
    pub phase: Option<Phase>,
}

impl Request {
    /// Arrival or departure notice for the vehicle's own lane.
    pub fn notice(kind: RequestKind, vehicle: Vehicle, previous: Option<CrossingRef>) -> Self {
        Self {
            kind,
            sender: Address::Vehicle(vehicle.id),
            vehicle,
            intersection: vehicle.intersection,
            crossing: None,
            previous,
            lane: vehicle.lane,
            phase: None,
        }
    }

    /// Request or notice concerning one phase at one crossing.
    pub fn at_crossing(
        kind: RequestKind,
        vehicle: Vehicle,
        current: CrossingRef,
        previous: Option<CrossingRef>,
        phase: Phase,
    ) -> Self {
        Self {
            kind,
            sender: Address::Vehicle(vehicle.id),
            vehicle,
            intersection: vehicle.intersection,
            crossing: Some(current),
            previous,
            lane: current.crossed_lane,
            phase: Some(phase),
        }
    }

    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A vehicle request forwarded on the shared arbiter channel, stamped with
/// the relay that must receive the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forwarded {
    pub route: Address,
    pub request: Request,
}

/// Admission decision travelling back towards the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub destination: Address,
    pub vehicle: VehicleId,
    pub authorized: bool,
}

impl Response {
    /// Same decision, readdressed for the next hop.
    pub fn redirect(self, destination: Address) -> Self {
        Self { destination, ..self }
    }
}
