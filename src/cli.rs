use crate::error::{SimError, SimResult};
use crate::simulation_engine::intersections::IntersectionId;
use crate::simulation_engine::lanes::LaneId;
use crate::simulation_engine::vehicles::VehicleSpec;
use std::path::PathBuf;

pub const USAGE: &str = "\
usage: simulation_main [--config FILE] COUNT
       simulation_main [--config FILE] LANE[@INTERSECTION]...

  COUNT         number of vehicles, each on a random lane and intersection
  LANE          starting lane (1-12) of one vehicle, random intersection
  INTERSECTION  starting intersection (1-4) of that vehicle";

/// What the binary was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub config_path: Option<PathBuf>,
    pub vehicles: Vec<VehicleSpec>,
}

pub fn parse_args<S: AsRef<str>>(args: &[S]) -> SimResult<LaunchPlan> {
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut iter = args.iter().map(AsRef::as_ref);
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter
                .next()
                .ok_or_else(|| SimError::Usage("--config needs a file".into()))?;
            config_path = Some(PathBuf::from(path));
        } else {
            positional.push(arg);
        }
    }

    let vehicles = match positional.as_slice() {
        [] => return Err(SimError::Usage("no vehicles given".into())),
        [count] if !count.contains('@') => match count.parse::<usize>() {
            Ok(n) => vec![VehicleSpec::random(); n],
            Err(_) => vec![parse_vehicle(count)?],
        },
        many => many
            .iter()
            .map(|arg| parse_vehicle(arg))
            .collect::<SimResult<Vec<_>>>()?,
    };
    Ok(LaunchPlan {
        config_path,
        vehicles,
    })
}

fn parse_vehicle(arg: &str) -> SimResult<VehicleSpec> {
    let (lane, intersection) = match arg.split_once('@') {
        Some((lane, intersection)) => (lane, Some(intersection)),
        None => (arg, None),
    };
    let lane = lane
        .parse::<u8>()
        .ok()
        .and_then(LaneId::new)
        .ok_or_else(|| SimError::Usage(format!("bad lane in '{arg}'")))?;
    let intersection = intersection
        .map(|text| {
            text.parse::<u8>()
                .ok()
                .and_then(IntersectionId::new)
                .ok_or_else(|| SimError::Usage(format!("bad intersection in '{arg}'")))
        })
        .transpose()?;
    Ok(VehicleSpec {
        lane: Some(lane),
        intersection,
    })
}
