// Fixed dimensions of the simulated road network.

/// Number of intersections in the grid, identified 1..=4.
pub const INTERSECTION_COUNT: u8 = 4;

/// Crossing slots per intersection, laid out as a 5x5 grid.
pub const CROSSINGS_PER_INTERSECTION: usize = 25;
pub const GRID_SIDE: usize = 5;

/// Lanes per intersection, identified 1..=12, three per approach side.
pub const LANE_COUNT: u8 = 12;
pub const LANES_PER_APPROACH: u8 = 3;
pub const MAX_CROSSINGS_PER_LANE: usize = 6;

/// Slots no pair of lanes conflicts on. Kept so indices stay uniform.
pub const INERT_CROSSINGS: [usize; 5] = [2, 10, 12, 14, 22];

// Defaults for the tunable settings in `config::SimulationConfig`.
pub const DEFAULT_MAX_QUEUE: u32 = 1;
pub const DEFAULT_MIN_PAUSE_MS: u64 = 50;
pub const DEFAULT_MAX_PAUSE_MS: u64 = 150;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 50;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_LOG_PATH: &str = "output.txt";
pub const DEFAULT_COLUMN_WIDTH: usize = 20;
