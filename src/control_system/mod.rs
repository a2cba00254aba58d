pub mod arbiter;
pub mod relay;
