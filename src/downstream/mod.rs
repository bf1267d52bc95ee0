pub mod client;
pub mod types;

pub use client::{DownstreamClient, DownstreamError};
pub use types::{MonthlyUsage, Observation, UsageSource, BLOCKING_OBSERVATION_STATES};
