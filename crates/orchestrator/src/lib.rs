//! Campaign orchestration: the registry of known campaigns and the runner
//! that drives each one through the stage pipeline.

pub mod orchestrator;
pub mod registry;

pub use orchestrator::Orchestrator;
pub use registry::{CampaignEntry, CampaignRegistry};
