//! Audience store: loads and validates the audience CSV and campaign brief
//! files from the data directory.

pub mod briefs;
pub mod store;

pub use briefs::{load_briefs, CampaignBrief};
pub use store::load_audience;
