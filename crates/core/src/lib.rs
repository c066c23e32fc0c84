pub mod config;
pub mod csvline;
pub mod email;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{MailflowError, MailflowResult};
