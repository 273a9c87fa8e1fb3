pub mod billing;
pub mod config;
pub mod link;

pub use billing::BillingError;
pub use config::ConfigError;
pub use link::LinkError;
