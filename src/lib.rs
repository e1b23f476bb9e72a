pub mod config;
pub mod update;

#[cfg(test)]
mod test_support;

pub use config::{Config, InstallCheck, InstallationMode};
pub use update::{Outcome, UpdateEvent, UpdatePipeline};
