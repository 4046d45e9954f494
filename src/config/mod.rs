//! Configuration for the updater.
//!
//! A single optional TOML file configures which application directory is
//! managed (`[app]`) and how updates behave (`[upgrade]`). See
//! [`GlobalConfig`] for the location rules and format.

mod global;

pub use global::{AppConfig, CONFIG_PATH_ENV, GlobalConfig};
pub use crate::upgrade::config::UpgradeConfig;
