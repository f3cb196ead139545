//! CLI command implementations

mod camera;
mod config;
mod snapshot;
mod view;

pub use config::{config, ConfigArgs};
pub use snapshot::{snapshot, SnapshotArgs};
pub use view::{view, ViewArgs};
