pub mod config;
pub mod cycle;
pub mod deploy;
pub mod develop;
pub mod init;
pub mod verify;

use anyhow::Context;
use shipwright_core::cycle::CycleId;

pub(crate) fn parse_cycle_id(raw: &str) -> anyhow::Result<CycleId> {
    raw.trim()
        .parse()
        .with_context(|| format!("'{raw}' is not a cycle id"))
}
