//! Dual-slot system image. Writes only ever target the slot that is not
//! running; switching slots takes effect at the next boot.

mod channel;
mod dir;

use anyhow::{Result, bail};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use channel::{CHANNEL_CONFIG_PATH, SlotDescriptor};
pub use dir::DirPartition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotLabel {
    A,
    B,
}

impl SlotLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotLabel::A => "a",
            SlotLabel::B => "b",
        }
    }

    pub fn other(&self) -> SlotLabel {
        match self {
            SlotLabel::A => SlotLabel::B,
            SlotLabel::B => SlotLabel::A,
        }
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "a" | "A" => Ok(SlotLabel::A),
            "b" | "B" => Ok(SlotLabel::B),
            other => bail!("Unknown slot label {:?}. Expected 'a' or 'b'.", other),
        }
    }
}

/// One boot target and the image it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlot {
    pub label: SlotLabel,
    pub descriptor: SlotDescriptor,
}

#[cfg_attr(test, mockall::automock)]
pub trait Partition: Send + Sync {
    /// The slot the host is running from.
    fn active_slot(&self) -> Result<PartitionSlot>;

    /// The slot updates are written to.
    fn inactive_slot(&self) -> Result<PartitionSlot>;

    /// Replaces the image in `slot` with `content` and records `descriptor`
    /// for it. Fails with `InvalidTarget` when `slot` is the active slot.
    fn stage_image(
        &self,
        slot: &PartitionSlot,
        content: &Path,
        descriptor: &SlotDescriptor,
    ) -> Result<()>;

    /// Boots from `slot` next time. Never reboots.
    fn mark_bootable(&self, slot: &PartitionSlot) -> Result<()>;
}
