use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use super::{CHANNEL_CONFIG_PATH, Partition, PartitionSlot, SlotDescriptor, SlotLabel};
use crate::archive::Unpacker;
use crate::error::SnapError;
use crate::runtime::Runtime;

const ACTIVE_FILE: &str = "active";
const NEXT_BOOT_FILE: &str = "next-boot";
const STAGE_LOCK: &str = ".stage.lock";

/// Both slots as directories under one root:
///
/// ```text
/// <root>/a/            slot A
/// <root>/b/            slot B
/// <root>/active        label of the running slot
/// <root>/next-boot     label the bootloader picks next
/// ```
///
/// A missing `active` file means the host runs from slot A.
pub struct DirPartition<'a, R: Runtime, U: Unpacker> {
    runtime: &'a R,
    root: PathBuf,
    unpacker: U,
}

impl<'a, R: Runtime, U: Unpacker> DirPartition<'a, R, U> {
    pub fn new(runtime: &'a R, root: PathBuf, unpacker: U) -> Self {
        Self {
            runtime,
            root,
            unpacker,
        }
    }

    pub fn slot_dir(&self, label: SlotLabel) -> PathBuf {
        self.root.join(label.as_str())
    }

    fn active_label(&self) -> Result<SlotLabel> {
        let path = self.root.join(ACTIVE_FILE);
        if !self.runtime.exists(&path) {
            return Ok(SlotLabel::A);
        }
        self.runtime
            .read_to_string(&path)?
            .parse()
            .with_context(|| format!("Invalid active slot in {:?}", path))
    }

    /// Label the bootloader will pick next; the active slot unless
    /// [`Partition::mark_bootable`] chose the other one.
    pub fn next_boot(&self) -> Result<SlotLabel> {
        let path = self.root.join(NEXT_BOOT_FILE);
        if !self.runtime.exists(&path) {
            return self.active_label();
        }
        self.runtime
            .read_to_string(&path)?
            .parse()
            .with_context(|| format!("Invalid next-boot slot in {:?}", path))
    }

    fn slot(&self, label: SlotLabel) -> Result<PartitionSlot> {
        let config = self.slot_dir(label).join(CHANNEL_CONFIG_PATH);
        let descriptor = if self.runtime.exists(&config) {
            SlotDescriptor::parse(&self.runtime.read_to_string(&config)?)
                .with_context(|| format!("Invalid channel config {:?}", config))?
        } else {
            debug!("Slot {} has no channel config", label);
            SlotDescriptor::default()
        };
        Ok(PartitionSlot { label, descriptor })
    }

    /// Replaces `target` with `staging`. The previous content is renamed
    /// aside first and only deleted once the new one is in place.
    fn swap_in(&self, staging: &Path, target: &Path) -> Result<()> {
        let Some(name) = target.file_name().and_then(|n| n.to_str()) else {
            anyhow::bail!("Invalid slot directory {:?}", target);
        };
        let old = self.root.join(format!(".{}.old", name));
        if self.runtime.exists(&old) {
            self.runtime.remove_dir_all(&old)?;
        }

        let had_target = self.runtime.exists(target);
        if had_target {
            self.runtime.rename(target, &old)?;
        }
        if let Err(e) = self.runtime.rename(staging, target) {
            if had_target {
                if let Err(restore) = self.runtime.rename(&old, target) {
                    warn!("Failed to restore {:?}: {}", target, restore);
                }
            }
            return Err(e).with_context(|| format!("Failed to move image into {:?}", target));
        }

        if had_target {
            if let Err(e) = self.runtime.remove_dir_all(&old) {
                warn!("Failed to remove previous image {:?}: {}", old, e);
            }
        }
        Ok(())
    }

    /// Writes `content` to `path` via a temporary sibling and a rename.
    fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        let tmp = path.with_extension("tmp");
        self.runtime.write(&tmp, content.as_bytes())?;
        self.runtime
            .rename(&tmp, path)
            .with_context(|| format!("Failed to update {:?}", path))
    }
}

impl<R: Runtime, U: Unpacker> Partition for DirPartition<'_, R, U> {
    fn active_slot(&self) -> Result<PartitionSlot> {
        self.slot(self.active_label()?)
    }

    fn inactive_slot(&self) -> Result<PartitionSlot> {
        self.slot(self.active_label()?.other())
    }

    #[tracing::instrument(skip(self))]
    fn stage_image(
        &self,
        slot: &PartitionSlot,
        content: &Path,
        descriptor: &SlotDescriptor,
    ) -> Result<()> {
        let active = self.active_label()?;
        if slot.label == active {
            return Err(SnapError::InvalidTarget(format!(
                "slot {} is the active slot",
                slot.label
            ))
            .into());
        }

        let _lock = self.runtime.lock_exclusive(&self.root.join(STAGE_LOCK))?;

        // The slot may already be marked bootable from an earlier stage
        if self.next_boot().map_or(true, |label| label != active) {
            debug!("Resetting next boot to active slot {}", active);
            self.write_atomic(&self.root.join(NEXT_BOOT_FILE), &format!("{}\n", active))?;
        }

        let target = self.slot_dir(slot.label);
        let staging = self.root.join(format!(".{}.staging", slot.label));
        if self.runtime.exists(&staging) {
            self.runtime.remove_dir_all(&staging)?;
        }
        self.runtime.create_dir_all(&staging)?;

        let unpacked = self
            .unpacker
            .unpack(self.runtime, content, &staging)
            .and_then(|_| {
                let config = staging.join(CHANNEL_CONFIG_PATH);
                if let Some(parent) = config.parent() {
                    self.runtime.create_dir_all(parent)?;
                }
                self.runtime.write(&config, descriptor.to_ini().as_bytes())
            });
        if let Err(e) = unpacked {
            let _ = self.runtime.remove_dir_all(&staging);
            return Err(e).with_context(|| format!("Failed to stage image into slot {}", slot.label));
        }

        self.swap_in(&staging, &target)?;
        info!(
            "Staged build {} ({}) into slot {}",
            descriptor.build_number, descriptor.channel, slot.label
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn mark_bootable(&self, slot: &PartitionSlot) -> Result<()> {
        self.write_atomic(&self.root.join(NEXT_BOOT_FILE), &format!("{}\n", slot.label))?;
        info!("Slot {} will be used at next boot", slot.label);
        Ok(())
    }
}
