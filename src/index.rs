//! Per-model primary-key index file.
//!
//! File <base>-<lowercase model name>:
//!   byte 0: global free-flag (1 = at least one slot is free);
//!   then 25-byte slots, slot k at offset k*25 + 1 (see types.rs for the
//!   slot layout).
//!
//! A slot's position is a pure function of its key, so get/set are O(1)
//! seeks. Key allocation is O(1) amortized: the flag byte short-circuits
//! the linear free-slot scan whenever the key space is dense. The flag is
//! never cleared eagerly, only by the next exhaustive scan that comes up
//! empty.

use anyhow::{bail, Context, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::{Config, RetryPolicy};
use crate::consts::{SLOT_BASE, SLOT_OFF_IS_FREE, SLOT_SIZE};
use crate::lock::{open_exclusive, open_shared};
use crate::types::RecordIndex;
use crate::util::{ensure_file, path_with_suffix};

pub struct IndexStore {
    pub path: PathBuf,
    retry: RetryPolicy,
}

impl IndexStore {
    /// Open the index file for one model, creating it if absent.
    pub fn open(base: &Path, model_name: &str, cfg: &Config) -> Result<Self> {
        let path = path_with_suffix(base, &format!("-{}", model_name.to_lowercase()));
        ensure_file(&path)?;
        Ok(Self {
            path,
            retry: cfg.retry(),
        })
    }

    /// The key a new record should take: the first freed slot if the flag
    /// byte says one exists, otherwise the dense next key. A stale flag
    /// (set, but no free slot found) is cleared here.
    pub fn first_available_key(&self) -> Result<i64> {
        let mut guard = open_exclusive(&self.path, &self.retry)
            .with_context(|| format!("open index {}", self.path.display()))?;

        let len = guard.len()?;
        if len == 0 {
            return Ok(0);
        }

        guard.file.seek(SeekFrom::Start(0))?;
        let has_free = guard.file.read_u8()? != 0;
        if !has_free {
            return Ok(len / SLOT_SIZE as i64);
        }

        let mut key: i64 = 0;
        loop {
            let off = key * SLOT_SIZE as i64 + SLOT_BASE as i64 + SLOT_OFF_IS_FREE as i64;
            if off >= len {
                break;
            }
            guard.file.seek(SeekFrom::Start(off as u64))?;
            if guard.file.read_u8()? == 1 {
                return Ok(key);
            }
            key += 1;
        }

        // The flag lied: every slot is taken. Clear it and go dense.
        debug!("stale free-flag in {}, clearing", self.path.display());
        guard.file.seek(SeekFrom::Start(0))?;
        guard.file.write_u8(0)?;
        guard.file.sync_all()?;
        Ok(len / SLOT_SIZE as i64)
    }

    /// O(1) slot lookup. Keys beyond the file end are absent, not errors.
    pub fn get(&self, key: i64) -> Result<Option<RecordIndex>> {
        if key < 0 {
            return Ok(None);
        }
        let mut guard = open_shared(&self.path, &self.retry)
            .with_context(|| format!("open index {}", self.path.display()))?;

        let len = guard.len()?;
        let pos = key * SLOT_SIZE as i64 + SLOT_BASE as i64;
        if pos + SLOT_SIZE as i64 > len {
            return Ok(None);
        }

        guard.file.seek(SeekFrom::Start(pos as u64))?;
        let ix = RecordIndex::read_from(&mut guard.file, key)?;
        Ok(Some(ix))
    }

    /// O(1) slot overwrite. Appending the next dense slot is allowed; any
    /// key past that is caller misuse. Writing a freed slot raises the
    /// global free-flag.
    pub fn set(&self, ix: &RecordIndex) -> Result<()> {
        if ix.primary_key < 0 {
            bail!("primary key {} is not valid", ix.primary_key);
        }
        let mut guard = open_exclusive(&self.path, &self.retry)
            .with_context(|| format!("open index {}", self.path.display()))?;

        let mut len = guard.len()?;
        if len == 0 {
            guard.file.seek(SeekFrom::Start(0))?;
            guard.file.write_u8(0)?;
            len = 1;
        }

        let pos = ix.primary_key * SLOT_SIZE as i64 + SLOT_BASE as i64;
        if pos > len {
            bail!(
                "primary key {} is not valid for {}",
                ix.primary_key,
                self.path.display()
            );
        }

        guard.file.seek(SeekFrom::Start(pos as u64))?;
        ix.write_to(&mut guard.file)?;

        if ix.is_free {
            guard.file.seek(SeekFrom::Start(0))?;
            guard.file.write_u8(1)?;
        }
        guard.file.sync_all()?;
        Ok(())
    }

    /// Sequential decode of slots [skip, skip+count), clipped to the file.
    /// Freed slots are returned too; callers filter them.
    pub fn range(&self, skip: i64, count: i64) -> Result<Vec<RecordIndex>> {
        let mut guard = open_shared(&self.path, &self.retry)
            .with_context(|| format!("open index {}", self.path.display()))?;

        let len = guard.len()?;
        if len <= SLOT_BASE as i64 {
            return Ok(Vec::new());
        }

        let start = skip * SLOT_SIZE as i64 + SLOT_BASE as i64;
        guard.file.seek(SeekFrom::Start(start.max(0) as u64))?;

        let mut out = Vec::new();
        for i in 0..count {
            let pos = start + i * SLOT_SIZE as i64;
            if pos + SLOT_SIZE as i64 > len {
                break;
            }
            out.push(RecordIndex::read_from(&mut guard.file, skip + i)?);
        }
        Ok(out)
    }

    /// Upper bound on keys ever issued, freed slots included.
    pub fn last_key(&self) -> Result<i64> {
        let len = std::fs::metadata(&self.path)
            .with_context(|| format!("stat index {}", self.path.display()))?
            .len() as i64;
        Ok(len / SLOT_SIZE as i64)
    }
}
