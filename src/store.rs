//! Storage engine for the data file.
//!
//! The data file is a raw heap: record fragments at allocator-chosen
//! offsets, no header, no padding. Where bytes go is decided by the free
//! list (`free.rs`); this module does the file I/O and keeps the two files
//! consistent within each operation.
//!
//! Reads take a shared lock, mutations an exclusive one; a contended open
//! waits on the retry loop. There is no cross-file transaction: a crash
//! between the data write and the index write leaves an unreferenced byte
//! range behind (a leak, not a corruption).

use anyhow::{Context, Result};
use log::debug;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::{Config, RetryPolicy};
use crate::consts::SPC_SUFFIX;
use crate::free::{self, FreeList};
use crate::lock::{open_exclusive, open_shared, FileGuard};
use crate::types::{Point, RecordIndex};
use crate::util::{ensure_file, path_with_suffix, read_at, write_at};

pub struct Storage {
    pub path: PathBuf,
    free: FreeList,
    retry: RetryPolicy,
}

impl Storage {
    /// Open the data file at `base`, creating it and its `-spc` sibling if
    /// absent.
    pub fn open(base: &Path, cfg: &Config) -> Result<Self> {
        ensure_file(base)?;
        ensure_file(&path_with_suffix(base, SPC_SUFFIX))?;
        let retry = cfg.retry();
        Ok(Self {
            path: base.to_path_buf(),
            free: FreeList::new(base, retry),
            retry,
        })
    }

    /// Write a record's bytes wherever the allocator puts them. The
    /// returned index has its fragments filled in; the primary key is the
    /// caller's responsibility.
    pub fn insert(&self, data: &[u8]) -> Result<RecordIndex> {
        let mut guard = self.open_data_exclusive()?;
        let file_len = guard.len()?;

        let mut points = self.free.load()?;
        let r = free::reserve(&mut points, data.len() as i32, file_len);
        self.write_fragments(&mut guard.file, data, &r.first, r.second.as_ref())?;
        self.free.save(&points)?;

        debug!(
            "insert: {} byte(s) at {}..{}{}",
            data.len(),
            r.first.position,
            r.first.end(),
            r.second
                .map(|p| format!(" + {}..{}", p.position, p.end()))
                .unwrap_or_default()
        );

        Ok(RecordIndex {
            primary_key: 0,
            first: r.first,
            second: r.second.unwrap_or_default(),
            is_free: false,
        })
    }

    /// Read one record back, reassembling both fragments when present.
    /// An empty data file yields an empty blob.
    pub fn select(&self, ix: &RecordIndex) -> Result<Vec<u8>> {
        let mut guard = self.open_data_shared()?;
        if guard.len()? == 0 {
            return Ok(Vec::new());
        }
        read_fragments(&mut guard.file, ix)
            .with_context(|| format!("read record from {}", self.path.display()))
    }

    /// Batched read over one file handle; output order matches input order.
    pub fn select_range(&self, ixs: &[RecordIndex]) -> Result<Vec<Vec<u8>>> {
        let mut guard = self.open_data_shared()?;
        if guard.len()? == 0 {
            return Ok(Vec::new());
        }
        let mut records = Vec::with_capacity(ixs.len());
        for ix in ixs {
            let blob = read_fragments(&mut guard.file, ix)
                .with_context(|| format!("read record from {}", self.path.display()))?;
            records.push(blob);
        }
        Ok(records)
    }

    /// Give a record's byte ranges back to the free list.
    pub fn remove(&self, ix: &RecordIndex) -> Result<()> {
        self.remove_range(std::slice::from_ref(ix))
    }

    /// Release many records in one free-list transaction.
    pub fn remove_range(&self, ixs: &[RecordIndex]) -> Result<()> {
        let guard = self.open_data_exclusive()?;
        let file_len = guard.len()?;
        if file_len == 0 {
            // Nothing left to free byte ranges against.
            return self.free.clear();
        }

        let mut points = self.free.load()?;
        free::release(&mut points, ixs.iter().flat_map(|ix| ix.points()));
        if let Some(new_len) = free::trim(&mut points, file_len) {
            guard.file.set_len(new_len as u64)?;
            guard.file.sync_all()?;
        }
        self.free.save(&points)?;
        Ok(())
    }

    /// Replace a record's bytes as one allocator transaction: the old
    /// fragments join the free list before the new reservation runs, so
    /// the space being vacated is immediately eligible for the new write.
    pub fn update(&self, data: &[u8], old: &RecordIndex) -> Result<RecordIndex> {
        let mut guard = self.open_data_exclusive()?;
        let file_len = guard.len()?;

        let mut points = self.free.load()?;
        free::release(&mut points, old.points());

        let r = free::reserve(&mut points, data.len() as i32, file_len);
        self.write_fragments(&mut guard.file, data, &r.first, r.second.as_ref())?;

        // The write may have grown the file; re-check before trimming.
        let len_now = guard.len()?;
        if let Some(new_len) = free::trim(&mut points, len_now) {
            guard.file.set_len(new_len as u64)?;
        }
        guard.file.sync_all()?;
        self.free.save(&points)?;

        Ok(RecordIndex {
            primary_key: 0,
            first: r.first,
            second: r.second.unwrap_or_default(),
            is_free: false,
        })
    }

    fn write_fragments(
        &self,
        f: &mut File,
        data: &[u8],
        first: &Point,
        second: Option<&Point>,
    ) -> Result<()> {
        let split = first.length as usize;
        write_at(f, first.position as u64, &data[..split])
            .with_context(|| format!("write record to {}", self.path.display()))?;
        if let Some(p) = second {
            write_at(f, p.position as u64, &data[split..])
                .with_context(|| format!("write record to {}", self.path.display()))?;
        }
        f.sync_all()?;
        Ok(())
    }

    fn open_data_shared(&self) -> Result<FileGuard> {
        open_shared(&self.path, &self.retry)
    }

    fn open_data_exclusive(&self) -> Result<FileGuard> {
        open_exclusive(&self.path, &self.retry)
    }

    /// Current free blocks, for diagnostics and tests.
    pub fn free_blocks(&self) -> Result<Vec<Point>> {
        self.free.load()
    }

    /// Current data file length.
    pub fn data_len(&self) -> Result<i64> {
        Ok(std::fs::metadata(&self.path)?.len() as i64)
    }
}

fn read_fragments(f: &mut File, ix: &RecordIndex) -> Result<Vec<u8>> {
    let mut out = vec![0u8; ix.first.length as usize];
    read_at(f, ix.first.position as u64, &mut out)?;
    if ix.has_second() {
        let mut tail = vec![0u8; ix.second.length as usize];
        read_at(f, ix.second.position as u64, &mut tail)?;
        out.extend_from_slice(&tail);
    }
    Ok(out)
}
