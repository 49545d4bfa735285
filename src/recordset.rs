//! Typed record sets: the public CRUD and query surface over one model.
//!
//! A `RecordSet` composes the index store, the storage engine and the
//! codec. Queries never materialize the whole index file: they page
//! through it in fixed windows (1,000 slots for predicate scans, 2,000
//! for full enumeration), decode only live slots, and `any` stops at the
//! first window that produces a match.
//!
//! Concurrency: two concurrent `add` calls on the same model can both
//! observe the same first available key before either commits its slot.
//! The engine does not serialize that sequence; callers running adds
//! concurrently must hold an external lock per model.

use anyhow::{bail, Result};
use log::debug;
use std::path::Path;

use crate::codec::{self, FieldDef, Model, Value};
use crate::config::Config;
use crate::consts::{ALL_BATCH, SCAN_BATCH};
use crate::index::IndexStore;
use crate::store::Storage;
use crate::types::RecordIndex;

pub struct RecordSet<M: Model> {
    storage: Storage,
    index: IndexStore,
    pk: &'static FieldDef<M>,
}

impl<M: Model> RecordSet<M> {
    /// Build the record set for one model: validates the primary-key
    /// declaration and creates the model's index file if absent.
    pub(crate) fn open(base: &Path, cfg: &Config) -> Result<Self> {
        let pk = codec::primary_key_field::<M>()?;
        let storage = Storage::open(base, cfg)?;
        let index = IndexStore::open(base, M::NAME, cfg)?;
        Ok(Self { storage, index, pk })
    }

    /// Insert a record. The first available primary key is stamped onto
    /// the model and returned.
    pub fn add(&self, model: &mut M) -> Result<i64> {
        let key = self.index.first_available_key()?;
        (self.pk.set)(model, Value::Int(key))?;

        let bytes = codec::encode(model)?;
        let mut ix = self.storage.insert(&bytes)?;
        ix.primary_key = key;
        ix.is_free = false;
        self.index.set(&ix)?;

        debug!("{}: added record {}", M::NAME, key);
        Ok(key)
    }

    /// Look one record up by primary key. Absent and freed slots are both
    /// "not found".
    pub fn find(&self, key: i64) -> Result<Option<M>> {
        let Some(ix) = self.index.get(key)? else {
            return Ok(None);
        };
        if ix.is_free {
            return Ok(None);
        }
        let bytes = self.storage.select(&ix)?;
        Ok(Some(codec::decode(&bytes)?))
    }

    /// All records whose primary key satisfies the predicate. The key
    /// filter runs on index slots, before any record bytes are read.
    pub fn find_where(&self, pred: impl Fn(i64) -> bool) -> Result<Vec<M>> {
        let mut models = Vec::new();
        self.scan(SCAN_BATCH, |window| {
            let keyed: Vec<RecordIndex> = window
                .into_iter()
                .filter(|ix| pred(ix.primary_key))
                .collect();
            if !keyed.is_empty() {
                for blob in self.storage.select_range(&keyed)? {
                    models.push(codec::decode(&blob)?);
                }
            }
            Ok(true)
        })?;
        Ok(models)
    }

    /// Every live record.
    pub fn all(&self) -> Result<Vec<M>> {
        let mut models = Vec::new();
        self.scan(ALL_BATCH, |window| {
            for blob in self.storage.select_range(&window)? {
                models.push(codec::decode(&blob)?);
            }
            Ok(true)
        })?;
        Ok(models)
    }

    /// All records the predicate accepts.
    pub fn filter(&self, pred: impl Fn(&M) -> bool) -> Result<Vec<M>> {
        let mut models = Vec::new();
        self.scan(SCAN_BATCH, |window| {
            for blob in self.storage.select_range(&window)? {
                let model = codec::decode(&blob)?;
                if pred(&model) {
                    models.push(model);
                }
            }
            Ok(true)
        })?;
        Ok(models)
    }

    /// Whether any record satisfies the predicate. Returns as soon as one
    /// decodes true; later windows are never read.
    pub fn any(&self, pred: impl Fn(&M) -> bool) -> Result<bool> {
        let mut found = false;
        self.scan(SCAN_BATCH, |window| {
            for blob in self.storage.select_range(&window)? {
                let model: M = codec::decode(&blob)?;
                if pred(&model) {
                    found = true;
                    return Ok(false);
                }
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// Delete by primary key. Returns whether a live record existed.
    pub fn remove(&self, key: i64) -> Result<bool> {
        let Some(mut ix) = self.index.get(key)? else {
            return Ok(false);
        };
        if ix.is_free {
            return Ok(false);
        }
        self.storage.remove(&ix)?;
        ix.is_free = true;
        self.index.set(&ix)?;
        debug!("{}: removed record {}", M::NAME, key);
        Ok(true)
    }

    /// Delete the given records (matched by primary key). Returns how many
    /// were live.
    pub fn remove_many(&self, models: &[M]) -> Result<usize> {
        let mut live = Vec::new();
        for model in models {
            if let Some(ix) = self.index.get(self.key_of(model)?)? {
                if !ix.is_free {
                    live.push(ix);
                }
            }
        }
        if live.is_empty() {
            return Ok(0);
        }
        self.storage.remove_range(&live)?;
        for mut ix in live.iter().copied() {
            ix.is_free = true;
            self.index.set(&ix)?;
        }
        Ok(live.len())
    }

    /// Delete every record whose primary key satisfies the predicate,
    /// window by window: each window's bytes are released in one batch,
    /// then its slots are flipped free one by one.
    pub fn remove_where(&self, pred: impl Fn(i64) -> bool) -> Result<usize> {
        let mut removed = 0usize;
        self.scan(SCAN_BATCH, |window| {
            let doomed: Vec<RecordIndex> = window
                .into_iter()
                .filter(|ix| pred(ix.primary_key))
                .collect();
            if !doomed.is_empty() {
                self.storage.remove_range(&doomed)?;
                for mut ix in doomed.iter().copied() {
                    ix.is_free = true;
                    self.index.set(&ix)?;
                }
                removed += doomed.len();
            }
            Ok(true)
        })?;
        debug!("{}: removed {} record(s) by predicate", M::NAME, removed);
        Ok(removed)
    }

    /// Rewrite one record in place (same primary key, new bytes). Old
    /// fragments are freed and the new reservation runs against that freed
    /// space in a single allocator transaction. A missing or freed key is
    /// a no-op returning false.
    pub fn update(&self, model: &M) -> Result<bool> {
        let key = self.key_of(model)?;
        let Some(old) = self.index.get(key)? else {
            return Ok(false);
        };
        if old.is_free {
            return Ok(false);
        }

        let bytes = codec::encode(model)?;
        let mut ix = self.storage.update(&bytes, &old)?;
        ix.primary_key = key;
        ix.is_free = false;
        self.index.set(&ix)?;
        Ok(true)
    }

    /// Update each given record; returns how many existed.
    pub fn update_many<'a>(&self, models: impl IntoIterator<Item = &'a M>) -> Result<usize>
    where
        M: 'a,
    {
        let mut updated = 0usize;
        for model in models {
            if self.update(model)? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Page through the index in `batch`-slot windows, handing each
    /// window's live slots to the visitor. The visitor returns false to
    /// stop early.
    fn scan(
        &self,
        batch: i64,
        mut visit: impl FnMut(Vec<RecordIndex>) -> Result<bool>,
    ) -> Result<()> {
        let last = self.index.last_key()?;
        let mut skip = 0i64;
        while skip < last {
            let count = batch.min(last - skip);
            let mut window = self.index.range(skip, count)?;
            window.retain(|ix| !ix.is_free);
            if !window.is_empty() && !visit(window)? {
                return Ok(());
            }
            skip += batch;
        }
        Ok(())
    }

    fn key_of(&self, model: &M) -> Result<i64> {
        match (self.pk.get)(model) {
            Some(Value::Int(key)) => Ok(key),
            _ => bail!(
                "primary key getter of model {} did not produce an integer",
                M::NAME
            ),
        }
    }
}
