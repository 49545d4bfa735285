//! Root handle for one store: the data file plus its derived side files.
//!
//! A `Database` is initialized with a base path. The data file lives at
//! that path; the free-space side file is the `-spc` sibling; each model's
//! index file is the `-<lowercase model name>` sibling. Side files are
//! created on first use and are ordinary visible files.

use anyhow::Result;
use log::info;
use std::path::{Path, PathBuf};

use crate::codec::Model;
use crate::config::Config;
use crate::consts::SPC_SUFFIX;
use crate::recordset::RecordSet;
use crate::util::{ensure_file, path_with_suffix};

pub struct Database {
    pub base: PathBuf,
    cfg: Config,
}

impl Database {
    /// Open (or create) a store at `base` with configuration from the
    /// environment.
    pub fn open(base: &Path) -> Result<Self> {
        Self::open_with(base, Config::from_env())
    }

    /// Open (or create) a store at `base` with explicit configuration.
    pub fn open_with(base: &Path, cfg: Config) -> Result<Self> {
        ensure_file(base)?;
        ensure_file(&path_with_suffix(base, SPC_SUFFIX))?;
        info!("opened store at {}", base.display());
        Ok(Self {
            base: base.to_path_buf(),
            cfg,
        })
    }

    /// The typed record set for one model. Validates the model's
    /// primary-key declaration and creates the index file if absent.
    pub fn record_set<M: Model>(&self) -> Result<RecordSet<M>> {
        RecordSet::open(&self.base, &self.cfg)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }
}
