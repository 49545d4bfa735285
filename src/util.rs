use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub fn read_at(f: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)?;
    Ok(())
}

pub fn write_at(f: &mut File, offset: u64, buf: &[u8]) -> Result<()> {
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(buf)?;
    Ok(())
}

/// Sibling path with a suffix appended to the full file name:
/// `/data/store` + `-spc` -> `/data/store-spc`.
pub fn path_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

pub fn create_empty_file(path: &Path) -> Result<()> {
    let f = std::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .with_context(|| format!("create file {}", path.display()))?;
    f.sync_all()?;
    Ok(())
}

/// Create the file if it does not exist yet.
pub fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        create_empty_file(path)?;
    }
    Ok(())
}
