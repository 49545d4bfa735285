//! Free-space side file and the byte-range allocator.
//!
//! File <base>-spc:
//!   repeated [position i64][length i32] (LE), 12 bytes per entry,
//!   no header, EOF-terminated. Persisted ordered by length ascending.
//!
//! There is no in-memory cache across operations: every caller loads the
//! list, mutates it and saves it back, so a process restart loses no
//! durable state.
//!
//! Allocation is best two-fit: the smallest block that holds the whole
//! record, else the largest undersized block plus one more block (or file
//! growth) for the remainder. A record never spans more than two fragments.
//!
//! Invariants after every mutation:
//! - no two entries are adjacent (a.position + a.length == b.position never
//!   holds); coalescing restores this;
//! - the data file never ends in free space: a block reaching end-of-file
//!   is dropped and the file shrunk instead.

use anyhow::{Context, Result};
use log::debug;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::RetryPolicy;
use crate::consts::{SPC_ENTRY_SIZE, SPC_SUFFIX};
use crate::lock::{open_exclusive, open_shared};
use crate::types::Point;
use crate::util::path_with_suffix;

pub struct FreeList {
    pub path: PathBuf,
    retry: RetryPolicy,
}

impl FreeList {
    pub fn new(base: &Path, retry: RetryPolicy) -> Self {
        Self {
            path: path_with_suffix(base, SPC_SUFFIX),
            retry,
        }
    }

    /// Read all free blocks, smallest first. Missing or empty file -> empty.
    pub fn load(&self) -> Result<Vec<Point>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut guard = open_shared(&self.path, &self.retry)
            .with_context(|| format!("load free list {}", self.path.display()))?;

        let len = guard.len()?;
        if len == 0 {
            return Ok(Vec::new());
        }

        guard.file.seek(SeekFrom::Start(0))?;
        let count = len as usize / SPC_ENTRY_SIZE;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            points.push(Point::read_from(&mut guard.file)?);
        }

        points.sort_by_key(|p| p.length);
        Ok(points)
    }

    /// Rewrite the side file with the given blocks, ordered by length.
    pub fn save(&self, points: &[Point]) -> Result<()> {
        let guard = open_exclusive(&self.path, &self.retry)
            .with_context(|| format!("save free list {}", self.path.display()))?;

        guard.file.set_len(0)?;
        let mut f = &guard.file;
        f.seek(SeekFrom::Start(0))?;

        let mut sorted: Vec<Point> = points.to_vec();
        sorted.sort_by_key(|p| p.length);
        for p in &sorted {
            p.write_to(&mut f)?;
        }
        guard.file.sync_all()?;
        Ok(())
    }

    /// Truncate the side file to nothing.
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let guard = open_exclusive(&self.path, &self.retry)
            .with_context(|| format!("clear free list {}", self.path.display()))?;
        guard.file.set_len(0)?;
        guard.file.sync_all()?;
        Ok(())
    }
}

/// Outcome of a reservation: one fragment, or two when no single block
/// could hold the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub first: Point,
    pub second: Option<Point>,
}

/// Index of the smallest block with length >= size.
fn best_fit(points: &[Point], size: i32) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.length >= size)
        .min_by_key(|(_, p)| p.length)
        .map(|(i, _)| i)
}

/// Index of the largest block. Only called when every block is undersized.
fn largest(points: &[Point]) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| p.length)
        .map(|(i, _)| i)
}

/// Take `size` bytes out of block `i`: consume it exactly or shrink it in
/// place, returning the used prefix.
fn carve(points: &mut Vec<Point>, i: usize, size: i32) -> Point {
    let p = points[i];
    let used = Point::new(p.position, size);
    if p.length == size {
        points.remove(i);
    } else {
        points[i].position += size as i64;
        points[i].length -= size;
    }
    used
}

/// Choose where `size` bytes go. Mutates the free list; the caller writes
/// the bytes and persists the list. `file_len` is the current data file
/// length, used for end-of-file growth.
pub fn reserve(points: &mut Vec<Point>, size: i32, file_len: i64) -> Reservation {
    if size == 0 {
        return Reservation {
            first: Point::new(file_len, 0),
            second: None,
        };
    }

    // Best fit: the whole record in one block.
    if let Some(i) = best_fit(points, size) {
        return Reservation {
            first: carve(points, i, size),
            second: None,
        };
    }

    // No free space at all: grow the file.
    // Otherwise split: the largest (still undersized) block is consumed
    // whole as fragment 1, the remainder goes to the best-fitting other
    // block or, failing that, to end-of-file. Never more than two
    // fragments.
    let Some(i) = largest(points) else {
        return Reservation {
            first: Point::new(file_len, size),
            second: None,
        };
    };
    let first = points.remove(i);
    let rest = size - first.length;

    let second = match best_fit(points, rest) {
        Some(j) => carve(points, j, rest),
        None => Point::new(file_len, rest),
    };

    Reservation {
        first,
        second: Some(second),
    }
}

/// Return byte ranges to the free list and merge whatever became adjacent.
pub fn release(points: &mut Vec<Point>, freed: impl IntoIterator<Item = Point>) {
    points.extend(freed.into_iter().filter(|p| p.length > 0));
    coalesce(points);
}

/// Merge adjacent blocks until none remain. A position-ordered sweep gives
/// transitive merging in one pass.
pub fn coalesce(points: &mut Vec<Point>) {
    if points.len() < 2 {
        return;
    }
    points.sort_by_key(|p| p.position);
    let mut merged: Vec<Point> = Vec::with_capacity(points.len());
    for p in points.drain(..) {
        match merged.last_mut() {
            Some(last) if last.end() == p.position => last.length += p.length,
            _ => merged.push(p),
        }
    }
    *points = merged;
}

/// Apply the shrink rules after a release. Returns the new data file length
/// if the file must be truncated:
/// - a block ending exactly at end-of-file is dropped and the file shrunk
///   to its start;
/// - if the remaining free space then covers the whole file, the list is
///   cleared and the file truncated to zero.
pub fn trim(points: &mut Vec<Point>, file_len: i64) -> Option<i64> {
    let mut len = file_len;
    let mut changed = false;

    if let Some(i) = points.iter().position(|p| p.end() == len) {
        len = points[i].position;
        points.remove(i);
        changed = true;
        debug!("free space reached end-of-file, shrinking data file to {}", len);
    }

    let free_total: i64 = points.iter().map(|p| p.length as i64).sum();
    if !points.is_empty() && free_total == len {
        points.clear();
        len = 0;
        changed = true;
        debug!("store emptied, truncating data file");
    }

    changed.then_some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(v: &[(i64, i32)]) -> Vec<Point> {
        v.iter().map(|&(p, l)| Point::new(p, l)).collect()
    }

    #[test]
    fn reserve_appends_when_list_is_empty() {
        let mut points = Vec::new();
        let r = reserve(&mut points, 100, 250);
        assert_eq!(r.first, Point::new(250, 100));
        assert_eq!(r.second, None);
        assert!(points.is_empty());
    }

    #[test]
    fn best_fit_prefers_smallest_sufficient_block() {
        let mut points = pts(&[(0, 500), (600, 40), (700, 120)]);
        let r = reserve(&mut points, 100, 1000);
        // 120 is the smallest block >= 100; it shrinks in place.
        assert_eq!(r.first, Point::new(700, 100));
        assert_eq!(r.second, None);
        assert!(points.contains(&Point::new(800, 20)));
        assert!(points.contains(&Point::new(0, 500)));
        assert!(points.contains(&Point::new(600, 40)));
    }

    #[test]
    fn exact_fit_removes_the_block() {
        let mut points = pts(&[(0, 100), (200, 64)]);
        let r = reserve(&mut points, 64, 300);
        assert_eq!(r.first, Point::new(200, 64));
        assert_eq!(points, pts(&[(0, 100)]));
    }

    #[test]
    fn split_uses_largest_block_then_best_fit_for_rest() {
        let mut points = pts(&[(0, 50), (100, 80), (300, 30)]);
        let r = reserve(&mut points, 100, 400);
        // Largest undersized block (80) is fragment 1, consumed whole.
        assert_eq!(r.first, Point::new(100, 80));
        // Remainder 20 best-fits the 30-block, which shrinks.
        assert_eq!(r.second, Some(Point::new(300, 20)));
        assert_eq!(points, pts(&[(0, 50), (320, 10)]));
    }

    #[test]
    fn split_grows_file_when_no_block_fits_the_rest() {
        let mut points = pts(&[(0, 60)]);
        let r = reserve(&mut points, 100, 500);
        assert_eq!(r.first, Point::new(0, 60));
        assert_eq!(r.second, Some(Point::new(500, 40)));
        assert!(points.is_empty());
    }

    #[test]
    fn release_coalesces_transitively() {
        let mut points = pts(&[(0, 10)]);
        release(&mut points, pts(&[(30, 10), (10, 10), (20, 10)]));
        assert_eq!(points, pts(&[(0, 40)]));
    }

    #[test]
    fn no_adjacent_blocks_after_release() {
        let mut points = pts(&[(100, 50), (0, 20)]);
        release(&mut points, pts(&[(20, 80), (150, 7)]));
        for w in points.windows(2) {
            assert_ne!(w[0].end(), w[1].position, "adjacent blocks survived");
        }
        assert_eq!(points, pts(&[(0, 157)]));
    }

    #[test]
    fn trim_drops_trailing_block_and_shrinks() {
        let mut points = pts(&[(0, 10), (90, 30)]);
        let new_len = trim(&mut points, 120);
        assert_eq!(new_len, Some(90));
        assert_eq!(points, pts(&[(0, 10)]));
    }

    #[test]
    fn trim_truncates_to_zero_when_everything_is_free() {
        let mut points = pts(&[(0, 120)]);
        let new_len = trim(&mut points, 120);
        // The single block reaches EOF, so the trailing rule alone empties
        // the file.
        assert_eq!(new_len, Some(0));
        assert!(points.is_empty());
    }

    #[test]
    fn trim_leaves_interior_blocks_alone() {
        let mut points = pts(&[(10, 20)]);
        assert_eq!(trim(&mut points, 100), None);
        assert_eq!(points, pts(&[(10, 20)]));
    }

    #[test]
    fn zero_length_points_are_never_parked() {
        let mut points = Vec::new();
        release(&mut points, vec![Point::new(40, 0)]);
        assert!(points.is_empty());
    }
}
