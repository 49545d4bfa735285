//! Core value types: a byte range in the data file (`Point`) and the
//! per-record index slot (`RecordIndex`).
//!
//! Slot layout (25 bytes, LE), slot k at offset k*25 + 1:
//! [first.position i64][first.length i32]
//! [second.position i64][second.length i32]
//! [is_free u8]
//!
//! `second.position == 0` is the in-file sentinel for "no second fragment":
//! a second fragment only ever follows a first one, so it can never start
//! at offset 0 of the data file.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A contiguous byte range in the data file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub position: i64,
    pub length: i32,
}

impl Point {
    pub fn new(position: i64, length: i32) -> Self {
        Self { position, length }
    }

    /// First byte past the range.
    pub fn end(&self) -> i64 {
        self.position + self.length as i64
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let position = r.read_i64::<LittleEndian>()?;
        let length = r.read_i32::<LittleEndian>()?;
        Ok(Self { position, length })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_i64::<LittleEndian>(self.position)?;
        w.write_i32::<LittleEndian>(self.length)?;
        Ok(())
    }
}

/// Where one record's bytes live: up to two fragments plus the soft-delete
/// flag. The primary key is not persisted in the slot; it is the slot's
/// position in the index file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordIndex {
    pub primary_key: i64,
    pub first: Point,
    pub second: Point,
    pub is_free: bool,
}

impl RecordIndex {
    /// Whether the record was split into two fragments.
    pub fn has_second(&self) -> bool {
        self.second.position > 0
    }

    /// The fragments that actually hold bytes.
    pub fn points(&self) -> Vec<Point> {
        if self.has_second() {
            vec![self.first, self.second]
        } else {
            vec![self.first]
        }
    }

    /// Total record length across fragments.
    pub fn byte_len(&self) -> i64 {
        let mut n = self.first.length as i64;
        if self.has_second() {
            n += self.second.length as i64;
        }
        n
    }

    /// Decode one 25-byte slot. `primary_key` is supplied by the caller.
    pub fn read_from<R: Read>(r: &mut R, primary_key: i64) -> Result<Self> {
        let first = Point::read_from(r)?;
        let second = Point::read_from(r)?;
        let is_free = r.read_u8()? != 0;
        Ok(Self {
            primary_key,
            first,
            second,
            is_free,
        })
    }

    /// Encode one 25-byte slot.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.first.write_to(w)?;
        self.second.write_to(w)?;
        w.write_u8(if self.is_free { 1 } else { 0 })?;
        Ok(())
    }
}
