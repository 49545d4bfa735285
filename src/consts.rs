//! Shared constants for the on-disk formats (data heap, free-space side file,
//! per-model index files) and the record codec.

// -------- Derived file names --------
// The data file lives at the user-supplied base path. Side files are
// dash-suffixed siblings: `<base>-spc` for free space, `<base>-<model>`
// for each model's index.
pub const SPC_SUFFIX: &str = "-spc";

// -------- Free-space side file --------
// Repeated entries, no header, EOF-terminated:
// [position i64][length i32]  (LE), 12 bytes each.
// Persisted ordered by length ascending.
pub const SPC_ENTRY_SIZE: usize = 12;

// -------- Index file --------
// Byte 0: global free-flag (1 = at least one slot is free, 0 = dense).
// Then repeated 25-byte slots, slot k at offset k*25 + 1:
// [first.position i64][first.length i32]
// [second.position i64][second.length i32]
// [is_free u8]  (0 = taken, 1 = free)
pub const SLOT_SIZE: usize = 25;
pub const SLOT_BASE: u64 = 1;

// Offset of the is_free byte inside a slot.
pub const SLOT_OFF_IS_FREE: u64 = 24;

// -------- Record codec --------
// Tag-delimited text: `<db.Field>value`, fields joined by a single tab.
// Literal tabs inside text values are escaped to TAB_BREAK before joining.
pub const TAG_OPEN: &str = "<db.";
pub const TAG_CLOSE: char = '>';
pub const TAB_BREAK: &str = "<db.break/>";
pub const FIELD_SEP: char = '\t';

// Repeating 4-byte XOR key applied to the serialized record bytes.
// Obfuscation only, not a security primitive.
pub const XOR_KEY: [u8; 4] = [0x13, 0x37, 0xAA, 0x5C];

// -------- Scan windows --------
// Predicate queries page through the index in SCAN_BATCH-slot windows;
// full enumeration uses the wider ALL_BATCH.
pub const SCAN_BATCH: i64 = 1000;
pub const ALL_BATCH: i64 = 2000;

// -------- Contention retry --------
// Default delay between attempts to open a file another handle holds locked.
pub const RETRY_DELAY_MS: u64 = 150;
