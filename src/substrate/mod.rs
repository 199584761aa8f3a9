pub mod reader;
pub mod writer;

pub use reader::{CdbReader, Iter};
pub use writer::CdbWriter;

// This package provides facilities to both read and write constant databases
// (CDB files).
//
// A CDB file is an immutable, durable hash table. It is never modified in
// place: it is built once, front to back, by a writer, and afterwards only
// supports point lookups by exact key and a full scan in file order.
//
// Physically, a file has three parts:
// * a fixed header of 256 (position, slot count) pairs, one per hash table,
// * the records, each one (key length, value length, key, value),
// * the 256 hash tables, each a run of (hash, record position) slots.
//
// A key's table is picked by the low byte of its hash. Each table has twice
// as many slots as it has records; a lookup starts at slot
// (hash >> 8) % slots and probes linearly until it finds the key or an empty
// slot (record position 0, which can never be a real record since records
// start after the header).
//
// All integers are little-endian u32, which caps a file at 4GiB.

pub(crate) const TABLE_COUNT: usize = 256;
pub(crate) const HEADER_LEN: usize = TABLE_COUNT * 8;

pub(crate) fn hash(key: &[u8]) -> u32 {
    key.iter()
        .fold(5381_u32, |h, &c| (h.wrapping_shl(5).wrapping_add(h)) ^ u32::from(c))
}
