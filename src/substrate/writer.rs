use std::io::{self, Seek, SeekFrom};

use crate::{error::Result, fs::DbFile};

use super::{hash, HEADER_LEN, TABLE_COUNT};

fn too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "table would exceed 4GiB")
}

fn to_u32(n: usize) -> io::Result<u32> {
    u32::try_from(n).map_err(|_| too_large())
}

/// Builds a new CDB file front to back. Nothing is readable until
/// [`CdbWriter::finish`] has written the hash tables and header.
pub struct CdbWriter<D>
where
    D: DbFile,
{
    file: D,
    buf: Vec<u8>,
    buffer_size: usize,
    // Logical end of the file, including what is still buffered.
    pos: usize,
    // (hash, record position) per record, in append order.
    entries: Vec<(u32, u32)>,
}

impl<D> CdbWriter<D>
where
    D: DbFile,
{
    pub fn new(file: D, buffer_size: usize) -> Self {
        // The header is rewritten once the tables are known.
        let mut buf = Vec::with_capacity(std::cmp::max(buffer_size, HEADER_LEN));
        buf.resize(HEADER_LEN, 0);
        CdbWriter {
            file,
            buf,
            buffer_size,
            pos: HEADER_LEN,
            entries: Vec::new(),
        }
    }

    fn flush_buf(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    fn put_u32(&mut self, n: u32) {
        self.buf.extend(n.to_le_bytes());
    }

    /// Appends a record whose value is the concatenation of `chunks`.
    /// Appending the same key twice is legal but the first record then
    /// shadows the second on lookup.
    pub fn append(&mut self, key: &[u8], chunks: &[&[u8]]) -> Result<()> {
        let value_len: usize = chunks.iter().map(|c| c.len()).sum();
        let record_len = 8 + key.len() + value_len;
        let record_pos = to_u32(self.pos)?;
        to_u32(self.pos + record_len)?;

        self.entries.push((hash(key), record_pos));

        self.put_u32(key.len() as u32);
        self.put_u32(value_len as u32);
        self.buf.extend_from_slice(key);
        for chunk in chunks {
            self.buf.extend_from_slice(chunk);
        }
        self.pos += record_len;

        if self.buf.len() >= self.buffer_size {
            self.flush_buf()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the hash tables and header and syncs the file.
    pub fn finish(mut self) -> Result<D> {
        let mut buckets: Vec<Vec<(u32, u32)>> = vec![Vec::new(); TABLE_COUNT];
        for &(h, pos) in &self.entries {
            buckets[h as usize % TABLE_COUNT].push((h, pos));
        }

        let mut header = Vec::with_capacity(HEADER_LEN);
        for bucket in &buckets {
            let slots = bucket.len() * 2;
            header.extend(to_u32(self.pos)?.to_le_bytes());
            header.extend(to_u32(slots)?.to_le_bytes());

            let mut table = vec![(0_u32, 0_u32); slots];
            for &(h, pos) in bucket {
                let mut slot = (h >> 8) as usize % slots;
                while table[slot].1 != 0 {
                    slot = (slot + 1) % slots;
                }
                table[slot] = (h, pos);
            }

            to_u32(self.pos + slots * 8)?;
            for (h, pos) in table {
                self.put_u32(h);
                self.put_u32(pos);
            }
            self.pos += slots * 8;

            if self.buf.len() >= self.buffer_size {
                self.flush_buf()?;
            }
        }
        self.flush_buf()?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write(&header)?;
        self.file.sync()?;

        Ok(self.file)
    }
}
