use std::path::Path;

use crate::{
    error::{Error, Result},
    fs::{DbDir, DbFile, FileBytes},
};

use super::{hash, HEADER_LEN, TABLE_COUNT};

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::corrupt(format!("read past end of file at {}", pos)))
}

/// Read access to a CDB file. Every slice it hands out borrows from the
/// reader and cannot outlive it.
#[derive(Debug)]
pub struct CdbReader {
    data: FileBytes,
    // Records live in [HEADER_LEN, end_of_data).
    end_of_data: usize,
}

impl CdbReader {
    /// Returns None if the file does not exist.
    pub fn open<D, P>(dir: &mut D, fname: &P) -> Result<Option<Self>>
    where
        D: DbDir,
        P: AsRef<Path> + ?Sized,
    {
        match dir.open(fname)? {
            Some(file) => Ok(Some(Self::load(file.map()?)?)),
            None => Ok(None),
        }
    }

    pub fn load(data: FileBytes) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::corrupt(format!(
                "file is {} bytes, shorter than its header",
                data.len()
            )));
        }

        let mut end_of_data = data.len();
        for i in 0..TABLE_COUNT {
            let pos = read_u32(&data, i * 8)? as usize;
            let slots = read_u32(&data, i * 8 + 4)? as usize;
            if pos < HEADER_LEN || pos + slots * 8 > data.len() {
                return Err(Error::corrupt(format!(
                    "hash table {} at {} with {} slots is out of bounds",
                    i, pos, slots
                )));
            }
            end_of_data = std::cmp::min(end_of_data, pos);
        }

        Ok(CdbReader { data, end_of_data })
    }

    // Returns (key, value, position of the next record).
    fn record(&self, pos: usize) -> Result<(&[u8], &[u8], usize)> {
        if pos < HEADER_LEN || pos + 8 > self.end_of_data {
            return Err(Error::corrupt(format!("record position {} out of bounds", pos)));
        }
        let klen = read_u32(&self.data, pos)? as usize;
        let vlen = read_u32(&self.data, pos + 4)? as usize;
        let key_start = pos + 8;
        let val_start = key_start + klen;
        let next = val_start + vlen;
        if next > self.end_of_data {
            return Err(Error::corrupt(format!(
                "record at {} runs past end of data",
                pos
            )));
        }
        Ok((
            &self.data[key_start..val_start],
            &self.data[val_start..next],
            next,
        ))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let h = hash(key);
        let table = (h as usize % TABLE_COUNT) * 8;
        let table_pos = read_u32(&self.data, table)? as usize;
        let slots = read_u32(&self.data, table + 4)? as usize;
        if slots == 0 {
            return Ok(None);
        }

        let start = (h >> 8) as usize % slots;
        for i in 0..slots {
            let slot_pos = table_pos + ((start + i) % slots) * 8;
            let slot_hash = read_u32(&self.data, slot_pos)?;
            let record_pos = read_u32(&self.data, slot_pos + 4)? as usize;
            if record_pos == 0 {
                return Ok(None);
            }
            if slot_hash == h {
                let (k, v, _) = self.record(record_pos)?;
                if k == key {
                    return Ok(Some(v));
                }
            }
        }

        Ok(None)
    }

    /// Every record in file order. Stops after the first error.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            reader: self,
            pos: HEADER_LEN,
        }
    }
}

pub struct Iter<'a> {
    reader: &'a CdbReader,
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<(&'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.reader.end_of_data {
            return None;
        }
        match self.reader.record(self.pos) {
            Ok((k, v, next)) => {
                self.pos = next;
                Some(Ok((k, v)))
            }
            Err(e) => {
                self.pos = self.reader.end_of_data;
                Some(Err(e))
            }
        }
    }
}
