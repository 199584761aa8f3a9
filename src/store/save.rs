use crate::{
    encoding::{split_tag, ValueCodec},
    error::{Error, Result},
    fs::{DbDir, DbFile},
    substrate::{CdbReader, CdbWriter},
};

use super::overlay::Overlay;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct SaveStats {
    // Unchanged records carried over from the old file as raw bytes.
    pub copied: usize,
    // Changed keys encoded from the cache.
    pub written: usize,
    // Tombstoned keys left out.
    pub deleted: usize,
}

// Writes the merge of the old file and the overlay to `tmp_name`, then renames
// it over `name`. The rename is the only change anyone else can observe: on
// any earlier failure the temporary file is removed and `name` is untouched.
pub(super) fn write_merged<D, V>(
    dir: &mut D,
    name: &str,
    tmp_name: &str,
    reader: Option<&CdbReader>,
    overlay: &Overlay<V::Value>,
    values: &V,
    buffer_size: usize,
) -> Result<SaveStats>
where
    D: DbDir,
    V: ValueCodec,
{
    let file = match dir.create(tmp_name)? {
        Some(file) => file,
        None => {
            return Err(Error::ConcurrentSave(format!(
                "temporary file {} already exists",
                tmp_name
            )))
        }
    };

    let result = build(file, reader, overlay, values, buffer_size).and_then(|stats| {
        dir.rename(tmp_name, name)?;
        Ok(stats)
    });

    if result.is_err() {
        match dir.unlink(tmp_name) {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(file = tmp_name, error = %e, "Failed to remove temporary file")
            }
        }
    }
    result
}

fn build<F, V>(
    file: F,
    reader: Option<&CdbReader>,
    overlay: &Overlay<V::Value>,
    values: &V,
    buffer_size: usize,
) -> Result<SaveStats>
where
    F: DbFile,
    V: ValueCodec,
{
    let mut writer = CdbWriter::new(file, buffer_size);
    let mut stats = SaveStats::default();

    // Changed keys are skipped here and written from the cache below, so
    // every key is written exactly once.
    if let Some(reader) = reader {
        for entry in reader.iter() {
            let (key, raw) = entry?;
            if overlay.is_changed(key) {
                continue;
            }
            split_tag(raw)?;
            writer.append(key, &[raw])?;
            stats.copied += 1;
        }
    }

    for key in overlay.changed() {
        match overlay.slot(key) {
            Some(Some(value)) => {
                let encoded = values.encode_value(value)?;
                let tag = [encoded.tag];
                let mut chunks: Vec<&[u8]> = Vec::with_capacity(encoded.chunks.len() + 1);
                chunks.push(&tag);
                chunks.extend(encoded.chunks.iter().map(|c| &**c));
                writer.append(key, &chunks)?;
                stats.written += 1;
            }
            _ => stats.deleted += 1,
        }
    }

    writer.finish()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use crate::{
        encoding::{DefaultValues, Value, ValueCodec},
        fs::MockDir,
    };

    use super::*;

    fn reader(dir: &mut MockDir) -> CdbReader {
        CdbReader::open(dir, "db").unwrap().unwrap()
    }

    fn decoded(reader: &CdbReader, key: &[u8]) -> Option<Value> {
        reader.get(key).unwrap().map(|raw| {
            let (tag, payload) = split_tag(raw).unwrap();
            DefaultValues.decode_value(tag, payload).unwrap()
        })
    }

    #[test]
    fn test_merge() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut overlay = Overlay::new();
        overlay.set(b"keep".to_vec(), Some(Value::from("1")));
        overlay.set(b"change".to_vec(), Some(Value::from("2")));
        overlay.set(b"delete".to_vec(), Some(Value::from("3")));
        let stats = write_merged(&mut dir, "db", "db.tmp", None, &overlay, &DefaultValues, 64)?;
        assert_eq!(stats.written, 3);

        let old = reader(&mut dir);
        let mut overlay = Overlay::new();
        overlay.set(b"change".to_vec(), Some(Value::from("two")));
        overlay.set(b"delete".to_vec(), None);
        overlay.set(b"new".to_vec(), Some(Value::from(vec![4_u8])));
        let stats =
            write_merged(&mut dir, "db", "db.tmp", Some(&old), &overlay, &DefaultValues, 64)?;
        assert_eq!(
            stats,
            SaveStats {
                copied: 1,
                written: 2,
                deleted: 1
            }
        );

        let new = reader(&mut dir);
        assert_eq!(decoded(&new, b"keep"), Some(Value::from("1")));
        assert_eq!(decoded(&new, b"change"), Some(Value::from("two")));
        assert_eq!(decoded(&new, b"delete"), None);
        assert_eq!(decoded(&new, b"new"), Some(Value::from(vec![4_u8])));
        assert_eq!(new.iter().count(), 3);
        assert!(!dir.exists("db.tmp"));
        Ok(())
    }

    #[test]
    fn test_existing_temp_file_is_left_alone() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        dir.create("db.tmp")?.unwrap().write(b"someone else's")?;
        let mut overlay = Overlay::new();
        overlay.set(b"k".to_vec(), Some(Value::from("v")));
        let err = write_merged(&mut dir, "db", "db.tmp", None, &overlay, &DefaultValues, 64)
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrentSave(_)));
        assert_eq!(dir.contents("db.tmp"), Some(b"someone else's".to_vec()));
        assert!(!dir.exists("db"));
        Ok(())
    }

    #[test]
    fn test_failure_removes_temp_file() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut overlay = Overlay::new();
        overlay.set(b"k".to_vec(), Some(Value::from("v")));
        dir.schedule_disk_full(0);
        let err = write_merged(&mut dir, "db", "db.tmp", None, &overlay, &DefaultValues, 64)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!dir.exists("db.tmp"));
        assert!(!dir.exists("db"));
        Ok(())
    }
}
