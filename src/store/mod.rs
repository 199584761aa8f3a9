use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crate::{
    config::StoreConfig,
    encoding::{split_tag, BytesKeys, DefaultValues, KeyCodec, StringKeys, ValueCodec},
    error::{Error, Result},
    fs::{DbDir, OsDir},
    substrate::CdbReader,
};

use self::{autosave::Autosave, overlay::Overlay};

mod autosave;
mod overlay;
mod save;


pub type CdbStore<D> = Store<D, BytesKeys, DefaultValues>;
pub type StringKeyStore<D> = Store<D, StringKeys, DefaultValues>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
}

/// A persistent mutable dictionary backed by a single CDB file.
///
/// Values are read from the file on demand and cached. Changes only live in
/// memory until [`Store::save`], which writes a complete new file next to the
/// old one and renames it into place, so the file on disk is always either
/// the previous version or the new one.
///
/// A store has a single owner. Callers that share one between threads must
/// lock around it.
pub struct Store<D, K = BytesKeys, V = DefaultValues>
where
    D: DbDir,
    K: KeyCodec,
    V: ValueCodec,
{
    dir: D,
    name: String,
    config: StoreConfig,
    keys: K,
    values: V,
    state: State,
    // None while closed, or while open on a file that doesn't exist yet.
    reader: Option<CdbReader>,
    overlay: Overlay<V::Value>,
    autosave: Autosave,
}

impl<D, K, V> Store<D, K, V>
where
    D: DbDir,
    K: KeyCodec + Default,
    V: ValueCodec + Default,
{
    /// Creates a closed store on `name` inside `dir`.
    pub fn new(dir: D, name: impl Into<String>, config: StoreConfig) -> Self {
        Self::with_codecs(dir, name, config, K::default(), V::default())
    }
}

impl<K, V> Store<OsDir, K, V>
where
    K: KeyCodec + Default,
    V: ValueCodec + Default,
{
    /// Opens a store on a file of the real filesystem.
    pub fn open_path<P>(path: P, config: StoreConfig) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let name = path
            .file_name()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?
            .to_string_lossy()
            .into_owned();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut store = Self::new(OsDir::new(parent), name, config);
        store.open()?;
        Ok(store)
    }
}

impl<D, K, V> Store<D, K, V>
where
    D: DbDir,
    K: KeyCodec,
    V: ValueCodec,
{
    pub fn with_codecs(
        dir: D,
        name: impl Into<String>,
        config: StoreConfig,
        keys: K,
        values: V,
    ) -> Self {
        Store {
            dir,
            name: name.into(),
            autosave: Autosave::new(config.autosave_interval),
            config,
            keys,
            values,
            state: State::Closed,
            reader: None,
            overlay: Overlay::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &D {
        &self.dir
    }

    fn temp_name(&self) -> String {
        format!("{}{}", self.name, self.config.temp_suffix)
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// Does the backing file exist yet?
    pub fn exists(&self) -> bool {
        self.dir.exists(&self.name)
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(Error::NotOpen),
        }
    }

    /// Opens the backing file for reading. A missing file is an empty
    /// store; it is created by the first save. Opening an open store does
    /// nothing.
    ///
    /// Only one store may use a path at a time. A temporary file found here
    /// is taken to be left over from a crashed save and is removed.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        // Left behind by a save that never finished.
        let tmp = self.temp_name();
        if self.dir.exists(&tmp) {
            tracing::warn!(file = %tmp, "Removing stale temporary file");
            self.dir.unlink(&tmp)?;
        }

        self.reader = CdbReader::open(&mut self.dir, &self.name)?;
        self.state = State::Open;
        tracing::debug!(file = %self.name, exists = self.reader.is_some(), "Opened store");
        Ok(())
    }

    /// Saves any unsaved changes, then closes the file and empties the
    /// cache. If the save fails its error is returned, but the store is
    /// closed and the changes are gone regardless.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }

        let result = self.save().map(|_| ());
        if let Err(e) = &result {
            tracing::error!(
                file = %self.name,
                changes = self.overlay.changed_len(),
                error = %e,
                "Save on close failed, discarding changes"
            );
        }

        self.reader = None;
        self.overlay.clear();
        self.autosave.reset();
        self.state = State::Closed;
        result
    }

    /// Opens the store, runs `f`, and closes the store again on every path
    /// out of `f`. An error from `f` takes precedence over one from closing.
    pub fn scoped<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.open()?;
        let result = f(self);
        let closed = self.close();
        let t = result?;
        closed?;
        Ok(t)
    }

    // Cache first, then the file. Values read from the file are decoded
    // into owned values before they are cached; nothing borrowed from the
    // reader survives this call.
    fn read_through(&mut self, encoded: Vec<u8>) -> Result<Option<&V::Value>> {
        if self.overlay.contains(&encoded) {
            return Ok(self.overlay.get(&encoded));
        }

        let reader = match &self.reader {
            Some(reader) => reader,
            None => return Ok(None),
        };
        let value = match reader.get(&encoded)? {
            Some(raw) => {
                let (tag, payload) = split_tag(raw)?;
                self.values.decode_value(tag, payload)?
            }
            None => return Ok(None),
        };

        Ok(self.overlay.insert_loaded(encoded, value))
    }

    pub fn get(&mut self, key: &K::Key) -> Result<Option<&V::Value>> {
        self.check_open()?;
        let encoded = self.keys.encode_key(key)?.into_owned();
        self.read_through(encoded)
    }

    pub fn contains_key(&mut self, key: &K::Key) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Associates `value` with `key`; `None` deletes it. Nothing is encoded
    /// until the next save.
    pub fn set(&mut self, key: &K::Key, value: Option<V::Value>) -> Result<()> {
        self.check_open()?;
        let encoded = self.keys.encode_key(key)?.into_owned();
        let was_clean = !self.overlay.has_changes();
        self.overlay.set(encoded, value);
        if was_clean {
            self.autosave.arm(Instant::now());
        }
        Ok(())
    }

    pub fn insert(&mut self, key: &K::Key, value: V::Value) -> Result<()> {
        self.set(key, Some(value))
    }

    pub fn remove(&mut self, key: &K::Key) -> Result<()> {
        self.set(key, None)
    }

    fn mark(&mut self, encoded: Vec<u8>) {
        let was_clean = !self.overlay.has_changes();
        self.overlay.mark(encoded);
        if was_clean {
            self.autosave.arm(Instant::now());
        }
    }

    /// Notes that the value stored under `key` has changed in a way the
    /// store can't see, so it gets written on the next save.
    pub fn mark_changed(&mut self, key: &K::Key) -> Result<()> {
        self.check_open()?;
        let encoded = self.keys.encode_key(key)?.into_owned();
        let was_clean = !self.overlay.has_changes();
        // Changed keys must be cached; a key that exists nowhere is cached
        // as deleted.
        let found = self.read_through(encoded.clone())?.is_some();
        if !found && !self.overlay.contains(&encoded) {
            self.overlay.insert_deleted(encoded.clone());
        }
        self.overlay.mark(encoded);
        if was_clean {
            self.autosave.arm(Instant::now());
        }
        Ok(())
    }

    /// Like [`Store::mark_changed`] for callers that only have the value.
    /// Scans the whole cache, so it is much slower. Returns false if no
    /// cached key holds an equal value.
    pub fn mark_value_changed(&mut self, value: &V::Value) -> Result<bool>
    where
        V::Value: PartialEq,
    {
        self.check_open()?;
        let keys = self.overlay.keys_holding(value);
        let found = !keys.is_empty();
        for encoded in keys {
            self.mark(encoded);
        }
        Ok(found)
    }

    /// Empties the cache of values read from the file. Unsaved changes are
    /// kept.
    pub fn drop_cache(&mut self) -> Result<()> {
        self.check_open()?;
        let before = self.overlay.cached_len();
        self.overlay.drop_unchanged();
        tracing::debug!(
            file = %self.name,
            dropped = before - self.overlay.cached_len(),
            "Dropped cached values"
        );
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        self.overlay.has_changes()
    }

    /// Keys added, changed or deleted since the last save.
    pub fn changed_keys(&self) -> Result<Vec<K::Key>> {
        self.check_open()?;
        self.overlay
            .changed()
            .map(|k| self.keys.decode_key(k))
            .collect()
    }

    fn on_disk(&self, encoded: &[u8]) -> Result<bool> {
        match &self.reader {
            Some(reader) => Ok(reader.get(encoded)?.is_some()),
            None => Ok(false),
        }
    }

    fn live_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut live = Vec::new();
        if let Some(reader) = &self.reader {
            for entry in reader.iter() {
                let (key, _) = entry?;
                if !self.overlay.is_deleted(key) {
                    live.push(key.to_vec());
                }
            }
        }
        for key in self.overlay.changed() {
            if self.overlay.get(key).is_some() && !self.on_disk(key)? {
                live.push(key.to_vec());
            }
        }
        Ok(live)
    }

    /// Every key in the store, saved or not, in no particular order.
    pub fn keys(&self) -> Result<Vec<K::Key>> {
        self.check_open()?;
        self.live_keys()?
            .iter()
            .map(|k| self.keys.decode_key(k))
            .collect()
    }

    /// Every key and value in the store. Reads and caches every value, so
    /// this is expensive for a large file.
    pub fn entries(&mut self) -> Result<Vec<(K::Key, V::Value)>>
    where
        V::Value: Clone,
    {
        self.check_open()?;
        let mut out = Vec::new();
        for encoded in self.live_keys()? {
            let key = self.keys.decode_key(&encoded)?;
            if let Some(value) = self.read_through(encoded)? {
                out.push((key, value.clone()));
            }
        }
        Ok(out)
    }

    pub fn values(&mut self) -> Result<Vec<V::Value>>
    where
        V::Value: Clone,
    {
        Ok(self.entries()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Writes all changes to the file, creating it if needed. Returns false
    /// without touching the file if there was nothing to save.
    pub fn save(&mut self) -> Result<bool> {
        self.check_open()?;
        if !self.overlay.has_changes() {
            return Ok(false);
        }

        let tmp = self.temp_name();
        let stats = save::write_merged(
            &mut self.dir,
            &self.name,
            &tmp,
            self.reader.as_ref(),
            &self.overlay,
            &self.values,
            self.config.write_buffer_size,
        )?;

        self.overlay.clear_changes();
        self.autosave.saved();
        tracing::info!(
            file = %self.name,
            copied = stats.copied,
            written = stats.written,
            deleted = stats.deleted,
            "Saved store"
        );

        // The old reader still sees the replaced file.
        self.reader = None;
        match CdbReader::open(&mut self.dir, &self.name) {
            Ok(reader) => {
                self.reader = reader;
                Ok(true)
            }
            Err(e) => {
                // The file is saved, but reads can no longer be served
                // correctly.
                self.overlay.clear();
                self.autosave.reset();
                self.state = State::Closed;
                Err(e)
            }
        }
    }

    /// Asks for a save at the end of the current unit of work, that is the
    /// next [`Store::run_pending`]. Any number of requests before then
    /// result in one save.
    pub fn save_soon(&mut self) {
        if self.autosave.request() {
            tracing::debug!(file = %self.name, "Save scheduled");
        }
    }

    pub fn save_pending(&self) -> bool {
        self.autosave.is_requested()
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        self.autosave.interval()
    }

    pub fn set_autosave_interval(&mut self, interval: Option<Duration>) {
        self.config.autosave_interval = interval;
        let dirty = self.has_changes();
        self.autosave.set_interval(interval, Instant::now(), dirty);
    }

    /// Runs a requested or interval save if one is due. Meant to be called
    /// by the owner's loop between units of work. Returns whether a file was
    /// written.
    pub fn run_pending(&mut self) -> Result<bool> {
        self.run_pending_at(Instant::now())
    }

    pub fn run_pending_at(&mut self, now: Instant) -> Result<bool> {
        if !self.is_open() || !self.autosave.due(now) {
            return Ok(false);
        }
        match self.save() {
            Ok(saved) => {
                self.autosave.saved();
                Ok(saved)
            }
            Err(e) => {
                self.autosave.failed(now);
                Err(e)
            }
        }
    }
}

impl<D, K, V> Drop for Store<D, K, V>
where
    D: DbDir,
    K: KeyCodec,
    V: ValueCodec,
{
    fn drop(&mut self) {
        if self.overlay.has_changes() {
            tracing::warn!(
                file = %self.name,
                changes = self.overlay.changed_len(),
                "Store dropped with unsaved changes"
            );
        }
    }
}
