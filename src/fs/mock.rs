use std::{
    cell::RefCell,
    collections::HashMap,
    io::{self, Seek},
    path::Path,
    rc::Rc,
};

use super::{DbDir, DbFile, FileBytes};

#[derive(Default, Debug)]
struct MockData {
    synced: Vec<u8>,
    unsynced: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MockFile {
    idx: usize,
    pub file_id: FileId,
    fs: Rc<RefCell<MockFs>>,
}

impl MockFile {
    pub fn read_all(&self) -> Vec<u8> {
        (*self.fs).borrow().data[self.file_id].unsynced.clone()
    }

    pub fn read_all_synced(&self) -> Vec<u8> {
        (*self.fs).borrow().data[self.file_id].synced.clone()
    }
}

impl Seek for MockFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let len = (*self.fs).borrow().data[self.file_id].unsynced.len() as i64;
        let target = match pos {
            io::SeekFrom::Start(i) => i as i64,
            io::SeekFrom::End(i) => len + i,
            io::SeekFrom::Current(x) => self.idx as i64 + x,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.idx = target as usize;
        Ok(self.idx as u64)
    }
}

impl DbFile for MockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        (*self.fs)
            .borrow_mut()
            .write(self.file_id, self.idx, buf.to_vec())?;
        self.idx += buf.len();

        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        (*self.fs).borrow_mut().sync(self.file_id)
    }

    fn map(&self) -> io::Result<FileBytes> {
        Ok(FileBytes::Owned(self.read_all()))
    }
}

/// In-memory directory for tests. Clones share the same filesystem.
#[derive(Clone, Debug)]
pub struct MockDir {
    pub fs: Rc<RefCell<MockFs>>,
}

impl Default for MockDir {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDir {
    pub fn new() -> Self {
        MockDir {
            fs: Rc::new(RefCell::new(MockFs::new())),
        }
    }

    /// The current (unsynced) contents of a file, if it exists.
    pub fn contents<P>(&self, fname: &P) -> Option<Vec<u8>>
    where
        P: AsRef<Path> + ?Sized,
    {
        let fs = (*self.fs).borrow();
        let id = *fs.names.get(&path_string(fname))?;
        Some(fs.data[id].unsynced.clone())
    }

    pub fn take_events(&self) -> Vec<Event> {
        (*self.fs).borrow_mut().take_events()
    }

    pub fn schedule_crash(&self, ops: usize) {
        (*self.fs).borrow_mut().schedule_crash(ops)
    }

    pub fn schedule_disk_full(&self, writes: usize) {
        (*self.fs).borrow_mut().schedule_disk_full(writes)
    }

    pub fn reboot(&self) {
        (*self.fs).borrow_mut().reboot()
    }
}

fn path_string<P>(p: &P) -> String
where
    P: AsRef<Path> + ?Sized,
{
    p.as_ref().to_string_lossy().into_owned()
}

impl DbDir for MockDir {
    type DbFile = MockFile;

    fn unlink<P>(&mut self, fname: &P) -> io::Result<bool>
    where
        P: AsRef<Path> + ?Sized,
    {
        (*self.fs).borrow_mut().unlink(&path_string(fname))
    }

    fn ls(&mut self) -> io::Result<Vec<String>> {
        let mut fs = (*self.fs).borrow_mut();
        let mut fnames: Vec<String> = fs.names.keys().cloned().collect();
        fnames.sort();
        fs.record(Event::Ls(fnames.clone()));
        Ok(fnames)
    }

    fn exists<P>(&self, fname: &P) -> bool
    where
        P: AsRef<Path> + ?Sized,
    {
        (*self.fs).borrow().names.contains_key(&path_string(fname))
    }

    fn create<P>(&mut self, fname: &P) -> io::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path> + ?Sized,
    {
        Ok((*self.fs)
            .borrow_mut()
            .create(path_string(fname))?
            .map(|file_id| MockFile {
                fs: self.fs.clone(),
                file_id,
                idx: 0,
            }))
    }

    fn open<P>(&mut self, fname: &P) -> io::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path> + ?Sized,
    {
        Ok((*self.fs)
            .borrow_mut()
            .open(path_string(fname))
            .map(|file_id| MockFile {
                fs: self.fs.clone(),
                file_id,
                idx: 0,
            }))
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> io::Result<()>
    where
        P: AsRef<Path> + ?Sized,
        Q: AsRef<Path> + ?Sized,
    {
        (*self.fs)
            .borrow_mut()
            .rename(path_string(from), path_string(to))
    }
}

type FileId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(String, FileId),
    Write(FileId, usize, Vec<u8>),
    Sync(FileId),
    Rename(String, String),
    Unlink(String),
    Open(String),
    Ls(Vec<String>),
}

impl Event {
    pub fn write_abbrev<W: std::fmt::Write>(&self, w: &mut W) -> std::fmt::Result {
        match self {
            Event::Create(name, file_id) => write!(w, "Create({}, {})", name, file_id),
            // Contents are elided, they depend on the table layout.
            Event::Write(file_id, idx, contents) => {
                write!(w, "Write({}, {}, {} bytes)", file_id, idx, contents.len())
            }
            Event::Sync(file_id) => write!(w, "Sync({})", file_id),
            Event::Rename(from, to) => write!(w, "Rename({}, {})", from, to),
            Event::Unlink(name) => write!(w, "Unlink({})", name),
            Event::Open(name) => write!(w, "Open({})", name),
            Event::Ls(names) => write!(w, "Ls() -> {:?}", names),
        }
    }
}

#[derive(Debug)]
pub struct MockFs {
    names: HashMap<String, FileId>,
    data: Vec<MockData>,
    events: Vec<Event>,

    // After this many "things happen," "crash" the FS, meaning stop accepting
    // writes and discard any unsynced data.
    time_to_crash: Option<usize>,

    // After this many more writes, every write fails until reboot.
    writes_until_full: Option<usize>,
}

impl MockFs {
    fn new() -> Self {
        MockFs {
            names: HashMap::new(),
            data: Vec::new(),
            events: Vec::new(),
            time_to_crash: None,
            writes_until_full: None,
        }
    }

    fn check_crashed(&self) -> io::Result<()> {
        if self.time_to_crash == Some(0) {
            Err(io::Error::new(io::ErrorKind::Other, "filesystem is down"))
        } else {
            Ok(())
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    pub fn schedule_disk_full(&mut self, writes: usize) {
        self.writes_until_full = Some(writes);
    }

    // Discard all unsynced state, become uncrashed.
    pub fn reboot(&mut self) {
        for f in self.data.iter_mut() {
            f.unsynced.clear();
            f.unsynced.extend(&f.synced);
        }
        self.time_to_crash = None;
        self.writes_until_full = None;
    }

    fn perform_op(&mut self) -> io::Result<()> {
        self.check_crashed()?;
        if let Some(x) = self.time_to_crash {
            self.time_to_crash = Some(x - 1);
        }
        Ok(())
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn create(&mut self, path: String) -> io::Result<Option<FileId>> {
        self.perform_op()?;

        if self.names.contains_key(&path) {
            return Ok(None);
        }
        let id = self.data.len();
        self.record(Event::Create(path.clone(), id));
        self.names.insert(path, id);
        self.data.push(MockData::default());

        Ok(Some(id))
    }

    fn unlink(&mut self, path: &str) -> io::Result<bool> {
        self.perform_op()?;

        self.record(Event::Unlink(path.to_owned()));
        Ok(self.names.remove(path).is_some())
    }

    fn open(&mut self, path: String) -> Option<FileId> {
        self.record(Event::Open(path.clone()));
        self.names.get(&path).cloned()
    }

    fn rename(&mut self, from: String, to: String) -> io::Result<()> {
        self.perform_op()?;

        self.record(Event::Rename(from.clone(), to.clone()));

        match self.names.remove(&from) {
            Some(d) => {
                self.names.insert(to, d);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", from),
            )),
        }
    }

    fn write(&mut self, file: FileId, idx: usize, data: Vec<u8>) -> io::Result<()> {
        self.perform_op()?;

        match self.writes_until_full {
            Some(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "no space left on device",
                ))
            }
            Some(x) => self.writes_until_full = Some(x - 1),
            None => {}
        }

        let contents = &mut self.data[file].unsynced;
        if contents.len() < idx + data.len() {
            contents.resize(idx + data.len(), 0);
        }
        contents[idx..idx + data.len()].copy_from_slice(&data);

        self.record(Event::Write(file, idx, data));
        Ok(())
    }

    fn sync(&mut self, file: FileId) -> io::Result<()> {
        self.perform_op()?;

        self.record(Event::Sync(file));
        let d = &mut self.data[file];
        d.synced = d.unsynced.clone();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_file() -> anyhow::Result<()> {
        let mut dir = MockDir::new();

        let mut a = dir.create("a")?.unwrap();

        a.write(&[1, 2, 3, 4])?;

        assert_eq!(Vec::<u8>::new(), a.read_all_synced());
        assert_eq!(vec![1, 2, 3, 4], a.read_all());

        a.sync()?;

        assert_eq!(vec![1, 2, 3, 4], a.read_all_synced());
        assert_eq!(vec![1, 2, 3, 4], a.read_all());

        // Overwriting a prefix keeps the tail.
        a.seek(io::SeekFrom::Start(0))?;
        a.write(&[9])?;
        assert_eq!(vec![9, 2, 3, 4], a.read_all());

        Ok(())
    }

    #[test]
    fn test_create_existing_returns_none() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        assert!(dir.create("a")?.is_some());
        assert!(dir.create("a")?.is_none());
        assert!(dir.exists("a"));
        assert!(dir.open("b")?.is_none());
        Ok(())
    }

    #[test]
    fn test_rename_replaces() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        dir.create("a")?.unwrap().write(b"old")?;
        dir.create("a.tmp")?.unwrap().write(b"new")?;
        dir.rename("a.tmp", "a")?;
        assert_eq!(dir.contents("a"), Some(b"new".to_vec()));
        assert_eq!(dir.ls()?, vec!["a".to_owned()]);
        assert!(dir.rename("missing", "a").is_err());
        Ok(())
    }

    #[test]
    fn test_crash_discards_unsynced() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut a = dir.create("a")?.unwrap();
        a.write(b"kept")?;
        a.sync()?;
        dir.schedule_crash(1);
        a.write(b"lost")?;
        assert!(a.sync().is_err());
        assert!(dir.unlink("a").is_err());
        dir.reboot();
        assert_eq!(dir.contents("a"), Some(b"kept".to_vec()));
        Ok(())
    }

    #[test]
    fn test_disk_full() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut a = dir.create("a")?.unwrap();
        dir.schedule_disk_full(1);
        a.write(b"x")?;
        assert!(a.write(b"y").is_err());
        // Other operations keep working.
        assert!(dir.unlink("a")?);
        Ok(())
    }
}
