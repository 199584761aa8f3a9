use std::{
    fs::{self, File, OpenOptions},
    io::{self, Seek, Write},
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use super::{DbDir, DbFile, FileBytes};

/// A directory on the real filesystem.
#[derive(Clone, Debug)]
pub struct OsDir {
    root: PathBuf,
}

impl OsDir {
    pub fn new<P>(root: P) -> Self
    where
        P: Into<PathBuf>,
    {
        OsDir { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path<P>(&self, fname: &P) -> PathBuf
    where
        P: AsRef<Path> + ?Sized,
    {
        self.root.join(fname)
    }

    // Make a rename durable. Not possible on every platform.
    fn sync_dir(&self) -> io::Result<()> {
        #[cfg(unix)]
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct OsFile {
    file: File,
}

impl Seek for OsFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl DbFile for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }

    fn map(&self) -> io::Result<FileBytes> {
        // Mapping a zero-length file fails on some platforms.
        if self.file.metadata()?.len() == 0 {
            return Ok(FileBytes::Owned(Vec::new()));
        }
        // SAFETY: tables are never modified in place; a save writes a new
        // file and renames it over the old one, so the mapped inode is
        // immutable for as long as the map lives.
        let map = unsafe { Mmap::map(&self.file)? };
        Ok(FileBytes::Mapped(map))
    }
}

impl DbDir for OsDir {
    type DbFile = OsFile;

    fn unlink<P>(&mut self, fname: &P) -> io::Result<bool>
    where
        P: AsRef<Path> + ?Sized,
    {
        match fs::remove_file(self.path(fname)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn ls(&mut self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn exists<P>(&self, fname: &P) -> bool
    where
        P: AsRef<Path> + ?Sized,
    {
        self.path(fname).exists()
    }

    fn create<P>(&mut self, fname: &P) -> io::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path> + ?Sized,
    {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(self.path(fname))
        {
            Ok(file) => Ok(Some(OsFile { file })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn open<P>(&mut self, fname: &P) -> io::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path> + ?Sized,
    {
        match File::open(self.path(fname)) {
            Ok(file) => Ok(Some(OsFile { file })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> io::Result<()>
    where
        P: AsRef<Path> + ?Sized,
        Q: AsRef<Path> + ?Sized,
    {
        fs::rename(self.path(from), self.path(to))?;
        self.sync_dir()
    }
}
