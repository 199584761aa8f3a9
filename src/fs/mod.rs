use std::{
    io::{self, Seek},
    ops::Deref,
    path::Path,
};

use memmap2::Mmap;

mod mock;
mod os;

pub use mock::{Event, MockDir, MockFile, MockFs};
pub use os::{OsDir, OsFile};

pub trait DbFile: std::fmt::Debug + Seek {
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;

    // The full current contents. Borrows into the returned value stay valid
    // only as long as it is alive.
    fn map(&self) -> io::Result<FileBytes>;
}

pub trait DbDir: Clone {
    type DbFile: DbFile;

    fn unlink<P>(&mut self, fname: &P) -> io::Result<bool>
    where
        P: AsRef<Path> + ?Sized;

    fn ls(&mut self) -> io::Result<Vec<String>>;

    fn exists<P>(&self, fname: &P) -> bool
    where
        P: AsRef<Path> + ?Sized;

    // Returns None if the file already exists.
    fn create<P>(&mut self, fname: &P) -> io::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path> + ?Sized;

    // Returns None if the file does not exist.
    fn open<P>(&mut self, fname: &P) -> io::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path> + ?Sized;

    // Replaces `to` if it exists.
    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> io::Result<()>
    where
        P: AsRef<Path> + ?Sized,
        Q: AsRef<Path> + ?Sized;
}

/// Read-only view of a file's bytes, either memory-mapped or copied.
#[derive(Debug)]
pub enum FileBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Mapped(m) => m,
            FileBytes::Owned(v) => v,
        }
    }
}
