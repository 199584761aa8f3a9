//! A persistent key-value store on top of a constant database (CDB) file.
//!
//! The file is only ever read in place and replaced as a whole: changes are
//! kept in memory until a save writes a new file beside the old one and
//! renames it over it. See [`Store`].

pub mod config;
pub mod encoding;
pub mod error;
pub mod fs;
pub mod store;
pub mod substrate;

pub use config::StoreConfig;
pub use encoding::{BytesKeys, DefaultValues, KeyCodec, StringKeys, Value, ValueCodec};
pub use error::{Error, Result};
pub use store::{CdbStore, Store, StringKeyStore};
