//! Content-addressed symbol directory.
//!
//! Every symbol is stored as one file whose name is the lowercase hex BLAKE3
//! digest of its bytes. Reads re-hash the content, so a truncated or altered
//! symbol file is reported as corrupt instead of being fed to the codec.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rqblock_core::{EngineError, Result};

/// Length of a symbol identifier in hex characters
pub const SYMBOL_ID_LEN: usize = blake3::OUT_LEN * 2;

/// Content identifier of a symbol
#[must_use]
pub fn symbol_id(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Check that `id` is a well-formed identifier
///
/// Well-formed identifiers are exactly 64 lowercase hex characters, which also
/// guarantees they are plain file names.
#[must_use]
pub fn is_valid_symbol_id(id: &str) -> bool {
    id.len() == SYMBOL_ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Outcome of looking up one symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolLookup {
    /// Symbol present and intact
    Found(Vec<u8>),
    /// No file for this identifier
    Missing,
    /// File present but its content hashes to `actual`
    Corrupt {
        /// Identifier of the bytes actually on disk
        actual: String,
    },
}

/// A directory of symbol files
#[derive(Debug, Clone)]
pub struct SymbolStore {
    dir: PathBuf,
}

impl SymbolStore {
    /// Open a store for writing, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPath`] if `dir` exists and is not a
    /// directory, or [`EngineError::Io`] if it cannot be created.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.exists() && !dir.is_dir() {
            return Err(EngineError::InvalidPath(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Open an existing store for reading
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if `dir` does not exist and
    /// [`EngineError::InvalidPath`] if it is not a directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Err(EngineError::NotFound(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(EngineError::InvalidPath(dir.to_path_buf()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Store directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path of a symbol
    #[must_use]
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    /// Write a symbol and return its identifier
    ///
    /// Writing identical bytes twice is harmless: both land in the same file.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the file cannot be written.
    pub fn write(&self, bytes: &[u8]) -> io::Result<String> {
        let id = symbol_id(bytes);
        fs::write(self.path_for(&id), bytes)?;
        Ok(id)
    }

    /// Check if a symbol file exists
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        is_valid_symbol_id(id) && self.path_for(id).is_file()
    }

    /// Read a symbol and verify it against its identifier
    ///
    /// Malformed identifiers are reported as [`SymbolLookup::Missing`].
    ///
    /// # Errors
    ///
    /// Returns the underlying error for failures other than a missing file.
    pub fn read(&self, id: &str) -> io::Result<SymbolLookup> {
        if !is_valid_symbol_id(id) {
            return Ok(SymbolLookup::Missing);
        }

        let bytes = match fs::read(self.path_for(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SymbolLookup::Missing),
            Err(e) => return Err(e),
        };

        let actual = symbol_id(&bytes);
        if actual == id {
            Ok(SymbolLookup::Found(bytes))
        } else {
            Ok(SymbolLookup::Corrupt { actual })
        }
    }
}
