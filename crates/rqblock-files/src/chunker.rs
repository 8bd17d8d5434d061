//! Block I/O at arbitrary offsets.
//!
//! [`BlockReader`] serves planned block spans of an input file to parallel
//! workers. [`BlockAssembler`] accepts reconstructed blocks in any order,
//! writes them into a temporary sibling of the output path and publishes the
//! finished file with a single rename. An assembler that is dropped before
//! [`BlockAssembler::finalize`] removes its temporary file, so a failed decode
//! never leaves a partial output behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rqblock_core::BlockSpan;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique temporary path in the same directory as `target`
///
/// Same-directory placement keeps the final rename atomic.
///
/// # Errors
///
/// Returns `InvalidInput` if `target` has no file name.
pub(crate) fn temp_sibling(target: &Path) -> io::Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", target.display()),
        )
    })?;
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(parent.join(format!(
        ".{}.{}-{}.partial",
        name.to_string_lossy(),
        std::process::id(),
        unique
    )))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Positional reader for block spans of one input file
pub struct BlockReader {
    file: Mutex<File>,
    total_size: u64,
}

impl BlockReader {
    /// Open a file for block reads
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or metadata cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            total_size,
        })
    }

    /// File size at open time
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Read the bytes of one span
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the span extends past the end of the file,
    /// or the underlying error if seeking or reading fails.
    pub fn read_span(&self, span: &BlockSpan) -> io::Result<Vec<u8>> {
        if span.end() > self.total_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Block {} ends at {} past file size {}",
                    span.block_id,
                    span.end(),
                    self.total_size
                ),
            ));
        }

        let len = usize::try_from(span.size).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "Block does not fit in memory")
        })?;
        let mut buffer = vec![0u8; len];

        let mut file = lock(&self.file);
        file.seek(SeekFrom::Start(span.offset))?;
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }
}

struct AssemblyState {
    /// `None` once finalized
    file: Option<File>,
    /// Bitmap tracking written blocks (bit = 1 means written)
    block_bitmap: Vec<u64>,
    /// Count of written blocks (cached for O(1) access)
    received_count: u64,
}

/// Out-of-order writer for reconstructed blocks
///
/// Writes are positional and may come from several workers at once.
pub struct BlockAssembler {
    target: PathBuf,
    temp_path: PathBuf,
    spans: Vec<BlockSpan>,
    total_size: u64,
    state: Mutex<AssemblyState>,
    finalized: bool,
}

impl BlockAssembler {
    /// Create an assembler publishing to `target`
    ///
    /// `spans` must be in `block_id` order. The temporary file is
    /// pre-allocated to the total size.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created or sized.
    pub fn new<P: AsRef<Path>>(target: P, spans: Vec<BlockSpan>) -> io::Result<Self> {
        let target = target.as_ref().to_path_buf();
        let temp_path = temp_sibling(&target)?;
        let total_size = spans.last().map_or(0, BlockSpan::end);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        if let Err(e) = file.set_len(total_size) {
            drop(file);
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        let bitmap_words = (spans.len() as u64).div_ceil(64) as usize;

        Ok(Self {
            target,
            temp_path,
            spans,
            total_size,
            state: Mutex::new(AssemblyState {
                file: Some(file),
                block_bitmap: vec![0u64; bitmap_words],
                received_count: 0,
            }),
            finalized: false,
        })
    }

    /// Size of the assembled file
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of blocks expected
    #[must_use]
    fn total_blocks(&self) -> u64 {
        self.spans.len() as u64
    }

    /// Write one block at its planned offset
    ///
    /// Writing the same block twice overwrites it and counts once.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the block id is unknown or `data` does not
    /// match the planned size, or the underlying error if writing fails.
    pub fn write_block(&self, block_id: u64, data: &[u8]) -> io::Result<()> {
        let span = usize::try_from(block_id)
            .ok()
            .and_then(|index| self.spans.get(index))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "Block index out of bounds")
            })?;

        if data.len() as u64 != span.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Block {block_id} is {} bytes, expected {}",
                    data.len(),
                    span.size
                ),
            ));
        }

        let mut state = lock(&self.state);
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("Assembler already finalized"))?;
        file.seek(SeekFrom::Start(span.offset))?;
        file.write_all(data)?;

        if !bitmap_test(&state.block_bitmap, block_id) {
            bitmap_set(&mut state.block_bitmap, block_id);
            state.received_count += 1;
        }

        Ok(())
    }

    /// Block ids not yet written, ascending
    fn missing_blocks(&self) -> Vec<u64> {
        let state = lock(&self.state);
        let total = self.total_blocks();
        let mut missing = Vec::with_capacity((total - state.received_count) as usize);

        for (word_idx, &word) in state.block_bitmap.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            let mut unset = !word;
            while unset != 0 {
                let bit = u64::from(unset.trailing_zeros());
                let block_id = (word_idx as u64) * 64 + bit;
                if block_id < total {
                    missing.push(block_id);
                }
                unset &= unset - 1;
            }
        }

        missing
    }

    fn is_complete(&self) -> bool {
        lock(&self.state).received_count == self.total_blocks()
    }

    /// Sync the assembled file and rename it onto the target path
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` naming the unwritten blocks if any are missing,
    /// or the underlying error if syncing or renaming fails. The temporary
    /// file is removed on failure.
    pub fn finalize(mut self) -> io::Result<()> {
        if !self.is_complete() {
            let missing = self.missing_blocks();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Assembly incomplete: {} of {} blocks never written ({})",
                    missing.len(),
                    self.total_blocks(),
                    describe_block_ids(&missing)
                ),
            ));
        }

        if let Some(file) = lock(&self.state).file.take() {
            file.sync_all()?;
        }
        fs::rename(&self.temp_path, &self.target)?;
        self.finalized = true;

        tracing::debug!(
            "Assembled {} ({} bytes, {} blocks)",
            self.target.display(),
            self.total_size,
            self.spans.len()
        );
        Ok(())
    }
}

/// Render block ids for an error message, eliding long lists
fn describe_block_ids(ids: &[u64]) -> String {
    const SHOWN: usize = 8;
    let mut listed = ids
        .iter()
        .take(SHOWN)
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if ids.len() > SHOWN {
        listed.push_str(&format!(", ... {} more", ids.len() - SHOWN));
    }
    listed
}

impl Drop for BlockAssembler {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        lock(&self.state).file.take();
        if let Err(e) = fs::remove_file(&self.temp_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(
                "Failed to remove partial output {}: {}",
                self.temp_path.display(),
                e
            );
        }
    }
}

fn bitmap_set(bitmap: &mut [u64], idx: u64) {
    let word = (idx / 64) as usize;
    bitmap[word] |= 1u64 << (idx % 64);
}

fn bitmap_test(bitmap: &[u64], idx: u64) -> bool {
    let word = (idx / 64) as usize;
    (bitmap[word] >> (idx % 64)) & 1 == 1
}
