//! Page storage layer for the Hilbert tree.
//!
//! A page store hands out monotonically increasing page ids and reads/writes
//! fixed-size blocks. It is the only I/O boundary of a tree: every read and
//! write touches exactly one page, nothing is preloaded.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::tree_constants::PAGE_SIZE;
use super::tree_types::{IndexError, IndexResult, PageId};

/// Fixed-size block storage keyed by page id.
pub trait PageStore {
    /// Returns the next unused page id.
    fn allocate(&mut self) -> PageId;

    /// Writes `bytes` zero-padded to one full page, replacing prior content.
    fn write(&mut self, page_id: PageId, bytes: &[u8]) -> IndexResult<()>;

    /// Reads exactly one page.
    fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>>;

    /// True if the page has been written.
    fn contains(&self, page_id: PageId) -> bool;

    /// Id the next `allocate` call will hand out.
    fn next_page_id(&self) -> PageId;

    /// Directory backing this store, if any.
    fn directory(&self) -> Option<&Path>;
}

fn padded_page(page_id: PageId, bytes: &[u8]) -> IndexResult<Vec<u8>> {
    if bytes.len() > PAGE_SIZE {
        return Err(IndexError::InvalidOperation(format!(
            "Page {} payload too large: {} bytes (max {})",
            page_id,
            bytes.len(),
            PAGE_SIZE
        )));
    }
    let mut padded = bytes.to_vec();
    padded.resize(PAGE_SIZE, 0);
    Ok(padded)
}

// ============================================================================
// Disk Store
// ============================================================================

/// One file per page under a directory (`page_<id>.bin`).
pub struct DiskPageStore {
    directory: PathBuf,
    next_page_id: PageId,
}

impl DiskPageStore {
    const PREFIX: &'static str = "page_";
    const SUFFIX: &'static str = ".bin";

    /// Opens (creating if needed) the store rooted at `directory` and resumes
    /// id allocation after the highest existing page.
    pub fn open(directory: impl AsRef<Path>) -> IndexResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let mut next_page_id = 0;
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(page_id) = name.to_str().and_then(Self::parse_page_name) {
                next_page_id = next_page_id.max(page_id + 1);
            }
        }

        log::debug!(
            "Opened page store at {:?}, next page id {}",
            directory,
            next_page_id
        );
        Ok(Self {
            directory,
            next_page_id,
        })
    }

    fn parse_page_name(name: &str) -> Option<PageId> {
        name.strip_prefix(Self::PREFIX)?
            .strip_suffix(Self::SUFFIX)?
            .parse()
            .ok()
    }

    pub fn page_path(&self, page_id: PageId) -> PathBuf {
        self.directory
            .join(format!("{}{}{}", Self::PREFIX, page_id, Self::SUFFIX))
    }
}

impl PageStore for DiskPageStore {
    fn allocate(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }

    fn write(&mut self, page_id: PageId, bytes: &[u8]) -> IndexResult<()> {
        let padded = padded_page(page_id, bytes)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.page_path(page_id))?;
        file.write_all(&padded)?;
        if page_id >= self.next_page_id {
            self.next_page_id = page_id + 1;
        }
        Ok(())
    }

    fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>> {
        let mut file = File::open(self.page_path(page_id))?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn contains(&self, page_id: PageId) -> bool {
        self.page_path(page_id).is_file()
    }

    fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    fn directory(&self) -> Option<&Path> {
        Some(&self.directory)
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// Page store kept entirely in memory; nothing ever reaches the disk.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: HashMap<PageId, Vec<u8>>,
    next_page_id: PageId,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryPageStore {
    fn allocate(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }

    fn write(&mut self, page_id: PageId, bytes: &[u8]) -> IndexResult<()> {
        let padded = padded_page(page_id, bytes)?;
        self.pages.insert(page_id, padded);
        if page_id >= self.next_page_id {
            self.next_page_id = page_id + 1;
        }
        Ok(())
    }

    fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>> {
        self.pages.get(&page_id).cloned().ok_or_else(|| {
            IndexError::InvalidOperation(format!("Page {} was never written", page_id))
        })
    }

    fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    fn directory(&self) -> Option<&Path> {
        None
    }
}
