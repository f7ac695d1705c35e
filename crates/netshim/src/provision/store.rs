// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Numbered persistent blocks.
//!
//! Devices keep certificates and keys in small numbered storage blocks. On a
//! filesystem each block is a file `persistent-<nr>.dat` under one root
//! directory; [`MemoryStore`] keeps them in RAM for tests and for targets
//! that provision at startup.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Persistent block number.
pub type BlockNr = u16;

/// Block storage backend.
pub trait PersistentStore: Send + Sync {
    /// Read a block. `Ok(None)` if the block does not exist.
    fn load_block(&self, nr: BlockNr) -> io::Result<Option<Vec<u8>>>;

    fn save_block(&self, nr: BlockNr, data: &[u8]) -> io::Result<()>;

    /// Remove a block. Removing a missing block is not an error.
    fn delete_block(&self, nr: BlockNr) -> io::Result<()>;
}

// ============================================================================
// Directory-backed store
// ============================================================================

/// Blocks stored as files in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn block_path(&self, nr: BlockNr) -> PathBuf {
        self.root.join(format!("persistent-{nr}.dat"))
    }
}

impl PersistentStore for DirectoryStore {
    fn load_block(&self, nr: BlockNr) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.block_path(nr)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save_block(&self, nr: BlockNr, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.block_path(nr);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        log::debug!("[provision] saved block {} ({} bytes)", nr, data.len());
        Ok(())
    }

    fn delete_block(&self, nr: BlockNr) -> io::Result<()> {
        match fs::remove_file(self.block_path(nr)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Blocks kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: Mutex<HashMap<BlockNr, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(self, nr: BlockNr, data: impl Into<Vec<u8>>) -> Self {
        self.blocks.lock().insert(nr, data.into());
        self
    }
}

impl PersistentStore for MemoryStore {
    fn load_block(&self, nr: BlockNr) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blocks.lock().get(&nr).cloned())
    }

    fn save_block(&self, nr: BlockNr, data: &[u8]) -> io::Result<()> {
        self.blocks.lock().insert(nr, data.to_vec());
        Ok(())
    }

    fn delete_block(&self, nr: BlockNr) -> io::Result<()> {
        self.blocks.lock().remove(&nr);
        Ok(())
    }
}
