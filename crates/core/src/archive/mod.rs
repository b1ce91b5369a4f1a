//! Archive container IO: streaming walker over the input jar and the single-writer assembler.

pub mod assembler;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use zip::ZipArchive;

use crate::error::ArchiveOpenError;

pub use assembler::ArchiveAssembler;

/// Classification of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    BytecodeUnit,
    Resource,
    Directory,
}

impl EntryKind {
    pub fn classify(name: &str) -> Self {
        if name.ends_with('/') {
            EntryKind::Directory
        } else if name.ends_with(".class") {
            EntryKind::BytecodeUnit
        } else {
            EntryKind::Resource
        }
    }
}

/// One entry of the input container.
///
/// Only bytecode units carry their payload; resources and directories are copied raw by
/// the assembler straight from the source container, so the walker never reads them.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Position in the container's natural order.
    pub index: usize,
    pub name: String,
    pub kind: EntryKind,
    pub bytes: Vec<u8>,
}

/// An entry whose payload could not be read (corrupt compressed data, bad local header).
#[derive(Debug, Clone)]
pub struct EntryReadError {
    pub index: usize,
    pub name: String,
    pub message: String,
}

pub(crate) fn open_zip(path: &Path) -> Result<ZipArchive<BufReader<File>>, ArchiveOpenError> {
    let file = File::open(path)
        .map_err(|source| ArchiveOpenError::Io { path: path.to_path_buf(), source })?;
    ZipArchive::new(BufReader::new(file))
        .map_err(|source| ArchiveOpenError::Format { path: path.to_path_buf(), source })
}

/// Lazily enumerates the entries of an input container in its natural order.
pub struct ArchiveWalker {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    next: usize,
}

impl std::fmt::Debug for ArchiveWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWalker")
            .field("path", &self.path)
            .field("entries", &self.archive.len())
            .field("next", &self.next)
            .finish()
    }
}

impl ArchiveWalker {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveOpenError> {
        let path = path.as_ref().to_path_buf();
        let archive = open_zip(&path)?;
        Ok(Self { path, archive, next: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total number of entries in the container.
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    fn read_entry(&mut self, index: usize) -> Result<ArchiveEntry, EntryReadError> {
        let fail = |name: String, message: String| EntryReadError { index, name, message };
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| fail(format!("#{index}"), e.to_string()))?;
        let name = file.name().to_string();
        let kind = if file.is_dir() { EntryKind::Directory } else { EntryKind::classify(&name) };
        let mut bytes = Vec::new();
        if kind == EntryKind::BytecodeUnit {
            bytes.reserve(file.size() as usize);
            file.read_to_end(&mut bytes).map_err(|e| fail(name.clone(), e.to_string()))?;
        }
        Ok(ArchiveEntry { index, name, kind, bytes })
    }
}

impl Iterator for ArchiveWalker {
    type Item = Result<ArchiveEntry, EntryReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.archive.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.read_entry(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.archive.len() - self.next;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_entries_by_name() {
        assert_eq!(EntryKind::classify("a/b/C.class"), EntryKind::BytecodeUnit);
        assert_eq!(EntryKind::classify("META-INF/MANIFEST.MF"), EntryKind::Resource);
        assert_eq!(EntryKind::classify("a/b/"), EntryKind::Directory);
    }
}
