//! Single writer of the output container.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::archive::open_zip;
use crate::error::{ArchiveOpenError, RunError};

const WRITE_BUFFER_SIZE: usize = 1 << 20;

/// Writes entries into the output container, in the order the caller feeds them.
///
/// Pass-through entries are copied raw (still compressed) from the source container, so their
/// bytes never change. Transformed units are compressed with a fixed timestamp so the output
/// only depends on the input and the transformation.
///
/// Entries go to a temporary file next to the output, renamed into place by
/// [`finish`](Self::finish); an assembler dropped before that leaves nothing behind.
pub struct ArchiveAssembler {
    source: ZipArchive<BufReader<File>>,
    writer: ZipWriter<BufWriter<NamedTempFile>>,
    output: PathBuf,
    written: HashSet<String>,
}

impl std::fmt::Debug for ArchiveAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveAssembler")
            .field("output", &self.output)
            .field("written", &self.written.len())
            .finish()
    }
}

/// Whether `output` names the same file as `input` (which must exist).
fn same_file(input: &Path, output: &Path) -> bool {
    let Ok(input) = input.canonicalize() else { return input == output };
    if let Ok(output) = output.canonicalize() {
        return input == output;
    }
    match (output.parent(), output.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            parent.canonicalize().map(|p| p.join(name) == input).unwrap_or(false)
        }
        _ => false,
    }
}

fn temp_output(dir: &Path) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".unravel-").suffix(".part");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    builder.tempfile_in(dir)
}

impl ArchiveAssembler {
    /// Re-open `input` for raw copies and prepare `output` (parent directories included).
    pub fn create(input: &Path, output: &Path) -> Result<Self, ArchiveOpenError> {
        if same_file(input, output) {
            return Err(ArchiveOpenError::SameAsInput(output.to_path_buf()));
        }
        let source = open_zip(input)?;
        let io_err = |source| ArchiveOpenError::Io { path: output.to_path_buf(), source };
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let file = temp_output(dir).map_err(io_err)?;
        let writer = ZipWriter::new(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));
        Ok(Self { source, writer, output: output.to_path_buf(), written: HashSet::new() })
    }

    /// Number of entries in the source container.
    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    /// Name of the source entry at `index`, read from the central directory.
    pub fn source_name(&mut self, index: usize) -> Result<String, RunError> {
        Ok(self.source.by_index_raw(index)?.name().to_string())
    }

    /// Whether an entry with this name was already written.
    pub fn contains(&self, name: &str) -> bool {
        self.written.contains(name)
    }

    /// Copy the source entry at `index` verbatim. Returns `false` (and writes nothing) if an
    /// entry with the same name was already written.
    pub fn copy_raw(&mut self, index: usize) -> Result<bool, RunError> {
        let file = self.source.by_index_raw(index)?;
        let name = file.name().to_string();
        if self.written.contains(&name) {
            return Ok(false);
        }
        self.writer.raw_copy_file(file)?;
        self.written.insert(name);
        Ok(true)
    }

    /// Write new contents for the source entry at `index`, under its original name.
    pub fn write_unit(&mut self, index: usize, bytes: &[u8]) -> Result<bool, RunError> {
        let (name, method) = {
            let file = self.source.by_index_raw(index)?;
            let method = match file.compression() {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            (file.name().to_string(), method)
        };
        if self.written.contains(&name) {
            return Ok(false);
        }
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(zip::DateTime::default());
        self.writer.start_file(name.as_str(), options)?;
        self.writer.write_all(bytes)?;
        self.written.insert(name);
        Ok(true)
    }

    /// Finalize the central directory and move the output into place.
    pub fn finish(self) -> Result<PathBuf, RunError> {
        let temp = self.writer.finish()?.into_inner().map_err(|e| e.into_error())?;
        temp.persist(&self.output).map_err(|e| e.error)?;
        Ok(self.output)
    }
}
