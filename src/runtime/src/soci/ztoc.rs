//! Table of contents (zTOC) for a gzip-compressed tar layer.
//!
//! A zTOC lists every entry in a layer with its offset in the uncompressed
//! stream, so a lazy loader can locate a file without unpacking the layer.
//! Decompression checkpoints are not recorded.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use soci_wrapper_core::error::{Result, SociError};
use tar::{Archive, EntryType};

/// zTOC format version written by this builder.
pub const ZTOC_VERSION: &str = "0.9";

/// One entry of the layer's tar stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Offset of the entry's data in the uncompressed tar stream
    pub uncompressed_offset: u64,
    pub uncompressed_size: u64,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_name: Option<String>,
}

/// Table of contents for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ztoc {
    pub version: String,
    pub build_tool_identifier: String,
    pub compressed_archive_size: u64,
    pub uncompressed_archive_size: u64,
    pub toc: Vec<FileMetadata>,
}

impl Ztoc {
    /// Serialized form stored as the zTOC blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Reader wrapper counting bytes read through it.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

fn entry_type_name(entry_type: EntryType) -> &'static str {
    match entry_type {
        EntryType::Regular | EntryType::Continuous => "reg",
        EntryType::Directory => "dir",
        EntryType::Symlink => "symlink",
        EntryType::Link => "hardlink",
        EntryType::Char => "char",
        EntryType::Block => "block",
        EntryType::Fifo => "fifo",
        _ => "other",
    }
}

fn build_err(layer: &str, e: impl std::fmt::Display) -> SociError {
    SociError::BuildError(format!("Failed to index layer {}: {}", layer, e))
}

/// Generate the zTOC of a gzip tar stream.
///
/// `layer` names the layer in error messages; `compressed_size` is recorded as-is.
pub fn generate<R: Read>(
    reader: R,
    layer: &str,
    compressed_size: u64,
    build_tool: &str,
) -> Result<Ztoc> {
    let counter = CountingReader {
        inner: GzDecoder::new(reader),
        count: 0,
    };
    let mut archive = Archive::new(counter);
    let mut toc = Vec::new();

    for entry in archive.entries().map_err(|e| build_err(layer, e))? {
        let entry = entry.map_err(|e| build_err(layer, e))?;
        let header = entry.header();

        let name = entry
            .path()
            .map_err(|e| build_err(layer, e))?
            .to_string_lossy()
            .into_owned();
        let link_name = entry
            .link_name()
            .map_err(|e| build_err(layer, e))?
            .map(|l| l.to_string_lossy().into_owned());

        toc.push(FileMetadata {
            name,
            entry_type: entry_type_name(header.entry_type()).to_string(),
            uncompressed_offset: entry.raw_file_position(),
            uncompressed_size: entry.size(),
            mode: header.mode().map_err(|e| build_err(layer, e))?,
            uid: header.uid().map_err(|e| build_err(layer, e))?,
            gid: header.gid().map_err(|e| build_err(layer, e))?,
            mtime: header.mtime().map_err(|e| build_err(layer, e))?,
            link_name,
        });
    }

    // Drain the end-of-archive padding so the uncompressed size is exact.
    let mut counter = archive.into_inner();
    io::copy(&mut counter, &mut io::sink()).map_err(|e| build_err(layer, e))?;

    Ok(Ztoc {
        version: ZTOC_VERSION.to_string(),
        build_tool_identifier: build_tool.to_string(),
        compressed_archive_size: compressed_size,
        uncompressed_archive_size: counter.count,
        toc,
    })
}

/// Generate the zTOC of a layer blob on disk.
pub fn generate_from_path(path: &Path, layer: &str, build_tool: &str) -> Result<Ztoc> {
    let file = File::open(path).map_err(|e| build_err(layer, e))?;
    let compressed_size = file.metadata().map_err(|e| build_err(layer, e))?.len();
    generate(io::BufReader::new(file), layer, compressed_size, build_tool)
}
