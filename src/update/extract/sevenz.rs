use anyhow::{anyhow, Result};
use std::path::Path;

use super::ExtractBackend;

/// In-process 7z reader. Handles LZMA/LZMA2 packages; some filters (BCJ2)
/// are not supported and fall through to the external archiver.
pub struct SevenZipReader;

impl ExtractBackend for SevenZipReader {
    fn name(&self) -> &str {
        "sevenz"
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        sevenz_rust::decompress_file(archive, dest)
            .map_err(|e| anyhow!("7z read failed: {}", e))
    }
}
