use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use super::ExtractBackend;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
/// POSIX and GNU tar headers carry "ustar" at this offset
const USTAR_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";
const HEADER_LEN: usize = 512;

#[derive(Debug, PartialEq)]
enum Format {
    Zip,
    Tar,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

/// Last-resort reader for assets published under the wrong extension.
/// Detects zip, tar, and gzip/bzip2/xz/zstd streams by their leading bytes.
/// A compressed stream holding a tar is unpacked; anything else is written
/// out as a single file named after the archive.
pub struct BuiltinReader;

impl ExtractBackend for BuiltinReader {
    fn name(&self) -> &str {
        "builtin"
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let format = match sniff(archive)? {
            Some(format) => format,
            None => bail!("unrecognized archive format (expected zip, tar, gzip, bzip2, xz or zstd)"),
        };
        tracing::debug!(?format, archive = %archive.display(), "detected archive format");

        let open = || -> Result<BufReader<File>> {
            Ok(BufReader::new(File::open(archive).context("Failed to open archive")?))
        };
        match format {
            Format::Zip => extract_zip(archive, dest),
            Format::Tar => tar::Archive::new(open()?)
                .unpack(dest)
                .context("Failed to extract tar"),
            Format::Gzip => unpack_stream(GzDecoder::new(open()?), archive, dest),
            Format::Bzip2 => unpack_stream(bzip2::read::BzDecoder::new(open()?), archive, dest),
            Format::Xz => unpack_stream(xz2::read::XzDecoder::new(open()?), archive, dest),
            Format::Zstd => {
                let decoder = zstd::stream::read::Decoder::new(open()?)
                    .context("Failed to start zstd decoder")?;
                unpack_stream(decoder, archive, dest)
            }
        }
    }
}

fn sniff(archive: &Path) -> Result<Option<Format>> {
    let file = File::open(archive).context("Failed to open archive")?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .context("Failed to read archive header")?;

    let format = if header.starts_with(ZIP_MAGIC) || header.starts_with(ZIP_EMPTY_MAGIC) {
        Some(Format::Zip)
    } else if header.starts_with(GZIP_MAGIC) {
        Some(Format::Gzip)
    } else if header.starts_with(BZIP2_MAGIC) {
        Some(Format::Bzip2)
    } else if header.starts_with(XZ_MAGIC) {
        Some(Format::Xz)
    } else if header.starts_with(ZSTD_MAGIC) {
        Some(Format::Zstd)
    } else if is_tar_header(&header) {
        Some(Format::Tar)
    } else {
        None
    };
    Ok(format)
}

fn is_tar_header(header: &[u8]) -> bool {
    header
        .get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len())
        .is_some_and(|magic| magic == USTAR_MAGIC)
}

/// Unpack a decompressed stream: as a tar when it holds one, otherwise as a
/// single file named after the archive without its extension.
fn unpack_stream<R: Read>(mut stream: R, archive: &Path, dest: &Path) -> Result<()> {
    let mut head = Vec::with_capacity(HEADER_LEN);
    (&mut stream)
        .take(HEADER_LEN as u64)
        .read_to_end(&mut head)
        .context("Failed to decompress archive")?;
    let is_tar = is_tar_header(&head);
    let mut full = Cursor::new(head).chain(stream);

    if is_tar {
        tar::Archive::new(full)
            .unpack(dest)
            .context("Failed to extract compressed tar")?;
        return Ok(());
    }

    let name = archive
        .file_stem()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| OsStr::new("extracted_file"));
    let target = dest.join(name);
    let mut out = File::create(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    std::io::copy(&mut full, &mut out).context("Failed to decompress archive")?;
    Ok(())
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).context("Failed to open archive")?;
    let mut archive = zip::ZipArchive::new(file).context("Failed to read zip archive")?;

    archive.extract(dest_dir).context("Failed to extract zip")?;
    Ok(())
}
