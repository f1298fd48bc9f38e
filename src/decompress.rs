//! Base image decompression and deliverable compression.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Compression format of a downloaded image, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
    None,
}

/// Detect compression from the first bytes of a file.
pub fn detect_compression(path: &Path) -> Result<Compression> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut magic = [0u8; 4];
    let n = file
        .read(&mut magic)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(detect_compression_magic(&magic[..n]))
}

/// Detect compression from magic bytes.
pub fn detect_compression_magic(magic: &[u8]) -> Compression {
    if magic.starts_with(&[0x1f, 0x8b]) {
        Compression::Gzip
    } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        Compression::Zstd
    } else {
        Compression::None
    }
}

/// Decompress a downloaded image into `dest`.
///
/// The input must be gzip or zstd; anything else is rejected rather than
/// copied through, since the download URL always points at a compressed
/// release image. Returns the decompressed size in bytes.
pub fn decompress_image(src: &Path, dest: &Path) -> Result<u64> {
    let compression = detect_compression(src)?;
    let input = BufReader::new(
        File::open(src).with_context(|| format!("Failed to open {}", src.display()))?,
    );

    let mut reader: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(input)),
        Compression::Zstd => Box::new(
            zstd::stream::read::Decoder::new(input).context("Failed to create zstd decoder")?,
        ),
        Compression::None => bail!(
            "{} is not a gzip or zstd compressed image",
            src.display()
        ),
    };

    let partial = with_suffix(dest, ".part");
    let result = (|| -> Result<u64> {
        let mut output = BufWriter::new(
            File::create(&partial)
                .with_context(|| format!("Failed to create {}", partial.display()))?,
        );
        let bytes = io::copy(&mut reader, &mut output)
            .with_context(|| format!("Failed to decompress {}", src.display()))?;
        output
            .flush()
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        Ok(bytes)
    })();

    match result {
        Ok(bytes) => {
            fs::rename(&partial, dest).with_context(|| {
                format!("Failed to move {} to {}", partial.display(), dest.display())
            })?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

/// Write a gzip-compressed copy of `src` to `dest`.
pub fn gzip_file(src: &Path, dest: &Path) -> Result<u64> {
    let mut input = BufReader::new(
        File::open(src).with_context(|| format!("Failed to open {}", src.display()))?,
    );
    let output = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut encoder = flate2::write::GzEncoder::new(BufWriter::new(output), flate2::Compression::default());
    io::copy(&mut input, &mut encoder)
        .with_context(|| format!("Failed to compress {}", src.display()))?;
    let mut writer = encoder
        .finish()
        .with_context(|| format!("Failed to finish {}", dest.display()))?;
    writer.flush()?;
    Ok(fs::metadata(dest)?.len())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
