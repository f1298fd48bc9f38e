//! Squashfs superblock inspection.
//!
//! Only the fixed 96-byte header is read. It tells us which compressor and
//! block size the base image's archive was built with, so the repackaged
//! archive can match what the device's kernel is able to mount.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const SQUASHFS_MAGIC: u32 = 0x7371_7368;
const SUPERBLOCK_LEN: usize = 96;

/// Compressors understood by mksquashfs, keyed by superblock id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
}

impl Compressor {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(Self::Gzip),
            2 => Some(Self::Lzma),
            3 => Some(Self::Lzo),
            4 => Some(Self::Xz),
            5 => Some(Self::Lz4),
            6 => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gzip" => Some(Self::Gzip),
            "lzma" => Some(Self::Lzma),
            "lzo" => Some(Self::Lzo),
            "xz" => Some(Self::Xz),
            "lz4" => Some(Self::Lz4),
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Name as accepted by `mksquashfs -comp`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Lzma => "lzma",
            Self::Lzo => "lzo",
            Self::Xz => "xz",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fields of interest from a squashfs 4.x superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperblockInfo {
    pub inode_count: u32,
    pub block_size: u32,
    pub compressor: Compressor,
    pub version: (u16, u16),
    pub bytes_used: u64,
}

impl SuperblockInfo {
    /// Read the superblock of the archive at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut header = [0u8; SUPERBLOCK_LEN];
        file.read_exact(&mut header)
            .with_context(|| format!("{} is too short to be a squashfs archive", path.display()))?;
        Self::parse(&header).with_context(|| format!("Invalid squashfs archive {}", path.display()))
    }

    /// Parse a little-endian squashfs superblock.
    pub fn parse(header: &[u8]) -> Result<Self> {
        if header.len() < SUPERBLOCK_LEN {
            bail!("superblock truncated ({} bytes)", header.len());
        }
        let u16_at = |off: usize| u16::from_le_bytes([header[off], header[off + 1]]);
        let u32_at = |off: usize| {
            u32::from_le_bytes([header[off], header[off + 1], header[off + 2], header[off + 3]])
        };
        let u64_at = |off: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&header[off..off + 8]);
            u64::from_le_bytes(bytes)
        };

        let magic = u32_at(0);
        if magic != SQUASHFS_MAGIC {
            bail!("bad magic {:#010x}", magic);
        }

        let version = (u16_at(28), u16_at(30));
        if version.0 != 4 {
            bail!("unsupported squashfs version {}.{}", version.0, version.1);
        }

        let compressor_id = u16_at(20);
        let compressor = Compressor::from_id(compressor_id)
            .with_context(|| format!("unknown compressor id {}", compressor_id))?;

        let block_size = u32_at(12);
        let block_log = u16_at(22);
        if !block_size.is_power_of_two() || block_size.trailing_zeros() != u32::from(block_log) {
            bail!("block size {} does not match block_log {}", block_size, block_log);
        }

        Ok(Self {
            inode_count: u32_at(4),
            block_size,
            compressor,
            version,
            bytes_used: u64_at(40),
        })
    }

    /// Print the header for `show archive`.
    pub fn print(&self, path: &Path) {
        println!("Squashfs archive: {}", path.display());
        println!("  Version:    {}.{}", self.version.0, self.version.1);
        println!("  Compressor: {}", self.compressor);
        println!("  Block size: {}", format_block_size(self.block_size));
        println!("  Inodes:     {}", self.inode_count);
        println!("  Size:       {} bytes", self.bytes_used);
    }
}

/// Parse an mksquashfs block size ("131072", "128K", "1M") into bytes.
pub fn parse_block_size(value: &str) -> Result<u32> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last() {
        Some('K') | Some('k') => (&value[..value.len() - 1], 1024),
        Some('M') | Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        _ => (value, 1),
    };
    let number: u32 = digits
        .parse()
        .with_context(|| format!("Invalid block size '{}'", value))?;
    let bytes = number
        .checked_mul(multiplier)
        .with_context(|| format!("Block size '{}' is too large", value))?;
    // mksquashfs accepts 4K..1M, powers of two only.
    if !(4096..=1024 * 1024).contains(&bytes) || !bytes.is_power_of_two() {
        bail!("Block size '{}' must be a power of two between 4K and 1M", value);
    }
    Ok(bytes)
}

/// Render a block size the way mksquashfs accepts it.
pub fn format_block_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{}M", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{}K", bytes / 1024)
    } else {
        bytes.to_string()
    }
}

#[cfg(test)]
pub(crate) fn fake_superblock(compressor_id: u16, block_size: u32) -> [u8; SUPERBLOCK_LEN] {
    let mut sb = [0u8; SUPERBLOCK_LEN];
    sb[0..4].copy_from_slice(&SQUASHFS_MAGIC.to_le_bytes());
    sb[4..8].copy_from_slice(&42u32.to_le_bytes());
    sb[12..16].copy_from_slice(&block_size.to_le_bytes());
    sb[20..22].copy_from_slice(&compressor_id.to_le_bytes());
    sb[22..24].copy_from_slice(&(block_size.trailing_zeros() as u16).to_le_bytes());
    sb[28..30].copy_from_slice(&4u16.to_le_bytes());
    sb[40..48].copy_from_slice(&4096u64.to_le_bytes());
    sb
}
