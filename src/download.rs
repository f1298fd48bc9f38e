//! Base image download.
//!
//! One attempt, no retries: a failed download aborts the pipeline and the
//! partial file is removed, so a later run never mistakes it for a complete
//! image.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Progress information for the download line.
#[derive(Debug, Clone)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: Option<u8>,
}

impl Progress {
    pub fn new(downloaded: u64, total: Option<u64>) -> Self {
        let percent = total.map(|t| {
            if t > 0 {
                ((downloaded.min(t) * 100) / t) as u8
            } else {
                0
            }
        });
        Self {
            downloaded,
            total,
            percent,
        }
    }

    /// Format as human-readable string
    pub fn display(&self) -> String {
        let downloaded_mb = self.downloaded as f64 / (1024.0 * 1024.0);
        match (self.total, self.percent) {
            (Some(total), Some(pct)) => {
                let total_mb = total as f64 / (1024.0 * 1024.0);
                format!("{:.1}/{:.1} MB ({}%)", downloaded_mb, total_mb, pct)
            }
            _ => format!("{:.1} MB", downloaded_mb),
        }
    }
}

/// Download `url` to `dest`, blocking until done.
pub fn fetch(url: &str, dest: &Path) -> Result<u64> {
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let partial = partial_path(dest);

    match rt.block_on(http(url, &partial)) {
        Ok(bytes) => {
            std::fs::rename(&partial, dest).with_context(|| {
                format!("Failed to move {} to {}", partial.display(), dest.display())
            })?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Stream an HTTP body into `dest`.
async fn http(url: &str, dest: &Path) -> Result<u64> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let client = reqwest::Client::builder()
        .user_agent(concat!("amberpack/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }

    let total_size = response.content_length();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = tokio::io::BufWriter::new(file);

    let mut downloaded = 0u64;
    let mut last_percent = 0u8;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to read chunk from {}", url))?;
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        downloaded += chunk.len() as u64;

        let progress = Progress::new(downloaded, total_size);
        if let Some(pct) = progress.percent {
            if pct > last_percent {
                print!("\r    {}", progress.display());
                use std::io::Write;
                std::io::stdout().flush().ok();
                last_percent = pct;
            }
        }
    }

    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;
    println!();

    if let Some(expected) = total_size {
        if downloaded != expected {
            bail!(
                "Download incomplete for {}: expected {} bytes, got {} bytes",
                url,
                expected,
                downloaded
            );
        }
    }

    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_display_with_total() {
        let p = Progress::new(512 * 1024 * 1024, Some(1024 * 1024 * 1024));
        assert_eq!(p.percent, Some(50));
        assert_eq!(p.display(), "512.0/1024.0 MB (50%)");
    }

    #[test]
    fn test_progress_display_unknown_total() {
        let p = Progress::new(3 * 1024 * 1024, None);
        assert_eq!(p.percent, None);
        assert_eq!(p.display(), "3.0 MB");
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/b/base.img.download")),
            PathBuf::from("/b/base.img.download.part")
        );
    }

    #[test]
    fn test_fetch_unreachable_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("base.img.download");
        // Port 9 on localhost is the discard service; nothing listens there on CI.
        let err = fetch("http://127.0.0.1:9/base.img.gz", &dest);
        assert!(err.is_err());
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }
}
