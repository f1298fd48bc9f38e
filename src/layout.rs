//! Where every generated artifact lives.

use std::path::PathBuf;

use crate::config::Config;

/// Paths of the build directory and deliverables for one configuration.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    pub build_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Compressed base image as downloaded.
    pub download: PathBuf,
    /// Decompressed base image; the loop device is bound to this file.
    pub image: PathBuf,
    /// Mount point for the image's first partition.
    pub mount_dir: PathBuf,
    /// Extracted and merged root filesystem.
    pub rootfs: PathBuf,
    /// Copies of the critical paths taken before the overlay.
    pub backup_dir: PathBuf,
    /// Staging tree for the overlay-only build.
    pub overlay_staging: PathBuf,
    /// Repackaged archive that replaces the base image's.
    pub new_archive: PathBuf,
    /// Checksum companion written next to the new archive.
    pub new_archive_md5: PathBuf,
    /// Overlay-only archive.
    pub overlay_archive: PathBuf,
    /// Final disk image.
    pub final_image: PathBuf,
    pub final_image_checksum: PathBuf,
    pub final_image_gz: PathBuf,
}

impl BuildLayout {
    pub fn new(config: &Config) -> Self {
        let build_dir = config.build_dir.clone();
        let output_dir = config.output_dir.clone();
        let archive_name = archive_file_name(&config.system_archive);
        let final_image = output_dir.join(&config.image_name);

        Self {
            download: build_dir.join("base.img.download"),
            image: build_dir.join("base.img"),
            mount_dir: build_dir.join("mnt"),
            rootfs: build_dir.join("rootfs"),
            backup_dir: build_dir.join("backup"),
            overlay_staging: build_dir.join("overlay-staging"),
            new_archive: build_dir.join(&archive_name),
            new_archive_md5: build_dir.join(format!("{}.md5", archive_name)),
            overlay_archive: output_dir.join(&archive_name),
            final_image_checksum: with_suffix(&final_image, ".sha256"),
            final_image_gz: with_suffix(&final_image, ".gz"),
            final_image,
            build_dir,
            output_dir,
        }
    }

    /// Every deliverable outside the build directory.
    pub fn outputs(&self) -> [&PathBuf; 4] {
        [
            &self.overlay_archive,
            &self.final_image,
            &self.final_image_checksum,
            &self.final_image_gz,
        ]
    }
}

/// Last component of the archive path ("boot/SYSTEM" -> "SYSTEM").
fn archive_file_name(system_archive: &str) -> String {
    system_archive
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(crate::config::DEFAULT_SYSTEM_ARCHIVE)
        .to_string()
}

fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    #[test]
    fn test_layout_paths() {
        let config = Config::from_vars(Path::new("/p"), &HashMap::new());
        let layout = BuildLayout::new(&config);
        assert_eq!(layout.image, PathBuf::from("/p/build/base.img"));
        assert_eq!(layout.new_archive, PathBuf::from("/p/build/SYSTEM"));
        assert_eq!(layout.overlay_staging, PathBuf::from("/p/build/overlay-staging"));
        assert_eq!(layout.overlay_archive, PathBuf::from("/p/output/SYSTEM"));
        assert_eq!(
            layout.final_image_checksum,
            PathBuf::from("/p/output/AmberG350.img.sha256")
        );
        assert_eq!(layout.final_image_gz, PathBuf::from("/p/output/AmberG350.img.gz"));
    }

    #[test]
    fn test_nested_archive_name() {
        assert_eq!(archive_file_name("boot/SYSTEM"), "SYSTEM");
        assert_eq!(archive_file_name("/"), "SYSTEM");
    }
}
