//! Shared utilities across amberpack modules.

pub mod checksum;
pub mod files;
pub mod owner;
pub mod temp;

pub use checksum::{sha256_file, write_checksum_file};
pub use files::write_file_with_dirs;
pub use owner::restore_ownership;
pub use temp::prepare_work_dir;
