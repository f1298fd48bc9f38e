//! amberpack library exports.
//!
//! The binary is a thin clap layer over [`commands`]; everything else is
//! public so integration tests can drive the pieces directly.

pub mod build;
pub mod clean;
pub mod commands;
pub mod common;
pub mod config;
pub mod decompress;
pub mod download;
pub mod layout;
pub mod loopdev;
pub mod overlay;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod squashfs;
pub mod timing;
