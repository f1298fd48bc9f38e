//! amberpack - AmberG350 image packager.
//!
//! Turns the distribution overlay into device images:
//! - `build`: the overlay alone as a SYSTEM squashfs archive
//! - `package-image`: the base image with the overlay merged into its SYSTEM

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use amberpack::commands;
use amberpack::config::Config;

#[derive(Parser)]
#[command(name = "amberpack")]
#[command(about = "AmberG350 image packager")]
#[command(
    after_help = "QUICK START:\n  amberpack preflight      Check host tools and configuration\n  amberpack build          Pack the overlay into output/SYSTEM\n  amberpack package-image  Merge the overlay into the base image\n  amberpack clean          Remove build artifacts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack the overlay into a standalone SYSTEM archive
    Build,

    /// Download the base image and merge the overlay into it (needs root)
    PackageImage {
        /// Keep an existing download instead of fetching the base image again
        #[arg(long)]
        reuse_download: bool,
    },

    /// Remove build artifacts, unmounting and detaching leftovers first
    Clean,

    /// Run `build` inside the build container
    Container {
        /// Container runtime (default: CONTAINER_RUNTIME or docker)
        #[arg(long)]
        runtime: Option<String>,
        /// Build image (default: CONTAINER_IMAGE)
        #[arg(long)]
        image: Option<String>,
    },

    /// Run preflight checks (verify host tools and configuration)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the superblock of a squashfs archive
    Archive {
        /// Archive to inspect (default: output/SYSTEM)
        path: Option<PathBuf>,
    },
    /// Show loop devices still bound to the build image
    Loops,
}

/// Project directory. Overridable so a relocated binary (e.g. inside the
/// build container) still finds `overlay/` and `.env`.
fn base_dir() -> PathBuf {
    std::env::var_os("AMBERPACK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = base_dir();

    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Build => {
            commands::cmd_build(&config)?;
        }

        Commands::PackageImage { reuse_download } => {
            commands::cmd_package_image(&config, reuse_download)?;
        }

        Commands::Clean => {
            commands::cmd_clean(&config);
        }

        Commands::Container { runtime, image } => {
            commands::cmd_container(&config, runtime.as_deref(), image.as_deref())?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Archive { path } => commands::show::ShowTarget::Archive(path),
                ShowTarget::Loops => commands::show::ShowTarget::Loops,
            };
            commands::cmd_show(show_target, &config)?;
        }
    }

    Ok(())
}
