//! Container command - runs `build` inside the build image.
//!
//! The project directory and the running executable are bind-mounted, so
//! the container only has to provide squashfs-tools and rsync.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::process::{self, Cmd};

/// Where the project is mounted inside the container.
const CONTAINER_ROOT: &str = "/work";
const CONTAINER_EXE: &str = "/usr/local/bin/amberpack";

/// Execute the container command.
pub fn cmd_container(config: &Config, runtime: Option<&str>, image: Option<&str>) -> Result<()> {
    let runtime = runtime.unwrap_or(&config.container_runtime);
    let image = image.unwrap_or(&config.container_image);

    if !process::exists(runtime) {
        anyhow::bail!(
            "Container runtime '{}' not found. Install it or set CONTAINER_RUNTIME.",
            runtime
        );
    }

    ensure_image(runtime, image, &config.base_dir)?;

    let exe = std::env::current_exe().context("resolving amberpack executable path")?;
    println!("=== Building in {} ({}) ===", image, runtime);
    Cmd::new(runtime)
        .args(run_args(&config.base_dir, &exe, image, process::invoking_user()))
        .error_msg(format!("{} run failed", runtime))
        .run_interactive()?;
    Ok(())
}

/// Build the image from the project's Dockerfile if the runtime lacks it.
fn ensure_image(runtime: &str, image: &str, base_dir: &Path) -> Result<()> {
    let present = Cmd::new(runtime)
        .args(["image", "inspect", image])
        .allow_fail()
        .run()?
        .success();
    if present {
        return Ok(());
    }

    let dockerfile = base_dir.join("Dockerfile");
    if !dockerfile.is_file() {
        anyhow::bail!(
            "Image '{}' not found and no Dockerfile in {}",
            image,
            base_dir.display()
        );
    }

    println!("Building container image {}...", image);
    Cmd::new(runtime)
        .args(["build", "-t", image, "-f"])
        .arg_path(&dockerfile)
        .arg_path(base_dir)
        .error_msg(format!("Failed to build container image {}", image))
        .run_interactive()?;
    Ok(())
}

/// `<runtime> run` arguments for an overlay build of `base_dir`.
fn run_args(base_dir: &Path, exe: &Path, image: &str, user: (u32, u32)) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{}", base_dir.display(), CONTAINER_ROOT),
        "-v".to_string(),
        format!("{}:{}:ro", exe.display(), CONTAINER_EXE),
        "-w".to_string(),
        CONTAINER_ROOT.to_string(),
        "-e".to_string(),
        format!("AMBERPACK_ROOT={}", CONTAINER_ROOT),
        "--user".to_string(),
        format!("{}:{}", user.0, user.1),
        image.to_string(),
        CONTAINER_EXE.to_string(),
        "build".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = run_args(
            Path::new("/home/dev/amber"),
            Path::new("/home/dev/.cargo/bin/amberpack"),
            "amberpack-build:latest",
            (1000, 1000),
        );
        assert_eq!(args[..2], ["run", "--rm"]);
        assert!(args.contains(&"/home/dev/amber:/work".to_string()));
        assert!(args.contains(&"/home/dev/.cargo/bin/amberpack:/usr/local/bin/amberpack:ro".to_string()));
        assert!(args.contains(&"AMBERPACK_ROOT=/work".to_string()));
        assert!(args.contains(&"1000:1000".to_string()));
        assert_eq!(
            args[args.len() - 3..],
            ["amberpack-build:latest", "/usr/local/bin/amberpack", "build"]
        );
    }

    #[test]
    fn test_missing_runtime_is_reported() {
        let config = Config::from_vars(Path::new("/x"), &Default::default());
        let err = cmd_container(&config, Some("no-such-runtime-12345"), None).unwrap_err();
        assert!(err.to_string().contains("no-such-runtime-12345"));
    }
}
