use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Read the package name from a crate's Cargo.toml
pub fn crate_name(crate_path: &Path) -> Result<String> {
    let cargo_toml_path = crate_path.join("Cargo.toml");
    let content = std::fs::read_to_string(&cargo_toml_path)
        .with_context(|| format!("Failed to read {:?}", cargo_toml_path))?;

    let parsed: toml::Value = toml::from_str(&content).context("Failed to parse Cargo.toml")?;

    parsed
        .get("package")
        .and_then(|package| package.get("name"))
        .and_then(|name| name.as_str())
        .map(String::from)
        .context("Could not find package name in Cargo.toml")
}

/// File stem cargo gives the compiled library
pub fn wasm_file_stem(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}

#[derive(Deserialize)]
struct CargoMetadata {
    target_directory: PathBuf,
}

/// Where cargo puts the crate's build output. Follows workspaces and
/// `CARGO_TARGET_DIR`; falls back to `<crate>/target` if cargo can't say.
pub fn cargo_target_dir(crate_dir: &Path) -> Result<PathBuf> {
    let manifest = crate_dir.join("Cargo.toml");
    let output = Command::new("cargo")
        .arg("metadata")
        .arg("--format-version=1")
        .arg("--no-deps")
        .arg("--manifest-path")
        .arg(&manifest)
        .output()
        .context("Failed to run cargo metadata")?;

    let fallback = crate_dir.join("target");
    if !output.status.success() {
        log::warn!(
            "cargo metadata failed for {:?}, assuming {:?}",
            manifest,
            fallback
        );
        return Ok(fallback);
    }

    match parse_target_dir(&output.stdout) {
        Ok(dir) => Ok(dir),
        Err(err) => {
            log::warn!("{:#}, assuming {:?}", err, fallback);
            Ok(fallback)
        }
    }
}

fn parse_target_dir(metadata: &[u8]) -> Result<PathBuf> {
    let metadata: CargoMetadata =
        serde_json::from_slice(metadata).context("Unreadable cargo metadata")?;
    Ok(metadata.target_directory)
}

/// Directory cargo writes a profile's artifacts to
pub fn profile_dir(cargo_profile: &str) -> &str {
    // The dev profile is written to target/<triple>/debug
    if cargo_profile == "dev" {
        "debug"
    } else {
        cargo_profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_name_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"game-of-life\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        let name = crate_name(dir.path()).unwrap();
        assert_eq!(name, "game-of-life");
        assert_eq!(wasm_file_stem(&name), "game_of_life");
    }

    #[test]
    fn test_virtual_manifest_has_no_crate_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"conway\"]\n",
        )
        .unwrap();

        assert!(crate_name(dir.path()).is_err());
    }

    #[test]
    fn test_profile_dir() {
        assert_eq!(profile_dir("dev"), "debug");
        assert_eq!(profile_dir("release"), "release");
        assert_eq!(profile_dir("wasm-debug"), "wasm-debug");
    }

    #[test]
    fn test_target_dir_from_metadata() {
        let metadata = br#"{"packages":[],"target_directory":"/work/target","version":1}"#;
        assert_eq!(
            parse_target_dir(metadata).unwrap(),
            PathBuf::from("/work/target")
        );
        assert!(parse_target_dir(br#"{"packages":[]}"#).is_err());
    }
}
