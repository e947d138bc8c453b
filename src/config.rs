use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::build::profiles::{BuildTarget, Profile};

/// Which cargo profile the crate is compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

impl Mode {
    pub fn cargo_profile(&self) -> &'static str {
        match self {
            Self::Production => "release",
            Self::Development => "dev",
        }
    }
}

/// The external program that turns the crate into wasm plus a loader shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Toolchain {
    /// `wasm-pack build`
    #[default]
    WasmPack,
    /// `cargo build` followed by the `wasm-bindgen` CLI
    WasmBindgen,
}

/// Options handed to the compiler step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerOptions {
    /// Directory holding the crate's Cargo.toml
    pub crate_directory: PathBuf,
    /// Passed through to the toolchain, in order
    pub extra_args: Vec<String>,
    pub toolchain: Toolchain,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            crate_directory: PathBuf::from("."),
            extra_args: vec!["--no-typescript".to_string()],
            toolchain: Toolchain::default(),
        }
    }
}

/// Configuration for the build command
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root. Relative paths below are resolved against it.
    #[serde(skip)]
    pub root: PathBuf,
    pub entry: PathBuf,
    pub out_dir: PathBuf,
    /// Shared file stem of the emitted script and binary
    pub base_name: String,
    /// Where imports expect the toolchain output to live
    pub pkg_dir: PathBuf,
    pub profile: Profile,
    pub mode: Mode,
    pub compiler: CompilerOptions,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entry: PathBuf::from("./bootstrap.js"),
            out_dir: PathBuf::from("dist"),
            base_name: "conway".to_string(),
            pkg_dir: PathBuf::from("pkg"),
            profile: Profile::default(),
            mode: Mode::default(),
            compiler: CompilerOptions::default(),
        }
    }
}

/// Per-invocation overrides, the build's `(env, argv)`. Anything left unset
/// keeps the configured value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invocation {
    pub profile: Option<Profile>,
    pub mode: Option<Mode>,
}

impl BuildConfig {
    /// Load a TOML config file. The file's directory becomes the project root.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.base_name.is_empty() {
            anyhow::bail!("base_name must not be empty");
        }
        Ok(config)
    }

    pub fn apply(&mut self, invocation: &Invocation) {
        if let Some(profile) = invocation.profile {
            self.profile = profile;
        }
        if let Some(mode) = invocation.mode {
            self.mode = mode;
        }
    }

    pub fn entry_path(&self) -> PathBuf {
        self.root.join(&self.entry)
    }

    pub fn out_dir_path(&self) -> PathBuf {
        self.root.join(&self.out_dir)
    }

    pub fn crate_path(&self) -> PathBuf {
        self.root.join(&self.compiler.crate_directory)
    }

    /// The descriptor for the configured profile
    pub fn target(&self) -> BuildTarget {
        BuildTarget::new(
            self.profile,
            &self.entry_path(),
            &self.out_dir_path(),
            &self.base_name,
        )
    }
}
