use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::manifest;
use super::profiles::paths;
use crate::config::{Mode, Toolchain};

/// What the compiler step is asked to produce
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Directory holding the crate's Cargo.toml
    pub crate_dir: &'a Path,
    /// Staging directory the toolchain writes into
    pub out_dir: &'a Path,
    /// File stem of the generated loader shim and wasm
    pub out_name: &'a str,
    pub extra_args: &'a [String],
    pub mode: Mode,
}

/// Compiled output sitting in the staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub dir: PathBuf,
    /// Host-language glue that loads and instantiates the wasm
    pub loader: PathBuf,
    pub wasm: PathBuf,
}

impl Artifact {
    /// Check that a toolchain run actually left both files behind.
    pub fn locate(dir: &Path, out_name: &str) -> Result<Self> {
        let loader = dir.join(paths::loader_shim(out_name));
        let wasm = dir.join(paths::compiled_wasm(out_name));

        for file in [&loader, &wasm] {
            if !file.is_file() {
                anyhow::bail!("Toolchain output not found at {:?}", file);
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            loader,
            wasm,
        })
    }
}

/// Turns a crate into a wasm artifact plus its loader shim
pub trait Compiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Artifact>;
}

pub fn for_toolchain(toolchain: Toolchain) -> Box<dyn Compiler> {
    match toolchain {
        Toolchain::WasmPack => Box::new(WasmPack),
        Toolchain::WasmBindgen => Box::new(WasmBindgen),
    }
}

/// `wasm-pack build --target web`
pub struct WasmPack;

impl WasmPack {
    fn args(request: &CompileRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            request.crate_dir.to_string_lossy().into_owned(),
            "--target".to_string(),
            "web".to_string(),
            "--out-dir".to_string(),
            request.out_dir.to_string_lossy().into_owned(),
            "--out-name".to_string(),
            request.out_name.to_string(),
        ];
        if request.mode == Mode::Development {
            args.push("--dev".to_string());
        }
        args.extend(request.extra_args.iter().cloned());
        args
    }
}

impl Compiler for WasmPack {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Artifact> {
        log::info!("  Running wasm-pack on {:?}...", request.crate_dir);

        let status = Command::new("wasm-pack")
            .args(Self::args(request))
            .status()
            .context("Failed to run wasm-pack")?;

        if !status.success() {
            anyhow::bail!("wasm-pack build failed");
        }

        Artifact::locate(request.out_dir, request.out_name)
    }
}

/// `cargo build --target wasm32-unknown-unknown` followed by `wasm-bindgen --target web`
pub struct WasmBindgen;

impl WasmBindgen {
    fn cargo_args(request: &CompileRequest<'_>) -> Vec<String> {
        let cargo_profile = match request.mode {
            Mode::Production => "--release".to_string(),
            mode => format!("--profile={}", mode.cargo_profile()),
        };
        vec![
            "build".to_string(),
            "--lib".to_string(),
            "--target".to_string(),
            "wasm32-unknown-unknown".to_string(),
            cargo_profile,
            "--manifest-path".to_string(),
            request.crate_dir.join("Cargo.toml").to_string_lossy().into_owned(),
        ]
    }

    fn bindgen_args(wasm_file: &Path, request: &CompileRequest<'_>) -> Vec<String> {
        let mut args = vec![
            wasm_file.to_string_lossy().into_owned(),
            "--out-dir".to_string(),
            request.out_dir.to_string_lossy().into_owned(),
            "--out-name".to_string(),
            request.out_name.to_string(),
            "--target".to_string(),
            "web".to_string(),
        ];
        args.extend(request.extra_args.iter().cloned());
        args
    }
}

impl Compiler for WasmBindgen {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Artifact> {
        log::info!("  Building Rust crate...");
        let status = Command::new("cargo")
            .args(Self::cargo_args(request))
            .status()
            .context("Failed to run cargo build")?;

        if !status.success() {
            anyhow::bail!("cargo build failed");
        }

        let crate_name = manifest::crate_name(request.crate_dir)?;
        let wasm_file = manifest::cargo_target_dir(request.crate_dir)?
            .join("wasm32-unknown-unknown")
            .join(manifest::profile_dir(request.mode.cargo_profile()))
            .join(format!("{}.wasm", manifest::wasm_file_stem(&crate_name)));

        if !wasm_file.exists() {
            anyhow::bail!("Wasm file not found at {:?}", wasm_file);
        }

        log::info!("  Running wasm-bindgen...");
        let status = Command::new("wasm-bindgen")
            .args(Self::bindgen_args(&wasm_file, request))
            .status()
            .context("Failed to run wasm-bindgen")?;

        if !status.success() {
            anyhow::bail!("wasm-bindgen failed");
        }

        Artifact::locate(request.out_dir, request.out_name)
    }
}
