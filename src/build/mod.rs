use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::BuildConfig;

pub mod emit;
pub mod esm;
pub mod graph;
pub mod manifest;
pub mod profiles;
pub mod toolchain;

use emit::WriteSummary;
use esm::ModuleSyntax;
use graph::{ModuleGraph, Resolver};
use profiles::{BuildTarget, paths};
use toolchain::{CompileRequest, Compiler};

/// What a finished build produced
#[derive(Debug)]
pub struct BuildReport {
    pub target: BuildTarget,
    pub modules: usize,
    pub outputs: WriteSummary,
}

impl BuildReport {
    /// Both output paths, script first
    pub fn paths(&self) -> [PathBuf; 2] {
        [self.target.script_path(), self.target.binary_path()]
    }
}

/// Main build orchestrator, using the configured toolchain
pub fn run(config: &BuildConfig) -> Result<BuildReport> {
    let compiler = toolchain::for_toolchain(config.compiler.toolchain);
    run_with(config, compiler.as_ref())
}

/// Compile, then assemble. Nothing under the output directory is touched
/// until both have succeeded.
pub fn run_with(config: &BuildConfig, compiler: &dyn Compiler) -> Result<BuildReport> {
    let target = config.target();
    log::info!(
        "conway-bundle build starting (profile '{}', {:?} mode)...",
        target.profile,
        config.mode
    );

    let staging = tempfile::Builder::new()
        .prefix("conway-bundle-")
        .tempdir()
        .context("Failed to create staging directory")?;

    // Phase 1: Compile the crate
    log::info!("Phase 1: Compiling wasm...");
    let crate_path = config.crate_path();
    let artifact = compiler
        .compile(&CompileRequest {
            crate_dir: &crate_path,
            out_dir: staging.path(),
            out_name: &config.base_name,
            extra_args: &config.compiler.extra_args,
            mode: config.mode,
        })
        .context("Compilation failed, no output was written")?;

    // Phase 2: Resolve the module graph
    log::info!("Phase 2: Resolving modules from {:?}...", target.entry);
    let mut resolver = Resolver::new(
        &config.root,
        &config.pkg_dir,
        &artifact.dir,
        &paths::loader_shim(&config.base_name).to_string_lossy(),
    )?;
    resolver.alias(&config.base_name);
    match manifest::crate_name(&crate_path) {
        Ok(name) => resolver.alias(&name),
        Err(err) => log::debug!("  No crate name alias: {:#}", err),
    }

    let syntax = ModuleSyntax::new()?;
    let graph = ModuleGraph::build(&resolver, &syntax, &target.entry)?;
    log::info!("  {} modules", graph.len());

    // Phase 3: Assemble
    log::info!("Phase 3: Assembling bundle...");
    let bundle = emit::assemble(&graph, &syntax, &artifact, &target)?;

    // Phase 4: Write outputs
    log::info!("Phase 4: Writing outputs...");
    let outputs = emit::write_outputs(&target, &bundle)?;
    for path in &outputs.written {
        log::info!("  Wrote {}", path.display());
    }
    for path in &outputs.unchanged {
        log::info!("  Unchanged {}", path.display());
    }

    log::info!("Build complete! Output in {:?}", target.prefix_dir());
    Ok(BuildReport {
        target,
        modules: graph.len(),
        outputs,
    })
}
