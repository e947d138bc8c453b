use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

use super::esm::{self, ModuleSyntax, runtime};
use super::graph::ModuleGraph;
use super::profiles::BuildTarget;
use super::toolchain::Artifact;

/// Module registry runtime shared by every bundle.
const RUNTIME: &str = r#"const __bundle_cache = Object.create(null);
function __bundle_require(id) {
  let exports = __bundle_cache[id];
  if (exports === undefined) {
    exports = __bundle_cache[id] = Object.create(null);
    Object.defineProperty(exports, Symbol.toStringTag, { value: "Module" });
    __bundle_modules[id](exports);
  }
  return exports;
}
function __bundle_import(id) {
  return Promise.resolve().then(() => __bundle_require(id));
}
function __bundle_export(exports, getters) {
  for (const name of Object.keys(getters)) {
    Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
  }
}
function __bundle_reexport(exports, source) {
  for (const name of Object.keys(source)) {
    if (name !== "default" && !Object.prototype.hasOwnProperty.call(exports, name)) {
      Object.defineProperty(exports, name, { enumerable: true, get: () => source[name] });
    }
  }
}
"#;

/// The two files a build emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub script: String,
    pub wasm: Vec<u8>,
}

/// Point the loader shim's default wasm location at the emitted binary.
///
/// Replaces `new URL('{compiled}', import.meta.url)` with
/// `new URL('{emitted}', import.meta.url)`. Returns `None` when the shim
/// has no such URL, e.g. when it expects the caller to pass the module in.
pub fn rewrite_wasm_url(shim: &str, compiled: &str, emitted: &str) -> Result<Option<String>> {
    let pattern = format!(
        r#"new URL\(\s*['"]{}['"]\s*,\s*import\.meta\.url\s*\)"#,
        regex::escape(compiled)
    );
    let re = Regex::new(&pattern)?;
    if !re.is_match(shim) {
        return Ok(None);
    }

    let replacement = format!("new URL({}, import.meta.url)", esm::js_string(emitted)?);
    Ok(Some(
        re.replace_all(shim, regex::NoExpand(&replacement))
            .into_owned(),
    ))
}

/// Combine the module graph and the compiled artifact into the output pair.
pub fn assemble(
    graph: &ModuleGraph,
    syntax: &ModuleSyntax,
    artifact: &Artifact,
    target: &BuildTarget,
) -> Result<Bundle> {
    let compiled_wasm = artifact
        .wasm
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("Artifact has no file name")?;
    let emitted_wasm = target.binary_url();

    let mut script = format!("// Bundled from {}\n", graph.entry);
    script.push_str("const __bundle_modules = {\n");

    for (id, module) in &graph.modules {
        let source = if *id == graph.loader {
            match rewrite_wasm_url(&module.source, &compiled_wasm, &emitted_wasm)? {
                Some(rewritten) => rewritten,
                None => {
                    log::warn!(
                        "  Loader shim has no default URL for {}; it must be initialized manually",
                        compiled_wasm
                    );
                    module.source.clone()
                }
            }
        } else {
            module.source.clone()
        };

        let body = syntax
            .rewrite(&source, &module.dependencies)
            .with_context(|| format!("Failed to bundle module {}", id))?;

        script.push_str(&format!(
            "{}: function ({}) {{\n{}\n}},\n",
            esm::js_string(id)?,
            runtime::EXPORTS,
            body.trim_end()
        ));
    }
    script.push_str("};\n");
    script.push_str(RUNTIME);

    let loader = esm::js_string(&graph.loader)?;
    script.push_str(&format!(
        "const __bundle_loader = {}({});\n\
         if (typeof __bundle_loader.default === \"function\") {{\n  await __bundle_loader.default();\n}}\n",
        runtime::REQUIRE,
        loader
    ));
    script.push_str(&format!(
        "{}({});\n",
        runtime::REQUIRE,
        esm::js_string(&graph.entry)?
    ));

    let wasm = std::fs::read(&artifact.wasm)
        .with_context(|| format!("Failed to read wasm artifact {:?}", artifact.wasm))?;

    Ok(Bundle { script, wasm })
}

/// Outcome of writing the bundle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: Vec<PathBuf>,
    /// Already had the right contents and were left alone
    pub unchanged: Vec<PathBuf>,
}

/// Write both outputs, or neither.
///
/// Each changed file is first written next to its destination and only
/// renamed into place once every changed file has been written. Nothing
/// else in the output directory is touched.
///
/// If a rename fails, the staged files that were not moved are removed. A
/// rename that already went through is not undone, so the script can land
/// without its binary only when the filesystem fails mid-commit.
pub fn write_outputs(target: &BuildTarget, bundle: &Bundle) -> Result<WriteSummary> {
    let outputs = [
        (target.script_path(), bundle.script.as_bytes()),
        (target.binary_path(), bundle.wasm.as_slice()),
    ];

    let mut summary = WriteSummary::default();
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();

    for (path, contents) in outputs {
        if std::fs::read(&path).is_ok_and(|existing| existing == contents) {
            summary.unchanged.push(path);
            continue;
        }

        match stage_file(&path, contents) {
            Ok(tmp) => staged.push((tmp, path)),
            Err(err) => {
                discard(&staged);
                return Err(err);
            }
        }
    }

    for (i, (tmp, path)) in staged.iter().enumerate() {
        if let Err(err) = std::fs::rename(tmp, path) {
            discard(&staged[i..]);
            return Err(err).with_context(|| format!("Failed to move {:?} into place", path));
        }
        summary.written.push(path.clone());
    }

    Ok(summary)
}

fn stage_file(path: &Path, contents: &[u8]) -> Result<PathBuf> {
    let dir = path.parent().context("Output path has no parent directory")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = dir.join(tmp_name);

    std::fs::write(&tmp, contents).with_context(|| format!("Failed to write {:?}", tmp))?;
    Ok(tmp)
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = std::fs::remove_file(tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::profiles::Profile;
    use pretty_assertions::assert_eq;

    const SHIM: &str = "async function __wbg_init(module_or_path) {\n    if (typeof module_or_path === 'undefined') {\n        module_or_path = new URL('conway_bg.wasm', import.meta.url);\n    }\n}\n";

    #[test]
    fn test_rewrite_wasm_url() {
        let out = rewrite_wasm_url(SHIM, "conway_bg.wasm", "conway.wasm")
            .unwrap()
            .unwrap();
        assert!(out.contains("new URL(\"conway.wasm\", import.meta.url)"));
        assert!(!out.contains("conway_bg.wasm"));
    }

    #[test]
    fn test_rewrite_wasm_url_handles_double_quotes() {
        let shim = "x = new URL(\"conway_bg.wasm\", import.meta.url);";
        let out = rewrite_wasm_url(shim, "conway_bg.wasm", "conway.wasm")
            .unwrap()
            .unwrap();
        assert_eq!(out, "x = new URL(\"conway.wasm\", import.meta.url);");
    }

    #[test]
    fn test_rewrite_wasm_url_without_default_url() {
        let shim = "export function initSync(module) {}\n";
        assert_eq!(
            rewrite_wasm_url(shim, "conway_bg.wasm", "conway.wasm").unwrap(),
            None
        );
    }

    fn target(out_dir: &Path) -> BuildTarget {
        BuildTarget::new(
            Profile::Conway,
            Path::new("bootstrap.js"),
            out_dir,
            "conway",
        )
    }

    fn bundle() -> Bundle {
        Bundle {
            script: "console.log(1);\n".to_string(),
            wasm: b"\0asm\x01\0\0\0".to_vec(),
        }
    }

    #[test]
    fn test_write_outputs_creates_exactly_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = target(dir.path());

        let summary = write_outputs(&target, &bundle()).unwrap();
        assert_eq!(
            summary.written,
            vec![target.script_path(), target.binary_path()]
        );

        let mut files: Vec<_> = std::fs::read_dir(target.prefix_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files, vec!["conway.js", "conway.wasm"]);
    }

    #[test]
    fn test_write_outputs_skips_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = target(dir.path());
        write_outputs(&target, &bundle()).unwrap();

        let mut changed = bundle();
        changed.script = "console.log(2);\n".to_string();
        let summary = write_outputs(&target, &changed).unwrap();

        assert_eq!(summary.written, vec![target.script_path()]);
        assert_eq!(summary.unchanged, vec![target.binary_path()]);
        assert_eq!(
            std::fs::read_to_string(target.script_path()).unwrap(),
            "console.log(2);\n"
        );
    }

    #[test]
    fn test_write_outputs_leaves_other_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let target = target(dir.path());
        std::fs::create_dir_all(target.prefix_dir()).unwrap();
        std::fs::write(target.prefix_dir().join("index.html"), "<html>").unwrap();
        std::fs::write(dir.path().join("favicon.ico"), "icon").unwrap();

        write_outputs(&target, &bundle()).unwrap();

        assert!(target.prefix_dir().join("index.html").exists());
        assert!(dir.path().join("favicon.ico").exists());
    }

    #[test]
    fn test_failed_rename_removes_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = target(dir.path());
        // A non-empty directory where the script should go
        std::fs::create_dir_all(target.script_path().join("keep")).unwrap();

        assert!(write_outputs(&target, &bundle()).is_err());

        let mut files: Vec<_> = std::fs::read_dir(target.prefix_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files, vec!["conway.js"]);
        assert!(target.script_path().join("keep").is_dir());
    }
}
