use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::esm::{ImportKind, ModuleSyntax};

/// Root-relative, forward-slashed path of a module, e.g. `./pkg/conway.js`
pub type ModuleId = String;

/// Root-relative path split into normalized segments
type Logical = Vec<String>;

#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    /// File the source was read from
    pub path: PathBuf,
    pub source: String,
    /// Specifier as written -> module it resolved to
    pub dependencies: BTreeMap<String, ModuleId>,
}

/// Every module reachable from the entry script and the loader shim.
#[derive(Debug)]
pub struct ModuleGraph {
    pub entry: ModuleId,
    pub loader: ModuleId,
    pub modules: BTreeMap<ModuleId, Module>,
}

impl ModuleGraph {
    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Maps import specifiers to files.
///
/// Paths under `pkg_dir` are served from the staging directory, which is
/// where the toolchain output really lives for the duration of a build.
pub struct Resolver {
    root: PathBuf,
    pkg_dir: Logical,
    staging: PathBuf,
    loader: Logical,
    /// Bare specifiers that name the compiled crate
    aliases: BTreeSet<String>,
}

impl Resolver {
    pub fn new(root: &Path, pkg_dir: &Path, staging: &Path, loader_file: &str) -> Result<Self> {
        let root = std::path::absolute(root).context("Failed to resolve project root")?;
        let pkg_dir = normalize(&[], &pkg_dir.to_string_lossy())
            .context("Package directory must stay inside the project root")?;
        if pkg_dir.is_empty() {
            anyhow::bail!("Package directory must not be the project root");
        }
        let loader = normalize(&pkg_dir, loader_file)?;

        Ok(Self {
            root,
            pkg_dir,
            staging: staging.to_path_buf(),
            loader,
            aliases: BTreeSet::new(),
        })
    }

    /// Let `import ... from "<name>"` mean the loader shim
    pub fn alias(&mut self, name: &str) {
        self.aliases.insert(name.to_string());
    }

    pub fn loader_id(&self) -> ModuleId {
        module_id(&self.loader)
    }

    /// Logical location of the entry script
    fn entry(&self, entry: &Path) -> Result<Logical> {
        let entry = std::path::absolute(entry).context("Failed to resolve entry path")?;
        let relative = pathdiff::diff_paths(&entry, &self.root)
            .with_context(|| format!("Entry {:?} is not under the project root", entry))?;
        let logical = normalize(&[], &relative.to_string_lossy())
            .with_context(|| format!("Entry {:?} is not under the project root", entry))?;

        if !self.physical(&logical).is_file() {
            anyhow::bail!("Entry script {:?} not found", entry);
        }
        Ok(logical)
    }

    fn physical(&self, logical: &[String]) -> PathBuf {
        let (base, rest) = match logical.strip_prefix(self.pkg_dir.as_slice()) {
            Some(rest) => (&self.staging, rest),
            None => (&self.root, logical),
        };
        rest.iter().fold(base.clone(), |path, segment| path.join(segment))
    }

    fn resolve(&self, importer: &[String], specifier: &str) -> Result<Option<Logical>> {
        if specifier.starts_with("./") || specifier.starts_with("../") {
            let dir = &importer[..importer.len().saturating_sub(1)];
            let target = normalize(dir, specifier)?;
            return Ok(self.find_file(&target));
        }
        if specifier.starts_with('/') || specifier.contains(':') {
            return Ok(None);
        }
        if self.aliases.contains(specifier) {
            return Ok(Some(self.loader.clone()));
        }
        self.resolve_package(specifier)
    }

    /// Try the path itself, then the usual extensions, then an index file.
    fn find_file(&self, target: &Logical) -> Option<Logical> {
        if *target == self.pkg_dir {
            return Some(self.loader.clone());
        }

        let mut candidates = vec![target.clone()];
        if let Some(last) = target.last() {
            for ext in ["js", "mjs"] {
                let mut candidate = target.clone();
                candidate.pop();
                candidate.push(format!("{}.{}", last, ext));
                candidates.push(candidate);
            }
        }
        let mut index = target.clone();
        index.push("index.js".to_string());
        candidates.push(index);

        candidates
            .into_iter()
            .find(|candidate| self.physical(candidate).is_file())
    }

    /// Bare specifiers: `node_modules/<name>[/<subpath>]`
    fn resolve_package(&self, specifier: &str) -> Result<Option<Logical>> {
        let segments: Vec<&str> = specifier.split('/').collect();
        let name_len = if specifier.starts_with('@') { 2 } else { 1 };
        if segments.len() < name_len {
            return Ok(None);
        }

        let mut package: Logical = vec!["node_modules".to_string()];
        package.extend(segments[..name_len].iter().map(|s| s.to_string()));

        let subpath = segments[name_len..].join("/");
        if !subpath.is_empty() {
            let target = normalize(&package, &subpath)?;
            return Ok(self.find_file(&target));
        }

        let manifest_path = self.physical(&package).join("package.json");
        if manifest_path.is_file() {
            let content = std::fs::read_to_string(&manifest_path)
                .with_context(|| format!("Failed to read {:?}", manifest_path))?;
            let manifest: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", manifest_path))?;

            for field in ["module", "main"] {
                if let Some(main) = manifest[field].as_str() {
                    let target = normalize(&package, main)?;
                    if let Some(found) = self.find_file(&target) {
                        return Ok(Some(found));
                    }
                }
            }
        }

        let mut index = package;
        index.push("index.js".to_string());
        Ok(self.physical(&index).is_file().then_some(index))
    }
}

impl ModuleGraph {
    /// Walk the graph from the entry script and the loader shim.
    pub fn build(resolver: &Resolver, syntax: &ModuleSyntax, entry: &Path) -> Result<Self> {
        let entry = resolver.entry(entry)?;
        let mut modules = BTreeMap::new();
        let mut pending = vec![resolver.loader.clone(), entry.clone()];

        while let Some(logical) = pending.pop() {
            let id = module_id(&logical);
            if modules.contains_key(&id) {
                continue;
            }

            let path = resolver.physical(&logical);
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read module {} from {:?}", id, path))?;

            let mut dependencies = BTreeMap::new();
            for (specifier, kind) in syntax.specifiers(&source) {
                if dependencies.contains_key(&specifier) {
                    continue;
                }
                let target = resolver
                    .resolve(&logical, &specifier)?
                    .with_context(|| format!("Cannot resolve {:?} imported by {}", specifier, id))?;
                let target_id = module_id(&target);
                if kind == ImportKind::Dynamic {
                    log::debug!("  {} -> {} (dynamic)", id, target_id);
                } else {
                    log::debug!("  {} -> {}", id, target_id);
                }
                dependencies.insert(specifier, target_id);
                pending.push(target);
            }

            modules.insert(
                id.clone(),
                Module {
                    id,
                    path,
                    source,
                    dependencies,
                },
            );
        }

        Ok(Self {
            entry: module_id(&entry),
            loader: resolver.loader_id(),
            modules,
        })
    }
}

/// Lexically join `specifier` onto `base`, refusing to climb above the root.
fn normalize(base: &[String], specifier: &str) -> Result<Logical> {
    let mut segments: Logical = base.to_vec();
    for segment in specifier.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    anyhow::bail!("{:?} points outside the project root", specifier);
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}

fn module_id(logical: &[String]) -> ModuleId {
    format!("./{}", logical.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Project {
        root: TempDir,
        staging: TempDir,
    }

    impl Project {
        fn new() -> Self {
            let project = Self {
                root: tempfile::tempdir().unwrap(),
                staging: tempfile::tempdir().unwrap(),
            };
            project.stage("conway.js", "export default function init() {}\n");
            project
        }

        fn write(&self, path: &str, content: &str) {
            let path = self.root.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn stage(&self, path: &str, content: &str) {
            let path = self.staging.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn resolver(&self) -> Resolver {
            let mut resolver = Resolver::new(
                self.root.path(),
                Path::new("pkg"),
                self.staging.path(),
                "conway.js",
            )
            .unwrap();
            resolver.alias("conway");
            resolver
        }

        fn graph(&self) -> Result<ModuleGraph> {
            ModuleGraph::build(
                &self.resolver(),
                &ModuleSyntax::new().unwrap(),
                &self.root.path().join("bootstrap.js"),
            )
        }
    }

    #[test]
    fn test_bootstrap_graph() {
        let project = Project::new();
        project.write("bootstrap.js", "import(\"./index.js\").catch(console.error);\n");
        project.write(
            "index.js",
            "import { GameOfLife } from './pkg/conway.js';\nimport { draw } from './render';\n",
        );
        project.write("render/index.js", "export function draw() {}\n");

        let graph = project.graph().unwrap();
        assert_eq!(graph.entry, "./bootstrap.js");
        assert_eq!(graph.loader, "./pkg/conway.js");
        assert_eq!(
            graph.modules.keys().collect::<Vec<_>>(),
            vec![
                "./bootstrap.js",
                "./index.js",
                "./pkg/conway.js",
                "./render/index.js"
            ]
        );
        assert_eq!(
            graph.get("./pkg/conway.js").unwrap().path,
            project.staging.path().join("conway.js")
        );
        assert_eq!(
            graph.get("./index.js").unwrap().dependencies["./render"],
            "./render/index.js"
        );
    }

    #[test]
    fn test_loader_is_linked_without_being_imported() {
        let project = Project::new();
        project.write("bootstrap.js", "console.log('hi');\n");

        let graph = project.graph().unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.get("./pkg/conway.js").is_some());
    }

    #[test]
    fn test_crate_alias_and_pkg_dir_resolve_to_loader() {
        let project = Project::new();
        project.write(
            "bootstrap.js",
            "import * as wasm from 'conway';\nimport init from './pkg';\n",
        );

        let graph = project.graph().unwrap();
        let deps = &graph.get("./bootstrap.js").unwrap().dependencies;
        assert_eq!(deps["conway"], "./pkg/conway.js");
        assert_eq!(deps["./pkg"], "./pkg/conway.js");
    }

    #[test]
    fn test_loader_snippets_come_from_staging() {
        let project = Project::new();
        project.stage(
            "conway.js",
            "import { now } from './snippets/conway-1/inline0.js';\nexport default function init() {}\n",
        );
        project.stage("snippets/conway-1/inline0.js", "export function now() {}\n");
        project.write("bootstrap.js", "");

        let graph = project.graph().unwrap();
        assert!(graph.get("./pkg/snippets/conway-1/inline0.js").is_some());
    }

    #[test]
    fn test_node_modules_package() {
        let project = Project::new();
        project.write("bootstrap.js", "import fps from 'fps-meter';\nimport '@scope/util/extra';\n");
        project.write(
            "node_modules/fps-meter/package.json",
            r#"{ "name": "fps-meter", "module": "./esm/main.js", "main": "./cjs/main.js" }"#,
        );
        project.write("node_modules/fps-meter/esm/main.js", "export default 60;\n");
        project.write("node_modules/@scope/util/extra.js", "\n");

        let graph = project.graph().unwrap();
        let deps = &graph.get("./bootstrap.js").unwrap().dependencies;
        assert_eq!(deps["fps-meter"], "./node_modules/fps-meter/esm/main.js");
        assert_eq!(deps["@scope/util/extra"], "./node_modules/@scope/util/extra.js");
    }

    #[test]
    fn test_unresolved_import_names_importer() {
        let project = Project::new();
        project.write("bootstrap.js", "import './missing.js';\n");

        let err = project.graph().unwrap_err();
        assert!(err.to_string().contains("./missing.js"));
        assert!(err.to_string().contains("./bootstrap.js"));
    }

    #[test]
    fn test_import_outside_root_is_rejected() {
        let project = Project::new();
        project.write("bootstrap.js", "import '../../etc/passwd';\n");
        assert!(project.graph().is_err());
    }

    #[test]
    fn test_missing_entry() {
        let project = Project::new();
        let err = project.graph().unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_cycles_terminate() {
        let project = Project::new();
        project.write("bootstrap.js", "import './a.js';\n");
        project.write("a.js", "import './b.js';\n");
        project.write("b.js", "import './a.js';\n");

        assert_eq!(project.graph().unwrap().len(), 4);
    }

    #[test]
    fn test_normalize() {
        let base = vec!["src".to_string(), "views".to_string()];
        assert_eq!(normalize(&base, "../lib/./x.js").unwrap(), vec!["src", "lib", "x.js"]);
        assert!(normalize(&base, "../../../x.js").is_err());
        assert_eq!(module_id(&normalize(&[], "./bootstrap.js").unwrap()), "./bootstrap.js");
    }
}
