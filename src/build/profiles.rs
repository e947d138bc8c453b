//! Declarative definitions of the deployment profiles and their output layout.
//!
//! Every profile emits the same pair of files, a script and a wasm binary
//! sharing one base name. The only thing a profile changes is the directory
//! prefix under the output directory:
//!
//! | profile  | script                  | binary                    |
//! |----------|-------------------------|---------------------------|
//! | `conway` | `dist/conway/conway.js` | `dist/conway/conway.wasm` |
//! | `js`     | `dist/js/conway.js`     | `dist/js/conway.wasm`     |
//!
//! To find out where a build writes, look at [`BuildTarget::new`].

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// A named variant of the output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Outputs under `conway/`
    #[default]
    Conway,
    /// Outputs under `js/`
    Js,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conway => "conway",
            Self::Js => "js",
        }
    }

    /// All profiles a build can be asked for
    pub fn all() -> &'static [Profile] {
        &[Self::Conway, Self::Js]
    }

    /// Directory name under the output directory
    pub fn prefix(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a single build invocation needs to know about where things go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    pub profile: Profile,
    /// Entry script the module graph starts from
    pub entry: PathBuf,
    /// Output directory; never cleaned between runs
    pub out_dir: PathBuf,
    /// Script path relative to `out_dir`
    pub script_filename: PathBuf,
    /// Wasm path relative to `out_dir`
    pub binary_filename: PathBuf,
}

impl BuildTarget {
    /// The one template all profiles are generated from.
    pub fn new(profile: Profile, entry: &Path, out_dir: &Path, base_name: &str) -> Self {
        Self {
            profile,
            entry: entry.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
            script_filename: paths::script(profile, base_name),
            binary_filename: paths::binary(profile, base_name),
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.out_dir.join(&self.script_filename)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.out_dir.join(&self.binary_filename)
    }

    /// Directory both outputs live in
    pub fn prefix_dir(&self) -> PathBuf {
        self.out_dir.join(self.profile.prefix())
    }

    /// How the script refers to the binary. Both sit in the same directory,
    /// so this is just the binary's file name.
    pub fn binary_url(&self) -> String {
        self.binary_filename
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ============================================================================
// Path helpers
// ============================================================================

/// Paths relative to the output directory, or to the staging directory for
/// compiler output.
pub mod paths {
    use super::Profile;
    use std::path::PathBuf;

    /// Emitted script: {prefix}/{base}.js
    pub fn script(profile: Profile, base_name: &str) -> PathBuf {
        PathBuf::from(profile.prefix()).join(format!("{}.js", base_name))
    }

    /// Emitted binary: {prefix}/{base}.wasm
    pub fn binary(profile: Profile, base_name: &str) -> PathBuf {
        PathBuf::from(profile.prefix()).join(format!("{}.wasm", base_name))
    }

    /// Loader shim written by the toolchain: {base}.js
    pub fn loader_shim(base_name: &str) -> PathBuf {
        PathBuf::from(format!("{}.js", base_name))
    }

    /// Wasm written by the toolchain: {base}_bg.wasm
    pub fn compiled_wasm(base_name: &str) -> PathBuf {
        PathBuf::from(format!("{}_bg.wasm", base_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(profile: Profile) -> BuildTarget {
        BuildTarget::new(
            profile,
            Path::new("./bootstrap.js"),
            Path::new("dist"),
            "conway",
        )
    }

    #[test]
    fn test_conway_profile_layout() {
        let t = target(Profile::Conway);
        assert_eq!(t.script_path(), PathBuf::from("dist/conway/conway.js"));
        assert_eq!(t.binary_path(), PathBuf::from("dist/conway/conway.wasm"));
        assert_eq!(t.prefix_dir(), PathBuf::from("dist/conway"));
    }

    #[test]
    fn test_js_profile_layout() {
        let t = target(Profile::Js);
        assert_eq!(t.script_path(), PathBuf::from("dist/js/conway.js"));
        assert_eq!(t.binary_path(), PathBuf::from("dist/js/conway.wasm"));
    }

    #[test]
    fn test_profiles_differ_only_in_prefix() {
        let conway = target(Profile::Conway);
        let js = target(Profile::Js);

        assert_eq!(conway.entry, js.entry);
        assert_eq!(conway.out_dir, js.out_dir);
        assert_eq!(
            conway.script_filename.file_name(),
            js.script_filename.file_name()
        );
        assert_eq!(
            conway.binary_filename.file_name(),
            js.binary_filename.file_name()
        );
        assert_ne!(conway.prefix_dir(), js.prefix_dir());
    }

    #[test]
    fn test_script_and_binary_share_base_name() {
        for profile in Profile::all() {
            let t = target(*profile);
            assert_eq!(t.script_filename.file_stem(), t.binary_filename.file_stem());
            assert_eq!(t.script_filename.parent(), t.binary_filename.parent());
            assert_eq!(t.binary_url(), "conway.wasm");
        }
    }

    #[test]
    fn test_profile_parses_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            profile: Profile,
        }
        let parsed: Holder = toml::from_str("profile = \"js\"").unwrap();
        assert_eq!(parsed.profile, Profile::Js);
        assert!(toml::from_str::<Holder>("profile = \"esm\"").is_err());
    }
}
