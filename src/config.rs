use {
    crate::{
        error::{FreezeError, Result},
        unit::opcode::FormatVersion,
    },
    regex::Regex,
    serde::Deserialize,
    std::{
        collections::BTreeMap,
        fs,
        path::{Path, PathBuf},
        sync::LazyLock,
    },
};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid regex"));

/// Default name of the generated constants module.
pub const CONSTANTS_MODULE: &str = "BUILD_CONSTANTS";

/// Run configuration, usually read from `freeze.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreezeConfig {
    /// Search path; the current directory when empty.
    pub path: Vec<PathBuf>,

    /// Modules included explicitly.
    pub includes: Vec<String>,

    /// Packages included together with all their submodules.
    pub packages: Vec<String>,

    /// Modules that must never be added.
    pub excludes: Vec<String>,

    /// Alias name to canonical name.
    pub aliases: BTreeMap<String, String>,

    /// Modules provided by the runtime itself; satisfied without loading.
    pub builtins: Vec<String>,

    /// `[search, replace]` pairs applied to recorded source locations.
    /// A search value of `*` stands for the directory of the top-level
    /// package.
    pub replace_paths: Vec<(String, String)>,

    /// Resolve unqualified imports against enclosing packages first.
    pub implicit_relative_imports: bool,

    /// Instruction format of compiled units.
    pub format: FormatVersion,

    /// Modules whose payload is dropped before emission.
    pub strip: Vec<String>,

    /// Release string exposed in the constants module.
    pub release: Option<String>,

    /// Copyright notice exposed in the constants module.
    pub copyright: Option<String>,

    /// Extra values exposed in the constants module.
    pub constants: BTreeMap<String, toml::Value>,

    /// Declarative hooks, keyed by module name.
    pub hooks: BTreeMap<String, HookSpec>,
}

/// Declarative hook for one module name.
///
/// Load actions apply when the module finishes loading; missing actions when
/// the module cannot be found for some importer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookSpec {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub global_names: Vec<String>,
    pub exclude_names: Vec<String>,
    pub ignore_names: Vec<String>,

    /// Module to use in place of the missing one.
    pub substitute: Option<String>,

    /// Do not report the module as missing.
    pub ignore_missing: bool,
}

impl HookSpec {
    pub fn has_load_actions(&self) -> bool {
        !(self.includes.is_empty()
            && self.excludes.is_empty()
            && self.global_names.is_empty()
            && self.exclude_names.is_empty()
            && self.ignore_names.is_empty())
    }

    pub fn has_missing_actions(&self) -> bool {
        self.substitute.is_some() || self.ignore_missing
    }
}

impl FreezeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| FreezeError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| FreezeError::Config(e.to_string()))
    }

    pub fn search_path(&self) -> Vec<PathBuf> {
        if self.path.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.path.clone()
        }
    }

    /// Source of the constants module, if there is anything to put in it.
    ///
    /// One `NAME = value` line per constant, sorted by name.
    pub fn constants_source(&self) -> Result<Option<String>> {
        let mut values = self.constants.clone();
        for (name, value) in [
            ("BUILD_RELEASE_STRING", &self.release),
            ("BUILD_COPYRIGHT", &self.copyright),
        ] {
            if let Some(value) = value {
                values.insert(name.to_string(), toml::Value::String(value.clone()));
            }
        }
        if values.is_empty() {
            return Ok(None);
        }

        let mut lines = Vec::with_capacity(values.len());
        for (name, value) in &values {
            if !IDENTIFIER.is_match(name) {
                return Err(FreezeError::Config(format!(
                    "invalid constant name {name:?}"
                )));
            }
            lines.push(format!("{name} = {}", literal(value)));
        }
        Ok(Some(lines.join("\n") + "\n"))
    }
}

fn literal(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => format!("{s:?}"),
        toml::Value::Boolean(true) => "True".to_string(),
        toml::Value::Boolean(false) => "False".to_string(),
        toml::Value::Array(items) => {
            let items: Vec<_> = items.iter().map(literal).collect();
            format!("[{}]", items.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, pretty_assertions::assert_eq};

    #[test]
    fn full_config_parses() {
        let config = FreezeConfig::from_toml(
            r#"
            path = ["src", "lib/site.zip"]
            includes = ["app"]
            packages = ["encodings"]
            excludes = ["tkinter"]
            builtins = ["sys"]
            replace_paths = [["*", ""], ["/home/build", "/src"]]
            implicit_relative_imports = true
            format = "legacy"
            strip = ["sys"]
            release = "1.2"

            [aliases]
            "six.moves" = "six"

            [constants]
            DEBUG = false
            LEVEL = 3

            [hooks."ctypes"]
            ignore_names = ["_ctypes"]

            [hooks."_winreg"]
            ignore_missing = true
            "#,
        )
        .unwrap();

        assert_eq!(config.search_path(), vec![PathBuf::from("src"), PathBuf::from("lib/site.zip")]);
        assert_eq!(config.format, FormatVersion::Legacy);
        assert_eq!(config.replace_paths[0], ("*".to_string(), String::new()));
        assert_eq!(config.aliases["six.moves"], "six");
        assert!(config.hooks["ctypes"].has_load_actions());
        assert!(!config.hooks["ctypes"].has_missing_actions());
        assert!(config.hooks["_winreg"].has_missing_actions());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = FreezeConfig::from_toml("inclues = [\"typo\"]\n").unwrap_err();
        assert!(matches!(err, FreezeError::Config(_)));
    }

    #[test]
    fn defaults() {
        let config = FreezeConfig::default();
        assert_eq!(config.search_path(), vec![PathBuf::from(".")]);
        assert_eq!(config.format, FormatVersion::Wordcode);
        assert!(!config.implicit_relative_imports);
        assert_eq!(config.constants_source().unwrap(), None);
    }

    #[test]
    fn constants_are_rendered_sorted() {
        let config = FreezeConfig::from_toml(
            "release = \"2.0\"\n[constants]\nDEBUG = true\nLEVEL = 3\n",
        )
        .unwrap();
        assert_eq!(
            config.constants_source().unwrap().unwrap(),
            "BUILD_RELEASE_STRING = \"2.0\"\nDEBUG = True\nLEVEL = 3\n"
        );

        let config = FreezeConfig::from_toml(
            "release = \"2.0\"\ncopyright = \"(c) Example Ltd\"\n",
        )
        .unwrap();
        assert_eq!(
            config.constants_source().unwrap().unwrap(),
            "BUILD_COPYRIGHT = \"(c) Example Ltd\"\nBUILD_RELEASE_STRING = \"2.0\"\n"
        );

        let config = FreezeConfig::from_toml("[constants]\n\"bad-name\" = 1\n").unwrap();
        assert!(config.constants_source().is_err());
    }
}
