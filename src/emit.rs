//! Frozen module table: the artifact handed to the bootstrap.

use {
    crate::{
        error::{FreezeError, Result},
        finder::{Finder, Registry},
    },
    include_dir::{Dir, include_dir},
    serde_json::json,
    sha2::{Digest, Sha256},
    std::{
        collections::HashMap,
        fmt::Write as _,
        fs,
        path::{Path, PathBuf},
    },
    tracing::info,
};

pub static TPL_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/tpl");

const FROZEN_TABLE_TPL: &str = "frozen_modules.c.tpl";

/// Suffix of the entry module name.
pub const MAIN_SUFFIX: &str = "__main__";

/// Bytes per line in generated arrays.
const BYTES_PER_LINE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenEntry {
    pub name: String,
    pub symbol: String,
    pub bytes: Vec<u8>,

    /// Payload length, negated for packages.
    pub size: i64,
}

impl FrozenEntry {
    pub fn is_package(&self) -> bool {
        self.size < 0
    }

    pub fn sha256(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }
}

/// Entries sorted by dotted name. Aliases get their own entry carrying the
/// payload of the module they point to.
#[derive(Debug, Clone, Default)]
pub struct FrozenTable {
    pub entries: Vec<FrozenEntry>,
}

impl FrozenTable {
    pub fn from_finder(finder: &Finder) -> Result<Self> {
        Self::from_registry(finder.registry())
    }

    pub fn from_registry(registry: &Registry) -> Result<Self> {
        let mut names: Vec<_> = registry.names().collect();
        names.sort_by(|a, b| a.0.cmp(b.0));

        let mut entries = Vec::with_capacity(names.len());
        let mut symbols: HashMap<String, &str> = HashMap::new();
        for (name, id) in names {
            let module = registry.get(id);
            let Some(compiled) = module.compiled() else {
                continue;
            };
            let symbol = mangle(name);
            if let Some(first) = symbols.insert(symbol.clone(), name) {
                return Err(FreezeError::SymbolCollision {
                    first: first.to_string(),
                    second: name.to_string(),
                    symbol,
                });
            }
            let bytes = compiled.to_bytes()?;
            let size = bytes.len() as i64;
            entries.push(FrozenEntry {
                name: name.to_string(),
                symbol,
                bytes,
                size: if module.is_package() { -size } else { size },
            });
        }
        Ok(Self { entries })
    }

    /// Payload of the named module, as the bootstrap would look it up.
    pub fn lookup(&self, name: &str) -> Option<&FrozenEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Payload of the entry module for the given executable.
    pub fn lookup_entry(&self, executable: &Path) -> Option<&FrozenEntry> {
        self.lookup(&entry_module_name(executable))
    }

    pub fn to_c_source(&self, target: &str) -> String {
        let template = TPL_DIR
            .get_file(FROZEN_TABLE_TPL)
            .and_then(|file| file.contents_utf8())
            .unwrap_or_else(|| panic!("file should exist in template directory: {FROZEN_TABLE_TPL}"));

        let mut arrays = String::new();
        let mut table = String::new();
        for entry in &self.entries {
            let _ = writeln!(arrays, "static const unsigned char M_{}[] = {{", entry.symbol);
            for chunk in entry.bytes.chunks(BYTES_PER_LINE) {
                let line: Vec<_> = chunk.iter().map(|b| b.to_string()).collect();
                let _ = writeln!(arrays, "    {},", line.join(","));
            }
            let _ = writeln!(arrays, "}};\n");
            let _ = writeln!(
                table,
                "    {{{}, M_{}, {}}},",
                c_string(&entry.name),
                entry.symbol,
                entry.size
            );
        }

        template
            .replace("{{TARGET}}", target)
            .replace("{{ARRAYS}}", &arrays)
            .replace("{{TABLE}}", &table)
    }

    pub fn manifest(&self, missing: &[(String, Vec<String>)]) -> serde_json::Value {
        let entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| {
                json!({
                    "name": entry.name,
                    "symbol": entry.symbol,
                    "size": entry.size,
                    "sha256": entry.sha256(),
                })
            })
            .collect();
        let missing: Vec<_> = missing
            .iter()
            .map(|(name, importers)| json!({ "name": name, "importers": importers }))
            .collect();
        json!({
            "entries": entries,
            "missing": missing,
        })
    }

    /// Write `frozen_modules.c` and `manifest.json` into `dir`.
    pub fn write(
        &self,
        dir: &Path,
        target: &str,
        missing: &[(String, Vec<String>)],
    ) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir).map_err(|e| FreezeError::io(dir, e))?;

        let source = dir.join("frozen_modules.c");
        fs::write(&source, self.to_c_source(target)).map_err(|e| FreezeError::io(&source, e))?;

        let manifest = dir.join("manifest.json");
        let text = serde_json::to_string_pretty(&self.manifest(missing))
            .map_err(|e| FreezeError::Config(e.to_string()))?;
        fs::write(&manifest, text).map_err(|e| FreezeError::io(&manifest, e))?;

        info!(
            entries = self.entries.len(),
            bytes = self.entries.iter().map(|e| e.bytes.len()).sum::<usize>(),
            dir = %dir.display(),
            "frozen table written"
        );
        Ok((source, manifest))
    }
}

/// C identifier for a dotted module name.
pub fn mangle(name: &str) -> String {
    name.split('.')
        .map(identifier)
        .collect::<Vec<_>>()
        .join("__")
}

/// C string literal for `text`.
fn c_string(text: &str) -> String {
    let mut literal = String::with_capacity(text.len() + 2);
    literal.push('"');
    for c in text.chars() {
        match c {
            '"' | '\\' => {
                literal.push('\\');
                literal.push(c);
            }
            '\n' => literal.push_str("\\n"),
            c if c.is_ascii_graphic() || c == ' ' => literal.push(c),
            c => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    // Octal keeps the next character out of the escape.
                    let _ = write!(literal, "\\{b:03o}");
                }
            }
        }
    }
    literal.push('"');
    literal
}

/// Name of the module the bootstrap runs for the given executable.
///
/// `/opt/my-tool-2.1.exe` runs `my__main__`.
pub fn entry_module_name(executable: &Path) -> String {
    let base = executable
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let base = base.split('-').next().unwrap_or_default();
    let base = base.split('.').next().unwrap_or_default();
    format!("{}{MAIN_SUFFIX}", identifier(base))
}

fn identifier(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use {super::*, pretty_assertions::assert_eq, std::path::Path};

    fn table() -> FrozenTable {
        let mut finder = Finder::new(Vec::new());
        finder
            .include_source("pkg", "value = 1\n", Path::new("pkg/__init__.py"))
            .unwrap();
        let pkg = finder.lookup("pkg").unwrap();
        finder.module_mut(pkg).path = Some(vec![PathBuf::from("pkg")]);
        finder
            .include_source("pkg.leaf", "x = 2\n", Path::new("pkg/leaf.py"))
            .unwrap();
        finder.add_alias("compat", "pkg.leaf");
        finder.include_module("compat").unwrap();
        FrozenTable::from_finder(&finder).unwrap()
    }

    #[test]
    fn entries_are_sorted_and_signed() {
        let table = table();
        let names: Vec<_> = table.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["compat", "pkg", "pkg.leaf"]);
        assert!(table.lookup("pkg").unwrap().is_package());
        assert!(!table.lookup("pkg.leaf").unwrap().is_package());
        assert_eq!(table.lookup("compat").unwrap().bytes, table.lookup("pkg.leaf").unwrap().bytes);
        assert_eq!(table.lookup("pkg.leaf").unwrap().symbol, "pkg__leaf");
        assert!(table.lookup("missing").is_none());
    }

    #[test]
    fn stripped_modules_are_left_out() {
        let mut finder = Finder::new(Vec::new());
        finder.include_source("kept", "", Path::new("kept.py")).unwrap();
        finder.include_source("gone", "", Path::new("gone.py")).unwrap();
        finder.strip_module("gone");
        let table = FrozenTable::from_finder(&finder).unwrap();
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.entries[0].name, "kept");
    }

    #[test]
    fn c_source_ends_with_sentinel() {
        let source = table().to_c_source("demo");
        assert!(source.contains("Frozen module table for demo."));
        assert!(source.contains("static const unsigned char M_pkg__leaf[] = {"));
        assert!(source.contains("{\"pkg\", M_pkg, -"));
        assert!(source.trim_end().ends_with("{0, 0, 0}\n};"));
    }

    #[test]
    fn manifest_lists_digests_and_missing() {
        let table = table();
        let manifest = table.manifest(&[("gone".into(), vec!["app".into()])]);
        assert_eq!(manifest["entries"].as_array().unwrap().len(), 3);
        assert_eq!(manifest["entries"][2]["sha256"].as_str().unwrap().len(), 64);
        assert_eq!(manifest["missing"][0]["importers"][0], "app");
    }

    #[test]
    fn colliding_symbols_are_rejected() {
        let mut finder = Finder::new(Vec::new());
        finder.include_source("a", "", Path::new("a/__init__.py")).unwrap();
        let a = finder.lookup("a").unwrap();
        finder.module_mut(a).path = Some(vec![PathBuf::from("a")]);
        finder.include_source("a.b", "", Path::new("a/b.py")).unwrap();
        finder.include_source("a__b", "", Path::new("a__b.py")).unwrap();

        match FrozenTable::from_finder(&finder) {
            Err(FreezeError::SymbolCollision { first, second, symbol }) => {
                assert_eq!((first.as_str(), second.as_str()), ("a.b", "a__b"));
                assert_eq!(symbol, "a__b");
            }
            other => panic!("expected a symbol collision, got {other:?}"),
        }
    }

    #[test]
    fn table_names_are_escaped() {
        let mut finder = Finder::new(Vec::new());
        finder
            .include_source("odd\"na\\me", "", Path::new("odd.py"))
            .unwrap();
        let source = FrozenTable::from_finder(&finder).unwrap().to_c_source("demo");
        assert!(source.contains("{\"odd\\\"na\\\\me\", M_odd_na_me, "));
    }

    #[test]
    fn c_string_literals() {
        assert_eq!(c_string("plain.name"), "\"plain.name\"");
        assert_eq!(c_string("a\nb"), "\"a\\nb\"");
        assert_eq!(c_string("\u{e9}"), "\"\\303\\251\"");
    }

    #[test]
    fn mangling() {
        assert_eq!(mangle("a.b.c"), "a__b__c");
        assert_eq!(mangle("odd-name.x"), "odd_name__x");
    }

    #[test]
    fn entry_module_names() {
        assert_eq!(entry_module_name(Path::new("/opt/my-tool-2.1.exe")), "my__main__");
        assert_eq!(entry_module_name(Path::new("app.exe")), "app__main__");
        assert_eq!(entry_module_name(Path::new("bin/app")), "app__main__");
    }
}
