use {
    crate::unit::CompiledModule,
    std::{
        collections::{BTreeMap, BTreeSet, HashMap, HashSet},
        fmt,
        path::{Path, PathBuf},
    },
};

/// Index of a module in the finder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

/// One unit of resolution.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Dotted name, unique within a run.
    pub name: String,

    /// Namespace directories; set if and only if the module is a package.
    pub path: Option<Vec<PathBuf>>,

    /// Enclosing package, used for relative imports.
    pub parent: Option<ModuleId>,

    /// Names bound at top level, as far as scanning can tell.
    pub global_names: HashSet<String>,

    /// Explicit export list (`__all__`), if the module declares one.
    pub export_names: Vec<String>,

    /// Imports never resolved for this module.
    pub exclude_names: HashSet<String>,

    /// Missing imports not reported for this module.
    pub ignore_names: HashSet<String>,

    /// The backing bytes came out of an archive.
    pub in_archive: bool,

    file: Option<PathBuf>,
    compiled: Option<CompiledModule>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_package(&self) -> bool {
        self.path.is_some()
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn compiled(&self) -> Option<&CompiledModule> {
        self.compiled.as_ref()
    }

    pub(crate) fn compiled_mut(&mut self) -> Option<&mut CompiledModule> {
        self.compiled.as_mut()
    }

    pub(crate) fn set_compiled(&mut self, file: PathBuf, compiled: Option<CompiledModule>) {
        self.file = Some(file);
        self.compiled = compiled;
    }

    /// Drop the payload together with the reference to its backing file.
    pub fn strip(&mut self) {
        self.compiled = None;
        self.file = None;
    }

    pub fn add_global_name(&mut self, name: &str) {
        self.global_names.insert(name.to_string());
    }

    pub fn exclude_name(&mut self, name: &str) {
        self.exclude_names.insert(name.to_string());
    }

    pub fn ignore_name(&mut self, name: &str) {
        self.ignore_names.insert(name.to_string());
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Module name={:?}", self.name)?;
        if let Some(file) = &self.file {
            write!(f, ", file={:?}", file.display().to_string())?;
        }
        if let Some(path) = &self.path {
            let dirs: Vec<_> = path.iter().map(|p| p.display().to_string()).collect();
            write!(f, ", path={dirs:?}")?;
        }
        write!(f, ">")
    }
}

/// Why a name has no module behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absence {
    /// Excluded by configuration or a hook; never searched, never reported.
    Excluded,
    /// Searched for and not found.
    NotFound,
}

/// Registry slot for a dotted name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Found(ModuleId),
    Absent(Absence),
}

/// Resolution state of one run: module arena, name slots, aliases,
/// exclusions and the missing-module report.
#[derive(Debug, Default)]
pub struct Registry {
    modules: Vec<Module>,
    entries: HashMap<String, Entry>,
    pub(crate) aliases: HashMap<String, String>,
    pub(crate) excluded: HashSet<String>,
    unresolved: BTreeMap<String, BTreeSet<String>>,
}

impl Registry {
    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn get_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0]
    }

    pub fn entry(&self, name: &str) -> Option<Entry> {
        self.entries.get(name).copied()
    }

    pub fn lookup(&self, name: &str) -> Option<ModuleId> {
        match self.entry(name) {
            Some(Entry::Found(id)) => Some(id),
            _ => None,
        }
    }

    /// Modules in registration order.
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter().enumerate().map(|(i, m)| (ModuleId(i), m))
    }

    /// Registered names, aliases included, with the module behind each.
    pub fn names(&self) -> impl Iterator<Item = (&str, ModuleId)> {
        self.entries.iter().filter_map(|(name, entry)| match entry {
            Entry::Found(id) => Some((name.as_str(), *id)),
            Entry::Absent(_) => None,
        })
    }

    /// Return the module registered under `name`, creating it if needed.
    ///
    /// A name that turns up after being reported missing is dropped from the
    /// report.
    pub(crate) fn add(&mut self, name: &str) -> ModuleId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        let id = ModuleId(self.modules.len());
        self.modules.push(Module::new(name));
        self.entries.insert(name.to_string(), Entry::Found(id));
        self.unresolved.remove(name);
        id
    }

    /// Point `alias` at an already registered module.
    pub(crate) fn redirect(&mut self, alias: &str, entry: Entry) {
        self.entries.insert(alias.to_string(), entry);
        if matches!(entry, Entry::Found(_)) {
            self.unresolved.remove(alias);
        }
    }

    /// Record a confirmed absence. Existing slots are left alone.
    pub(crate) fn mark_absent(&mut self, name: &str, absence: Absence) {
        self.entries
            .entry(name.to_string())
            .or_insert(Entry::Absent(absence));
    }

    pub(crate) fn exclude(&mut self, name: &str) {
        self.excluded.insert(name.to_string());
        self.entries
            .insert(name.to_string(), Entry::Absent(Absence::Excluded));
    }

    pub(crate) fn report_missing(&mut self, name: &str, importer: &str) {
        self.unresolved
            .entry(name.to_string())
            .or_default()
            .insert(importer.to_string());
    }

    /// Missing names with their sorted importers, sorted by name.
    pub fn missing(&self) -> Vec<(String, Vec<String>)> {
        self.unresolved
            .iter()
            .map(|(name, importers)| (name.clone(), importers.iter().cloned().collect()))
            .collect()
    }

    /// Parent package of a dotted name, if that package is registered.
    pub fn parent_of(&self, name: &str) -> Option<ModuleId> {
        let (parent, _) = name.rsplit_once('.')?;
        self.lookup(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_clears_payload_and_file_together() {
        let mut module = Module::new("m");
        module.set_compiled(PathBuf::from("m.py"), None);
        assert!(module.file().is_some());
        module.strip();
        assert!(module.file().is_none());
        assert!(module.compiled().is_none());
    }

    #[test]
    fn add_is_idempotent_and_clears_report() {
        let mut registry = Registry::default();
        registry.report_missing("late", "app");
        let first = registry.add("late");
        let second = registry.add("late");
        assert_eq!(first, second);
        assert!(registry.missing().is_empty());
    }

    #[test]
    fn absence_is_never_overwritten() {
        let mut registry = Registry::default();
        registry.exclude("gone");
        registry.mark_absent("gone", Absence::NotFound);
        assert_eq!(
            registry.entry("gone"),
            Some(Entry::Absent(Absence::Excluded))
        );
    }

    #[test]
    fn display_lists_file_and_path() {
        let mut module = Module::new("pkg");
        module.path = Some(vec![PathBuf::from("/src/pkg")]);
        module.set_compiled(PathBuf::from("/src/pkg/__init__.py"), None);
        assert_eq!(
            module.to_string(),
            r#"<Module name="pkg", file="/src/pkg/__init__.py", path=["/src/pkg"]>"#
        );
    }
}
