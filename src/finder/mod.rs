//! Resolution engine: computes the transitive closure of the modules a
//! program imports.
//!
//! One [`Finder`] holds all state of one run. Modules are found through the
//! [`backend::Backend`], scanned for imports (see `scan.rs`) and every import
//! found is resolved in turn, depth first. `from package import names`
//! requests whose importer is not the package itself are deferred and
//! resolved in rounds once the scan that produced them has finished, so the
//! package's namespace is complete by then.

pub mod backend;
pub mod hooks;
pub mod module;
mod scan;

pub use {
    hooks::HookTable,
    module::{Absence, Entry, Module, ModuleId, Registry},
    scan::{EXPORT_LIST, WILDCARD},
};

use {
    crate::{
        config::FreezeConfig,
        error::{FreezeError, Result},
        unit::{CompiledModule, UnitKind, opcode::FormatVersion},
    },
    backend::{Backend, Located, PACKAGE_INIT},
    std::{
        collections::HashSet,
        fs,
        path::{MAIN_SEPARATOR, Path, PathBuf},
    },
    tracing::debug,
};

/// Pending `from package import names` requests.
pub(crate) type Deferred = Vec<(ModuleId, Vec<String>)>;

/// Counters describing the work done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinderStats {
    /// Backend lookups performed.
    pub searches: usize,
    /// Modules loaded from backing bytes.
    pub loads: usize,
    /// Queue length at the start of every deferred round.
    pub deferred_rounds: Vec<usize>,
}

#[derive(Debug)]
pub struct Finder {
    pub(crate) registry: Registry,
    pub(crate) hooks: HookTable,
    backend: Backend,
    path: Vec<PathBuf>,
    builtins: HashSet<String>,
    replace_paths: Vec<(String, String)>,
    implicit_relative: bool,
    format: FormatVersion,
    stats: FinderStats,
}

impl Finder {
    /// Finder searching top-level modules in `path`, in order.
    pub fn new(path: Vec<PathBuf>) -> Self {
        Self {
            registry: Registry::default(),
            hooks: HookTable::new(),
            backend: Backend::new(),
            path,
            builtins: HashSet::new(),
            replace_paths: Vec::new(),
            implicit_relative: false,
            format: FormatVersion::default(),
            stats: FinderStats::default(),
        }
    }

    /// Finder set up from a run configuration: search path, exclusions,
    /// aliases and declarative hooks. Nothing is included yet.
    pub fn from_config(config: &FreezeConfig) -> Self {
        let mut finder = Self::new(config.search_path())
            .with_format(config.format)
            .with_implicit_relative(config.implicit_relative_imports)
            .with_builtins(config.builtins.iter().cloned())
            .with_replace_paths(config.replace_paths.clone());
        for name in &config.excludes {
            finder.exclude_module(name);
        }
        for (alias, canonical) in &config.aliases {
            finder.add_alias(alias, canonical);
        }
        for (name, spec) in &config.hooks {
            finder.hooks.declare(name, spec);
        }
        finder
    }

    pub fn with_format(mut self, format: FormatVersion) -> Self {
        self.format = format;
        self
    }

    /// Enable the legacy upward search for unqualified imports.
    pub fn with_implicit_relative(mut self, enabled: bool) -> Self {
        self.implicit_relative = enabled;
        self
    }

    pub fn with_builtins(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.builtins.extend(names);
        self
    }

    pub fn with_replace_paths(mut self, rules: Vec<(String, String)>) -> Self {
        self.replace_paths = rules;
        self
    }

    pub fn hooks_mut(&mut self) -> &mut HookTable {
        &mut self.hooks
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        self.registry.get(id)
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        self.registry.get_mut(id)
    }

    pub fn lookup(&self, name: &str) -> Option<ModuleId> {
        self.registry.lookup(name)
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn stats(&self) -> &FinderStats {
        &self.stats
    }

    /// Missing modules with the sorted names of their importers.
    pub fn missing(&self) -> Vec<(String, Vec<String>)> {
        self.registry.missing()
    }

    /// Import `alias` as `canonical` from now on.
    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.registry
            .aliases
            .insert(alias.to_string(), canonical.to_string());
    }

    /// Keep `name` out of the result, whoever asks for it.
    pub fn exclude_module(&mut self, name: &str) {
        self.registry.exclude(name);
    }

    /// Drop the payload of a registered module.
    pub fn strip_module(&mut self, name: &str) -> bool {
        match self.registry.lookup(name) {
            Some(id) => {
                self.registry.get_mut(id).strip();
                true
            }
            None => false,
        }
    }

    /// Include the named module and everything it imports.
    pub fn include_module(&mut self, name: &str) -> Result<ModuleId> {
        let mut deferred = Deferred::new();
        let module = self.import_module(name, &mut deferred, None, 0)?;
        self.import_deferred(deferred)?;
        module.ok_or_else(|| FreezeError::ModuleNotFoundExplicit {
            name: name.to_string(),
        })
    }

    /// Include the named package, all of its submodules (recursively) and
    /// everything they import.
    pub fn include_package(&mut self, name: &str) -> Result<ModuleId> {
        let mut deferred = Deferred::new();
        let module = self
            .import_module(name, &mut deferred, None, 0)?
            .ok_or_else(|| FreezeError::ModuleNotFoundExplicit {
                name: name.to_string(),
            })?;
        if self.registry.get(module).is_package() {
            self.import_all_submodules(module, &mut deferred, true)?;
        }
        self.import_deferred(deferred)?;
        Ok(module)
    }

    /// Include a source file under the given module name (its file stem by
    /// default).
    pub fn include_file(&mut self, path: &Path, name: Option<&str>) -> Result<ModuleId> {
        let bytes = fs::read(path).map_err(|e| FreezeError::io(path, e))?;
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| FreezeError::Config(format!("no module name for {path:?}")))?,
        };
        let located = Located {
            bytes,
            origin: path.to_path_buf(),
            kind: UnitKind::SourceText,
            in_archive: false,
        };
        self.include_located(&name, located)
    }

    /// Include in-memory source text as a module.
    pub fn include_source(&mut self, name: &str, text: &str, origin: &Path) -> Result<ModuleId> {
        let located = Located {
            bytes: text.as_bytes().to_vec(),
            origin: origin.to_path_buf(),
            kind: UnitKind::SourceText,
            in_archive: false,
        };
        self.include_located(name, located)
    }

    /// Include an already compiled module. Its units are scanned in their
    /// own format; everything they import is loaded in the run's format.
    pub fn register_compiled(&mut self, name: &str, compiled: CompiledModule) -> Result<ModuleId> {
        self.ensure_not_excluded(name)?;
        let origin = PathBuf::from(format!("<{name}>"));
        compiled.validate(&origin)?;

        let mut deferred = Deferred::new();
        let parent = self.registry.parent_of(name);
        let module = self.add_loaded(name, Some(compiled), origin, false, parent, &mut deferred)?;
        self.import_deferred(deferred)?;
        Ok(module)
    }

    fn include_located(&mut self, name: &str, located: Located) -> Result<ModuleId> {
        self.ensure_not_excluded(name)?;
        let mut deferred = Deferred::new();
        let parent = self.registry.parent_of(name);
        let module = self.load_module(name, located, parent, &mut deferred)?;
        self.import_deferred(deferred)?;
        Ok(module)
    }

    /// Excluded names stay out even when their contents are handed over
    /// directly.
    fn ensure_not_excluded(&self, name: &str) -> Result<()> {
        if self.registry.excluded.contains(name) {
            return Err(FreezeError::ModuleNotFoundExplicit {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Resolve `name` at the given relative level on behalf of `caller`.
    ///
    /// Without a caller a failure is a hard error; otherwise the miss is run
    /// past the missing hooks and recorded in the report.
    pub(crate) fn import_module(
        &mut self,
        name: &str,
        deferred: &mut Deferred,
        caller: Option<ModuleId>,
        level: i64,
    ) -> Result<Option<ModuleId>> {
        let (mut module, mut report, name) = if level > 0 {
            self.import_leveled(name, deferred, caller, level)?
        } else if level < 0 && self.implicit_relative {
            self.import_implicit(name, deferred, caller)?
        } else {
            let (module, report) = self.internal_import(name, deferred)?;
            (module, report, name.to_string())
        };

        if module.is_some() {
            return Ok(module);
        }
        let Some(caller) = caller else {
            return Err(FreezeError::ModuleNotFoundExplicit { name });
        };

        if report {
            self.run_missing_hooks(&name, caller)?;
            if self.registry.aliases.contains_key(&name) {
                (module, report) = self.internal_import(&name, deferred)?;
            }
        }
        if module.is_none() && report && !self.registry.get(caller).ignore_names.contains(&name) {
            let importer = self.registry.get(caller).name.clone();
            self.registry.report_missing(&name, &importer);
        }
        Ok(module)
    }

    /// Strip `level` package levels off the caller and search only inside
    /// the package that remains.
    fn import_leveled(
        &mut self,
        name: &str,
        deferred: &mut Deferred,
        caller: Option<ModuleId>,
        mut level: i64,
    ) -> Result<(Option<ModuleId>, bool, String)> {
        let dots = ".".repeat(usize::try_from(level).unwrap_or_default());
        let mut parent = caller;
        if let Some(id) = parent {
            if self.registry.get(id).is_package() {
                level -= 1;
            }
        }
        while let Some(id) = parent {
            if level <= 0 {
                break;
            }
            parent = self.registry.parent_of(&self.registry.get(id).name);
            level -= 1;
        }

        let Some(parent) = parent else {
            // A bare `from . import x` past the top is reported by its dots.
            let reported = if name.is_empty() { dots } else { name.to_string() };
            return Ok((None, true, reported));
        };
        if name.is_empty() {
            return Ok((Some(parent), false, name.to_string()));
        }
        let full_name = format!("{}.{name}", self.registry.get(parent).name);
        let (module, report) = self.internal_import(&full_name, deferred)?;
        Ok((module, report, full_name))
    }

    /// Try `name` inside every enclosing package of the caller, innermost
    /// first, then as an absolute name.
    fn import_implicit(
        &mut self,
        name: &str,
        deferred: &mut Deferred,
        caller: Option<ModuleId>,
    ) -> Result<(Option<ModuleId>, bool, String)> {
        let mut parent = caller.and_then(|id| {
            let module = self.registry.get(id);
            if module.is_package() {
                Some(id)
            } else {
                self.registry.parent_of(&module.name)
            }
        });
        while let Some(id) = parent {
            let parent_name = self.registry.get(id).name.clone();
            let (module, _) = self.internal_import(&format!("{parent_name}.{name}"), deferred)?;
            if module.is_some() {
                self.registry.get_mut(id).add_global_name(name);
                return Ok((module, false, name.to_string()));
            }
            parent = self.registry.parent_of(&parent_name);
        }
        let (module, report) = self.internal_import(name, deferred)?;
        Ok((module, report, name.to_string()))
    }

    /// Resolve an absolute dotted name. The flag tells whether a miss should
    /// be reported (excluded names are not).
    fn internal_import(
        &mut self,
        name: &str,
        deferred: &mut Deferred,
    ) -> Result<(Option<ModuleId>, bool)> {
        if let Some(canonical) = self.canonical_name(name) {
            let (module, report) = self.internal_import(&canonical, deferred)?;
            let entry = match module {
                Some(id) => Entry::Found(id),
                None if report => Entry::Absent(Absence::NotFound),
                None => Entry::Absent(Absence::Excluded),
            };
            self.registry.redirect(name, entry);
            return Ok((module, report));
        }

        match self.registry.entry(name) {
            Some(Entry::Found(id)) => return Ok((Some(id), false)),
            Some(Entry::Absent(Absence::Excluded)) => return Ok((None, false)),
            Some(Entry::Absent(Absence::NotFound)) => return Ok((None, true)),
            None => {}
        }
        if self.registry.excluded.contains(name) {
            self.registry.mark_absent(name, Absence::Excluded);
            return Ok((None, false));
        }

        if self.builtins.contains(name) {
            let id = self.registry.add(name);
            self.run_load_hooks(id)?;
            return Ok((Some(id), false));
        }

        let (search_path, search_name, parent) = match name.rsplit_once('.') {
            None => (self.path.clone(), name.to_string(), None),
            Some((parent_name, last)) => {
                let (parent, report) = self.internal_import(parent_name, deferred)?;
                let Some(parent) = parent else {
                    return Ok((None, report));
                };
                let path = self.registry.get(parent).path.clone().unwrap_or_default();
                (path, last.to_string(), Some(parent))
            }
        };

        self.stats.searches += 1;
        match self.backend.find(&search_name, &search_path)? {
            Some(located) => {
                let id = self.load_module(name, located, parent, deferred)?;
                Ok((Some(id), false))
            }
            None => {
                debug!(module = name, "not found");
                self.registry.mark_absent(name, Absence::NotFound);
                Ok((None, true))
            }
        }
    }

    /// Follow the alias chain of `name`, if it has one.
    fn canonical_name(&self, name: &str) -> Option<String> {
        let mut seen = HashSet::new();
        let mut current = name;
        while let Some(next) = self.registry.aliases.get(current) {
            if next == name || !seen.insert(next.as_str()) {
                break;
            }
            current = next;
        }
        (current != name).then(|| current.to_string())
    }

    fn load_module(
        &mut self,
        name: &str,
        located: Located,
        parent: Option<ModuleId>,
        deferred: &mut Deferred,
    ) -> Result<ModuleId> {
        if located.kind == UnitKind::PackageDirectory {
            return self.load_package(name, located, parent, deferred);
        }

        let compiled = CompiledModule::load(
            &located.bytes,
            located.kind,
            &located.origin,
            self.format,
            self.implicit_relative,
        )?;
        self.stats.loads += 1;
        self.add_loaded(name, compiled, located.origin, located.in_archive, parent, deferred)
    }

    /// Register a module whose units are already built, then run its hooks
    /// and scan it.
    fn add_loaded(
        &mut self,
        name: &str,
        compiled: Option<CompiledModule>,
        origin: PathBuf,
        in_archive: bool,
        parent: Option<ModuleId>,
        deferred: &mut Deferred,
    ) -> Result<ModuleId> {
        let id = self.registry.add(name);
        let module = self.registry.get_mut(id);
        module.parent = parent;
        module.in_archive = in_archive;
        module.set_compiled(origin, compiled);
        debug!(module = name, file = ?module.file(), "loaded");

        self.run_load_hooks(id)?;
        self.replace_paths_in_code(id);
        self.scan_code(id, deferred)?;
        Ok(id)
    }

    fn load_package(
        &mut self,
        name: &str,
        located: Located,
        parent: Option<ModuleId>,
        deferred: &mut Deferred,
    ) -> Result<ModuleId> {
        let id = self.registry.add(name);
        let module = self.registry.get_mut(id);
        module.path = Some(vec![located.origin.clone()]);
        module.parent = parent;
        module.in_archive = located.in_archive;

        self.stats.searches += 1;
        match self.backend.find(PACKAGE_INIT, &[located.origin])? {
            Some(init) => self.load_module(name, init, parent, deferred),
            None => Ok(id),
        }
    }

    /// Rewrite the recorded source locations of a freshly loaded module.
    fn replace_paths_in_code(&mut self, id: ModuleId) {
        if self.replace_paths.is_empty() {
            return;
        }

        let mut top = id;
        while let Some(parent) = self.registry.get(top).parent {
            top = parent;
        }
        let top = self.registry.get(top);
        let top_dir = top.file().and_then(Path::parent).map(|dir| {
            if top.is_package() {
                dir.parent().unwrap_or(dir)
            } else {
                dir
            }
        });
        let star = top_dir
            .map(|dir| dir.display().to_string())
            .filter(|dir| !dir.is_empty())
            .map(|dir| dir + &MAIN_SEPARATOR.to_string())
            .unwrap_or_default();

        let rules = self.replace_paths.clone();
        let Some(compiled) = self.registry.get_mut(id).compiled_mut() else {
            return;
        };
        compiled.rewrite_filenames(|filename| {
            rules.iter().find_map(|(search, replace)| {
                if search == "*" && star.is_empty() {
                    return None;
                }
                let search = if search == "*" { &star } else { search };
                filename
                    .strip_prefix(search.as_str())
                    .map(|rest| format!("{replace}{rest}"))
            })
        });
    }

    /// Satisfy a from-list against a package. Requests coming from outside
    /// the package are deferred until the current scan is over.
    pub(crate) fn ensure_from_list(
        &mut self,
        caller: ModuleId,
        package: ModuleId,
        from_list: Vec<String>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        if caller != package {
            deferred.push((package, from_list));
            return Ok(());
        }

        let package_module = self.registry.get(package);
        let names = if scan::is_wildcard(&from_list) {
            package_module.export_names.clone()
        } else {
            from_list
        };
        let package_name = package_module.name.clone();
        for name in names {
            if self.registry.get(package).global_names.contains(&name) {
                continue;
            }
            self.import_module(&format!("{package_name}.{name}"), deferred, Some(package), 0)?;
        }
        Ok(())
    }

    /// Drain deferred from-lists in rounds until a round adds no more work.
    fn import_deferred(&mut self, mut deferred: Deferred) -> Result<()> {
        while !deferred.is_empty() {
            self.stats.deferred_rounds.push(deferred.len());
            debug!(pending = deferred.len(), "deferred import round");
            let mut next = Deferred::new();
            for (package, names) in deferred {
                self.ensure_from_list(package, package, names, &mut next)?;
            }
            deferred = next;
        }
        Ok(())
    }

    fn import_all_submodules(
        &mut self,
        package: ModuleId,
        deferred: &mut Deferred,
        recursive: bool,
    ) -> Result<()> {
        let (package_name, path) = {
            let module = self.registry.get(package);
            (module.name.clone(), module.path.clone().unwrap_or_default())
        };

        for name in self.backend.submodules(&path) {
            let full_name = format!("{package_name}.{name}");
            let (module, report) = self.internal_import(&full_name, deferred)?;
            let Some(module) = module else {
                if report {
                    return Err(FreezeError::ModuleNotFoundExplicit { name: full_name });
                }
                continue;
            };
            self.registry.get_mut(package).add_global_name(&name);
            if recursive && self.registry.get(module).is_package() {
                self.import_all_submodules(module, deferred, recursive)?;
            }
        }
        debug!(package = package_name, "included all submodules");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, pretty_assertions::assert_eq, tempfile::TempDir};

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn leveled_import_from_package_and_module() {
        let dir = tree(&[
            ("pkg/__init__.py", ""),
            ("pkg/x.py", ""),
            ("pkg/sub/__init__.py", "from . import x\n"),
            ("pkg/sub/x.py", ""),
            ("pkg/mod.py", "from .x import *\n"),
        ]);
        let mut finder = Finder::new(vec![dir.path().to_path_buf()]);

        finder.include_module("pkg.sub").unwrap();
        assert!(finder.lookup("pkg.sub.x").is_some());
        assert!(finder.lookup("pkg.x").is_none());

        finder.include_module("pkg.mod").unwrap();
        assert!(finder.lookup("pkg.x").is_some());
        assert!(finder.missing().is_empty());
    }

    #[test]
    fn leveled_import_past_top_is_reported() {
        let dir = tree(&[("top.py", "from ..nothing import thing\n")]);
        let mut finder = Finder::new(vec![dir.path().to_path_buf()]);
        finder.include_module("top").unwrap();
        assert_eq!(finder.missing(), vec![("nothing".to_string(), vec!["top".to_string()])]);
    }

    #[test]
    fn bare_relative_import_past_top_keeps_its_dots() {
        let dir = tree(&[
            ("top.py", "from . import sibling
"),
            ("deep.py", "from .. import cousin
"),
        ]);
        let mut finder = Finder::new(vec![dir.path().to_path_buf()]);
        finder.include_module("top").unwrap();
        finder.include_module("deep").unwrap();
        assert_eq!(
            finder.missing(),
            vec![
                (".".to_string(), vec!["top".to_string()]),
                ("..".to_string(), vec!["deep".to_string()]),
            ]
        );
    }

    #[test]
    fn implicit_relative_walks_up_then_falls_back() {
        let dir = tree(&[
            ("outer/__init__.py", ""),
            ("outer/helper.py", ""),
            ("outer/inner/__init__.py", ""),
            ("outer/inner/user.py", "import helper\nimport toplevel\n"),
            ("toplevel.py", ""),
        ]);

        let mut finder =
            Finder::new(vec![dir.path().to_path_buf()]).with_implicit_relative(true);
        finder.include_module("outer.inner.user").unwrap();
        assert!(finder.lookup("outer.helper").is_some());
        assert!(finder.lookup("toplevel").is_some());
        assert!(finder.lookup("helper").is_none());
        assert!(finder.missing().is_empty());

        // Off by default: `helper` is then an absolute import.
        let mut finder = Finder::new(vec![dir.path().to_path_buf()]);
        finder.include_module("outer.inner.user").unwrap();
        assert_eq!(finder.missing()[0].0, "helper");
    }

    #[test]
    fn submodules_search_only_package_path() {
        let dir = tree(&[("pkg/__init__.py", ""), ("stray.py", "")]);
        let mut finder = Finder::new(vec![dir.path().to_path_buf()]);
        let pkg = finder.include_module("pkg").unwrap();
        assert_eq!(
            finder.module(pkg).path,
            Some(vec![dir.path().join("pkg")])
        );
        assert!(matches!(
            finder.include_module("pkg.stray"),
            Err(FreezeError::ModuleNotFoundExplicit { .. })
        ));
    }

    #[test]
    fn builtins_need_no_backing_file() {
        let mut finder = Finder::new(Vec::new()).with_builtins(["sys".to_string()]);
        let id = finder.include_module("sys").unwrap();
        assert!(finder.module(id).compiled().is_none());
        assert_eq!(finder.stats().searches, 0);
    }

    #[test]
    fn replace_paths_rewrites_locations() {
        let dir = tree(&[("pkg/__init__.py", ""), ("pkg/leaf.py", "def f():\n    pass\n")]);
        let mut finder = Finder::new(vec![dir.path().to_path_buf()])
            .with_replace_paths(vec![("*".to_string(), "/frozen/".to_string())]);
        let id = finder.include_module("pkg.leaf").unwrap();
        let compiled = finder.module(id).compiled().unwrap();
        let expected = format!("/frozen/pkg{MAIN_SEPARATOR}leaf.py");
        assert!(compiled.units.iter().all(|u| u.filename == expected));
    }

    #[test]
    fn strip_module_clears_payload() {
        let mut finder = Finder::new(Vec::new());
        let id = finder
            .include_source("m", "x = 1\n", Path::new("m.py"))
            .unwrap();
        assert!(finder.strip_module("m"));
        assert!(finder.module(id).compiled().is_none());
        assert!(finder.module(id).file().is_none());
        assert!(!finder.strip_module("unknown"));
    }
}
