use {
    crate::{
        config::HookSpec,
        error::{FreezeError, Result},
        finder::{Finder, ModuleId},
    },
    std::{collections::HashMap, fmt, rc::Rc},
};

/// Called right after a module finished loading, before it is scanned.
pub type LoadHook = Rc<dyn Fn(&mut Finder, ModuleId) -> anyhow::Result<()>>;

/// Called when the named module could not be resolved for an importer.
pub type MissingHook = Rc<dyn Fn(&mut Finder, &str, ModuleId) -> anyhow::Result<()>>;

/// Callbacks keyed by exact module name.
#[derive(Default, Clone)]
pub struct HookTable {
    load: HashMap<String, Vec<LoadHook>>,
    missing: HashMap<String, Vec<MissingHook>>,
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut load: Vec<_> = self.load.keys().collect();
        let mut missing: Vec<_> = self.missing.keys().collect();
        load.sort();
        missing.sort();
        f.debug_struct("HookTable")
            .field("load", &load)
            .field("missing", &missing)
            .finish()
    }
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_load<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Finder, ModuleId) -> anyhow::Result<()> + 'static,
    {
        self.load
            .entry(name.to_string())
            .or_default()
            .push(Rc::new(hook));
        self
    }

    pub fn on_missing<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Finder, &str, ModuleId) -> anyhow::Result<()> + 'static,
    {
        self.missing
            .entry(name.to_string())
            .or_default()
            .push(Rc::new(hook));
        self
    }

    /// Register the declarative hook described by `spec` for `name`.
    pub fn declare(&mut self, name: &str, spec: &HookSpec) -> &mut Self {
        if spec.has_load_actions() {
            let spec = spec.clone();
            self.on_load(name, move |finder, id| {
                for excluded in &spec.excludes {
                    finder.exclude_module(excluded);
                }
                let module = finder.module_mut(id);
                spec.global_names.iter().for_each(|n| module.add_global_name(n));
                spec.exclude_names.iter().for_each(|n| module.exclude_name(n));
                spec.ignore_names.iter().for_each(|n| module.ignore_name(n));
                for included in &spec.includes {
                    finder.include_module(included)?;
                }
                Ok(())
            });
        }
        if spec.has_missing_actions() {
            let spec = spec.clone();
            self.on_missing(name, move |finder, missing, importer| {
                if let Some(substitute) = &spec.substitute {
                    finder.add_alias(missing, substitute);
                }
                if spec.ignore_missing {
                    finder.module_mut(importer).ignore_name(missing);
                }
                Ok(())
            });
        }
        self
    }

    fn load_hooks(&self, name: &str) -> Vec<LoadHook> {
        self.load.get(name).cloned().unwrap_or_default()
    }

    fn missing_hooks(&self, name: &str) -> Vec<MissingHook> {
        self.missing.get(name).cloned().unwrap_or_default()
    }
}

impl Finder {
    pub(crate) fn run_load_hooks(&mut self, id: ModuleId) -> Result<()> {
        let name = self.registry.get(id).name.clone();
        for hook in self.hooks.load_hooks(&name) {
            hook(self, id).map_err(|source| FreezeError::HookInvocationFailure {
                name: name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub(crate) fn run_missing_hooks(&mut self, name: &str, importer: ModuleId) -> Result<()> {
        for hook in self.hooks.missing_hooks(name) {
            hook(self, name, importer).map_err(|source| FreezeError::HookInvocationFailure {
                name: name.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::path::Path};

    #[test]
    fn hook_failures_are_fatal() {
        let mut finder = Finder::new(Vec::new());
        finder
            .hooks_mut()
            .on_load("bad", |_: &mut Finder, _: ModuleId| Err(anyhow::anyhow!("boom")));
        let err = finder
            .include_source("bad", "x = 1\n", Path::new("<test>"))
            .unwrap_err();
        assert!(matches!(
            err,
            FreezeError::HookInvocationFailure { ref name, .. } if name == "bad"
        ));
    }

    #[test]
    fn declarative_substitute_redirects_missing_module() {
        let mut finder = Finder::new(Vec::new());
        finder
            .include_source("real_impl", "value = 1\n", Path::new("<test>"))
            .unwrap();
        finder.hooks_mut().declare(
            "compat",
            &HookSpec {
                substitute: Some("real_impl".into()),
                ..Default::default()
            },
        );

        finder
            .include_source("app", "import compat\n", Path::new("<test>"))
            .unwrap();
        assert!(finder.missing().is_empty());
        assert_eq!(finder.lookup("compat"), finder.lookup("real_impl"));
    }

    #[test]
    fn declarative_ignore_missing_suppresses_report() {
        let mut finder = Finder::new(Vec::new());
        finder.hooks_mut().declare(
            "win_only",
            &HookSpec {
                ignore_missing: true,
                ..Default::default()
            },
        );
        finder
            .include_source("app", "import win_only\nimport other\n", Path::new("<test>"))
            .unwrap();
        assert_eq!(
            finder.missing(),
            vec![("other".to_string(), vec!["app".to_string()])]
        );
    }

    #[test]
    fn declarative_load_actions_patch_module() {
        let mut finder = Finder::new(Vec::new());
        finder
            .include_source("extra", "", Path::new("<test>"))
            .unwrap();
        finder.hooks_mut().declare(
            "lib",
            &HookSpec {
                includes: vec!["extra".into()],
                excludes: vec!["heavy".into()],
                global_names: vec!["injected".into()],
                ignore_names: vec!["optional".into()],
                ..Default::default()
            },
        );
        let id = finder
            .include_source("lib", "import heavy\nimport optional\n", Path::new("<test>"))
            .unwrap();
        assert!(finder.module(id).global_names.contains("injected"));
        assert!(finder.missing().is_empty());
        assert!(finder.lookup("heavy").is_none());
    }
}
