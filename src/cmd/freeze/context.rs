use {
    anyhow::{Context, Result, anyhow},
    modfreeze::{Finder, FreezeConfig, entry_module_name},
    std::path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct FreezerContext {
    /// Run configuration, from `freeze.toml` or `--config`.
    pub config: FreezeConfig,

    /// Entry script, in canonical form.
    pub script: PathBuf,

    /// Name of the executable the table is built for.
    pub target: String,

    /// Module name the bootstrap runs first, derived from `target`.
    pub main_module: String,

    /// Directory receiving the generated files.
    pub out_dir: PathBuf,

    /// Resolution state of this run.
    pub finder: Finder,
}

impl FreezerContext {
    pub fn new(
        config: FreezeConfig,
        script: &Path,
        out_dir: &Path,
        target: Option<&str>,
    ) -> Result<Self> {
        let script = script
            .canonicalize()
            .context("entry script is not found")?;

        let target = match target {
            Some(target) => target.to_string(),
            None => script
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .ok_or_else(|| anyhow!("cannot derive target name from {script:?}"))?,
        };
        let main_module = entry_module_name(Path::new(&target));
        let finder = Finder::from_config(&config);

        Ok(Self {
            config,
            script,
            target,
            main_module,
            out_dir: out_dir.to_path_buf(),
            finder,
        })
    }
}
