use {
    crate::cmd::{SubCmd, load_config, print_missing_report, print_module_report},
    anyhow::{Context, Result},
    argh::FromArgs,
    modfreeze::Finder,
    std::path::PathBuf,
};

/// Resolve the given modules and report what they import, without writing
/// anything.
#[derive(FromArgs)]
#[argh(subcommand, name = "scan")]
pub struct ScanSubCmd {
    #[argh(positional)]
    /// dotted module names
    modules: Vec<String>,

    #[argh(option, short = 'c')]
    /// configuration file (default: ./freeze.toml, if present)
    config: Option<PathBuf>,

    #[argh(switch)]
    /// include the named modules as packages, with all their submodules
    packages: bool,
}

impl SubCmd for ScanSubCmd {
    fn run(&self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let mut finder = Finder::from_config(&config);

        for name in &self.modules {
            let included = if self.packages {
                finder.include_package(name)
            } else {
                finder.include_module(name)
            };
            included.context(format!("failed to resolve {name}"))?;
        }

        print_module_report(&finder);
        print_missing_report(&finder);

        let stats = finder.stats();
        println!(
            "{} modules resolved ({} searches, {} loads, {} deferred rounds)",
            finder.registry().modules().count(),
            stats.searches,
            stats.loads,
            stats.deferred_rounds.len()
        );
        Ok(())
    }
}
