mod context;
mod phases;

use {
    crate::cmd::{SubCmd, freeze::context::FreezerContext, load_config},
    anyhow::{Context, Result},
    argh::FromArgs,
    phases::FreezingPhase,
    std::path::PathBuf,
};

/// Freeze a script and every module it imports into a module table.
#[derive(FromArgs)]
#[argh(subcommand, name = "freeze")]
pub struct FreezeSubCmd {
    #[argh(positional)]
    /// entry script
    script: PathBuf,

    #[argh(option, short = 'c')]
    /// configuration file (default: ./freeze.toml, if present)
    config: Option<PathBuf>,

    #[argh(option, short = 'o', default = "PathBuf::from(\"frozen\")")]
    /// output directory (default: ./frozen)
    out_dir: PathBuf,

    #[argh(option, short = 'n')]
    /// name of the executable the table is built for (default: script name)
    target_name: Option<String>,
}

impl SubCmd for FreezeSubCmd {
    fn run(&self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let mut ctx = FreezerContext::new(
            config,
            &self.script,
            &self.out_dir,
            self.target_name.as_deref(),
        )
        .context(format!(
            "failed to create freezer context for script {:?}",
            self.script
        ))?;

        Freezer::new(&mut ctx)?
            .resolve_modules()?
            .write_table()?
            .complete_freezing()
    }
}

#[derive(Debug)]
struct Freezer<'a, P: FreezingPhase = phases::ResolveModules> {
    ctx: &'a mut FreezerContext,
    state: P,
}

impl<'a> Freezer<'a> {
    fn new(ctx: &'a mut FreezerContext) -> Result<Self> {
        Ok(Self {
            ctx,
            state: phases::ResolveModules,
        })
    }
}
