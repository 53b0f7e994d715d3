use {
    crate::cmd::freeze::{
        Freezer,
        phases::{self, FreezingPhase},
    },
    anyhow::{Context, Result},
    modfreeze::config::CONSTANTS_MODULE,
    std::path::Path,
    tap::Tap,
};

/// Resolves the entry script, explicit includes and everything they import.
#[derive(Debug, Default)]
pub struct ResolveModules;

impl FreezingPhase for ResolveModules {}

impl<'a> Freezer<'a, ResolveModules> {
    pub fn resolve_modules(self) -> Result<Freezer<'a, phases::WriteTable>> {
        let ctx = &mut *self.ctx;
        let finder = &mut ctx.finder;

        // Generated first, so that anything below may import it.
        if let Some(source) = ctx
            .config
            .constants_source()
            .context("failed to render build constants")?
        {
            finder
                .include_source(CONSTANTS_MODULE, &source, Path::new(CONSTANTS_MODULE))
                .context("failed to compile build constants")?;
            println!("- Generated module: {CONSTANTS_MODULE:?}");
        }

        for name in &ctx.config.includes {
            finder
                .include_module(name)
                .context(format!("failed to include module {name}"))?;
            println!("- Included module: {name:?}");
        }

        for name in &ctx.config.packages {
            finder
                .include_package(name)
                .context(format!("failed to include package {name}"))?;
            println!("- Included package: {name:?}");
        }

        finder
            .include_file(&ctx.script, Some(&ctx.main_module))
            .context(format!("failed to include script {:?}", ctx.script))?;
        println!(
            "- Included script: {:?} as {:?}",
            ctx.script, ctx.main_module
        );

        for name in &ctx.config.strip {
            finder.strip_module(name).tap(|&res| {
                println!(
                    "- Stripping module: {name:?} {}",
                    if res { "[stripped]" } else { "[not found]" }
                );
            });
        }

        Ok(Freezer {
            ctx: self.ctx,
            state: phases::WriteTable,
        })
    }
}
