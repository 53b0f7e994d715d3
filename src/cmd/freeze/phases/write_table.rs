use {
    crate::cmd::{
        freeze::{
            Freezer,
            phases::{self, FreezingPhase},
        },
        print_missing_report,
        print_module_report,
    },
    anyhow::{Context, Result},
    modfreeze::FrozenTable,
};

/// Emits the frozen table and its manifest.
#[derive(Debug, Default)]
pub struct WriteTable;

impl FreezingPhase for WriteTable {}

impl<'a> Freezer<'a, WriteTable> {
    pub fn write_table(self) -> Result<Freezer<'a, phases::CompleteFreezing>> {
        let finder = &self.ctx.finder;
        print_module_report(finder);
        print_missing_report(finder);

        let table = FrozenTable::from_finder(finder).context("failed to build frozen table")?;
        let missing = finder.missing();
        let (source, manifest) = table
            .write(&self.ctx.out_dir, &self.ctx.target, &missing)
            .context(format!("failed to write frozen table to {:?}", self.ctx.out_dir))?;

        Ok(Freezer {
            ctx: self.ctx,
            state: phases::CompleteFreezing {
                entries: table.entries.len(),
                missing: missing.len(),
                source,
                manifest,
            },
        })
    }
}
