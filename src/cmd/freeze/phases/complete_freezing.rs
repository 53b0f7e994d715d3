use {
    crate::cmd::freeze::{Freezer, phases::FreezingPhase},
    anyhow::Result,
    std::path::PathBuf,
};

/// Marks the end of the freezing process.
#[derive(Debug)]
pub struct CompleteFreezing {
    pub entries: usize,
    pub missing: usize,
    pub source: PathBuf,
    pub manifest: PathBuf,
}

impl FreezingPhase for CompleteFreezing {}

impl<'a> Freezer<'a, CompleteFreezing> {
    pub fn complete_freezing(self) -> Result<()> {
        println!(
            "Target {:?} frozen into {:?} ({} modules, manifest {:?})",
            self.ctx.target, self.state.source, self.state.entries, self.state.manifest
        );
        if self.state.missing > 0 {
            println!("{} module(s) could not be found, see the report above", self.state.missing);
        }

        Ok(())
    }
}
