use {
    crate::cmd::SubCmd,
    anyhow::{Context, Result},
    argh::FromArgs,
    modfreeze::{FormatVersion, finder::backend::COMPILED_SUFFIX, unit::compile::Compiler},
    std::{fs, path::PathBuf},
};

/// Compile a source file into a precompiled unit file.
#[derive(FromArgs)]
#[argh(subcommand, name = "compile")]
pub struct CompileSubCmd {
    #[argh(positional)]
    /// source file
    source: PathBuf,

    #[argh(option, short = 'o')]
    /// output file (default: source with the compiled suffix)
    out: Option<PathBuf>,

    #[argh(switch)]
    /// emit the legacy instruction format
    legacy: bool,

    #[argh(switch)]
    /// compile unqualified imports as implicit relative ones
    implicit_relative: bool,
}

impl SubCmd for CompileSubCmd {
    fn run(&self) -> Result<()> {
        let text = fs::read_to_string(&self.source)
            .context(format!("failed to read source file {:?}", self.source))?;
        let format = if self.legacy {
            FormatVersion::Legacy
        } else {
            FormatVersion::Wordcode
        };

        let compiled = Compiler::new(format, &self.source)
            .implicit_relative(self.implicit_relative)
            .compile(&text)
            .context(format!("failed to compile {:?}", self.source))?;

        let out = self
            .out
            .clone()
            .unwrap_or_else(|| self.source.with_extension(COMPILED_SUFFIX));
        fs::write(&out, compiled.to_file_bytes()?)
            .context(format!("failed to write {out:?}"))?;

        println!(
            "Compiled {:?} into {:?} ({} units)",
            self.source,
            out,
            compiled.units.len()
        );
        Ok(())
    }
}
