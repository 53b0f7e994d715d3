pub mod compile;
pub mod freeze;
pub mod scan;

use {
    anyhow::{Context, Result},
    argh::FromArgs,
    compile::CompileSubCmd,
    freeze::FreezeSubCmd,
    modfreeze::{FreezeConfig, Finder},
    scan::ScanSubCmd,
    std::path::{Path, PathBuf},
};

/// Configuration file picked up from the working directory when no
/// `--config` is given.
pub const DEFAULT_CONFIG: &str = "freeze.toml";

pub trait SubCmd {
    fn run(&self) -> anyhow::Result<()>;
}

/// Find the modules a program imports and freeze them into a module table.
#[derive(FromArgs)]
#[argh(help_triggers("-h", "--help", "help"))]
pub struct MainCmd {
    #[argh(subcommand)]
    nested: Cmd,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Cmd {
    Freeze(FreezeSubCmd),
    Scan(ScanSubCmd),
    Compile(CompileSubCmd),
}

impl MainCmd {
    /// Run the nested command.
    pub fn run(&self) -> Result<()> {
        match &self.nested {
            Cmd::Freeze(freeze_cmd) => freeze_cmd.run(),
            Cmd::Scan(scan_cmd) => scan_cmd.run(),
            Cmd::Compile(compile_cmd) => compile_cmd.run(),
        }
    }
}

/// Load the given configuration file, or `freeze.toml` if present.
pub fn load_config(path: Option<&Path>) -> Result<FreezeConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.is_file() {
                return Ok(FreezeConfig::default());
            }
            default
        }
    };
    FreezeConfig::load(&path).context(format!("failed to load configuration from {path:?}"))
}

/// Print every resolved module, packages marked `P`, modules `m`.
pub fn print_module_report(finder: &Finder) {
    let mut modules: Vec<_> = finder.registry().modules().map(|(_, m)| m).collect();
    modules.sort_by(|a, b| a.name.cmp(&b.name));

    println!();
    println!("  {:<40} File", "Name");
    println!("  {:<40} ----", "----");
    for module in modules {
        let kind = if module.is_package() { "P" } else { "m" };
        let file = module
            .file()
            .map(|f| f.display().to_string())
            .unwrap_or_default();
        println!("{kind} {:<40} {file}", module.name);
    }
    println!();
}

/// Print the consolidated missing-module report, if there is anything in it.
pub fn print_missing_report(finder: &Finder) {
    let missing = finder.missing();
    if missing.is_empty() {
        return;
    }
    println!("Missing modules:");
    for (name, importers) in missing {
        println!("? {name} imported from {}", importers.join(", "));
    }
    println!("This is not necessarily a problem - the modules may not be needed on this platform.");
    println!();
}
