use {
    crate::{
        error::Result,
        finder::{Deferred, Finder, ModuleId},
        unit::{CompiledModule, Constant, UnitId, opcode::OpKind},
    },
    std::collections::HashSet,
};

/// Name that holds a module's explicit export list.
pub const EXPORT_LIST: &str = "__all__";

/// Marker used in from-lists for `import *`.
pub const WILDCARD: &str = "*";

impl Finder {
    /// Scan the compiled units of `module`, resolving every import found and
    /// recording top-level bindings.
    pub(crate) fn scan_code(&mut self, module: ModuleId, deferred: &mut Deferred) -> Result<()> {
        let Some(compiled) = self.registry.get(module).compiled().cloned() else {
            return Ok(());
        };
        self.scan_unit(&compiled, CompiledModule::ROOT, module, deferred)
    }

    fn scan_unit(
        &mut self,
        compiled: &CompiledModule,
        id: UnitId,
        module: ModuleId,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let unit = compiled.unit(id);
        // Constants loaded since the last instruction that consumes them.
        let mut operands: Vec<Constant> = Vec::new();

        for instr in compiled.instructions(id) {
            let arg = instr.arg as usize;
            match instr.kind {
                OpKind::LoadConst => {
                    operands.push(unit.consts.get(arg).cloned().unwrap_or(Constant::None));
                }
                OpKind::ImportName => {
                    let Some(name) = unit.names.get(arg) else {
                        operands.clear();
                        continue;
                    };
                    let (level, from_list) = match operands.as_slice() {
                        [.., Constant::Int(level), from_list] => (*level, from_names(from_list)),
                        [.., from_list] => (-1, from_names(from_list)),
                        [] => (0, Vec::new()),
                    };
                    operands.clear();
                    self.scan_import(module, name, level, from_list, deferred)?;
                }
                OpKind::ImportFrom | OpKind::BuildList | OpKind::BuildTuple | OpKind::InplaceAdd => {}
                OpKind::StoreName | OpKind::StoreGlobal => {
                    if let Some(name) = unit.names.get(arg) {
                        let target = self.registry.get_mut(module);
                        if name == EXPORT_LIST {
                            target.export_names.extend(
                                operands.iter().filter_map(Constant::as_str).map(String::from),
                            );
                        }
                        target.add_global_name(name);
                    }
                    operands.clear();
                }
                _ => operands.clear(),
            }
        }

        for child in unit.children() {
            self.scan_unit(compiled, child, module, deferred)?;
        }
        Ok(())
    }

    fn scan_import(
        &mut self,
        module: ModuleId,
        name: &str,
        level: i64,
        from_list: Vec<String>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let importer = self.registry.get_mut(module);
        let unbound: Vec<String> = from_list
            .iter()
            .filter(|n| *n != WILDCARD && !importer.global_names.contains(*n))
            .cloned()
            .collect();
        for from_name in from_list.iter().filter(|n| *n != WILDCARD) {
            importer.add_global_name(from_name);
        }
        if importer.exclude_names.contains(name) {
            return Ok(());
        }

        let Some(target) = self.import_module(name, deferred, Some(module), level)? else {
            return Ok(());
        };

        // `from . import x` inside a package: the names just bound are its
        // own submodules.
        if target == module {
            let package_name = self.registry.get(module).name.clone();
            for from_name in unbound {
                let full_name = format!("{package_name}.{from_name}");
                self.import_module(&full_name, deferred, Some(module), 0)?;
            }
            return Ok(());
        }

        if is_wildcard(&from_list) {
            let exported = {
                let target = self.registry.get(target);
                if target.export_names.is_empty() {
                    target
                        .global_names
                        .iter()
                        .filter(|n| !n.starts_with('_'))
                        .cloned()
                        .collect::<HashSet<_>>()
                } else {
                    target.export_names.iter().cloned().collect()
                }
            };
            self.registry.get_mut(module).global_names.extend(exported);
        }

        if !from_list.is_empty() && self.registry.get(target).is_package() {
            self.ensure_from_list(module, target, from_list, deferred)?;
        }
        Ok(())
    }
}

pub(crate) fn is_wildcard(from_list: &[String]) -> bool {
    matches!(from_list, [only] if only == WILDCARD)
}

fn from_names(constant: &Constant) -> Vec<String> {
    match constant {
        Constant::Tuple(items) => items
            .iter()
            .filter_map(Constant::as_str)
            .map(String::from)
            .collect(),
        Constant::Str(name) => vec![name.clone()],
        _ => Vec::new(),
    }
}
