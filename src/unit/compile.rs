//! Source text front end.
//!
//! Compiles the import-relevant subset of the source language into a
//! [`CompiledModule`]: imports, bindings at module, class and function level,
//! `__all__` declarations and the nesting of `def`/`class` bodies. Any other
//! statement is skipped; the result is only ever scanned, never run.

use {
    super::{
        CodeUnit,
        CompiledModule,
        Constant,
        UnitId,
        opcode::{FormatVersion, OpKind},
    },
    crate::error::{FreezeError, Result},
    regex::Regex,
    std::{
        collections::HashSet,
        path::{Path, PathBuf},
        sync::LazyLock,
    },
};

static FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^from\s+(\.*)\s*([\w.]*)\s+import\s+(.+)$").expect("valid regex")
});
static IMPORT_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w.]+)(?:\s+as\s+(\w+))?$").expect("valid regex"));
static DOTTED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*$").expect("valid regex")
});
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid regex"));
static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"\\]*)"|'([^'\\]*)'"#).expect("valid regex")
});
static AUGMENTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*(?:\+|-|\*\*|\*|//|/|%|>>|<<|&|\||\^|@)=").expect("valid regex")
});
static DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:async\s+)?def\s+(\w+)").expect("valid regex"));
static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^class\s+(\w+)").expect("valid regex"));
static FOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:async\s+)?for\s+(.+?)\s+in\s").expect("valid regex"));

const EXPORT_LIST: &str = "__all__";

/// Compiler from source text to compiled units.
#[derive(Debug, Clone)]
pub struct Compiler {
    format: FormatVersion,
    origin: PathBuf,
    implicit_relative: bool,
}

impl Compiler {
    pub fn new(format: FormatVersion, origin: &Path) -> Self {
        Self {
            format,
            origin: origin.to_path_buf(),
            implicit_relative: false,
        }
    }

    /// Compile unqualified imports with the legacy implicit-relative level.
    pub fn implicit_relative(mut self, enabled: bool) -> Self {
        self.implicit_relative = enabled;
        self
    }

    pub fn compile(&self, text: &str) -> Result<CompiledModule> {
        let lines = logical_lines(text);
        let mut pos = 0;
        let body = parse_block(&lines, &mut pos);

        let filename = self.origin.display().to_string();
        let mut emitter = Emitter {
            compiler: self,
            implicit_relative: self.implicit_relative,
            units: vec![CodeUnit::new("<module>", &filename, None)],
        };
        let mut scope = Scope::new(CompiledModule::ROOT, ScopeKind::Module);
        emitter.block(&mut scope, &body)?;
        emitter.finish(&scope, 0)?;

        Ok(CompiledModule {
            format: self.format,
            units: emitter.units,
        })
    }
}

#[derive(Debug)]
struct Line {
    number: usize,
    indent: usize,
    text: String,
}

#[derive(Debug)]
enum Stmt {
    Simple {
        line: usize,
        text: String,
    },
    Compound {
        line: usize,
        header: String,
        body: Vec<Stmt>,
    },
}

/// Split source into logical lines: comments and docstrings removed, bracket
/// and backslash continuations joined.
fn logical_lines(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut pending: Option<(Line, i32)> = None;
    let mut docstring: Option<&str> = None;

    for (idx, raw) in text.lines().enumerate() {
        if let Some(delim) = docstring {
            if raw.contains(delim) {
                docstring = None;
            }
            continue;
        }

        let mut content = strip_comment(raw).to_string();
        if let Some((start, delim, open)) = triple_quote(&content) {
            if open {
                docstring = Some(delim);
            }
            content.truncate(start);
        }

        let continued = content.trim_end().ends_with('\\');
        let content = content.trim_end().trim_end_matches('\\').to_string();
        let depth = bracket_depth(&content);

        let (mut line, total) = match pending.take() {
            Some((mut line, open)) => {
                line.text.push(' ');
                line.text.push_str(content.trim());
                (line, open + depth)
            }
            None => {
                if content.trim().is_empty() {
                    continue;
                }
                let indent = content.len() - content.trim_start().len();
                let line = Line {
                    number: idx + 1,
                    indent,
                    text: content.trim().to_string(),
                };
                (line, depth)
            }
        };

        if total > 0 || continued {
            pending = Some((line, total.max(0)));
        } else {
            line.text = line.text.trim().to_string();
            lines.push(line);
        }
    }
    if let Some((line, _)) = pending {
        lines.push(line);
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '#' => return &line[..idx],
            None => {}
        }
    }
    line
}

/// First triple quote outside ordinary string literals: its offset, the
/// delimiter and whether the string runs past the end of the line.
fn triple_quote(line: &str) -> Option<(usize, &'static str, bool)> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None => {
                let rest = &line[idx..];
                if let Some(delim) = ["\"\"\"", "'''"].into_iter().find(|d| rest.starts_with(d)) {
                    let open = !rest[delim.len()..].contains(delim);
                    return Some((idx, delim, open));
                }
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
            }
        }
    }
    None
}

fn bracket_depth(text: &str) -> i32 {
    let mut quote: Option<char> = None;
    let mut depth = 0;
    for ch in text.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            },
        }
    }
    depth
}

fn parse_block(lines: &[Line], pos: &mut usize) -> Vec<Stmt> {
    let mut stmts = Vec::new();
    let Some(first) = lines.get(*pos) else {
        return stmts;
    };
    let indent = first.indent;

    while let Some(line) = lines.get(*pos) {
        if line.indent < indent {
            break;
        }
        *pos += 1;
        match line.text.strip_suffix(':') {
            Some(header) => {
                let body = match lines.get(*pos) {
                    Some(next) if next.indent > line.indent => parse_block(lines, pos),
                    _ => Vec::new(),
                };
                stmts.push(Stmt::Compound {
                    line: line.number,
                    header: header.trim().to_string(),
                    body,
                });
            }
            None => stmts.push(Stmt::Simple {
                line: line.number,
                text: line.text.clone(),
            }),
        }
    }
    stmts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Class,
    Function,
}

#[derive(Debug)]
struct Scope {
    unit: UnitId,
    kind: ScopeKind,
    globals: HashSet<String>,
}

impl Scope {
    fn new(unit: UnitId, kind: ScopeKind) -> Self {
        Self {
            unit,
            kind,
            globals: HashSet::new(),
        }
    }

    fn store_op(&self, name: &str) -> OpKind {
        match self.kind {
            ScopeKind::Function if self.globals.contains(name) => OpKind::StoreGlobal,
            ScopeKind::Function => OpKind::StoreFast,
            ScopeKind::Module | ScopeKind::Class => OpKind::StoreName,
        }
    }
}

struct Emitter<'a> {
    compiler: &'a Compiler,
    implicit_relative: bool,
    units: Vec<CodeUnit>,
}

impl Emitter<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> FreezeError {
        FreezeError::InvalidSource {
            path: self.compiler.origin.clone(),
            line,
            message: message.into(),
        }
    }

    fn emit(&mut self, scope: &Scope, line: usize, kind: OpKind, arg: u32) -> Result<()> {
        let format = self.compiler.format;
        let code = &mut self.units[scope.unit.0].code;
        match format.encode(kind, arg, code) {
            Some(()) => Ok(()),
            None => Err(self.error(line, format!("{kind:?} has no encoding in {format:?}"))),
        }
    }

    fn add_const(&mut self, scope: &Scope, value: Constant) -> u32 {
        let consts = &mut self.units[scope.unit.0].consts;
        let idx = match consts.iter().position(|c| *c == value) {
            Some(idx) => idx,
            None => {
                consts.push(value);
                consts.len() - 1
            }
        };
        idx as u32
    }

    fn add_name(&mut self, scope: &Scope, name: &str) -> u32 {
        let names = &mut self.units[scope.unit.0].names;
        let idx = match names.iter().position(|n| n == name) {
            Some(idx) => idx,
            None => {
                names.push(name.to_string());
                names.len() - 1
            }
        };
        idx as u32
    }

    fn load_const(&mut self, scope: &Scope, line: usize, value: Constant) -> Result<()> {
        let idx = self.add_const(scope, value);
        self.emit(scope, line, OpKind::LoadConst, idx)
    }

    fn named(&mut self, scope: &Scope, line: usize, kind: OpKind, name: &str) -> Result<()> {
        let idx = self.add_name(scope, name);
        self.emit(scope, line, kind, idx)
    }

    fn store(&mut self, scope: &Scope, line: usize, name: &str) -> Result<()> {
        self.named(scope, line, scope.store_op(name), name)
    }

    fn finish(&mut self, scope: &Scope, line: usize) -> Result<()> {
        self.load_const(scope, line, Constant::None)?;
        self.emit(scope, line, OpKind::ReturnValue, 0)
    }

    fn block(&mut self, scope: &mut Scope, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            match stmt {
                Stmt::Simple { line, text } => self.simple(scope, *line, text)?,
                Stmt::Compound { line, header, body } => {
                    self.compound(scope, *line, header, body)?
                }
            }
        }
        Ok(())
    }

    fn compound(&mut self, scope: &mut Scope, line: usize, header: &str, body: &[Stmt]) -> Result<()> {
        let nested = if let Some(caps) = DEF.captures(header) {
            Some((caps[1].to_string(), ScopeKind::Function))
        } else {
            CLASS
                .captures(header)
                .map(|caps| (caps[1].to_string(), ScopeKind::Class))
        };

        let Some((name, kind)) = nested else {
            if let Some(caps) = FOR.captures(header) {
                for target in binding_targets(&caps[1]) {
                    self.store(scope, line, &target)?;
                }
            }
            return self.block(scope, body);
        };

        let id = UnitId(self.units.len());
        let filename = self.compiler.origin.display().to_string();
        self.units.push(CodeUnit::new(&name, &filename, Some(scope.unit)));

        let mut inner = Scope::new(id, kind);
        self.block(&mut inner, body)?;
        self.finish(&inner, line)?;

        self.load_const(scope, line, Constant::Code(id))?;
        self.load_const(scope, line, Constant::Str(name.clone()))?;
        self.emit(scope, line, OpKind::MakeFunction, 0)?;
        self.store(scope, line, &name)
    }

    fn simple(&mut self, scope: &mut Scope, line: usize, text: &str) -> Result<()> {
        if let Some(rest) = text.strip_prefix("import ") {
            return self.import(scope, line, rest.trim());
        }
        if text.starts_with("from ") {
            return self.from_import(scope, line, text);
        }
        if let Some(rest) = text.strip_prefix("global ") {
            scope
                .globals
                .extend(rest.split(',').map(|s| s.trim().to_string()));
            return Ok(());
        }
        if let Some(caps) = AUGMENTED.captures(text) {
            let name = caps[1].to_string();
            if name == EXPORT_LIST {
                self.named(scope, line, OpKind::LoadName, EXPORT_LIST)?;
                self.export_list(scope, line, text)?;
                self.emit(scope, line, OpKind::InplaceAdd, 0)?;
            } else {
                self.load_const(scope, line, Constant::None)?;
            }
            return self.store(scope, line, &name);
        }
        if let Some((lhs, _)) = text.split_once('=') {
            if text[lhs.len() + 1..].starts_with('=') {
                return Ok(());
            }
            let lhs = lhs.split(':').next().unwrap_or_default();
            let targets = binding_targets(lhs);
            if targets.is_empty() {
                return Ok(());
            }
            if targets.len() == 1 && targets[0] == EXPORT_LIST {
                self.export_list(scope, line, text)?;
            } else {
                self.load_const(scope, line, Constant::None)?;
            }
            for target in targets {
                self.store(scope, line, &target)?;
            }
        }
        Ok(())
    }

    /// Constant loads for the string literals on the right-hand side, folded
    /// into one list.
    fn export_list(&mut self, scope: &Scope, line: usize, text: &str) -> Result<()> {
        let rhs = text.split_once('=').map_or("", |(_, rhs)| rhs);
        let names: Vec<String> = STRING_LITERAL
            .captures_iter(rhs)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        let count = names.len() as u32;
        for name in names {
            self.load_const(scope, line, Constant::Str(name))?;
        }
        self.emit(scope, line, OpKind::BuildList, count)
    }

    fn default_level(&self) -> i64 {
        if self.implicit_relative { -1 } else { 0 }
    }

    fn import(&mut self, scope: &Scope, line: usize, items: &str) -> Result<()> {
        for item in items.split(',').map(str::trim) {
            let caps = IMPORT_ITEM
                .captures(item)
                .filter(|caps| DOTTED_NAME.is_match(&caps[1]))
                .ok_or_else(|| self.error(line, format!("invalid import of {item:?}")))?;
            let module = caps[1].to_string();
            let bound = match caps.get(2) {
                Some(alias) => alias.as_str().to_string(),
                None => module.split('.').next().unwrap_or_default().to_string(),
            };

            let level = self.default_level();
            self.load_const(scope, line, Constant::Int(level))?;
            self.load_const(scope, line, Constant::None)?;
            self.named(scope, line, OpKind::ImportName, &module)?;
            self.store(scope, line, &bound)?;
        }
        Ok(())
    }

    fn from_import(&mut self, scope: &Scope, line: usize, text: &str) -> Result<()> {
        let caps = FROM_IMPORT
            .captures(text)
            .ok_or_else(|| self.error(line, format!("invalid import statement {text:?}")))?;
        let dots = caps[1].len() as i64;
        let module = caps[2].to_string();
        if (dots == 0 && module.is_empty()) || (!module.is_empty() && !DOTTED_NAME.is_match(&module))
        {
            return Err(self.error(line, format!("invalid module name {module:?}")));
        }

        let list = caps[3]
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .to_string();
        if module == "__future__" && list.contains("absolute_import") {
            self.implicit_relative = false;
        }
        let level = if dots > 0 { dots } else { self.default_level() };

        if list.trim() == "*" {
            let from_list = Constant::Tuple(vec![Constant::Str("*".to_string())]);
            self.load_const(scope, line, Constant::Int(level))?;
            self.load_const(scope, line, from_list)?;
            self.named(scope, line, OpKind::ImportName, &module)?;
            return self.emit(scope, line, OpKind::ImportStar, 0);
        }

        let mut names = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let caps = IMPORT_ITEM
                .captures(item)
                .filter(|caps| IDENTIFIER.is_match(&caps[1]))
                .ok_or_else(|| self.error(line, format!("invalid imported name {item:?}")))?;
            let name = caps[1].to_string();
            let bound = caps.get(2).map_or(name.clone(), |m| m.as_str().to_string());
            names.push((name, bound));
        }
        if names.is_empty() {
            return Err(self.error(line, "empty import list"));
        }

        let from_list = Constant::Tuple(
            names
                .iter()
                .map(|(name, _)| Constant::Str(name.clone()))
                .collect(),
        );
        self.load_const(scope, line, Constant::Int(level))?;
        self.load_const(scope, line, from_list)?;
        self.named(scope, line, OpKind::ImportName, &module)?;
        for (name, bound) in &names {
            self.named(scope, line, OpKind::ImportFrom, name)?;
            self.store(scope, line, bound)?;
        }
        self.emit(scope, line, OpKind::PopTop, 0)
    }
}

/// Plain names bound by an assignment target such as `a`, `a, b` or
/// `(a, b)`. Anything else (attributes, subscripts) binds nothing at this
/// level.
fn binding_targets(lhs: &str) -> Vec<String> {
    let lhs = lhs
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']']);
    let targets: Vec<String> = lhs.split(',').map(|s| s.trim().to_string()).collect();
    if targets.iter().all(|t| IDENTIFIER.is_match(t)) {
        targets
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::unit::opcode::Instruction};

    fn compile(text: &str) -> CompiledModule {
        Compiler::new(FormatVersion::Wordcode, Path::new("test.py"))
            .compile(text)
            .unwrap()
    }

    fn kinds(module: &CompiledModule, id: UnitId) -> Vec<OpKind> {
        module.instructions(id).map(|i: Instruction| i.kind).collect()
    }

    #[test]
    fn from_import_shape() {
        let module = compile("from pkg.sub import a, b as c\n");
        assert_eq!(
            kinds(&module, CompiledModule::ROOT),
            vec![
                OpKind::LoadConst,
                OpKind::LoadConst,
                OpKind::ImportName,
                OpKind::ImportFrom,
                OpKind::StoreName,
                OpKind::ImportFrom,
                OpKind::StoreName,
                OpKind::PopTop,
                OpKind::LoadConst,
                OpKind::ReturnValue,
            ]
        );
        let root = module.root();
        assert!(root.names.contains(&"pkg.sub".to_string()));
        assert!(root.names.contains(&"c".to_string()));
        assert!(root.consts.contains(&Constant::Tuple(vec![
            Constant::Str("a".into()),
            Constant::Str("b".into())
        ])));
    }

    #[test]
    fn relative_levels_and_future_import() {
        let module = Compiler::new(FormatVersion::Legacy, Path::new("m.py"))
            .implicit_relative(true)
            .compile("import a\nfrom __future__ import absolute_import\nimport b\nfrom .. import c\n")
            .unwrap();
        let ints: Vec<i64> = module
            .root()
            .consts
            .iter()
            .filter_map(Constant::as_int)
            .collect();
        assert_eq!(ints, vec![-1, 0, 2]);
    }

    #[test]
    fn function_bodies_become_nested_units() {
        let module = compile(
            "def outer():\n    global g\n    import x\n    g = 1\n    class Inner:\n        import y\n",
        );
        assert_eq!(module.units.len(), 3);
        let outer = module.unit(UnitId(1));
        assert_eq!(outer.name, "outer");
        let ops = kinds(&module, UnitId(1));
        assert!(ops.contains(&OpKind::StoreFast));
        assert!(ops.contains(&OpKind::StoreGlobal));
        assert_eq!(module.unit(UnitId(2)).parent, Some(UnitId(1)));
    }

    #[test]
    fn continuation_docstrings_and_comments() {
        let module = compile(
            "\"\"\"Module doc.\n\nimport fake\n\"\"\"\nfrom m import (\n    a,  # first\n    b,\n)\nx = 1  # import nothing\n",
        );
        let root = module.root();
        assert!(!root.names.contains(&"fake".to_string()));
        assert_eq!(root.names, vec!["m", "a", "b", "x"]);
    }

    #[test]
    fn triple_quotes_inside_literals_open_nothing() {
        let module = compile("QUOTE = \"'''\"\nimport needed\nDOC = '\"\"\"'\nimport also_needed\n");
        let root = module.root();
        assert!(root.names.contains(&"needed".to_string()));
        assert!(root.names.contains(&"also_needed".to_string()));

        let module = compile("x = '''one line'''\nimport after\ny = \"\"\"open\nimport hidden\n\"\"\"\n");
        let root = module.root();
        assert!(root.names.contains(&"after".to_string()));
        assert!(!root.names.contains(&"hidden".to_string()));
    }

    #[test]
    fn export_list_is_built_from_literals() {
        let module = compile("__all__ = ['a', \"b\"]\n__all__ += ['c']\n");
        let ops = kinds(&module, CompiledModule::ROOT);
        assert_eq!(ops.iter().filter(|k| **k == OpKind::BuildList).count(), 2);
        assert!(ops.contains(&OpKind::InplaceAdd));
    }

    #[test]
    fn malformed_import_is_rejected() {
        let err = Compiler::new(FormatVersion::Wordcode, Path::new("bad.py"))
            .compile("x = 1\nfrom import y\n")
            .unwrap_err();
        assert!(matches!(err, FreezeError::InvalidSource { line: 2, .. }));
    }

    #[test]
    fn comparisons_bind_nothing() {
        let module = compile("if a == b:\n    pass\nf(x=1)\n");
        assert!(module.root().names.is_empty());
    }
}
