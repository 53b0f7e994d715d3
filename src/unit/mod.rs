//! Compiled units: the analyzable form of one module.
//!
//! A module compiles to a tree of code units (the body plus one unit per
//! function or class body). The tree is stored as an arena, nested units are
//! referenced from their parent's constants by [`UnitId`].

pub mod compile;
pub mod opcode;

use {
    crate::error::{FreezeError, Result},
    opcode::{FormatVersion, Instructions},
    serde::{Deserialize, Serialize},
    std::path::Path,
};

/// First three bytes of every precompiled unit file; the fourth is the
/// format version marker.
pub const MAGIC_PREFIX: [u8; 3] = *b"MFZ";

/// Magic plus four reserved bytes.
pub const HEADER_LEN: usize = 8;

/// How the backing bytes of a module are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    SourceText,
    Precompiled,
    PackageDirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Int(i64),
    Str(String),
    Tuple(Vec<Constant>),
    Code(UnitId),
}

impl Constant {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub name: String,
    /// Source location recorded at compile time; subject to path rewriting.
    pub filename: String,
    pub parent: Option<UnitId>,
    pub code: Vec<u8>,
    pub consts: Vec<Constant>,
    pub names: Vec<String>,
}

impl CodeUnit {
    pub fn new(name: &str, filename: &str, parent: Option<UnitId>) -> Self {
        Self {
            name: name.to_string(),
            filename: filename.to_string(),
            parent,
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
        }
    }

    /// Units nested directly in this one.
    pub fn children(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.consts.iter().filter_map(|c| match c {
            Constant::Code(id) => Some(*id),
            _ => None,
        })
    }
}

/// Arena of the code units compiled from one module; unit `0` is the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub format: FormatVersion,
    pub units: Vec<CodeUnit>,
}

impl CompiledModule {
    pub const ROOT: UnitId = UnitId(0);

    /// Build a module from backing bytes of the given kind.
    ///
    /// Package directories carry no bytes of their own; their `__init__`
    /// unit is loaded separately, so `None` is returned for them.
    pub fn load(
        bytes: &[u8],
        kind: UnitKind,
        origin: &Path,
        format: FormatVersion,
        implicit_relative: bool,
    ) -> Result<Option<Self>> {
        match kind {
            UnitKind::PackageDirectory => Ok(None),
            UnitKind::Precompiled => Self::from_file_bytes(bytes, format, origin).map(Some),
            UnitKind::SourceText => {
                let text = String::from_utf8_lossy(bytes);
                compile::Compiler::new(format, origin)
                    .implicit_relative(implicit_relative)
                    .compile(&text)
                    .map(Some)
            }
        }
    }

    pub fn unit(&self, id: UnitId) -> &CodeUnit {
        &self.units[id.0]
    }

    pub fn root(&self) -> &CodeUnit {
        self.unit(Self::ROOT)
    }

    pub fn instructions(&self, id: UnitId) -> Instructions<'_> {
        self.format.instructions(&self.unit(id).code)
    }

    pub fn magic(format: FormatVersion) -> [u8; 4] {
        [
            MAGIC_PREFIX[0],
            MAGIC_PREFIX[1],
            MAGIC_PREFIX[2],
            format.marker(),
        ]
    }

    /// Serialized arena, without header. This is the payload that ends up in
    /// the frozen table.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Header followed by the serialized arena.
    pub fn to_file_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&Self::magic(self.format));
        out.extend_from_slice(&[0; HEADER_LEN - 4]);
        out.extend(self.to_bytes()?);
        Ok(out)
    }

    pub fn from_file_bytes(bytes: &[u8], expected: FormatVersion, origin: &Path) -> Result<Self> {
        let magic = Self::magic(expected);
        let malformed = || FreezeError::MalformedCompiledUnit {
            path: origin.to_path_buf(),
            expected: magic,
            found: bytes.iter().take(4).copied().collect(),
        };
        if bytes.len() < HEADER_LEN || bytes[..4] != magic {
            return Err(malformed());
        }
        let module = Self::from_bytes(&bytes[HEADER_LEN..])?;
        if module.format != expected {
            return Err(malformed());
        }
        module.validate(origin)?;
        Ok(module)
    }

    /// Check that the arena forms a tree rooted at unit `0`: every nested
    /// unit reference is in range and names a unit whose parent is the
    /// referencing unit.
    pub fn validate(&self, origin: &Path) -> Result<()> {
        let corrupt = |unit: usize, message: String| FreezeError::CorruptUnitTree {
            path: origin.to_path_buf(),
            unit,
            message,
        };
        match self.units.first() {
            None => return Err(corrupt(0, "no module body".to_string())),
            Some(root) if root.parent.is_some() => {
                return Err(corrupt(0, "module body has a parent".to_string()));
            }
            Some(_) => {}
        }
        for (owner, unit) in self.units.iter().enumerate() {
            for child in unit.children() {
                let Some(target) = self.units.get(child.0) else {
                    return Err(corrupt(owner, format!("references missing unit {}", child.0)));
                };
                if child.0 == owner || target.parent != Some(UnitId(owner)) {
                    return Err(corrupt(owner, format!("references unit {} it does not own", child.0)));
                }
            }
        }
        Ok(())
    }

    /// Apply `rewrite` to the recorded source location of every unit.
    pub fn rewrite_filenames(&mut self, rewrite: impl Fn(&str) -> Option<String>) {
        for unit in &mut self.units {
            if let Some(filename) = rewrite(&unit.filename) {
                unit.filename = filename;
            }
        }
    }
}
