//! Operation kinds and the per-format tables that map raw opcodes onto them.
//!
//! The numeric encoding of an operation changes between instruction formats,
//! so nothing outside this module deals with raw opcode numbers: decoding
//! goes through the table of the unit's [`FormatVersion`] and yields
//! [`OpKind`]s.

use serde::{Deserialize, Serialize};

/// Abstract operation kinds relevant to import discovery.
///
/// Everything the scanner does not care about decodes as [`OpKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Nop,
    PopTop,
    ReturnValue,
    InplaceAdd,
    BuildTuple,
    BuildList,
    LoadConst,
    LoadName,
    LoadGlobal,
    LoadFast,
    StoreName,
    StoreGlobal,
    StoreFast,
    ImportName,
    ImportFrom,
    ImportStar,
    MakeFunction,
    CallFunction,
    ExtendedArg,
    Other,
}

/// Instruction stream encodings understood by the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Variable length: one opcode byte, plus a two byte little-endian
    /// argument for opcodes at or above [`LEGACY_HAVE_ARGUMENT`].
    Legacy,
    /// Fixed two byte instructions, wider arguments through `ExtendedArg`.
    #[default]
    Wordcode,
}

const LEGACY_HAVE_ARGUMENT: u8 = 90;

static LEGACY_TABLE: &[(u8, OpKind)] = &[
    (1, OpKind::PopTop),
    (9, OpKind::Nop),
    (55, OpKind::InplaceAdd),
    (83, OpKind::ReturnValue),
    (84, OpKind::ImportStar),
    (90, OpKind::StoreName),
    (97, OpKind::StoreGlobal),
    (100, OpKind::LoadConst),
    (101, OpKind::LoadName),
    (102, OpKind::BuildTuple),
    (103, OpKind::BuildList),
    (107, OpKind::ImportName),
    (108, OpKind::ImportFrom),
    (116, OpKind::LoadGlobal),
    (124, OpKind::LoadFast),
    (125, OpKind::StoreFast),
    (131, OpKind::CallFunction),
    (132, OpKind::MakeFunction),
    (145, OpKind::ExtendedArg),
];

static WORDCODE_TABLE: &[(u8, OpKind)] = &[
    (1, OpKind::PopTop),
    (9, OpKind::Nop),
    (83, OpKind::ReturnValue),
    (84, OpKind::ImportStar),
    (90, OpKind::StoreName),
    (97, OpKind::StoreGlobal),
    (100, OpKind::LoadConst),
    (101, OpKind::LoadName),
    (102, OpKind::BuildTuple),
    (103, OpKind::BuildList),
    (108, OpKind::ImportName),
    (109, OpKind::ImportFrom),
    (116, OpKind::LoadGlobal),
    (122, OpKind::InplaceAdd),
    (124, OpKind::LoadFast),
    (125, OpKind::StoreFast),
    (131, OpKind::CallFunction),
    (132, OpKind::MakeFunction),
    (144, OpKind::ExtendedArg),
];

impl FormatVersion {
    /// Version byte stored in the header of precompiled units.
    pub fn marker(self) -> u8 {
        match self {
            FormatVersion::Legacy => 1,
            FormatVersion::Wordcode => 2,
        }
    }

    fn table(self) -> &'static [(u8, OpKind)] {
        match self {
            FormatVersion::Legacy => LEGACY_TABLE,
            FormatVersion::Wordcode => WORDCODE_TABLE,
        }
    }

    pub fn decode_op(self, opcode: u8) -> OpKind {
        self.table()
            .iter()
            .find(|(code, _)| *code == opcode)
            .map_or(OpKind::Other, |(_, kind)| *kind)
    }

    /// Raw opcode for `kind`, if this format has one.
    pub fn encode_op(self, kind: OpKind) -> Option<u8> {
        self.table()
            .iter()
            .find(|(_, k)| *k == kind)
            .map(|(code, _)| *code)
    }

    /// Decode `code` into a stream of instructions.
    pub fn instructions(self, code: &[u8]) -> Instructions<'_> {
        Instructions {
            format: self,
            code,
            pos: 0,
        }
    }

    /// Append one instruction to `out`, widening with `ExtendedArg` as needed.
    ///
    /// Returns `None` if `kind` has no encoding in this format.
    pub fn encode(self, kind: OpKind, arg: u32, out: &mut Vec<u8>) -> Option<()> {
        let opcode = self.encode_op(kind)?;
        let extended = self.encode_op(OpKind::ExtendedArg)?;
        match self {
            FormatVersion::Legacy => {
                if opcode < LEGACY_HAVE_ARGUMENT {
                    out.push(opcode);
                    return Some(());
                }
                if arg > 0xffff {
                    out.push(extended);
                    out.extend_from_slice(&((arg >> 16) as u16).to_le_bytes());
                }
                out.push(opcode);
                out.extend_from_slice(&((arg & 0xffff) as u16).to_le_bytes());
            }
            FormatVersion::Wordcode => {
                for shift in [24u32, 16, 8] {
                    if arg >> shift > 0 {
                        out.push(extended);
                        out.push(((arg >> shift) & 0xff) as u8);
                    }
                }
                out.push(opcode);
                out.push((arg & 0xff) as u8);
            }
        }
        Some(())
    }
}

/// A decoded instruction; `ExtendedArg` prefixes are already folded into
/// `arg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub kind: OpKind,
    pub arg: u32,
}

/// Iterator over the instructions of one code buffer.
///
/// A truncated trailing instruction ends the stream.
#[derive(Debug)]
pub struct Instructions<'a> {
    format: FormatVersion,
    code: &'a [u8],
    pos: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Self::Item> {
        let mut extended: u32 = 0;
        loop {
            let offset = self.pos;
            let opcode = *self.code.get(offset)?;
            let (raw_arg, width) = match self.format {
                FormatVersion::Legacy if opcode >= LEGACY_HAVE_ARGUMENT => {
                    let bytes = self.code.get(offset + 1..offset + 3)?;
                    (u16::from_le_bytes([bytes[0], bytes[1]]) as u32, 3)
                }
                FormatVersion::Legacy => (0, 1),
                FormatVersion::Wordcode => (*self.code.get(offset + 1)? as u32, 2),
            };
            self.pos += width;

            let kind = self.format.decode_op(opcode);
            let arg = match self.format {
                FormatVersion::Legacy => (extended << 16) | raw_arg,
                FormatVersion::Wordcode => (extended << 8) | raw_arg,
            };
            if kind == OpKind::ExtendedArg {
                extended = arg;
                continue;
            }
            return Some(Instruction { offset, kind, arg });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_disagree_on_numbering() {
        let legacy = FormatVersion::Legacy.encode_op(OpKind::ImportName);
        let wordcode = FormatVersion::Wordcode.encode_op(OpKind::ImportName);
        assert_ne!(legacy, wordcode);
        assert_eq!(FormatVersion::Wordcode.decode_op(250), OpKind::Other);
    }

    #[test]
    fn legacy_args_only_above_threshold() {
        let mut code = Vec::new();
        FormatVersion::Legacy.encode(OpKind::PopTop, 0, &mut code);
        FormatVersion::Legacy.encode(OpKind::LoadConst, 7, &mut code);
        assert_eq!(code.len(), 4);

        let decoded: Vec<_> = FormatVersion::Legacy.instructions(&code).collect();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].kind, OpKind::LoadConst);
        assert_eq!(decoded[1].arg, 7);
    }

    #[test]
    fn wordcode_extended_args_are_folded() {
        let mut code = Vec::new();
        FormatVersion::Wordcode.encode(OpKind::StoreName, 0x1234, &mut code);
        assert_eq!(code.len(), 4);

        let decoded: Vec<_> = FormatVersion::Wordcode.instructions(&code).collect();
        assert_eq!(
            decoded,
            vec![Instruction {
                offset: 2,
                kind: OpKind::StoreName,
                arg: 0x1234
            }]
        );
    }

    #[test]
    fn truncated_stream_stops() {
        let code = [100u8, 1];
        assert_eq!(FormatVersion::Legacy.instructions(&code).count(), 0);
    }
}
