use core::fmt;

use crate::opcode::{BranchCond, InvalidOpcode, Opcode};

/// A single undecoded VM word.
pub type RawInstruction = u32;

/// Smallest literal that fits an operand field without spilling to the
/// constant pool.
pub const LIT_MIN: i64 = -(1 << 10);
/// Largest literal that fits an operand field.
pub const LIT_MAX: i64 = (1 << 10) - 1;

/// Smallest encodable PC-relative branch displacement.
pub const BR_DISP_MIN: i64 = -(1 << 21);
/// Largest encodable PC-relative branch displacement.
pub const BR_DISP_MAX: i64 = (1 << 21) - 1;

const OP_SHIFT: u32 = 26;
const A_SHIFT: u32 = 13;
const FIELD_MASK: u32 = 0x1fff;

const TAG_SHIFT: u32 = 11;
const PAYLOAD_MASK: u32 = 0x07ff;
const TAG_DIRECT: u32 = 0;
const TAG_SLOT: u32 = 1;
const TAG_LIT: u32 = 2;

const COND_SHIFT: u32 = 22;
const COND_MASK: u32 = 0xf;
const DISP_MASK: u32 = 0x003f_ffff;

/// A VM register addressable from an operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Reg {
    /// Token type of the current token.
    TT = 1,
    /// Numeric value of the current token.
    TNum = 2,
    /// Byte length of the current (string) token.
    TLen = 3,
    /// Case index of the last DFA match.
    M = 4,
}

/// A decoded 13-bit operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    /// Field unused by this instruction.
    None,
    /// One of the VM registers.
    Reg(Reg),
    /// A slot in the current activation frame.
    Slot(u16),
    /// An inline signed literal in `[LIT_MIN, LIT_MAX]`.
    Lit(i16),
}

impl Operand {
    /// Whether a literal value fits an operand field without pooling.
    pub const fn fits_lit(v: i64) -> bool {
        v >= LIT_MIN && v <= LIT_MAX
    }

    const fn encode(self) -> u32 {
        match self {
            Operand::None => 0,
            Operand::Reg(r) => r as u32,
            Operand::Slot(ix) => (TAG_SLOT << TAG_SHIFT) | (ix as u32 & PAYLOAD_MASK),
            Operand::Lit(v) => (TAG_LIT << TAG_SHIFT) | (v as u32 & PAYLOAD_MASK),
        }
    }

    fn decode(field: u32) -> Option<Self> {
        let payload = field & PAYLOAD_MASK;
        match field >> TAG_SHIFT {
            TAG_DIRECT => match payload {
                0 => Some(Operand::None),
                1 => Some(Operand::Reg(Reg::TT)),
                2 => Some(Operand::Reg(Reg::TNum)),
                3 => Some(Operand::Reg(Reg::TLen)),
                4 => Some(Operand::Reg(Reg::M)),
                _ => None,
            },
            TAG_SLOT => Some(Operand::Slot(payload as u16)),
            TAG_LIT => {
                // sign-extend the 11-bit payload
                let v = ((payload as i16) << 5) >> 5;
                Some(Operand::Lit(v))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Reg(Reg::TT) => write!(f, "%TT"),
            Operand::Reg(Reg::TNum) => write!(f, "%TN"),
            Operand::Reg(Reg::TLen) => write!(f, "%TL"),
            Operand::Reg(Reg::M) => write!(f, "%M"),
            Operand::Slot(ix) => write!(f, "SLOT({ix})"),
            Operand::Lit(v) => write!(f, "${v}"),
        }
    }
}

/// One 32-bit instruction word.
///
/// Layout: opcode in bits `[31:26]`. Plain instructions pack two operand
/// fields `a` `[25:13]` and `b` `[12:0]`, each a 2-bit tag plus an 11-bit
/// payload. Branch instructions (`JMP`, `CALL`) pack a 4-bit condition
/// `[25:22]` and a signed 22-bit PC-relative displacement `[21:0]`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction(RawInstruction);

impl Instruction {
    /// Size of an instruction in bytes.
    pub const LEN: usize = 4;

    /// Pack a plain (non-branch) instruction.
    pub const fn op(op: Opcode, a: Operand, b: Operand) -> Self {
        debug_assert!(!op.is_branch());
        Self(((op as u32) << OP_SHIFT) | (a.encode() << A_SHIFT) | b.encode())
    }

    /// Pack a branch instruction with a PC-relative displacement.
    ///
    /// The displacement must lie in `[BR_DISP_MIN, BR_DISP_MAX]`; the
    /// assembler verifies this before encoding.
    pub const fn branch(op: Opcode, cond: BranchCond, disp: i32) -> Self {
        debug_assert!(op.is_branch());
        debug_assert!(disp as i64 >= BR_DISP_MIN && disp as i64 <= BR_DISP_MAX);
        Self(
            ((op as u32) << OP_SHIFT)
                | ((cond as u32) << COND_SHIFT)
                | (disp as u32 & DISP_MASK),
        )
    }

    /// The raw opcode byte.
    pub const fn op_u8(&self) -> u8 {
        (self.0 >> OP_SHIFT) as u8
    }

    /// Decode the opcode.
    pub fn opcode(&self) -> Result<Opcode, InvalidOpcode> {
        Opcode::try_from(self.op_u8())
    }

    /// Decode operand field `a`.
    pub fn a(&self) -> Option<Operand> {
        Operand::decode((self.0 >> A_SHIFT) & FIELD_MASK)
    }

    /// Decode operand field `b`.
    pub fn b(&self) -> Option<Operand> {
        Operand::decode(self.0 & FIELD_MASK)
    }

    /// Branch condition field; meaningful only for branch opcodes.
    pub fn cond(&self) -> BranchCond {
        BranchCond::from(((self.0 >> COND_SHIFT) & COND_MASK) as u8)
    }

    /// Signed PC-relative displacement; meaningful only for branch opcodes.
    pub const fn disp(&self) -> i32 {
        // sign-extend the 22-bit field
        (((self.0 & DISP_MASK) as i32) << 10) >> 10
    }

    /// The undecoded word.
    pub const fn raw(&self) -> RawInstruction {
        self.0
    }

    /// Big-endian byte representation of the word.
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        self.0.to_be_bytes()
    }
}

impl From<RawInstruction> for Instruction {
    fn from(raw: RawInstruction) -> Self {
        Self(raw)
    }
}

impl From<Instruction> for RawInstruction {
    fn from(instr: Instruction) -> Self {
        instr.0
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.opcode() {
            Ok(op) => op,
            Err(_) => return write!(f, "??? {:08x}", self.0),
        };

        if op.is_branch() {
            return write!(f, "{op} {}, {:+}", self.cond(), self.disp());
        }

        write!(f, "{op}")?;
        match (self.a(), self.b()) {
            (Some(Operand::None), Some(Operand::None)) => Ok(()),
            (Some(Operand::None), Some(b)) => write!(f, " {b}"),
            (Some(a), Some(Operand::None)) => write!(f, " {a}"),
            (Some(a), Some(b)) => write!(f, " {a}, {b}"),
            _ => Ok(()),
        }
    }
}
