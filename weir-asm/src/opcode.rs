use core::fmt;

/// Operation of a single 32-bit VM word.
///
/// `JMP` and `CALL` use the branch word layout (condition + displacement);
/// every other opcode carries two operand fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    NOP = 0x00,
    /// Frame marker; declares the slot count of the procedure it opens.
    PROC = 0x01,
    /// Request the next token from the stream; updates `TT`/`TNUM`/`TLEN`.
    /// With operand `b = -1`, un-consumes the last token instead.
    TOKEN = 0x02,
    /// Skip the current value (object, array or scalar) to its end.
    CONSUME = 0x03,
    /// Integer comparison; sets the flag from `a ? b`.
    ICMP = 0x04,
    /// Floating-point comparison; sets the flag from `a ? b`.
    FCMP = 0x05,
    /// Set the flag to "`a` is integer-valued" (and divisible by `b` when
    /// a divisor operand is present).
    FINT = 0x06,
    /// Conditional PC-relative jump.
    JMP = 0x07,
    /// Push an activation for the frame at the PC-relative displacement.
    CALL = 0x08,
    /// Pop the activation; `0` is valid, any other code is invalid.
    RETURN = 0x09,
    /// Run a DFA over the current string token; the matched case index is
    /// written to `M`.
    MATCH = 0x0a,
    /// Load a float-pool constant into a slot.
    FLOAD = 0x0b,
    /// Load a constant-pool integer into a slot.
    ILOAD = 0x0c,
    /// Copy between registers and slots.
    MOVE = 0x0d,
    /// Add a literal to an integer slot.
    INCR = 0x0e,
    /// Set a bit in a bitvector slot.
    BSET = 0x0f,
    /// Bitwise-and an operand into a bitvector slot.
    BAND = 0x10,
    /// Fan the current value out to the sub-frames of a split list; the
    /// count of accepting sub-validators is written to the output slot.
    SPLIT = 0x11,
    /// As `SPLIT`, but records each accepting sub-frame as a set bit in
    /// the output bitvector slot.
    SPLITV = 0x12,
}

impl Opcode {
    /// Whether this opcode uses the branch word layout.
    pub const fn is_branch(&self) -> bool {
        matches!(self, Opcode::JMP | Opcode::CALL)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The byte can't be mapped to any known [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOpcode;

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid opcode byte")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidOpcode {}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        match b {
            0x00 => Ok(NOP),
            0x01 => Ok(PROC),
            0x02 => Ok(TOKEN),
            0x03 => Ok(CONSUME),
            0x04 => Ok(ICMP),
            0x05 => Ok(FCMP),
            0x06 => Ok(FINT),
            0x07 => Ok(JMP),
            0x08 => Ok(CALL),
            0x09 => Ok(RETURN),
            0x0a => Ok(MATCH),
            0x0b => Ok(FLOAD),
            0x0c => Ok(ILOAD),
            0x0d => Ok(MOVE),
            0x0e => Ok(INCR),
            0x0f => Ok(BSET),
            0x10 => Ok(BAND),
            0x11 => Ok(SPLIT),
            0x12 => Ok(SPLITV),
            _ => Err(InvalidOpcode),
        }
    }
}

/// Condition field of a branch word, tested against the comparison flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BranchCond {
    /// Never taken.
    Never = 0x0,
    /// Taken when the flag compares less-than.
    Lt = 0x1,
    /// Taken when the flag compares less-or-equal.
    Le = 0x2,
    /// Taken when the flag compares equal.
    Eq = 0x3,
    /// Taken when the flag compares greater-or-equal.
    Ge = 0x4,
    /// Taken when the flag compares greater-than.
    Gt = 0x5,
    /// Taken when the flag compares not-equal.
    Ne = 0x6,
    /// Always taken.
    Always = 0x7,
}

impl BranchCond {
    /// The condition that is taken exactly when `self` is not.
    pub const fn negate(self) -> Self {
        match self {
            BranchCond::Never => BranchCond::Always,
            BranchCond::Lt => BranchCond::Ge,
            BranchCond::Le => BranchCond::Gt,
            BranchCond::Eq => BranchCond::Ne,
            BranchCond::Ge => BranchCond::Lt,
            BranchCond::Gt => BranchCond::Le,
            BranchCond::Ne => BranchCond::Eq,
            BranchCond::Always => BranchCond::Never,
        }
    }

    /// Evaluate the condition against a three-way comparison flag
    /// (negative, zero or positive).
    pub const fn satisfied(self, flag: i8) -> bool {
        match self {
            BranchCond::Never => false,
            BranchCond::Lt => flag < 0,
            BranchCond::Le => flag <= 0,
            BranchCond::Eq => flag == 0,
            BranchCond::Ge => flag >= 0,
            BranchCond::Gt => flag > 0,
            BranchCond::Ne => flag != 0,
            BranchCond::Always => true,
        }
    }
}

impl From<u8> for BranchCond {
    fn from(b: u8) -> Self {
        use BranchCond::*;
        match b & 0x7 {
            0x0 => Never,
            0x1 => Lt,
            0x2 => Le,
            0x3 => Eq,
            0x4 => Ge,
            0x5 => Gt,
            0x6 => Ne,
            _ => Always,
        }
    }
}

impl fmt::Display for BranchCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchCond::Never => "never",
            BranchCond::Lt => "lt",
            BranchCond::Le => "le",
            BranchCond::Eq => "eq",
            BranchCond::Ge => "ge",
            BranchCond::Gt => "gt",
            BranchCond::Ne => "ne",
            BranchCond::Always => "always",
        };

        write!(f, "{name}")
    }
}
