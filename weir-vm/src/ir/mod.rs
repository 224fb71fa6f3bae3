//! Intermediate representation of control flow over constraints.
//!
//! The IR has two shapes with one type. [`translate`] produces frames
//! whose bodies are structured statements (`If`/`Loop`/`Break`/match
//! dispatch); [`linearize`] rewrites each body into basic blocks ending
//! in explicit branches, ready for assembly.
//!
//! Frames exclusively own their counters, bitvectors, matchers and split
//! lists; statements refer to them through index handles whose lifetime
//! is the enclosing frame. Cross-frame references use [`FrameId`] into
//! the enclosing [`ProgramIr`].

mod linearize;
mod translate;

pub use linearize::linearize;
pub use translate::translate;

use core::fmt;

use weir_asm::{Dfa, ErrorCode, TokenKind};

/// Index of a frame in a [`ProgramIr`]. Frame 0 is the entry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub usize);

/// Index of a counter owned by the enclosing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterId(pub usize);

/// Index of a bitvector owned by the enclosing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitvecId(pub usize);

/// Index of a matcher DFA owned by the enclosing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatcherId(pub usize);

/// Index of a split list owned by the enclosing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitListId(pub usize);

/// Index of a basic block owned by the enclosing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

/// A per-activation integer counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    /// Debug label.
    pub label: &'static str,
}

/// A per-activation bit vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitvec {
    /// Debug label.
    pub label: &'static str,
    /// Width in bits; at most 64 for the current `BAND` encoding.
    pub nbits: usize,
}

/// One compilation unit, corresponding to one VM procedure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Counters, allocated to the leading activation slots.
    pub counters: Vec<Counter>,
    /// Bit vectors, allocated after the counters.
    pub bitvecs: Vec<Bitvec>,
    /// Matcher DFAs referenced by `MatchRun`.
    pub matchers: Vec<Dfa>,
    /// Split lists referenced by split statements and expressions.
    pub splits: Vec<Vec<FrameId>>,
    /// Temporaries introduced by linearisation, allocated after the
    /// bit vectors.
    pub ntemps: usize,
    /// Structured body; drained by linearisation.
    pub body: Vec<Stmt>,
    /// Basic blocks; filled by linearisation. Block 0 is the entry.
    pub blocks: Vec<Block>,
    /// Pseudo-topological schedule of the blocks.
    pub order: Vec<BlockId>,
}

/// A basic block: a statement list ending in at most one branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// Label prefix for dumps.
    pub prefix: &'static str,
    /// Flat statements; the last one is a branch unless the block is
    /// terminal.
    pub stmts: Vec<Stmt>,
}

/// One arm of a match dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    /// DFA case id this arm handles.
    pub which: u32,
    /// Arm body.
    pub body: Vec<Stmt>,
}

/// An IR statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// No effect.
    Nop,
    /// The frame accepts; lowers to `RETURN 0`.
    Valid,
    /// The frame rejects with a code.
    Invalid(ErrorCode),
    /// Read the next token.
    Token,
    /// Un-consume the current token; the next `Token` re-delivers it.
    Untoken,
    /// Skip the current value to its end.
    Consume,
    /// Structured conditional.
    If {
        /// Condition.
        cond: Expr,
        /// Statements when the condition holds.
        then: Vec<Stmt>,
        /// Statements otherwise.
        els: Vec<Stmt>,
    },
    /// Structured loop; exited by `Break`.
    Loop {
        /// Loop label.
        label: &'static str,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// Exit the named enclosing loop.
    Break {
        /// Label of the loop to exit.
        label: &'static str,
    },
    /// Increment a counter.
    Incr(CounterId),
    /// Decrement a counter.
    Decr(CounterId),
    /// Set a bit.
    BSet(BitvecId, usize),
    /// Clear a bit. Representable; no assembler support.
    BClear(BitvecId, usize),
    /// Run a matcher on the current string token and dispatch on the
    /// reported case.
    MatchDispatch {
        /// The matcher to run.
        matcher: MatcherId,
        /// Per-case arms.
        cases: Vec<MatchArm>,
        /// Statements when no pattern matches (case 0).
        default: Vec<Stmt>,
    },
    /// Fan the current value out to sub-frames, recording each accepting
    /// sub-frame as a set bit.
    SplitVec {
        /// Destination bit vector.
        bitvec: BitvecId,
        /// The frames to run.
        split: SplitListId,
    },
    /// Run another frame against the upcoming value.
    Call(FrameId),
    /// Copy a value into a slot.
    Move {
        /// Destination (a slot-shaped expression).
        dst: Expr,
        /// Source.
        src: Expr,
    },

    // -- linear forms, produced by linearisation --
    /// Run a matcher; the case id lands in the `M` register.
    MatchRun(MatcherId),
    /// Unconditional branch.
    Branch(BlockId),
    /// Two-way conditional branch on a leaf condition.
    CBranch {
        /// Leaf condition (no `And`/`Or`/`Not`).
        cond: Expr,
        /// Target when the condition holds.
        on_true: BlockId,
        /// Target otherwise.
        on_false: BlockId,
    },
}

/// Bit-test flavour of a [`Expr::BTest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTestMode {
    /// The single bit `b0` is set.
    Bit,
    /// Every bit in `[b0, b1]` is set.
    All,
    /// Some bit in `[b0, b1]` is set.
    Any,
    /// Exactly one bit in `[b0, b1]` is set. Representable; no assembler
    /// support.
    One,
}

/// Comparison operator of a [`Expr::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `>=`
    Ge,
    /// `>`
    Gt,
}

/// An IR expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Float literal.
    Num(f64),
    /// Integer literal.
    Int(i64),
    /// Size literal.
    Size(u64),
    /// Boolean literal.
    Bool(bool),
    /// The current token's kind (`TT`).
    TokType,
    /// The current token's numeric value (`TNUM`).
    TokNum,
    /// The current token's byte length (`TLEN`).
    TokLen,
    /// The current token has the given kind.
    IsTok(TokenKind),
    /// The argument is integer-valued.
    IsInt(Box<Expr>),
    /// The argument is an integer multiple of the divisor.
    IsMult(Box<Expr>, f64),
    /// Value of a counter.
    Count(CounterId),
    /// Number of set bits. Representable; no assembler support.
    BCount(BitvecId),
    /// Bit test over a range of a bit vector.
    BTest {
        /// The bit vector.
        bitvec: BitvecId,
        /// First bit of the range.
        b0: usize,
        /// Last bit of the range (inclusive).
        b1: usize,
        /// Test flavour.
        mode: BTestMode,
    },
    /// Comparison.
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    /// Conjunction; linearisation lowers it to a branch chain.
    And(Vec<Expr>),
    /// Disjunction; linearisation lowers it to a branch chain.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// Fan the current value out to sub-frames; yields the count of
    /// accepting sub-frames. Hoisted into a temporary by linearisation.
    Split(SplitListId),
    /// The case id of the last `MatchRun` (the `M` register).
    MatchResult,
    /// A raw activation slot.
    Slot(usize),
    /// An integer temporary introduced by linearisation.
    ITemp(usize),
    /// A float temporary introduced by linearisation.
    FTemp(usize),
}

/// A whole compiled program in IR form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramIr {
    /// Frames; index 0 is the entry.
    pub frames: Vec<Frame>,
}

impl ProgramIr {
    /// Textual dump of the linearised program.
    ///
    /// Deterministic for a given input; used to check that repeated
    /// canonification produces identical programs.
    pub fn dump(&self) -> String {
        use itertools::Itertools;
        use std::fmt::Write;

        let mut out = String::new();
        for (i, frame) in self.frames.iter().enumerate() {
            let _ = writeln!(
                out,
                "FRAME {i} counters={} bitvecs={} matchers={} splits={} temps={}",
                frame.counters.len(),
                frame.bitvecs.len(),
                frame.matchers.len(),
                frame.splits.len(),
                frame.ntemps,
            );

            for (si, list) in frame.splits.iter().enumerate() {
                let frames = list.iter().map(|f| f.0).join(", ");
                let _ = writeln!(out, "  SPLITLIST {si}: [{frames}]");
            }

            if frame.blocks.is_empty() {
                for stmt in &frame.body {
                    let _ = writeln!(out, "  {stmt}");
                }
                continue;
            }

            for bid in &frame.order {
                let block = &frame.blocks[bid.0];
                let _ = writeln!(out, "  {}_{}:", block.prefix, bid.0);
                for stmt in &block.stmts {
                    let _ = writeln!(out, "    {stmt}");
                }
            }
        }

        out
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Nop => write!(f, "NOP"),
            Stmt::Valid => write!(f, "VALID"),
            Stmt::Invalid(code) => write!(f, "INVALID({})", *code as u8),
            Stmt::Token => write!(f, "TOKEN"),
            Stmt::Untoken => write!(f, "UNTOKEN"),
            Stmt::Consume => write!(f, "CONSUME"),
            Stmt::If { cond, .. } => write!(f, "IF({cond}, ..)"),
            Stmt::Loop { label, .. } => write!(f, "LOOP({label})"),
            Stmt::Break { label } => write!(f, "BREAK({label})"),
            Stmt::Incr(c) => write!(f, "INCR(c{})", c.0),
            Stmt::Decr(c) => write!(f, "DECR(c{})", c.0),
            Stmt::BSet(bv, bit) => write!(f, "BSET(b{}, {bit})", bv.0),
            Stmt::BClear(bv, bit) => write!(f, "BCLEAR(b{}, {bit})", bv.0),
            Stmt::MatchDispatch { matcher, cases, .. } => {
                write!(f, "MATCH(m{}, {} cases)", matcher.0, cases.len())
            }
            Stmt::SplitVec { bitvec, split } => {
                write!(f, "SPLITVEC(b{}, s{})", bitvec.0, split.0)
            }
            Stmt::Call(frame) => write!(f, "CALL(f{})", frame.0),
            Stmt::Move { dst, src } => write!(f, "MOVE({dst}, {src})"),
            Stmt::MatchRun(m) => write!(f, "MATCHRUN(m{})", m.0),
            Stmt::Branch(b) => write!(f, "BRANCH(:{})", b.0),
            Stmt::CBranch {
                cond,
                on_true,
                on_false,
            } => write!(f, "CBRANCH({cond}, :{}, :{})", on_true.0, on_false.0),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(v) => write!(f, "{v}"),
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Size(v) => write!(f, "{v}"),
            Expr::Bool(v) => write!(f, "{v}"),
            Expr::TokType => write!(f, "%TT"),
            Expr::TokNum => write!(f, "%TN"),
            Expr::TokLen => write!(f, "%TL"),
            Expr::IsTok(kind) => write!(f, "ISTOK({kind})"),
            Expr::IsInt(arg) => write!(f, "ISINT({arg})"),
            Expr::IsMult(arg, d) => write!(f, "ISMULT({arg}, {d})"),
            Expr::Count(c) => write!(f, "COUNT(c{})", c.0),
            Expr::BCount(bv) => write!(f, "BCOUNT(b{})", bv.0),
            Expr::BTest {
                bitvec,
                b0,
                b1,
                mode,
            } => {
                let name = match mode {
                    BTestMode::Bit => "BTEST",
                    BTestMode::All => "BTESTALL",
                    BTestMode::Any => "BTESTANY",
                    BTestMode::One => "BTESTONE",
                };
                write!(f, "{name}(b{}, {b0}, {b1})", bitvec.0)
            }
            Expr::Cmp(op, lhs, rhs) => {
                let name = match op {
                    CmpOp::Ne => "NE",
                    CmpOp::Lt => "LT",
                    CmpOp::Le => "LE",
                    CmpOp::Eq => "EQ",
                    CmpOp::Ge => "GE",
                    CmpOp::Gt => "GT",
                };
                write!(f, "{name}({lhs}, {rhs})")
            }
            Expr::And(args) => {
                write!(f, "AND(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Or(args) => {
                write!(f, "OR(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Not(arg) => write!(f, "NOT({arg})"),
            Expr::Split(s) => write!(f, "SPLIT(s{})", s.0),
            Expr::MatchResult => write!(f, "%M"),
            Expr::Slot(i) => write!(f, "SLOT({i})"),
            Expr::ITemp(i) => write!(f, "ITEMP({i})"),
            Expr::FTemp(i) => write!(f, "FTEMP({i})"),
        }
    }
}
