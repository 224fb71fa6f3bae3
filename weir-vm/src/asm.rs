//! Assembly of linearised IR into an encoded [`Program`].
//!
//! The assembler walks each frame's scheduled blocks and emits 32-bit
//! words into one shared code vector, interning floats, large integers,
//! matcher DFAs and split lists into the program's data pools along the
//! way. Branches are recorded in a fixup table and resolved to
//! PC-relative displacements in a second pass, once every target offset
//! is known. A conditional branch whose false target is the next
//! scheduled block needs only one `JMP`; an unconditional branch to the
//! next block needs none.

use std::collections::HashMap;

use weir_asm::{
    BranchCond, Dfa, Instruction, Opcode, Operand, Program, Reg, BR_DISP_MAX, BR_DISP_MIN,
    LIT_MAX,
};

use crate::error::CompileError;
use crate::ir::{BTestMode, BlockId, CmpOp, Expr, Frame, FrameId, ProgramIr, Stmt};

/// Assemble and encode a linearised program.
pub fn assemble(ir: &ProgramIr) -> Result<Program, CompileError> {
    let mut asm = Assembler {
        ir,
        code: Vec::new(),
        fdata: Vec::new(),
        cdata: Vec::new(),
        dfas: Vec::new(),
        splits: Vec::new(),
        frame_entry: vec![0; ir.frames.len()],
        block_off: HashMap::new(),
        fixups: Vec::new(),
    };

    for fid in 0..ir.frames.len() {
        asm.assemble_frame(fid)?;
    }
    asm.resolve_fixups()?;

    let sdata = asm.encode_splits();
    let nsplit = asm.splits.len();

    tracing::debug!(
        words = asm.code.len(),
        floats = asm.fdata.len(),
        consts = asm.cdata.len(),
        dfas = asm.dfas.len(),
        nsplit,
        "assembled program"
    );

    Ok(Program::from_parts(
        asm.fdata, asm.cdata, asm.dfas, nsplit, sdata, asm.code,
    ))
}

enum Target {
    Block(usize, BlockId),
    Frame(FrameId),
}

struct Fixup {
    at: usize,
    op: Opcode,
    cond: BranchCond,
    target: Target,
}

struct Assembler<'ir> {
    ir: &'ir ProgramIr,
    code: Vec<u32>,
    fdata: Vec<f64>,
    cdata: Vec<i64>,
    dfas: Vec<Dfa>,
    splits: Vec<Vec<FrameId>>,
    frame_entry: Vec<usize>,
    block_off: HashMap<(usize, usize), usize>,
    fixups: Vec<Fixup>,
}

// Slot layout of one frame: counters first, then bit vectors, then the
// temporaries linearisation introduced, then assembly scratch slots.
struct FrameCtx<'ir> {
    fid: usize,
    frame: &'ir Frame,
    nc: usize,
    temp_base: usize,
    next_slot: usize,
    matcher_pool: Vec<usize>,
    split_pool: Vec<usize>,
}

impl<'ir> FrameCtx<'ir> {
    fn alloc_slot(&mut self) -> usize {
        let s = self.next_slot;
        self.next_slot += 1;
        s
    }

    fn bitvec_slot(&self, bv: usize) -> usize {
        self.nc + bv
    }
}

impl<'ir> Assembler<'ir> {
    fn push(&mut self, op: Opcode, a: Operand, b: Operand) {
        self.code.push(Instruction::op(op, a, b).raw());
    }

    fn push_branch(&mut self, op: Opcode, cond: BranchCond, target: Target) {
        let at = self.code.len();
        self.code.push(0);
        self.fixups.push(Fixup {
            at,
            op,
            cond,
            target,
        });
    }

    fn float_ix(&mut self, v: f64) -> usize {
        match self.fdata.iter().position(|f| f.to_bits() == v.to_bits()) {
            Some(ix) => ix,
            None => {
                self.fdata.push(v);
                self.fdata.len() - 1
            }
        }
    }

    fn const_ix(&mut self, v: i64) -> usize {
        match self.cdata.iter().position(|c| *c == v) {
            Some(ix) => ix,
            None => {
                self.cdata.push(v);
                self.cdata.len() - 1
            }
        }
    }

    fn pool_lit(ix: usize) -> Result<Operand, CompileError> {
        if ix as i64 > LIT_MAX {
            return Err(CompileError::Internal("data pool outgrew the literal range"));
        }
        Ok(Operand::Lit(ix as i16))
    }

    fn assemble_frame(&mut self, fid: usize) -> Result<(), CompileError> {
        let ir = self.ir;
        let frame = &ir.frames[fid];

        let entry = self.code.len();
        self.frame_entry[fid] = entry;
        self.code.push(0); // PROC patched once the slot count is known

        let matcher_pool = frame
            .matchers
            .iter()
            .map(|dfa| {
                self.dfas.push(dfa.clone());
                self.dfas.len() - 1
            })
            .collect();
        let split_pool = frame
            .splits
            .iter()
            .map(|list| {
                self.splits.push(list.clone());
                self.splits.len() - 1
            })
            .collect();

        let nc = frame.counters.len();
        let temp_base = nc + frame.bitvecs.len();
        let mut ctx = FrameCtx {
            fid,
            frame,
            nc,
            temp_base,
            next_slot: temp_base + frame.ntemps,
            matcher_pool,
            split_pool,
        };

        for (pos, bid) in frame.order.iter().enumerate() {
            self.block_off.insert((fid, bid.0), self.code.len());
            let next = frame.order.get(pos + 1).copied();

            for stmt in &frame.blocks[bid.0].stmts {
                self.stmt(&mut ctx, stmt, next)?;
            }
        }

        let nslots = ctx.next_slot;
        if nslots as i64 > LIT_MAX {
            return Err(CompileError::Internal("frame needs too many slots"));
        }
        self.code[entry] =
            Instruction::op(Opcode::PROC, Operand::Lit(nslots as i16), Operand::None).raw();

        Ok(())
    }

    fn stmt(
        &mut self,
        ctx: &mut FrameCtx<'ir>,
        stmt: &Stmt,
        next: Option<BlockId>,
    ) -> Result<(), CompileError> {
        match stmt {
            Stmt::Nop => {}

            Stmt::Token => self.push(Opcode::TOKEN, Operand::None, Operand::None),
            Stmt::Untoken => self.push(Opcode::TOKEN, Operand::None, Operand::Lit(-1)),
            Stmt::Consume => self.push(Opcode::CONSUME, Operand::None, Operand::None),

            Stmt::Valid => self.push(Opcode::RETURN, Operand::Lit(0), Operand::None),
            Stmt::Invalid(code) => {
                self.push(Opcode::RETURN, Operand::Lit(*code as u8 as i16), Operand::None)
            }

            Stmt::Incr(c) => {
                self.push(Opcode::INCR, Operand::Slot(c.0 as u16), Operand::Lit(1))
            }
            Stmt::Decr(c) => {
                self.push(Opcode::INCR, Operand::Slot(c.0 as u16), Operand::Lit(-1))
            }

            Stmt::BSet(bv, bit) => self.push(
                Opcode::BSET,
                Operand::Slot(ctx.bitvec_slot(bv.0) as u16),
                Operand::Lit(*bit as i16),
            ),
            Stmt::BClear(..) => return Err(CompileError::Unsupported("bit clearing")),

            Stmt::MatchRun(m) => {
                let ix = ctx.matcher_pool[m.0];
                let lit = Self::pool_lit(ix)?;
                self.push(Opcode::MATCH, lit, Operand::None);
            }

            Stmt::SplitVec { bitvec, split } => {
                let ix = ctx.split_pool[split.0];
                let lit = Self::pool_lit(ix)?;
                self.push(
                    Opcode::SPLITV,
                    lit,
                    Operand::Slot(ctx.bitvec_slot(bitvec.0) as u16),
                );
            }

            Stmt::Call(f) => {
                self.push_branch(Opcode::CALL, BranchCond::Always, Target::Frame(*f))
            }

            Stmt::Move { dst, src } => self.move_stmt(ctx, dst, src)?,

            Stmt::Branch(b) => {
                if next != Some(*b) {
                    self.push_branch(
                        Opcode::JMP,
                        BranchCond::Always,
                        Target::Block(ctx.fid, *b),
                    );
                }
            }

            Stmt::CBranch {
                cond,
                on_true,
                on_false,
            } => {
                let brc = self.cond(ctx, cond)?;

                if next == Some(*on_false) {
                    self.push_branch(Opcode::JMP, brc, Target::Block(ctx.fid, *on_true));
                } else if next == Some(*on_true) {
                    self.push_branch(
                        Opcode::JMP,
                        brc.negate(),
                        Target::Block(ctx.fid, *on_false),
                    );
                } else {
                    self.push_branch(Opcode::JMP, brc, Target::Block(ctx.fid, *on_true));
                    self.push_branch(
                        Opcode::JMP,
                        BranchCond::Always,
                        Target::Block(ctx.fid, *on_false),
                    );
                }
            }

            Stmt::If { .. }
            | Stmt::Loop { .. }
            | Stmt::Break { .. }
            | Stmt::MatchDispatch { .. } => {
                return Err(CompileError::Internal("structured statement in a block"))
            }
        }

        Ok(())
    }

    fn move_stmt(
        &mut self,
        ctx: &mut FrameCtx<'ir>,
        dst: &Expr,
        src: &Expr,
    ) -> Result<(), CompileError> {
        let dst = self.slot_operand(ctx, dst)?;

        match src {
            Expr::Split(split) => {
                let ix = ctx.split_pool[split.0];
                let lit = Self::pool_lit(ix)?;
                self.push(Opcode::SPLIT, lit, dst);
            }
            Expr::Num(v) => {
                let ix = self.float_ix(*v);
                let lit = Self::pool_lit(ix)?;
                self.push(Opcode::FLOAD, dst, lit);
            }
            Expr::Int(v) => self.move_int(ctx, dst, *v)?,
            Expr::Size(v) => self.move_int(ctx, dst, *v as i64)?,
            other => {
                let src = self.operand(ctx, other)?;
                self.push(Opcode::MOVE, dst, src);
            }
        }

        Ok(())
    }

    fn move_int(
        &mut self,
        _ctx: &mut FrameCtx<'ir>,
        dst: Operand,
        v: i64,
    ) -> Result<(), CompileError> {
        if Operand::fits_lit(v) {
            self.push(Opcode::MOVE, dst, Operand::Lit(v as i16));
        } else {
            let ix = self.const_ix(v);
            let lit = Self::pool_lit(ix)?;
            self.push(Opcode::ILOAD, dst, lit);
        }
        Ok(())
    }

    // Emits the comparison for a leaf condition and reports which branch
    // condition means "the condition holds".
    fn cond(&mut self, ctx: &mut FrameCtx<'ir>, cond: &Expr) -> Result<BranchCond, CompileError> {
        match cond {
            Expr::IsTok(kind) => {
                self.push(
                    Opcode::ICMP,
                    Operand::Reg(Reg::TT),
                    Operand::Lit(*kind as u8 as i16),
                );
                Ok(BranchCond::Eq)
            }

            Expr::IsInt(arg) => {
                let a = self.operand(ctx, arg)?;
                self.push(Opcode::FINT, a, Operand::None);
                Ok(BranchCond::Eq)
            }

            Expr::IsMult(arg, divisor) => {
                let a = self.operand(ctx, arg)?;
                let d = *divisor;
                let b = if d.fract() == 0.0 && (d as i64) <= LIT_MAX && (d as i64) >= 1 {
                    Operand::Lit(d as i16)
                } else {
                    let ix = self.float_ix(d);
                    let lit = Self::pool_lit(ix)?;
                    let tmp = ctx.alloc_slot();
                    self.push(Opcode::FLOAD, Operand::Slot(tmp as u16), lit);
                    Operand::Slot(tmp as u16)
                };
                self.push(Opcode::FINT, a, b);
                Ok(BranchCond::Eq)
            }

            Expr::Cmp(op, lhs, rhs) => {
                let float = is_float(lhs) || is_float(rhs);
                let a = self.operand(ctx, lhs)?;
                let b = self.operand(ctx, rhs)?;
                let cmp = if float { Opcode::FCMP } else { Opcode::ICMP };
                self.push(cmp, a, b);
                Ok(cond_of(*op))
            }

            Expr::BTest {
                bitvec,
                b0,
                b1,
                mode,
            } => self.btest(ctx, bitvec.0, *b0, *b1, *mode),

            Expr::And(_) | Expr::Or(_) | Expr::Not(_) | Expr::Bool(_) => Err(
                CompileError::Internal("compound condition reached assembly"),
            ),

            _ => Err(CompileError::Internal("expression is not a condition")),
        }
    }

    fn btest(
        &mut self,
        ctx: &mut FrameCtx<'ir>,
        bv: usize,
        b0: usize,
        b1: usize,
        mode: BTestMode,
    ) -> Result<BranchCond, CompileError> {
        let nbits = ctx.frame.bitvecs[bv].nbits;
        if b0 > b1 || b1 >= nbits {
            return Err(CompileError::Internal("bit test range out of bounds"));
        }

        if mode == BTestMode::One {
            // no encoding for an exactly-one test over BAND
            return Err(CompileError::Unsupported("exactly-one bit test"));
        }

        let width = b1 - b0 + 1;
        let mask: u64 = if width == 64 {
            !0
        } else {
            ((1u64 << width) - 1) << b0
        };

        let tmp = ctx.alloc_slot();
        self.push(
            Opcode::MOVE,
            Operand::Slot(tmp as u16),
            Operand::Slot(ctx.bitvec_slot(bv) as u16),
        );

        let mask_op = if mask <= LIT_MAX as u64 {
            Operand::Lit(mask as i16)
        } else {
            let ix = self.const_ix(mask as i64);
            let lit = Self::pool_lit(ix)?;
            let tmp2 = ctx.alloc_slot();
            self.push(Opcode::ILOAD, Operand::Slot(tmp2 as u16), lit);
            Operand::Slot(tmp2 as u16)
        };

        self.push(Opcode::BAND, Operand::Slot(tmp as u16), mask_op);

        match mode {
            BTestMode::Bit | BTestMode::All => {
                self.push(Opcode::ICMP, Operand::Slot(tmp as u16), mask_op);
                Ok(BranchCond::Eq)
            }
            BTestMode::Any => {
                self.push(Opcode::ICMP, Operand::Slot(tmp as u16), Operand::Lit(0));
                Ok(BranchCond::Ne)
            }
            BTestMode::One => unreachable!("rejected above"),
        }
    }

    fn slot_operand(
        &mut self,
        ctx: &mut FrameCtx<'ir>,
        e: &Expr,
    ) -> Result<Operand, CompileError> {
        match e {
            Expr::Slot(i) => Ok(Operand::Slot(*i as u16)),
            Expr::ITemp(i) | Expr::FTemp(i) => Ok(Operand::Slot((ctx.temp_base + i) as u16)),
            Expr::Count(c) => Ok(Operand::Slot(c.0 as u16)),
            _ => Err(CompileError::Internal("destination is not a slot")),
        }
    }

    // Lowers an expression to an operand, emitting loads where a value
    // has to pass through a slot.
    fn operand(&mut self, ctx: &mut FrameCtx<'ir>, e: &Expr) -> Result<Operand, CompileError> {
        match e {
            Expr::TokType => Ok(Operand::Reg(Reg::TT)),
            Expr::TokNum => Ok(Operand::Reg(Reg::TNum)),
            Expr::TokLen => Ok(Operand::Reg(Reg::TLen)),
            Expr::MatchResult => Ok(Operand::Reg(Reg::M)),

            Expr::Count(c) => Ok(Operand::Slot(c.0 as u16)),
            Expr::Slot(i) => Ok(Operand::Slot(*i as u16)),
            Expr::ITemp(i) | Expr::FTemp(i) => Ok(Operand::Slot((ctx.temp_base + i) as u16)),

            Expr::Num(v) => {
                let ix = self.float_ix(*v);
                let lit = Self::pool_lit(ix)?;
                let tmp = ctx.alloc_slot();
                self.push(Opcode::FLOAD, Operand::Slot(tmp as u16), lit);
                Ok(Operand::Slot(tmp as u16))
            }

            Expr::Int(v) => self.int_operand(ctx, *v),
            Expr::Size(v) => self.int_operand(ctx, *v as i64),

            Expr::Split(_) => Err(CompileError::Internal(
                "split expression was not hoisted before assembly",
            )),

            _ => Err(CompileError::Internal("expression is not an operand")),
        }
    }

    fn int_operand(
        &mut self,
        ctx: &mut FrameCtx<'ir>,
        v: i64,
    ) -> Result<Operand, CompileError> {
        if Operand::fits_lit(v) {
            return Ok(Operand::Lit(v as i16));
        }

        let ix = self.const_ix(v);
        let lit = Self::pool_lit(ix)?;
        let tmp = ctx.alloc_slot();
        self.push(Opcode::ILOAD, Operand::Slot(tmp as u16), lit);
        Ok(Operand::Slot(tmp as u16))
    }

    fn resolve_fixups(&mut self) -> Result<(), CompileError> {
        for fix in &self.fixups {
            let target_pc = match &fix.target {
                Target::Block(fid, b) => *self
                    .block_off
                    .get(&(*fid, b.0))
                    .ok_or(CompileError::Internal("branch to an unscheduled block"))?,
                Target::Frame(f) => self.frame_entry[f.0],
            };

            let disp = target_pc as i64 - fix.at as i64;
            if !(BR_DISP_MIN..=BR_DISP_MAX).contains(&disp) {
                return Err(CompileError::BranchRange { disp });
            }

            self.code[fix.at] = Instruction::branch(fix.op, fix.cond, disp as i32).raw();
        }
        Ok(())
    }

    fn encode_splits(&self) -> Vec<u32> {
        if self.splits.is_empty() {
            return Vec::new();
        }

        let total: usize = self.splits.iter().map(Vec::len).sum();
        let mut sdata = Vec::with_capacity(self.splits.len() + 1 + total);

        sdata.push(0);
        let mut off = 0u32;
        for list in &self.splits {
            off += list.len() as u32;
            sdata.push(off);
        }

        for list in &self.splits {
            for f in list {
                sdata.push(self.frame_entry[f.0] as u32);
            }
        }

        sdata
    }
}

fn is_float(e: &Expr) -> bool {
    matches!(e, Expr::Num(_) | Expr::TokNum | Expr::FTemp(_))
}

fn cond_of(op: CmpOp) -> BranchCond {
    match op {
        CmpOp::Ne => BranchCond::Ne,
        CmpOp::Lt => BranchCond::Lt,
        CmpOp::Le => BranchCond::Le,
        CmpOp::Eq => BranchCond::Eq,
        CmpOp::Ge => BranchCond::Ge,
        CmpOp::Gt => BranchCond::Gt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnode::{canonify, from_schema};
    use crate::ir::{linearize, translate};
    use crate::schema::Schema;
    use serde_json::json;
    use weir_asm::TokenKind;

    fn program_for(doc: serde_json::Value) -> Program {
        let schema = Schema::from_value(&doc).unwrap();
        let node = canonify(from_schema(&schema).unwrap()).unwrap();
        let mut ir = translate(&node).unwrap();
        linearize(&mut ir).unwrap();
        assemble(&ir).unwrap()
    }

    fn opcodes(prog: &Program) -> Vec<Opcode> {
        prog.code()
            .iter()
            .map(|&raw| Instruction::from(raw).opcode().unwrap())
            .collect()
    }

    #[test]
    fn entry_frame_opens_with_proc() {
        let prog = program_for(json!({"type": "integer"}));
        let ops = opcodes(&prog);

        assert_eq!(ops[0], Opcode::PROC);
        assert_eq!(ops[1], Opcode::TOKEN);
        assert!(ops.contains(&Opcode::FINT));
        assert!(ops.contains(&Opcode::RETURN));
    }

    #[test]
    fn istok_compares_the_token_register() {
        let prog = program_for(json!({"type": "string"}));

        let icmp = prog
            .code()
            .iter()
            .map(|&raw| Instruction::from(raw))
            .find(|i| i.opcode() == Ok(Opcode::ICMP))
            .expect("a type dispatch compare");

        assert_eq!(icmp.a(), Some(Operand::Reg(Reg::TT)));
        assert_eq!(
            icmp.b(),
            Some(Operand::Lit(TokenKind::String as u8 as i16))
        );
    }

    #[test]
    fn branch_displacements_encode_within_range() {
        let prog = program_for(json!({
            "minProperties": 1,
            "properties": {"foo": {"type": "object", "minProperties": 1},
                           "bar": {"type": "string"}},
        }));

        for (pc, &raw) in prog.code().iter().enumerate() {
            let instr = Instruction::from(raw);
            if instr.opcode().map(|op| op.is_branch()).unwrap_or(false) {
                let disp = instr.disp() as i64;
                assert!((BR_DISP_MIN..=BR_DISP_MAX).contains(&disp));

                let target = pc as i64 + disp;
                assert!(target >= 0 && (target as usize) < prog.code().len());
            }
        }
    }

    #[test]
    fn splits_land_in_the_split_table() {
        let prog = program_for(json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}));

        assert_eq!(prog.nsplit(), 1);
        let entries = prog.split_entries(0).unwrap();
        assert_eq!(entries.len(), 2);

        // every entry is the PROC word of a sub-frame
        for &pc in entries {
            let instr = Instruction::from(prog.code()[pc as usize]);
            assert_eq!(instr.opcode(), Ok(Opcode::PROC));
        }

        assert!(opcodes(&prog).contains(&Opcode::SPLIT));
    }

    #[test]
    fn float_bounds_intern_into_the_pool() {
        let prog = program_for(json!({"minimum": 1.1}));
        assert_eq!(prog.float(0), Some(1.1));
        assert!(opcodes(&prog).contains(&Opcode::FLOAD));
        assert!(opcodes(&prog).contains(&Opcode::FCMP));
    }

    #[test]
    fn required_masks_use_bset_and_band() {
        let prog = program_for(json!({"required": ["foo"]}));
        let ops = opcodes(&prog);

        assert!(ops.contains(&Opcode::BSET));
        assert!(ops.contains(&Opcode::BAND));
        assert!(ops.contains(&Opcode::MATCH));
    }
}
