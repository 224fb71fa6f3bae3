//! Linearisation of structured IR into basic blocks.
//!
//! `IF`/`LOOP`/`BREAK` and match dispatch become blocks connected by
//! explicit branches. `VALID` and `INVALID` are hoisted into shared
//! blocks, one `VALID` block per frame and one `INVALID` block per
//! distinct error code. Complex conditions break into short-circuit
//! `CBRANCH` chains, and split expressions are hoisted into integer
//! temporaries. Afterwards, branch chains collapse, unreachable blocks
//! are swept, and the survivors are ordered so a conditional branch's
//! false target follows it whenever possible, enabling branch elision
//! during assembly.

use weir_asm::ErrorCode;

use super::{Block, BlockId, Expr, Frame, ProgramIr, Stmt};
use crate::error::CompileError;

/// Linearise every frame of a program in place.
///
/// Structured bodies are drained into `blocks`/`order`; the frame's
/// `ntemps` grows by any temporaries the pass introduces.
pub fn linearize(prog: &mut ProgramIr) -> Result<(), CompileError> {
    for (i, frame) in prog.frames.iter_mut().enumerate() {
        linearize_frame(frame)?;
        tracing::trace!(frame = i, blocks = frame.order.len(), "linearized");
    }
    Ok(())
}

fn linearize_frame(frame: &mut Frame) -> Result<(), CompileError> {
    let body = std::mem::take(&mut frame.body);

    let mut lin = Linearizer {
        blocks: vec![Block {
            prefix: "entry",
            stmts: Vec::new(),
        }],
        cur: 0,
        valid: None,
        invalid: Vec::new(),
        loops: Vec::new(),
        ntemps: frame.ntemps,
    };

    lin.stmts(body)?;

    let mut blocks = lin.blocks;
    prune_blocks(&mut blocks);
    collapse_branch_chains(&mut blocks);

    let reachable = mark_reachable(&blocks);
    let order = schedule_blocks(&blocks, &reachable);

    for bid in &order {
        let ok = matches!(
            blocks[bid.0].stmts.last(),
            Some(Stmt::Branch(_) | Stmt::CBranch { .. } | Stmt::Valid | Stmt::Invalid(_))
        );
        if !ok {
            return Err(CompileError::Internal("reachable block has no terminator"));
        }
    }

    frame.ntemps = lin.ntemps;
    frame.blocks = blocks;
    frame.order = order;
    Ok(())
}

struct Linearizer {
    blocks: Vec<Block>,
    cur: usize,
    valid: Option<BlockId>,
    invalid: Vec<(ErrorCode, BlockId)>,
    loops: Vec<(&'static str, BlockId)>,
    ntemps: usize,
}

impl Linearizer {
    fn new_block(&mut self, prefix: &'static str) -> BlockId {
        self.blocks.push(Block {
            prefix,
            stmts: Vec::new(),
        });
        BlockId(self.blocks.len() - 1)
    }

    fn terminated(&self) -> bool {
        matches!(
            self.blocks[self.cur].stmts.last(),
            Some(Stmt::Branch(_) | Stmt::CBranch { .. } | Stmt::Valid | Stmt::Invalid(_))
        )
    }

    // Statements after a terminator are unreachable and dropped.
    fn emit(&mut self, stmt: Stmt) {
        if !self.terminated() {
            self.blocks[self.cur].stmts.push(stmt);
        }
    }

    fn valid_block(&mut self) -> BlockId {
        if let Some(b) = self.valid {
            return b;
        }

        let b = self.new_block("valid");
        self.blocks[b.0].stmts.push(Stmt::Valid);
        self.valid = Some(b);
        b
    }

    fn invalid_block(&mut self, code: ErrorCode) -> BlockId {
        if let Some(&(_, b)) = self.invalid.iter().find(|(c, _)| *c == code) {
            return b;
        }

        let b = self.new_block("invalid");
        self.blocks[b.0].stmts.push(Stmt::Invalid(code));
        self.invalid.push((code, b));
        b
    }

    fn stmts(&mut self, list: Vec<Stmt>) -> Result<(), CompileError> {
        for stmt in list {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Nop => {}

            Stmt::Valid => {
                let b = self.valid_block();
                self.emit(Stmt::Branch(b));
            }
            Stmt::Invalid(code) => {
                let b = self.invalid_block(code);
                self.emit(Stmt::Branch(b));
            }

            Stmt::Token
            | Stmt::Untoken
            | Stmt::Consume
            | Stmt::Incr(_)
            | Stmt::Decr(_)
            | Stmt::BSet(..)
            | Stmt::BClear(..)
            | Stmt::Call(_)
            | Stmt::Move { .. }
            | Stmt::MatchRun(_)
            | Stmt::SplitVec { .. } => self.emit(stmt),

            Stmt::If { cond, then, els } => {
                let t = self.new_block("on_true");
                let f = self.new_block("on_false");
                let join = self.new_block("join");

                self.cond(cond, t, f)?;

                self.cur = t.0;
                self.stmts(then)?;
                self.emit(Stmt::Branch(join));

                self.cur = f.0;
                self.stmts(els)?;
                self.emit(Stmt::Branch(join));

                self.cur = join.0;
            }

            Stmt::Loop { label, body } => {
                let top = self.new_block("loop");
                let end = self.new_block("loop_end");

                self.emit(Stmt::Branch(top));
                self.cur = top.0;

                self.loops.push((label, end));
                self.stmts(body)?;
                self.loops.pop();

                self.emit(Stmt::Branch(top));
                self.cur = end.0;
            }

            Stmt::Break { label } => {
                let end = self
                    .loops
                    .iter()
                    .rev()
                    .find(|(l, _)| *l == label)
                    .map(|(_, end)| *end)
                    .ok_or(CompileError::Internal("break outside its loop"))?;
                self.emit(Stmt::Branch(end));
            }

            Stmt::MatchDispatch {
                matcher,
                cases,
                default,
            } => {
                self.emit(Stmt::MatchRun(matcher));

                let join = self.new_block("m_join");
                let dblk = self.new_block("m_default");
                let arms: Vec<(u32, BlockId, Vec<Stmt>)> = cases
                    .into_iter()
                    .map(|arm| {
                        let b = self.new_block("m_case");
                        (arm.which, b, arm.body)
                    })
                    .collect();

                // dispatch chain on the match register; an id the DFA can
                // produce but no arm handles is a compiler fault
                let fail = self.invalid_block(ErrorCode::MatchCase);
                let mut tests = vec![(0u32, dblk)];
                tests.extend(arms.iter().map(|(which, b, _)| (*which, *b)));

                let n = tests.len();
                for (i, (which, target)) in tests.into_iter().enumerate() {
                    let cond = Expr::Cmp(
                        super::CmpOp::Eq,
                        Box::new(Expr::MatchResult),
                        Box::new(Expr::Size(which as u64)),
                    );

                    if i + 1 == n {
                        self.emit(Stmt::CBranch {
                            cond,
                            on_true: target,
                            on_false: fail,
                        });
                    } else {
                        let next = self.new_block("m_test");
                        self.emit(Stmt::CBranch {
                            cond,
                            on_true: target,
                            on_false: next,
                        });
                        self.cur = next.0;
                    }
                }

                for (_, b, body) in arms {
                    self.cur = b.0;
                    self.stmts(body)?;
                    self.emit(Stmt::Branch(join));
                }

                self.cur = dblk.0;
                self.stmts(default)?;
                self.emit(Stmt::Branch(join));

                self.cur = join.0;
            }

            Stmt::Branch(_) | Stmt::CBranch { .. } => {
                return Err(CompileError::Internal(
                    "linear branch in a structured body",
                ))
            }
        }

        Ok(())
    }

    // Short-circuit lowering of a condition toward two targets.
    fn cond(&mut self, cond: Expr, t: BlockId, f: BlockId) -> Result<(), CompileError> {
        match cond {
            Expr::And(args) => {
                let n = args.len();
                if n == 0 {
                    self.emit(Stmt::Branch(t));
                    return Ok(());
                }

                for (i, arg) in args.into_iter().enumerate() {
                    if i + 1 == n {
                        self.cond(arg, t, f)?;
                    } else {
                        let mid = self.new_block("and");
                        self.cond(arg, mid, f)?;
                        self.cur = mid.0;
                    }
                }
            }

            Expr::Or(args) => {
                let n = args.len();
                if n == 0 {
                    self.emit(Stmt::Branch(f));
                    return Ok(());
                }

                for (i, arg) in args.into_iter().enumerate() {
                    if i + 1 == n {
                        self.cond(arg, t, f)?;
                    } else {
                        let mid = self.new_block("or");
                        self.cond(arg, t, mid)?;
                        self.cur = mid.0;
                    }
                }
            }

            Expr::Not(arg) => self.cond(*arg, f, t)?,

            Expr::Bool(true) => self.emit(Stmt::Branch(t)),
            Expr::Bool(false) => self.emit(Stmt::Branch(f)),

            leaf => {
                let leaf = self.hoist_splits(leaf);
                self.emit(Stmt::CBranch {
                    cond: leaf,
                    on_true: t,
                    on_false: f,
                });
            }
        }

        Ok(())
    }

    // A split expression runs sub-validators; it cannot sit inside a
    // branch condition, so its count lands in a fresh temporary first.
    fn hoist_splits(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Cmp(op, lhs, rhs) => {
                let lhs = self.hoist_operand(lhs);
                let rhs = self.hoist_operand(rhs);
                Expr::Cmp(op, lhs, rhs)
            }
            other => other,
        }
    }

    fn hoist_operand(&mut self, e: Box<Expr>) -> Box<Expr> {
        match *e {
            Expr::Split(split) => {
                let temp = self.ntemps;
                self.ntemps += 1;

                self.emit(Stmt::Move {
                    dst: Expr::ITemp(temp),
                    src: Expr::Split(split),
                });
                Box::new(Expr::ITemp(temp))
            }
            _ => e,
        }
    }
}

// Drops dead statements after each block's first terminator.
fn prune_blocks(blocks: &mut [Block]) {
    for block in blocks {
        let terminator = block.stmts.iter().position(|s| {
            matches!(
                s,
                Stmt::Branch(_) | Stmt::CBranch { .. } | Stmt::Valid | Stmt::Invalid(_)
            )
        });
        if let Some(pos) = terminator {
            block.stmts.truncate(pos + 1);
        }
    }
}

// A branch whose target holds nothing but another branch can aim at the
// final destination directly.
fn collapse_branch_chains(blocks: &mut Vec<Block>) {
    fn final_dest(blocks: &[Block], mut b: BlockId) -> BlockId {
        let mut hops = 0;
        while let [Stmt::Branch(next)] = blocks[b.0].stmts.as_slice() {
            b = *next;
            hops += 1;
            if hops > blocks.len() {
                break; // degenerate branch cycle; leave as-is
            }
        }
        b
    }

    for i in 0..blocks.len() {
        let retarget: Vec<(usize, Stmt)> = blocks[i]
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(si, stmt)| match stmt {
                Stmt::Branch(b) => Some((si, Stmt::Branch(final_dest(blocks, *b)))),
                Stmt::CBranch {
                    cond,
                    on_true,
                    on_false,
                } => Some((
                    si,
                    Stmt::CBranch {
                        cond: cond.clone(),
                        on_true: final_dest(blocks, *on_true),
                        on_false: final_dest(blocks, *on_false),
                    },
                )),
                _ => None,
            })
            .collect();

        for (si, stmt) in retarget {
            blocks[i].stmts[si] = stmt;
        }
    }
}

fn successors(block: &Block) -> Vec<BlockId> {
    match block.stmts.last() {
        Some(Stmt::Branch(b)) => vec![*b],
        Some(Stmt::CBranch {
            on_true, on_false, ..
        }) => vec![*on_false, *on_true],
        _ => vec![],
    }
}

fn mark_reachable(blocks: &[Block]) -> Vec<bool> {
    let mut reachable = vec![false; blocks.len()];
    let mut stack = vec![BlockId(0)];

    while let Some(b) = stack.pop() {
        if reachable[b.0] {
            continue;
        }
        reachable[b.0] = true;
        stack.extend(successors(&blocks[b.0]));
    }

    reachable
}

// Pseudo-topological schedule: walk fallthrough chains preferring a
// conditional branch's false target, then start a new chain at the first
// unplaced reachable block.
fn schedule_blocks(blocks: &[Block], reachable: &[bool]) -> Vec<BlockId> {
    let mut placed = vec![false; blocks.len()];
    let mut order = Vec::new();

    for start in 0..blocks.len() {
        if placed[start] || !reachable[start] {
            continue;
        }

        let mut next = Some(BlockId(start));
        while let Some(b) = next {
            placed[b.0] = true;
            order.push(b);

            next = successors(&blocks[b.0])
                .into_iter()
                .find(|succ| reachable[succ.0] && !placed[succ.0]);
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnode::{canonify, from_schema};
    use crate::ir::translate;
    use crate::schema::Schema;
    use serde_json::json;

    fn linearized(doc: serde_json::Value) -> ProgramIr {
        let schema = Schema::from_value(&doc).unwrap();
        let node = canonify(from_schema(&schema).unwrap()).unwrap();
        let mut ir = translate(&node).unwrap();
        linearize(&mut ir).unwrap();
        ir
    }

    fn assert_frame_invariants(frame: &Frame) {
        assert!(!frame.order.is_empty());
        assert_eq!(frame.order[0], BlockId(0), "entry block schedules first");

        let scheduled: Vec<usize> = frame.order.iter().map(|b| b.0).collect();
        for bid in &frame.order {
            for succ in successors(&frame.blocks[bid.0]) {
                assert!(
                    scheduled.contains(&succ.0),
                    "branch target {} not scheduled",
                    succ.0
                );
            }
        }
    }

    #[test]
    fn every_scheduled_block_is_reachable_and_terminated() {
        for doc in [
            json!({}),
            json!({"type": "integer"}),
            json!({"properties": {"foo": {"type": "number"}}, "minProperties": 1}),
            json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}),
            json!({"items": [{"type": "string"}], "additionalItems": false}),
            json!({"dependencies": {"bar": ["foo"]}}),
        ] {
            let ir = linearized(doc);
            for frame in &ir.frames {
                assert!(frame.body.is_empty(), "body drained into blocks");
                assert_frame_invariants(frame);
            }
        }
    }

    #[test]
    fn valid_exits_share_one_block() {
        let ir = linearized(json!({"properties": {"foo": {"type": "number"}}}));
        let entry = &ir.frames[0];

        let valid_blocks = entry
            .order
            .iter()
            .filter(|b| entry.blocks[b.0].stmts == vec![Stmt::Valid])
            .count();
        assert_eq!(valid_blocks, 1);
    }

    #[test]
    fn split_conditions_hoist_into_temporaries() {
        let ir = linearized(json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}));
        let entry = &ir.frames[0];

        assert_eq!(entry.ntemps, 1);

        let has_split_move = entry.order.iter().any(|b| {
            entry.blocks[b.0].stmts.iter().any(|s| {
                matches!(
                    s,
                    Stmt::Move {
                        src: Expr::Split(_),
                        ..
                    }
                )
            })
        });
        assert!(has_split_move);
    }

    #[test]
    fn dump_is_stable_across_recanonification() {
        let doc = json!({
            "minProperties": 1,
            "properties": {"foo": {"type": "object", "minProperties": 1},
                           "bar": {"type": "string"}},
        });
        let schema = Schema::from_value(&doc).unwrap();

        let once = canonify(from_schema(&schema).unwrap()).unwrap();
        let twice = canonify(once.clone()).unwrap();

        let mut ir1 = translate(&once).unwrap();
        linearize(&mut ir1).unwrap();
        let mut ir2 = translate(&twice).unwrap();
        linearize(&mut ir2).unwrap();

        assert_eq!(ir1.dump(), ir2.dump());
    }
}
