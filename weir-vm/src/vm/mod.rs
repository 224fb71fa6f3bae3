//! The streaming virtual machine.
//!
//! A [`Vm`] executes an encoded [`Program`] against a token stream. The
//! machine is a plain state machine with one suspension point: a `TOKEN`
//! instruction with no token buffered reports [`Advance::NeedToken`] and
//! re-enters the same instruction once the host delivers one.
//!
//! Split execution fans the current value out to sub-validators. Each
//! sub-frame runs as its own [`Thread`] over the same token sequence,
//! starting at the current token; the driver steps every live thread per
//! token, drops threads that return invalid, and counts (or bit-records)
//! the accepting ones when the value ends. A sub-validator's paused
//! state is nothing more than its saved program counters and slots, so
//! splits nest freely.

use weir_asm::{ErrorCode, Instruction, Opcode, Operand, Program, Reg, TokenKind};

use crate::token::{Token, TokenCtx};

/// Result of advancing the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The machine is starved; deliver a token and advance again.
    NeedToken,
    /// The top-level frame returned: `0` is valid, any other value is a
    /// validation error code.
    Done(u8),
}

/// A virtual machine bound to one program.
///
/// Programs are immutable and shareable; every `Vm` owns its complete
/// execution state.
#[derive(Debug, Clone)]
pub struct Vm<'p> {
    prog: &'p Program,
    root: Thread,
}

impl<'p> Vm<'p> {
    /// A fresh machine positioned at the program entry.
    pub fn new(prog: &'p Program) -> Self {
        Vm {
            prog,
            root: Thread::new(Program::entry()),
        }
    }

    /// Run until the machine needs a token or finishes.
    pub fn advance(&mut self) -> Advance {
        self.root.advance(self.prog)
    }

    /// Deliver the next token.
    pub fn give(&mut self, token: Token) {
        self.root.give(token);
    }
}

#[derive(Debug, Clone)]
struct Activation {
    pc: usize,
    slots: Vec<u64>,
}

// State of an in-flight CONSUME.
#[derive(Debug, Clone, Copy)]
enum ConsumeState {
    // the current token was an object key; the value hasn't started
    AwaitValue,
    // inside a container value, `depth` levels deep
    InValue { depth: u32 },
}

#[derive(Debug, Clone, Copy)]
enum SplitOut {
    Count(usize),
    Bits(usize),
}

#[derive(Debug, Clone)]
struct SplitExec {
    out: SplitOut,
    children: Vec<Thread>,
    depth: i64,
    value_done: bool,
}

// One validator: an activation stack plus its token registers. The root
// thread is the validator proper; further threads exist only inside
// splits.
#[derive(Debug, Clone)]
struct Thread {
    frames: Vec<Activation>,
    split: Option<Box<SplitExec>>,
    cur: Option<Token>,
    pending: Option<Token>,
    pushed_back: bool,
    consume: Option<ConsumeState>,
    flag: i8,
    mreg: i64,
    done: Option<u8>,
}

enum Step {
    Continue,
    NeedToken,
    Done(u8),
}

impl Thread {
    fn new(entry: usize) -> Self {
        Thread {
            frames: vec![Activation {
                pc: entry,
                slots: Vec::new(),
            }],
            split: None,
            cur: None,
            pending: None,
            pushed_back: false,
            consume: None,
            flag: 0,
            mreg: 0,
            done: None,
        }
    }

    fn give(&mut self, token: Token) {
        if let Some(split) = &mut self.split {
            if !split.value_done {
                if token.kind.is_open() {
                    split.depth += 1;
                } else if token.kind.is_close() {
                    split.depth -= 1;
                }
                if split.depth == 0 {
                    split.value_done = true;
                }
            }

            for child in &mut split.children {
                if child.done.is_none() {
                    child.give(token.clone());
                }
            }
        } else {
            self.pending = Some(token);
        }
    }

    fn advance(&mut self, prog: &Program) -> Advance {
        loop {
            if let Some(code) = self.done {
                return Advance::Done(code);
            }

            if self.split.is_some() {
                match self.drive_split(prog) {
                    Some(adv) => return adv,
                    None => continue,
                }
            }

            if self.consume.is_some() {
                match self.drive_consume() {
                    Some(adv) => return adv,
                    None => continue,
                }
            }

            match self.step(prog) {
                Step::Continue => {}
                Step::NeedToken => return Advance::NeedToken,
                Step::Done(code) => {
                    self.done = Some(code);
                    return Advance::Done(code);
                }
            }
        }
    }

    // Steps every live child; once all have returned and the value is
    // fully consumed, writes the result and clears the split. `None`
    // means the split finished and the parent may resume.
    fn drive_split(&mut self, prog: &Program) -> Option<Advance> {
        {
            let split = self.split.as_mut().expect("split is active");

            let mut starving = false;
            for child in &mut split.children {
                if child.done.is_some() {
                    continue;
                }
                if child.advance(prog) == Advance::NeedToken {
                    starving = true;
                }
            }

            if starving || !split.value_done {
                // live children want the next token; with none live, the
                // remainder of the value drains through the depth counter
                return Some(Advance::NeedToken);
            }
        }

        let split = self.split.take().expect("split is active");
        let act = self.frames.last_mut().expect("split inside an activation");

        match split.out {
            SplitOut::Count(slot) => {
                let n = split
                    .children
                    .iter()
                    .filter(|c| c.done == Some(0))
                    .count();
                act.slots[slot] = n as u64;
            }
            SplitOut::Bits(slot) => {
                let mut bits = 0u64;
                for (i, child) in split.children.iter().enumerate() {
                    if child.done == Some(0) {
                        bits |= 1 << i;
                    }
                }
                act.slots[slot] = bits;
            }
        }

        tracing::trace!(?split.out, "split finished");
        None
    }

    // Feeds buffered tokens through the consume state machine. `None`
    // means the current value is fully consumed.
    fn drive_consume(&mut self) -> Option<Advance> {
        loop {
            let state = self.consume?;

            let Some(token) = self.pending.take() else {
                return Some(Advance::NeedToken);
            };
            let kind = token.kind;
            self.cur = Some(token);

            self.consume = match state {
                ConsumeState::AwaitValue => {
                    if kind.is_open() {
                        Some(ConsumeState::InValue { depth: 1 })
                    } else {
                        // a scalar value is complete in one token
                        None
                    }
                }
                ConsumeState::InValue { depth } => {
                    let depth = if kind.is_open() {
                        depth + 1
                    } else if kind.is_close() {
                        depth - 1
                    } else {
                        depth
                    };

                    if depth == 0 {
                        None
                    } else {
                        Some(ConsumeState::InValue { depth })
                    }
                }
            };

            if self.consume.is_none() {
                return None;
            }
        }
    }

    fn start_consume(&mut self) {
        self.consume = if self.pushed_back {
            self.pushed_back = false;
            match &self.cur {
                Some(t) if t.kind.is_open() => Some(ConsumeState::InValue { depth: 1 }),
                _ => None,
            }
        } else {
            match &self.cur {
                Some(t) if t.ctx == TokenCtx::Key => Some(ConsumeState::AwaitValue),
                Some(t) if t.kind.is_open() => Some(ConsumeState::InValue { depth: 1 }),
                _ => None,
            }
        };
    }

    fn start_split(&mut self, prog: &Program, out: SplitOut, split_ix: usize) -> Step {
        let Some(entries) = prog.split_entries(split_ix) else {
            debug_assert!(false, "split index out of range");
            return Step::Done(ErrorCode::MatchCase as u8);
        };

        let mut children: Vec<Thread> = entries
            .iter()
            .map(|&pc| Thread::new(pc as usize))
            .collect();

        let mut depth = 0i64;
        let mut value_done = false;
        if let Some(first) = &self.cur {
            if first.kind.is_open() {
                depth = 1;
            } else {
                value_done = true;
            }
            for child in &mut children {
                child.pending = Some(first.clone());
            }
        }

        self.split = Some(Box::new(SplitExec {
            out,
            children,
            depth,
            value_done,
        }));

        Step::Continue
    }

    fn step(&mut self, prog: &Program) -> Step {
        let Some(act) = self.frames.last_mut() else {
            return Step::Done(0);
        };

        let Some(&raw) = prog.code().get(act.pc) else {
            debug_assert!(false, "pc ran off the code vector");
            return Step::Done(ErrorCode::MatchCase as u8);
        };
        let instr = Instruction::from(raw);
        let Ok(op) = instr.opcode() else {
            debug_assert!(false, "undecodable instruction");
            return Step::Done(ErrorCode::MatchCase as u8);
        };

        tracing::trace!(pc = act.pc, %instr, "step");

        // branch words carry a condition and displacement, not operands
        match op {
            Opcode::JMP => {
                if instr.cond().satisfied(self.flag) {
                    act.pc = (act.pc as i64 + instr.disp() as i64) as usize;
                } else {
                    act.pc += 1;
                }
                return Step::Continue;
            }

            Opcode::CALL => {
                let target = (act.pc as i64 + instr.disp() as i64) as usize;
                act.pc += 1;
                self.frames.push(Activation {
                    pc: target,
                    slots: Vec::new(),
                });
                return Step::Continue;
            }

            _ => {}
        }

        let (Some(a), Some(b)) = (instr.a(), instr.b()) else {
            debug_assert!(false, "undecodable operands");
            return Step::Done(ErrorCode::MatchCase as u8);
        };

        match op {
            Opcode::NOP => act.pc += 1,

            Opcode::PROC => {
                let nslots = lit_of(a);
                act.slots = vec![0; nslots as usize];
                act.pc += 1;
            }

            Opcode::TOKEN => {
                if b == Operand::Lit(-1) {
                    // un-consume: the next TOKEN re-delivers the current
                    self.pushed_back = true;
                    act.pc += 1;
                } else if self.pushed_back {
                    self.pushed_back = false;
                    act.pc += 1;
                } else if let Some(token) = self.pending.take() {
                    self.cur = Some(token);
                    act.pc += 1;
                } else {
                    return Step::NeedToken;
                }
            }

            Opcode::CONSUME => {
                act.pc += 1;
                self.start_consume();
            }

            Opcode::ICMP => {
                let x = read_int(a, &act.slots, &self.cur, self.mreg);
                let y = read_int(b, &act.slots, &self.cur, self.mreg);
                self.flag = ord_flag(x.cmp(&y));
                act.pc += 1;
            }

            Opcode::FCMP => {
                let x = read_float(a, &act.slots, &self.cur);
                let y = read_float(b, &act.slots, &self.cur);
                self.flag = match x.partial_cmp(&y) {
                    Some(ord) => ord_flag(ord),
                    None => 1, // NaN compares unequal
                };
                act.pc += 1;
            }

            Opcode::FINT => {
                let v = read_float(a, &act.slots, &self.cur);
                let ok = match b {
                    Operand::None => v.is_finite() && v.fract() == 0.0,
                    divisor => {
                        let d = read_float(divisor, &act.slots, &self.cur);
                        let q = v / d;
                        q.is_finite() && q.fract() == 0.0
                    }
                };
                self.flag = if ok { 0 } else { 1 };
                act.pc += 1;
            }

            Opcode::RETURN => {
                let code = lit_of(a) as u8;
                if code != 0 {
                    // a non-zero return propagates through every caller;
                    // only a surrounding split absorbs it
                    return Step::Done(code);
                }

                self.frames.pop();
                self.flag = 0;
                if self.frames.is_empty() {
                    return Step::Done(0);
                }
            }

            Opcode::MATCH => {
                let ix = lit_of(a) as usize;
                let Some(dfa) = prog.dfa(ix) else {
                    debug_assert!(false, "dfa index out of range");
                    return Step::Done(ErrorCode::MatchCase as u8);
                };

                let text: &[u8] = self.cur.as_ref().map(|t| t.text.as_slice()).unwrap_or(&[]);
                self.mreg = dfa.run(text).unwrap_or(0) as i64;
                act.pc += 1;
            }

            Opcode::FLOAD => {
                let (Operand::Slot(dst), ix) = (a, lit_of(b) as usize) else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                let Some(v) = prog.float(ix) else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                act.slots[dst as usize] = v.to_bits();
                act.pc += 1;
            }

            Opcode::ILOAD => {
                let (Operand::Slot(dst), ix) = (a, lit_of(b) as usize) else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                let Some(v) = prog.constant(ix) else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                act.slots[dst as usize] = v as u64;
                act.pc += 1;
            }

            Opcode::MOVE => {
                let Operand::Slot(dst) = a else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                let v = read_raw(b, &act.slots, &self.cur, self.mreg);
                act.slots[dst as usize] = v;
                act.pc += 1;
            }

            Opcode::INCR => {
                let Operand::Slot(slot) = a else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                let delta = lit_of(b);
                let v = act.slots[slot as usize] as i64 + delta;
                act.slots[slot as usize] = v as u64;
                act.pc += 1;
            }

            Opcode::BSET => {
                let Operand::Slot(slot) = a else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                act.slots[slot as usize] |= 1u64 << lit_of(b);
                act.pc += 1;
            }

            Opcode::BAND => {
                let Operand::Slot(slot) = a else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                let mask = read_raw(b, &act.slots, &self.cur, self.mreg);
                act.slots[slot as usize] &= mask;
                act.pc += 1;
            }

            Opcode::SPLIT | Opcode::SPLITV => {
                let ix = lit_of(a) as usize;
                let Operand::Slot(slot) = b else {
                    return Step::Done(ErrorCode::MatchCase as u8);
                };
                let out = if op == Opcode::SPLIT {
                    SplitOut::Count(slot as usize)
                } else {
                    SplitOut::Bits(slot as usize)
                };

                act.pc += 1;
                return self.start_split(prog, out, ix);
            }

            Opcode::JMP | Opcode::CALL => unreachable!("handled above"),
        }

        Step::Continue
    }
}

fn lit_of(op: Operand) -> i64 {
    match op {
        Operand::Lit(v) => v as i64,
        _ => 0,
    }
}

fn ord_flag(ord: std::cmp::Ordering) -> i8 {
    match ord {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

fn token_kind(cur: &Option<Token>) -> TokenKind {
    cur.as_ref().map(|t| t.kind).unwrap_or(TokenKind::None)
}

fn read_int(op: Operand, slots: &[u64], cur: &Option<Token>, mreg: i64) -> i64 {
    match op {
        Operand::None => 0,
        Operand::Reg(Reg::TT) => token_kind(cur) as u8 as i64,
        Operand::Reg(Reg::TNum) => cur.as_ref().map(|t| t.num as i64).unwrap_or(0),
        Operand::Reg(Reg::TLen) => cur.as_ref().map(|t| t.text.len() as i64).unwrap_or(0),
        Operand::Reg(Reg::M) => mreg,
        Operand::Slot(i) => slots.get(i as usize).copied().unwrap_or(0) as i64,
        Operand::Lit(v) => v as i64,
    }
}

fn read_float(op: Operand, slots: &[u64], cur: &Option<Token>) -> f64 {
    match op {
        Operand::Reg(Reg::TNum) => cur.as_ref().map(|t| t.num).unwrap_or(0.0),
        Operand::Slot(i) => f64::from_bits(slots.get(i as usize).copied().unwrap_or(0)),
        Operand::Lit(v) => v as f64,
        other => read_int(other, slots, cur, 0) as f64,
    }
}

// Raw slot-width read: floats keep their bit pattern, integers widen.
fn read_raw(op: Operand, slots: &[u64], cur: &Option<Token>, mreg: i64) -> u64 {
    match op {
        Operand::Reg(Reg::TNum) => cur
            .as_ref()
            .map(|t| t.num.to_bits())
            .unwrap_or(0.0f64.to_bits()),
        Operand::Slot(i) => slots.get(i as usize).copied().unwrap_or(0),
        other => read_int(other, slots, cur, mreg) as u64,
    }
}
