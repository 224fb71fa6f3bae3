//! Translation from canonical constraint trees to structured IR.
//!
//! Each value-level validator becomes one frame: a `TOKEN` followed by a
//! per-token-kind dispatch. Nested validators (property values, array
//! items, split branches) become further frames reached by `CALL` or
//! through split lists.

use weir_asm::{ErrorCode, TokenKind};

use super::{
    BTestMode, Bitvec, BitvecId, CmpOp, Counter, CounterId, Expr, Frame, FrameId, MatchArm,
    MatcherId, ProgramIr, SplitListId, Stmt,
};
use crate::cnode::{Cnode, MatchSwitch, NumRange, RangeFlags, NKINDS};
use crate::error::CompileError;

/// Translate a canonical constraint into an IR program.
///
/// The input must be canonified: a `Switch` (or constant) whose slots
/// contain no nested switches. Frame 0 of the result is the entry frame.
pub fn translate(root: &Cnode) -> Result<ProgramIr, CompileError> {
    let mut tr = Translator::default();
    let entry = tr.frame_for_value(root)?;

    if entry.0 != 0 {
        return Err(CompileError::Internal("entry frame must be frame 0"));
    }

    tracing::debug!(frames = tr.prog.frames.len(), "translated constraint tree");
    Ok(tr.prog)
}

#[derive(Default)]
struct Translator {
    prog: ProgramIr,
}

impl Translator {
    // Builds the frame validating one whole value.
    fn frame_for_value(&mut self, node: &Cnode) -> Result<FrameId, CompileError> {
        let id = FrameId(self.prog.frames.len());
        self.prog.frames.push(Frame::default());

        let mut frame = Frame::default();
        frame.body = match node {
            Cnode::Switch(slots) => self.switch_body(&mut frame, slots)?,
            Cnode::Valid => vec![Stmt::Token, Stmt::Consume, Stmt::Valid],
            Cnode::Invalid => vec![Stmt::Token, Stmt::Invalid(ErrorCode::UnexpectedToken)],
            _ => return Err(CompileError::Internal("frame body is not a canonical value")),
        };

        self.prog.frames[id.0] = frame;
        Ok(id)
    }

    // Builds the frame validating one value whose first token is already
    // known to be of `kind` (a split branch).
    fn frame_for_slot(&mut self, kind: TokenKind, node: &Cnode) -> Result<FrameId, CompileError> {
        let id = FrameId(self.prog.frames.len());
        self.prog.frames.push(Frame::default());

        let mut frame = Frame::default();
        let mut body = vec![Stmt::Token];
        body.extend(self.value_stmts(&mut frame, kind, node)?);
        frame.body = body;

        self.prog.frames[id.0] = frame;
        Ok(id)
    }

    // TOKEN plus the per-kind dispatch. Kinds sharing the dominant
    // constant fall through to a shared tail.
    fn switch_body(
        &mut self,
        fr: &mut Frame,
        slots: &[Cnode; NKINDS],
    ) -> Result<Vec<Stmt>, CompileError> {
        let nvalid = slots.iter().filter(|s| **s == Cnode::Valid).count();
        let ninvalid = slots.iter().filter(|s| **s == Cnode::Invalid).count();
        let dominant_valid = nvalid > ninvalid;

        let mut tail = if dominant_valid {
            vec![Stmt::Consume, Stmt::Valid]
        } else {
            vec![Stmt::Invalid(ErrorCode::UnexpectedToken)]
        };

        for (i, slot) in slots.iter().enumerate().rev() {
            let dominant = if dominant_valid {
                *slot == Cnode::Valid
            } else {
                *slot == Cnode::Invalid
            };
            if dominant {
                continue;
            }

            let kind = TokenKind::SWITCH[i];
            tail = vec![Stmt::If {
                cond: Expr::IsTok(kind),
                then: self.value_stmts(fr, kind, slot)?,
                els: tail,
            }];
        }

        let mut body = vec![Stmt::Token];
        body.extend(tail);
        Ok(body)
    }

    // Statements validating the current value, whose first token is of
    // `kind` and already loaded.
    fn value_stmts(
        &mut self,
        fr: &mut Frame,
        kind: TokenKind,
        node: &Cnode,
    ) -> Result<Vec<Stmt>, CompileError> {
        match node {
            Cnode::Valid => return Ok(vec![Stmt::Consume, Stmt::Valid]),
            Cnode::Invalid => return Ok(vec![Stmt::Invalid(ErrorCode::UnexpectedToken)]),
            _ => {}
        }

        if requires_split(node) {
            return self.split_stmts(fr, kind, node);
        }

        match kind {
            TokenKind::ObjectBegin => self.object_stmts(fr, node),
            TokenKind::ArrayBegin => self.array_stmts(fr, node),
            TokenKind::Number => number_chain(node, vec![Stmt::Valid]),
            TokenKind::String => string_chain(fr, node, vec![Stmt::Valid]),
            _ => Err(CompileError::Internal(
                "non-constant constraint on a constant token kind",
            )),
        }
    }

    // ---- objects ----

    fn object_stmts(&mut self, fr: &mut Frame, node: &Cnode) -> Result<Vec<Stmt>, CompileError> {
        let single;
        let parts: &[Cnode] = match node {
            Cnode::And(children) => children,
            other => {
                single = [other.clone()];
                &single
            }
        };

        let mut count = None;
        let mut mswitch: Option<&MatchSwitch> = None;
        let mut reqmask = None;
        let mut depmask: &[(usize, Vec<usize>)] = &[];

        for part in parts {
            match part {
                Cnode::CountRange { min, max, has_max } => count = Some((*min, *max, *has_max)),
                Cnode::MatchSwitch(ms) => mswitch = Some(ms.as_ref()),
                Cnode::ReqMask { nbits, nreq } => reqmask = Some((*nbits, *nreq)),
                Cnode::DepMask { clauses } => depmask = clauses,
                Cnode::Valid => {}
                _ => {
                    return Err(CompileError::Internal(
                        "unexpected constraint inside an object",
                    ))
                }
            }
        }

        let counter = count.map(|_| {
            fr.counters.push(Counter { label: "num_props" });
            CounterId(fr.counters.len() - 1)
        });
        let mask = reqmask.map(|(nbits, _)| {
            fr.bitvecs.push(Bitvec {
                label: "reqmask",
                nbits,
            });
            BitvecId(fr.bitvecs.len() - 1)
        });

        let mut per_key = Vec::new();
        match mswitch {
            Some(ms) => {
                fr.matchers.push(ms.dfa.clone());
                let matcher = MatcherId(fr.matchers.len() - 1);

                let mut cases = Vec::with_capacity(ms.cases.len());
                for case in &ms.cases {
                    cases.push(MatchArm {
                        which: case.which,
                        body: self.case_stmts(&case.constraint, mask)?,
                    });
                }
                let default = self.case_stmts(&ms.default, mask)?;

                per_key.push(Stmt::MatchDispatch {
                    matcher,
                    cases,
                    default,
                });
            }
            None => per_key.push(Stmt::Consume),
        }
        if let Some(c) = counter {
            per_key.push(Stmt::Incr(c));
        }

        let mut stmts = vec![Stmt::Loop {
            label: "obj",
            body: vec![
                Stmt::Token,
                Stmt::If {
                    cond: Expr::IsTok(TokenKind::ObjectEnd),
                    then: vec![Stmt::Break { label: "obj" }],
                    els: per_key,
                },
            ],
        }];

        let mut checks = Vec::new();
        if let (Some(c), Some((min, max, has_max))) = (counter, count) {
            if min > 0 {
                checks.push((
                    Expr::Cmp(CmpOp::Ge, Box::new(Expr::Count(c)), Box::new(Expr::Size(min))),
                    ErrorCode::TooFewProps,
                ));
            }
            if has_max {
                checks.push((
                    Expr::Cmp(CmpOp::Le, Box::new(Expr::Count(c)), Box::new(Expr::Size(max))),
                    ErrorCode::TooManyProps,
                ));
            }
        }

        if let (Some(bv), Some((_, nreq))) = (mask, reqmask) {
            if nreq > 0 {
                checks.push((
                    Expr::BTest {
                        bitvec: bv,
                        b0: 0,
                        b1: nreq - 1,
                        mode: BTestMode::All,
                    },
                    ErrorCode::MissingRequired,
                ));
            }

            for (key, requires) in depmask {
                let have_key = Expr::BTest {
                    bitvec: bv,
                    b0: *key,
                    b1: *key,
                    mode: BTestMode::Bit,
                };
                let mut have_reqs: Vec<Expr> = requires
                    .iter()
                    .map(|&bit| Expr::BTest {
                        bitvec: bv,
                        b0: bit,
                        b1: bit,
                        mode: BTestMode::Bit,
                    })
                    .collect();
                let have_all = if have_reqs.len() == 1 {
                    have_reqs.pop().expect("len checked")
                } else {
                    Expr::And(have_reqs)
                };

                checks.push((
                    Expr::Or(vec![Expr::Not(Box::new(have_key)), have_all]),
                    ErrorCode::MissingRequired,
                ));
            }
        }

        stmts.extend(fold_checks(checks));
        Ok(stmts)
    }

    // Statements handling one matched property: required-bit markers plus
    // exactly one value-consuming action.
    fn case_stmts(
        &mut self,
        constraint: &Cnode,
        mask: Option<BitvecId>,
    ) -> Result<Vec<Stmt>, CompileError> {
        let mut out = Vec::new();
        let mut consumed = false;

        let single;
        let items: &[Cnode] = match constraint {
            Cnode::And(children) => children,
            other => {
                single = [other.clone()];
                &single
            }
        };

        for item in items {
            match item {
                Cnode::Valid => {}
                Cnode::Invalid => {
                    out.push(Stmt::Invalid(ErrorCode::BadPropertyName));
                    return Ok(out);
                }
                Cnode::ReqBit { bit } => {
                    let mask =
                        mask.ok_or(CompileError::Internal("required bit without a reqmask"))?;
                    out.push(Stmt::BSet(mask, *bit));
                }
                Cnode::Switch(_) => {
                    if consumed {
                        return Err(CompileError::Internal(
                            "property case consumes its value twice",
                        ));
                    }
                    consumed = true;
                    out.push(Stmt::Call(self.frame_for_value(item)?));
                }
                _ => {
                    return Err(CompileError::Internal(
                        "unexpected constraint in a property case",
                    ))
                }
            }
        }

        if !consumed {
            out.push(Stmt::Consume);
        }
        Ok(out)
    }

    // ---- arrays ----

    fn array_stmts(&mut self, fr: &mut Frame, node: &Cnode) -> Result<Vec<Stmt>, CompileError> {
        let single;
        let parts: &[Cnode] = match node {
            Cnode::And(children) => children,
            other => {
                single = [other.clone()];
                &single
            }
        };

        let mut count = None;
        let mut tuple: &[Cnode] = &[];
        let mut additional = None;

        for part in parts {
            match part {
                Cnode::CountRange { min, max, has_max } => count = Some((*min, *max, *has_max)),
                Cnode::ArrItem(items) => tuple = items,
                Cnode::ArrAdditional(child) => additional = Some(child.as_ref()),
                Cnode::ArrUnique => return Err(CompileError::Unsupported("uniqueItems")),
                Cnode::Valid => {}
                _ => {
                    return Err(CompileError::Internal(
                        "unexpected constraint inside an array",
                    ))
                }
            }
        }

        let counter = if count.is_some() || !tuple.is_empty() {
            fr.counters.push(Counter { label: "num_items" });
            Some(CounterId(fr.counters.len() - 1))
        } else {
            None
        };

        let rest = match additional {
            None | Some(Cnode::Valid) => vec![Stmt::Consume],
            // items beyond the positional prefix are not allowed
            Some(Cnode::Invalid) => vec![Stmt::Invalid(ErrorCode::LengthTooLong)],
            Some(sub) => vec![Stmt::Call(self.frame_for_value(sub)?)],
        };

        let mut dispatch = rest;
        for (i, item) in tuple.iter().enumerate().rev() {
            let c = counter.ok_or(CompileError::Internal("tuple items need a counter"))?;
            let action = match item {
                Cnode::Valid => vec![Stmt::Consume],
                Cnode::Invalid => vec![Stmt::Invalid(ErrorCode::UnexpectedToken)],
                sub => vec![Stmt::Call(self.frame_for_value(sub)?)],
            };

            dispatch = vec![Stmt::If {
                cond: Expr::Cmp(
                    CmpOp::Eq,
                    Box::new(Expr::Count(c)),
                    Box::new(Expr::Size(i as u64)),
                ),
                then: action,
                els: dispatch,
            }];
        }

        let mut per_item = vec![Stmt::Untoken];
        per_item.extend(dispatch);
        if let Some(c) = counter {
            per_item.push(Stmt::Incr(c));
        }

        let mut stmts = vec![Stmt::Loop {
            label: "arr",
            body: vec![
                Stmt::Token,
                Stmt::If {
                    cond: Expr::IsTok(TokenKind::ArrayEnd),
                    then: vec![Stmt::Break { label: "arr" }],
                    els: per_item,
                },
            ],
        }];

        let mut checks = Vec::new();
        if let (Some(c), Some((min, max, has_max))) = (counter, count) {
            if min > 0 {
                checks.push((
                    Expr::Cmp(CmpOp::Ge, Box::new(Expr::Count(c)), Box::new(Expr::Size(min))),
                    ErrorCode::LengthTooShort,
                ));
            }
            if has_max {
                checks.push((
                    Expr::Cmp(CmpOp::Le, Box::new(Expr::Count(c)), Box::new(Expr::Size(max))),
                    ErrorCode::LengthTooLong,
                ));
            }
        }

        stmts.extend(fold_checks(checks));
        Ok(stmts)
    }

    // ---- splits ----

    fn split_stmts(
        &mut self,
        fr: &mut Frame,
        kind: TokenKind,
        node: &Cnode,
    ) -> Result<Vec<Stmt>, CompileError> {
        match node {
            Cnode::Or(children) => self.count_split(fr, kind, children, CmpOp::Ge, 1),
            Cnode::Xor(children) => self.count_split(fr, kind, children, CmpOp::Eq, 1),
            Cnode::Not(child) => {
                self.count_split(fr, kind, std::slice::from_ref(child.as_ref()), CmpOp::Eq, 0)
            }

            Cnode::And(children) => {
                let ncontrol = children.iter().filter(|c| c.is_control()).count();
                if ncontrol >= 2 {
                    return self.vector_split(fr, kind, children);
                }

                // one control child: fuse the simple siblings into a
                // single frame and require every branch to accept
                let mut branches = Vec::new();
                let simples: Vec<Cnode> = children
                    .iter()
                    .filter(|c| !c.is_control())
                    .cloned()
                    .collect();
                if !simples.is_empty() {
                    let fused = if simples.len() == 1 {
                        simples.into_iter().next().expect("len checked")
                    } else {
                        Cnode::And(simples)
                    };
                    branches.push(fused);
                }
                if let Some(ctrl) = children.iter().find(|c| c.is_control()) {
                    branches.push(ctrl.clone());
                }

                let n = branches.len();
                self.count_split(fr, kind, &branches, CmpOp::Eq, n as u64)
            }

            _ => Err(CompileError::Internal("split on a non-control node")),
        }
    }

    fn count_split(
        &mut self,
        fr: &mut Frame,
        kind: TokenKind,
        children: &[Cnode],
        op: CmpOp,
        n: u64,
    ) -> Result<Vec<Stmt>, CompileError> {
        let mut frames = Vec::with_capacity(children.len());
        for child in children {
            frames.push(self.frame_for_slot(kind, child)?);
        }

        fr.splits.push(frames);
        let split = SplitListId(fr.splits.len() - 1);

        Ok(vec![Stmt::If {
            cond: Expr::Cmp(op, Box::new(Expr::Split(split)), Box::new(Expr::Size(n))),
            then: vec![Stmt::Valid],
            els: vec![Stmt::Invalid(ErrorCode::SplitCondition)],
        }])
    }

    // Mixed boolean tree: one SPLITVEC over the flattened leaves, then a
    // boolean condition over the result bits.
    fn vector_split(
        &mut self,
        fr: &mut Frame,
        kind: TokenKind,
        children: &[Cnode],
    ) -> Result<Vec<Stmt>, CompileError> {
        let mut leaves = Vec::new();
        let gexprs = children
            .iter()
            .map(|c| gather_leaves(c, &mut leaves))
            .collect::<Vec<_>>();

        if leaves.len() > 64 {
            return Err(CompileError::BitvecTooWide {
                nbits: leaves.len(),
            });
        }

        let mut frames = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            frames.push(self.frame_for_slot(kind, leaf)?);
        }

        fr.splits.push(frames);
        let split = SplitListId(fr.splits.len() - 1);

        fr.bitvecs.push(Bitvec {
            label: "splits",
            nbits: leaves.len(),
        });
        let bitvec = BitvecId(fr.bitvecs.len() - 1);

        let cond = Expr::And(gexprs.iter().map(|g| g.to_expr(bitvec)).collect());

        Ok(vec![
            Stmt::SplitVec { bitvec, split },
            Stmt::If {
                cond,
                then: vec![Stmt::Valid],
                els: vec![Stmt::Invalid(ErrorCode::SplitCondition)],
            },
        ])
    }
}

// Whether a control node needs split evaluation: OR/XOR/NOT always, AND
// only when it mixes in further control nodes.
fn requires_split(node: &Cnode) -> bool {
    match node {
        Cnode::Or(_) | Cnode::Xor(_) | Cnode::Not(_) => true,
        Cnode::And(children) => children.iter().any(Cnode::is_control),
        _ => false,
    }
}

// Boolean structure over split leaves, with leaf indices doubling as
// result-bit indices.
enum GExpr {
    Leaf(usize),
    All(Vec<GExpr>),
    Any(Vec<GExpr>),
    Not(Box<GExpr>),
}

fn gather_leaves<'c>(node: &'c Cnode, leaves: &mut Vec<&'c Cnode>) -> GExpr {
    match node {
        Cnode::And(children) => {
            GExpr::All(children.iter().map(|c| gather_leaves(c, leaves)).collect())
        }
        Cnode::Or(children) => {
            GExpr::Any(children.iter().map(|c| gather_leaves(c, leaves)).collect())
        }
        Cnode::Not(child) => GExpr::Not(Box::new(gather_leaves(child, leaves))),
        // XOR branches keep their own split frame
        leaf => {
            leaves.push(leaf);
            GExpr::Leaf(leaves.len() - 1)
        }
    }
}

impl GExpr {
    fn leaf_range(args: &[GExpr]) -> Option<(usize, usize)> {
        let mut bits = args.iter().map(|g| match g {
            GExpr::Leaf(i) => Some(*i),
            _ => None,
        });

        let first = bits.next()??;
        let mut last = first;
        for bit in bits {
            let bit = bit?;
            if bit != last + 1 {
                return None;
            }
            last = bit;
        }

        Some((first, last))
    }

    fn to_expr(&self, bitvec: BitvecId) -> Expr {
        let bit = |b0: usize, b1: usize, mode: BTestMode| Expr::BTest {
            bitvec,
            b0,
            b1,
            mode,
        };

        match self {
            GExpr::Leaf(i) => bit(*i, *i, BTestMode::Bit),
            GExpr::All(args) => match Self::leaf_range(args) {
                Some((b0, b1)) => bit(b0, b1, BTestMode::All),
                None => Expr::And(args.iter().map(|g| g.to_expr(bitvec)).collect()),
            },
            GExpr::Any(args) => match Self::leaf_range(args) {
                Some((b0, b1)) => bit(b0, b1, BTestMode::Any),
                None => Expr::Or(args.iter().map(|g| g.to_expr(bitvec)).collect()),
            },
            GExpr::Not(arg) => Expr::Not(Box::new(arg.to_expr(bitvec))),
        }
    }
}

// ---- scalar constraint chains ----

fn number_chain(node: &Cnode, then: Vec<Stmt>) -> Result<Vec<Stmt>, CompileError> {
    match node {
        Cnode::NumInteger => Ok(vec![Stmt::If {
            cond: Expr::IsInt(Box::new(Expr::TokNum)),
            then,
            els: vec![Stmt::Invalid(ErrorCode::NotInteger)],
        }]),

        Cnode::NumRange(range) => Ok(vec![Stmt::If {
            cond: range_cond(range),
            then,
            els: vec![Stmt::Invalid(ErrorCode::Number)],
        }]),

        Cnode::NumMultipleOf(divisor) => Ok(vec![Stmt::If {
            cond: Expr::IsMult(Box::new(Expr::TokNum), *divisor),
            then,
            els: vec![Stmt::Invalid(ErrorCode::Number)],
        }]),

        Cnode::And(children) => {
            let mut acc = then;
            for child in children.iter().rev() {
                acc = number_chain(child, acc)?;
            }
            Ok(acc)
        }

        _ => Err(CompileError::Internal("unexpected constraint on a number")),
    }
}

fn range_cond(range: &NumRange) -> Expr {
    let mut parts = Vec::new();

    if range.flags.contains(RangeFlags::MIN) {
        let op = if range.flags.contains(RangeFlags::EXCL_MIN) {
            CmpOp::Gt
        } else {
            CmpOp::Ge
        };
        parts.push(Expr::Cmp(
            op,
            Box::new(Expr::TokNum),
            Box::new(Expr::Num(range.min)),
        ));
    }

    if range.flags.contains(RangeFlags::MAX) {
        let op = if range.flags.contains(RangeFlags::EXCL_MAX) {
            CmpOp::Lt
        } else {
            CmpOp::Le
        };
        parts.push(Expr::Cmp(
            op,
            Box::new(Expr::TokNum),
            Box::new(Expr::Num(range.max)),
        ));
    }

    match parts.len() {
        1 => parts.pop().expect("len checked"),
        _ => Expr::And(parts),
    }
}

fn string_chain(fr: &mut Frame, node: &Cnode, then: Vec<Stmt>) -> Result<Vec<Stmt>, CompileError> {
    match node {
        Cnode::StrLenRange { min, max, has_max } => {
            let mut acc = then;
            if *has_max {
                acc = vec![Stmt::If {
                    cond: Expr::Cmp(
                        CmpOp::Le,
                        Box::new(Expr::TokLen),
                        Box::new(Expr::Size(*max)),
                    ),
                    then: acc,
                    els: vec![Stmt::Invalid(ErrorCode::LengthTooLong)],
                }];
            }
            if *min > 0 {
                acc = vec![Stmt::If {
                    cond: Expr::Cmp(
                        CmpOp::Ge,
                        Box::new(Expr::TokLen),
                        Box::new(Expr::Size(*min)),
                    ),
                    then: acc,
                    els: vec![Stmt::Invalid(ErrorCode::LengthTooShort)],
                }];
            }
            Ok(acc)
        }

        Cnode::StrMatch(matcher) => {
            fr.matchers.push(matcher.dfa.clone());
            let mid = MatcherId(fr.matchers.len() - 1);

            Ok(vec![
                Stmt::MatchRun(mid),
                Stmt::If {
                    cond: Expr::Cmp(
                        CmpOp::Eq,
                        Box::new(Expr::MatchResult),
                        Box::new(Expr::Size(1)),
                    ),
                    then,
                    els: vec![Stmt::Invalid(ErrorCode::InvalidString)],
                },
            ])
        }

        Cnode::And(children) => {
            let mut acc = then;
            for child in children.iter().rev() {
                acc = string_chain(fr, child, acc)?;
            }
            Ok(acc)
        }

        _ => Err(CompileError::Internal("unexpected constraint on a string")),
    }
}

// Folds (condition, error) pairs into nested IFs ending in VALID.
fn fold_checks(checks: Vec<(Expr, ErrorCode)>) -> Vec<Stmt> {
    let mut tail = vec![Stmt::Valid];
    for (cond, code) in checks.into_iter().rev() {
        tail = vec![Stmt::If {
            cond,
            then: tail,
            els: vec![Stmt::Invalid(code)],
        }];
    }
    tail
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnode::{canonify, from_schema, simplify};
    use crate::schema::Schema;
    use serde_json::json;

    fn ir_for(doc: serde_json::Value) -> ProgramIr {
        let schema = Schema::from_value(&doc).unwrap();
        let node = canonify(simplify(from_schema(&schema).unwrap())).unwrap();
        translate(&node).unwrap()
    }

    #[test]
    fn empty_schema_is_one_consuming_frame() {
        let ir = ir_for(json!({}));
        assert_eq!(ir.frames.len(), 1);
        assert_eq!(
            ir.frames[0].body,
            vec![Stmt::Token, Stmt::Consume, Stmt::Valid]
        );
    }

    #[test]
    fn integer_type_checks_the_number_register() {
        let ir = ir_for(json!({"type": "integer"}));
        assert_eq!(ir.frames.len(), 1);

        // TOKEN, then a single dispatch on the number kind
        let body = &ir.frames[0].body;
        assert_eq!(body[0], Stmt::Token);
        match &body[1] {
            Stmt::If { cond, .. } => assert_eq!(*cond, Expr::IsTok(TokenKind::Number)),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn properties_build_an_object_loop_with_subframes() {
        let ir = ir_for(json!({
            "properties": {"foo": {"type": "number"}, "bar": {"type": "string"}}
        }));

        // entry frame plus one frame per property validator
        assert_eq!(ir.frames.len(), 3);
        assert_eq!(ir.frames[0].matchers.len(), 1);
        assert!(matches!(ir.frames[0].body[1], Stmt::If { .. }));
    }

    #[test]
    fn anyof_builds_a_split_list() {
        let ir = ir_for(json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}));

        assert_eq!(ir.frames.len(), 3);
        assert_eq!(ir.frames[0].splits.len(), 1);
        assert_eq!(
            ir.frames[0].splits[0],
            vec![FrameId(1), FrameId(2)]
        );

        // each split branch frame revalidates the same number token
        assert_eq!(ir.frames[1].body[0], Stmt::Token);
    }

    #[test]
    fn mixed_boolean_trees_use_splitvec() {
        // allOf with two control children forces the vector form
        let ir = ir_for(json!({
            "allOf": [
                {"anyOf": [{"type": "integer"}, {"minimum": 2.0}]},
                {"not": {"multipleOf": 3.0}},
            ]
        }));

        let entry = &ir.frames[0];
        let has_splitvec = entry_has_splitvec(&entry.body);
        assert!(has_splitvec, "expected a SPLITVEC in {:#?}", entry.body);
    }

    fn entry_has_splitvec(stmts: &[Stmt]) -> bool {
        stmts.iter().any(|s| match s {
            Stmt::SplitVec { .. } => true,
            Stmt::If { then, els, .. } => entry_has_splitvec(then) || entry_has_splitvec(els),
            Stmt::Loop { body, .. } => entry_has_splitvec(body),
            _ => false,
        })
    }

    #[test]
    fn unique_items_is_rejected() {
        let schema = Schema::from_value(&json!({"uniqueItems": true})).unwrap();
        let node = canonify(from_schema(&schema).unwrap()).unwrap();
        assert_eq!(
            translate(&node),
            Err(CompileError::Unsupported("uniqueItems"))
        );
    }

    #[test]
    fn dependencies_check_bit_implications() {
        let ir = ir_for(json!({"dependencies": {"bar": ["foo"]}}));
        let entry = &ir.frames[0];

        assert_eq!(entry.bitvecs.len(), 1);
        assert_eq!(entry.bitvecs[0].nbits, 2);
    }
}
