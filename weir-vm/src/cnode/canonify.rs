//! Canonicalisation of constraint trees.
//!
//! Canonify is an idempotent fixpoint over the simplified tree:
//!
//! - switches distribute outward through the control nodes, slot by slot,
//!   so at most one switch governs each value;
//! - the object property machinery (`PropSet`, `PropDefault`, `Required`,
//!   `Dependencies`) collapses into a single [`MatchSwitch`] whose DFA
//!   unions every pattern and name, plus a [`Cnode::ReqMask`] with
//!   [`Cnode::ReqBit`] markers injected into the relevant cases and
//!   [`Cnode::DepMask`] clauses for dependency implications.
//!
//! Canonification fails only where the matcher seam rejects a pattern or
//! a required-name mask outgrows a bitvector slot.

use std::collections::BTreeMap;

use weir_asm::TokenKind;

use super::simplify::simplify;
use super::{Cnode, MatchCase, MatchSwitch, NKINDS};
use crate::error::CompileError;
use crate::matcher::{MatchSetBuilder, PropPattern};

/// Canonicalise a full-value constraint.
///
/// The result is either a constant (`Valid`/`Invalid`) or a single
/// [`Cnode::Switch`] whose slots contain no further switches.
pub fn canonify(node: Cnode) -> Result<Cnode, CompileError> {
    let node = simplify(node);

    let mut slots = match distribute(node)? {
        Cnode::Switch(slots) => slots,
        constant => return Ok(constant),
    };

    for (i, slot) in slots.iter_mut().enumerate() {
        let kind = TokenKind::SWITCH[i];
        let taken = std::mem::replace(slot, Cnode::Valid);
        *slot = canonify_slot(kind, taken)?;
    }

    Ok(simplify(Cnode::Switch(slots)))
}

// Pushes every switch to the top, combining slot-wise through the control
// nodes. Closing-delimiter slots stay invalid regardless: no value starts
// with `}` or `]`.
fn distribute(node: Cnode) -> Result<Cnode, CompileError> {
    match node {
        Cnode::Switch(slots) => Ok(Cnode::Switch(slots)),
        Cnode::Valid => Ok(Cnode::switch_filled(Cnode::Valid)),
        Cnode::Invalid => Ok(Cnode::Switch(Box::new(std::array::from_fn(|_| {
            Cnode::Invalid
        })))),

        Cnode::And(children) => distribute_ctrl(children, Cnode::And),
        Cnode::Or(children) => distribute_ctrl(children, Cnode::Or),
        Cnode::Xor(children) => distribute_ctrl(children, Cnode::Xor),

        Cnode::Not(child) => {
            let slots = into_slots(distribute(*child)?)?;
            let mut out: [Cnode; NKINDS] =
                (*slots).map(|slot| simplify(Cnode::Not(Box::new(slot))));
            pin_closers(&mut out);
            Ok(Cnode::Switch(Box::new(out)))
        }

        other => {
            tracing::debug!(node = ?other, "distribute failed");
            Err(CompileError::Internal(
                "value-level constraint outside a type switch",
            ))
        }
    }
}

fn distribute_ctrl(
    children: Vec<Cnode>,
    ctor: fn(Vec<Cnode>) -> Cnode,
) -> Result<Cnode, CompileError> {
    let mut dist = Vec::with_capacity(children.len());
    for child in children {
        dist.push(into_slots(distribute(child)?)?);
    }

    let mut out: [Cnode; NKINDS] = std::array::from_fn(|k| {
        let slot = ctor(dist.iter().map(|slots| slots[k].clone()).collect());
        simplify(slot)
    });
    pin_closers(&mut out);

    Ok(Cnode::Switch(Box::new(out)))
}

fn into_slots(node: Cnode) -> Result<Box<[Cnode; NKINDS]>, CompileError> {
    match node {
        Cnode::Switch(slots) => Ok(slots),
        _ => Err(CompileError::Internal("expected a distributed switch")),
    }
}

fn pin_closers(slots: &mut [Cnode; NKINDS]) {
    slots[TokenKind::ObjectEnd as usize] = Cnode::Invalid;
    slots[TokenKind::ArrayEnd as usize] = Cnode::Invalid;
}

// Canonicalises one slot of the top-level switch. Object slots get their
// property machinery collapsed; array slots get their item validators
// canonified; control nodes recurse per branch.
fn canonify_slot(kind: TokenKind, node: Cnode) -> Result<Cnode, CompileError> {
    match node {
        Cnode::And(children) => {
            if kind == TokenKind::ObjectBegin
                && children.iter().any(is_object_machinery)
            {
                return build_object(children);
            }

            let out = children
                .into_iter()
                .map(|c| canonify_slot(kind, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(simplify(Cnode::And(out)))
        }

        Cnode::Or(children) => {
            let out = children
                .into_iter()
                .map(|c| canonify_slot(kind, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(simplify(Cnode::Or(out)))
        }

        Cnode::Xor(children) => {
            let out = children
                .into_iter()
                .map(|c| canonify_slot(kind, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(simplify(Cnode::Xor(out)))
        }

        Cnode::Not(child) => Ok(simplify(Cnode::Not(Box::new(canonify_slot(
            kind, *child,
        )?)))),

        node if is_object_machinery(&node) => build_object(vec![node]),

        Cnode::ArrItem(tuple) => {
            let out = tuple.into_iter().map(canonify).collect::<Result<_, _>>()?;
            Ok(Cnode::ArrItem(out))
        }
        Cnode::ArrAdditional(child) => {
            Ok(Cnode::ArrAdditional(Box::new(canonify(*child)?)))
        }

        other => Ok(other),
    }
}

fn is_object_machinery(node: &Cnode) -> bool {
    matches!(
        node,
        Cnode::PropSet(_) | Cnode::PropDefault(_) | Cnode::Required(_) | Cnode::Dependencies(_)
    )
}

// Which pattern id means what during match-set construction.
enum PidKind {
    // index into the collected property matches
    Prop(usize),
    // reqmask bit
    NameBit(usize),
}

// Collapses the object-slot machinery into MATCH_SWITCH + REQMASK +
// DEPMASK, keeping unrelated siblings (count ranges, control branches).
fn build_object(children: Vec<Cnode>) -> Result<Cnode, CompileError> {
    let mut matches: Vec<(PropPattern, Cnode)> = Vec::new();
    let mut default: Option<Cnode> = None;
    let mut required: Vec<String> = Vec::new();
    let mut deps: Vec<(String, Vec<String>)> = Vec::new();
    let mut keep: Vec<Cnode> = Vec::new();

    for child in children {
        match child {
            Cnode::PropSet(set) => {
                for m in set {
                    match m {
                        Cnode::PropMatch(pattern, constraint) => {
                            matches.push((pattern, *constraint))
                        }
                        _ => {
                            return Err(CompileError::Internal(
                                "property set holds a non-match node",
                            ))
                        }
                    }
                }
            }
            Cnode::PropDefault(node) => {
                default = Some(match default.take() {
                    None => *node,
                    Some(prev) => Cnode::And(vec![prev, *node]),
                });
            }
            Cnode::Required(names) => required.extend(names),
            Cnode::Dependencies(clauses) => deps.extend(clauses),
            ctrl if ctrl.is_control() => {
                keep.push(canonify_slot(TokenKind::ObjectBegin, ctrl)?)
            }
            other => keep.push(other),
        }
    }

    // union every pattern and tracked name into one DFA
    let mut builder = MatchSetBuilder::new();
    let mut pids: Vec<PidKind> = Vec::new();

    for (i, (pattern, _)) in matches.iter().enumerate() {
        match pattern {
            PropPattern::Exact(name) => builder.add_exact(name.as_bytes()),
            PropPattern::Contains(needle) => builder.add_contains(needle.as_bytes()),
        };
        pids.push(PidKind::Prop(i));
    }

    let mut bit_of: BTreeMap<String, usize> = BTreeMap::new();
    let mut bit_names: Vec<String> = Vec::new();

    fn intern_bit(bit_of: &mut BTreeMap<String, usize>, names: &mut Vec<String>, name: &str) {
        if !bit_of.contains_key(name) {
            bit_of.insert(name.to_owned(), names.len());
            names.push(name.to_owned());
        }
    }

    for name in &required {
        intern_bit(&mut bit_of, &mut bit_names, name);
    }
    let nreq = bit_names.len();

    for (key, requires) in &deps {
        intern_bit(&mut bit_of, &mut bit_names, key);
        for name in requires {
            intern_bit(&mut bit_of, &mut bit_names, name);
        }
    }
    let nbits = bit_names.len();

    if nbits > 64 {
        return Err(CompileError::BitvecTooWide { nbits });
    }

    for (bit, name) in bit_names.iter().enumerate() {
        builder.add_exact(name.as_bytes());
        pids.push(PidKind::NameBit(bit));
    }

    let raw = builder.determinize();
    let sets = raw.match_sets();

    let canon_default = match default {
        Some(node) => Some(canonify(node)?),
        None => None,
    };

    let mut cases = Vec::with_capacity(sets.len());
    for (i, set) in sets.iter().enumerate() {
        let mut bits = Vec::new();
        let mut values = Vec::new();
        let mut matchset = Vec::new();
        let mut has_prop = false;

        for &pid in set {
            match pids[pid as usize] {
                PidKind::Prop(m) => {
                    has_prop = true;
                    matchset.push(matches[m].0.clone());
                    values.push(matches[m].1.clone());
                }
                PidKind::NameBit(bit) => {
                    matchset.push(PropPattern::Exact(bit_names[bit].clone()));
                    bits.push(Cnode::ReqBit { bit });
                }
            }
        }

        // a tracked name matched by no property pattern is still an
        // additional property
        let value = if has_prop {
            Some(canonify(Cnode::And(values))?)
        } else {
            canon_default.clone()
        };

        let mut items = bits;
        items.extend(value);

        cases.push(MatchCase {
            which: (i + 1) as u32,
            matchset,
            constraint: simplify(Cnode::And(items)),
        });
    }

    let dfa = raw.to_dfa(|set| {
        let i = sets.iter().position(|s| s == set).expect("set was collected");
        (i + 1) as u32
    });

    let mswitch = Cnode::MatchSwitch(Box::new(MatchSwitch {
        dfa,
        cases,
        default: Box::new(canon_default.unwrap_or(Cnode::Valid)),
    }));

    let mut out = vec![mswitch];
    if nbits > 0 {
        out.push(Cnode::ReqMask { nbits, nreq });
    }
    if !deps.is_empty() {
        let clauses = deps
            .iter()
            .map(|(key, requires)| {
                let kbit = bit_of[key];
                let rbits = requires.iter().map(|r| bit_of[r]).collect();
                (kbit, rbits)
            })
            .collect();
        out.push(Cnode::DepMask { clauses });
    }
    out.extend(keep);

    Ok(simplify(Cnode::And(out)))
}

#[cfg(test)]
mod tests {
    use super::super::from_schema;
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    fn canonical(doc: serde_json::Value) -> Cnode {
        let schema = Schema::from_value(&doc).unwrap();
        canonify(from_schema(&schema).unwrap()).unwrap()
    }

    fn object_slot(node: &Cnode) -> &Cnode {
        match node {
            Cnode::Switch(slots) => &slots[TokenKind::ObjectBegin as usize],
            other => panic!("expected a switch, got {other:?}"),
        }
    }

    #[test]
    fn empty_schema_canonifies_to_valid() {
        assert_eq!(canonical(json!({})), Cnode::Valid);
    }

    #[test]
    fn switches_distribute_through_and() {
        // type + minimum both constrain the number slot of one switch
        let node = canonical(json!({"type": "integer", "minimum": 2.0}));
        match &node {
            Cnode::Switch(slots) => {
                match &slots[TokenKind::Number as usize] {
                    Cnode::And(parts) => assert_eq!(parts.len(), 2),
                    other => panic!("unexpected number slot {other:?}"),
                }
                assert_eq!(slots[TokenKind::String as usize], Cnode::Invalid);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn anyof_distributes_slotwise() {
        let node = canonical(json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}));
        match &node {
            Cnode::Switch(slots) => {
                // non-number kinds: OR(INVALID, VALID) collapses to VALID
                assert_eq!(slots[TokenKind::String as usize], Cnode::Valid);
                assert!(matches!(slots[TokenKind::Number as usize], Cnode::Or(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn properties_become_a_match_switch() {
        let node = canonical(json!({
            "properties": {"foo": {"type": "number"}, "bar": {"type": "string"}},
            "required": ["foo"],
        }));

        match object_slot(&node) {
            Cnode::And(parts) => {
                let ms = parts.iter().find_map(|p| match p {
                    Cnode::MatchSwitch(ms) => Some(ms),
                    _ => None,
                });
                let ms = ms.expect("match switch present");
                assert_eq!(ms.cases.len(), 2);
                assert_eq!(*ms.default, Cnode::Valid);

                // "foo" resolves to the case carrying its required bit
                let foo_case = ms.dfa.run(b"foo").expect("foo matches");
                let case = &ms.cases[foo_case as usize - 1];
                match &case.constraint {
                    Cnode::And(items) => {
                        assert!(items.iter().any(|i| matches!(i, Cnode::ReqBit { bit: 0 })))
                    }
                    other => panic!("unexpected case constraint {other:?}"),
                }

                assert!(parts
                    .iter()
                    .any(|p| matches!(p, Cnode::ReqMask { nbits: 1, nreq: 1 })));
            }
            other => panic!("unexpected object slot {other:?}"),
        }
    }

    #[test]
    fn dependencies_fold_into_the_mask() {
        let node = canonical(json!({"dependencies": {"bar": ["foo"]}}));

        match object_slot(&node) {
            Cnode::And(parts) => {
                assert!(parts
                    .iter()
                    .any(|p| matches!(p, Cnode::ReqMask { nbits: 2, nreq: 0 })));
                assert!(parts.iter().any(
                    |p| matches!(p, Cnode::DepMask { clauses } if clauses == &[(0, vec![1])])
                ));
            }
            other => panic!("unexpected object slot {other:?}"),
        }
    }

    #[test]
    fn closed_property_sets_reject_by_default() {
        let node = canonical(json!({
            "properties": {"foo": {}},
            "additionalProperties": false,
        }));

        match object_slot(&node) {
            Cnode::MatchSwitch(ms) => {
                assert_eq!(*ms.default, Cnode::Invalid);
            }
            Cnode::And(parts) => {
                let ms = parts
                    .iter()
                    .find_map(|p| match p {
                        Cnode::MatchSwitch(ms) => Some(ms),
                        _ => None,
                    })
                    .expect("match switch present");
                assert_eq!(*ms.default, Cnode::Invalid);
            }
            other => panic!("unexpected object slot {other:?}"),
        }
    }

    #[test]
    fn canonify_is_idempotent() {
        let docs = [
            json!({"type": "integer"}),
            json!({"properties": {"foo": {"type": "number"}}, "minProperties": 1}),
            json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]}),
            json!({"not": {"type": "string"}}),
            json!({"dependencies": {"bar": ["foo"]}}),
        ];

        for doc in docs {
            let once = canonical(doc);
            assert_eq!(canonify(once.clone()).unwrap(), once);
        }
    }
}
