//! Algebraic simplification of constraint trees.
//!
//! Rewrites applied to a fixpoint: associative flattening of the control
//! nodes, identity and absorbing-element collapse, double-negation
//! removal, and reduction of all-valid switches. Simplification is
//! semantics-preserving and idempotent.

use super::{Cnode, NKINDS};
use weir_asm::TokenKind;

/// Simplify a constraint tree.
pub fn simplify(node: Cnode) -> Cnode {
    match node {
        Cnode::And(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                match simplify(child) {
                    Cnode::Valid => {}
                    Cnode::Invalid => return Cnode::Invalid,
                    Cnode::And(nested) => out.extend(nested),
                    other => out.push(other),
                }
            }

            match out.len() {
                0 => Cnode::Valid,
                1 => out.pop().expect("len checked"),
                _ => Cnode::And(out),
            }
        }

        Cnode::Or(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                match simplify(child) {
                    Cnode::Invalid => {}
                    Cnode::Valid => return Cnode::Valid,
                    Cnode::Or(nested) => out.extend(nested),
                    other => out.push(other),
                }
            }

            match out.len() {
                0 => Cnode::Invalid,
                1 => out.pop().expect("len checked"),
                _ => Cnode::Or(out),
            }
        }

        Cnode::Xor(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                match simplify(child) {
                    Cnode::Invalid => {}
                    Cnode::Xor(nested) => out.extend(nested),
                    other => out.push(other),
                }
            }

            // two always-accepting branches can never be exactly one
            if out.iter().filter(|c| **c == Cnode::Valid).count() >= 2 {
                return Cnode::Invalid;
            }

            match out.len() {
                0 => Cnode::Invalid,
                1 => out.pop().expect("len checked"),
                _ => Cnode::Xor(out),
            }
        }

        Cnode::Not(child) => match simplify(*child) {
            Cnode::Valid => Cnode::Invalid,
            Cnode::Invalid => Cnode::Valid,
            Cnode::Not(inner) => *inner,
            other => Cnode::Not(Box::new(other)),
        },

        Cnode::Switch(slots) => {
            let slots: [Cnode; NKINDS] = (*slots).map(simplify);

            // a switch that accepts every value-starting token is VALID
            let trivial = slots.iter().enumerate().all(|(i, slot)| {
                let kind = TokenKind::SWITCH[i];
                if kind.is_close() {
                    *slot == Cnode::Invalid
                } else {
                    *slot == Cnode::Valid
                }
            });
            if trivial {
                return Cnode::Valid;
            }

            // a switch that rejects every token is INVALID
            if slots.iter().all(|slot| *slot == Cnode::Invalid) {
                return Cnode::Invalid;
            }

            Cnode::Switch(Box::new(slots))
        }

        Cnode::PropMatch(pattern, child) => {
            Cnode::PropMatch(pattern, Box::new(simplify(*child)))
        }
        Cnode::PropSet(matches) => {
            Cnode::PropSet(matches.into_iter().map(simplify).collect())
        }
        Cnode::PropDefault(child) => Cnode::PropDefault(Box::new(simplify(*child))),

        Cnode::ArrItem(tuple) => Cnode::ArrItem(tuple.into_iter().map(simplify).collect()),
        Cnode::ArrAdditional(child) => Cnode::ArrAdditional(Box::new(simplify(*child))),

        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num() -> Cnode {
        Cnode::NumInteger
    }

    #[test]
    fn and_collapses_identities() {
        assert_eq!(
            simplify(Cnode::And(vec![Cnode::Valid, num(), Cnode::Valid])),
            num()
        );
        assert_eq!(
            simplify(Cnode::And(vec![num(), Cnode::Invalid])),
            Cnode::Invalid
        );
        assert_eq!(simplify(Cnode::And(vec![])), Cnode::Valid);
    }

    #[test]
    fn or_collapses_identities() {
        assert_eq!(
            simplify(Cnode::Or(vec![Cnode::Invalid, num()])),
            num()
        );
        assert_eq!(
            simplify(Cnode::Or(vec![num(), Cnode::Valid])),
            Cnode::Valid
        );
        assert_eq!(simplify(Cnode::Or(vec![])), Cnode::Invalid);
    }

    #[test]
    fn control_nodes_flatten() {
        let node = Cnode::And(vec![
            Cnode::And(vec![num(), Cnode::NumMultipleOf(2.0)]),
            Cnode::StrLenRange {
                min: 1,
                max: 0,
                has_max: false,
            },
        ]);
        match simplify(node) {
            Cnode::And(children) => {
                assert_eq!(children.len(), 3);
                assert!(children.iter().all(|c| !matches!(c, Cnode::And(_))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn double_negation_cancels() {
        assert_eq!(
            simplify(Cnode::Not(Box::new(Cnode::Not(Box::new(num()))))),
            num()
        );
        assert_eq!(simplify(Cnode::Not(Box::new(Cnode::Valid))), Cnode::Invalid);
    }

    #[test]
    fn all_valid_switch_reduces_to_valid() {
        assert_eq!(simplify(Cnode::switch_filled(Cnode::Valid)), Cnode::Valid);
    }

    #[test]
    fn simplify_is_idempotent() {
        let node = Cnode::And(vec![
            Cnode::Or(vec![Cnode::Invalid, num(), Cnode::Or(vec![num()])]),
            Cnode::Valid,
            Cnode::switch_filled(Cnode::Valid),
        ]);
        let once = simplify(node);
        assert_eq!(simplify(once.clone()), once);
    }
}
