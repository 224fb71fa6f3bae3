//! Constraint trees.
//!
//! A [`Cnode`] is the canonicalisable algebraic form of every schema
//! keyword. Lowering from the AST is direct: each keyword group emits a
//! constraint under a per-token-kind switch and combinators map onto the
//! boolean control nodes. [`simplify`] and [`canonify`] then rewrite the
//! tree into the canonical form consumed by the IR translator.

mod canonify;
mod simplify;

pub use canonify::canonify;
pub use simplify::simplify;

use std::collections::BTreeSet;

use weir_asm::{Dfa, TokenKind};

use crate::error::CompileError;
use crate::matcher::{literal_pattern, PropPattern, StrMatcher};
use crate::schema::{Additional, Bound, Items, Schema, Types};

/// Number of per-token-kind slots in a switch.
pub const NKINDS: usize = 9;

bitflags::bitflags! {
    /// Which bounds of a numeric range are present and whether they are
    /// exclusive.
    pub struct RangeFlags: u8 {
        /// A lower bound is present.
        const MIN      = 1 << 0;
        /// An upper bound is present.
        const MAX      = 1 << 1;
        /// The lower bound excludes its value.
        const EXCL_MIN = 1 << 2;
        /// The upper bound excludes its value.
        const EXCL_MAX = 1 << 3;
    }
}

/// A numeric range constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct NumRange {
    /// Bound presence/exclusivity flags.
    pub flags: RangeFlags,
    /// Lower bound; meaningful when `MIN` is set.
    pub min: f64,
    /// Upper bound; meaningful when `MAX` is set.
    pub max: f64,
}

/// One case of a canonical property-match switch.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    /// Case id reported by the DFA; ids start at 1.
    pub which: u32,
    /// The patterns whose intersection this case represents.
    pub matchset: Vec<PropPattern>,
    /// Constraint applied to the property value (with any required-bit
    /// markers).
    pub constraint: Cnode,
}

/// A canonical property matcher: one DFA over property names dispatching
/// to per-matchset cases.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSwitch {
    /// Union DFA over every property pattern and required/dependency name.
    pub dfa: Dfa,
    /// Cases, ordered by case id.
    pub cases: Vec<MatchCase>,
    /// Constraint applied when the DFA rejects a name.
    pub default: Box<Cnode>,
}

/// A constraint tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Cnode {
    /// Accepts every instance.
    Valid,
    /// Rejects every instance.
    Invalid,

    /// Conjunction.
    And(Vec<Cnode>),
    /// Disjunction.
    Or(Vec<Cnode>),
    /// Exactly-one (from `oneOf`).
    Xor(Vec<Cnode>),
    /// Negation.
    Not(Box<Cnode>),

    /// Dispatch on the first token of a value, one slot per token kind.
    Switch(Box<[Cnode; NKINDS]>),

    /// Numeric range.
    NumRange(NumRange),
    /// The number must be integer-valued.
    NumInteger,
    /// The number must be a multiple of the (positive) divisor.
    NumMultipleOf(f64),

    /// The string must match a compiled pattern.
    StrMatch(StrMatcher),
    /// Byte-length range of a string.
    StrLenRange {
        /// Minimum length.
        min: u64,
        /// Maximum length; meaningful when `has_max`.
        max: u64,
        /// Whether a maximum is present.
        has_max: bool,
    },

    /// Element/property count range (arrays and objects).
    CountRange {
        /// Minimum count.
        min: u64,
        /// Maximum count; meaningful when `has_max`.
        max: u64,
        /// Whether a maximum is present.
        has_max: bool,
    },

    /// One property pattern and the constraint on its value.
    PropMatch(PropPattern, Box<Cnode>),
    /// A set of property matches (from `properties`/`patternProperties`).
    PropSet(Vec<Cnode>),
    /// Constraint on properties matched by no pattern
    /// (from `additionalProperties`).
    PropDefault(Box<Cnode>),
    /// Required property names.
    Required(BTreeSet<String>),
    /// Property dependencies: each key requires the listed names.
    Dependencies(Vec<(String, Vec<String>)>),

    /// Canonical required-property mask.
    ReqMask {
        /// Total bits tracked (required plus dependency names).
        nbits: usize,
        /// Leading bits that must all be set (the `required` names).
        nreq: usize,
    },
    /// Marker: seeing this property sets a mask bit.
    ReqBit {
        /// The bit index.
        bit: usize,
    },
    /// Canonical dependency clauses over mask bits: if the key bit is
    /// set, every listed bit must be set.
    DepMask {
        /// `(key bit, required bits)` clauses.
        clauses: Vec<(usize, Vec<usize>)>,
    },

    /// Positional item constraints (tuple `items`).
    ArrItem(Vec<Cnode>),
    /// Constraint on items past the positional prefix.
    ArrAdditional(Box<Cnode>),
    /// `uniqueItems` (representable; rejected by the translator).
    ArrUnique,

    /// Canonical property-match switch.
    MatchSwitch(Box<MatchSwitch>),
}

impl Cnode {
    /// Whether this node is a boolean control node.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Cnode::And(_) | Cnode::Or(_) | Cnode::Xor(_) | Cnode::Not(_)
        )
    }

    /// A switch whose value slots all hold `node`.
    ///
    /// The object-end and array-end slots are always invalid: no value
    /// starts with a closing delimiter.
    pub fn switch_filled(node: Cnode) -> Cnode {
        let mut slots: [Cnode; NKINDS] = std::array::from_fn(|_| node.clone());
        slots[TokenKind::ObjectEnd as usize] = Cnode::Invalid;
        slots[TokenKind::ArrayEnd as usize] = Cnode::Invalid;
        Cnode::Switch(Box::new(slots))
    }

    /// A switch constraining a single token kind, leaving the others
    /// unconstrained.
    pub fn switch_slot(kind: TokenKind, node: Cnode) -> Cnode {
        let mut slots: [Cnode; NKINDS] = std::array::from_fn(|_| Cnode::Valid);
        slots[TokenKind::ObjectEnd as usize] = Cnode::Invalid;
        slots[TokenKind::ArrayEnd as usize] = Cnode::Invalid;
        slots[kind as usize] = node;
        Cnode::Switch(Box::new(slots))
    }
}

/// Lower a schema into a raw (un-canonicalised) constraint tree.
pub fn from_schema(schema: &Schema) -> Result<Cnode, CompileError> {
    if schema.never {
        return Ok(Cnode::Invalid);
    }

    let mut parts = Vec::new();

    if let Some(types) = schema.types {
        parts.push(type_switch(types));
    }

    if let Some(node) = number_constraints(schema) {
        parts.push(Cnode::switch_slot(TokenKind::Number, node));
    }

    if let Some(node) = string_constraints(schema)? {
        parts.push(Cnode::switch_slot(TokenKind::String, node));
    }

    if let Some(node) = object_constraints(schema)? {
        parts.push(Cnode::switch_slot(TokenKind::ObjectBegin, node));
    }

    if let Some(node) = array_constraints(schema)? {
        parts.push(Cnode::switch_slot(TokenKind::ArrayBegin, node));
    }

    if !schema.all_of.is_empty() {
        parts.push(Cnode::And(lower_all(&schema.all_of)?));
    }
    if !schema.any_of.is_empty() {
        parts.push(Cnode::Or(lower_all(&schema.any_of)?));
    }
    if !schema.one_of.is_empty() {
        parts.push(Cnode::Xor(lower_all(&schema.one_of)?));
    }
    if let Some(not) = &schema.not {
        parts.push(Cnode::Not(Box::new(from_schema(not)?)));
    }

    Ok(match parts.len() {
        0 => Cnode::Valid,
        1 => parts.pop().expect("len checked"),
        _ => Cnode::And(parts),
    })
}

fn lower_all(schemas: &[Schema]) -> Result<Vec<Cnode>, CompileError> {
    schemas.iter().map(from_schema).collect()
}

fn type_switch(types: Types) -> Cnode {
    let mut slots: [Cnode; NKINDS] = std::array::from_fn(|_| Cnode::Invalid);

    if types.contains(Types::OBJECT) {
        slots[TokenKind::ObjectBegin as usize] = Cnode::Valid;
    }
    if types.contains(Types::ARRAY) {
        slots[TokenKind::ArrayBegin as usize] = Cnode::Valid;
    }
    if types.contains(Types::STRING) {
        slots[TokenKind::String as usize] = Cnode::Valid;
    }
    if types.contains(Types::NUMBER) {
        slots[TokenKind::Number as usize] = Cnode::Valid;
    } else if types.contains(Types::INTEGER) {
        slots[TokenKind::Number as usize] = Cnode::NumInteger;
    }
    if types.contains(Types::BOOLEAN) {
        slots[TokenKind::True as usize] = Cnode::Valid;
        slots[TokenKind::False as usize] = Cnode::Valid;
    }
    if types.contains(Types::NULL) {
        slots[TokenKind::Null as usize] = Cnode::Valid;
    }

    Cnode::Switch(Box::new(slots))
}

fn number_constraints(schema: &Schema) -> Option<Cnode> {
    let mut parts = Vec::new();

    if schema.minimum.is_some() || schema.maximum.is_some() {
        let mut flags = RangeFlags::empty();
        let mut min = 0.0;
        let mut max = 0.0;

        if let Some(Bound { value, exclusive }) = schema.minimum {
            flags |= RangeFlags::MIN;
            if exclusive {
                flags |= RangeFlags::EXCL_MIN;
            }
            min = value;
        }
        if let Some(Bound { value, exclusive }) = schema.maximum {
            flags |= RangeFlags::MAX;
            if exclusive {
                flags |= RangeFlags::EXCL_MAX;
            }
            max = value;
        }

        parts.push(Cnode::NumRange(NumRange { flags, min, max }));
    }

    if let Some(divisor) = schema.multiple_of {
        parts.push(Cnode::NumMultipleOf(divisor));
    }

    collect(parts)
}

fn string_constraints(schema: &Schema) -> Result<Option<Cnode>, CompileError> {
    let mut parts = Vec::new();

    if schema.min_length.is_some() || schema.max_length.is_some() {
        parts.push(Cnode::StrLenRange {
            min: schema.min_length.unwrap_or(0),
            max: schema.max_length.unwrap_or(0),
            has_max: schema.max_length.is_some(),
        });
    }

    if let Some(pattern) = &schema.pattern {
        parts.push(Cnode::StrMatch(StrMatcher::compile(pattern)?));
    }

    Ok(collect(parts))
}

fn object_constraints(schema: &Schema) -> Result<Option<Cnode>, CompileError> {
    let mut parts = Vec::new();

    let mut matches = Vec::new();
    for (name, sub) in &schema.properties {
        matches.push(Cnode::PropMatch(
            PropPattern::Exact(name.clone()),
            Box::new(from_schema(sub)?),
        ));
    }
    for (pattern, sub) in &schema.pattern_properties {
        // validate the pattern up front so errors surface at compile time
        literal_pattern(pattern)?;
        matches.push(Cnode::PropMatch(
            PropPattern::Contains(pattern.clone()),
            Box::new(from_schema(sub)?),
        ));
    }
    if !matches.is_empty() {
        parts.push(Cnode::PropSet(matches));
    }

    if let Some(additional) = &schema.additional_properties {
        let node = match additional {
            Additional::Allowed(true) => Cnode::Valid,
            Additional::Allowed(false) => Cnode::Invalid,
            Additional::Schema(sub) => from_schema(sub)?,
        };
        parts.push(Cnode::PropDefault(Box::new(node)));
    }

    if !schema.required.is_empty() {
        parts.push(Cnode::Required(
            schema.required.iter().cloned().collect(),
        ));
    }

    if !schema.dependencies.is_empty() {
        parts.push(Cnode::Dependencies(schema.dependencies.clone()));
    }

    if schema.min_properties.is_some() || schema.max_properties.is_some() {
        parts.push(Cnode::CountRange {
            min: schema.min_properties.unwrap_or(0),
            max: schema.max_properties.unwrap_or(0),
            has_max: schema.max_properties.is_some(),
        });
    }

    Ok(collect(parts))
}

fn array_constraints(schema: &Schema) -> Result<Option<Cnode>, CompileError> {
    let mut parts = Vec::new();

    match &schema.items {
        Some(Items::Uniform(sub)) => {
            parts.push(Cnode::ArrAdditional(Box::new(from_schema(sub)?)));
        }
        Some(Items::Tuple(subs)) => {
            let tuple = subs.iter().map(from_schema).collect::<Result<_, _>>()?;
            parts.push(Cnode::ArrItem(tuple));

            if let Some(additional) = &schema.additional_items {
                let node = match additional {
                    Additional::Allowed(true) => Cnode::Valid,
                    Additional::Allowed(false) => Cnode::Invalid,
                    Additional::Schema(sub) => from_schema(sub)?,
                };
                parts.push(Cnode::ArrAdditional(Box::new(node)));
            }
        }
        None => {}
    }

    if schema.min_items.is_some() || schema.max_items.is_some() {
        parts.push(Cnode::CountRange {
            min: schema.min_items.unwrap_or(0),
            max: schema.max_items.unwrap_or(0),
            has_max: schema.max_items.is_some(),
        });
    }

    if schema.unique_items {
        parts.push(Cnode::ArrUnique);
    }

    Ok(collect(parts))
}

fn collect(mut parts: Vec<Cnode>) -> Option<Cnode> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Cnode::And(parts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lower(doc: serde_json::Value) -> Cnode {
        from_schema(&Schema::from_value(&doc).unwrap()).unwrap()
    }

    #[test]
    fn empty_schema_lowers_to_valid() {
        assert_eq!(lower(json!({})), Cnode::Valid);
    }

    #[test]
    fn false_schema_lowers_to_invalid() {
        assert_eq!(lower(json!(false)), Cnode::Invalid);
    }

    #[test]
    fn integer_type_constrains_the_number_slot() {
        let node = lower(json!({"type": "integer"}));
        match node {
            Cnode::Switch(slots) => {
                assert_eq!(slots[TokenKind::Number as usize], Cnode::NumInteger);
                assert_eq!(slots[TokenKind::String as usize], Cnode::Invalid);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn minimum_leaves_other_kinds_unconstrained() {
        let node = lower(json!({"minimum": 1.5}));
        match node {
            Cnode::Switch(slots) => {
                assert!(matches!(
                    slots[TokenKind::Number as usize],
                    Cnode::NumRange(_)
                ));
                assert_eq!(slots[TokenKind::String as usize], Cnode::Valid);
                assert_eq!(slots[TokenKind::ObjectEnd as usize], Cnode::Invalid);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn combinators_map_to_control_nodes() {
        assert!(matches!(
            lower(json!({"anyOf": [{"type": "integer"}, {"minimum": 2.0}]})),
            Cnode::Or(_)
        ));
        assert!(matches!(
            lower(json!({"oneOf": [{"type": "integer"}, {"minimum": 2.0}]})),
            Cnode::Xor(_)
        ));
        assert!(matches!(lower(json!({"not": {}})), Cnode::Not(_)));
    }

    #[test]
    fn bad_patterns_fail_at_lowering() {
        let schema = Schema::from_value(&json!({"pattern": "a+b"})).unwrap();
        assert!(matches!(
            from_schema(&schema),
            Err(CompileError::BadRegexp { .. })
        ));
    }
}
