//! Property-name and string-pattern matchers.
//!
//! The compiler consumes a DFA interface: case-labelled automata whose
//! accepting states carry opaque identifiers that survive union. This
//! module builds those automata for the patterns expressible without a
//! regex engine: exact property names and escape-free literal patterns
//! (matched by containment, per the standard's unanchored `pattern`
//! semantics). Anything else is rejected with `BadRegexp`, which is the
//! seam where an external regexp-to-DFA engine would plug in.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use weir_asm::Dfa;

use crate::error::CompileError;

/// A property-name pattern, as carried by the constraint tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropPattern {
    /// Matches the property name exactly.
    Exact(String),
    /// Matches any property name containing the literal.
    Contains(String),
}

impl PropPattern {
    /// Bytes of the pattern literal.
    pub fn literal(&self) -> &[u8] {
        match self {
            PropPattern::Exact(s) | PropPattern::Contains(s) => s.as_bytes(),
        }
    }
}

/// A compiled string-pattern matcher for the `pattern` keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct StrMatcher {
    /// The pattern source text.
    pub source: String,
    /// Containment automaton; case `1` accepts.
    pub dfa: Dfa,
}

impl StrMatcher {
    /// Compile a `pattern` keyword value.
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let literal = literal_pattern(source)?;

        let mut b = MatchSetBuilder::new();
        b.add_contains(&literal);
        let dfa = b.determinize().to_dfa(|_| 1);

        Ok(StrMatcher {
            source: source.to_owned(),
            dfa,
        })
    }
}

/// Validate that a pattern is a plain literal and return its bytes.
///
/// Patterns using regex metacharacters need the external regex engine and
/// abort compilation.
pub fn literal_pattern(source: &str) -> Result<Vec<u8>, CompileError> {
    const META: &[u8] = br".^$*+?()[]{}|\";

    if source.bytes().any(|b| META.contains(&b)) {
        return Err(CompileError::BadRegexp {
            pattern: source.to_owned(),
        });
    }

    Ok(source.as_bytes().to_vec())
}

// One NFA state: explicit byte edges, an optional any-byte self-loop, and
// an optional accepted pattern id.
#[derive(Debug, Default, Clone)]
struct NState {
    edges: Vec<(u8, usize)>,
    dot: bool,
    accept: Option<u32>,
}

/// Builder that unions pattern automata while preserving per-pattern
/// identities through determinization.
#[derive(Debug, Default, Clone)]
pub struct MatchSetBuilder {
    states: Vec<NState>,
    starts: Vec<usize>,
    npat: u32,
}

impl MatchSetBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of patterns added so far.
    pub fn npatterns(&self) -> u32 {
        self.npat
    }

    fn new_state(&mut self) -> usize {
        self.states.push(NState::default());
        self.states.len() - 1
    }

    fn add_chain(&mut self, literal: &[u8], dot_ends: bool) -> u32 {
        let start = self.new_state();
        self.states[start].dot = dot_ends;
        self.starts.push(start);

        let mut at = start;
        for &b in literal {
            let next = self.new_state();
            self.states[at].edges.push((b, next));
            at = next;
        }

        let id = self.npat;
        self.npat += 1;
        self.states[at].accept = Some(id);
        self.states[at].dot |= dot_ends;

        id
    }

    /// Add an exact-name pattern; returns its pattern id.
    pub fn add_exact(&mut self, name: &[u8]) -> u32 {
        self.add_chain(name, false)
    }

    /// Add a containment pattern; returns its pattern id.
    pub fn add_contains(&mut self, needle: &[u8]) -> u32 {
        self.add_chain(needle, true)
    }

    /// Determinize the union of every added pattern.
    pub fn determinize(&self) -> RawDfa {
        let mut subsets: BTreeMap<BTreeSet<usize>, usize> = BTreeMap::new();
        let mut out: Vec<DState> = Vec::new();
        let mut queue = VecDeque::new();

        let start: BTreeSet<usize> = self.starts.iter().copied().collect();
        subsets.insert(start.clone(), 0);
        out.push(DState::default());
        queue.push_back(start);

        while let Some(subset) = queue.pop_front() {
            let id = subsets[&subset];

            let mut accepts = BTreeSet::new();
            let mut relevant = BTreeSet::new();
            for &s in &subset {
                if let Some(p) = self.states[s].accept {
                    accepts.insert(p);
                }
                for &(b, _) in &self.states[s].edges {
                    relevant.insert(b);
                }
            }

            // states with an any-byte self-loop survive every transition
            let floor: BTreeSet<usize> = subset
                .iter()
                .copied()
                .filter(|&s| self.states[s].dot)
                .collect();

            let mut edges = BTreeMap::new();
            for &b in &relevant {
                let mut next = floor.clone();
                for &s in &subset {
                    for &(eb, dest) in &self.states[s].edges {
                        if eb == b {
                            next.insert(dest);
                        }
                    }
                }

                let dest = Self::intern(&mut subsets, &mut out, &mut queue, next);
                edges.insert(b, dest);
            }

            let other = if floor.is_empty() {
                None
            } else {
                Some(Self::intern(&mut subsets, &mut out, &mut queue, floor))
            };

            out[id] = DState {
                edges,
                other,
                accepts,
            };
        }

        RawDfa { states: out }
    }

    fn intern(
        subsets: &mut BTreeMap<BTreeSet<usize>, usize>,
        out: &mut Vec<DState>,
        queue: &mut VecDeque<BTreeSet<usize>>,
        subset: BTreeSet<usize>,
    ) -> usize {
        if let Some(&id) = subsets.get(&subset) {
            return id;
        }

        let id = out.len();
        out.push(DState::default());
        subsets.insert(subset.clone(), id);
        queue.push_back(subset);
        id
    }
}

/// A determinized state before case assignment.
#[derive(Debug, Default, Clone)]
pub struct DState {
    /// Explicit byte transitions.
    pub edges: BTreeMap<u8, usize>,
    /// Transition taken on every byte without an explicit edge.
    pub other: Option<usize>,
    /// Pattern ids accepted in this state.
    pub accepts: BTreeSet<u32>,
}

/// A determinized automaton whose accepting states carry pattern-id sets.
#[derive(Debug, Clone)]
pub struct RawDfa {
    /// States; index 0 is the start state.
    pub states: Vec<DState>,
}

impl RawDfa {
    /// Distinct non-empty accept sets, in first-seen order.
    pub fn match_sets(&self) -> Vec<BTreeSet<u32>> {
        let mut seen = Vec::new();
        for st in &self.states {
            if !st.accepts.is_empty() && !seen.contains(&st.accepts) {
                seen.push(st.accepts.clone());
            }
        }
        seen
    }

    /// Encode into the VM's table form.
    ///
    /// `case_of` maps each non-empty accept set to its case id (non-zero);
    /// `other` transitions expand into explicit edges for every byte
    /// without one.
    pub fn to_dfa(&self, case_of: impl Fn(&BTreeSet<u32>) -> u32) -> Dfa {
        let mut offs = Vec::with_capacity(self.states.len() + 1);
        let mut transitions = Vec::new();
        let mut endstates = Vec::new();

        offs.push(0);
        for (i, st) in self.states.iter().enumerate() {
            let mut nedges = 0u32;
            for b in 0..=255u8 {
                let dest = st.edges.get(&b).copied().or(st.other);
                if let Some(dest) = dest {
                    transitions.push(b as u32);
                    transitions.push(dest as u32);
                    nedges += 1;
                }
            }

            offs.push(offs[i] + nedges);

            if !st.accepts.is_empty() {
                endstates.push(i as u32);
                endstates.push(case_of(&st.accepts));
            }
        }

        Dfa::from_parts(offs, transitions, endstates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_names_make_a_trie() {
        let mut b = MatchSetBuilder::new();
        let foo = b.add_exact(b"foo");
        let bar = b.add_exact(b"bar");

        let raw = b.determinize();
        let dfa = raw.to_dfa(|set| {
            if set.contains(&foo) {
                1
            } else {
                assert!(set.contains(&bar));
                2
            }
        });

        assert_eq!(dfa.run(b"foo"), Some(1));
        assert_eq!(dfa.run(b"bar"), Some(2));
        assert_eq!(dfa.run(b"foobar"), None);
        assert_eq!(dfa.run(b"fo"), None);
        assert_eq!(dfa.run(b"quux"), None);
    }

    #[test]
    fn containment_unions_with_exact_names() {
        let mut b = MatchSetBuilder::new();
        let foo = b.add_exact(b"foo");
        let oo = b.add_contains(b"oo");

        let raw = b.determinize();

        // "foo" is accepted by both patterns and must land in a merged set
        assert!(raw
            .match_sets()
            .iter()
            .any(|s| s.contains(&foo) && s.contains(&oo)));

        let dfa = raw.to_dfa(|set| if set.contains(&foo) { 1 } else { 2 });
        assert_eq!(dfa.run(b"foo"), Some(1));
        assert_eq!(dfa.run(b"xooy"), Some(2));
        assert_eq!(dfa.run(b"xy"), None);
    }

    #[test]
    fn pattern_literals_match_by_containment() {
        let m = StrMatcher::compile("abc").unwrap();
        assert_eq!(m.dfa.run(b"abc"), Some(1));
        assert_eq!(m.dfa.run(b"xxabcyy"), Some(1));
        assert_eq!(m.dfa.run(b"ab"), None);
        assert_eq!(m.dfa.run(b"acb"), None);
    }

    #[test]
    fn metacharacters_are_rejected() {
        assert!(matches!(
            StrMatcher::compile("^a.*b$"),
            Err(CompileError::BadRegexp { .. })
        ));
    }

    #[test]
    fn empty_needle_matches_everything() {
        let m = StrMatcher::compile("").unwrap();
        assert_eq!(m.dfa.run(b""), Some(1));
        assert_eq!(m.dfa.run(b"anything"), Some(1));
    }
}
