//! Positive/negative list matching
//!
//! Every Source and Operation field comes as a pair (`principals` and
//! `notPrincipals`, `ports` and `notPorts`, ...) and every Condition has
//! `values` and `notValues`. They all share one rule: the value must match a
//! positive entry when there are any, and must match no negative entry.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::glob::glob_match;

/// One entry of a positive or negative list
pub trait ValueMatcher<V: ?Sized> {
    /// Whether the entry matches `value`
    fn matches(&self, value: &V) -> bool;
}

/// Glob pattern
impl ValueMatcher<str> for String {
    fn matches(&self, value: &str) -> bool {
        glob_match(self, value)
    }
}

/// IP block: a CIDR, or a single address stored as a host-length prefix
impl ValueMatcher<IpAddr> for IpNet {
    fn matches(&self, value: &IpAddr) -> bool {
        self.contains(value)
    }
}

/// Check a single value against a positive and a negative list of patterns.
///
/// - With a non-empty `positive` list, the value must match one of them.
/// - With a non-empty `negative` list, the value must match none of them.
pub fn match_pair(positive: &[String], negative: &[String], value: &str) -> bool {
    pair_matches(positive, negative, value)
}

fn pair_matches<M, V>(positive: &[M], negative: &[M], value: &V) -> bool
where
    M: ValueMatcher<V>,
    V: ?Sized,
{
    (positive.is_empty() || positive.iter().any(|m| m.matches(value)))
        && !negative.iter().any(|m| m.matches(value))
}

/// A compiled positive/negative list pair
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PairMatcher<M> {
    positive: Vec<M>,
    negative: Vec<M>,
}

impl<M> PairMatcher<M> {
    /// Build from already-parsed entries
    pub fn new(positive: Vec<M>, negative: Vec<M>) -> Self {
        Self { positive, negative }
    }

    /// Parse both lists with `parse`, failing on the first bad entry
    pub fn parse<E>(
        positive: &[String],
        negative: &[String],
        parse: impl Fn(&str) -> Result<M, E>,
    ) -> Result<Self, E> {
        let positive = positive
            .iter()
            .map(|s| parse(s.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let negative = negative
            .iter()
            .map(|s| parse(s.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { positive, negative })
    }

    /// A pair with both lists empty matches everything
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    /// Match a single value
    pub fn matches<V: ?Sized>(&self, value: &V) -> bool
    where
        M: ValueMatcher<V>,
    {
        pair_matches(&self.positive, &self.negative, value)
    }

    /// Match an optional value. A missing value fails a non-empty positive
    /// list and passes any negative list.
    pub fn matches_opt<V: ?Sized>(&self, value: Option<&V>) -> bool
    where
        M: ValueMatcher<V>,
    {
        match value {
            Some(v) => self.matches(v),
            None => self.positive.is_empty(),
        }
    }

    /// Match a multi-valued attribute: some value must hit the positive list
    /// (when non-empty) and no value may hit the negative list
    pub fn matches_any<'v, V>(&self, values: &[&'v V]) -> bool
    where
        M: ValueMatcher<V>,
        V: ?Sized,
    {
        let positive_ok = self.positive.is_empty()
            || values
                .iter()
                .any(|v| self.positive.iter().any(|m| m.matches(v)));
        let negative_ok = !values
            .iter()
            .any(|v| self.negative.iter().any(|m| m.matches(v)));
        positive_ok && negative_ok
    }
}

impl PairMatcher<String> {
    /// Glob patterns, taken as-is
    pub fn globs(positive: &[String], negative: &[String]) -> Self {
        Self::new(positive.to_vec(), negative.to_vec())
    }
}
