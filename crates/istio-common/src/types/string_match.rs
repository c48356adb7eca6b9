//! StringMatch: the exact/prefix/suffix/regex one-of used by HTTP route matching

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Describes how to match a given string in HTTP headers, URIs and the like.
///
/// Match is case-sensitive. Exactly one variant is present on the wire:
///
/// ```yaml
/// uri:
///   prefix: /api/v1
/// ```
///
/// A document with zero or several of `exact`/`prefix`/`suffix`/`regex`
/// fails to deserialize.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StringMatch {
    /// Exact string match
    Exact(String),
    /// Prefix-based match
    Prefix(String),
    /// Suffix-based match
    Suffix(String),
    /// ECMAScript style regex-based match, applied to the whole value
    Regex(String),
}

impl StringMatch {
    /// Compile into a matcher, validating the regex if there is one
    pub fn compile(&self) -> Result<StringMatcher, Error> {
        Ok(match self {
            Self::Exact(s) => StringMatcher::Exact(s.clone()),
            Self::Prefix(s) => StringMatcher::Prefix(s.clone()),
            Self::Suffix(s) => StringMatcher::Suffix(s.clone()),
            Self::Regex(pattern) => {
                let anchored = format!("^(?:{})$", pattern);
                let re = Regex::new(&anchored).map_err(|e| {
                    Error::validation_field("regex", format!("invalid regex '{}': {}", pattern, e))
                })?;
                StringMatcher::Regex(re)
            }
        })
    }
}

/// A compiled [`StringMatch`]
#[derive(Clone, Debug)]
pub enum StringMatcher {
    /// Value must equal the string
    Exact(String),
    /// Value must start with the string
    Prefix(String),
    /// Value must end with the string
    Suffix(String),
    /// Value must match the whole regex
    Regex(Regex),
}

impl StringMatcher {
    /// Test a value against this matcher
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Exact(s) => value == s,
            Self::Prefix(s) => value.starts_with(s.as_str()),
            Self::Suffix(s) => value.ends_with(s.as_str()),
            Self::Regex(re) => re.is_match(value),
        }
    }
}
