//! Rule operators
//!
//! Every operator is a pure predicate over the actual value found at a path
//! and the expected value written in the rule.

use std::str::FromStr;

use bson::Bson;
use regex::RegexBuilder;

use flowerbase_common::error::{Error, Result};

use crate::value::{
    force_array, force_number, is_empty, js_string, js_string_length, parse_float, strict_eq,
};

/// Operators understood by the condition DSL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Exists,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    StrGt,
    StrGte,
    StrLt,
    StrLte,
    In,
    Nin,
    All,
    Regex,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::Exists,
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::StrGt,
        Operator::StrGte,
        Operator::StrLt,
        Operator::StrLte,
        Operator::In,
        Operator::Nin,
        Operator::All,
        Operator::Regex,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Exists => "$exists",
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::StrGt => "$strGt",
            Operator::StrGte => "$strGte",
            Operator::StrLt => "$strLt",
            Operator::StrLte => "$strLte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::All => "$all",
            Operator::Regex => "$regex",
        }
    }

    /// Evaluate the operator
    ///
    /// `actual` is `None` when the path is missing; `expected` is `None` when
    /// a `$ref:` pointed at a missing path. `options` carries regex flags.
    pub fn apply(
        self,
        actual: Option<&Bson>,
        expected: Option<&Bson>,
        options: Option<&Bson>,
    ) -> Result<bool> {
        let result = match self {
            Operator::Exists => match expected {
                Some(Bson::Boolean(wanted)) => !is_empty(actual) == *wanted,
                _ => false,
            },
            Operator::Eq => strict_eq(actual, expected),
            Operator::Ne => !strict_eq(actual, expected),
            Operator::Gt => force_number(actual) > parse_float(expected),
            Operator::Gte => force_number(actual) >= parse_float(expected),
            Operator::Lt => force_number(actual) < parse_float(expected),
            Operator::Lte => force_number(actual) <= parse_float(expected),
            Operator::StrGt => string_length(actual) > parse_float(expected),
            Operator::StrGte => string_length(actual) >= parse_float(expected),
            Operator::StrLt => string_length(actual) < parse_float(expected),
            Operator::StrLte => string_length(actual) <= parse_float(expected),
            Operator::In => intersects_any(actual, expected),
            Operator::Nin => !intersects_any(actual, expected),
            Operator::All => {
                let haystack = force_array(actual);
                force_array(expected)
                    .into_iter()
                    .all(|needle| haystack.iter().any(|h| strict_eq(Some(h), Some(needle))))
            }
            Operator::Regex => regex_matches(actual, expected, options)?,
        };
        Ok(result)
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::OperatorNotFound(s.to_string()))
    }
}

fn string_length(value: Option<&Bson>) -> f64 {
    js_string_length(value) as f64
}

fn intersects_any(actual: Option<&Bson>, expected: Option<&Bson>) -> bool {
    let haystack = force_array(actual);
    force_array(expected)
        .into_iter()
        .any(|needle| haystack.iter().any(|h| strict_eq(Some(h), Some(needle))))
}

fn regex_matches(
    actual: Option<&Bson>,
    expected: Option<&Bson>,
    options: Option<&Bson>,
) -> Result<bool> {
    let subject = js_string(actual);
    let default_flags = match options {
        Some(Bson::String(flags)) => flags.as_str(),
        _ => "",
    };

    for pattern in force_array(expected) {
        let (source, flags) = match pattern {
            Bson::RegularExpression(re) => (re.pattern.as_str(), re.options.as_str()),
            Bson::String(s) => (s.as_str(), default_flags),
            other => {
                return Err(Error::InvalidRegex(format!(
                    "unsupported pattern value {other}"
                )))
            }
        };

        let regex = RegexBuilder::new(source)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .ignore_whitespace(flags.contains('x'))
            .build()
            .map_err(|e| Error::InvalidRegex(e.to_string()))?;

        if regex.is_match(&subject) {
            return Ok(true);
        }
    }
    Ok(false)
}
