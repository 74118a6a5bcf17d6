//! Row-level pre-filters

use bson::{Bson, Document};

use flowerbase_common::error::Result;

use crate::expand::expand_query;
use crate::model::Filter;
use crate::rule::{check_rule, RuleOptions};

fn substitutions(user: &Document) -> Document {
    bson::doc! {
        "%%user": user.clone(),
        "%%true": true,
    }
}

/// Filters whose `apply_when` matches the user and optional record
///
/// An empty `apply_when` always matches.
pub fn get_valid_rule<'a>(
    filters: &'a [Filter],
    user: &Document,
    record: Option<&Document>,
) -> Result<Vec<&'a Filter>> {
    let substitutions = substitutions(user);
    let mut data = record.cloned().unwrap_or_default();
    data.insert("%%user", user.clone());

    let mut valid = Vec::new();
    for filter in filters {
        if filter.apply_when.is_empty() {
            valid.push(filter);
            continue;
        }
        let condition = expand_query(&filter.apply_when, &substitutions);
        if check_rule(&condition, &data, &RuleOptions::default())? {
            valid.push(filter);
        }
    }
    Ok(valid)
}

/// Query parts to be combined with `$and`
///
/// Only the first applicable filter contributes; its expanded query comes
/// before the caller's query.
pub fn get_formatted_query(
    filters: &[Filter],
    query: &Document,
    user: &Document,
) -> Result<Vec<Document>> {
    let valid = get_valid_rule(filters, user, None)?;

    let mut parts = Vec::with_capacity(2);
    if let Some(filter_query) = valid.first().and_then(|f| f.query.as_ref()) {
        parts.push(expand_query(filter_query, &substitutions(user)));
    }
    parts.push(query.clone());
    Ok(parts)
}

/// Combine query parts, skipping the `$and` wrapper for a single part
pub fn and_query(mut parts: Vec<Document>) -> Document {
    if parts.len() == 1 {
        return parts.remove(0);
    }
    let mut combined = Document::new();
    combined.insert(
        "$and",
        Bson::Array(parts.into_iter().map(Bson::Document).collect()),
    );
    combined
}
