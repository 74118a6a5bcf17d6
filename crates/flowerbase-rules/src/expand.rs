//! Template token substitution
//!
//! Rule and filter templates reference request context through tokens such
//! as `%%user` or `%%user.id`. Expansion replaces token *values*; keys are
//! left alone so they can still be resolved as paths at evaluation time.

use bson::{Bson, Document};

use crate::value::get_path;

const TOKEN_PREFIX: &str = "%%";

/// Replace token strings in `template` with values from `substitutions`
///
/// A string equal to a substitution key is replaced by that value. A string
/// of the form `%%head.path` is replaced by `path` looked up inside the
/// `%%head` substitution, or null when that path is missing. Other strings,
/// including `$ref:` references, are kept verbatim.
pub fn expand_query(template: &Document, substitutions: &Document) -> Document {
    template
        .iter()
        .map(|(key, value)| (key.clone(), expand_value(value, substitutions)))
        .collect()
}

fn expand_value(value: &Bson, substitutions: &Document) -> Bson {
    match value {
        Bson::Document(doc) => Bson::Document(expand_query(doc, substitutions)),
        Bson::Array(items) => Bson::Array(
            items
                .iter()
                .map(|item| expand_value(item, substitutions))
                .collect(),
        ),
        Bson::String(token) if token.starts_with(TOKEN_PREFIX) => {
            expand_token(token, substitutions).unwrap_or_else(|| value.clone())
        }
        other => other.clone(),
    }
}

fn expand_token(token: &str, substitutions: &Document) -> Option<Bson> {
    if let Some(value) = substitutions.get(token) {
        return Some(value.clone());
    }

    let (head, path) = token.split_once('.')?;
    let base = substitutions.get(head)?;
    let resolved = match base {
        Bson::Document(doc) => get_path(doc, path).cloned(),
        _ => None,
    };
    Some(resolved.unwrap_or(Bson::Null))
}
