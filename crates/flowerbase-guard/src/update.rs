//! Update operators as aggregation stages
//!
//! Running an update as a pipeline lets the guard compute the post-update
//! document with the database itself and validate that shape before the
//! real write is issued.

use bson::{doc, Bson, Document};

use flowerbase_common::error::{Error, Result};

/// Translate an update document (`$set`, `$inc`, ...) into pipeline stages
pub fn update_to_pipeline(update: &Document) -> Result<Vec<Document>> {
    if update.is_empty() {
        return Err(Error::DatabaseError(
            "update document must not be empty".to_string(),
        ));
    }

    let mut stages = Vec::with_capacity(update.len());
    for (operator, fields) in update {
        if !operator.starts_with('$') {
            return Err(Error::DatabaseError(
                "update document requires atomic operators".to_string(),
            ));
        }
        let Bson::Document(fields) = fields else {
            return Err(Error::DatabaseError(format!("{operator} expects a document")));
        };

        let stage = match operator.as_str() {
            "$set" => set_stage(fields, |_, value| doc! { "$literal": value.clone() }),
            "$unset" => {
                let paths: Vec<Bson> = fields.keys().map(|k| Bson::String(k.clone())).collect();
                doc! { "$unset": paths }
            }
            "$inc" => set_stage(fields, |path, amount| {
                doc! { "$add": [{ "$ifNull": [format!("${path}"), 0] }, amount.clone()] }
            }),
            "$push" => set_stage(fields, |path, value| {
                doc! { "$concatArrays": [current_array(path), appended(value)] }
            }),
            "$addToSet" => set_stage(fields, |path, value| {
                doc! { "$setUnion": [current_array(path), appended(value)] }
            }),
            "$pull" => set_stage(fields, |path, value| {
                doc! {
                    "$filter": {
                        "input": current_array(path),
                        "cond": { "$ne": ["$$this", { "$literal": value.clone() }] },
                    }
                }
            }),
            other => {
                return Err(Error::DatabaseError(format!(
                    "unsupported update operator {other}"
                )))
            }
        };
        stages.push(stage);
    }
    Ok(stages)
}

fn set_stage(fields: &Document, expression: impl Fn(&str, &Bson) -> Document) -> Document {
    let assignments: Document = fields
        .iter()
        .map(|(path, value)| (path.clone(), Bson::Document(expression(path, value))))
        .collect();
    doc! { "$set": assignments }
}

fn current_array(path: &str) -> Document {
    doc! { "$ifNull": [format!("${path}"), []] }
}

/// Items appended by `$push` / `$addToSet`, honouring `$each`
fn appended(value: &Bson) -> Bson {
    let items = match value {
        Bson::Document(modifier) => match modifier.get("$each") {
            Some(Bson::Array(each)) => each.clone(),
            _ => vec![value.clone()],
        },
        _ => vec![value.clone()],
    };
    Bson::Array(
        items
            .into_iter()
            .map(|item| Bson::Document(doc! { "$literal": item }))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::run_pipeline;

    fn apply(document: Document, update: Document) -> Document {
        let stages = update_to_pipeline(&update).unwrap();
        run_pipeline(vec![document], &stages).unwrap().remove(0)
    }

    #[test]
    fn test_set_keeps_literals() {
        let result = apply(
            doc! { "_id": 1, "a": 1 },
            doc! { "$set": { "a": "$b", "nested.x": { "$gt": 1 } } },
        );
        assert_eq!(
            result,
            doc! { "_id": 1, "a": "$b", "nested": { "x": { "$gt": 1 } } }
        );
    }

    #[test]
    fn test_unset_and_inc() {
        let result = apply(
            doc! { "_id": 1, "n": 2, "gone": true },
            doc! { "$unset": { "gone": "" }, "$inc": { "n": 3, "fresh": 1 } },
        );
        assert_eq!(result, doc! { "_id": 1, "n": 5, "fresh": 1 });
    }

    #[test]
    fn test_array_operators() {
        let result = apply(
            doc! { "tags": ["a", "b"], "list": [1, 2, 1] },
            doc! {
                "$push": { "tags": { "$each": ["c", "a"] }, "log": "x" },
            },
        );
        assert_eq!(
            result,
            doc! { "tags": ["a", "b", "c", "a"], "list": [1, 2, 1], "log": ["x"] }
        );

        let result = apply(
            doc! { "tags": ["a", "b"], "list": [1, 2, 1] },
            doc! { "$addToSet": { "tags": "b" }, "$pull": { "list": 1 } },
        );
        assert_eq!(result, doc! { "tags": ["a", "b"], "list": [2] });
    }

    #[test]
    fn test_rejects_replacement_and_unknown_operators() {
        assert!(update_to_pipeline(&doc! { "a": 1 }).is_err());
        assert!(update_to_pipeline(&doc! {}).is_err());
        let err = update_to_pipeline(&doc! { "$rename": { "a": "b" } }).unwrap_err();
        assert!(err.to_string().contains("$rename"));
    }
}
