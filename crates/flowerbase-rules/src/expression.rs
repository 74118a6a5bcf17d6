//! Permission expression evaluation

use bson::{Bson, Document};
use tracing::debug;

use flowerbase_common::error::{Error, Result};
use flowerbase_functions::{FunctionCaller, FunctionContext};

use crate::expand::expand_query;
use crate::model::{PermissionExpression, ValidationParams};
use crate::rule::{check_rule, RuleOptions};
use crate::value::truthy;

const FUNCTION_TRUE: &str = "%%true";
const FUNCTION_FALSE: &str = "%%false";

/// Evaluate one permission expression for the params' cursor
///
/// A missing expression is false and a boolean is itself. A condition is
/// expanded with the params' expansions plus `%%true`; if it then holds a
/// function reference the named function decides, otherwise the condition is
/// checked against the substitutions themselves, so document fields are
/// reached through `%%root.<field>`.
pub async fn evaluate_expression(
    params: &ValidationParams<'_>,
    expression: Option<&PermissionExpression>,
    user: &Document,
    functions: &dyn FunctionCaller,
) -> Result<bool> {
    let condition = match expression {
        None => return Ok(false),
        Some(PermissionExpression::Bool(value)) => return Ok(*value),
        Some(PermissionExpression::Condition(condition)) => condition,
    };

    let mut substitutions = params.expansions.clone();
    substitutions.insert(FUNCTION_TRUE, true);
    let expanded = expand_query(condition, &substitutions);

    if let Some((reference, expected)) = function_reference(&expanded) {
        let name = function_name(reference)?;
        let result = functions
            .call_function(
                name,
                vec![Bson::Document(params.cursor.clone())],
                FunctionContext::for_user(user),
            )
            .await?;
        let passed = truthy(Some(&result));
        debug!(function = name, passed, "Function permission evaluated");
        return Ok(if expected { passed } else { !passed });
    }

    check_rule(&expanded, &substitutions, &RuleOptions::default())
}

/// Evaluate expressions in order, stopping at the first that passes
///
/// Evaluation is sequential so function-backed expressions after a passing
/// one never run.
pub async fn some_expression(
    params: &ValidationParams<'_>,
    expressions: &[Option<&PermissionExpression>],
    user: &Document,
    functions: &dyn FunctionCaller,
) -> Result<bool> {
    for expression in expressions {
        if evaluate_expression(params, *expression, user, functions).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn function_reference(condition: &Document) -> Option<(&Bson, bool)> {
    if let Some(reference) = condition.get(FUNCTION_TRUE) {
        return Some((reference, true));
    }
    condition.get(FUNCTION_FALSE).map(|reference| (reference, false))
}

/// Name from `{"%function": {"name": ...}}`
pub(crate) fn function_name(reference: &Bson) -> Result<&str> {
    reference
        .as_document()
        .and_then(|r| r.get_document("%function").ok())
        .and_then(|f| f.get_str("name").ok())
        .ok_or_else(|| {
            Error::InvalidRule(format!("malformed function reference {reference}"))
        })
}
