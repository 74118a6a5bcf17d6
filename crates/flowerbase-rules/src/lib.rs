//! Flowerbase Rule Engine
//!
//! Decides, per document and per operation, whether a user may read, write,
//! insert or delete it, and which fields survive redaction:
//! - Condition DSL over document paths ([`check_rule`])
//! - Token expansion for `%%user`-style templates ([`expand_query`])
//! - Row-level pre-filters ([`filter`])
//! - Role selection by `apply_when` ([`role`])
//! - Staged authorization state machine ([`AuthorizationStateMachine`])

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod expand;
pub mod expression;
pub mod filter;
pub mod loader;
pub mod machine;
pub mod model;
pub mod operators;
pub mod role;
pub mod rule;
pub mod value;

pub use expand::expand_query;
pub use expression::{evaluate_expression, some_expression};
pub use filter::{and_query, get_formatted_query, get_valid_rule};
pub use loader::{load_rules, validate_rules, RuleIssue};
pub use machine::{AuthorizationStateMachine, Outcome, Stage, Step, READ_PIPELINE, WRITE_PIPELINE};
pub use model::{
    CollectionRules, DocumentFilters, FieldPermission, Filter, PermissionExpression, Role,
    RulesMap, StepResult, ValidationParams,
};
pub use role::{check_apply_when, get_winning_role};
pub use rule::{check_rule, get_keys, RuleOptions};
