//! Staged authorization state machine
//!
//! A validation runs an ordered list of stages. Each stage is a small graph
//! of named steps; every step returns an [`Outcome`] that either continues
//! inside the stage, ends the whole validation, or hands a resume point to
//! the next stage.

use std::fmt;

use bson::Document;
use tracing::debug;

use flowerbase_common::error::{Error, Result};
use flowerbase_common::types::ValidationType;
use flowerbase_functions::FunctionCaller;

use crate::expression::{evaluate_expression, some_expression};
use crate::model::{PermissionExpression, Role, StepResult, ValidationParams};

/// Named states of the pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Placeholder entry stage, always advances
    Noop,
    CheckDocumentFilters,
    /// Read pipeline: `read` (or `search`) grant
    CheckReadPermission,
    /// Read pipeline: `write` grant after a failed read
    CheckWritePermission,
    /// Write pipeline: delete vs. write branch
    CheckOperationType,
    CheckDeletePermission,
    /// Write pipeline: `write` grant
    CheckWriteOnly,
    CheckInsertPermission,
    CheckAdditionalFields,
    CheckIsValidFieldName,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Noop => "noop",
            Step::CheckDocumentFilters => "checkDocumentFilters",
            Step::CheckReadPermission => "checkReadPermission",
            Step::CheckWritePermission => "checkWritePermission",
            Step::CheckOperationType => "checkOperationType",
            Step::CheckDeletePermission => "checkDeletePermission",
            Step::CheckWriteOnly => "checkWriteOnly",
            Step::CheckInsertPermission => "checkInsertPermission",
            Step::CheckAdditionalFields => "checkAdditionalFields",
            Step::CheckIsValidFieldName => "checkIsValidFieldName",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage graph; the first state is the default entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub name: &'static str,
    pub states: &'static [Step],
}

impl Stage {
    fn entry(&self, initial_step: Option<Step>) -> Option<Step> {
        match initial_step {
            Some(step) if self.states.contains(&step) => Some(step),
            _ => self.states.first().copied(),
        }
    }
}

const STAGE_A: Stage = Stage {
    name: "A",
    states: &[Step::Noop],
};

const DOCUMENT_FILTERS: Stage = Stage {
    name: "documentFilters",
    states: &[Step::CheckDocumentFilters],
};

const FIELD_FILTERING: Stage = Stage {
    name: "fieldFiltering",
    states: &[Step::CheckAdditionalFields, Step::CheckIsValidFieldName],
};

/// Stages for `read` and `search`
pub const READ_PIPELINE: &[Stage] = &[
    STAGE_A,
    DOCUMENT_FILTERS,
    Stage {
        name: "readPermissions",
        states: &[Step::CheckReadPermission, Step::CheckWritePermission],
    },
    FIELD_FILTERING,
];

/// Stages for `write`, `insert` and `delete`
pub const WRITE_PIPELINE: &[Stage] = &[
    STAGE_A,
    DOCUMENT_FILTERS,
    Stage {
        name: "writePermissions",
        states: &[
            Step::CheckOperationType,
            Step::CheckDeletePermission,
            Step::CheckWriteOnly,
            Step::CheckInsertPermission,
        ],
    },
    FIELD_FILTERING,
];

/// Transition returned by every step
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Move to another state of the same stage, carrying a value along
    Continue { state: Step, carry: Option<bool> },
    /// End the whole validation
    Done {
        status: bool,
        document: Option<Document>,
    },
    /// Finish this stage without a verdict
    AdvanceStage { next_state: Option<Step> },
}

impl Outcome {
    fn next(state: Step) -> Self {
        Outcome::Continue { state, carry: None }
    }

    fn allow() -> Self {
        Outcome::Done {
            status: true,
            document: None,
        }
    }

    fn deny() -> Self {
        Outcome::Done {
            status: false,
            document: None,
        }
    }
}

/// Decides access to one document for one role
///
/// Instances hold no mutable state; a fresh one is built per validation.
pub struct AuthorizationStateMachine<'a> {
    role: &'a Role,
    params: ValidationParams<'a>,
    user: &'a Document,
    functions: &'a dyn FunctionCaller,
    enable_log: bool,
}

impl<'a> AuthorizationStateMachine<'a> {
    /// Create a new state machine
    pub fn new(
        role: &'a Role,
        params: ValidationParams<'a>,
        user: &'a Document,
        functions: &'a dyn FunctionCaller,
    ) -> Self {
        Self {
            role,
            params,
            user,
            functions,
            enable_log: false,
        }
    }

    /// Log every visited state at debug level
    pub fn with_log(mut self, enable: bool) -> Self {
        self.enable_log = enable;
        self
    }

    /// Stages for the params' validation type
    pub fn pipeline(&self) -> &'static [Stage] {
        if self.params.validation_type.is_read_like() {
            READ_PIPELINE
        } else {
            WRITE_PIPELINE
        }
    }

    /// Run stages in order until one reaches a verdict
    pub async fn run_validation(&self) -> Result<StepResult> {
        let mut initial_step = None;
        for stage in self.pipeline() {
            let result = self.run_machine(stage, initial_step).await?;
            if result.status.is_some() {
                return Ok(result);
            }
            initial_step = result.next_initial_step;
        }

        Ok(StepResult {
            status: None,
            document: None,
            next_initial_step: initial_step,
        })
    }

    /// Trampoline over one stage's states
    pub async fn run_machine(&self, stage: &Stage, initial_step: Option<Step>) -> Result<StepResult> {
        let mut state = stage
            .entry(initial_step)
            .ok_or_else(|| Error::InternalError(format!("stage {} has no states", stage.name)))?;
        let mut carry = None;

        // each state runs at most once per stage
        for _ in 0..stage.states.len() {
            self.log(stage, state);
            match self.step(state, carry).await? {
                Outcome::Continue {
                    state: next,
                    carry: next_carry,
                } => {
                    if !stage.states.contains(&next) {
                        return Err(Error::InternalError(format!(
                            "{next} is not a state of stage {}",
                            stage.name
                        )));
                    }
                    state = next;
                    carry = next_carry;
                }
                Outcome::Done { status, document } => {
                    let document = match (status, document) {
                        (true, None) => Some(self.params.cursor.clone()),
                        (_, document) => document,
                    };
                    return Ok(StepResult {
                        status: Some(status),
                        document,
                        next_initial_step: None,
                    });
                }
                Outcome::AdvanceStage { next_state } => {
                    return Ok(StepResult {
                        status: None,
                        document: None,
                        next_initial_step: next_state,
                    });
                }
            }
        }

        Err(Error::InternalError(format!(
            "stage {} did not terminate",
            stage.name
        )))
    }

    /// Evaluate a single state
    pub async fn step(&self, state: Step, carry: Option<bool>) -> Result<Outcome> {
        match state {
            Step::Noop => Ok(Outcome::AdvanceStage { next_state: None }),
            Step::CheckDocumentFilters => self.check_document_filters().await,
            Step::CheckReadPermission => self.check_read_permission().await,
            Step::CheckWritePermission => self.check_write_permission(carry).await,
            Step::CheckOperationType => Ok(self.check_operation_type()),
            Step::CheckDeletePermission => self.check_delete_permission().await,
            Step::CheckWriteOnly => self.check_write_only().await,
            Step::CheckInsertPermission => self.check_insert_permission().await,
            Step::CheckAdditionalFields => Ok(self.check_additional_fields()),
            Step::CheckIsValidFieldName => Ok(self.check_is_valid_field_name()),
        }
    }

    async fn evaluate(&self, expression: Option<&PermissionExpression>) -> Result<bool> {
        evaluate_expression(&self.params, expression, self.user, self.functions).await
    }

    /// Entry point of the field filtering stage
    fn field_filtering(&self) -> Outcome {
        let next_state = if self.role.fields.is_empty() {
            Step::CheckAdditionalFields
        } else {
            Step::CheckIsValidFieldName
        };
        Outcome::AdvanceStage {
            next_state: Some(next_state),
        }
    }

    async fn check_document_filters(&self) -> Result<Outcome> {
        let Some(filters) = &self.role.document_filters else {
            return Ok(Outcome::AdvanceStage { next_state: None });
        };

        let validation_type = self.params.validation_type;
        let mut candidates = Vec::with_capacity(2);
        if validation_type.is_read_like() {
            candidates.push(filters.read.as_ref());
        }
        if validation_type != ValidationType::Search {
            candidates.push(filters.write.as_ref());
        }

        if some_expression(&self.params, &candidates, self.user, self.functions).await? {
            Ok(Outcome::AdvanceStage { next_state: None })
        } else {
            Ok(Outcome::deny())
        }
    }

    async fn check_read_permission(&self) -> Result<Outcome> {
        let expression = match self.params.validation_type {
            ValidationType::Search => self.role.search.as_ref(),
            _ => self.role.read.as_ref(),
        };

        if self.evaluate(expression).await? {
            return Ok(Outcome::allow());
        }
        Ok(Outcome::Continue {
            state: Step::CheckWritePermission,
            carry: expression.map(|_| false),
        })
    }

    async fn check_write_permission(&self, read: Option<bool>) -> Result<Outcome> {
        if self.evaluate(self.role.write.as_ref()).await? {
            return Ok(Outcome::allow());
        }
        if read == Some(false) {
            return Ok(Outcome::deny());
        }
        Ok(self.field_filtering())
    }

    fn check_operation_type(&self) -> Outcome {
        if self.params.validation_type == ValidationType::Delete {
            Outcome::next(Step::CheckDeletePermission)
        } else {
            Outcome::next(Step::CheckWriteOnly)
        }
    }

    async fn check_delete_permission(&self) -> Result<Outcome> {
        let status = self.evaluate(self.role.delete.as_ref()).await?;
        Ok(Outcome::Done {
            status,
            document: None,
        })
    }

    async fn check_write_only(&self) -> Result<Outcome> {
        let Some(write) = self.role.write.as_ref() else {
            return Ok(self.field_filtering());
        };

        if !self.evaluate(Some(write)).await? {
            return Ok(Outcome::deny());
        }
        if self.params.validation_type == ValidationType::Insert {
            return Ok(Outcome::next(Step::CheckInsertPermission));
        }
        Ok(Outcome::allow())
    }

    async fn check_insert_permission(&self) -> Result<Outcome> {
        if self.evaluate(self.role.insert.as_ref()).await? {
            Ok(Outcome::allow())
        } else {
            Ok(Outcome::deny())
        }
    }

    fn field_permitted(&self, field: &str) -> bool {
        self.role
            .field_permission(field)
            .is_some_and(|p| p.permits(self.params.validation_type))
    }

    fn check_additional_fields(&self) -> Outcome {
        if self.params.cursor.keys().all(|key| self.field_permitted(key)) {
            Outcome::next(Step::CheckIsValidFieldName)
        } else {
            Outcome::deny()
        }
    }

    fn check_is_valid_field_name(&self) -> Outcome {
        let redacted: Document = self
            .params
            .cursor
            .iter()
            .filter(|(key, _)| self.field_permitted(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if redacted.is_empty() {
            Outcome::deny()
        } else {
            Outcome::Done {
                status: true,
                document: Some(redacted),
            }
        }
    }

    fn log(&self, stage: &Stage, step: Step) {
        if self.enable_log {
            debug!(
                stage = stage.name,
                step = %step,
                role = %self.role.name,
                validation_type = %self.params.validation_type,
                "Authorization step"
            );
        }
    }
}
