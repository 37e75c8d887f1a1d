//! Workflow definitions: validated, ordered stage lists.

use super::Stage;
use crate::errors::WorkflowValidationError;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// An ordered sequence of stages. Later stages may consume earlier artifacts.
#[derive(Clone)]
pub struct WorkflowDefinition {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl WorkflowDefinition {
    /// Starts building a definition.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Creates a validated definition.
    pub fn new(
        name: impl Into<String>,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Result<Self, WorkflowValidationError> {
        let definition = Self {
            name: name.into(),
            stages,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Checks that the definition is non-empty with unique, well-formed stage names.
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowValidationError::new("Workflow name is empty"));
        }
        if self.stages.is_empty() {
            return Err(WorkflowValidationError::new(format!(
                "Workflow '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            let name = stage.name();
            if !is_valid_stage_name(name) {
                return Err(WorkflowValidationError::new(format!(
                    "Invalid stage name '{name}': use lowercase letters, digits and '-'"
                ))
                .with_stages(vec![name.to_string()]));
            }
            if !seen.insert(name) {
                return Err(WorkflowValidationError::new(format!(
                    "Duplicate stage '{name}' in workflow '{}'",
                    self.name
                ))
                .with_stages(vec![name.to_string()]));
            }
        }
        Ok(())
    }

    /// The workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for [`WorkflowDefinition`].
pub struct WorkflowBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl WorkflowBuilder {
    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Validates and builds the definition.
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowValidationError> {
        WorkflowDefinition::new(self.name, self.stages)
    }
}

fn is_valid_stage_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
