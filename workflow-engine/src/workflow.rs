// Approval flow definitions
use crate::error::{Result, WorkflowError};
use crate::step::StepDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Business module an approval flow belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Leave,
    Attendance,
    Expense,
    Travel,
    Purchase,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Leave => "leave",
            Module::Attendance => "attendance",
            Module::Expense => "expense",
            Module::Travel => "travel",
            Module::Purchase => "purchase",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Module {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leave" => Ok(Module::Leave),
            "attendance" => Ok(Module::Attendance),
            "expense" => Ok(Module::Expense),
            "travel" => Ok(Module::Travel),
            "purchase" => Ok(Module::Purchase),
            other => Err(WorkflowError::InvalidDefinition(format!("unknown module '{}'", other))),
        }
    }
}

/// A versioned, ordered list of approval steps.
///
/// Once a request references a version it is never changed; editing the
/// steps publishes `version + 1` under the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "default_version")]
    pub version: u32,
    pub module: Module,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub steps: Vec<StepDefinition>,
}

impl FlowDefinition {
    pub fn builder(name: &str, module: Module) -> FlowBuilder {
        FlowBuilder::new(name, module)
    }

    /// Step with the given 1-based order
    pub fn step(&self, order: u32) -> Option<&StepDefinition> {
        let index = usize::try_from(order).ok()?.checked_sub(1)?;
        self.steps.get(index)
    }

    /// The `current_step` value that marks completion
    pub fn completion_step(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition("flow name is empty".into()));
        }
        if self.version == 0 {
            return Err(WorkflowError::InvalidDefinition(format!(
                "flow '{}' has version 0, versions start at 1",
                self.name
            )));
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "flow '{}' has no steps",
                self.name
            )));
        }
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.order != expected {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "flow '{}': step at position {} has order {}, expected {}",
                    self.name, expected, step.order, expected
                )));
            }
            step.validate()?;
        }
        Ok(())
    }

    /// Next version of this flow carrying `steps`
    pub fn revised(&self, steps: Vec<StepDefinition>) -> Result<Self> {
        let revision = Self {
            version: self.version + 1,
            created_at: Utc::now(),
            steps,
            ..self.clone()
        };
        revision.validate()?;
        Ok(revision)
    }
}

pub struct FlowBuilder {
    name: String,
    module: Module,
    description: Option<String>,
    active: bool,
    steps: Vec<StepDefinition>,
}

impl FlowBuilder {
    pub fn new(name: &str, module: Module) -> Self {
        Self {
            name: name.to_string(),
            module,
            description: None,
            active: true,
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn add_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<FlowDefinition> {
        let flow = FlowDefinition {
            id: Uuid::new_v4(),
            version: 1,
            module: self.module,
            name: self.name,
            description: self.description,
            active: self.active,
            created_at: Utc::now(),
            steps: self.steps,
        };
        flow.validate()?;
        Ok(flow)
    }
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}
