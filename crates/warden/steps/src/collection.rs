use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use warden_types::StepId;

use crate::error::StepError;
use crate::receipt::ExecutionStepReceipt;
use crate::step::ExecutionStep;

/// Ordered set of steps forming the conditional step graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionStepCollection {
    steps: Vec<ExecutionStep>,
}

impl ExecutionStepCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: ExecutionStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: ExecutionStep) {
        self.steps.push(step);
    }

    pub fn get(&self, id: &StepId) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_id == *id)
    }

    pub fn get_mut(&mut self, id: &StepId) -> Option<&mut ExecutionStep> {
        self.steps.iter_mut().find(|s| s.step_id == *id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(|s| s.is_root())
    }

    /// The step a fresh run starts at.
    pub fn first_root(&self) -> Option<&ExecutionStep> {
        self.roots().next()
    }

    pub fn children_of<'a>(&'a self, parent: &'a StepId) -> impl Iterator<Item = &'a ExecutionStep> {
        self.steps
            .iter()
            .filter(move |s| s.parent_step_id.as_ref() == Some(parent))
    }

    /// Steps selected by `receipt`: children of its step whose required
    /// parent result code is empty or equal to the receipt's code.
    pub fn next_steps<'a>(
        &'a self,
        receipt: &'a ExecutionStepReceipt,
    ) -> impl Iterator<Item = &'a ExecutionStep> {
        self.steps.iter().filter(move |s| s.fires_after(receipt))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExecutionStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the graph is a well-formed DAG with at least one root.
    pub fn validate(&self) -> Result<(), StepError> {
        let mut parents: HashMap<&StepId, Option<&StepId>> = HashMap::new();
        for step in &self.steps {
            if parents
                .insert(&step.step_id, step.parent_step_id.as_ref())
                .is_some()
            {
                return Err(StepError::DuplicateStep(step.step_id.clone()));
            }
        }

        for step in &self.steps {
            if let Some(parent) = &step.parent_step_id {
                if !parents.contains_key(parent) {
                    return Err(StepError::UnknownParent {
                        step: step.step_id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        // Each step has at most one parent, so walking up is enough to find cycles.
        for step in &self.steps {
            let mut seen = HashSet::new();
            let mut cursor = Some(&step.step_id);
            while let Some(id) = cursor {
                if !seen.insert(id) {
                    return Err(StepError::Cycle(step.step_id.clone()));
                }
                cursor = parents.get(id).copied().flatten();
            }
        }

        if self.roots().next().is_none() {
            return Err(StepError::NoRoot);
        }
        Ok(())
    }
}

impl From<Vec<ExecutionStep>> for ExecutionStepCollection {
    fn from(steps: Vec<ExecutionStep>) -> Self {
        Self { steps }
    }
}

impl<'a> IntoIterator for &'a ExecutionStepCollection {
    type Item = &'a ExecutionStep;
    type IntoIter = std::slice::Iter<'a, ExecutionStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
