/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Boundary contracts for the editor's external collaborators.
//!
//! Implementations live in the embedding application; the editor only ever
//! sees these traits and serde types. All boundary traffic is JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::persistence::types::PipelineDefinition;
use crate::persistence::PipelineStoreError;

/// Which steps a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// Exactly the requested steps.
    Selection,
    /// The requested steps plus everything upstream of them.
    Incoming,
}

/// Request body for starting a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub uuids: Vec<String>,
    pub run_type: RunType,
    pub pipeline_definition: PipelineDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Started,
    Success,
    Failure,
    Aborted,
}

/// Execution state of one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRunState {
    pub status: RunStatus,
    #[serde(default)]
    pub started_time: Option<String>,
    #[serde(default)]
    pub finished_time: Option<String>,
}

/// A run in flight, polled at a fixed interval while active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_uuid: String,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: HashMap<String, StepRunState>,
}

/// Run/execution service. Callers must re-read editor state when a poll
/// result arrives; the graph may have changed since the request.
pub trait RunService {
    fn start(&mut self, request: &RunRequest) -> Result<RunState, PipelineStoreError>;
    fn poll(&mut self, run_uuid: &str) -> Result<RunState, PipelineStoreError>;
}

/// An execution environment a step can run in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub language: String,
}

/// Supplies the environments available to new steps.
pub trait EnvironmentRegistry {
    fn environments(&self) -> Vec<Environment>;
    /// The environment assigned to a freshly created step, if any exist.
    fn default_environment(&self) -> Option<Environment> {
        self.environments().into_iter().next()
    }
}

/// Checks whether a step's file exists and carries an allowed extension.
/// Gates open-in-editor actions, not the graph model.
pub trait FileValidator {
    fn is_valid(&self, path: &str, allowed_extensions: &[&str]) -> bool;
}
