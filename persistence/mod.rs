/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Pipeline persistence: wire types, structural validation, and the bridge
//! that coalesces editor changes into store writes.
//!
//! The store itself lives behind the [`PipelineStore`] trait; this module
//! never talks to a transport. The bridge observes the reducer's change
//! token, validates the definition, debounces rapid edits, and retries a
//! failed save on the next tick. Local state stays authoritative throughout.

pub mod types;

use log::warn;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::graph::{has_cycle, steps_from_definition, steps_to_definition};
use crate::state::PipelineUiState;
use types::PipelineDefinition;

/// Delay between the last observed change and the save attempt. Rapid edits
/// inside one window coalesce into a single write.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum PipelineStoreError {
    /// The definition failed structural validation and was not transmitted.
    Validation(String),
    /// The store rejected or failed the write.
    Store(String),
    /// The store returned a document this crate cannot parse.
    Parse(String),
}

impl std::fmt::Display for PipelineStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStoreError::Validation(msg) => write!(f, "invalid pipeline: {msg}"),
            PipelineStoreError::Store(msg) => write!(f, "pipeline store error: {msg}"),
            PipelineStoreError::Parse(msg) => write!(f, "malformed pipeline document: {msg}"),
        }
    }
}

impl std::error::Error for PipelineStoreError {}

/// External pipeline document store.
///
/// Implementations wrap whatever transport the embedder uses; errors map
/// into [`PipelineStoreError::Store`] / [`PipelineStoreError::Parse`].
pub trait PipelineStore {
    fn load(&mut self, pipeline_uuid: &str) -> Result<PipelineDefinition, PipelineStoreError>;
    fn save(&mut self, definition: &PipelineDefinition) -> Result<(), PipelineStoreError>;
}

/// Structural validation, run before every save and after every load.
///
/// Checks: parseable pipeline and step uuids, non-empty name, every incoming
/// reference resolves to a step in the document and appears at most once per
/// step, and the committed relation is acyclic.
pub fn validate_definition(definition: &PipelineDefinition) -> Result<(), PipelineStoreError> {
    if Uuid::parse_str(&definition.uuid).is_err() {
        return Err(PipelineStoreError::Validation(format!(
            "pipeline uuid is not a uuid: {}",
            definition.uuid
        )));
    }
    if definition.name.trim().is_empty() {
        return Err(PipelineStoreError::Validation("pipeline name is empty".into()));
    }

    for (key, step) in &definition.steps {
        if Uuid::parse_str(&step.uuid).is_err() {
            return Err(PipelineStoreError::Validation(format!(
                "step uuid is not a uuid: {}",
                step.uuid
            )));
        }
        if key != &step.uuid {
            return Err(PipelineStoreError::Validation(format!(
                "step map key {key} does not match step uuid {}",
                step.uuid
            )));
        }
        let mut seen = HashSet::new();
        for upstream in &step.incoming_connections {
            if !definition.steps.contains_key(upstream) {
                return Err(PipelineStoreError::Validation(format!(
                    "step {} references unknown upstream step {upstream}",
                    step.uuid
                )));
            }
            if !seen.insert(upstream) {
                return Err(PipelineStoreError::Validation(format!(
                    "step {} lists upstream step {upstream} twice",
                    step.uuid
                )));
            }
        }
    }

    let steps = steps_from_definition(definition);
    if has_cycle(&steps) {
        return Err(PipelineStoreError::Validation(
            "pipeline contains a cycle".into(),
        ));
    }
    Ok(())
}

/// Outcome of the most recent save attempt, for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Saving,
    Saved,
    Failed,
}

/// Observes the editor state and writes the pipeline document to the store.
///
/// Drive it with [`observe`](Self::observe) after every reducer application
/// and [`tick`](Self::tick) on a timer. Saves fire only when the change
/// token moved and the debounce window has elapsed with no further change.
pub struct PersistenceBridge<S: PipelineStore> {
    store: S,
    pipeline_uuid: String,
    pipeline_name: String,
    services: serde_json::Map<String, serde_json::Value>,
    debounce: Duration,
    last_saved_token: Option<Uuid>,
    /// Token and timestamp of the newest unsaved change; `None` when clean.
    dirty: Option<(Uuid, Instant)>,
    status: Option<SaveStatus>,
}

impl<S: PipelineStore> PersistenceBridge<S> {
    pub fn new(store: S, pipeline_uuid: impl Into<String>, pipeline_name: impl Into<String>) -> Self {
        Self {
            store,
            pipeline_uuid: pipeline_uuid.into(),
            pipeline_name: pipeline_name.into(),
            services: serde_json::Map::new(),
            debounce: SAVE_DEBOUNCE,
            last_saved_token: None,
            dirty: None,
            status: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn status(&self) -> Option<SaveStatus> {
        self.status
    }

    /// Load the pipeline document, validate it, and mark the given token as
    /// the saved baseline so the load itself never triggers a save.
    pub fn load(
        &mut self,
        state_token: Uuid,
    ) -> Result<PipelineDefinition, PipelineStoreError> {
        let definition = self.store.load(&self.pipeline_uuid)?;
        validate_definition(&definition)?;
        self.pipeline_name = definition.name.clone();
        self.services = definition.services.clone();
        self.last_saved_token = Some(state_token);
        self.dirty = None;
        Ok(definition)
    }

    /// Record the state's current change token. Call after every reducer
    /// application; repeated observations of the same token are free.
    pub fn observe(&mut self, state: &PipelineUiState, now: Instant) {
        let token = state.change_token.value();
        if Some(token) == self.last_saved_token {
            return;
        }
        match self.dirty {
            Some((dirty_token, _)) if dirty_token == token => {},
            // A newer token restarts the debounce window.
            _ => self.dirty = Some((token, now)),
        }
    }

    /// Attempt a save if a change is pending and its debounce has elapsed.
    /// Returns the new status when an attempt was made.
    pub fn tick(&mut self, state: &PipelineUiState, now: Instant) -> Option<SaveStatus> {
        let (token, changed_at) = self.dirty?;
        if now.duration_since(changed_at) < self.debounce {
            return None;
        }

        self.status = Some(SaveStatus::Saving);
        let definition = steps_to_definition(
            &state.steps,
            &self.pipeline_uuid,
            &self.pipeline_name,
            &self.services,
        );

        if let Err(error) = validate_definition(&definition) {
            // Nothing to retry; the state itself is unsaveable until edited.
            warn!("Refusing to save pipeline {}: {error}", self.pipeline_uuid);
            self.dirty = None;
            self.status = Some(SaveStatus::Failed);
            return self.status;
        }

        match self.store.save(&definition) {
            Ok(()) => {
                self.last_saved_token = Some(token);
                self.dirty = None;
                self.status = Some(SaveStatus::Saved);
            },
            Err(error) => {
                warn!("Failed to save pipeline {}: {error}", self.pipeline_uuid);
                // The dirty marker stays untouched. Its debounce window has
                // already elapsed, so the next tick retries immediately.
                self.status = Some(SaveStatus::Failed);
            },
        }
        self.status
    }
}
