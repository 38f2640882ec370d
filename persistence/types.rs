/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Wire types for the pipeline definition document.
//!
//! These mirror the store's JSON schema exactly. `PersistedStep` carries no
//! outgoing-connections field at all; the derived cache is stripped by
//! construction, not by filtering.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Editor-owned step metadata the runtime does not interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StepMetaData {
    /// Canvas-logical position, `[x, y]`.
    #[serde(default)]
    pub position: [f32; 2],

    #[serde(default)]
    pub hidden: bool,
}

/// A step as stored in the pipeline definition document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStep {
    pub uuid: String,

    pub title: String,

    #[serde(default)]
    pub file_path: String,

    #[serde(default)]
    pub environment: String,

    #[serde(default)]
    pub kernel: String,

    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Upstream step uuids, order preserved.
    #[serde(default)]
    pub incoming_connections: Vec<String>,

    #[serde(default)]
    pub meta_data: StepMetaData,
}

/// The full persisted pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub uuid: String,

    pub name: String,

    /// Steps keyed by their uuid string.
    #[serde(default)]
    pub steps: HashMap<String, PersistedStep>,

    /// Opaque service configuration, carried through untouched.
    #[serde(default)]
    pub services: Map<String, Value>,
}
