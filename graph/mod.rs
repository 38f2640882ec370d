/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Graph data structures for the pipeline editor.
//!
//! Core structures:
//! - `Step`: a pipeline node with position, execution metadata, and an
//!   ordered list of upstream step uuids
//! - `Connection`: a directed edge; a `None` end marks an in-progress draft
//! - `would_create_cycle` / `has_cycle`: three-color DFS cycle detection
//!
//! Boundary: `incoming_connections` is the authoritative edge representation.
//! `outgoing_connections` is a derived cache and must be rebuilt through
//! `derive_outgoing_connections` after every structural mutation; reading it
//! without a fresh derivation is an invariant violation.

use euclid::default::Point2D;
use log::warn;
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::persistence::types::{PersistedStep, PipelineDefinition, StepMetaData};

/// A pipeline step (node in the DAG).
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Stable step identity, generated client-side.
    pub uuid: Uuid,

    /// Display name.
    pub title: String,

    /// Relative path to the executable artifact; empty for an unconfigured step.
    pub file_path: String,

    /// Execution-environment reference.
    pub environment: String,

    /// Kernel name within the environment.
    pub kernel: String,

    /// Per-step parameter mapping, independent between steps.
    pub parameters: Map<String, Value>,

    /// Ordered upstream step uuids. Order controls upstream data-merge order.
    pub incoming_connections: Vec<Uuid>,

    /// Derived downstream step uuids. Cache only; see module doc.
    pub outgoing_connections: Vec<Uuid>,

    /// Position in canvas-logical coordinates (top-left corner).
    pub position: Point2D<f32>,

    /// Visibility flag for transient states (created but not yet placed).
    pub hidden: bool,
}

impl Step {
    /// Create a fresh, unconnected step at the given position.
    pub fn new(title: impl Into<String>, position: Point2D<f32>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            title: title.into(),
            file_path: String::new(),
            environment: String::new(),
            kernel: String::new(),
            parameters: Map::new(),
            incoming_connections: Vec::new(),
            outgoing_connections: Vec::new(),
            position,
            hidden: false,
        }
    }

    /// Whether the step's file is a notebook (duplication clears these paths).
    pub fn is_notebook(&self) -> bool {
        self.file_path.ends_with(".ipynb")
    }
}

/// A directed edge between steps.
///
/// `end_step_uuid` is `None` while the connection is being dragged and has
/// not been dropped on a target; such drafts never reach the persisted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub start_step_uuid: Uuid,
    pub end_step_uuid: Option<Uuid>,
}

impl Connection {
    pub fn new(start: Uuid, end: Option<Uuid>) -> Self {
        Self {
            start_step_uuid: start,
            end_step_uuid: end,
        }
    }

    /// An in-progress connection without a committed end step.
    pub fn is_draft(&self) -> bool {
        self.end_step_uuid.is_none()
    }
}

/// Step map keyed by uuid — the reducer's authoritative node storage.
pub type StepMap = HashMap<Uuid, Step>;

/// Outgoing adjacency derived by inverting every step's incoming list.
fn outgoing_adjacency(steps: &StepMap) -> HashMap<Uuid, Vec<Uuid>> {
    let mut adjacency: HashMap<Uuid, Vec<Uuid>> =
        steps.keys().map(|uuid| (*uuid, Vec::new())).collect();
    for (uuid, step) in steps {
        for upstream in &step.incoming_connections {
            if let Some(downstream) = adjacency.get_mut(upstream) {
                downstream.push(*uuid);
            }
        }
    }
    adjacency
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DfsColor {
    White,
    Grey,
    Black,
}

/// Back-edge detection over an outgoing adjacency, iterative three-color DFS.
///
/// Every still-white node starts a fresh traversal until the white set is
/// exhausted; a grey-to-grey edge is a cycle.
fn adjacency_has_cycle(adjacency: &HashMap<Uuid, Vec<Uuid>>) -> bool {
    let mut colors: HashMap<Uuid, DfsColor> = adjacency
        .keys()
        .map(|uuid| (*uuid, DfsColor::White))
        .collect();
    let roots: Vec<Uuid> = adjacency.keys().copied().collect();

    for root in roots {
        if colors.get(&root) != Some(&DfsColor::White) {
            continue;
        }
        colors.insert(root, DfsColor::Grey);
        // Stack entries are (node, index of the next child to visit).
        let mut stack: Vec<(Uuid, usize)> = vec![(root, 0)];
        while let Some((node, child_index)) = stack.pop() {
            let children = adjacency
                .get(&node)
                .map(|edges| edges.as_slice())
                .unwrap_or(&[]);
            if child_index < children.len() {
                stack.push((node, child_index + 1));
                let child = children[child_index];
                match colors.get(&child).copied().unwrap_or(DfsColor::White) {
                    DfsColor::Grey => return true,
                    DfsColor::White => {
                        colors.insert(child, DfsColor::Grey);
                        stack.push((child, 0));
                    },
                    DfsColor::Black => {},
                }
            } else {
                colors.insert(node, DfsColor::Black);
            }
        }
    }
    false
}

/// Whether the committed incoming-connection relation contains a cycle.
pub fn has_cycle(steps: &StepMap) -> bool {
    adjacency_has_cycle(&outgoing_adjacency(steps))
}

/// Whether adding the directed edge `candidate = (start, end)` would create
/// a cycle.
///
/// Pure: works on a copied adjacency and never mutates `steps`. O(V+E).
pub fn would_create_cycle(steps: &StepMap, candidate: (Uuid, Uuid)) -> bool {
    let (start, end) = candidate;
    let mut adjacency = outgoing_adjacency(steps);
    adjacency.entry(start).or_default().push(end);
    adjacency.entry(end).or_default();
    adjacency_has_cycle(&adjacency)
}

/// Rebuild every step's `outgoing_connections` from the incoming lists.
///
/// Must run after any bulk load or any change to an incoming list; until it
/// does, outgoing lists are stale and must not be read.
pub fn derive_outgoing_connections(steps: &mut StepMap) {
    let mut adjacency = outgoing_adjacency(steps);
    for (uuid, step) in steps.iter_mut() {
        step.outgoing_connections = adjacency.remove(uuid).unwrap_or_default();
    }
}

/// Rebuild the committed connection list from the incoming lists.
///
/// Drafts are a reducer-transient concept and never appear here.
pub fn connections_from_steps(steps: &StepMap) -> Vec<Connection> {
    let mut connections = Vec::new();
    for (uuid, step) in steps {
        for upstream in &step.incoming_connections {
            connections.push(Connection::new(*upstream, Some(*uuid)));
        }
    }
    connections
}

/// Convert an in-memory step map to the wire definition.
///
/// The persisted step type carries no outgoing-connections field, so the
/// derived cache is stripped structurally rather than by filtering.
pub fn steps_to_definition(
    steps: &StepMap,
    pipeline_uuid: &str,
    name: &str,
    services: &Map<String, Value>,
) -> PipelineDefinition {
    let persisted = steps
        .values()
        .map(|step| {
            (
                step.uuid.to_string(),
                PersistedStep {
                    uuid: step.uuid.to_string(),
                    title: step.title.clone(),
                    file_path: step.file_path.clone(),
                    environment: step.environment.clone(),
                    kernel: step.kernel.clone(),
                    parameters: step.parameters.clone(),
                    incoming_connections: step
                        .incoming_connections
                        .iter()
                        .map(Uuid::to_string)
                        .collect(),
                    meta_data: StepMetaData {
                        position: [step.position.x, step.position.y],
                        hidden: step.hidden,
                    },
                },
            )
        })
        .collect();

    PipelineDefinition {
        uuid: pipeline_uuid.to_string(),
        name: name.to_string(),
        steps: persisted,
        services: services.clone(),
    }
}

/// Rebuild a step map from a wire definition.
///
/// Steps with unparseable uuids and incoming references to unknown steps are
/// dropped with a warning; a malformed definition degrades instead of
/// panicking. Outgoing lists are freshly derived before returning.
pub fn steps_from_definition(definition: &PipelineDefinition) -> StepMap {
    let mut steps = StepMap::new();

    for persisted in definition.steps.values() {
        let Ok(uuid) = Uuid::parse_str(&persisted.uuid) else {
            warn!("Dropping step with unparseable uuid: {}", persisted.uuid);
            continue;
        };
        steps.insert(
            uuid,
            Step {
                uuid,
                title: persisted.title.clone(),
                file_path: persisted.file_path.clone(),
                environment: persisted.environment.clone(),
                kernel: persisted.kernel.clone(),
                parameters: persisted.parameters.clone(),
                incoming_connections: Vec::new(),
                outgoing_connections: Vec::new(),
                position: Point2D::new(
                    persisted.meta_data.position[0],
                    persisted.meta_data.position[1],
                ),
                hidden: persisted.meta_data.hidden,
            },
        );
    }

    // Incoming lists resolve in a second pass so forward references work.
    for persisted in definition.steps.values() {
        let Ok(uuid) = Uuid::parse_str(&persisted.uuid) else {
            continue;
        };
        let mut incoming = Vec::new();
        for raw in &persisted.incoming_connections {
            match Uuid::parse_str(raw) {
                Ok(upstream) if steps.contains_key(&upstream) => incoming.push(upstream),
                _ => warn!("Dropping connection from unknown step {raw} into {uuid}"),
            }
        }
        if let Some(step) = steps.get_mut(&uuid) {
            step.incoming_connections = incoming;
        }
    }

    derive_outgoing_connections(&mut steps);
    steps
}
