/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The pipeline editor's UI state and its action reducer.
//!
//! `PipelineUiState` is the single source of truth for steps, connections,
//! selection, the marquee rectangle, drag-grab state, and the change token.
//! Mutation happens only through [`PipelineUiState::apply_action`] with a
//! [`PipelineAction`]; every action either commits fully or leaves the state
//! untouched apart from a surfaced error.
//!
//! Boundary: all acyclicity checks run before any write. The committed
//! incoming-connection relation is acyclic at every point a caller can
//! observe.

use euclid::default::{Point2D, Rect, Vector2D};
use log::warn;
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::geometry::{rect_from_corners, rects_intersect, step_bounds, STEP_HEIGHT, STEP_WIDTH};
use crate::graph::{
    connections_from_steps, derive_outgoing_connections, would_create_cycle, Connection, Step,
    StepMap,
};

/// Offset applied repeatedly until a new step's position is unique.
pub const COLLISION_DISPLACEMENT: f32 = 20.0;

/// Gaps between auto-layout columns and rows, in canvas units.
pub const LAYOUT_COLUMN_GAP: f32 = 60.0;
pub const LAYOUT_ROW_GAP: f32 = 40.0;

/// Opaque marker that advances on every committed structural mutation.
/// Pure selection and view actions never advance it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeToken(Uuid);

impl ChangeToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn value(&self) -> Uuid {
        self.0
    }

    fn advance(&mut self) {
        self.0 = Uuid::new_v4();
    }
}

impl Default for ChangeToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The marquee rectangle, tracked in canvas coordinates so the selected set
/// is independent of the current zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSelector {
    pub active: bool,
    pub origin: Point2D<f32>,
    pub cursor: Point2D<f32>,
}

impl StepSelector {
    pub fn rect(&self) -> Rect<f32> {
        rect_from_corners(self.origin, self.cursor)
    }
}

/// Every mutation the editor can apply. Matched exhaustively by the reducer.
#[derive(Debug, Clone)]
pub enum PipelineAction {
    /// Bulk load. Replaces the step map and clears all selection state.
    SetSteps(StepMap),
    CreateStep(Step),
    DuplicateSteps(Vec<Uuid>),
    AssignFileToStep {
        step_uuid: Uuid,
        file_path: String,
    },
    SelectSteps {
        uuids: Vec<Uuid>,
        inclusive: bool,
    },
    SelectAll,
    DeselectSteps(Vec<Uuid>),
    SelectConnection(Connection),
    DeselectConnection,
    /// Begin dragging a connection out of a step's outgoing connector.
    InstantiateConnection {
        start: Uuid,
    },
    /// Pointer-up of a connection drag; `None` means it missed every step.
    MakeConnection {
        end: Option<Uuid>,
    },
    RemoveConnection(Connection),
    /// First phase of a destructive delete; confirmation applies it.
    RequestStepRemoval(Vec<Uuid>),
    ConfirmStepRemoval,
    CancelStepRemoval,
    RemoveSteps(Vec<Uuid>),
    SaveStepDetails {
        step_uuid: Uuid,
        details: Map<String, Value>,
        replace: bool,
    },
    SetCursorControlledStep(Option<Uuid>),
    /// Continuous drag movement in canvas units. Does not advance the token.
    MoveSteps {
        uuids: Vec<Uuid>,
        delta: Vector2D<f32>,
    },
    /// Drag end; positions become persistent.
    CommitStepPositions,
    /// Arrange every step by layered topological placement.
    AutoLayoutSteps,
    CreateStepSelector {
        origin: Point2D<f32>,
    },
    UpdateStepSelector {
        cursor: Point2D<f32>,
    },
    SetStepSelectorInactive,
    ClearError,
}

#[derive(Debug, Clone)]
pub struct PipelineUiState {
    pub steps: StepMap,
    /// Mirror of the per-step incoming lists, plus at most one draft.
    pub connections: Vec<Connection>,
    /// Ordered, de-duplicated selection.
    pub selected_steps: Vec<Uuid>,
    /// Drives the single-step detail panel. Exclusive with `opened_multistep`.
    pub opened_step: Option<Uuid>,
    pub opened_multistep: bool,
    pub selected_connection: Option<Connection>,
    /// The step currently grabbed by the pointer.
    pub cursor_controlled_step: Option<Uuid>,
    pub step_selector: Option<StepSelector>,
    /// Steps awaiting removal confirmation.
    pub pending_removal: Option<Vec<Uuid>>,
    /// Transient, user-dismissable message from a rejected mutation.
    pub error: Option<String>,
    pub change_token: ChangeToken,
}

impl PipelineUiState {
    pub fn new() -> Self {
        Self {
            steps: StepMap::new(),
            connections: Vec::new(),
            selected_steps: Vec::new(),
            opened_step: None,
            opened_multistep: false,
            selected_connection: None,
            cursor_controlled_step: None,
            step_selector: None,
            pending_removal: None,
            error: None,
            change_token: ChangeToken::new(),
        }
    }

    /// The in-progress draft connection, if a connection drag is underway.
    pub fn draft_connection(&self) -> Option<&Connection> {
        self.connections.iter().find(|c| c.is_draft())
    }

    pub fn apply_actions(&mut self, actions: impl IntoIterator<Item = PipelineAction>) {
        for action in actions {
            self.apply_action(action);
        }
    }

    pub fn apply_action(&mut self, action: PipelineAction) {
        match action {
            PipelineAction::SetSteps(mut steps) => {
                derive_outgoing_connections(&mut steps);
                self.connections = connections_from_steps(&steps);
                self.steps = steps;
                self.full_deselect();
                self.cursor_controlled_step = None;
                self.step_selector = None;
                self.pending_removal = None;
            },
            PipelineAction::CreateStep(mut step) => {
                if self.steps.contains_key(&step.uuid) {
                    self.error = Some(format!("A step with uuid {} already exists", step.uuid));
                    return;
                }
                step.position = self.displace_until_unique(step.position);
                let uuid = step.uuid;
                self.steps.insert(uuid, step);
                self.set_selection(vec![uuid]);
                self.change_token.advance();
            },
            PipelineAction::DuplicateSteps(uuids) => {
                let mut created = Vec::new();
                for uuid in uuids {
                    let Some(source) = self.steps.get(&uuid) else {
                        continue;
                    };
                    let mut clone = source.clone();
                    clone.uuid = Uuid::new_v4();
                    // Duplicates start unconnected.
                    clone.incoming_connections.clear();
                    clone.outgoing_connections.clear();
                    if source.is_notebook() {
                        clone.file_path.clear();
                    }
                    clone.position = self.displace_until_unique(
                        clone.position + Vector2D::new(COLLISION_DISPLACEMENT, COLLISION_DISPLACEMENT),
                    );
                    created.push(clone.uuid);
                    self.steps.insert(clone.uuid, clone);
                }
                if !created.is_empty() {
                    self.set_selection(created);
                    self.change_token.advance();
                }
            },
            PipelineAction::AssignFileToStep { step_uuid, file_path } => {
                let Some(step) = self.steps.get_mut(&step_uuid) else {
                    warn!("Assigning file to unknown step {step_uuid}");
                    return;
                };
                step.file_path = file_path;
                self.change_token.advance();
            },
            PipelineAction::SelectSteps { uuids, inclusive } => {
                if uuids.is_empty() {
                    self.full_deselect();
                    return;
                }
                let uuids: Vec<Uuid> = uuids
                    .into_iter()
                    .filter(|uuid| self.steps.contains_key(uuid))
                    .collect();
                if inclusive {
                    let mut union = self.selected_steps.clone();
                    union.extend(uuids);
                    self.set_selection(union);
                } else {
                    self.set_selection(uuids);
                }
            },
            PipelineAction::SelectAll => {
                let all: Vec<Uuid> = self.steps.keys().copied().collect();
                if all.is_empty() {
                    self.full_deselect();
                } else {
                    self.set_selection(all);
                }
            },
            PipelineAction::DeselectSteps(uuids) => {
                self.selected_steps.retain(|uuid| !uuids.contains(uuid));
                if self.selected_steps.is_empty() {
                    self.full_deselect();
                } else {
                    self.refresh_opened_from_selection();
                }
            },
            PipelineAction::SelectConnection(connection) => {
                self.full_deselect();
                self.selected_connection = Some(connection);
            },
            PipelineAction::DeselectConnection => {
                self.selected_connection = None;
            },
            PipelineAction::InstantiateConnection { start } => {
                if !self.steps.contains_key(&start) {
                    warn!("Connection drag from unknown step {start}");
                    return;
                }
                // A lost pointer-up can leave a stale draft behind; at most
                // one connection drag is in progress.
                self.connections.retain(|c| !c.is_draft());
                self.full_deselect();
                self.connections.push(Connection::new(start, None));
            },
            PipelineAction::MakeConnection { end } => self.make_connection(end),
            PipelineAction::RemoveConnection(connection) => self.remove_connection(connection),
            PipelineAction::RequestStepRemoval(uuids) => {
                let existing: Vec<Uuid> = uuids
                    .into_iter()
                    .filter(|uuid| self.steps.contains_key(uuid))
                    .collect();
                self.pending_removal = if existing.is_empty() {
                    None
                } else {
                    Some(existing)
                };
            },
            PipelineAction::ConfirmStepRemoval => {
                if let Some(uuids) = self.pending_removal.take() {
                    self.remove_steps(uuids);
                }
            },
            PipelineAction::CancelStepRemoval => {
                self.pending_removal = None;
            },
            PipelineAction::RemoveSteps(uuids) => self.remove_steps(uuids),
            PipelineAction::SaveStepDetails {
                step_uuid,
                details,
                replace,
            } => {
                if !self.steps.contains_key(&step_uuid) {
                    warn!("Saving details of unknown step {step_uuid}");
                    return;
                }
                self.apply_step_details(step_uuid, &details, replace);
                self.change_token.advance();
            },
            PipelineAction::SetCursorControlledStep(uuid) => {
                self.cursor_controlled_step = uuid;
            },
            PipelineAction::MoveSteps { uuids, delta } => {
                for uuid in uuids {
                    if let Some(step) = self.steps.get_mut(&uuid) {
                        step.position += delta;
                    }
                }
            },
            PipelineAction::CommitStepPositions => {
                self.change_token.advance();
            },
            PipelineAction::AutoLayoutSteps => self.auto_layout(),
            PipelineAction::CreateStepSelector { origin } => {
                self.full_deselect();
                self.step_selector = Some(StepSelector {
                    active: true,
                    origin,
                    cursor: origin,
                });
            },
            PipelineAction::UpdateStepSelector { cursor } => {
                let Some(selector) = self.step_selector.as_mut() else {
                    return;
                };
                if !selector.active {
                    return;
                }
                selector.cursor = cursor;
                let rect = selector.rect();
                let covered: Vec<Uuid> = self
                    .steps
                    .values()
                    .filter(|step| rects_intersect(&rect, &step_bounds(step.position)))
                    .map(|step| step.uuid)
                    .collect();
                if covered.is_empty() {
                    self.selected_steps.clear();
                    self.opened_step = None;
                    self.opened_multistep = false;
                } else {
                    self.set_selection(covered);
                }
            },
            PipelineAction::SetStepSelectorInactive => {
                if let Some(selector) = self.step_selector.as_mut() {
                    selector.active = false;
                }
            },
            PipelineAction::ClearError => {
                self.error = None;
            },
        }
    }

    /// Pointer-up of a connection drag. Commits or aborts the draft; aborts
    /// never touch the committed graph.
    fn make_connection(&mut self, end: Option<Uuid>) {
        let Some(draft_index) = self.connections.iter().position(Connection::is_draft) else {
            // No drag in progress; stray pointer-up.
            return;
        };
        let start = self.connections[draft_index].start_step_uuid;

        let Some(end) = end.filter(|uuid| self.steps.contains_key(uuid)) else {
            self.connections.remove(draft_index);
            return;
        };
        if self
            .steps
            .get(&end)
            .is_some_and(|step| step.incoming_connections.contains(&start))
        {
            self.connections.remove(draft_index);
            self.error = Some("These steps are already connected".into());
            return;
        }
        if would_create_cycle(&self.steps, (start, end)) {
            self.connections.remove(draft_index);
            self.error = Some("This connection would create a cycle".into());
            return;
        }

        self.connections[draft_index].end_step_uuid = Some(end);
        if let Some(step) = self.steps.get_mut(&end) {
            step.incoming_connections.push(start);
        }
        derive_outgoing_connections(&mut self.steps);
        self.change_token.advance();
    }

    fn remove_connection(&mut self, connection: Connection) {
        match connection.end_step_uuid {
            None => {
                // Aborting a draft is not a structural change.
                if let Some(index) = self.connections.iter().position(|c| {
                    c.is_draft() && c.start_step_uuid == connection.start_step_uuid
                }) {
                    self.connections.remove(index);
                }
            },
            Some(end) => {
                let Some(index) = self.connections.iter().position(|c| *c == connection) else {
                    return;
                };
                self.connections.remove(index);
                if let Some(step) = self.steps.get_mut(&end) {
                    step.incoming_connections
                        .retain(|uuid| *uuid != connection.start_step_uuid);
                }
                derive_outgoing_connections(&mut self.steps);
                if self.selected_connection == Some(connection) {
                    self.selected_connection = None;
                }
                self.change_token.advance();
            },
        }
    }

    /// Deletion cascade: every connection touching a removed step goes with
    /// it, and no surviving incoming list keeps a removed uuid.
    fn remove_steps(&mut self, uuids: Vec<Uuid>) {
        let removed: Vec<Uuid> = uuids
            .into_iter()
            .filter(|uuid| self.steps.remove(uuid).is_some())
            .collect();
        if removed.is_empty() {
            return;
        }
        for step in self.steps.values_mut() {
            step.incoming_connections
                .retain(|uuid| !removed.contains(uuid));
        }
        derive_outgoing_connections(&mut self.steps);
        let draft = self.draft_connection().copied();
        self.connections = connections_from_steps(&self.steps);
        // A draft from a surviving step outlives the deletion.
        if let Some(draft) = draft {
            if self.steps.contains_key(&draft.start_step_uuid) {
                self.connections.push(draft);
            }
        }
        self.full_deselect();
        if self
            .cursor_controlled_step
            .is_some_and(|uuid| removed.contains(&uuid))
        {
            self.cursor_controlled_step = None;
        }
        self.change_token.advance();
    }

    fn apply_step_details(&mut self, step_uuid: Uuid, details: &Map<String, Value>, replace: bool) {
        let Some(step) = self.steps.get_mut(&step_uuid) else {
            return;
        };
        for (key, value) in details {
            match (key.as_str(), value) {
                ("title", Value::String(title)) => step.title = title.clone(),
                ("file_path", Value::String(path)) => step.file_path = path.clone(),
                ("environment", Value::String(environment)) => {
                    step.environment = environment.clone()
                },
                ("kernel", Value::String(kernel)) => step.kernel = kernel.clone(),
                ("parameters", Value::Object(parameters)) => {
                    if replace {
                        step.parameters = parameters.clone();
                    } else {
                        deep_merge(&mut step.parameters, parameters);
                    }
                },
                _ => warn!("Ignoring unknown step detail key {key}"),
            }
        }
    }

    /// Layered topological placement. Each step lands one column to the
    /// right of its furthest upstream step; rows within a column keep the
    /// steps' previous vertical order so the layout is stable under repeats.
    fn auto_layout(&mut self) {
        if self.steps.is_empty() {
            return;
        }
        let mut indegree: HashMap<Uuid, usize> = self
            .steps
            .iter()
            .map(|(uuid, step)| (*uuid, step.incoming_connections.len()))
            .collect();
        let mut layers: HashMap<Uuid, usize> = HashMap::new();
        let mut queue: Vec<Uuid> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(uuid, _)| *uuid)
            .collect();
        for uuid in &queue {
            layers.insert(*uuid, 0);
        }
        let mut head = 0;
        while head < queue.len() {
            let current = queue[head];
            head += 1;
            let current_layer = layers.get(&current).copied().unwrap_or(0);
            let downstream: Vec<Uuid> = self
                .steps
                .get(&current)
                .map(|step| step.outgoing_connections.clone())
                .unwrap_or_default();
            for next in downstream {
                let layer = layers.entry(next).or_insert(0);
                *layer = (*layer).max(current_layer + 1);
                if let Some(degree) = indegree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(next);
                    }
                }
            }
        }

        let column_count = layers.values().copied().max().map_or(1, |max| max + 1);
        let mut columns: Vec<Vec<Uuid>> = vec![Vec::new(); column_count];
        for (uuid, layer) in &layers {
            columns[*layer].push(*uuid);
        }
        for column in &mut columns {
            column.sort_by(|a, b| {
                let row_a = self.steps.get(a).map_or(0.0, |s| s.position.y);
                let row_b = self.steps.get(b).map_or(0.0, |s| s.position.y);
                row_a
                    .partial_cmp(&row_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            });
        }
        for (column_index, column) in columns.iter().enumerate() {
            for (row_index, uuid) in column.iter().enumerate() {
                if let Some(step) = self.steps.get_mut(uuid) {
                    step.position = Point2D::new(
                        column_index as f32 * (STEP_WIDTH + LAYOUT_COLUMN_GAP),
                        row_index as f32 * (STEP_HEIGHT + LAYOUT_ROW_GAP),
                    );
                }
            }
        }
        self.change_token.advance();
    }

    fn displace_until_unique(&self, mut position: Point2D<f32>) -> Point2D<f32> {
        while self.steps.values().any(|step| step.position == position) {
            position += Vector2D::new(COLLISION_DISPLACEMENT, COLLISION_DISPLACEMENT);
        }
        position
    }

    /// Replace the selection with an ordered de-duplicated set and keep the
    /// opened-step flags consistent with its size.
    fn set_selection(&mut self, uuids: Vec<Uuid>) {
        let mut deduplicated = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            if !deduplicated.contains(&uuid) {
                deduplicated.push(uuid);
            }
        }
        self.selected_steps = deduplicated;
        self.selected_connection = None;
        self.refresh_opened_from_selection();
    }

    fn refresh_opened_from_selection(&mut self) {
        match self.selected_steps.as_slice() {
            [] => {
                self.opened_step = None;
                self.opened_multistep = false;
            },
            [single] => {
                self.opened_step = Some(*single);
                self.opened_multistep = false;
            },
            _ => {
                self.opened_step = None;
                self.opened_multistep = true;
            },
        }
    }

    fn full_deselect(&mut self) {
        self.selected_steps.clear();
        self.opened_step = None;
        self.opened_multistep = false;
        self.selected_connection = None;
    }
}

impl Default for PipelineUiState {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursive JSON-object merge. Objects merge key-wise, everything else is
/// replaced by the update.
fn deep_merge(target: &mut Map<String, Value>, updates: &Map<String, Value>) {
    for (key, update) in updates {
        match (target.get_mut(key), update) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            },
            _ => {
                target.insert(key.clone(), update.clone());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_fixtures::diamond_fixture;
    use crate::graph::has_cycle;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn state_with_fixture() -> (PipelineUiState, Vec<Uuid>) {
        let (steps, uuids) = diamond_fixture();
        let mut state = PipelineUiState::new();
        state.apply_action(PipelineAction::SetSteps(steps));
        (state, uuids)
    }

    fn connection_set(state: &PipelineUiState) -> HashSet<(Uuid, Option<Uuid>)> {
        state
            .connections
            .iter()
            .map(|c| (c.start_step_uuid, c.end_step_uuid))
            .collect()
    }

    #[test]
    fn test_set_steps_builds_connections_and_clears_selection() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![uuids[0]],
            inclusive: false,
        });
        let (steps, _) = diamond_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::SetSteps(steps));

        assert_eq!(state.connections.len(), 3);
        assert!(state.selected_steps.is_empty());
        assert!(state.opened_step.is_none());
        // A bulk load is not a local edit; nothing to persist.
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_create_step_selects_opens_and_advances_token() {
        let (mut state, _) = state_with_fixture();
        let token = state.change_token;
        let step = Step::new("new step", Point2D::new(500.0, 500.0));
        let uuid = step.uuid;
        state.apply_action(PipelineAction::CreateStep(step));

        assert!(state.steps.contains_key(&uuid));
        assert_eq!(state.selected_steps, vec![uuid]);
        assert_eq!(state.opened_step, Some(uuid));
        assert_ne!(state.change_token, token);
    }

    #[test]
    fn test_create_step_uuid_collision_errors_without_mutation() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        let steps_before = state.steps.clone();
        let mut step = Step::new("imposter", Point2D::new(0.0, 0.0));
        step.uuid = uuids[0];
        state.apply_action(PipelineAction::CreateStep(step));

        assert!(state.error.is_some());
        assert_eq!(state.steps, steps_before);
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_create_step_displaces_colliding_positions() {
        let mut state = PipelineUiState::new();
        let position = Point2D::new(100.0, 100.0);
        state.apply_action(PipelineAction::CreateStep(Step::new("a", position)));
        state.apply_action(PipelineAction::CreateStep(Step::new("b", position)));
        state.apply_action(PipelineAction::CreateStep(Step::new("c", position)));

        let positions: HashSet<(u32, u32)> = state
            .steps
            .values()
            .map(|s| (s.position.x as u32, s.position.y as u32))
            .collect();
        assert_eq!(positions.len(), 3);
        assert!(positions.contains(&(100, 100)));
        assert!(positions.contains(&(120, 120)));
        assert!(positions.contains(&(140, 140)));
    }

    #[test]
    fn test_duplicate_steps_clears_notebook_path_and_connections() {
        let (mut state, uuids) = state_with_fixture();
        state
            .steps
            .get_mut(&uuids[3])
            .unwrap()
            .file_path = "analysis.ipynb".into();
        state.apply_action(PipelineAction::DuplicateSteps(vec![uuids[3]]));

        assert_eq!(state.steps.len(), 5);
        let duplicate_uuid = state.selected_steps[0];
        assert_ne!(duplicate_uuid, uuids[3]);
        let duplicate = state.steps.get(&duplicate_uuid).unwrap();
        assert!(duplicate.file_path.is_empty());
        assert!(duplicate.incoming_connections.is_empty());
        assert_ne!(duplicate.position, state.steps.get(&uuids[3]).unwrap().position);
    }

    #[test]
    fn test_duplicate_keeps_script_path() {
        let (mut state, uuids) = state_with_fixture();
        state
            .steps
            .get_mut(&uuids[2])
            .unwrap()
            .file_path = "transform.py".into();
        state.apply_action(PipelineAction::DuplicateSteps(vec![uuids[2]]));

        let duplicate = state.steps.get(&state.selected_steps[0]).unwrap();
        assert_eq!(duplicate.file_path, "transform.py");
    }

    #[test]
    fn test_select_single_step_opens_it() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![uuids[1]],
            inclusive: false,
        });
        assert_eq!(state.selected_steps, vec![uuids[1]]);
        assert_eq!(state.opened_step, Some(uuids[1]));
        assert!(!state.opened_multistep);
    }

    #[test]
    fn test_select_empty_is_full_deselect() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::SelectSteps {
            uuids: uuids.clone(),
            inclusive: false,
        });
        assert!(state.opened_multistep);
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![],
            inclusive: false,
        });
        assert!(state.selected_steps.is_empty());
        assert!(!state.opened_multistep);
        assert!(state.opened_step.is_none());
    }

    #[test]
    fn test_inclusive_select_unions_and_deduplicates() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![uuids[0]],
            inclusive: false,
        });
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![uuids[1], uuids[0]],
            inclusive: true,
        });
        assert_eq!(state.selected_steps, vec![uuids[0], uuids[1]]);
        assert!(state.opened_multistep);
        assert!(state.opened_step.is_none());
    }

    #[test]
    fn test_deselect_to_empty_clears_opened_state() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![uuids[0], uuids[1]],
            inclusive: false,
        });
        state.apply_action(PipelineAction::DeselectSteps(vec![uuids[0]]));
        assert_eq!(state.opened_step, Some(uuids[1]));
        state.apply_action(PipelineAction::DeselectSteps(vec![uuids[1]]));
        assert!(state.selected_steps.is_empty());
        assert!(state.opened_step.is_none());
        assert!(!state.opened_multistep);
    }

    #[test]
    fn test_select_all() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::SelectAll);
        assert_eq!(state.selected_steps.len(), uuids.len());
        assert!(state.opened_multistep);
    }

    #[test]
    fn test_selection_tokenless() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![uuids[0]],
            inclusive: false,
        });
        state.apply_action(PipelineAction::SelectAll);
        state.apply_action(PipelineAction::DeselectSteps(vec![uuids[0]]));
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![],
            inclusive: false,
        });
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_make_connection_commits_and_mirrors() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[2] });
        assert!(state.draft_connection().is_some());
        state.apply_action(PipelineAction::MakeConnection { end: Some(uuids[3]) });

        assert!(state.draft_connection().is_none());
        assert!(state
            .connections
            .contains(&Connection::new(uuids[2], Some(uuids[3]))));
        assert!(state
            .steps
            .get(&uuids[3])
            .unwrap()
            .incoming_connections
            .contains(&uuids[2]));
        assert!(state
            .steps
            .get(&uuids[2])
            .unwrap()
            .outgoing_connections
            .contains(&uuids[3]));
        assert_ne!(state.change_token, token);
    }

    #[test]
    fn test_make_connection_without_draft_is_silent() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::MakeConnection { end: Some(uuids[3]) });
        assert!(state.error.is_none());
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_make_connection_missing_target_aborts_silently() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[2] });
        state.apply_action(PipelineAction::MakeConnection { end: None });
        assert!(state.draft_connection().is_none());
        assert!(state.error.is_none());
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_make_connection_already_connected_aborts_with_error() {
        let (mut state, uuids) = state_with_fixture();
        let before = connection_set(&state);
        let token = state.change_token;
        // 0→1 already exists in the fixture.
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[0] });
        state.apply_action(PipelineAction::MakeConnection { end: Some(uuids[1]) });

        assert_eq!(connection_set(&state), before);
        assert!(state.error.is_some());
        assert_eq!(state.change_token, token);
        assert_eq!(
            state.steps.get(&uuids[1]).unwrap().incoming_connections,
            vec![uuids[0]]
        );
    }

    #[test]
    fn test_make_connection_cycle_aborts_with_error() {
        let (mut state, uuids) = state_with_fixture();
        let before = connection_set(&state);
        let token = state.change_token;
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[3] });
        state.apply_action(PipelineAction::MakeConnection { end: Some(uuids[0]) });

        assert_eq!(connection_set(&state), before);
        assert!(state.error.is_some());
        assert_eq!(state.change_token, token);
        assert!(!has_cycle(&state.steps));
    }

    #[test]
    fn test_remove_committed_connection_advances_token() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::RemoveConnection(Connection::new(
            uuids[0],
            Some(uuids[1]),
        )));

        assert!(!state
            .connections
            .contains(&Connection::new(uuids[0], Some(uuids[1]))));
        assert!(state
            .steps
            .get(&uuids[1])
            .unwrap()
            .incoming_connections
            .is_empty());
        assert!(!state
            .steps
            .get(&uuids[0])
            .unwrap()
            .outgoing_connections
            .contains(&uuids[1]));
        assert_ne!(state.change_token, token);
    }

    #[test]
    fn test_remove_draft_connection_does_not_advance_token() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[2] });
        state.apply_action(PipelineAction::RemoveConnection(Connection::new(
            uuids[2], None,
        )));
        assert!(state.draft_connection().is_none());
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_two_phase_removal() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::RequestStepRemoval(vec![uuids[1]]));
        assert!(state.steps.contains_key(&uuids[1]));
        assert_eq!(state.change_token, token);

        state.apply_action(PipelineAction::ConfirmStepRemoval);
        assert!(!state.steps.contains_key(&uuids[1]));
        assert!(state.pending_removal.is_none());
        assert_ne!(state.change_token, token);
    }

    #[test]
    fn test_cancel_removal_leaves_state_untouched() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::RequestStepRemoval(vec![uuids[1]]));
        state.apply_action(PipelineAction::CancelStepRemoval);
        state.apply_action(PipelineAction::ConfirmStepRemoval);
        assert!(state.steps.contains_key(&uuids[1]));
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_remove_steps_cascades_connections() {
        let (mut state, uuids) = state_with_fixture();
        // Step 1 has incoming from 0 and outgoing to 3.
        state.apply_action(PipelineAction::RemoveSteps(vec![uuids[1]]));

        assert!(!state.steps.contains_key(&uuids[1]));
        for connection in &state.connections {
            assert_ne!(connection.start_step_uuid, uuids[1]);
            assert_ne!(connection.end_step_uuid, Some(uuids[1]));
        }
        for step in state.steps.values() {
            assert!(!step.incoming_connections.contains(&uuids[1]));
            assert!(!step.outgoing_connections.contains(&uuids[1]));
        }
        assert!(state.selected_steps.is_empty());
    }

    #[test]
    fn test_save_step_details_replace_and_merge() {
        let (mut state, uuids) = state_with_fixture();
        let initial: Map<String, Value> = serde_json::from_str(
            r#"{"title": "transform", "parameters": {"window": {"size": 5, "unit": "days"}}}"#,
        )
        .unwrap();
        state.apply_action(PipelineAction::SaveStepDetails {
            step_uuid: uuids[0],
            details: initial,
            replace: true,
        });
        let step = state.steps.get(&uuids[0]).unwrap();
        assert_eq!(step.title, "transform");
        assert_eq!(step.parameters["window"]["size"], 5);

        let update: Map<String, Value> =
            serde_json::from_str(r#"{"parameters": {"window": {"size": 10}}}"#).unwrap();
        state.apply_action(PipelineAction::SaveStepDetails {
            step_uuid: uuids[0],
            details: update,
            replace: false,
        });
        let step = state.steps.get(&uuids[0]).unwrap();
        assert_eq!(step.parameters["window"]["size"], 10);
        // Deep merge keeps siblings the update did not name.
        assert_eq!(step.parameters["window"]["unit"], "days");
    }

    #[test]
    fn test_move_steps_is_continuous_commit_is_persistent() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        let origin = state.steps.get(&uuids[0]).unwrap().position;
        state.apply_action(PipelineAction::MoveSteps {
            uuids: vec![uuids[0]],
            delta: Vector2D::new(15.0, -3.0),
        });
        assert_eq!(
            state.steps.get(&uuids[0]).unwrap().position,
            origin + Vector2D::new(15.0, -3.0)
        );
        assert_eq!(state.change_token, token);

        state.apply_action(PipelineAction::CommitStepPositions);
        assert_ne!(state.change_token, token);
    }

    #[test]
    fn test_marquee_selects_intersecting_steps() {
        let mut state = PipelineUiState::new();
        let a = Step::new("a", Point2D::new(0.0, 0.0));
        let b = Step::new("b", Point2D::new(1000.0, 1000.0));
        let (ua, ub) = (a.uuid, b.uuid);
        state.apply_action(PipelineAction::CreateStep(a));
        state.apply_action(PipelineAction::CreateStep(b));

        state.apply_action(PipelineAction::CreateStepSelector {
            origin: Point2D::new(-10.0, -10.0),
        });
        assert!(state.selected_steps.is_empty());
        state.apply_action(PipelineAction::UpdateStepSelector {
            cursor: Point2D::new(50.0, 50.0),
        });
        assert_eq!(state.selected_steps, vec![ua]);
        assert!(!state.selected_steps.contains(&ub));

        state.apply_action(PipelineAction::SetStepSelectorInactive);
        assert_eq!(state.selected_steps, vec![ua]);
        assert!(!state.step_selector.unwrap().active);
    }

    #[test]
    fn test_marquee_shrinking_back_empties_selection() {
        let mut state = PipelineUiState::new();
        let step = Step::new("a", Point2D::new(100.0, 100.0));
        state.apply_action(PipelineAction::CreateStep(step));
        state.apply_action(PipelineAction::CreateStepSelector {
            origin: Point2D::new(0.0, 0.0),
        });
        state.apply_action(PipelineAction::UpdateStepSelector {
            cursor: Point2D::new(150.0, 150.0),
        });
        assert_eq!(state.selected_steps.len(), 1);
        state.apply_action(PipelineAction::UpdateStepSelector {
            cursor: Point2D::new(10.0, 10.0),
        });
        assert!(state.selected_steps.is_empty());
    }

    #[test]
    fn test_select_connection_is_exclusive_with_steps() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::SelectSteps {
            uuids: vec![uuids[0]],
            inclusive: false,
        });
        let connection = Connection::new(uuids[0], Some(uuids[1]));
        state.apply_action(PipelineAction::SelectConnection(connection));
        assert!(state.selected_steps.is_empty());
        assert_eq!(state.selected_connection, Some(connection));

        state.apply_action(PipelineAction::DeselectConnection);
        assert!(state.selected_connection.is_none());
    }

    #[test]
    fn test_instantiate_connection_replaces_stale_draft() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[0] });
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[2] });
        assert_eq!(state.connections.iter().filter(|c| c.is_draft()).count(), 1);
        assert_eq!(state.draft_connection().unwrap().start_step_uuid, uuids[2]);

        state.apply_action(PipelineAction::MakeConnection { end: Some(uuids[3]) });
        assert!(state.draft_connection().is_none());
        assert!(state
            .steps
            .get(&uuids[3])
            .unwrap()
            .incoming_connections
            .contains(&uuids[2]));
    }

    #[test]
    fn test_auto_layout_places_steps_in_topological_columns() {
        let (mut state, uuids) = state_with_fixture();
        let token = state.change_token;
        state.apply_action(PipelineAction::AutoLayoutSteps);

        let column = |uuid: &Uuid| state.steps.get(uuid).unwrap().position.x;
        let stride = STEP_WIDTH + LAYOUT_COLUMN_GAP;
        assert_eq!(column(&uuids[0]), 0.0);
        assert_eq!(column(&uuids[1]), stride);
        assert_eq!(column(&uuids[2]), stride);
        assert_eq!(column(&uuids[3]), 2.0 * stride);
        // Steps sharing a column land on distinct rows.
        assert_ne!(
            state.steps.get(&uuids[1]).unwrap().position.y,
            state.steps.get(&uuids[2]).unwrap().position.y
        );
        assert_ne!(state.change_token, token);
    }

    #[test]
    fn test_auto_layout_is_stable_under_repeats() {
        let (mut state, _) = state_with_fixture();
        state.apply_action(PipelineAction::AutoLayoutSteps);
        let first: Vec<(Uuid, Point2D<f32>)> = state
            .steps
            .values()
            .map(|s| (s.uuid, s.position))
            .collect();
        state.apply_action(PipelineAction::AutoLayoutSteps);
        for (uuid, position) in first {
            assert_eq!(state.steps.get(&uuid).unwrap().position, position);
        }
    }

    #[test]
    fn test_auto_layout_on_empty_pipeline_is_a_noop() {
        let mut state = PipelineUiState::new();
        let token = state.change_token;
        state.apply_action(PipelineAction::AutoLayoutSteps);
        assert_eq!(state.change_token, token);
    }

    #[test]
    fn test_clear_error() {
        let (mut state, uuids) = state_with_fixture();
        state.apply_action(PipelineAction::InstantiateConnection { start: uuids[0] });
        state.apply_action(PipelineAction::MakeConnection { end: Some(uuids[1]) });
        assert!(state.error.is_some());
        state.apply_action(PipelineAction::ClearError);
        assert!(state.error.is_none());
    }

    proptest! {
        /// The committed relation stays acyclic under arbitrary interleavings
        /// of creates, connection attempts, and removals.
        #[test]
        fn prop_acyclic_under_action_sequences(ops in prop::collection::vec((0u8..4, 0usize..8, 0usize..8), 1..60)) {
            let mut state = PipelineUiState::new();
            let pool: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
            for (op, a, b) in ops {
                match op {
                    0 => {
                        let mut step = Step::new("s", Point2D::new(a as f32 * 10.0, b as f32 * 10.0));
                        step.uuid = pool[a];
                        state.apply_action(PipelineAction::CreateStep(step));
                        state.apply_action(PipelineAction::ClearError);
                    },
                    1 => {
                        state.apply_action(PipelineAction::InstantiateConnection { start: pool[a] });
                        state.apply_action(PipelineAction::MakeConnection { end: Some(pool[b]) });
                        state.apply_action(PipelineAction::ClearError);
                    },
                    2 => {
                        state.apply_action(PipelineAction::RemoveSteps(vec![pool[a]]));
                    },
                    _ => {
                        state.apply_action(PipelineAction::RemoveConnection(
                            Connection::new(pool[a], Some(pool[b])),
                        ));
                    },
                }
                prop_assert!(!has_cycle(&state.steps));
                // Mirror invariant: committed connections match incoming lists.
                for connection in state.connections.iter().filter(|c| !c.is_draft()) {
                    let end = connection.end_step_uuid.unwrap();
                    prop_assert!(state.steps.get(&end).is_some_and(
                        |s| s.incoming_connections.contains(&connection.start_step_uuid)));
                }
                for step in state.steps.values() {
                    for upstream in &step.incoming_connections {
                        prop_assert!(state.steps.get(upstream).is_some_and(
                            |p| p.outgoing_connections.contains(&step.uuid)));
                    }
                }
            }
        }
    }
}
