/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Interaction controllers for the pipeline editor.
//!
//! Pointer and keyboard events arrive already decoded from the embedder;
//! this module turns them into [`PipelineAction`]s and canvas transform
//! calls. All transient gesture state (drag candidate, connection cursor,
//! last pointer position) is owned by [`EditorInteraction`] and scoped to
//! the editor session. There are no ambient singletons.

use euclid::default::Point2D;
use uuid::Uuid;

use crate::canvas::{CanvasTransform, PanningState};
use crate::geometry::step_bounds;
use crate::state::{PipelineAction, PipelineUiState};

/// Pointer travel in window pixels before an armed drag becomes a real one.
/// Keeps plain clicks from nudging steps.
pub const DRAG_SENSITIVITY: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DragPhase {
    Idle,
    /// Pointer is down on a step but has not travelled far enough yet.
    Armed { step: Uuid, origin: Point2D<f32> },
    Dragging { step: Uuid },
}

/// Owns all in-flight gesture state for one editor session.
#[derive(Debug)]
pub struct EditorInteraction {
    read_only: bool,
    drag: DragPhase,
    space_held: bool,
    last_pointer: Option<Point2D<f32>>,
    /// Canvas-space free end of the connection being dragged, if any.
    connection_cursor: Option<Point2D<f32>>,
}

impl EditorInteraction {
    pub fn new(read_only: bool) -> Self {
        Self {
            read_only,
            drag: DragPhase::Idle,
            space_held: false,
            last_pointer: None,
            connection_cursor: None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.drag, DragPhase::Dragging { .. })
    }

    /// Where to draw the loose end of the draft connection.
    pub fn connection_cursor(&self) -> Option<Point2D<f32>> {
        self.connection_cursor
    }

    pub fn space_down(&mut self, transform: &mut CanvasTransform) {
        self.space_held = true;
        if transform.panning_state == PanningState::Idle {
            transform.panning_state = PanningState::ReadyToPan;
        }
    }

    pub fn space_up(&mut self, transform: &mut CanvasTransform) {
        self.space_held = false;
        transform.panning_state = PanningState::Idle;
    }

    /// Pointer-down on a step body. Arms a drag candidate and adjusts the
    /// selection; an already-selected step keeps the multi-selection so it
    /// can be co-dragged.
    pub fn pointer_down_on_step(
        &mut self,
        step: Uuid,
        window: Point2D<f32>,
        shift: bool,
        state: &PipelineUiState,
    ) -> Vec<PipelineAction> {
        self.last_pointer = Some(window);
        let mut actions = Vec::new();
        if !state.selected_steps.contains(&step) {
            actions.push(PipelineAction::SelectSteps {
                uuids: vec![step],
                inclusive: shift,
            });
        }
        if !self.read_only {
            self.drag = DragPhase::Armed {
                step,
                origin: window,
            };
            actions.push(PipelineAction::SetCursorControlledStep(Some(step)));
        }
        actions
    }

    /// Pointer-down on a step's outgoing connector starts a connection drag.
    pub fn pointer_down_on_connector(
        &mut self,
        step: Uuid,
        window: Point2D<f32>,
        transform: &CanvasTransform,
    ) -> Vec<PipelineAction> {
        if self.read_only {
            return Vec::new();
        }
        self.last_pointer = Some(window);
        self.connection_cursor = Some(transform.window_to_canvas(window));
        vec![PipelineAction::InstantiateConnection { start: step }]
    }

    /// Pointer-down on empty canvas: start panning if space is held,
    /// otherwise start the marquee.
    pub fn pointer_down_on_canvas(
        &mut self,
        window: Point2D<f32>,
        transform: &mut CanvasTransform,
    ) -> Vec<PipelineAction> {
        self.last_pointer = Some(window);
        if transform.panning_state == PanningState::ReadyToPan {
            transform.panning_state = PanningState::Panning;
            return Vec::new();
        }
        vec![PipelineAction::CreateStepSelector {
            origin: transform.window_to_canvas(window),
        }]
    }

    pub fn pointer_move(
        &mut self,
        window: Point2D<f32>,
        transform: &mut CanvasTransform,
        state: &PipelineUiState,
    ) -> Vec<PipelineAction> {
        let Some(previous) = self.last_pointer.replace(window) else {
            return Vec::new();
        };
        let window_delta = window - previous;

        if transform.panning_state == PanningState::Panning {
            // Panning tracks the pointer one-to-one, unscaled.
            transform.pan_by(window_delta);
            return Vec::new();
        }

        if let DragPhase::Armed { step, origin } = self.drag {
            if (window - origin).length() >= DRAG_SENSITIVITY {
                self.drag = DragPhase::Dragging { step };
            }
        }
        if let DragPhase::Dragging { step } = self.drag {
            let delta = window_delta / transform.scale_factor();
            let uuids = if state.selected_steps.contains(&step) {
                state.selected_steps.clone()
            } else {
                vec![step]
            };
            return vec![PipelineAction::MoveSteps { uuids, delta }];
        }

        if self.connection_cursor.is_some() {
            self.connection_cursor = Some(transform.window_to_canvas(window));
            return Vec::new();
        }

        if state.step_selector.is_some_and(|selector| selector.active) {
            return vec![PipelineAction::UpdateStepSelector {
                cursor: transform.window_to_canvas(window),
            }];
        }

        Vec::new()
    }

    /// Pointer-up anywhere. `over_step` names the step under the pointer, if
    /// any, for the connection state machine.
    pub fn pointer_up(
        &mut self,
        over_step: Option<Uuid>,
        transform: &mut CanvasTransform,
        state: &PipelineUiState,
    ) -> Vec<PipelineAction> {
        if transform.panning_state == PanningState::Panning {
            transform.panning_state = if self.space_held {
                PanningState::ReadyToPan
            } else {
                PanningState::Idle
            };
            return Vec::new();
        }

        let mut actions = Vec::new();
        match std::mem::replace(&mut self.drag, DragPhase::Idle) {
            DragPhase::Dragging { .. } => {
                actions.push(PipelineAction::CommitStepPositions);
                actions.push(PipelineAction::SetCursorControlledStep(None));
            },
            DragPhase::Armed { .. } => {
                actions.push(PipelineAction::SetCursorControlledStep(None));
            },
            DragPhase::Idle => {},
        }
        if self.connection_cursor.take().is_some() {
            actions.push(PipelineAction::MakeConnection { end: over_step });
        }
        if state.step_selector.is_some_and(|selector| selector.active) {
            actions.push(PipelineAction::SetStepSelectorInactive);
        }
        actions
    }

    /// The pointer left the canvas: commit an active drag, abort the draft
    /// connection and the marquee. Mirrors pointer-up with no target.
    pub fn pointer_leave(
        &mut self,
        transform: &mut CanvasTransform,
        state: &PipelineUiState,
    ) -> Vec<PipelineAction> {
        transform.panning_state = if self.space_held {
            PanningState::ReadyToPan
        } else {
            PanningState::Idle
        };
        self.last_pointer = None;

        let mut actions = Vec::new();
        match std::mem::replace(&mut self.drag, DragPhase::Idle) {
            DragPhase::Dragging { .. } => {
                actions.push(PipelineAction::CommitStepPositions);
                actions.push(PipelineAction::SetCursorControlledStep(None));
            },
            DragPhase::Armed { .. } => {
                actions.push(PipelineAction::SetCursorControlledStep(None));
            },
            DragPhase::Idle => {},
        }
        if self.connection_cursor.take().is_some() {
            actions.push(PipelineAction::MakeConnection { end: None });
        }
        if state.step_selector.is_some_and(|selector| selector.active) {
            actions.push(PipelineAction::SetStepSelectorInactive);
        }
        actions
    }
}

/// Hit test: the step whose bounds contain the canvas point, if any.
pub fn step_at(state: &PipelineUiState, canvas_point: Point2D<f32>) -> Option<Uuid> {
    state
        .steps
        .values()
        .find(|step| step_bounds(step.position).contains(canvas_point))
        .map(|step| step.uuid)
}

/// Keyboard actions collected by the embedder's event loop.
///
/// This struct decouples input detection (platform-specific) from action
/// application (pure state mutation), making actions testable.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyboardActions {
    pub delete_selected: bool,
    pub duplicate_selected: bool,
    pub select_all: bool,
    pub run_selected: bool,
    pub auto_layout: bool,
    pub zoom_in: bool,
    pub zoom_out: bool,
    pub center_view: bool,
}

/// Convert keyboard actions to pipeline actions without applying them.
///
/// Destructive and mutating shortcuts are dropped in read-only mode;
/// deletion goes through the two-phase request so the embedder can confirm.
pub fn actions_from_keyboard(
    actions: &KeyboardActions,
    state: &PipelineUiState,
    read_only: bool,
) -> Vec<PipelineAction> {
    let mut out = Vec::new();
    if actions.delete_selected && !read_only {
        if let Some(connection) = state.selected_connection {
            out.push(PipelineAction::RemoveConnection(connection));
        } else if !state.selected_steps.is_empty() {
            out.push(PipelineAction::RequestStepRemoval(
                state.selected_steps.clone(),
            ));
        }
    }
    if actions.duplicate_selected && !read_only && !state.selected_steps.is_empty() {
        out.push(PipelineAction::DuplicateSteps(state.selected_steps.clone()));
    }
    if actions.auto_layout && !read_only && !state.steps.is_empty() {
        out.push(PipelineAction::AutoLayoutSteps);
    }
    if actions.select_all {
        out.push(PipelineAction::SelectAll);
    }
    out
}

/// Steps the run hotkey should execute, for the embedder to hand to its run
/// service as a selection run. `None` when nothing is selected.
pub fn run_selection_from_actions(
    actions: &KeyboardActions,
    state: &PipelineUiState,
) -> Option<Vec<Uuid>> {
    if actions.run_selected && !state.selected_steps.is_empty() {
        Some(state.selected_steps.clone())
    } else {
        None
    }
}

/// Transform-side commands a keyboard event can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasCommand {
    ZoomIn,
    ZoomOut,
    CenterView,
}

/// Convert keyboard actions to canvas commands. These are view-only and
/// work in read-only mode.
pub fn canvas_commands_from_actions(actions: &KeyboardActions) -> Vec<CanvasCommand> {
    let mut out = Vec::new();
    if actions.zoom_in {
        out.push(CanvasCommand::ZoomIn);
    }
    if actions.zoom_out {
        out.push(CanvasCommand::ZoomOut);
    }
    if actions.center_view {
        out.push(CanvasCommand::CenterView);
    }
    out
}
