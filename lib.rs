/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Pipeline graph editor engine.
//!
//! The in-memory model of a DAG data-processing pipeline and everything
//! needed to edit it interactively: a step/connection graph with cycle
//! prevention, a UI-state reducer, a pan/zoom canvas transform, pointer and
//! keyboard interaction controllers, and a debounced persistence bridge.
//!
//! Rendering, transport, and backend behavior live in the embedding
//! application, behind the traits in [`persistence`] and [`services`].

pub mod canvas;
pub mod geometry;
pub mod graph;
pub mod input;
pub mod persistence;
pub mod services;
pub mod state;

pub use canvas::{CanvasTransform, PanningState};
pub use graph::{has_cycle, would_create_cycle, Connection, Step, StepMap};
pub use input::EditorInteraction;
pub use persistence::{PersistenceBridge, PipelineStore, PipelineStoreError, SaveStatus};
pub use state::{ChangeToken, PipelineAction, PipelineUiState};
