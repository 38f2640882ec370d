/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Canvas view transform: pan, zoom-to-point, and gesture interpretation.
//!
//! The transform maps canvas-logical coordinates to window coordinates as
//! `window = (p - origin) * scale + origin + pan`. Re-anchoring the origin
//! compensates the pan so the content does not jump; a later scale change
//! then holds the anchored point visually fixed. That no-jump property is
//! the defining correctness requirement of this module.
//!
//! View state is client-only. It resets when the active pipeline changes and
//! is never persisted to the store.

use euclid::default::{Point2D, Vector2D};

pub const MIN_SCALE: f32 = 0.13;
pub const MAX_SCALE: f32 = 2.0;

/// Stepped zoom levels for the keyboard/toolbar zoom controls.
pub const SCALE_LADDER: [f32; 5] = [0.13, 0.25, 0.5, 1.0, 2.0];

/// Initial pan padding restored by `center_view`, in window pixels.
pub const INITIAL_PAN_X: f32 = 100.0;
pub const INITIAL_PAN_Y: f32 = 100.0;

/// Scale delta per wheel line.
const LINE_ZOOM_STEP: f32 = 0.12;
/// Scale delta per wheel pixel, for wheels reporting pixel deltas.
const PIXEL_ZOOM_SCALE: f32 = 0.0015;
/// Pixel-mode vertical deltas at or above this magnitude are treated as a
/// mouse wheel notch rather than a trackpad scroll.
const MOUSE_WHEEL_PIXEL_THRESHOLD: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanningState {
    #[default]
    Idle,
    /// Space is held; the next pointer-down starts panning.
    ReadyToPan,
    Panning,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasTransform {
    scale_factor: f32,
    pub pan_offset: Vector2D<f32>,
    pub transform_origin: Point2D<f32>,
    pub panning_state: PanningState,
}

impl CanvasTransform {
    pub fn new() -> Self {
        Self {
            scale_factor: 1.0,
            pan_offset: Vector2D::new(INITIAL_PAN_X, INITIAL_PAN_Y),
            transform_origin: Point2D::new(0.0, 0.0),
            panning_state: PanningState::Idle,
        }
    }

    /// Full view reset, used when the active pipeline identity changes.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Write the scale, clamped to `[MIN_SCALE, MAX_SCALE]`. Every scale
    /// write in this module goes through here.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale_factor = scale.clamp(MIN_SCALE, MAX_SCALE);
    }

    pub fn canvas_to_window(&self, point: Point2D<f32>) -> Point2D<f32> {
        let scaled = self.transform_origin
            + (point - self.transform_origin) * self.scale_factor;
        scaled + self.pan_offset
    }

    /// Inverse of `canvas_to_window`. Recomputed from the live pan and scale
    /// on every call; the mapping changes under the pointer mid-gesture.
    pub fn window_to_canvas(&self, point: Point2D<f32>) -> Point2D<f32> {
        let unpanned = point - self.pan_offset;
        self.transform_origin + (unpanned - self.transform_origin) / self.scale_factor
    }

    /// Move the scaling anchor without moving the content.
    ///
    /// `window = (p - origin) * scale + origin + pan` shifts by
    /// `(origin' - origin) * (1 - scale)` when only the origin changes, so
    /// the pan absorbs the opposite amount.
    pub fn set_transform_origin(&mut self, origin: Point2D<f32>) {
        let shift = (origin - self.transform_origin) * (self.scale_factor - 1.0);
        self.pan_offset += shift;
        self.transform_origin = origin;
    }

    /// Zoom by `delta`, anchored at a window point. The canvas point under
    /// `origin_window` stays at the same window position.
    pub fn zoom_by(&mut self, origin_window: Point2D<f32>, delta: f32) {
        let anchor = self.window_to_canvas(origin_window);
        self.set_transform_origin(anchor);
        self.set_scale(self.scale_factor + delta);
    }

    /// Set the scale directly, anchored at a window point. Used by pinch
    /// gestures, whose offset maps to an absolute scale.
    pub fn pinch_to(&mut self, centroid_window: Point2D<f32>, scale: f32) {
        let anchor = self.window_to_canvas(centroid_window);
        self.set_transform_origin(anchor);
        self.set_scale(scale);
    }

    /// Step to the next ladder value above the current scale, anchored at
    /// the viewport center.
    pub fn zoom_in(&mut self, viewport_center: Point2D<f32>) {
        let anchor = self.window_to_canvas(viewport_center);
        self.set_transform_origin(anchor);
        let next = SCALE_LADDER
            .iter()
            .copied()
            .filter(|level| *level > self.scale_factor + f32::EPSILON)
            .fold(f32::INFINITY, f32::min);
        if next.is_finite() {
            self.set_scale(next);
        }
    }

    /// Step to the next ladder value below the current scale, anchored at
    /// the viewport center.
    pub fn zoom_out(&mut self, viewport_center: Point2D<f32>) {
        let anchor = self.window_to_canvas(viewport_center);
        self.set_transform_origin(anchor);
        let next = SCALE_LADDER
            .iter()
            .copied()
            .filter(|level| *level < self.scale_factor - f32::EPSILON)
            .fold(f32::NEG_INFINITY, f32::max);
        if next.is_finite() {
            self.set_scale(next);
        }
    }

    /// Restore the initial padding and unit scale.
    pub fn center_view(&mut self) {
        self.pan_offset = Vector2D::new(INITIAL_PAN_X, INITIAL_PAN_Y);
        self.transform_origin = Point2D::new(0.0, 0.0);
        self.scale_factor = 1.0;
    }

    /// Pan by a raw window-space delta. Panning is unscaled by design; the
    /// hand tracks the pointer one-to-one at every zoom level.
    pub fn pan_by(&mut self, delta: Vector2D<f32>) {
        self.pan_offset += delta;
    }
}

impl Default for CanvasTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Delta unit reported by a wheel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelDeltaMode {
    Pixel,
    Line,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelInput {
    pub delta_x: f32,
    pub delta_y: f32,
    pub mode: WheelDeltaMode,
}

/// What a wheel event should do to the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanvasGesture {
    /// Zoom by `delta`, anchored at the pointer.
    Zoom { delta: f32 },
    /// Pan by the given window-space delta.
    Pan { delta: Vector2D<f32> },
}

/// Classify a wheel event as mouse-wheel zoom or trackpad pan.
///
/// Mouse wheels report line or page deltas, or large quantized vertical
/// pixel deltas with no horizontal component. Trackpads report small,
/// fractional, often diagonal pixel deltas. Both arrive through the same
/// event type, so this is a heuristic, tuned to misclassify toward panning.
pub fn interpret_wheel(input: WheelInput) -> CanvasGesture {
    match input.mode {
        WheelDeltaMode::Line | WheelDeltaMode::Page => CanvasGesture::Zoom {
            delta: -input.delta_y * LINE_ZOOM_STEP,
        },
        WheelDeltaMode::Pixel => {
            let is_mouse_wheel = input.delta_x == 0.0
                && input.delta_y.abs() >= MOUSE_WHEEL_PIXEL_THRESHOLD
                && input.delta_y.fract() == 0.0;
            if is_mouse_wheel {
                CanvasGesture::Zoom {
                    delta: -input.delta_y * PIXEL_ZOOM_SCALE,
                }
            } else {
                CanvasGesture::Pan {
                    delta: Vector2D::new(-input.delta_x, -input.delta_y),
                }
            }
        },
    }
}
