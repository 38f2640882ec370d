/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Pure 2D math for the pipeline canvas.
//!
//! Everything here operates on `euclid` types in canvas-logical coordinates;
//! no module state, no side effects.

use euclid::default::{Point2D, Rect, Size2D};

/// Rendered extent of a step, in canvas-logical units.
pub const STEP_WIDTH: f32 = 190.0;
pub const STEP_HEIGHT: f32 = 105.0;

/// Build a normalized rectangle from two arbitrary corner points.
pub fn rect_from_corners(a: Point2D<f32>, b: Point2D<f32>) -> Rect<f32> {
    let origin = Point2D::new(a.x.min(b.x), a.y.min(b.y));
    let size = Size2D::new((a.x - b.x).abs(), (a.y - b.y).abs());
    Rect::new(origin, size)
}

/// Inclusive rectangle overlap test.
///
/// `euclid`'s `intersects` is exclusive at shared edges; marquee selection
/// treats a touching step as selected, so this variant is inclusive.
pub fn rects_intersect(a: &Rect<f32>, b: &Rect<f32>) -> bool {
    a.origin.x <= b.origin.x + b.size.width
        && b.origin.x <= a.origin.x + a.size.width
        && a.origin.y <= b.origin.y + b.size.height
        && b.origin.y <= a.origin.y + a.size.height
}

/// Bounding box of a step positioned at `position` (its top-left corner).
pub fn step_bounds(position: Point2D<f32>) -> Rect<f32> {
    Rect::new(position, Size2D::new(STEP_WIDTH, STEP_HEIGHT))
}

/// Arithmetic centroid of a point set; `None` when the set is empty.
pub fn centroid(points: &[Point2D<f32>]) -> Option<Point2D<f32>> {
    if points.is_empty() {
        return None;
    }
    let mut x = 0.0f32;
    let mut y = 0.0f32;
    for p in points {
        x += p.x;
        y += p.y;
    }
    let n = points.len() as f32;
    Some(Point2D::new(x / n, y / n))
}
