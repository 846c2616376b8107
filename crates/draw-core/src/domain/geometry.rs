//! Integer geometry in the server's coordinate space.
//!
//! Rectangles are half-open: `min` is inside, `max` is just outside.  This
//! matches how the server reports bounding and clip rectangles in the info
//! block and how allocation commands encode them.

use std::fmt;

/// A point in the server's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// The origin, `(0, 0)`.
    pub const ZERO: Point = Point { x: 0, y: 0 };

    /// Shorthand constructor.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// A half-open rectangle `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    /// Builds a rectangle from its corner coordinates.
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            min: Point::new(x0, y0),
            max: Point::new(x1, y1),
        }
    }

    /// Width of the rectangle.
    pub fn dx(&self) -> i32 {
        self.max.x - self.min.x
    }

    /// Height of the rectangle.
    pub fn dy(&self) -> i32 {
        self.max.y - self.min.y
    }

    /// Returns `true` when the rectangle contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    /// Shrinks the rectangle by `n` on every side (grows it when `n` is negative).
    ///
    /// A rectangle too small to shrink collapses to a zero-size rectangle at
    /// its centre rather than inverting.
    pub fn inset(&self, n: i32) -> Rect {
        let mut r = *self;
        if self.dx() < 2 * n {
            r.min.x = (self.min.x + self.max.x) / 2;
            r.max.x = r.min.x;
        } else {
            r.min.x += n;
            r.max.x -= n;
        }
        if self.dy() < 2 * n {
            r.min.y = (self.min.y + self.max.y) / 2;
            r.max.y = r.min.y;
        } else {
            r.min.y += n;
            r.max.y -= n;
        }
        r
    }

    /// Returns `true` if `p` lies inside the rectangle.
    pub fn contains(&self, p: Point) -> bool {
        self.min.x <= p.x && p.x < self.max.x && self.min.y <= p.y && p.y < self.max.y
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}
