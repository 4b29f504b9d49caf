//! Axis-aligned rectangles used for shapes and areas of interest

use serde::{Deserialize, Serialize};

use crate::util::vec2::Vec2;

/// Axis-aligned rectangle given by its minimum and maximum corners
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    #[inline]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Rectangle of the given size centered on the origin
    pub fn centered(width: f32, height: f32) -> Self {
        let half = Vec2::new(width * 0.5, height * 0.5);
        Self::new(-half, half)
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
        )
    }

    #[inline]
    pub fn translated(&self, offset: Vec2) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Smallest rectangle containing this one after rotation about the origin
    pub fn rotated_bounds(&self, rotation: f32) -> Self {
        if rotation == 0.0 {
            return *self;
        }
        let corners = [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ];
        let first = corners[0].rotate(rotation);
        let (min, max) = corners[1..]
            .iter()
            .map(|c| c.rotate(rotation))
            .fold((first, first), |(min, max), c| (min.min(c), max.max(c)));
        Self { min, max }
    }

    /// Shape placed in the world at a translation and rotation
    pub fn transformed(&self, translation: Vec2, rotation: f32) -> Self {
        self.rotated_bounds(rotation).translated(translation)
    }

    /// Edge-touching rectangles do not intersect
    #[inline]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    #[inline]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Minimum translation that moves `self` out of `other`, if they overlap
    pub fn penetration(&self, other: &Rect) -> Option<Vec2> {
        if !self.intersects(other) {
            return None;
        }
        let push_left = other.min.x - self.max.x;
        let push_right = other.max.x - self.min.x;
        let push_up = other.min.y - self.max.y;
        let push_down = other.max.y - self.min.y;

        let dx = if push_right < -push_left { push_right } else { push_left };
        let dy = if push_down < -push_up { push_down } else { push_up };

        if dx.abs() < dy.abs() {
            Some(Vec2::new(dx, 0.0))
        } else {
            Some(Vec2::new(0.0, dy))
        }
    }
}
