//! Area of Interest (AOI) for per-client visibility
//!
//! Each client has a local interest rectangle centered on its camera. It is
//! recentered on the client's target every tick; clients without a target
//! watch the region around the world origin.

use crate::util::rect::Rect;
use crate::util::vec2::Vec2;

// ============================================================================
// AOI Constants
// ============================================================================

/// Default interest width (world units)
/// Covers a 1920-wide viewport at zoom 1.0 with ~30% buffer for scrolling
pub const DEFAULT_INTEREST_WIDTH: f32 = 2500.0;

/// Default interest height (world units)
pub const DEFAULT_INTEREST_HEIGHT: f32 = 1400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaOfInterest {
    /// Interest rectangle relative to the camera
    local: Rect,
}

impl AreaOfInterest {
    pub fn new(local: Rect) -> Self {
        Self { local }
    }

    /// Interest of the given size centered on the camera
    pub fn centered(width: f32, height: f32) -> Self {
        Self::new(Rect::centered(width, height))
    }

    #[inline]
    pub fn local(&self) -> Rect {
        self.local
    }

    /// Interest in world space for a camera at `target`, or untranslated
    /// when there is nothing to follow
    pub fn world(&self, target: Option<Vec2>) -> Rect {
        match target {
            Some(translation) => self.local.translated(translation),
            None => self.local,
        }
    }
}

impl Default for AreaOfInterest {
    fn default() -> Self {
        Self::centered(DEFAULT_INTEREST_WIDTH, DEFAULT_INTEREST_HEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_follows_target() {
        let aoi = AreaOfInterest::centered(100.0, 50.0);
        let world = aoi.world(Some(Vec2::new(1000.0, -200.0)));
        assert_eq!(world.center(), Vec2::new(1000.0, -200.0));
        assert_eq!(world.width(), 100.0);
        assert_eq!(world.height(), 50.0);
    }

    #[test]
    fn test_no_target_is_origin_centered() {
        let aoi = AreaOfInterest::centered(100.0, 50.0);
        assert_eq!(aoi.world(None), aoi.local());
        assert_eq!(aoi.world(None).center(), Vec2::ZERO);
    }
}
