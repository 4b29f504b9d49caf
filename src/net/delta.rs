//! Snapshot deltas for actor state
//!
//! A delta carries only the fields that changed between two snapshots of the
//! same actor. Deltas can be applied to a snapshot (collapsing an update into a
//! pending add) and composed with later deltas (merging several ticks into
//! one update).
//!
//! Key features:
//! - Epsilon-based change detection (avoids sending tiny changes)
//! - Discrete fields (state word, payload) always compared exactly
//! - Composition keeps the newest value of every field

use crate::net::protocol::{ActorDelta, ActorSnapshot};

// ============================================================================
// Change Detection Thresholds
// ============================================================================

/// Position change threshold (world units)
/// Below this, translation is considered unchanged
const TRANSLATION_EPSILON: f32 = 0.01;

/// Velocity change threshold (units/second)
const VELOCITY_EPSILON: f32 = 0.05;

/// Rotation change threshold (radians, ~0.06 degrees)
const ROTATION_EPSILON: f32 = 0.001;

// ============================================================================
// Delta Generation
// ============================================================================

/// Generate the delta that turns `base` into `current`.
///
/// Returns `None` if no changes are detected (within epsilon thresholds).
pub fn diff(base: &ActorSnapshot, current: &ActorSnapshot) -> Option<ActorDelta> {
    let mut delta = ActorDelta {
        id: current.id,
        ..Default::default()
    };
    let mut has_changes = false;

    if (current.translation - base.translation).length_sq() > TRANSLATION_EPSILON * TRANSLATION_EPSILON {
        delta.translation = Some(current.translation);
        has_changes = true;
    }

    if (current.velocity - base.velocity).length_sq() > VELOCITY_EPSILON * VELOCITY_EPSILON {
        delta.velocity = Some(current.velocity);
        has_changes = true;
    }

    if (current.rotation - base.rotation).abs() > ROTATION_EPSILON {
        delta.rotation = Some(current.rotation);
        has_changes = true;
    }

    if current.state != base.state {
        delta.state = Some(current.state);
        has_changes = true;
    }

    if current.payload != base.payload {
        delta.payload = Some(current.payload.clone());
        has_changes = true;
    }

    if has_changes {
        Some(delta)
    } else {
        None
    }
}

impl ActorDelta {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.translation.is_none()
            && self.rotation.is_none()
            && self.velocity.is_none()
            && self.state.is_none()
            && self.payload.is_none()
    }

    /// Overwrite the fields this delta carries
    pub fn apply(&self, snapshot: &mut ActorSnapshot) {
        if let Some(translation) = self.translation {
            snapshot.translation = translation;
        }
        if let Some(rotation) = self.rotation {
            snapshot.rotation = rotation;
        }
        if let Some(velocity) = self.velocity {
            snapshot.velocity = velocity;
        }
        if let Some(state) = self.state {
            snapshot.state = state;
        }
        if let Some(payload) = &self.payload {
            snapshot.payload.clone_from(payload);
        }
    }

    /// Compose with a later delta of the same actor; newer fields win
    pub fn merge(&mut self, newer: &ActorDelta) {
        debug_assert_eq!(self.id, newer.id);
        if newer.translation.is_some() {
            self.translation = newer.translation;
        }
        if newer.rotation.is_some() {
            self.rotation = newer.rotation;
        }
        if newer.velocity.is_some() {
            self.velocity = newer.velocity;
        }
        if newer.state.is_some() {
            self.state = newer.state;
        }
        if let Some(payload) = &newer.payload {
            self.payload = Some(payload.clone());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::vec2::Vec2;

    fn create_snapshot(id: u32, translation: Vec2) -> ActorSnapshot {
        ActorSnapshot {
            id,
            config: "drone".to_string(),
            translation,
            rotation: 0.0,
            velocity: Vec2::ZERO,
            state: 0,
            payload: vec![],
        }
    }

    #[test]
    fn test_no_changes_produces_no_delta() {
        let snapshot = create_snapshot(1, Vec2::new(10.0, 10.0));
        assert!(diff(&snapshot, &snapshot).is_none());
    }

    #[test]
    fn test_translation_change_detected() {
        let base = create_snapshot(1, Vec2::new(10.0, 10.0));
        let mut current = base.clone();
        current.translation = Vec2::new(12.0, 10.0);

        let delta = diff(&base, &current).unwrap();
        assert_eq!(delta.translation, Some(Vec2::new(12.0, 10.0)));
        assert!(delta.rotation.is_none());
        assert!(delta.velocity.is_none());
        assert!(delta.state.is_none());
    }

    #[test]
    fn test_change_within_epsilon_ignored() {
        let base = create_snapshot(1, Vec2::new(10.0, 10.0));
        let mut current = base.clone();
        current.translation = Vec2::new(10.001, 10.001);
        current.rotation = 0.0001;

        assert!(diff(&base, &current).is_none());
    }

    #[test]
    fn test_discrete_fields_always_detected() {
        let base = create_snapshot(1, Vec2::ZERO);
        let mut current = base.clone();
        current.state = 3;
        current.payload = vec![9];

        let delta = diff(&base, &current).unwrap();
        assert_eq!(delta.state, Some(3));
        assert_eq!(delta.payload, Some(vec![9]));
    }

    #[test]
    fn test_apply_reconstructs_current() {
        let base = create_snapshot(4, Vec2::new(1.0, 1.0));
        let mut current = base.clone();
        current.translation = Vec2::new(5.0, -2.0);
        current.rotation = 1.0;
        current.payload = vec![1, 2];

        let delta = diff(&base, &current).unwrap();
        let mut rebuilt = base.clone();
        delta.apply(&mut rebuilt);
        assert_eq!(rebuilt, current);
    }

    #[test]
    fn test_merge_keeps_newest_fields() {
        let mut older = ActorDelta {
            id: 2,
            translation: Some(Vec2::new(1.0, 0.0)),
            state: Some(1),
            ..Default::default()
        };
        let newer = ActorDelta {
            id: 2,
            translation: Some(Vec2::new(2.0, 0.0)),
            rotation: Some(0.5),
            ..Default::default()
        };

        older.merge(&newer);
        assert_eq!(older.translation, Some(Vec2::new(2.0, 0.0)));
        assert_eq!(older.rotation, Some(0.5));
        assert_eq!(older.state, Some(1));
        assert!(!older.is_empty());
    }
}
