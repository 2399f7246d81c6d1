//! Player and entity sub-state of a tunnel.
//!
//! Mutated by pump interceptors, read by module workers. Each structure
//! lives behind its own lock on the tunnel; accessors here are plain data
//! operations.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Protocol angles are 1/256 of a full turn.
pub fn angle_to_degrees(angle: u8) -> f32 {
    f32::from(angle) * 360.0 / 256.0
}

/// The proxied player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    pub entity_id: Option<i32>,
    pub location: Location,
    pub on_ground: bool,
    pub flying: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player,
    Mob(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: i32,
    pub kind: EntityKind,
    pub location: Location,
    pub on_ground: bool,
}

/// Entities the server has told the client about.
#[derive(Debug, Default)]
pub struct EntityTracker {
    entities: HashMap<i32, Entity>,
}

impl EntityTracker {
    pub fn spawn(&mut self, id: i32, kind: EntityKind, location: Location) {
        self.entities.insert(
            id,
            Entity {
                id,
                kind,
                location,
                on_ground: false,
            },
        );
    }

    /// Apply a movement expressed in 1/32 block units.
    pub fn move_relative(&mut self, id: i32, dx: i8, dy: i8, dz: i8, on_ground: bool) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.location.x += f64::from(dx) / 32.0;
            entity.location.y += f64::from(dy) / 32.0;
            entity.location.z += f64::from(dz) / 32.0;
            entity.on_ground = on_ground;
        }
    }

    pub fn look(&mut self, id: i32, yaw: f32, pitch: f32) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.location.yaw = yaw;
            entity.location.pitch = pitch;
        }
    }

    pub fn teleport(&mut self, id: i32, location: Location, on_ground: bool) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.location = location;
            entity.on_ground = on_ground;
        }
    }

    pub fn destroy(&mut self, ids: &[i32]) {
        for id in ids {
            self.entities.remove(id);
        }
    }

    /// Forget everything (new world or respawn).
    pub fn reset(&mut self) {
        self.entities.clear();
    }

    pub fn get(&self, id: i32) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Closest entity to `from` within `max_distance` blocks.
    pub fn nearest(&self, from: &Location, max_distance: f64) -> Option<Entity> {
        self.entities
            .values()
            .map(|entity| (entity.location.distance_to(from), entity))
            .filter(|(distance, _)| *distance <= max_distance)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, entity)| entity.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_moves_accumulate() {
        let mut tracker = EntityTracker::default();
        tracker.spawn(7, EntityKind::Mob(54), Location::at(0.0, 64.0, 0.0));
        tracker.move_relative(7, 32, -16, 8, true);
        tracker.move_relative(7, 32, 0, 0, true);

        let entity = tracker.get(7).unwrap();
        assert_eq!(entity.location.x, 2.0);
        assert_eq!(entity.location.y, 63.5);
        assert_eq!(entity.location.z, 0.25);
        assert!(entity.on_ground);
    }

    #[test]
    fn test_nearest_respects_range() {
        let mut tracker = EntityTracker::default();
        tracker.spawn(1, EntityKind::Player, Location::at(10.0, 0.0, 0.0));
        tracker.spawn(2, EntityKind::Player, Location::at(3.0, 0.0, 0.0));
        tracker.spawn(3, EntityKind::Mob(50), Location::at(-50.0, 0.0, 0.0));

        let origin = Location::default();
        assert_eq!(tracker.nearest(&origin, 6.0).unwrap().id, 2);
        assert!(tracker.nearest(&origin, 1.0).is_none());

        tracker.destroy(&[2]);
        assert_eq!(tracker.nearest(&origin, 20.0).unwrap().id, 1);
        tracker.reset();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_angle_conversion() {
        assert_eq!(angle_to_degrees(0), 0.0);
        assert_eq!(angle_to_degrees(64), 90.0);
        assert_eq!(angle_to_degrees(128), 180.0);
    }
}
