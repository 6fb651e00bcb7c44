//! Headless stand-in for a game: flies the local peer in a circle and logs
//! remote peers as they come and go.

use client::SyncCollaborator;
use log::info;
use shared::{SessionId, Transform};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
pub struct Pilot {
    name: String,
    center: (f32, f32),
    radius: f32,
    pose: Arc<Mutex<Transform>>,
    peers: Arc<Mutex<HashMap<SessionId, String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Pilot {
    pub fn new(name: String, center: (f32, f32), radius: f32) -> Self {
        let start = Transform::new(center.0 + radius, center.1, 90.0);
        Self {
            name,
            center,
            radius,
            pose: Arc::new(Mutex::new(start)),
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Moves to `degrees` along the circle, facing the direction of travel.
    pub fn fly(&self, degrees: f32) {
        let radians = degrees.to_radians();
        *lock(&self.pose) = Transform::new(
            self.center.0 + self.radius * radians.cos(),
            self.center.1 + self.radius * radians.sin(),
            (degrees + 90.0) % 360.0,
        );
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }
}

impl SyncCollaborator for Pilot {
    type Handle = SessionId;

    fn local_transform(&self) -> Transform {
        *lock(&self.pose)
    }

    fn local_name(&self) -> String {
        self.name.clone()
    }

    fn on_peer_seen(&mut self, id: SessionId, name: &str, transform: Transform) -> SessionId {
        info!(
            "{} joined (id {}) at ({:.1}, {:.1})",
            name, id, transform.x, transform.y
        );
        lock(&self.peers).insert(id, name.to_string());
        id
    }

    fn on_peer_updated(&mut self, _handle: &mut SessionId, _transform: Transform) {}

    fn on_peer_left(&mut self, id: SessionId, _handle: SessionId) {
        if let Some(name) = lock(&self.peers).remove(&id) {
            info!("{} left (id {})", name, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_fly_follows_circle() {
        let pilot = Pilot::new("p".into(), (10.0, -5.0), 2.0);

        pilot.fly(90.0);
        let pose = pilot.local_transform();
        assert_approx_eq!(pose.x, 10.0, 1e-4);
        assert_approx_eq!(pose.y, -3.0, 1e-4);
        assert_approx_eq!(pose.angle, 180.0);
    }

    #[test]
    fn test_peers_tracked_until_left() {
        let mut pilot = Pilot::new("p".into(), (0.0, 0.0), 1.0);
        let handle = pilot.on_peer_seen(4, "Bob", Transform::default());
        assert_eq!(pilot.peer_count(), 1);

        pilot.on_peer_left(4, handle);
        assert_eq!(pilot.peer_count(), 0);
    }
}
