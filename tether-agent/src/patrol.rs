//! Scripted stand-in for a game client: walks a square around a start
//! tile and loses a little health on every lap.

use std::sync::atomic::{AtomicU64, Ordering};

use tether_sync::{LocalStatus, Location, StatusSource};

/// Deterministic local status that advances one tile per read.
pub struct Patrol {
    origin: Location,
    side: i32,
    world: i32,
    step: AtomicU64,
}

impl Patrol {
    pub fn new(origin: Location, side: i32, world: i32) -> Self {
        Self {
            origin,
            side: side.max(1),
            world,
            step: AtomicU64::new(0),
        }
    }

    fn position(&self, step: u64) -> Location {
        let side = i64::from(self.side);
        let along = (step as i64) % (side * 4);
        let (dx, dy) = match along / side {
            0 => (along, 0),
            1 => (side, along - side),
            2 => (3 * side - along, side),
            _ => (0, 4 * side - along),
        };
        // dx and dy are bounded by `side`, which came from an i32.
        Location::new(
            self.origin.x + dx as i32,
            self.origin.y + dy as i32,
            self.origin.plane,
        )
    }
}

impl StatusSource for Patrol {
    fn read(&self) -> Option<LocalStatus> {
        let step = self.step.fetch_add(1, Ordering::Relaxed);
        let laps = step / (u64::from(self.side.unsigned_abs()) * 4);
        let hp = 99 - (laps % 50) as i32;
        Some(LocalStatus {
            hp: Some(hp),
            max_hp: Some(99),
            prayer: Some(70),
            max_prayer: Some(70),
            world: self.world,
            location: Some(self.position(step)),
            last_activity: Some(if step % 20 < 10 { "PATROL".to_string() } else { "IN_SESSION".to_string() }),
            ..LocalStatus::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walks_a_closed_square() {
        let patrol = Patrol::new(Location::new(100, 100, 0), 2, 301);
        let path: Vec<Location> = (0..9).map(|_| patrol.read().unwrap().location.unwrap()).collect();
        assert_eq!(path[0], Location::new(100, 100, 0));
        assert_eq!(path[2], Location::new(102, 100, 0));
        assert_eq!(path[4], Location::new(102, 102, 0));
        assert_eq!(path[6], Location::new(100, 102, 0));
        assert_eq!(path[8], path[0]);
        for pair in path.windows(2) {
            assert_eq!(pair[0].distance_to(&pair[1]), 1.0);
        }
    }

    #[test]
    fn test_health_drops_per_lap() {
        let patrol = Patrol::new(Location::new(0, 0, 0), 1, 301);
        let first = patrol.read().unwrap();
        for _ in 0..3 {
            patrol.read();
        }
        let second_lap = patrol.read().unwrap();
        assert_eq!(first.hp, Some(99));
        assert_eq!(second_lap.hp, Some(98));
        assert_eq!(second_lap.world, 301);
    }
}
