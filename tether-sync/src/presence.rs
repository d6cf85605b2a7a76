//! Smooth on-map movement for group members.
//!
//! Authoritative locations arrive every few seconds and can jump by many
//! tiles. The displayed point instead walks toward the target one tile per
//! axis per tick, so motion stays visually uniform.
//!
//! ## Per-tick rule
//!
//! ```text
//! dx, dy = target - shown
//! plane differs or |dx| > 30 or |dy| > 30  → snap to target
//! dx == 0 and dy == 0                      → still
//! speed > 2.25 tiles/s or frame toggle on  → step clamp(dx,±1), clamp(dy,±1)
//! otherwise                                → wait for the next tick
//! ```
//!
//! The frame toggle flips once per tick for the whole map, which gives slow
//! walkers a half-rate gait without per-member timers. Every real move
//! leaves a footstep at the pre-move tile.

use std::collections::{HashMap, VecDeque};

use crate::error::StateError;
use crate::group::{GroupState, Member};
use crate::protocol::Location;

/// Beyond this many tiles on either axis the point teleports.
pub const SNAP_DISTANCE: f64 = 30.0;

/// Members faster than this (tiles/second) step on every tick.
pub const FAST_GAIT_SPEED: f64 = 2.25;

// ───────────────────────────────────────────────────────────────────
// Display point & footsteps
// ───────────────────────────────────────────────────────────────────

/// Position currently shown for a member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPoint {
    pub x: f64,
    pub y: f64,
    pub plane: i32,
}

impl DisplayPoint {
    pub fn at(location: Location) -> Self {
        Self {
            x: f64::from(location.x),
            y: f64::from(location.y),
            plane: location.plane,
        }
    }

    /// Nearest tile.
    pub fn tile(&self) -> Location {
        Location::new(self.x.round() as i32, self.y.round() as i32, self.plane)
    }
}

/// Bounded trail of past tiles, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Footsteps {
    steps: VecDeque<Location>,
    max_len: usize,
}

impl Footsteps {
    pub fn new(max_len: usize) -> Self {
        Self {
            steps: VecDeque::with_capacity(max_len.min(256)),
            max_len,
        }
    }

    /// Record a step. When full, the oldest slot is reused for it.
    pub fn push(&mut self, at: Location) {
        if self.max_len == 0 {
            return;
        }
        if self.steps.len() < self.max_len {
            self.steps.push_back(at);
            return;
        }
        self.steps.rotate_left(1);
        if let Some(slot) = self.steps.back_mut() {
            *slot = at;
        }
    }

    /// Change the bound, dropping the oldest steps if it shrank.
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
        while self.steps.len() > max_len {
            self.steps.pop_front();
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.steps.iter()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }
}

// ───────────────────────────────────────────────────────────────────
// Interpolator
// ───────────────────────────────────────────────────────────────────

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    /// First sample; shown at the target directly.
    Placed,
    Snapped,
    Stepped,
    /// Slow gait, skipped this tick.
    Waiting,
    /// Already at the target.
    Still,
}

impl Movement {
    pub fn moved(self) -> bool {
        matches!(self, Movement::Placed | Movement::Snapped | Movement::Stepped)
    }
}

/// Walks one member's displayed point toward its authoritative location.
#[derive(Debug, Clone, Default)]
pub struct PositionInterpolator {
    shown: Option<DisplayPoint>,
    footsteps: Footsteps,
}

impl PositionInterpolator {
    pub fn new(footstep_count: usize) -> Self {
        Self {
            shown: None,
            footsteps: Footsteps::new(footstep_count),
        }
    }

    pub fn shown(&self) -> Option<DisplayPoint> {
        self.shown
    }

    pub fn footsteps(&self) -> &Footsteps {
        &self.footsteps
    }

    pub fn set_footstep_count(&mut self, count: usize) {
        self.footsteps.set_max_len(count);
    }

    /// Advance toward `target`.
    pub fn tick(&mut self, target: Location, speed: f64, frame_toggle: bool) -> Movement {
        let Some(shown) = self.shown else {
            self.shown = Some(DisplayPoint::at(target));
            return Movement::Placed;
        };

        let dx = f64::from(target.x) - shown.x;
        let dy = f64::from(target.y) - shown.y;

        if shown.plane != target.plane || dx.abs() > SNAP_DISTANCE || dy.abs() > SNAP_DISTANCE {
            self.footsteps.push(shown.tile());
            self.shown = Some(DisplayPoint::at(target));
            return Movement::Snapped;
        }
        if dx == 0.0 && dy == 0.0 {
            return Movement::Still;
        }
        if speed <= FAST_GAIT_SPEED && !frame_toggle {
            return Movement::Waiting;
        }

        self.footsteps.push(shown.tile());
        self.shown = Some(DisplayPoint {
            x: shown.x + dx.clamp(-1.0, 1.0),
            y: shown.y + dy.clamp(-1.0, 1.0),
            plane: shown.plane,
        });
        Movement::Stepped
    }

    /// Advance toward `member`'s stored location at its current speed.
    pub fn advance(&mut self, member: &Member, frame_toggle: bool) -> Result<Movement, StateError> {
        let target = member
            .location()
            .ok_or_else(|| StateError::NoLocation(member.name().to_string()))?;
        Ok(self.tick(target, member.speed(), frame_toggle))
    }
}

// ───────────────────────────────────────────────────────────────────
// Presence map: all visible members
// ───────────────────────────────────────────────────────────────────

/// Interpolators for every member whose location may be shown.
///
/// Members that stop being exposed (ghost mode, offline, no location) lose
/// their interpolator and trail; they reappear at their target.
#[derive(Debug, Clone, Default)]
pub struct PresenceMap {
    interpolators: HashMap<String, PositionInterpolator>,
    frame_toggle: bool,
    footstep_count: usize,
}

impl PresenceMap {
    pub fn new(footstep_count: usize) -> Self {
        Self {
            interpolators: HashMap::new(),
            frame_toggle: false,
            footstep_count,
        }
    }

    /// One frame for the whole group. Returns how many members moved.
    pub fn tick(&mut self, group: &GroupState) -> usize {
        self.frame_toggle = !self.frame_toggle;
        self.interpolators.retain(|name, _| group.should_expose_location(name));

        let mut moved = 0;
        for member in group.exposed_members() {
            let interpolator = self
                .interpolators
                .entry(member.name().to_string())
                .or_insert_with(|| PositionInterpolator::new(self.footstep_count));
            match interpolator.advance(member, self.frame_toggle) {
                Ok(movement) if movement.moved() => moved += 1,
                Ok(_) => {}
                Err(e) => log::debug!("Skipping interpolation: {e}"),
            }
        }
        moved
    }

    pub fn set_footstep_count(&mut self, count: usize) {
        self.footstep_count = count;
        for interpolator in self.interpolators.values_mut() {
            interpolator.set_footstep_count(count);
        }
    }

    pub fn footstep_count(&self) -> usize {
        self.footstep_count
    }

    pub fn position(&self, name: &str) -> Option<DisplayPoint> {
        self.interpolators.get(name).and_then(PositionInterpolator::shown)
    }

    pub fn footsteps(&self, name: &str) -> Option<&Footsteps> {
        self.interpolators.get(name).map(PositionInterpolator::footsteps)
    }

    pub fn frame_toggle(&self) -> bool {
        self.frame_toggle
    }

    /// Number of members currently on the map.
    pub fn len(&self) -> usize {
        self.interpolators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interpolators.is_empty()
    }
}
