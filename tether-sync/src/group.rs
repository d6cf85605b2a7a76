//! Canonical in-memory state of the group.
//!
//! The member set is fixed when the session starts and exactly one member
//! is local. Remote information enters through [`GroupState::reconcile`],
//! which merges only the fields an update carries; local truth enters
//! through [`GroupState::local_update`], which overwrites. Nothing else
//! mutates a [`Member`].
//!
//! ## Merge order
//!
//! ```text
//! PartialUpdate
//!   │ 1. status   hp, maxHp, prayer, maxPrayer, world,
//!   │             notes, customStatus, lastActivity
//!   │ 2. ghost    ghostMode
//!   ▼ 3. location location (+ derived speed)
//! Member
//! ```
//!
//! Ghost mode lands before location so an update that both enables ghost
//! mode and moves the member never exposes the new position. Privacy is
//! enforced when reading ([`GroupState::should_expose_location`]); the
//! stored location is kept.

use std::fmt;
use std::time::Instant;

use crate::error::StateError;
use crate::protocol::{Location, PartialUpdate, Snapshot, IN_SESSION_ACTIVITY, OFFLINE_WORLD};

// ───────────────────────────────────────────────────────────────────
// Colors
// ───────────────────────────────────────────────────────────────────

/// Colors handed to the first members of a group, in roster order.
pub const GROUP_PALETTE: [(u8, u8, u8); 5] = [
    (48, 227, 192),
    (241, 120, 68),
    (78, 54, 236),
    (239, 208, 21),
    (201, 21, 217),
];

/// RGBA color for telling members apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl MemberColor {
    /// Stable color for the member at `index` in the roster.
    ///
    /// Palette entries first; past the palette the hue walks the golden
    /// ratio so neighbours stay distinct.
    pub fn for_index(index: usize) -> Self {
        if let Some(&(r, g, b)) = GROUP_PALETTE.get(index) {
            return Self::from_rgb8(r, g, b);
        }
        let hue = (index as f32 * 0.618_034).fract();
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: f32::from(r) / 255.0,
            g: f32::from(g) / 255.0,
            b: f32::from(b) / 255.0,
            a: 1.0,
        }
    }

    pub fn to_rgb8(&self) -> (u8, u8, u8) {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        (channel(self.r), channel(self.g), channel(self.b))
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Replace no-break spaces, which the host reports in some names.
pub fn sanitize_name(name: &str) -> String {
    name.replace('\u{a0}', " ")
}

// ───────────────────────────────────────────────────────────────────
// Member
// ───────────────────────────────────────────────────────────────────

/// One member's canonical record.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    name: String,
    hp: Option<i32>,
    max_hp: Option<i32>,
    prayer: Option<i32>,
    max_prayer: Option<i32>,
    world: i32,
    location: Option<Location>,
    ghost_mode: Option<bool>,
    last_activity: String,
    notes: String,
    custom_status: String,
    speed: f64,
    color: MemberColor,
    last_sample: Option<(Location, Instant)>,
}

impl Member {
    fn new(name: String, color: MemberColor) -> Self {
        Self {
            name,
            hp: None,
            max_hp: None,
            prayer: None,
            max_prayer: None,
            world: OFFLINE_WORLD,
            location: None,
            ghost_mode: None,
            last_activity: IN_SESSION_ACTIVITY.to_string(),
            notes: String::new(),
            custom_status: String::new(),
            speed: 0.0,
            color,
            last_sample: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hp(&self) -> Option<i32> {
        self.hp
    }

    pub fn max_hp(&self) -> Option<i32> {
        self.max_hp
    }

    pub fn prayer(&self) -> Option<i32> {
        self.prayer
    }

    pub fn max_prayer(&self) -> Option<i32> {
        self.max_prayer
    }

    pub fn world(&self) -> i32 {
        self.world
    }

    pub fn is_online(&self) -> bool {
        self.world != OFFLINE_WORLD
    }

    /// Last known location, regardless of privacy. Use
    /// [`GroupState::exposed_location`] for anything user-facing.
    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn ghost_mode(&self) -> Option<bool> {
        self.ghost_mode
    }

    pub fn last_activity(&self) -> &str {
        &self.last_activity
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn custom_status(&self) -> &str {
        &self.custom_status
    }

    /// Tiles per second between the two latest distinct samples.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn color(&self) -> MemberColor {
        self.color
    }

    pub fn activity_summary(&self) -> ActivitySummary {
        let activity = self.last_activity.as_str();
        if activity.is_empty() || activity == IN_SESSION_ACTIVITY {
            return if self.is_online() { ActivitySummary::InSession } else { ActivitySummary::Inactive };
        }
        let activity = activity.to_lowercase();
        if self.is_online() {
            ActivitySummary::Training(activity)
        } else {
            ActivitySummary::LastSeen(activity)
        }
    }

    fn apply_status(&mut self, update: &PartialUpdate) {
        if let Some(hp) = update.hp {
            self.hp = Some(hp);
        }
        if let Some(max_hp) = update.max_hp {
            self.max_hp = Some(max_hp);
        }
        if let Some(prayer) = update.prayer {
            self.prayer = Some(prayer);
        }
        if let Some(max_prayer) = update.max_prayer {
            self.max_prayer = Some(max_prayer);
        }
        if let Some(world) = update.world {
            self.world = world;
        }
        if let Some(notes) = &update.notes {
            self.notes.clone_from(notes);
        }
        if let Some(custom_status) = &update.custom_status {
            self.custom_status.clone_from(custom_status);
        }
        if let Some(last_activity) = &update.last_activity {
            self.last_activity.clone_from(last_activity);
        }
    }

    /// Fill only what is still unknown; used for echoes of the local member.
    fn seed_from(&mut self, update: &PartialUpdate) {
        self.hp = self.hp.or(update.hp);
        self.max_hp = self.max_hp.or(update.max_hp);
        self.prayer = self.prayer.or(update.prayer);
        self.max_prayer = self.max_prayer.or(update.max_prayer);
        if self.notes.is_empty() {
            if let Some(notes) = &update.notes {
                self.notes.clone_from(notes);
            }
        }
        if self.custom_status.is_empty() {
            if let Some(custom_status) = &update.custom_status {
                self.custom_status.clone_from(custom_status);
            }
        }
    }

    fn record_location(&mut self, location: Option<Location>, now: Instant) {
        let Some(location) = location else {
            self.location = None;
            self.last_sample = None;
            self.speed = 0.0;
            return;
        };
        if self.location == Some(location) {
            return;
        }
        self.speed = match self.last_sample {
            Some((previous, at)) if previous.plane == location.plane => {
                let elapsed = now.saturating_duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    previous.distance_to(&location) / elapsed
                } else {
                    self.speed
                }
            }
            _ => 0.0,
        };
        self.location = Some(location);
        self.last_sample = Some((location, now));
    }
}

/// What a member is doing, for status lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivitySummary {
    InSession,
    Inactive,
    Training(String),
    LastSeen(String),
}

impl fmt::Display for ActivitySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivitySummary::InSession => write!(f, "Currently: in session"),
            ActivitySummary::Inactive => write!(f, "Last activity: inactive"),
            ActivitySummary::Training(activity) => write!(f, "Currently: training {activity}"),
            ActivitySummary::LastSeen(activity) => write!(f, "Last activity: {activity}"),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Local status source
// ───────────────────────────────────────────────────────────────────

/// Authoritative values for the local member, as read from the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalStatus {
    pub hp: Option<i32>,
    pub max_hp: Option<i32>,
    pub prayer: Option<i32>,
    pub max_prayer: Option<i32>,
    pub world: i32,
    pub location: Option<Location>,
    /// `None` leaves the current value alone.
    pub last_activity: Option<String>,
    pub notes: Option<String>,
    pub custom_status: Option<String>,
}

/// Host collaborator that reports the local member's own status.
pub trait StatusSource: Send + Sync {
    /// Current status, or `None` while the local player is not present.
    fn read(&self) -> Option<LocalStatus>;
}

// ───────────────────────────────────────────────────────────────────
// GroupState
// ───────────────────────────────────────────────────────────────────

/// The fixed member table of one group session.
#[derive(Debug, Clone)]
pub struct GroupState {
    name: String,
    members: Vec<Member>,
    local: usize,
    show_self: bool,
}

impl GroupState {
    /// Build the table for `roster`; `local_name` must be one of them.
    pub fn new<I, S>(name: impl Into<String>, roster: I, local_name: &str) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members: Vec<Member> = Vec::new();
        for raw in roster {
            let member_name = sanitize_name(raw.as_ref().trim());
            if member_name.is_empty() || members.iter().any(|m| m.name == member_name) {
                continue;
            }
            let color = MemberColor::for_index(members.len());
            members.push(Member::new(member_name, color));
        }

        let local_name = sanitize_name(local_name.trim());
        let local = members
            .iter()
            .position(|m| m.name == local_name)
            .ok_or(StateError::UnknownMember(local_name))?;

        Ok(Self {
            name: name.into(),
            members,
            local,
            show_self: false,
        })
    }

    /// Group name; doubles as the transport namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.index_of(name).map(|i| &self.members[i])
    }

    pub fn local_member(&self) -> &Member {
        &self.members[self.local]
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.index_of(name) == Some(self.local)
    }

    pub fn show_self(&self) -> bool {
        self.show_self
    }

    pub fn set_show_self(&mut self, show_self: bool) {
        self.show_self = show_self;
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        if name.contains('\u{a0}') {
            let clean = sanitize_name(name);
            return self.members.iter().position(|m| m.name == clean);
        }
        self.members.iter().position(|m| m.name == name)
    }

    /// Merge a sparse update into its member.
    pub fn reconcile(&mut self, update: &PartialUpdate) -> Result<(), StateError> {
        self.reconcile_at(update, Instant::now())
    }

    /// [`reconcile`](Self::reconcile) with an explicit arrival time.
    pub fn reconcile_at(&mut self, update: &PartialUpdate, now: Instant) -> Result<(), StateError> {
        let index = self
            .index_of(&update.name)
            .ok_or_else(|| StateError::UnknownMember(update.name.clone()))?;

        let member = &mut self.members[index];
        if index == self.local {
            member.seed_from(update);
            return Ok(());
        }

        member.apply_status(update);
        if let Some(ghost_mode) = update.ghost_mode {
            member.ghost_mode = Some(ghost_mode);
        }
        if update.location.is_some() {
            member.record_location(update.location, now);
        }
        Ok(())
    }

    /// Apply every entry of a pull result. Returns how many were applied.
    pub fn reconcile_snapshot(&mut self, snapshot: &Snapshot) -> usize {
        let now = Instant::now();
        let mut applied = 0;
        for update in snapshot.values() {
            match self.reconcile_at(update, now) {
                Ok(()) => applied += 1,
                Err(e) => log::warn!("Dropping snapshot entry: {e}"),
            }
        }
        applied
    }

    /// Overwrite the local member from the host's status source.
    ///
    /// Returns the fields that changed (location excluded), or `None` when
    /// the source has nothing to report.
    pub fn local_update(&mut self, source: &dyn StatusSource, ghost_mode: bool) -> Option<PartialUpdate> {
        let status = source.read()?;
        let now = Instant::now();
        let member = &mut self.members[self.local];
        let mut diff = PartialUpdate::named(member.name.clone());

        if member.hp != status.hp {
            member.hp = status.hp;
            diff.hp = status.hp;
        }
        if member.max_hp != status.max_hp {
            member.max_hp = status.max_hp;
            diff.max_hp = status.max_hp;
        }
        if member.prayer != status.prayer {
            member.prayer = status.prayer;
            diff.prayer = status.prayer;
        }
        if member.max_prayer != status.max_prayer {
            member.max_prayer = status.max_prayer;
            diff.max_prayer = status.max_prayer;
        }
        if member.world != status.world {
            member.world = status.world;
            diff.world = Some(status.world);
        }
        if member.ghost_mode != Some(ghost_mode) {
            member.ghost_mode = Some(ghost_mode);
            diff.ghost_mode = Some(ghost_mode);
        }
        for (current, incoming, changed) in [
            (&mut member.notes, status.notes, &mut diff.notes),
            (&mut member.custom_status, status.custom_status, &mut diff.custom_status),
            (&mut member.last_activity, status.last_activity, &mut diff.last_activity),
        ] {
            if let Some(value) = incoming {
                if *current != value {
                    current.clone_from(&value);
                    *changed = Some(value);
                }
            }
        }
        member.record_location(status.location, now);

        Some(diff)
    }

    /// The local fields re-sent on every broadcast, changed or not: world,
    /// ghost mode and, unless hidden, location.
    pub fn local_presence(&self, ghost_mode: bool) -> PartialUpdate {
        let member = self.local_member();
        let mut update = PartialUpdate::named(member.name.clone())
            .with_world(member.world)
            .with_ghost_mode(ghost_mode);
        if !ghost_mode {
            update.location = member.location;
        }
        update
    }

    /// Whether `name`'s location may be shown right now.
    pub fn should_expose_location(&self, name: &str) -> bool {
        self.index_of(name).is_some_and(|index| self.exposes(index))
    }

    fn exposes(&self, index: usize) -> bool {
        let member = &self.members[index];
        let ghost_allows = member.ghost_mode != Some(true) || (index == self.local && self.show_self);
        member.location.is_some() && ghost_allows && member.is_online()
    }

    /// The location of `name` if it may be shown.
    pub fn exposed_location(&self, name: &str) -> Option<Location> {
        let index = self.index_of(name)?;
        if self.exposes(index) {
            self.members[index].location
        } else {
            None
        }
    }

    /// Members whose location may currently be shown.
    pub fn exposed_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .enumerate()
            .filter(|(index, _)| self.exposes(*index))
            .map(|(_, member)| member)
    }
}
