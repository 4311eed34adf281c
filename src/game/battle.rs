//! Authoritative battle simulation
//!
//! Pure state: every operation is synchronous and only the owning room loop
//! calls them, so there is no locking here.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::{PlayerSnapshot, RoomSnapshot};

pub const DEFAULT_HP: i32 = 100;
pub const ARENA_MIN: f32 = -100.0;
pub const ARENA_MAX: f32 = 100.0;
pub const SKILL_DAMAGE: i32 = 10;
pub const SKILL_COOLDOWN: i32 = 20;
pub const SKILL_RANGE: f32 = 20.0;
pub const MAX_MOVE_PER_TICK: f32 = 5.0;

/// Authoritative server state for a player
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub skill_cd: i32,
}

/// Mutable battle state; the player roster is fixed at creation
#[derive(Debug)]
pub struct BattleState {
    pub tick: i64,
    pub players: HashMap<Uuid, PlayerState>,
}

impl BattleState {
    /// Players spawn on a line: index i at x = -50 + 100*i, y = 0
    pub fn new(player_ids: &[Uuid]) -> Self {
        let players = player_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                (
                    *id,
                    PlayerState {
                        id: *id,
                        x: -50.0 + 100.0 * i as f32,
                        y: 0.0,
                        hp: DEFAULT_HP,
                        skill_cd: 0,
                    },
                )
            })
            .collect();

        Self { tick: 0, players }
    }

    /// Apply a movement delta, clamping both the step and the resulting
    /// position; dead or unknown players are ignored
    pub fn apply_input(&mut self, player_id: Uuid, dx: f32, dy: f32) {
        let Some(p) = self.players.get_mut(&player_id) else {
            return;
        };
        if p.hp <= 0 {
            return;
        }

        let dx = dx.clamp(-MAX_MOVE_PER_TICK, MAX_MOVE_PER_TICK);
        let dy = dy.clamp(-MAX_MOVE_PER_TICK, MAX_MOVE_PER_TICK);

        p.x = (p.x + dx).clamp(ARENA_MIN, ARENA_MAX);
        p.y = (p.y + dy).clamp(ARENA_MIN, ARENA_MAX);
    }

    /// Resolve a skill cast; any failed precondition makes it a no-op
    pub fn apply_skill(&mut self, caster_id: Uuid, target_id: Option<Uuid>, _skill_id: i32) {
        let Some(target_id) = target_id else { return };
        if target_id == caster_id {
            return;
        }

        let Some(caster) = self.players.get(&caster_id) else {
            return;
        };
        if caster.hp <= 0 || caster.skill_cd > 0 {
            return;
        }
        let (cx, cy) = (caster.x, caster.y);

        let Some(target) = self.players.get_mut(&target_id) else {
            return;
        };
        if target.hp <= 0 {
            return;
        }
        if distance(cx, cy, target.x, target.y) > SKILL_RANGE {
            return;
        }

        target.hp = (target.hp - SKILL_DAMAGE).max(0);
        if let Some(caster) = self.players.get_mut(&caster_id) {
            caster.skill_cd = SKILL_COOLDOWN;
        }
    }

    /// Force a player's hp to zero (used when a player leaves mid-match)
    pub fn mark_dead(&mut self, player_id: Uuid) {
        if let Some(p) = self.players.get_mut(&player_id) {
            p.hp = 0;
        }
    }

    /// Advance one tick: cooldowns decay toward zero
    pub fn tick_forward(&mut self) {
        self.tick += 1;
        for p in self.players.values_mut() {
            if p.skill_cd > 0 {
                p.skill_cd -= 1;
            }
        }
    }

    /// Build the full-state broadcast for this tick
    pub fn snapshot(&self, room_id: Uuid) -> RoomSnapshot {
        let players = self
            .players
            .values()
            .map(|p| PlayerSnapshot {
                player_id: p.id.to_string(),
                x: p.x,
                y: p.y,
                hp: p.hp,
                skill_cd: p.skill_cd,
            })
            .collect();

        RoomSnapshot {
            room_id: room_id.to_string(),
            tick: self.tick,
            players,
        }
    }

    /// Terminal check: `(winner, true)` with exactly one player alive,
    /// `(None, true)` with none, `(None, false)` otherwise
    pub fn winner(&self) -> (Option<Uuid>, bool) {
        let mut alive = None;
        let mut count = 0;
        for p in self.players.values() {
            if p.hp > 0 {
                count += 1;
                alive = Some(p.id);
                if count > 1 {
                    return (None, false);
                }
            }
        }
        if count == 0 {
            return (None, true);
        }
        (alive, true)
    }
}

fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    let dx = x1 - x2;
    let dy = y1 - y2;
    (dx * dx + dy * dy).sqrt()
}
