//! NPC instances and their behavior state machines.
//!
//! Every NPC carries a permanent behavior (idle, patrol, wander) and may
//! temporarily carry a pursuit override. The override signals completion
//! through a readable flag; the roster observes it after each tick and
//! drops the override, which restores the permanent behavior without ever
//! having lost it.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use fenproto::event::NpcView;
use fenproto::Direction;
use tracing::warn;

use crate::content::{BehaviorDef, CoinDropDef, LootEntry, NpcDef};
use crate::rng::Rng64;
use crate::session::SessionRegistry;
use crate::world::WorldGraph;

pub type NpcId = u64;

/// Pursuit gives up after this many ticks no matter what.
pub const PURSUIT_MAX_TICKS: u32 = 30;
/// Pursuit ends after this many consecutive trail misses.
pub const PURSUIT_LOST_TRAIL_TICKS: u32 = 5;
/// Ticks between pursuit moves.
pub const PURSUIT_MOVE_INTERVAL: u32 = 2;
/// Movement trails evaporate after this long.
pub const TRAIL_TTL_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NpcAction {
    None,
    MoveTo(String),
}

#[derive(Debug, Clone)]
pub struct PatrolState {
    route: Vec<String>,
    interval: u32,
    counter: u32,
    index: usize,
}

impl PatrolState {
    pub fn new(route: Vec<String>, interval: u32) -> Self {
        Self {
            route,
            interval: interval.max(1),
            counter: 0,
            index: 0,
        }
    }

    fn tick(&mut self, current_room: &str) -> NpcAction {
        if self.route.len() < 2 {
            return NpcAction::None;
        }
        self.counter += 1;
        if self.counter < self.interval {
            return NpcAction::None;
        }
        self.counter = 0;
        self.index = (self.index + 1) % self.route.len();
        let stop = &self.route[self.index];
        if stop == current_room {
            NpcAction::None
        } else {
            NpcAction::MoveTo(stop.clone())
        }
    }
}

#[derive(Debug, Clone)]
pub struct WanderState {
    interval: u32,
    counter: u32,
}

impl WanderState {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            counter: 0,
        }
    }

    /// Wander stays inside the NPC's own zone. The counter resets on the
    /// interval even when there is nowhere to go.
    fn tick(&mut self, room_id: &str, zone: &str, world: &WorldGraph, rng: &mut Rng64) -> NpcAction {
        self.counter += 1;
        if self.counter < self.interval {
            return NpcAction::None;
        }
        self.counter = 0;
        let Some(room) = world.room(room_id) else {
            return NpcAction::None;
        };
        let exits = world.zone_exits(room, zone);
        if exits.is_empty() {
            return NpcAction::None;
        }
        let (_, to) = exits[rng.index(exits.len())];
        NpcAction::MoveTo(to.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Idle,
    Patrol(PatrolState),
    Wander(WanderState),
}

impl Behavior {
    pub fn from_def(def: &BehaviorDef) -> Self {
        match def {
            BehaviorDef::Idle => Behavior::Idle,
            BehaviorDef::Patrol { route, interval } => {
                Behavior::Patrol(PatrolState::new(route.clone(), *interval))
            }
            BehaviorDef::Wander { interval } => Behavior::Wander(WanderState::new(*interval)),
        }
    }
}

/// Movement-trail collaborator consulted by pursuing NPCs.
pub trait MovementTrail: Send + Sync {
    /// Freshest direction `player` recently left `room_id` by, if any trail
    /// is still warm.
    fn freshest_trail(&self, room_id: &str, player: &str, now_ms: u64) -> Option<Direction>;
}

#[derive(Debug, Clone)]
struct TrailEntry {
    player: String,
    dir: Direction,
    at_ms: u64,
}

/// In-memory movement trails, fed by the move handler.
#[derive(Default)]
pub struct TrailLog {
    by_room: DashMap<String, Vec<TrailEntry>>,
}

impl TrailLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, room_id: &str, player: &str, dir: Direction, now_ms: u64) {
        let mut v = self.by_room.entry(room_id.to_string()).or_default();
        // One trail per player per room: the freshest wins.
        v.retain(|e| e.player != player);
        v.push(TrailEntry {
            player: player.to_string(),
            dir,
            at_ms: now_ms,
        });
    }

    pub fn prune(&self, now_ms: u64) {
        self.by_room
            .retain(|_, v| {
                v.retain(|e| now_ms.saturating_sub(e.at_ms) <= TRAIL_TTL_MS);
                !v.is_empty()
            });
    }
}

impl MovementTrail for TrailLog {
    fn freshest_trail(&self, room_id: &str, player: &str, now_ms: u64) -> Option<Direction> {
        let v = self.by_room.get(room_id)?;
        v.iter()
            .filter(|e| e.player == player)
            .filter(|e| now_ms.saturating_sub(e.at_ms) <= TRAIL_TTL_MS)
            .max_by_key(|e| e.at_ms)
            .map(|e| e.dir)
    }
}

/// Transient pursuit override. Never content-authored.
#[derive(Debug, Clone)]
pub struct Pursuit {
    pub target: String,
    duration: u32,
    lost: u32,
    counter: u32,
    ended: bool,
}

struct PursuitContext {
    target_here: bool,
    target_hidden: bool,
    trail_room: Option<String>,
}

impl Pursuit {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            duration: 0,
            lost: 0,
            counter: 0,
            ended: false,
        }
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    fn tick(&mut self, ctx: PursuitContext) -> NpcAction {
        self.duration += 1;
        if self.duration > PURSUIT_MAX_TICKS {
            self.ended = true;
            return NpcAction::None;
        }
        if ctx.target_here {
            // Caught up; combat resumes on its own.
            self.ended = true;
            return NpcAction::None;
        }
        if ctx.target_hidden {
            self.ended = true;
            return NpcAction::None;
        }
        self.counter += 1;
        if self.counter < PURSUIT_MOVE_INTERVAL {
            return NpcAction::None;
        }
        self.counter = 0;
        match ctx.trail_room {
            Some(to) => {
                self.lost = 0;
                NpcAction::MoveTo(to)
            }
            None => {
                self.lost += 1;
                if self.lost > PURSUIT_LOST_TRAIL_TICKS {
                    self.ended = true;
                }
                NpcAction::None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct NpcInstance {
    pub id: NpcId,
    pub name: String,
    pub description: String,
    pub room: String,
    pub zone: String,
    pub behavior: Behavior,
    pub pursuit: Option<Pursuit>,
    pub hostile: bool,
    pub hp: i32,
    pub max_hp: i32,
    pub damage: i32,
    pub level: u32,
    pub accuracy: i32,
    pub defense: i32,
    pub evasion: i32,
    pub perception: i32,
    pub base_xp: u64,
    pub loot: Vec<LootEntry>,
    pub coins: Vec<CoinDropDef>,
}

impl NpcInstance {
    /// Non-combat NPCs (max_hp == 0) are always alive.
    pub fn alive(&self) -> bool {
        self.max_hp == 0 || self.hp > 0
    }

    pub fn combatant(&self) -> bool {
        self.max_hp > 0
    }

    /// Subtract damage, clamping the stored value into [0, max_hp].
    /// Returns the clamped hp.
    pub fn apply_damage(&mut self, dmg: i32) -> i32 {
        self.hp = (self.hp - dmg).clamp(0, self.max_hp);
        self.hp
    }

    pub fn view(&self) -> NpcView {
        NpcView {
            id: self.id,
            name: self.name.clone(),
            hostile: self.hostile,
            hp: self.hp.max(0),
            max_hp: self.max_hp,
            level: self.level,
        }
    }
}

/// One NPC relocation, for client display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpcMoved {
    pub npc_id: NpcId,
    pub name: String,
    pub from: String,
    pub to: String,
    pub dir: Option<Direction>,
    pub hostile: bool,
    pub hp: i32,
    pub max_hp: i32,
}

#[derive(Default)]
pub struct NpcRoster {
    npcs: DashMap<NpcId, NpcInstance>,
    next_id: AtomicU64,
}

impl NpcRoster {
    pub fn new() -> Self {
        Self {
            npcs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Instantiate a content-authored NPC. Unknown start rooms are dropped
    /// with a warning rather than failing the load.
    pub fn spawn_from(&self, def: &NpcDef, world: &WorldGraph) -> Option<NpcId> {
        let Some(room) = world.room(&def.room) else {
            warn!(npc = %def.name, room = %def.room, "npc start room missing; skipped");
            return None;
        };
        let npc = NpcInstance {
            id: 0,
            name: def.name.clone(),
            description: def.description.clone(),
            room: def.room.clone(),
            zone: room.zone.clone(),
            behavior: Behavior::from_def(&def.behavior),
            pursuit: None,
            hostile: def.hostile,
            hp: def.hp,
            max_hp: def.hp,
            damage: def.damage,
            level: def.level,
            accuracy: def.accuracy,
            defense: def.defense,
            evasion: def.evasion,
            perception: def.perception,
            base_xp: def.base_xp,
            loot: def.loot.clone(),
            coins: def.coins.clone(),
        };
        Some(self.spawn(npc))
    }

    pub fn spawn(&self, mut npc: NpcInstance) -> NpcId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        npc.id = id;
        self.npcs.insert(id, npc);
        id
    }

    pub fn get(&self, id: NpcId) -> Option<NpcInstance> {
        self.npcs.get(&id).map(|e| e.value().clone())
    }

    pub fn with_mut<R>(&self, id: NpcId, f: impl FnOnce(&mut NpcInstance) -> R) -> Option<R> {
        self.npcs.get_mut(&id).map(|mut e| f(e.value_mut()))
    }

    pub fn alive_in_room(&self, room: &str) -> Vec<NpcInstance> {
        let mut out: Vec<NpcInstance> = self
            .npcs
            .iter()
            .filter(|e| e.room == room && e.alive())
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|n| n.id);
        out
    }

    pub fn hostile_alive_in_room(&self, room: &str) -> Vec<NpcInstance> {
        self.alive_in_room(room)
            .into_iter()
            .filter(|n| n.hostile && n.combatant())
            .collect()
    }

    /// Replace the active behavior with a pursuit of `target`. The
    /// permanent behavior stays in place and resumes when pursuit ends.
    pub fn begin_pursuit(&self, id: NpcId, target: &str) {
        if let Some(mut e) = self.npcs.get_mut(&id) {
            if e.pursuit.is_none() {
                e.pursuit = Some(Pursuit::new(target));
            }
        }
    }

    /// Advance every living NPC one tick and relocate the movers.
    pub fn tick(
        &self,
        world: &WorldGraph,
        registry: &SessionRegistry,
        trail: &dyn MovementTrail,
        now_ms: u64,
        rng: &mut Rng64,
    ) -> Vec<NpcMoved> {
        let mut moves = Vec::new();

        let mut ids: Vec<NpcId> = self.npcs.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        for id in ids {
            let Some(mut entry) = self.npcs.get_mut(&id) else {
                continue;
            };
            let npc = entry.value_mut();
            if npc.combatant() && npc.hp <= 0 {
                continue;
            }

            let room = npc.room.clone();
            let zone = npc.zone.clone();

            let action = if let Some(p) = npc.pursuit.as_mut() {
                let target = registry.get_by_name(&p.target);
                let target_here = target
                    .as_ref()
                    .is_some_and(|s| s.room().as_deref() == Some(room.as_str()));
                // A vanished target reads as hidden: pursuit ends either way.
                let target_hidden = target.as_ref().map_or(true, |s| s.hidden());
                let trail_room = trail
                    .freshest_trail(&room, &p.target, now_ms)
                    .and_then(|d| world.room(&room).and_then(|r| r.exit(d)))
                    .map(str::to_string);
                let action = p.tick(PursuitContext {
                    target_here,
                    target_hidden,
                    trail_room,
                });
                if p.ended() {
                    npc.pursuit = None;
                }
                action
            } else {
                match &mut npc.behavior {
                    Behavior::Idle => NpcAction::None,
                    Behavior::Patrol(p) => p.tick(&room),
                    Behavior::Wander(w) => w.tick(&room, &zone, world, rng),
                }
            };

            let NpcAction::MoveTo(to) = action else {
                continue;
            };
            if to == npc.room {
                continue;
            }
            // Cross-zone pursuit moves may have no matching exit key; the
            // NPC still relocates, the event just carries no direction.
            let dir = world.room(&npc.room).and_then(|r| r.direction_to(&to));
            let from = std::mem::replace(&mut npc.room, to.clone());
            moves.push(NpcMoved {
                npc_id: npc.id,
                name: npc.name.clone(),
                from,
                to,
                dir,
                hostile: npc.hostile,
                hp: npc.hp,
                max_hp: npc.max_hp,
            });
        }

        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testutil::session;
    use crate::world::testutil::graph;
    use std::sync::Arc;

    fn npc_at(room: &str, zone: &str, behavior: Behavior) -> NpcInstance {
        NpcInstance {
            id: 0,
            name: "rat".to_string(),
            description: String::new(),
            room: room.to_string(),
            zone: zone.to_string(),
            behavior,
            pursuit: None,
            hostile: true,
            hp: 10,
            max_hp: 10,
            damage: 2,
            level: 1,
            accuracy: 0,
            defense: 0,
            evasion: 0,
            perception: 0,
            base_xp: 10,
            loot: Vec::new(),
            coins: Vec::new(),
        }
    }

    struct NoTrail;
    impl MovementTrail for NoTrail {
        fn freshest_trail(&self, _: &str, _: &str, _: u64) -> Option<Direction> {
            None
        }
    }

    #[test]
    fn patrol_fires_on_the_nth_tick_and_wraps() {
        let mut p = PatrolState::new(
            vec!["t1".to_string(), "t2".to_string(), "t3".to_string()],
            3,
        );
        let mut room = "t1".to_string();
        let mut moves = Vec::new();
        for tick in 1..=18 {
            match p.tick(&room) {
                NpcAction::None => assert_ne!(tick % 3, 0, "tick {tick} should have moved"),
                NpcAction::MoveTo(to) => {
                    assert_eq!(tick % 3, 0, "tick {tick} moved early");
                    room = to.clone();
                    moves.push(to);
                }
            }
        }
        // Period 3, wrapping t3 -> t1 forever.
        assert_eq!(moves, vec!["t2", "t3", "t1", "t2", "t3", "t1"]);
    }

    #[test]
    fn patrol_with_short_route_never_moves() {
        let mut p = PatrolState::new(vec!["t1".to_string()], 1);
        for _ in 0..10 {
            assert_eq!(p.tick("t1"), NpcAction::None);
        }
    }

    #[test]
    fn wander_never_leaves_its_zone() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        // t3 exits: west -> t2 (town), down -> s1 (sewer).
        roster.spawn(npc_at("t3", "town", Behavior::Wander(WanderState::new(1))));
        let mut rng = Rng64::from_seed(11);

        for _ in 0..50 {
            for m in roster.tick(&world, &reg, &NoTrail, 0, &mut rng) {
                assert_ne!(m.to, "s1", "wander crossed a zone boundary");
            }
        }
    }

    #[test]
    fn wander_with_no_same_zone_exit_stays_put() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        // s1's only exit goes up into town; a sewer-bound NPC is stuck.
        let id = roster.spawn(npc_at("s1", "sewer", Behavior::Wander(WanderState::new(1))));
        let mut rng = Rng64::from_seed(5);

        for _ in 0..20 {
            assert!(roster.tick(&world, &reg, &NoTrail, 0, &mut rng).is_empty());
        }
        assert_eq!(roster.get(id).unwrap().room, "s1");
    }

    #[test]
    fn dead_npcs_do_not_tick() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let id = roster.spawn(npc_at("t1", "town", Behavior::Wander(WanderState::new(1))));
        roster.with_mut(id, |n| n.hp = 0);
        let mut rng = Rng64::from_seed(5);
        assert!(roster.tick(&world, &reg, &NoTrail, 0, &mut rng).is_empty());
        assert!(roster.alive_in_room("t1").is_empty());
    }

    #[test]
    fn noncombat_npcs_are_always_alive() {
        let mut n = npc_at("t1", "town", Behavior::Idle);
        n.hp = 0;
        n.max_hp = 0;
        assert!(n.alive());
        assert!(!n.combatant());
    }

    #[test]
    fn damage_clamps_into_bounds() {
        let mut n = npc_at("t1", "town", Behavior::Idle);
        assert_eq!(n.apply_damage(25), 0);
        assert_eq!(n.hp, 0);
        assert_eq!(n.apply_damage(-50), 10); // healing caps at max_hp
    }

    #[test]
    fn pursuit_follows_trail_then_restores_behavior() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let trail = TrailLog::new();
        let mut rng = Rng64::from_seed(9);

        let (alice, _rx) = session(1, "alice", "t2");
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        let id = roster.spawn(npc_at("t1", "town", Behavior::Idle));
        roster.begin_pursuit(id, "alice");
        trail.record("t1", "alice", Direction::East, 0);

        // Move interval is 2: first tick holds, second follows east.
        assert!(roster.tick(&world, &reg, &trail, 0, &mut rng).is_empty());
        let moves = roster.tick(&world, &reg, &trail, 0, &mut rng);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].to, "t2");
        assert_eq!(moves[0].dir, Some(Direction::East));

        // Co-located with the target now: pursuit ends, override is gone.
        roster.tick(&world, &reg, &trail, 0, &mut rng);
        let npc = roster.get(id).unwrap();
        assert!(npc.pursuit.is_none());
        assert_eq!(npc.room, "t2");
    }

    #[test]
    fn pursuit_of_a_hidden_target_ends() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let mut rng = Rng64::from_seed(9);

        let (alice, _rx) = session(1, "alice", "t3");
        alice.set_hidden(true);
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        let id = roster.spawn(npc_at("t1", "town", Behavior::Idle));
        roster.begin_pursuit(id, "alice");
        roster.tick(&world, &reg, &NoTrail, 0, &mut rng);
        assert!(roster.get(id).unwrap().pursuit.is_none());
    }

    #[test]
    fn pursuit_gives_up_after_losing_the_trail() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let mut rng = Rng64::from_seed(9);

        let (alice, _rx) = session(1, "alice", "t3");
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        let id = roster.spawn(npc_at("t1", "town", Behavior::Idle));
        roster.begin_pursuit(id, "alice");

        // No trail anywhere: the lost counter climbs on each move attempt
        // until pursuit ends on its own.
        for _ in 0..(PURSUIT_MOVE_INTERVAL * (PURSUIT_LOST_TRAIL_TICKS + 1) + 1) {
            roster.tick(&world, &reg, &NoTrail, 0, &mut rng);
        }
        let npc = roster.get(id).unwrap();
        assert!(npc.pursuit.is_none());
        assert_eq!(npc.room, "t1");
    }

    #[test]
    fn trail_log_keeps_the_freshest_entry_and_expires() {
        let t = TrailLog::new();
        t.record("t1", "alice", Direction::East, 1_000);
        t.record("t1", "alice", Direction::West, 2_000);
        assert_eq!(
            t.freshest_trail("t1", "alice", 2_500),
            Some(Direction::West)
        );
        assert_eq!(t.freshest_trail("t1", "bob", 2_500), None);
        // Past the TTL the trail is cold.
        assert_eq!(t.freshest_trail("t1", "alice", 2_000 + TRAIL_TTL_MS + 1), None);
        t.prune(2_000 + TRAIL_TTL_MS + 1);
        assert_eq!(t.freshest_trail("t1", "alice", 2_000), None);
    }
}
