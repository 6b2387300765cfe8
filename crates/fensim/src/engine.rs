//! The engine owns all live simulation state and exposes two entry points:
//! [`Engine::handle_command`] for connection tasks and [`Engine::tick`] for
//! the single tick-driver task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use fenproto::event::NpcView;
use fenproto::{ServerEvent, SessionId};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::combat::{self, CombatEvent};
use crate::content::{SkillDef, SpellDef, WorldFile};
use crate::effects;
use crate::equipment::EquipmentResolver;
use crate::ground::GroundEconomy;
use crate::npc::{NpcId, NpcRoster, TrailLog};
use crate::progression;
use crate::rng::Rng64;
use crate::session::{relock, PlayerSession, SessionRegistry};
use crate::store::{
    ClassCatalog, CoinLedger, DiscoveryStore, InventoryStore, ItemCatalog, MemoryClassCatalog,
    MemoryCoinLedger, MemoryDiscoveryStore, MemoryInventoryStore, MemoryItemCatalog,
    MemoryPlayerStore, PlayerStore,
};
use crate::world::WorldGraph;

/// Persistence collaborators the engine calls but does not implement.
pub struct Stores {
    pub players: Arc<dyn PlayerStore>,
    pub coins: Arc<dyn CoinLedger>,
    pub inventory: Arc<dyn InventoryStore>,
    pub discovery: Arc<dyn DiscoveryStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            players: Arc::new(MemoryPlayerStore::new()),
            coins: Arc::new(MemoryCoinLedger::new()),
            inventory: Arc::new(MemoryInventoryStore::new()),
            discovery: Arc::new(MemoryDiscoveryStore::new()),
        }
    }
}

pub struct Engine {
    pub(crate) world: WorldGraph,
    pub(crate) registry: SessionRegistry,
    pub(crate) roster: NpcRoster,
    pub(crate) ground: GroundEconomy,
    pub(crate) trail: TrailLog,
    pub(crate) resolver: EquipmentResolver,
    pub(crate) players: Arc<dyn PlayerStore>,
    pub(crate) coins: Arc<dyn CoinLedger>,
    pub(crate) inventory: Arc<dyn InventoryStore>,
    pub(crate) discovery: Arc<dyn DiscoveryStore>,
    pub(crate) items: Arc<dyn ItemCatalog>,
    pub(crate) classes: Arc<dyn ClassCatalog>,
    pub(crate) skills: HashMap<String, SkillDef>,
    pub(crate) spells: HashMap<String, SpellDef>,
    pub(crate) rng: Mutex<Rng64>,
    next_session: AtomicU64,
    started: Instant,
}

impl Engine {
    /// Build the engine from a content descriptor. The item and class
    /// catalogs come from the descriptor; the stores come from the caller.
    pub fn new(wf: &WorldFile, stores: Stores, seed: u64) -> anyhow::Result<Self> {
        let world = WorldGraph::build(wf)?;
        let roster = NpcRoster::new();
        for def in &wf.npcs {
            roster.spawn_from(def, &world);
        }
        let items: Arc<dyn ItemCatalog> = Arc::new(MemoryItemCatalog::new(&wf.items));
        let classes: Arc<dyn ClassCatalog> = Arc::new(MemoryClassCatalog::new(&wf.classes));
        let resolver = EquipmentResolver::new(Arc::clone(&stores.inventory), Arc::clone(&items));

        info!(
            rooms = world.rooms().count(),
            npcs = wf.npcs.len(),
            "world loaded"
        );

        Ok(Self {
            world,
            registry: SessionRegistry::new(),
            roster,
            ground: GroundEconomy::new(),
            trail: TrailLog::new(),
            resolver,
            players: stores.players,
            coins: stores.coins,
            inventory: stores.inventory,
            discovery: stores.discovery,
            items,
            classes,
            skills: wf.skills.iter().map(|s| (s.id.clone(), s.clone())).collect(),
            spells: wf.spells.iter().map(|s| (s.id.clone(), s.clone())).collect(),
            rng: Mutex::new(Rng64::from_seed(seed)),
            next_session: AtomicU64::new(1),
            started: Instant::now(),
        })
    }

    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn world(&self) -> &WorldGraph {
        &self.world
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn roster(&self) -> &NpcRoster {
        &self.roster
    }

    pub fn ground(&self) -> &GroundEconomy {
        &self.ground
    }

    /// Register a new connection. Events for it flow through `outbox`.
    pub fn connect(&self, outbox: mpsc::UnboundedSender<ServerEvent>) -> SessionId {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(PlayerSession::new(id, outbox, self.now_ms()));
        self.registry.insert(session);
        id
    }

    /// Tear a connection down: unregister first so the next tick never sees
    /// it, then persist. A failed save is logged, never fatal; the live
    /// state already won.
    pub fn disconnect(&self, id: SessionId) {
        let Some(s) = self.registry.remove(id) else {
            return;
        };
        let Some(name) = s.name() else {
            return;
        };
        if let Some(sheet) = s.sheet_snapshot() {
            if let Err(e) = self.players.save(&name, &sheet, s.room().as_deref()) {
                warn!(player = %name, err = %e, "save on disconnect failed");
            }
        }
        if let Some(room) = s.room() {
            if !s.hidden() {
                self.registry.broadcast_room(
                    &room,
                    &ServerEvent::PlayerLeft {
                        name: name.clone(),
                        room_id: room.clone(),
                    },
                    Some(&name),
                );
            }
        }
        info!(player = %name, session = %id, "disconnected");
    }

    /// Advance the simulation one tick. Called by exactly one driver task;
    /// phase order (NPC movement, player attacks, NPC retaliation, effects)
    /// is fixed.
    pub fn tick(&self) {
        self.tick_at(self.now_ms());
    }

    pub fn tick_at(&self, now_ms: u64) {
        let mut rng = relock(&self.rng);

        // NPC behavior phase.
        let moves = self
            .roster
            .tick(&self.world, &self.registry, &self.trail, now_ms, &mut rng);
        for m in &moves {
            self.registry.broadcast_room(
                &m.from,
                &ServerEvent::NpcLeft {
                    npc_id: m.npc_id,
                    name: m.name.clone(),
                    room_id: m.from.clone(),
                    dir: m.dir,
                },
                None,
            );
            self.registry.broadcast_room(
                &m.to,
                &ServerEvent::NpcEntered {
                    npc: NpcView {
                        id: m.npc_id,
                        name: m.name.clone(),
                        hostile: m.hostile,
                        hp: m.hp.max(0),
                        max_hp: m.max_hp,
                        level: self.roster.get(m.npc_id).map_or(1, |n| n.level),
                    },
                    room_id: m.to.clone(),
                    dir: m.dir,
                },
                None,
            );
        }

        // Combat phase: player attacks, then NPC retaliation.
        let events = combat::process_combat_tick(
            &self.world,
            &self.registry,
            &self.roster,
            &self.resolver,
            &mut rng,
        );
        for ev in events {
            match ev {
                CombatEvent::Hit {
                    attacker,
                    defender,
                    damage,
                    defender_hp,
                    defender_max_hp,
                    player_defender,
                    room,
                } => {
                    self.registry.broadcast_room(
                        &room,
                        &ServerEvent::CombatHit {
                            attacker,
                            defender,
                            damage,
                            defender_hp,
                            defender_max_hp,
                            player_defender,
                            room_id: room.clone(),
                        },
                        None,
                    );
                }
                CombatEvent::NpcKilled {
                    npc_id,
                    npc_name,
                    killer,
                    room,
                } => {
                    self.registry.broadcast_room(
                        &room,
                        &ServerEvent::NpcKilled {
                            npc_id,
                            npc_name,
                            killer: killer.clone(),
                            room_id: room.clone(),
                        },
                        None,
                    );
                    self.settle_npc_kill(npc_id, &killer, &room, &mut rng);
                }
                CombatEvent::PlayerKilled {
                    player,
                    killer,
                    respawn_room,
                    respawn_hp,
                    respawn_mp,
                } => {
                    self.apply_respawn(&player, &killer, &respawn_room, respawn_hp, respawn_mp);
                }
            }
        }

        // Timed effects.
        for s in self.registry.authenticated() {
            for ev in effects::tick_session_effects(&s, now_ms) {
                s.send(ev);
            }
        }

        self.trail.prune(now_ms);
    }

    /// Loot and XP for a fresh NPC corpse.
    pub(crate) fn settle_npc_kill(&self, npc_id: NpcId, killer: &str, room: &str, rng: &mut Rng64) {
        let Some(npc) = self.roster.get(npc_id) else {
            return;
        };

        let mut dropped = false;
        for entry in &npc.loot {
            if entry.chance <= 0.0 {
                continue;
            }
            let pct = (entry.chance * 100.0).round() as i32;
            if !rng.chance(pct) {
                continue;
            }
            let qty = if entry.max > entry.min {
                rng.roll_range(entry.min as i32, entry.max as i32) as u32
            } else {
                entry.min
            };
            if qty > 0 {
                self.ground
                    .add_items(room, &[(entry.item_id.clone(), qty)]);
                dropped = true;
            }
        }
        for c in &npc.coins {
            let amount = if c.max > c.min {
                rng.roll_range(c.min as i32, c.max as i32) as u64
            } else {
                c.min
            };
            if amount > 0 {
                self.ground.add_coins(room, c.denomination, amount);
                dropped = true;
            }
        }
        if dropped {
            self.registry.broadcast_room(
                room,
                &ServerEvent::GroundChanged {
                    room_id: room.to_string(),
                    ground: self.ground.view(room),
                },
                None,
            );
        }

        if let Some(s) = self.registry.get_by_name(killer) {
            let player_level = s.sheet_snapshot().map_or(1, |sh| sh.level);
            let gained = progression::xp_for_kill(npc.level, player_level, npc.base_xp);
            self.award_xp(&s, gained);
        }
    }

    pub(crate) fn award_xp(&self, s: &Arc<PlayerSession>, amount: u64) {
        let class = s
            .sheet_snapshot()
            .and_then(|sh| self.classes.get_class(&sh.class_id));
        let Some((levels, level, cp)) = s.with_sheet_mut(|sh| {
            sh.xp = sh.xp.saturating_add(amount);
            let mut levels = 0u32;
            let mut cp = 0u32;
            while progression::ready_to_level(sh.xp, progression::xp_for_level(sh.level), sh.level)
            {
                sh.level += 1;
                let grant = progression::cp_for_level(sh.level);
                sh.cp += grant;
                cp += grant;
                levels += 1;
            }
            if levels > 0 {
                if let Some(c) = &class {
                    let new_hp = progression::max_hp_for(c, &sh.stats, sh.level);
                    let new_mp = progression::max_mp_for(c, &sh.stats, sh.level);
                    sh.hp += (new_hp - sh.max_hp).max(0);
                    sh.mp += (new_mp - sh.max_mp).max(0);
                    sh.max_hp = new_hp;
                    sh.max_mp = new_mp;
                }
            }
            (levels, sh.level, cp)
        }) else {
            return;
        };

        s.send(ServerEvent::SystemMessage {
            text: format!("you gain {amount} xp."),
        });
        if levels > 0 {
            s.send(ServerEvent::SystemMessage {
                text: format!("you reach level {level} (+{cp} cp)."),
            });
        }
    }

    /// Apply the respawn transition a PlayerKilled event describes.
    fn apply_respawn(
        &self,
        player: &str,
        killer: &str,
        respawn_room: &str,
        respawn_hp: i32,
        respawn_mp: i32,
    ) {
        let Some(s) = self.registry.get_by_name(player) else {
            return;
        };
        let death_room = s.room();

        s.send(ServerEvent::PlayerKilled {
            player: player.to_string(),
            killer: killer.to_string(),
            respawn_room: respawn_room.to_string(),
            respawn_hp,
            respawn_mp,
        });

        s.with_sheet_mut(|sh| {
            sh.hp = respawn_hp;
            sh.mp = respawn_mp;
        });
        s.set_attack_mode(false);
        s.set_target(None);
        s.set_room(respawn_room);

        if let Some(dr) = death_room {
            self.registry.broadcast_room(
                &dr,
                &ServerEvent::PlayerLeft {
                    name: player.to_string(),
                    room_id: dr.clone(),
                },
                Some(player),
            );
        }
        self.registry.broadcast_room(
            respawn_room,
            &ServerEvent::PlayerEntered {
                name: player.to_string(),
                room_id: respawn_room.to_string(),
            },
            Some(player),
        );
        if let Some(info) = self.room_info_for(&s) {
            s.send(info);
        }
    }

    /// RoomInfo for wherever the session currently stands.
    pub(crate) fn room_info_for(&self, s: &Arc<PlayerSession>) -> Option<ServerEvent> {
        let room_id = s.room()?;
        let room = self.world.room(&room_id)?;
        let mut players = self.registry.visible_names_in_room(&room_id);
        if let Some(me) = s.name() {
            players.retain(|n| *n != me);
        }
        let npcs = self
            .roster
            .alive_in_room(&room_id)
            .iter()
            .map(|n| n.view())
            .collect();
        Some(ServerEvent::RoomInfo {
            room: room.view(),
            players,
            npcs,
            ground: self.ground.view(&room_id),
        })
    }

    /// Hostiles in the room a player just left may give chase: the player's
    /// own combat target always does, the rest roll their perception.
    pub(crate) fn trigger_pursuits(
        &self,
        player: &str,
        from_room: &str,
        player_target: Option<NpcId>,
        rng: &mut Rng64,
    ) {
        for npc in self.roster.hostile_alive_in_room(from_room) {
            if npc.pursuit.is_some() {
                continue;
            }
            let gives_chase = player_target == Some(npc.id)
                || (npc.perception > 0 && rng.chance(npc.perception));
            if gives_chase {
                self.roster.begin_pursuit(npc.id, player);
            }
        }
    }
}
