//! Per-tick combat resolution.
//!
//! One invocation resolves two ordered phases: player attacks first, then
//! NPC retaliation. Events concatenate in phase order, append order within
//! a phase. Anything missing required state mid-tick is skipped without
//! affecting the rest of the tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::equipment::EquipmentResolver;
use crate::npc::{NpcId, NpcRoster};
use crate::rng::Rng64;
use crate::session::{PlayerSession, SessionRegistry};
use crate::world::WorldGraph;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombatEvent {
    Hit {
        attacker: String,
        defender: String,
        damage: i32,
        defender_hp: i32,
        defender_max_hp: i32,
        player_defender: bool,
        room: String,
    },
    NpcKilled {
        npc_id: NpcId,
        npc_name: String,
        killer: String,
        room: String,
    },
    PlayerKilled {
        player: String,
        killer: String,
        respawn_room: String,
        respawn_hp: i32,
        respawn_mp: i32,
    },
}

/// Unarmed damage roll span.
const UNARMED_RANGE: i32 = 3;

pub fn process_combat_tick(
    world: &WorldGraph,
    registry: &SessionRegistry,
    roster: &NpcRoster,
    resolver: &EquipmentResolver,
    rng: &mut Rng64,
) -> Vec<CombatEvent> {
    let mut events = Vec::new();

    let mut sessions = registry.authenticated();
    sessions.sort_by_key(|s| s.id);

    // Phase 1: player attacks.
    for s in &sessions {
        if !s.attack_mode() {
            continue;
        }
        let Some(name) = s.name() else {
            continue;
        };
        let Some(room) = s.room() else {
            continue;
        };

        // The selected target is revalidated every tick; staleness is the
        // normal case, not an error.
        let selected = s
            .target()
            .and_then(|id| roster.get(id))
            .filter(|n| n.alive() && n.combatant() && n.hostile && n.room == room);
        let target_id = match selected {
            Some(n) => n.id,
            None => {
                let hostiles = roster.hostile_alive_in_room(&room);
                if hostiles.is_empty() {
                    // Nothing to fight: drop out of attack mode quietly.
                    s.set_attack_mode(false);
                    s.set_target(None);
                    continue;
                }
                hostiles[rng.index(hostiles.len())].id
            }
        };

        let Some(sheet) = s.sheet_snapshot() else {
            continue;
        };
        let bonuses = resolver.combat_bonuses(&name);
        let damage = if bonuses.weapon_damage_range > 0 {
            sheet.stats.strength
                + bonuses.total_damage_bonus
                + rng.roll_range(1, bonuses.weapon_damage_range)
        } else {
            sheet.stats.strength + rng.roll_range(1, UNARMED_RANGE)
        };

        let Some((hp, max_hp, npc_name, killed)) = roster.with_mut(target_id, |n| {
            let hp = n.apply_damage(damage);
            (hp, n.max_hp, n.name.clone(), hp <= 0)
        }) else {
            continue;
        };

        events.push(CombatEvent::Hit {
            attacker: name.clone(),
            defender: npc_name.clone(),
            damage,
            defender_hp: hp,
            defender_max_hp: max_hp,
            player_defender: false,
            room: room.clone(),
        });
        if killed {
            events.push(CombatEvent::NpcKilled {
                npc_id: target_id,
                npc_name,
                killer: name,
                room,
            });
        }
    }

    // Phase 2: NPC retaliation, room by room.
    let mut by_room: BTreeMap<String, Vec<Arc<PlayerSession>>> = BTreeMap::new();
    for s in &sessions {
        if let Some(room) = s.room() {
            by_room.entry(room).or_default().push(Arc::clone(s));
        }
    }

    for (room, occupants) in by_room {
        let hostiles = roster.hostile_alive_in_room(&room);
        if hostiles.is_empty() {
            continue;
        }
        for npc in hostiles {
            // Players already at 0 hp this tick are not hit again.
            let standing: Vec<&Arc<PlayerSession>> = occupants
                .iter()
                .filter(|s| s.sheet_snapshot().is_some_and(|sh| sh.hp > 0))
                .collect();
            if standing.is_empty() {
                continue;
            }
            let victim = standing[rng.index(standing.len())];
            let Some(victim_name) = victim.name() else {
                continue;
            };

            let armor = resolver.combat_bonuses(&victim_name).effective_armor();
            let damage = (npc.damage - armor).max(1);

            let Some((hp, max_hp, max_mp, dead)) = victim.with_sheet_mut(|sh| {
                sh.hp = (sh.hp - damage).max(0);
                (sh.hp, sh.max_hp, sh.max_mp, sh.hp <= 0)
            }) else {
                continue;
            };

            events.push(CombatEvent::Hit {
                attacker: npc.name.clone(),
                defender: victim_name.clone(),
                damage,
                defender_hp: hp,
                defender_max_hp: max_hp,
                player_defender: true,
                room: room.clone(),
            });
            if dead {
                // The event carries the respawn target; applying it is the
                // consumer's job, not this phase's.
                events.push(CombatEvent::PlayerKilled {
                    player: victim_name,
                    killer: npc.name.clone(),
                    respawn_room: world.spawn_room().to_string(),
                    respawn_hp: max_hp,
                    respawn_mp: max_mp,
                });
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npc::{Behavior, NpcInstance};
    use crate::progression::AbilityScores;
    use crate::session::testutil::session;
    use crate::session::CharacterSheet;
    use crate::store::{MemoryInventoryStore, MemoryItemCatalog};
    use crate::world::testutil::graph;
    use std::collections::HashMap;

    fn sheet(strength: i32, hp: i32) -> CharacterSheet {
        CharacterSheet {
            class_id: "fighter".to_string(),
            level: 1,
            xp: 0,
            cp: 0,
            stats: AbilityScores {
                strength,
                dexterity: 10,
                constitution: 10,
                intelligence: 10,
                wisdom: 10,
                charisma: 10,
            },
            hp,
            max_hp: hp,
            mp: 8,
            max_mp: 8,
            skills: HashMap::new(),
        }
    }

    fn hostile(room: &str, hp: i32, damage: i32) -> NpcInstance {
        NpcInstance {
            id: 0,
            name: "rat".to_string(),
            description: String::new(),
            room: room.to_string(),
            zone: "town".to_string(),
            behavior: Behavior::Idle,
            pursuit: None,
            hostile: true,
            hp,
            max_hp: hp,
            damage,
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

    fn resolver() -> EquipmentResolver {
        EquipmentResolver::new(
            Arc::new(MemoryInventoryStore::new()),
            Arc::new(MemoryItemCatalog::new(&[])),
        )
    }

    #[test]
    fn lethal_hit_yields_hit_then_killed_in_one_tick() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let res = resolver();
        let mut rng = Rng64::from_seed(1);

        let (alice, _rx) = session(1, "alice", "t1");
        // Unarmed damage is strength + 1..=3, so 10 strength always clears
        // the rat's 10 hp.
        alice.set_sheet(sheet(10, 30));
        alice.set_attack_mode(true);
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        let rat = roster.spawn(hostile("t1", 10, 2));

        let events = process_combat_tick(&world, &reg, &roster, &res, &mut rng);
        assert!(matches!(
            &events[0],
            CombatEvent::Hit {
                player_defender: false,
                defender_hp: 0,
                ..
            }
        ));
        assert!(matches!(
            &events[1],
            CombatEvent::NpcKilled { npc_name, .. } if npc_name == "rat"
        ));
        // Dead rat cannot retaliate in phase 2 of the same tick.
        assert_eq!(events.len(), 2);
        assert!(roster.alive_in_room("t1").is_empty());
        assert_eq!(roster.get(rat).unwrap().hp, 0);
    }

    #[test]
    fn no_target_auto_disables_attack_mode() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let res = resolver();
        let mut rng = Rng64::from_seed(1);

        let (alice, _rx) = session(1, "alice", "t1");
        alice.set_sheet(sheet(10, 30));
        alice.set_attack_mode(true);
        alice.set_target(Some(999));
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        let events = process_combat_tick(&world, &reg, &roster, &res, &mut rng);
        assert!(events.is_empty());
        assert!(!alice.attack_mode());
        assert_eq!(alice.target(), None);
    }

    #[test]
    fn stale_selection_falls_back_to_a_room_hostile() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let res = resolver();
        let mut rng = Rng64::from_seed(1);

        let (alice, _rx) = session(1, "alice", "t1");
        alice.set_sheet(sheet(10, 30));
        alice.set_attack_mode(true);
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        // Selected target lives in another room; a local rat exists.
        let far = roster.spawn(hostile("t2", 50, 2));
        let near = roster.spawn(hostile("t1", 50, 2));
        alice.set_target(Some(far));

        let events = process_combat_tick(&world, &reg, &roster, &res, &mut rng);
        assert!(matches!(&events[0], CombatEvent::Hit { .. }));
        assert_eq!(roster.get(far).unwrap().hp, 50);
        assert!(roster.get(near).unwrap().hp < 50);
    }

    #[test]
    fn retaliation_damage_floors_at_one() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let res = resolver();
        let mut rng = Rng64::from_seed(1);

        let (alice, _rx) = session(1, "alice", "t1");
        alice.set_sheet(sheet(0, 30));
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        // Attack mode off: only phase 2 runs. Damage 0 - 0 armor floors to 1.
        roster.spawn(hostile("t1", 10, 0));
        let events = process_combat_tick(&world, &reg, &roster, &res, &mut rng);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            CombatEvent::Hit {
                damage: 1,
                player_defender: true,
                ..
            }
        ));
        assert_eq!(alice.sheet_snapshot().unwrap().hp, 29);
    }

    #[test]
    fn player_death_carries_respawn_values_without_applying_them() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let res = resolver();
        let mut rng = Rng64::from_seed(1);

        let (alice, _rx) = session(1, "alice", "t2");
        alice.set_sheet(sheet(0, 30));
        alice.with_sheet_mut(|sh| sh.hp = 2);
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        roster.spawn(hostile("t2", 10, 8));
        let events = process_combat_tick(&world, &reg, &roster, &res, &mut rng);
        assert_eq!(events.len(), 2);
        match &events[1] {
            CombatEvent::PlayerKilled {
                player,
                respawn_room,
                respawn_hp,
                respawn_mp,
                ..
            } => {
                assert_eq!(player, "alice");
                assert_eq!(respawn_room, "t1");
                assert_eq!(*respawn_hp, 30);
                assert_eq!(*respawn_mp, 8);
            }
            other => panic!("expected PlayerKilled, got {other:?}"),
        }
        // The event does not move or heal the player; the consumer does.
        assert_eq!(alice.room().as_deref(), Some("t2"));
        assert_eq!(alice.sheet_snapshot().unwrap().hp, 0);
    }

    #[test]
    fn phase_order_is_players_then_npcs() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let res = resolver();
        let mut rng = Rng64::from_seed(1);

        let (alice, _rx) = session(1, "alice", "t1");
        alice.set_sheet(sheet(1, 30));
        alice.set_attack_mode(true);
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        // Tough rat: survives phase 1, retaliates in phase 2.
        roster.spawn(hostile("t1", 100, 3));
        let events = process_combat_tick(&world, &reg, &roster, &res, &mut rng);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            CombatEvent::Hit {
                player_defender: false,
                ..
            }
        ));
        assert!(matches!(
            &events[1],
            CombatEvent::Hit {
                player_defender: true,
                ..
            }
        ));
    }

    #[test]
    fn noncombat_npcs_neither_fight_nor_are_fought() {
        let world = graph();
        let reg = SessionRegistry::new();
        let roster = NpcRoster::new();
        let res = resolver();
        let mut rng = Rng64::from_seed(1);

        let (alice, _rx) = session(1, "alice", "t1");
        alice.set_sheet(sheet(5, 30));
        alice.set_attack_mode(true);
        reg.insert(Arc::clone(&alice));
        assert!(reg.bind_name(alice.id, "alice"));

        // A shopkeeper with max_hp 0 is scenery: not targetable, never hits.
        let mut keeper = hostile("t1", 0, 50);
        keeper.max_hp = 0;
        keeper.name = "keeper".to_string();
        roster.spawn(keeper);

        let events = process_combat_tick(&world, &reg, &roster, &res, &mut rng);
        assert!(events.is_empty());
        assert!(!alice.attack_mode());
    }
}
