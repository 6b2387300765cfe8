//! World-content descriptor.
//!
//! Everything content-authored comes in through one JSON document: zones
//! and rooms, NPC definitions with behavior and loot, and the item, skill,
//! spell and class catalogs. The descriptor is plain data; [`crate::world`]
//! and the catalogs validate it at load.

use std::collections::HashMap;

use anyhow::Context;
use fenproto::Denomination;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct WorldFile {
    pub start_room: String,
    pub zones: Vec<ZoneDef>,
    #[serde(default)]
    pub npcs: Vec<NpcDef>,
    #[serde(default)]
    pub items: Vec<ItemDef>,
    #[serde(default)]
    pub skills: Vec<SkillDef>,
    #[serde(default)]
    pub spells: Vec<SpellDef>,
    #[serde(default)]
    pub classes: Vec<ClassDef>,
}

impl WorldFile {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("parse world content")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneDef {
    pub id: String,
    pub name: String,
    pub rooms: Vec<RoomDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomDef {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub coords: [i32; 3],
    /// direction token -> destination room id
    #[serde(default)]
    pub exits: HashMap<String, String>,
    #[serde(default)]
    pub locked: Vec<LockedExitDef>,
    #[serde(default)]
    pub interactables: Vec<InteractableDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockedExitDef {
    pub dir: String,
    #[serde(default)]
    pub key_item: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractableDef {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NpcDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub room: String,
    #[serde(default = "BehaviorDef::idle")]
    pub behavior: BehaviorDef,
    #[serde(default)]
    pub hostile: bool,
    /// 0 means a non-combat NPC: always alive, never targetable.
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub damage: i32,
    #[serde(default = "one")]
    pub level: u32,
    #[serde(default)]
    pub accuracy: i32,
    #[serde(default)]
    pub defense: i32,
    #[serde(default)]
    pub evasion: i32,
    /// d100 chance to start pursuing a player who leaves the room.
    #[serde(default)]
    pub perception: i32,
    #[serde(default)]
    pub base_xp: u64,
    #[serde(default)]
    pub loot: Vec<LootEntry>,
    #[serde(default)]
    pub coins: Vec<CoinDropDef>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BehaviorDef {
    Idle,
    Patrol { route: Vec<String>, interval: u32 },
    Wander { interval: u32 },
}

impl BehaviorDef {
    fn idle() -> Self {
        BehaviorDef::Idle
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LootEntry {
    pub item_id: String,
    /// 0.0..=1.0
    pub chance: f64,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinDropDef {
    pub denomination: Denomination,
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 0 means vendors do not sell it.
    #[serde(default)]
    pub price_copper: u64,
    pub kind: ItemKindDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemKindDef {
    Weapon {
        damage_range: i32,
        #[serde(default)]
        damage_bonus: i32,
    },
    Armor {
        slot: String,
        armor: i32,
    },
    Consumable {
        #[serde(default)]
        heal: i32,
        #[serde(default)]
        effect: Option<EffectDef>,
    },
    Misc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EffectDef {
    pub id: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub heal_per_tick: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillDef {
    pub id: String,
    pub name: String,
    pub difficulty: i32,
    pub primary: String,
    pub secondary: String,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub heal: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpellDef {
    pub id: String,
    pub name: String,
    pub mp_cost: i32,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub heal: i32,
    #[serde(default)]
    pub effect: Option<EffectDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassDef {
    pub id: String,
    pub name: String,
    pub base_stats: BaseStats,
    pub base_hp: i32,
    pub base_mp: i32,
    #[serde(default)]
    pub hp_per_level: i32,
    #[serde(default)]
    pub mp_per_level: i32,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub spells: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BaseStats {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_world_parses() {
        let wf = WorldFile::from_json(
            r#"{
                "start_room": "r1",
                "zones": [{
                    "id": "z1", "name": "zone one",
                    "rooms": [{"id": "r1", "name": "a room", "description": "d"}]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(wf.start_room, "r1");
        assert_eq!(wf.zones[0].rooms.len(), 1);
        assert!(wf.npcs.is_empty());
    }

    #[test]
    fn npc_behavior_is_tagged() {
        let def: NpcDef = serde_json::from_str(
            r#"{
                "name": "rat", "room": "r1", "hostile": true, "hp": 5,
                "behavior": {"kind": "patrol", "route": ["r1", "r2"], "interval": 3}
            }"#,
        )
        .unwrap();
        assert!(matches!(def.behavior, BehaviorDef::Patrol { .. }));
        assert_eq!(def.level, 1);
    }
}
