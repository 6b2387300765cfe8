//! Outbound events, produced by the engine and serialized by the transport.

use serde::{Deserialize, Serialize};

use crate::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsView {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    pub class_id: String,
    pub level: u32,
    pub xp: u64,
    pub cp: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub mp: i32,
    pub max_mp: i32,
    pub stats: StatsView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcView {
    pub id: u64,
    pub name: String,
    pub hostile: bool,
    pub hp: i32,
    pub max_hp: i32,
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub zone: String,
    pub exits: Vec<Direction>,
    pub interactables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStackView {
    pub item_id: String,
    pub qty: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CoinsView {
    pub copper: u64,
    pub silver: u64,
    pub gold: u64,
    pub platinum: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundView {
    pub items: Vec<ItemStackView>,
    pub coins: CoinsView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquippedView {
    pub slot: String,
    pub item_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorItemView {
    pub item_id: String,
    pub name: String,
    pub price_copper: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRoomView {
    pub id: String,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub exits: Vec<Direction>,
}

/// One server event. The `event` field is the wire discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    RegisterOk,
    LoginOk {
        player: PlayerView,
    },
    AuthError {
        reason: String,
    },
    RoomInfo {
        room: RoomView,
        players: Vec<String>,
        npcs: Vec<NpcView>,
        ground: GroundView,
    },
    MoveOk {
        dir: Direction,
        room_id: String,
    },
    MoveError {
        reason: String,
    },
    MapData {
        rooms: Vec<MapRoomView>,
    },
    PlayerEntered {
        name: String,
        room_id: String,
    },
    PlayerLeft {
        name: String,
        room_id: String,
    },
    NpcEntered {
        npc: NpcView,
        room_id: String,
        #[serde(default)]
        dir: Option<Direction>,
    },
    NpcLeft {
        npc_id: u64,
        name: String,
        room_id: String,
        #[serde(default)]
        dir: Option<Direction>,
    },
    PlayerSays {
        name: String,
        text: String,
    },
    CombatHit {
        attacker: String,
        defender: String,
        damage: i32,
        defender_hp: i32,
        defender_max_hp: i32,
        player_defender: bool,
        room_id: String,
    },
    NpcKilled {
        npc_id: u64,
        npc_name: String,
        killer: String,
        room_id: String,
    },
    PlayerKilled {
        player: String,
        killer: String,
        respawn_room: String,
        respawn_hp: i32,
        respawn_mp: i32,
    },
    GroundChanged {
        room_id: String,
        ground: GroundView,
    },
    InventoryData {
        items: Vec<ItemStackView>,
        equipped: Vec<EquippedView>,
        coins: CoinsView,
    },
    VendorCatalog {
        items: Vec<VendorItemView>,
    },
    SkillResult {
        skill_id: String,
        success: bool,
        total: i32,
    },
    EffectTick {
        effect_id: String,
        magnitude: i32,
        remaining_ms: u64,
    },
    SystemMessage {
        text: String,
    },
    Pong,
    Error {
        message: String,
    },
}
