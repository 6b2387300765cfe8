//! Inbound commands, decoded by the transport and consumed by the engine.

use serde::{Deserialize, Serialize};

use crate::{Denomination, Direction};

/// One client command. The `cmd` field is the wire discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    Register {
        name: String,
        secret: String,
        class_id: String,
    },
    Login {
        name: String,
        secret: String,
    },
    Move {
        dir: Direction,
    },
    Look {
        #[serde(default)]
        target: Option<String>,
    },
    Say {
        text: String,
    },
    AttackToggle {
        enabled: bool,
    },
    SelectTarget {
        #[serde(default)]
        npc_id: Option<u64>,
    },
    ViewInventory,
    EquipItem {
        item_id: String,
        slot: String,
    },
    UnequipItem {
        slot: String,
    },
    UseItem {
        item_id: String,
    },
    PickupItem {
        item_id: String,
        qty: u32,
    },
    PickupCoins {
        denomination: Denomination,
    },
    SneakToggle {
        enabled: bool,
    },
    UseSkill {
        skill_id: String,
        #[serde(default)]
        target: Option<u64>,
    },
    CastSpell {
        spell_id: String,
        #[serde(default)]
        target: Option<u64>,
    },
    VendorList,
    VendorBuy {
        item_id: String,
        qty: u32,
    },
    TrainSkill {
        skill_id: String,
    },
    AllocateStat {
        ability: String,
        points: u32,
    },
    Ping,
}
