//! Equipment slots and combat-bonus derivation.

use std::sync::Arc;

use crate::content::{ItemDef, ItemKindDef};
use crate::store::{InventoryStore, ItemCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EquipSlot {
    Weapon,
    Shield,
    Head,
    Body,
    Legs,
    Feet,
    Hands,
}

impl EquipSlot {
    pub fn all() -> &'static [EquipSlot] {
        &[
            EquipSlot::Weapon,
            EquipSlot::Shield,
            EquipSlot::Head,
            EquipSlot::Body,
            EquipSlot::Legs,
            EquipSlot::Feet,
            EquipSlot::Hands,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EquipSlot::Weapon => "weapon",
            EquipSlot::Shield => "shield",
            EquipSlot::Body => "body",
            EquipSlot::Head => "head",
            EquipSlot::Legs => "legs",
            EquipSlot::Feet => "feet",
            EquipSlot::Hands => "hands",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "weapon" | "wield" | "mainhand" | "main-hand" => Some(EquipSlot::Weapon),
            "shield" | "offhand" | "off-hand" => Some(EquipSlot::Shield),
            "head" | "helm" | "helmet" => Some(EquipSlot::Head),
            "body" | "torso" | "chest" | "armor" | "armour" => Some(EquipSlot::Body),
            "legs" | "pants" | "trousers" => Some(EquipSlot::Legs),
            "feet" | "boots" | "shoes" => Some(EquipSlot::Feet),
            "hands" | "hand" | "gloves" | "gauntlets" => Some(EquipSlot::Hands),
            _ => None,
        }
    }
}

/// Slot an item belongs in, if it is equippable at all.
pub fn equip_slot_for(def: &ItemDef) -> Option<EquipSlot> {
    match &def.kind {
        ItemKindDef::Weapon { .. } => Some(EquipSlot::Weapon),
        ItemKindDef::Armor { slot, .. } => EquipSlot::parse(slot),
        ItemKindDef::Consumable { .. } | ItemKindDef::Misc => None,
    }
}

/// Bonuses a player's current equipment contributes to one combat action.
/// Recomputed on use, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombatBonuses {
    pub total_damage_bonus: i32,
    pub weapon_damage_range: i32,
    pub total_armor_value: i32,
    pub shield_bonus: i32,
}

impl CombatBonuses {
    /// Armor as the retaliation formula sees it.
    pub fn effective_armor(&self) -> i32 {
        self.total_armor_value + self.shield_bonus
    }
}

pub struct EquipmentResolver {
    inventory: Arc<dyn InventoryStore>,
    catalog: Arc<dyn ItemCatalog>,
}

impl EquipmentResolver {
    pub fn new(inventory: Arc<dyn InventoryStore>, catalog: Arc<dyn ItemCatalog>) -> Self {
        Self { inventory, catalog }
    }

    /// Derive bonuses from the player's equipped items. Unknown item ids
    /// are skipped; there is at most one weapon slot, so the damage range
    /// is set, not summed.
    pub fn combat_bonuses(&self, player: &str) -> CombatBonuses {
        let mut b = CombatBonuses::default();
        for (slot, item_id) in self.inventory.get_equipped(player) {
            let Some(def) = self.catalog.get_item(&item_id) else {
                continue;
            };
            match def.kind {
                ItemKindDef::Weapon {
                    damage_range,
                    damage_bonus,
                } => {
                    b.weapon_damage_range = damage_range;
                    b.total_damage_bonus += damage_bonus;
                }
                ItemKindDef::Armor { armor, .. } => {
                    b.total_armor_value += armor;
                    if slot == EquipSlot::Shield && armor > 0 {
                        b.shield_bonus += 5;
                    }
                }
                ItemKindDef::Consumable { .. } | ItemKindDef::Misc => {}
            }
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryInventoryStore, MemoryItemCatalog};

    fn catalog() -> Vec<ItemDef> {
        serde_json::from_str(
            r#"[
                {"id": "sword", "name": "sword",
                 "kind": {"kind": "weapon", "damage_range": 6, "damage_bonus": 2}},
                {"id": "buckler", "name": "buckler",
                 "kind": {"kind": "armor", "slot": "shield", "armor": 1}},
                {"id": "tunic", "name": "tunic",
                 "kind": {"kind": "armor", "slot": "body", "armor": 3}},
                {"id": "charm", "name": "charm", "kind": {"kind": "misc"}}
            ]"#,
        )
        .unwrap()
    }

    fn resolver() -> (Arc<MemoryInventoryStore>, EquipmentResolver) {
        let inv = Arc::new(MemoryInventoryStore::new());
        let cat = Arc::new(MemoryItemCatalog::new(&catalog()));
        let r = EquipmentResolver::new(inv.clone(), cat);
        (inv, r)
    }

    #[test]
    fn bonuses_accumulate_from_equipped_items() {
        let (inv, r) = resolver();
        for id in ["sword", "buckler", "tunic"] {
            inv.add("alice", id, 1);
        }
        inv.equip("alice", EquipSlot::Weapon, "sword").unwrap();
        inv.equip("alice", EquipSlot::Shield, "buckler").unwrap();
        inv.equip("alice", EquipSlot::Body, "tunic").unwrap();

        let b = r.combat_bonuses("alice");
        assert_eq!(b.weapon_damage_range, 6);
        assert_eq!(b.total_damage_bonus, 2);
        assert_eq!(b.total_armor_value, 4);
        assert_eq!(b.shield_bonus, 5);
        assert_eq!(b.effective_armor(), 9);
    }

    #[test]
    fn unknown_items_are_skipped() {
        let (inv, r) = resolver();
        inv.add("alice", "mystery", 1);
        inv.equip("alice", EquipSlot::Weapon, "mystery").unwrap();
        assert_eq!(r.combat_bonuses("alice"), CombatBonuses::default());
    }

    #[test]
    fn bare_hands_mean_no_weapon_range() {
        let (_inv, r) = resolver();
        let b = r.combat_bonuses("alice");
        assert_eq!(b.weapon_damage_range, 0);
    }
}
