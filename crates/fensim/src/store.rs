//! Persistence collaborators.
//!
//! The engine talks to storage through these traits and never blocks a tick
//! on them; the in-memory implementations back the shard binary (with JSON
//! snapshots for the player store) and the tests.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use dashmap::DashMap;
use fenproto::Denomination;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::content::{ClassDef, ItemDef};
use crate::equipment::EquipSlot;
use crate::ground::{CoinPouch, ItemStack};
use crate::session::CharacterSheet;

#[derive(Debug)]
pub enum StoreError {
    NameTaken,
    NoSuchPlayer,
    BadSecret,
    Conflict(&'static str),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NameTaken => write!(f, "name already taken"),
            StoreError::NoSuchPlayer => write!(f, "no such player"),
            StoreError::BadSecret => write!(f, "bad credentials"),
            StoreError::Conflict(s) => write!(f, "conflict: {s}"),
            StoreError::Io(s) => write!(f, "storage error: {s}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub name: String,
    pub secret: String,
    pub sheet: CharacterSheet,
    #[serde(default)]
    pub last_room: Option<String>,
}

pub trait PlayerStore: Send + Sync {
    fn create(&self, rec: PlayerRecord) -> Result<(), StoreError>;
    fn authenticate(&self, name: &str, secret: &str) -> Result<PlayerRecord, StoreError>;
    /// Persist the live sheet for an existing player; credentials stay as
    /// they were.
    fn save(
        &self,
        name: &str,
        sheet: &CharacterSheet,
        last_room: Option<&str>,
    ) -> Result<(), StoreError>;
}

pub trait CoinLedger: Send + Sync {
    fn get(&self, player: &str) -> CoinPouch;
    fn add(&self, player: &str, d: Denomination, amount: u64);
    /// False (and no change) if the player holds less than `amount`.
    fn subtract(&self, player: &str, d: Denomination, amount: u64) -> bool;
}

pub trait InventoryStore: Send + Sync {
    fn list(&self, player: &str) -> Vec<ItemStack>;
    fn add(&self, player: &str, item_id: &str, qty: u32);
    /// Remove up to `qty`; returns the amount actually removed.
    fn remove(&self, player: &str, item_id: &str, qty: u32) -> u32;
    /// Move one `item_id` from the inventory into `slot`; whatever was in
    /// the slot goes back to the inventory.
    fn equip(&self, player: &str, slot: EquipSlot, item_id: &str) -> Result<(), StoreError>;
    fn unequip(&self, player: &str, slot: EquipSlot) -> Option<String>;
    fn get_equipped(&self, player: &str) -> Vec<(EquipSlot, String)>;
}

pub trait DiscoveryStore: Send + Sync {
    fn load(&self, player: &str) -> Vec<String>;
    fn save(&self, player: &str, room_id: &str);
}

pub trait ItemCatalog: Send + Sync {
    fn get_item(&self, id: &str) -> Option<ItemDef>;
    /// Everything a vendor offers (positive price), sorted by id.
    fn vendor_stock(&self) -> Vec<ItemDef>;
}

pub trait ClassCatalog: Send + Sync {
    fn get_class(&self, id: &str) -> Option<ClassDef>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPlayerStore {
    players: DashMap<String, PlayerRecord>,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON snapshot if one exists; a missing file is a fresh start.
    pub fn load_json(path: &Path) -> Self {
        let store = Self::new();
        match std::fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<Vec<PlayerRecord>>(&s) {
                Ok(recs) => {
                    for r in recs {
                        store.players.insert(r.name.clone(), r);
                    }
                }
                Err(e) => warn!(path = %path.display(), err = %e, "unreadable player snapshot"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), err = %e, "cannot read player snapshot"),
        }
        store
    }

    pub fn save_json(&self, path: &Path) -> Result<(), StoreError> {
        let mut recs: Vec<PlayerRecord> = self.players.iter().map(|e| e.value().clone()).collect();
        recs.sort_by(|a, b| a.name.cmp(&b.name));
        let body = serde_json::to_string_pretty(&recs).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::write(path, body).map_err(|e| StoreError::Io(e.to_string()))
    }
}

impl PlayerStore for MemoryPlayerStore {
    fn create(&self, rec: PlayerRecord) -> Result<(), StoreError> {
        if self.players.contains_key(&rec.name) {
            return Err(StoreError::NameTaken);
        }
        self.players.insert(rec.name.clone(), rec);
        Ok(())
    }

    fn authenticate(&self, name: &str, secret: &str) -> Result<PlayerRecord, StoreError> {
        let rec = self.players.get(name).ok_or(StoreError::NoSuchPlayer)?;
        if rec.secret != secret {
            return Err(StoreError::BadSecret);
        }
        Ok(rec.clone())
    }

    fn save(
        &self,
        name: &str,
        sheet: &CharacterSheet,
        last_room: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut rec = self.players.get_mut(name).ok_or(StoreError::NoSuchPlayer)?;
        rec.sheet = sheet.clone();
        rec.last_room = last_room.map(str::to_string);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCoinLedger {
    coins: DashMap<String, CoinPouch>,
}

impl MemoryCoinLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoinLedger for MemoryCoinLedger {
    fn get(&self, player: &str) -> CoinPouch {
        self.coins.get(player).map(|e| *e.value()).unwrap_or_default()
    }

    fn add(&self, player: &str, d: Denomination, amount: u64) {
        self.coins
            .entry(player.to_string())
            .or_default()
            .add(d, amount);
    }

    fn subtract(&self, player: &str, d: Denomination, amount: u64) -> bool {
        let Some(mut pouch) = self.coins.get_mut(player) else {
            return amount == 0;
        };
        if pouch.get(d) < amount {
            return false;
        }
        let have = pouch.take(d);
        pouch.add(d, have - amount);
        true
    }
}

#[derive(Debug, Default, Clone)]
struct PlayerInventory {
    items: Vec<ItemStack>,
    equipped: HashMap<EquipSlot, String>,
}

#[derive(Default)]
pub struct MemoryInventoryStore {
    by_player: DashMap<String, PlayerInventory>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for MemoryInventoryStore {
    fn list(&self, player: &str) -> Vec<ItemStack> {
        self.by_player
            .get(player)
            .map(|e| e.items.clone())
            .unwrap_or_default()
    }

    fn add(&self, player: &str, item_id: &str, qty: u32) {
        if qty == 0 {
            return;
        }
        let mut inv = self.by_player.entry(player.to_string()).or_default();
        if let Some(stack) = inv.items.iter_mut().find(|s| s.item_id == item_id) {
            stack.qty = stack.qty.saturating_add(qty);
        } else {
            inv.items.push(ItemStack {
                item_id: item_id.to_string(),
                qty,
            });
        }
    }

    fn remove(&self, player: &str, item_id: &str, qty: u32) -> u32 {
        let Some(mut inv) = self.by_player.get_mut(player) else {
            return 0;
        };
        let Some(i) = inv.items.iter().position(|s| s.item_id == item_id) else {
            return 0;
        };
        let taken = inv.items[i].qty.min(qty);
        inv.items[i].qty -= taken;
        if inv.items[i].qty == 0 {
            inv.items.remove(i);
        }
        taken
    }

    fn equip(&self, player: &str, slot: EquipSlot, item_id: &str) -> Result<(), StoreError> {
        let mut inv = self.by_player.entry(player.to_string()).or_default();
        let Some(i) = inv.items.iter().position(|s| s.item_id == item_id) else {
            return Err(StoreError::Conflict("item not in inventory"));
        };
        inv.items[i].qty -= 1;
        if inv.items[i].qty == 0 {
            inv.items.remove(i);
        }
        if let Some(prev) = inv.equipped.insert(slot, item_id.to_string()) {
            if let Some(stack) = inv.items.iter_mut().find(|s| s.item_id == prev) {
                stack.qty = stack.qty.saturating_add(1);
            } else {
                inv.items.push(ItemStack {
                    item_id: prev,
                    qty: 1,
                });
            }
        }
        Ok(())
    }

    fn unequip(&self, player: &str, slot: EquipSlot) -> Option<String> {
        let mut inv = self.by_player.get_mut(player)?;
        let item = inv.equipped.remove(&slot)?;
        if let Some(stack) = inv.items.iter_mut().find(|s| s.item_id == item) {
            stack.qty = stack.qty.saturating_add(1);
        } else {
            inv.items.push(ItemStack {
                item_id: item.clone(),
                qty: 1,
            });
        }
        Some(item)
    }

    fn get_equipped(&self, player: &str) -> Vec<(EquipSlot, String)> {
        let mut out: Vec<(EquipSlot, String)> = self
            .by_player
            .get(player)
            .map(|e| {
                e.equipped
                    .iter()
                    .map(|(s, i)| (*s, i.clone()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|(s, _)| s.as_str());
        out
    }
}

#[derive(Default)]
pub struct MemoryDiscoveryStore {
    rooms: DashMap<String, BTreeSet<String>>,
}

impl MemoryDiscoveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiscoveryStore for MemoryDiscoveryStore {
    fn load(&self, player: &str) -> Vec<String> {
        self.rooms
            .get(player)
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn save(&self, player: &str, room_id: &str) {
        self.rooms
            .entry(player.to_string())
            .or_default()
            .insert(room_id.to_string());
    }
}

pub struct MemoryItemCatalog {
    items: HashMap<String, ItemDef>,
}

impl MemoryItemCatalog {
    pub fn new(defs: &[ItemDef]) -> Self {
        Self {
            items: defs.iter().map(|d| (d.id.clone(), d.clone())).collect(),
        }
    }
}

impl ItemCatalog for MemoryItemCatalog {
    fn get_item(&self, id: &str) -> Option<ItemDef> {
        self.items.get(id).cloned()
    }

    fn vendor_stock(&self) -> Vec<ItemDef> {
        let mut out: Vec<ItemDef> = self
            .items
            .values()
            .filter(|d| d.price_copper > 0)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

pub struct MemoryClassCatalog {
    classes: HashMap<String, ClassDef>,
}

impl MemoryClassCatalog {
    pub fn new(defs: &[ClassDef]) -> Self {
        Self {
            classes: defs.iter().map(|d| (d.id.clone(), d.clone())).collect(),
        }
    }
}

impl ClassCatalog for MemoryClassCatalog {
    fn get_class(&self, id: &str) -> Option<ClassDef> {
        self.classes.get(id).cloned()
    }
}
