//! Per-room ledger of dropped items and coins.
//!
//! Room entries are created lazily on first deposit and dropped again once
//! both sides are empty, so idle rooms cost nothing. The concurrent map
//! gives per-room mutual exclusion; two pickups in the same room serialize,
//! pickups in different rooms do not.

use dashmap::DashMap;
use fenproto::event::{CoinsView, GroundView, ItemStackView};
use fenproto::Denomination;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoinPouch {
    pub copper: u64,
    pub silver: u64,
    pub gold: u64,
    pub platinum: u64,
}

impl CoinPouch {
    pub fn get(&self, d: Denomination) -> u64 {
        match d {
            Denomination::Copper => self.copper,
            Denomination::Silver => self.silver,
            Denomination::Gold => self.gold,
            Denomination::Platinum => self.platinum,
        }
    }

    pub fn add(&mut self, d: Denomination, amount: u64) {
        let slot = match d {
            Denomination::Copper => &mut self.copper,
            Denomination::Silver => &mut self.silver,
            Denomination::Gold => &mut self.gold,
            Denomination::Platinum => &mut self.platinum,
        };
        *slot = slot.saturating_add(amount);
    }

    /// Zero one denomination and return what was there.
    pub fn take(&mut self, d: Denomination) -> u64 {
        let slot = match d {
            Denomination::Copper => &mut self.copper,
            Denomination::Silver => &mut self.silver,
            Denomination::Gold => &mut self.gold,
            Denomination::Platinum => &mut self.platinum,
        };
        std::mem::take(slot)
    }

    pub fn is_empty(&self) -> bool {
        self.copper == 0 && self.silver == 0 && self.gold == 0 && self.platinum == 0
    }

    pub fn view(&self) -> CoinsView {
        CoinsView {
            copper: self.copper,
            silver: self.silver,
            gold: self.gold,
            platinum: self.platinum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStack {
    pub item_id: String,
    pub qty: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GroundState {
    pub items: Vec<ItemStack>,
    pub coins: CoinPouch,
}

impl GroundState {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.coins.is_empty()
    }

    pub fn view(&self) -> GroundView {
        GroundView {
            items: self
                .items
                .iter()
                .map(|s| ItemStackView {
                    item_id: s.item_id.clone(),
                    qty: s.qty,
                })
                .collect(),
            coins: self.coins.view(),
        }
    }
}

#[derive(Default)]
pub struct GroundEconomy {
    rooms: DashMap<String, GroundState>,
}

impl GroundEconomy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit item stacks, merging by item id.
    pub fn add_items(&self, room: &str, items: &[(String, u32)]) {
        if items.iter().all(|(_, q)| *q == 0) {
            return;
        }
        let mut g = self.rooms.entry(room.to_string()).or_default();
        for (id, qty) in items {
            if *qty == 0 {
                continue;
            }
            if let Some(stack) = g.items.iter_mut().find(|s| s.item_id == *id) {
                stack.qty = stack.qty.saturating_add(*qty);
            } else {
                g.items.push(ItemStack {
                    item_id: id.clone(),
                    qty: *qty,
                });
            }
        }
    }

    pub fn add_coins(&self, room: &str, d: Denomination, amount: u64) {
        if amount == 0 {
            return;
        }
        self.rooms
            .entry(room.to_string())
            .or_default()
            .coins
            .add(d, amount);
    }

    /// Remove up to `qty` of an item; returns the amount actually removed
    /// (0 if the item is not on the ground here).
    pub fn remove_item(&self, room: &str, item_id: &str, qty: u32) -> u32 {
        let removed = match self.rooms.get_mut(room) {
            Some(mut g) => {
                let Some(i) = g.items.iter().position(|s| s.item_id == item_id) else {
                    return 0;
                };
                let taken = g.items[i].qty.min(qty);
                g.items[i].qty -= taken;
                if g.items[i].qty == 0 {
                    g.items.remove(i);
                }
                taken
            }
            None => return 0,
        };
        self.gc(room);
        removed
    }

    /// Pick up everything of one denomination; returns the amount.
    pub fn remove_coins(&self, room: &str, d: Denomination) -> u64 {
        let taken = match self.rooms.get_mut(room) {
            Some(mut g) => g.coins.take(d),
            None => return 0,
        };
        self.gc(room);
        taken
    }

    pub fn view(&self, room: &str) -> GroundView {
        self.rooms
            .get(room)
            .map(|g| g.view())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn gc(&self, room: &str) {
        self.rooms.remove_if(room, |_, g| g.is_empty());
    }
}
