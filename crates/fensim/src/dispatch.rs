//! Command dispatch: one inbound command in, zero or more events out.
//!
//! Validation failures emit a recoverable event and leave the session
//! alone; nothing here can take a connection down or stall the tick.

use std::sync::Arc;

use fenproto::event::{EquippedView, MapRoomView, VendorItemView};
use fenproto::{ClientCommand, Denomination, Direction, ServerEvent, SessionId};
use tracing::warn;

use crate::content::ItemKindDef;
use crate::effects::{self, ActiveEffect, EffectKind};
use crate::engine::Engine;
use crate::equipment::{equip_slot_for, EquipSlot};
use crate::npc::NpcInstance;
use crate::progression::{self, Ability};
use crate::session::{relock, CharacterSheet, PlayerSession};
use crate::store::{PlayerRecord, StoreError};

impl Engine {
    pub fn handle_command(&self, id: SessionId, cmd: ClientCommand) {
        let Some(s) = self.registry.get(id) else {
            return;
        };
        if !s.accept_command(self.now_ms()) {
            s.send(ServerEvent::Error {
                message: "too many commands; slow down".to_string(),
            });
            return;
        }

        if !s.is_authenticated() {
            match cmd {
                ClientCommand::Register {
                    name,
                    secret,
                    class_id,
                } => self.cmd_register(&s, &name, &secret, &class_id),
                ClientCommand::Login { name, secret } => self.cmd_login(&s, &name, &secret),
                ClientCommand::Ping => s.send(ServerEvent::Pong),
                _ => s.send(ServerEvent::AuthError {
                    reason: "log in first".to_string(),
                }),
            }
            return;
        }

        match cmd {
            ClientCommand::Register { .. } | ClientCommand::Login { .. } => {
                s.send(ServerEvent::Error {
                    message: "already logged in".to_string(),
                });
            }
            ClientCommand::Move { dir } => self.cmd_move(&s, dir),
            ClientCommand::Look { target } => self.cmd_look(&s, target.as_deref()),
            ClientCommand::Say { text } => self.cmd_say(&s, &text),
            ClientCommand::AttackToggle { enabled } => {
                s.set_attack_mode(enabled);
                let text = if enabled {
                    "you square up for a fight."
                } else {
                    "you lower your guard."
                };
                s.send(ServerEvent::SystemMessage {
                    text: text.to_string(),
                });
            }
            ClientCommand::SelectTarget { npc_id } => self.cmd_select_target(&s, npc_id),
            ClientCommand::ViewInventory => self.cmd_view_inventory(&s),
            ClientCommand::EquipItem { item_id, slot } => self.cmd_equip(&s, &item_id, &slot),
            ClientCommand::UnequipItem { slot } => self.cmd_unequip(&s, &slot),
            ClientCommand::UseItem { item_id } => self.cmd_use_item(&s, &item_id),
            ClientCommand::PickupItem { item_id, qty } => self.cmd_pickup_item(&s, &item_id, qty),
            ClientCommand::PickupCoins { denomination } => self.cmd_pickup_coins(&s, denomination),
            ClientCommand::SneakToggle { enabled } => {
                s.set_hidden(enabled);
                let text = if enabled {
                    "you slip into the shadows."
                } else {
                    "you step out of the shadows."
                };
                s.send(ServerEvent::SystemMessage {
                    text: text.to_string(),
                });
            }
            ClientCommand::UseSkill { skill_id, target } => {
                self.cmd_use_skill(&s, &skill_id, target)
            }
            ClientCommand::CastSpell { spell_id, target } => {
                self.cmd_cast_spell(&s, &spell_id, target)
            }
            ClientCommand::VendorList => self.cmd_vendor_list(&s),
            ClientCommand::VendorBuy { item_id, qty } => self.cmd_vendor_buy(&s, &item_id, qty),
            ClientCommand::TrainSkill { skill_id } => self.cmd_train_skill(&s, &skill_id),
            ClientCommand::AllocateStat { ability, points } => {
                self.cmd_allocate_stat(&s, &ability, points)
            }
            ClientCommand::Ping => s.send(ServerEvent::Pong),
        }
    }

    fn cmd_register(&self, s: &Arc<PlayerSession>, name: &str, secret: &str, class_id: &str) {
        let name = name.trim();
        if name.is_empty()
            || name.len() > 24
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            s.send(ServerEvent::AuthError {
                reason: "bad name".to_string(),
            });
            return;
        }
        let Some(class) = self.classes.get_class(class_id) else {
            s.send(ServerEvent::AuthError {
                reason: format!("unknown class {class_id}"),
            });
            return;
        };

        let stats = progression::AbilityScores {
            strength: class.base_stats.strength,
            dexterity: class.base_stats.dexterity,
            constitution: class.base_stats.constitution,
            intelligence: class.base_stats.intelligence,
            wisdom: class.base_stats.wisdom,
            charisma: class.base_stats.charisma,
        };
        let max_hp = progression::max_hp_for(&class, &stats, 1);
        let max_mp = progression::max_mp_for(&class, &stats, 1);
        let sheet = CharacterSheet {
            class_id: class.id.clone(),
            level: 1,
            xp: 0,
            cp: progression::cp_for_level(1),
            stats,
            hp: max_hp,
            max_hp,
            mp: max_mp,
            max_mp,
            skills: class.skills.iter().map(|k| (k.clone(), 1)).collect(),
        };
        let rec = PlayerRecord {
            name: name.to_string(),
            secret: secret.to_string(),
            sheet,
            last_room: None,
        };
        match self.players.create(rec) {
            Ok(()) => s.send(ServerEvent::RegisterOk),
            Err(StoreError::NameTaken) => s.send(ServerEvent::AuthError {
                reason: "name already taken".to_string(),
            }),
            Err(e) => {
                warn!(player = %name, err = %e, "register failed");
                s.send(ServerEvent::AuthError {
                    reason: "storage trouble; try again".to_string(),
                });
            }
        }
    }

    fn cmd_login(&self, s: &Arc<PlayerSession>, name: &str, secret: &str) {
        let rec = match self.players.authenticate(name, secret) {
            Ok(rec) => rec,
            Err(e @ (StoreError::NoSuchPlayer | StoreError::BadSecret)) => {
                s.send(ServerEvent::AuthError {
                    reason: e.to_string(),
                });
                return;
            }
            Err(e) => {
                warn!(player = %name, err = %e, "login failed");
                s.send(ServerEvent::AuthError {
                    reason: "storage trouble; try again".to_string(),
                });
                return;
            }
        };
        if !self.registry.bind_name(s.id, &rec.name) {
            s.send(ServerEvent::AuthError {
                reason: "already connected elsewhere".to_string(),
            });
            return;
        }

        s.set_name(&rec.name);
        s.set_sheet(rec.sheet.clone());
        let room = rec
            .last_room
            .filter(|r| self.world.has_room(r))
            .unwrap_or_else(|| self.world.spawn_room().to_string());
        s.set_room(&room);
        self.discovery.save(&rec.name, &room);

        let sheet = rec.sheet;
        s.send(ServerEvent::LoginOk {
            player: fenproto::event::PlayerView {
                name: rec.name.clone(),
                class_id: sheet.class_id.clone(),
                level: sheet.level,
                xp: sheet.xp,
                cp: sheet.cp,
                hp: sheet.hp,
                max_hp: sheet.max_hp,
                mp: sheet.mp,
                max_mp: sheet.max_mp,
                stats: sheet.stats.view(),
            },
        });
        s.send(self.map_data_for(&rec.name));
        if let Some(info) = self.room_info_for(s) {
            s.send(info);
        }
        self.registry.broadcast_room(
            &room,
            &ServerEvent::PlayerEntered {
                name: rec.name.clone(),
                room_id: room.clone(),
            },
            Some(&rec.name),
        );
    }

    fn map_data_for(&self, player: &str) -> ServerEvent {
        let rooms = self
            .discovery
            .load(player)
            .into_iter()
            .filter_map(|id| self.world.room(&id))
            .map(|r| {
                let mut exits: Vec<Direction> = r.exits.keys().copied().collect();
                exits.sort_by_key(|d| d.as_str());
                MapRoomView {
                    id: r.id.clone(),
                    name: r.name.clone(),
                    x: r.coords[0],
                    y: r.coords[1],
                    z: r.coords[2],
                    exits,
                }
            })
            .collect();
        ServerEvent::MapData { rooms }
    }

    fn cmd_move(&self, s: &Arc<PlayerSession>, dir: Direction) {
        let Some(name) = s.name() else {
            return;
        };
        let Some(from) = s.room() else {
            return;
        };
        let Some(room) = self.world.room(&from) else {
            return;
        };
        let Some(to) = room.exit(dir).map(str::to_string) else {
            s.send(ServerEvent::MoveError {
                reason: format!("there is no exit {dir}"),
            });
            return;
        };
        if let Some(lock) = room.locked.get(&dir) {
            match &lock.key_item {
                None => {
                    s.send(ServerEvent::MoveError {
                        reason: "the way is sealed".to_string(),
                    });
                    return;
                }
                Some(key) => {
                    let has_key = self.inventory.list(&name).iter().any(|i| i.item_id == *key);
                    if !has_key {
                        s.send(ServerEvent::MoveError {
                            reason: format!("locked; you need a {key}"),
                        });
                        return;
                    }
                }
            }
        }

        let hidden = s.hidden();
        if !hidden {
            self.trail.record(&from, &name, dir, self.now_ms());
            let mut rng = relock(&self.rng);
            self.trigger_pursuits(&name, &from, s.target(), &mut rng);
        }

        if !hidden {
            self.registry.broadcast_room(
                &from,
                &ServerEvent::PlayerLeft {
                    name: name.clone(),
                    room_id: from.clone(),
                },
                Some(&name),
            );
        }
        s.set_room(&to);
        self.discovery.save(&name, &to);
        if !hidden {
            self.registry.broadcast_room(
                &to,
                &ServerEvent::PlayerEntered {
                    name: name.clone(),
                    room_id: to.clone(),
                },
                Some(&name),
            );
        }

        s.send(ServerEvent::MoveOk {
            dir,
            room_id: to.clone(),
        });
        if let Some(info) = self.room_info_for(s) {
            s.send(info);
        }
    }

    fn cmd_look(&self, s: &Arc<PlayerSession>, target: Option<&str>) {
        let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
            if let Some(info) = self.room_info_for(s) {
                s.send(info);
            }
            return;
        };
        let Some(room_id) = s.room() else {
            return;
        };

        if let Some(room) = self.world.room(&room_id) {
            if let Some(i) = room
                .interactables
                .iter()
                .find(|i| i.name.eq_ignore_ascii_case(target))
            {
                s.send(ServerEvent::SystemMessage {
                    text: i.description.clone(),
                });
                return;
            }
        }

        let target_lc = target.to_ascii_lowercase();
        if let Some(npc) = self
            .roster
            .alive_in_room(&room_id)
            .into_iter()
            .find(|n| n.name.to_ascii_lowercase().starts_with(&target_lc))
        {
            let mut text = npc.description.clone();
            if text.is_empty() {
                text = format!("{} looks back at you.", npc.name);
            }
            if npc.combatant() {
                text.push_str(&format!(" ({}/{} hp)", npc.hp.max(0), npc.max_hp));
            }
            s.send(ServerEvent::SystemMessage { text });
            return;
        }

        if let Some(def) = self.items.get_item(target) {
            s.send(ServerEvent::SystemMessage {
                text: if def.description.is_empty() {
                    format!("{}: nothing remarkable.", def.name)
                } else {
                    def.description
                },
            });
            return;
        }

        s.send(ServerEvent::Error {
            message: format!("you see nothing like \"{target}\" here"),
        });
    }

    fn cmd_say(&self, s: &Arc<PlayerSession>, text: &str) {
        let text = text.trim();
        let (Some(name), Some(room)) = (s.name(), s.room()) else {
            return;
        };
        if text.is_empty() {
            s.send(ServerEvent::Error {
                message: "say what?".to_string(),
            });
            return;
        }
        self.registry.broadcast_room(
            &room,
            &ServerEvent::PlayerSays {
                name,
                text: text.to_string(),
            },
            None,
        );
    }

    fn cmd_select_target(&self, s: &Arc<PlayerSession>, npc_id: Option<u64>) {
        let Some(npc_id) = npc_id else {
            s.set_target(None);
            s.send(ServerEvent::SystemMessage {
                text: "target cleared.".to_string(),
            });
            return;
        };
        let room = s.room();
        let valid = self
            .roster
            .get(npc_id)
            .filter(|n| n.alive() && n.combatant() && n.hostile)
            .filter(|n| room.as_deref() == Some(n.room.as_str()));
        match valid {
            Some(n) => {
                s.set_target(Some(npc_id));
                s.send(ServerEvent::SystemMessage {
                    text: format!("you size up {}.", n.name),
                });
            }
            None => s.send(ServerEvent::Error {
                message: "no such target here".to_string(),
            }),
        }
    }

    fn cmd_view_inventory(&self, s: &Arc<PlayerSession>) {
        let Some(name) = s.name() else {
            return;
        };
        let items = self
            .inventory
            .list(&name)
            .iter()
            .map(|st| fenproto::event::ItemStackView {
                item_id: st.item_id.clone(),
                qty: st.qty,
            })
            .collect();
        let equipped = self
            .inventory
            .get_equipped(&name)
            .into_iter()
            .map(|(slot, item_id)| EquippedView {
                slot: slot.as_str().to_string(),
                item_id,
            })
            .collect();
        s.send(ServerEvent::InventoryData {
            items,
            equipped,
            coins: self.coins.get(&name).view(),
        });
    }

    fn cmd_equip(&self, s: &Arc<PlayerSession>, item_id: &str, slot: &str) {
        let Some(name) = s.name() else {
            return;
        };
        let Some(slot) = EquipSlot::parse(slot) else {
            s.send(ServerEvent::Error {
                message: format!("unknown slot {slot}"),
            });
            return;
        };
        let Some(def) = self.items.get_item(item_id) else {
            s.send(ServerEvent::Error {
                message: format!("unknown item {item_id}"),
            });
            return;
        };
        if equip_slot_for(&def) != Some(slot) {
            s.send(ServerEvent::Error {
                message: format!("{} does not fit there", def.name),
            });
            return;
        }
        match self.inventory.equip(&name, slot, item_id) {
            Ok(()) => s.send(ServerEvent::SystemMessage {
                text: format!("you equip the {}.", def.name),
            }),
            Err(_) => s.send(ServerEvent::Error {
                message: format!("you are not carrying a {}", def.name),
            }),
        }
    }

    fn cmd_unequip(&self, s: &Arc<PlayerSession>, slot: &str) {
        let Some(name) = s.name() else {
            return;
        };
        let Some(slot) = EquipSlot::parse(slot) else {
            s.send(ServerEvent::Error {
                message: format!("unknown slot {slot}"),
            });
            return;
        };
        match self.inventory.unequip(&name, slot) {
            Some(item) => s.send(ServerEvent::SystemMessage {
                text: format!("you unequip the {item}."),
            }),
            None => s.send(ServerEvent::Error {
                message: "nothing is equipped there".to_string(),
            }),
        }
    }

    fn cmd_use_item(&self, s: &Arc<PlayerSession>, item_id: &str) {
        let Some(name) = s.name() else {
            return;
        };
        let Some(def) = self.items.get_item(item_id) else {
            s.send(ServerEvent::Error {
                message: format!("unknown item {item_id}"),
            });
            return;
        };
        let ItemKindDef::Consumable { heal, effect } = &def.kind else {
            s.send(ServerEvent::Error {
                message: format!("you can't use the {}", def.name),
            });
            return;
        };
        if self.inventory.remove(&name, item_id, 1) != 1 {
            s.send(ServerEvent::Error {
                message: format!("you are not carrying a {}", def.name),
            });
            return;
        }

        let healed = s
            .with_sheet_mut(|sh| {
                let before = sh.hp;
                sh.hp = (sh.hp + *heal).min(sh.max_hp);
                sh.hp - before
            })
            .unwrap_or(0);
        if let Some(e) = effect {
            effects::apply_effect(
                s,
                ActiveEffect {
                    id: e.id.clone(),
                    kind: EffectKind::HealOverTime {
                        per_tick: e.heal_per_tick,
                    },
                    expires_at_ms: self.now_ms() + e.duration_ms,
                },
            );
        }
        s.send(ServerEvent::SystemMessage {
            text: format!("you use the {} (+{} hp).", def.name, healed),
        });
    }

    fn cmd_pickup_item(&self, s: &Arc<PlayerSession>, item_id: &str, qty: u32) {
        let (Some(name), Some(room)) = (s.name(), s.room()) else {
            return;
        };
        let taken = self.ground.remove_item(&room, item_id, qty.max(1));
        if taken == 0 {
            s.send(ServerEvent::Error {
                message: format!("there is no {item_id} here"),
            });
            return;
        }
        self.inventory.add(&name, item_id, taken);
        s.send(ServerEvent::SystemMessage {
            text: format!("you pick up {taken} x {item_id}."),
        });
        self.registry.broadcast_room(
            &room,
            &ServerEvent::GroundChanged {
                room_id: room.clone(),
                ground: self.ground.view(&room),
            },
            None,
        );
    }

    fn cmd_pickup_coins(&self, s: &Arc<PlayerSession>, d: Denomination) {
        let (Some(name), Some(room)) = (s.name(), s.room()) else {
            return;
        };
        let amount = self.ground.remove_coins(&room, d);
        if amount == 0 {
            s.send(ServerEvent::Error {
                message: format!("no {} coins here", d.as_str()),
            });
            return;
        }
        self.coins.add(&name, d, amount);
        s.send(ServerEvent::SystemMessage {
            text: format!("you pocket {amount} {} coins.", d.as_str()),
        });
        self.registry.broadcast_room(
            &room,
            &ServerEvent::GroundChanged {
                room_id: room.clone(),
                ground: self.ground.view(&room),
            },
            None,
        );
    }

    fn cmd_use_skill(&self, s: &Arc<PlayerSession>, skill_id: &str, target: Option<u64>) {
        let Some(sheet) = s.sheet_snapshot() else {
            return;
        };
        let Some(rank) = sheet.skills.get(skill_id).copied() else {
            s.send(ServerEvent::Error {
                message: "you have not learned that".to_string(),
            });
            return;
        };
        let Some(def) = self.skills.get(skill_id) else {
            s.send(ServerEvent::Error {
                message: format!("no such skill {skill_id}"),
            });
            return;
        };

        let primary = Ability::parse(&def.primary)
            .map(|a| sheet.stats.get(a))
            .unwrap_or(0);
        let secondary = Ability::parse(&def.secondary)
            .map(|a| sheet.stats.get(a))
            .unwrap_or(0);
        let bonuses = progression::threshold_bonuses(&sheet.stats);
        // Rank and charisma-tier training ease the check.
        let modifier = -(rank.saturating_sub(1) as i32) - bonuses.skill_bonus;

        let mut rng = relock(&self.rng);
        let roll = rng.roll_range(1, 20);
        let check =
            progression::skill_check(primary, secondary, sheet.level, roll, def.difficulty, modifier);
        s.send(ServerEvent::SkillResult {
            skill_id: skill_id.to_string(),
            success: check.success,
            total: check.total,
        });
        if !check.success {
            return;
        }

        if def.heal > 0 {
            let healed = s
                .with_sheet_mut(|sh| {
                    let before = sh.hp;
                    sh.hp = (sh.hp + def.heal).min(sh.max_hp);
                    sh.hp - before
                })
                .unwrap_or(0);
            s.send(ServerEvent::SystemMessage {
                text: format!("{} restores {} hp.", def.name, healed),
            });
        }
        if def.damage > 0 {
            let Some(npc) = self.valid_skill_target(s, target) else {
                s.send(ServerEvent::Error {
                    message: "no such target here".to_string(),
                });
                return;
            };
            // Hit roll first, then the target's own evasion.
            let accuracy = sheet.stats.dexterity / 2 + sheet.level as i32;
            if !progression::roll_to_hit(accuracy, npc.defense, &mut rng) {
                s.send(ServerEvent::SystemMessage {
                    text: format!("your {} misses {}.", def.name, npc.name),
                });
                return;
            }
            if progression::roll_evasion(npc.evasion, &mut rng) {
                s.send(ServerEvent::SystemMessage {
                    text: format!("{} evades your {}.", npc.name, def.name),
                });
                return;
            }
            self.strike_npc(s, npc.id, def.damage + bonuses.melee_damage, &mut rng);
        }
    }

    fn cmd_cast_spell(&self, s: &Arc<PlayerSession>, spell_id: &str, target: Option<u64>) {
        let Some(sheet) = s.sheet_snapshot() else {
            return;
        };
        let Some(def) = self.spells.get(spell_id) else {
            s.send(ServerEvent::Error {
                message: format!("no such spell {spell_id}"),
            });
            return;
        };
        let known = self
            .classes
            .get_class(&sheet.class_id)
            .is_some_and(|c| c.spells.iter().any(|sp| sp == spell_id));
        if !known {
            s.send(ServerEvent::Error {
                message: "your class cannot cast that".to_string(),
            });
            return;
        }
        let paid = s
            .with_sheet_mut(|sh| {
                if sh.mp < def.mp_cost {
                    false
                } else {
                    sh.mp -= def.mp_cost;
                    true
                }
            })
            .unwrap_or(false);
        if !paid {
            s.send(ServerEvent::Error {
                message: "not enough mana".to_string(),
            });
            return;
        }

        s.send(ServerEvent::SystemMessage {
            text: format!("you cast {}.", def.name),
        });
        let bonuses = progression::threshold_bonuses(&sheet.stats);
        if def.heal > 0 {
            let healed = s
                .with_sheet_mut(|sh| {
                    let before = sh.hp;
                    sh.hp = (sh.hp + def.heal).min(sh.max_hp);
                    sh.hp - before
                })
                .unwrap_or(0);
            s.send(ServerEvent::SystemMessage {
                text: format!("{} knits your wounds (+{} hp).", def.name, healed),
            });
        }
        if let Some(e) = &def.effect {
            effects::apply_effect(
                s,
                ActiveEffect {
                    id: e.id.clone(),
                    kind: EffectKind::HealOverTime {
                        per_tick: e.heal_per_tick,
                    },
                    expires_at_ms: self.now_ms() + e.duration_ms,
                },
            );
        }
        if def.damage > 0 {
            let mut rng = relock(&self.rng);
            let Some(npc) = self.valid_skill_target(s, target) else {
                s.send(ServerEvent::Error {
                    message: "no such target here".to_string(),
                });
                return;
            };
            // Spells cannot miss, but the target may still evade.
            if progression::roll_evasion(npc.evasion, &mut rng) {
                s.send(ServerEvent::SystemMessage {
                    text: format!("{} twists away from your {}.", npc.name, def.name),
                });
                return;
            }
            self.strike_npc(s, npc.id, def.damage + bonuses.spell_damage, &mut rng);
        }
    }

    /// A skill/spell target must exist, be hostile, be a combatant, be
    /// alive and share the caster's room.
    fn valid_skill_target(&self, s: &Arc<PlayerSession>, target: Option<u64>) -> Option<NpcInstance> {
        let id = target.or_else(|| s.target())?;
        let room = s.room()?;
        self.roster
            .get(id)
            .filter(|n| n.alive() && n.combatant() && n.hostile && n.room == room)
    }

    /// Apply direct damage from a named player to an NPC, with room
    /// broadcasts and kill settlement.
    fn strike_npc(&self, s: &Arc<PlayerSession>, npc_id: u64, damage: i32, rng: &mut crate::Rng64) {
        let (Some(name), Some(room)) = (s.name(), s.room()) else {
            return;
        };
        let Some((hp, max_hp, npc_name, killed)) = self.roster.with_mut(npc_id, |n| {
            let hp = n.apply_damage(damage);
            (hp, n.max_hp, n.name.clone(), hp <= 0)
        }) else {
            return;
        };
        self.registry.broadcast_room(
            &room,
            &ServerEvent::CombatHit {
                attacker: name.clone(),
                defender: npc_name.clone(),
                damage,
                defender_hp: hp,
                defender_max_hp: max_hp,
                player_defender: false,
                room_id: room.clone(),
            },
            None,
        );
        if killed {
            self.registry.broadcast_room(
                &room,
                &ServerEvent::NpcKilled {
                    npc_id,
                    npc_name,
                    killer: name.clone(),
                    room_id: room.clone(),
                },
                None,
            );
            self.settle_npc_kill(npc_id, &name, &room, rng);
        }
    }

    fn vendor_here(&self, s: &Arc<PlayerSession>) -> bool {
        self.interactable_here(s, "vendor")
    }

    fn interactable_here(&self, s: &Arc<PlayerSession>, kind: &str) -> bool {
        s.room()
            .and_then(|r| self.world.room(&r).map(|room| {
                room.interactables
                    .iter()
                    .any(|i| i.name.to_ascii_lowercase().contains(kind))
            }))
            .unwrap_or(false)
    }

    fn cmd_vendor_list(&self, s: &Arc<PlayerSession>) {
        if !self.vendor_here(s) {
            s.send(ServerEvent::Error {
                message: "there is no vendor here".to_string(),
            });
            return;
        }
        let items = self
            .items
            .vendor_stock()
            .into_iter()
            .map(|d| VendorItemView {
                item_id: d.id,
                name: d.name,
                price_copper: d.price_copper,
            })
            .collect();
        s.send(ServerEvent::VendorCatalog { items });
    }

    fn cmd_vendor_buy(&self, s: &Arc<PlayerSession>, item_id: &str, qty: u32) {
        let Some(name) = s.name() else {
            return;
        };
        if !self.vendor_here(s) {
            s.send(ServerEvent::Error {
                message: "there is no vendor here".to_string(),
            });
            return;
        }
        let qty = qty.max(1);
        let Some(def) = self.items.get_item(item_id).filter(|d| d.price_copper > 0) else {
            s.send(ServerEvent::Error {
                message: format!("the vendor does not sell {item_id}"),
            });
            return;
        };
        let total = def.price_copper.saturating_mul(qty as u64);
        if !self.coins.subtract(&name, Denomination::Copper, total) {
            s.send(ServerEvent::Error {
                message: format!("you cannot afford that ({total} copper)"),
            });
            return;
        }
        self.inventory.add(&name, item_id, qty);
        s.send(ServerEvent::SystemMessage {
            text: format!("you buy {qty} x {} for {total} copper.", def.name),
        });
    }

    fn cmd_train_skill(&self, s: &Arc<PlayerSession>, skill_id: &str) {
        if !self.interactable_here(s, "trainer") {
            s.send(ServerEvent::Error {
                message: "there is no trainer here".to_string(),
            });
            return;
        }
        let Some(def) = self.skills.get(skill_id) else {
            s.send(ServerEvent::Error {
                message: format!("no such skill {skill_id}"),
            });
            return;
        };
        let result = s.with_sheet_mut(|sh| {
            let rank = sh.skills.get(skill_id).copied().unwrap_or(0);
            let cost = rank + 1;
            if sh.cp < cost {
                Err(cost)
            } else {
                sh.cp -= cost;
                sh.skills.insert(skill_id.to_string(), rank + 1);
                Ok((rank + 1, cost))
            }
        });
        match result {
            Some(Ok((rank, cost))) => s.send(ServerEvent::SystemMessage {
                text: format!("{} trained to rank {rank} (-{cost} cp).", def.name),
            }),
            Some(Err(cost)) => s.send(ServerEvent::Error {
                message: format!("training costs {cost} cp; you have too few"),
            }),
            None => {}
        }
    }

    fn cmd_allocate_stat(&self, s: &Arc<PlayerSession>, ability: &str, points: u32) {
        let Some(ability) = Ability::parse(ability) else {
            s.send(ServerEvent::Error {
                message: format!("unknown ability {ability}"),
            });
            return;
        };
        if points == 0 {
            s.send(ServerEvent::Error {
                message: "allocate at least one point".to_string(),
            });
            return;
        }
        let Some(sheet) = s.sheet_snapshot() else {
            return;
        };
        let baseline = self
            .classes
            .get_class(&sheet.class_id)
            .map(|c| {
                let b = c.base_stats;
                match ability {
                    Ability::Strength => b.strength,
                    Ability::Dexterity => b.dexterity,
                    Ability::Constitution => b.constitution,
                    Ability::Intelligence => b.intelligence,
                    Ability::Wisdom => b.wisdom,
                    Ability::Charisma => b.charisma,
                }
            })
            .unwrap_or(10);

        let current = sheet.stats.get(ability);
        let Some(alloc) = progression::allocate(current, baseline, sheet.cp, points) else {
            s.send(ServerEvent::Error {
                message: "not enough character points".to_string(),
            });
            return;
        };

        let class = self.classes.get_class(&sheet.class_id);
        s.with_sheet_mut(|sh| {
            sh.stats.set(ability, alloc.new_value);
            sh.cp -= alloc.cp_spent;
            if let Some(c) = &class {
                // Constitution/wisdom moves shift the derived maxima.
                let new_hp = progression::max_hp_for(c, &sh.stats, sh.level);
                let new_mp = progression::max_mp_for(c, &sh.stats, sh.level);
                sh.hp = sh.hp.min(new_hp);
                sh.mp = sh.mp.min(new_mp);
                sh.max_hp = new_hp;
                sh.max_mp = new_mp;
            }
        });
        s.send(ServerEvent::SystemMessage {
            text: format!(
                "{} raised to {} (-{} cp).",
                ability.as_str(),
                alloc.new_value,
                alloc.cp_spent
            ),
        });
    }
}
