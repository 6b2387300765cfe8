//! Static room/zone topology.
//!
//! Built once from the content descriptor, read-only during simulation.

use std::collections::HashMap;

use anyhow::bail;
use fenproto::event::RoomView;
use fenproto::Direction;
use tracing::warn;

use crate::content::WorldFile;

#[derive(Debug, Clone)]
pub struct LockedExit {
    /// Item that opens the exit; `None` means permanently sealed.
    pub key_item: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Interactable {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub description: String,
    pub zone: String,
    pub coords: [i32; 3],
    pub exits: HashMap<Direction, String>,
    pub locked: HashMap<Direction, LockedExit>,
    pub interactables: Vec<Interactable>,
}

impl Room {
    pub fn exit(&self, dir: Direction) -> Option<&str> {
        self.exits.get(&dir).map(String::as_str)
    }

    /// Direction whose exit leads to `dest`, if any.
    pub fn direction_to(&self, dest: &str) -> Option<Direction> {
        self.exits
            .iter()
            .find(|(_, to)| to.as_str() == dest)
            .map(|(d, _)| *d)
    }

    pub fn view(&self) -> RoomView {
        let mut exits: Vec<Direction> = self.exits.keys().copied().collect();
        exits.sort_by_key(|d| d.as_str());
        RoomView {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            zone: self.zone.clone(),
            exits,
            interactables: self.interactables.iter().map(|i| i.name.clone()).collect(),
        }
    }
}

#[derive(Debug)]
pub struct WorldGraph {
    rooms: HashMap<String, Room>,
    start_room: String,
}

impl WorldGraph {
    /// Build the graph, dropping exits that point at unknown rooms or use
    /// unknown direction tokens.
    pub fn build(wf: &WorldFile) -> anyhow::Result<Self> {
        let mut rooms = HashMap::new();
        for zone in &wf.zones {
            for rd in &zone.rooms {
                let mut locked = HashMap::new();
                for l in &rd.locked {
                    let Some(dir) = Direction::parse(&l.dir) else {
                        warn!(room = %rd.id, dir = %l.dir, "unknown locked-exit direction");
                        continue;
                    };
                    locked.insert(
                        dir,
                        LockedExit {
                            key_item: l.key_item.clone(),
                        },
                    );
                }

                let room = Room {
                    id: rd.id.clone(),
                    name: rd.name.clone(),
                    description: rd.description.clone(),
                    zone: zone.id.clone(),
                    coords: rd.coords,
                    exits: HashMap::new(),
                    locked,
                    interactables: rd
                        .interactables
                        .iter()
                        .map(|i| Interactable {
                            name: i.name.clone(),
                            description: i.description.clone(),
                        })
                        .collect(),
                };
                if rooms.insert(rd.id.clone(), room).is_some() {
                    bail!("duplicate room id {}", rd.id);
                }
            }
        }

        // Wire exits in a second pass so targets can be checked.
        let mut wired: Vec<(String, Direction, String)> = Vec::new();
        for zone in &wf.zones {
            for rd in &zone.rooms {
                for (tok, to) in &rd.exits {
                    let Some(dir) = Direction::parse(tok) else {
                        warn!(room = %rd.id, dir = %tok, "unknown exit direction");
                        continue;
                    };
                    if !rooms.contains_key(to) {
                        warn!(room = %rd.id, to = %to, "exit into unknown room");
                        continue;
                    }
                    wired.push((rd.id.clone(), dir, to.clone()));
                }
            }
        }
        for (id, dir, to) in wired {
            if let Some(r) = rooms.get_mut(&id) {
                r.exits.insert(dir, to);
            }
        }

        if !rooms.contains_key(&wf.start_room) {
            bail!("start room {} not defined", wf.start_room);
        }

        Ok(Self {
            rooms,
            start_room: wf.start_room.clone(),
        })
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn has_room(&self, id: &str) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn spawn_room(&self) -> &str {
        &self.start_room
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Exits of `room` whose destination lies in `zone`.
    pub fn zone_exits<'a>(&self, room: &'a Room, zone: &str) -> Vec<(Direction, &'a str)> {
        let mut out: Vec<(Direction, &str)> = room
            .exits
            .iter()
            .filter(|(_, to)| self.room(to).is_some_and(|r| r.zone == zone))
            .map(|(d, to)| (*d, to.as_str()))
            .collect();
        // Deterministic order so a seeded RNG picks reproducibly.
        out.sort_by_key(|(d, _)| d.as_str());
        out
    }
}
