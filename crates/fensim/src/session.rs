//! Player sessions and the session registry.
//!
//! A session is created on connect and destroyed on disconnect. Command
//! handlers and the tick task touch it concurrently: toggles are atomics,
//! the rest sits behind small mutexes, and races on scalar fields are
//! last-writer-wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use fenproto::{ServerEvent, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::effects::ActiveEffect;
use crate::progression::AbilityScores;

/// Lock a mutex, recovering the data from a poisoned lock instead of
/// propagating the panic of whichever thread died holding it.
pub(crate) fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Per-connection command rate limit.
///
/// Tokens accumulate fractionally at `refill_per_sec` up to `capacity`;
/// each accepted command consumes one. A rejected command consumes nothing.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_ms: u64,
    capacity: f64,
    refill_per_sec: f64,
}

pub const BUCKET_CAPACITY: f64 = 20.0;
pub const BUCKET_REFILL_PER_SEC: f64 = 10.0;

impl TokenBucket {
    pub fn new(now_ms: u64) -> Self {
        Self {
            tokens: BUCKET_CAPACITY,
            last_ms: now_ms,
            capacity: BUCKET_CAPACITY,
            refill_per_sec: BUCKET_REFILL_PER_SEC,
        }
    }

    pub fn try_consume(&mut self, now_ms: u64) -> bool {
        let elapsed_ms = now_ms.saturating_sub(self.last_ms);
        self.last_ms = now_ms;
        self.tokens =
            (self.tokens + elapsed_ms as f64 / 1000.0 * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// The authenticated character attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub class_id: String,
    pub level: u32,
    pub xp: u64,
    pub cp: u32,
    pub stats: AbilityScores,
    pub hp: i32,
    pub max_hp: i32,
    pub mp: i32,
    pub max_mp: i32,
    #[serde(default)]
    pub skills: HashMap<String, u32>,
}

pub struct PlayerSession {
    pub id: SessionId,
    outbox: mpsc::UnboundedSender<ServerEvent>,
    name: Mutex<Option<String>>,
    room: Mutex<Option<String>>,
    sheet: Mutex<Option<CharacterSheet>>,
    attack_mode: AtomicBool,
    hidden: AtomicBool,
    target: Mutex<Option<u64>>,
    effects: Mutex<Vec<ActiveEffect>>,
    bucket: Mutex<TokenBucket>,
}

impl PlayerSession {
    pub fn new(id: SessionId, outbox: mpsc::UnboundedSender<ServerEvent>, now_ms: u64) -> Self {
        Self {
            id,
            outbox,
            name: Mutex::new(None),
            room: Mutex::new(None),
            sheet: Mutex::new(None),
            attack_mode: AtomicBool::new(false),
            hidden: AtomicBool::new(false),
            target: Mutex::new(None),
            effects: Mutex::new(Vec::new()),
            bucket: Mutex::new(TokenBucket::new(now_ms)),
        }
    }

    /// Queue an event for this session. A closed connection is not an
    /// error here; the disconnect path will reap the session.
    pub fn send(&self, ev: ServerEvent) {
        let _ = self.outbox.send(ev);
    }

    /// Take one rate-limit token; false means drop the command.
    pub fn accept_command(&self, now_ms: u64) -> bool {
        relock(&self.bucket).try_consume(now_ms)
    }

    pub fn name(&self) -> Option<String> {
        relock(&self.name).clone()
    }

    pub fn set_name(&self, name: &str) {
        *relock(&self.name) = Some(name.to_string());
    }

    pub fn is_authenticated(&self) -> bool {
        relock(&self.name).is_some()
    }

    pub fn room(&self) -> Option<String> {
        relock(&self.room).clone()
    }

    pub fn set_room(&self, room: &str) {
        *relock(&self.room) = Some(room.to_string());
    }

    pub fn attack_mode(&self) -> bool {
        self.attack_mode.load(Ordering::Relaxed)
    }

    pub fn set_attack_mode(&self, on: bool) {
        self.attack_mode.store(on, Ordering::Relaxed);
    }

    pub fn hidden(&self) -> bool {
        self.hidden.load(Ordering::Relaxed)
    }

    pub fn set_hidden(&self, on: bool) {
        self.hidden.store(on, Ordering::Relaxed);
    }

    pub fn target(&self) -> Option<u64> {
        *relock(&self.target)
    }

    pub fn set_target(&self, npc_id: Option<u64>) {
        *relock(&self.target) = npc_id;
    }

    pub fn sheet_snapshot(&self) -> Option<CharacterSheet> {
        relock(&self.sheet).clone()
    }

    pub fn set_sheet(&self, sheet: CharacterSheet) {
        *relock(&self.sheet) = Some(sheet);
    }

    /// Run `f` against the sheet, if one is attached.
    pub fn with_sheet_mut<R>(&self, f: impl FnOnce(&mut CharacterSheet) -> R) -> Option<R> {
        relock(&self.sheet).as_mut().map(f)
    }

    pub fn effects(&self) -> MutexGuard<'_, Vec<ActiveEffect>> {
        relock(&self.effects)
    }
}

/// Directory of live sessions, indexed by connection id and player name.
#[derive(Default)]
pub struct SessionRegistry {
    by_id: DashMap<SessionId, Arc<PlayerSession>>,
    by_name: DashMap<String, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sess: Arc<PlayerSession>) {
        self.by_id.insert(sess.id, sess);
    }

    /// Remove a session and its name binding. Called on disconnect, outside
    /// tick boundaries, so the next tick never sees a closed session.
    pub fn remove(&self, id: SessionId) -> Option<Arc<PlayerSession>> {
        let (_, sess) = self.by_id.remove(&id)?;
        if let Some(name) = sess.name() {
            self.by_name.remove(&name);
        }
        Some(sess)
    }

    /// Bind an authenticated player name to a session. False if the name is
    /// already attached to a live session.
    pub fn bind_name(&self, id: SessionId, name: &str) -> bool {
        if self.by_name.contains_key(name) {
            return false;
        }
        self.by_name.insert(name.to_string(), id);
        true
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<PlayerSession>> {
        self.by_id.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<PlayerSession>> {
        let id = *self.by_name.get(name)?;
        self.get(id)
    }

    pub fn authenticated(&self) -> Vec<Arc<PlayerSession>> {
        self.by_id
            .iter()
            .filter(|e| e.value().is_authenticated())
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn sessions_in_room(&self, room: &str) -> Vec<Arc<PlayerSession>> {
        self.by_id
            .iter()
            .filter(|e| {
                let s = e.value();
                s.is_authenticated() && s.room().as_deref() == Some(room)
            })
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Names of non-hidden players in a room.
    pub fn visible_names_in_room(&self, room: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions_in_room(room)
            .into_iter()
            .filter(|s| !s.hidden())
            .filter_map(|s| s.name())
            .collect();
        names.sort();
        names
    }

    pub fn broadcast_all(&self, ev: &ServerEvent, except: Option<&str>) {
        for e in self.by_id.iter() {
            let s = e.value();
            if !s.is_authenticated() {
                continue;
            }
            if except.is_some() && s.name().as_deref() == except {
                continue;
            }
            s.send(ev.clone());
        }
    }

    pub fn broadcast_room(&self, room: &str, ev: &ServerEvent, except: Option<&str>) {
        for s in self.sessions_in_room(room) {
            if except.is_some() && s.name().as_deref() == except {
                continue;
            }
            s.send(ev.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Session wired to a throwaway channel, authenticated as `name`.
    pub fn session(
        id: u64,
        name: &str,
        room: &str,
    ) -> (Arc<PlayerSession>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let s = Arc::new(PlayerSession::new(SessionId(id), tx, 0));
        s.set_name(name);
        s.set_room(room);
        (s, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_exhausts_and_recovers() {
        let mut b = TokenBucket::new(0);
        // Burst capacity is 20; command 21 at the same instant must fail.
        for _ in 0..20 {
            assert!(b.try_consume(0));
        }
        assert!(!b.try_consume(0));
        // 100ms buys exactly one token at 10/s.
        assert!(b.try_consume(100));
        assert!(!b.try_consume(100));
        // After a long wait the bucket is full again but capped at burst.
        for _ in 0..20 {
            assert!(b.try_consume(1_000_000));
        }
        assert!(!b.try_consume(1_000_000));
    }

    #[test]
    fn bucket_accumulates_fractions() {
        let mut b = TokenBucket::new(0);
        for _ in 0..20 {
            assert!(b.try_consume(0));
        }
        // 50ms = half a token. Two of those make one.
        assert!(!b.try_consume(50));
        assert!(b.try_consume(100));
    }

    #[test]
    fn registry_indexes_by_room_and_name() {
        let reg = SessionRegistry::new();
        let (a, _rxa) = testutil::session(1, "alice", "t1");
        let (b, _rxb) = testutil::session(2, "bob", "t1");
        let (c, _rxc) = testutil::session(3, "carol", "t2");
        for s in [&a, &b, &c] {
            reg.insert(Arc::clone(s));
            assert!(reg.bind_name(s.id, &s.name().unwrap()));
        }

        assert_eq!(reg.sessions_in_room("t1").len(), 2);
        assert_eq!(reg.visible_names_in_room("t1"), vec!["alice", "bob"]);
        b.set_hidden(true);
        assert_eq!(reg.visible_names_in_room("t1"), vec!["alice"]);
        assert!(reg.get_by_name("carol").is_some());

        reg.remove(SessionId(3));
        assert!(reg.get_by_name("carol").is_none());
    }

    #[test]
    fn broadcast_survives_a_closed_recipient() {
        let reg = SessionRegistry::new();
        let (a, rxa) = testutil::session(1, "alice", "t1");
        let (b, mut rxb) = testutil::session(2, "bob", "t1");
        reg.insert(Arc::clone(&a));
        reg.insert(Arc::clone(&b));
        drop(rxa); // alice's connection is gone

        reg.broadcast_room("t1", &ServerEvent::Pong, None);
        assert!(matches!(rxb.try_recv(), Ok(ServerEvent::Pong)));
    }

    #[test]
    fn duplicate_name_binding_is_refused() {
        let reg = SessionRegistry::new();
        let (a, _rxa) = testutil::session(1, "alice", "t1");
        reg.insert(Arc::clone(&a));
        assert!(reg.bind_name(a.id, "alice"));
        assert!(!reg.bind_name(SessionId(9), "alice"));
    }
}
