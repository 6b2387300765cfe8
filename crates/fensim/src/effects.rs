//! Timed per-session effects, advanced once per tick.

use fenproto::ServerEvent;

use crate::progression::Ability;
use crate::session::PlayerSession;

#[derive(Debug, Clone)]
pub enum EffectKind {
    HealOverTime { per_tick: i32 },
    StatBuff { ability: Ability, amount: i32 },
}

#[derive(Debug, Clone)]
pub struct ActiveEffect {
    pub id: String,
    pub kind: EffectKind,
    pub expires_at_ms: u64,
}

/// Attach an effect. Stat buffs apply immediately and are reverted when the
/// effect expires.
pub fn apply_effect(session: &PlayerSession, effect: ActiveEffect) {
    if let EffectKind::StatBuff { ability, amount } = effect.kind {
        session.with_sheet_mut(|sh| {
            let v = sh.stats.get(ability);
            sh.stats.set(ability, v + amount);
        });
    }
    session.effects().push(effect);
}

/// Advance one session's effects: apply heal ticks, expire deadlines,
/// revert expired buffs. Returns the events to deliver to that session.
pub fn tick_session_effects(session: &PlayerSession, now_ms: u64) -> Vec<ServerEvent> {
    let mut out = Vec::new();
    let mut expired = Vec::new();
    {
        let mut effects = session.effects();
        for e in effects.iter() {
            if now_ms >= e.expires_at_ms {
                continue;
            }
            if let EffectKind::HealOverTime { per_tick } = e.kind {
                let healed = session
                    .with_sheet_mut(|sh| {
                        let before = sh.hp;
                        sh.hp = (sh.hp + per_tick).min(sh.max_hp);
                        sh.hp - before
                    })
                    .unwrap_or(0);
                out.push(ServerEvent::EffectTick {
                    effect_id: e.id.clone(),
                    magnitude: healed,
                    remaining_ms: e.expires_at_ms.saturating_sub(now_ms),
                });
            }
        }
        let mut keep = Vec::with_capacity(effects.len());
        for e in effects.drain(..) {
            if now_ms >= e.expires_at_ms {
                expired.push(e);
            } else {
                keep.push(e);
            }
        }
        *effects = keep;
    }
    for e in expired {
        if let EffectKind::StatBuff { ability, amount } = e.kind {
            session.with_sheet_mut(|sh| {
                let v = sh.stats.get(ability);
                sh.stats.set(ability, v - amount);
            });
        }
        out.push(ServerEvent::EffectTick {
            effect_id: e.id,
            magnitude: 0,
            remaining_ms: 0,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::AbilityScores;
    use crate::session::testutil::session;
    use crate::session::CharacterSheet;
    use std::collections::HashMap;

    fn sheet(hp: i32, max_hp: i32) -> CharacterSheet {
        CharacterSheet {
            class_id: "fighter".to_string(),
            level: 1,
            xp: 0,
            cp: 0,
            stats: AbilityScores {
                strength: 10,
                dexterity: 10,
                constitution: 10,
                intelligence: 10,
                wisdom: 10,
                charisma: 10,
            },
            hp,
            max_hp,
            mp: 5,
            max_mp: 5,
            skills: HashMap::new(),
        }
    }

    #[test]
    fn heal_over_time_ticks_and_expires() {
        let (s, _rx) = session(1, "alice", "t1");
        s.set_sheet(sheet(10, 20));
        apply_effect(
            &s,
            ActiveEffect {
                id: "mend".to_string(),
                kind: EffectKind::HealOverTime { per_tick: 4 },
                expires_at_ms: 1_000,
            },
        );

        let evs = tick_session_effects(&s, 0);
        assert_eq!(evs.len(), 1);
        assert_eq!(s.sheet_snapshot().unwrap().hp, 14);

        // Healing never overshoots max_hp.
        s.with_sheet_mut(|sh| sh.hp = 19);
        tick_session_effects(&s, 500);
        assert_eq!(s.sheet_snapshot().unwrap().hp, 20);

        // Past the deadline the effect is gone.
        let evs = tick_session_effects(&s, 1_000);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs.len(), s.effects().len() + 1);
        assert!(tick_session_effects(&s, 2_000).is_empty());
    }

    #[test]
    fn stat_buffs_revert_on_expiry() {
        let (s, _rx) = session(1, "alice", "t1");
        s.set_sheet(sheet(10, 20));
        apply_effect(
            &s,
            ActiveEffect {
                id: "bulls_strength".to_string(),
                kind: EffectKind::StatBuff {
                    ability: Ability::Strength,
                    amount: 4,
                },
                expires_at_ms: 1_000,
            },
        );
        assert_eq!(s.sheet_snapshot().unwrap().stats.strength, 14);
        tick_session_effects(&s, 1_500);
        assert_eq!(s.sheet_snapshot().unwrap().stats.strength, 10);
    }
}
