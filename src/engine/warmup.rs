// ── Bridge Engine: Contact Warmup Registry ─────────────────────────────────
// Per-recipient throttling for the first week of contact, independent of the
// global rate limits. A brand-new recipient gets 3 messages per day, one in
// their first week 10, and an established contact is bounded only by the
// global limiter.
//
// Records persist to contacts.json as a jid → record map. The per-recipient
// day window is the (windowStart, windowSent) pair from the record: once 24h
// have elapsed since windowStart the counter resets on the next touch.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::atoms::constants::*;
use crate::atoms::types::{ContactStage, Jid, WarmupSummary};
use crate::engine::clock::Clock;
use crate::engine::persist::StateDir;

// ── Record ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub first_seen: u64,
    pub total_sent: u64,
    pub window_sent: u32,
    pub window_start: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContactsFile {
    contacts: HashMap<String, ContactRecord>,
}

// ── Verdict ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct WarmupVerdict {
    pub allow: bool,
    pub stage: ContactStage,
    /// Sends left in this recipient's current day window; None = unlimited.
    pub per_day_remaining: Option<u32>,
}

// ── Registry ───────────────────────────────────────────────────────────────

pub struct WarmupRegistry {
    clock: Arc<dyn Clock>,
    store: Arc<StateDir>,
    contacts: Mutex<HashMap<String, ContactRecord>>,
}

impl WarmupRegistry {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<StateDir>) -> Self {
        let file: ContactsFile = store.load(FILE_CONTACTS).unwrap_or_default();
        WarmupRegistry { clock, store, contacts: Mutex::new(file.contacts) }
    }

    /// May we message this recipient right now?
    pub fn may_message(&self, jid: &Jid) -> WarmupVerdict {
        let now = self.clock.now_ms();
        let mut contacts = self.contacts.lock();

        let (stage, window_sent) = match contacts.get_mut(jid.as_str()) {
            Some(record) => {
                Self::roll_window(record, now);
                (Self::stage_of(record, now), record.window_sent)
            }
            // Never messaged: NEW with a clean window.
            None => (ContactStage::New, 0),
        };

        match stage.per_day_ceiling() {
            Some(ceiling) => {
                let remaining = ceiling.saturating_sub(window_sent);
                if remaining == 0 {
                    debug!("[warmup] {} at {:?} ceiling ({}/day)", jid, stage, ceiling);
                }
                WarmupVerdict { allow: remaining > 0, stage, per_day_remaining: Some(remaining) }
            }
            None => WarmupVerdict { allow: true, stage, per_day_remaining: None },
        }
    }

    /// Record a completed send. First contact stamps `first_seen`.
    pub fn record_send(&self, jid: &Jid) {
        let now = self.clock.now_ms();
        let snapshot = {
            let mut contacts = self.contacts.lock();
            let record = contacts.entry(jid.as_str().to_string()).or_insert(ContactRecord {
                first_seen: now,
                total_sent: 0,
                window_sent: 0,
                window_start: now,
            });
            Self::roll_window(record, now);
            record.total_sent += 1;
            record.window_sent += 1;
            ContactsFile { contacts: contacts.clone() }
        };
        self.store.save(FILE_CONTACTS, &snapshot);
    }

    pub fn stage(&self, jid: &Jid) -> ContactStage {
        let now = self.clock.now_ms();
        let contacts = self.contacts.lock();
        match contacts.get(jid.as_str()) {
            Some(record) => Self::stage_of(record, now),
            None => ContactStage::New,
        }
    }

    pub fn summary(&self) -> WarmupSummary {
        let now = self.clock.now_ms();
        let contacts = self.contacts.lock();
        let mut summary = WarmupSummary {
            total_contacts: contacts.len(),
            new_contacts: 0,
            warming_contacts: 0,
            warmed_contacts: 0,
        };
        for record in contacts.values() {
            match Self::stage_of(record, now) {
                ContactStage::New => summary.new_contacts += 1,
                ContactStage::Warming => summary.warming_contacts += 1,
                ContactStage::Warmed => summary.warmed_contacts += 1,
            }
        }
        summary
    }

    /// Background flush hook.
    pub fn persist(&self) {
        let snapshot = ContactsFile { contacts: self.contacts.lock().clone() };
        self.store.save(FILE_CONTACTS, &snapshot);
    }

    fn stage_of(record: &ContactRecord, now: u64) -> ContactStage {
        let age = now.saturating_sub(record.first_seen);
        if age < CONTACT_NEW_MS {
            ContactStage::New
        } else if age < CONTACT_WARMING_MS {
            ContactStage::Warming
        } else {
            ContactStage::Warmed
        }
    }

    fn roll_window(record: &mut ContactRecord, now: u64) {
        if now.saturating_sub(record.window_start) >= DAY_MS {
            record.window_start = now;
            record.window_sent = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;

    fn jid() -> Jid {
        Jid::normalize("15550102233").unwrap()
    }

    fn make(clock: Arc<ManualClock>) -> WarmupRegistry {
        WarmupRegistry::new(clock, Arc::new(StateDir::ephemeral()))
    }

    #[test]
    fn test_new_contact_daily_ceiling() {
        let clock = ManualClock::new(1_000_000);
        let registry = make(clock.clone());
        let jid = jid();

        // Three sends over an hour are all accepted.
        for i in 0..3 {
            let verdict = registry.may_message(&jid);
            assert!(verdict.allow, "send {} denied", i);
            registry.record_send(&jid);
            clock.advance(20 * 60_000);
        }
        // Fourth within the same day window is denied with zero remaining.
        let verdict = registry.may_message(&jid);
        assert!(!verdict.allow);
        assert_eq!(verdict.stage, ContactStage::New);
        assert_eq!(verdict.per_day_remaining, Some(0));
    }

    #[test]
    fn test_window_resets_after_a_day() {
        let clock = ManualClock::new(1_000_000);
        let registry = make(clock.clone());
        let jid = jid();

        for _ in 0..3 {
            registry.record_send(&jid);
        }
        assert!(!registry.may_message(&jid).allow);

        clock.advance(DAY_MS);
        let verdict = registry.may_message(&jid);
        assert!(verdict.allow);
        assert_eq!(verdict.per_day_remaining, Some(NEW_CONTACT_DAILY_CEILING));
    }

    #[test]
    fn test_stage_progression() {
        let clock = ManualClock::new(1_000_000);
        let registry = make(clock.clone());
        let jid = jid();

        registry.record_send(&jid);
        assert_eq!(registry.stage(&jid), ContactStage::New);

        clock.advance(CONTACT_NEW_MS);
        assert_eq!(registry.stage(&jid), ContactStage::Warming);
        assert_eq!(registry.may_message(&jid).per_day_remaining, Some(WARMING_CONTACT_DAILY_CEILING));

        clock.advance(CONTACT_WARMING_MS - CONTACT_NEW_MS);
        assert_eq!(registry.stage(&jid), ContactStage::Warmed);
        assert_eq!(registry.may_message(&jid).per_day_remaining, None);
    }

    #[test]
    fn test_unknown_contact_is_new_and_allowed() {
        let clock = ManualClock::new(1_000_000);
        let registry = make(clock);
        let verdict = registry.may_message(&jid());
        assert!(verdict.allow);
        assert_eq!(verdict.stage, ContactStage::New);
        assert_eq!(verdict.per_day_remaining, Some(NEW_CONTACT_DAILY_CEILING));
    }

    #[test]
    fn test_first_seen_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateDir::open(dir.path()).unwrap());
        let clock = ManualClock::new(1_000_000);
        {
            let registry = WarmupRegistry::new(clock.clone(), store.clone());
            registry.record_send(&jid());
        }
        clock.advance(CONTACT_NEW_MS);
        let registry = WarmupRegistry::new(clock, store);
        assert_eq!(registry.stage(&jid()), ContactStage::Warming);
    }

    #[test]
    fn test_summary_counts() {
        let clock = ManualClock::new(1_000_000);
        let registry = make(clock.clone());
        registry.record_send(&Jid::normalize("15550100001").unwrap());
        clock.advance(CONTACT_WARMING_MS);
        registry.record_send(&Jid::normalize("15550100002").unwrap());

        let summary = registry.summary();
        assert_eq!(summary.total_contacts, 2);
        assert_eq!(summary.warmed_contacts, 1);
        assert_eq!(summary.new_contacts, 1);
    }
}
