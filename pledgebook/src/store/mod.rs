pub mod state;

pub use state::{RemoteChange, RosterState, Rollback};

use crate::config::Config;
use crate::error::{PledgeError, Result};
use crate::gateway::{ChangeEvent, Gateway, Subscription};
use crate::import::{ImportOutcome, ImportReport, ImportSession};
use crate::member::{Member, MemberId, Payment};
use crate::seed;
use crate::stats::{self, RosterStats};
use crate::wire::{self, MemberRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Records per gateway call during bulk writes, unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// A non-fatal condition the user should see (e.g. as a banner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Notice {
    /// The initial fetch failed; the built-in roster is shown instead.
    Offline(String),
    /// The store was empty and writing the default roster to it failed.
    SeedNotPersisted(String),
    /// A write was rejected and the local change was reverted.
    WriteFailed(String),
    /// Fetched records that could not be read as members were left out.
    Unreadable(usize),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Offline(msg) => write!(f, "Offline, showing default roster: {msg}"),
            Notice::SeedNotPersisted(msg) => write!(f, "Default roster was not saved: {msg}"),
            Notice::WriteFailed(msg) => write!(f, "Change was not saved: {msg}"),
            Notice::Unreadable(n) => write!(f, "{n} member records could not be read"),
        }
    }
}

/// How [`Store::load_all`] populated the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    /// The remote collection was read; carries the member count.
    Fetched(usize),
    /// The remote collection was empty and has been seeded.
    Seeded,
    /// The remote collection was empty and seeding it failed.
    SeededLocally,
    /// The remote store could not be reached.
    Offline,
    /// Every fetched record was unreadable; the default roster is shown and
    /// nothing is written back.
    Unreadable,
}

/// The client-side roster, kept in step with a remote [`Gateway`].
///
/// Mutations apply locally first and are then written through the gateway.
/// A rejected write puts the affected entry back the way it was, returns the
/// error and raises a [`Notice`]. Remote change events queue on the
/// subscription until [`Store::process_remote_events`] merges them.
///
/// No lock is held across a gateway call, so events can be drained while a
/// slow write is still pending on another thread.
pub struct Store<G: Gateway> {
    gateway: G,
    state: RwLock<RosterState>,
    notice: Mutex<Option<Notice>>,
    subscription: Mutex<Option<Subscription>>,
    seed: Vec<Member>,
    chunk_size: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map fetched records, dropping any that are not valid members.
fn members_from_records(records: Vec<MemberRecord>) -> Vec<Member> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id;
            wire::from_record(record)
                .map_err(|e| log::warn!("Skipping member {id}: {e}"))
                .ok()
        })
        .collect()
}

impl<G: Gateway> Store<G> {
    /// Create an empty store over `gateway`, seeded with the built-in roster.
    pub fn new(gateway: G) -> Self {
        Store {
            gateway,
            state: RwLock::new(RosterState::default()),
            notice: Mutex::new(None),
            subscription: Mutex::new(None),
            seed: seed::default_roster(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create a store using the chunk size and seed roster from `config`.
    pub fn with_config(gateway: G, config: &Config) -> Result<Self> {
        config.validate()?;
        let roster = seed::load_roster(config.seed_file.as_deref())?;
        Ok(Store::new(gateway)
            .with_seed(roster)
            .with_chunk_size(config.import_chunk_size))
    }

    /// Replace the roster used to seed an empty store and as the offline fallback.
    pub fn with_seed(mut self, seed: Vec<Member>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RosterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RosterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_notice(&self, notice: Option<Notice>) {
        *lock(&self.notice) = notice;
    }

    /// Undo an optimistic change after the gateway rejected it.
    fn revert(&self, rollback: Option<Rollback>, err: &PledgeError) {
        if let Some(rollback) = rollback {
            log::warn!("Write for member {} failed, reverting: {err}", rollback.id);
            self.write_state().restore(rollback);
        } else {
            log::warn!("Write failed: {err}");
        }
        self.set_notice(Some(Notice::WriteFailed(err.to_string())));
    }

    // ── Loading ────────────────────────────────────────────────────

    /// Read the whole collection from the gateway and replace the local roster.
    ///
    /// An empty collection is seeded with the default roster, which is shown
    /// even if the seed write fails. A failed fetch shows the default roster
    /// and raises [`Notice::Offline`]. Records that do not map to a member
    /// raise [`Notice::Unreadable`]; if none of them map, the default roster
    /// is shown but not written. The roster is never left empty without a
    /// notice explaining why.
    pub fn load_all(&self) -> LoadStatus {
        match self.gateway.fetch_all() {
            Ok(records) if !records.is_empty() => {
                let fetched = records.len();
                let members = members_from_records(records);
                let count = members.len();
                let dropped = fetched - count;
                if count == 0 {
                    log::warn!("None of {fetched} records could be read, showing default roster");
                    self.write_state().replace_all(self.seed.clone());
                    self.set_notice(Some(Notice::Unreadable(dropped)));
                    return LoadStatus::Unreadable;
                }
                self.write_state().replace_all(members);
                self.set_notice((dropped > 0).then_some(Notice::Unreadable(dropped)));
                log::info!("Loaded {count} members");
                LoadStatus::Fetched(count)
            }
            Ok(_) => {
                self.write_state().replace_all(self.seed.clone());
                let records: Vec<MemberRecord> = self.seed.iter().map(wire::to_record).collect();
                match self.gateway.upsert(&records) {
                    Ok(()) => {
                        self.set_notice(None);
                        log::info!("Store was empty, seeded {} members", records.len());
                        LoadStatus::Seeded
                    }
                    Err(e) => {
                        log::warn!("Failed to persist default roster: {e}");
                        self.set_notice(Some(Notice::SeedNotPersisted(e.to_string())));
                        LoadStatus::SeededLocally
                    }
                }
            }
            Err(e) => {
                log::warn!("Fetch failed, falling back to default roster: {e}");
                self.write_state().replace_all(self.seed.clone());
                self.set_notice(Some(Notice::Offline(e.to_string())));
                LoadStatus::Offline
            }
        }
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Create or edit a member. An existing id is replaced in place, a new id
    /// is appended. The change is visible before the gateway call returns.
    pub fn save(&self, member: Member) -> Result<()> {
        member.validate()?;
        let record = wire::to_record(&member);

        let rollback = self.write_state().upsert(member);
        if let Err(e) = self.gateway.upsert(std::slice::from_ref(&record)) {
            self.revert(Some(rollback), &e);
            return Err(e);
        }
        log::debug!("Saved member {}", record.id);
        Ok(())
    }

    /// Remove a member, closing it if it is selected.
    pub fn delete(&self, id: MemberId) -> Result<()> {
        let rollback = self.write_state().remove(id);
        if let Err(e) = self.gateway.delete(id) {
            self.revert(rollback, &e);
            return Err(e);
        }
        log::debug!("Deleted member {id}");
        Ok(())
    }

    /// Replace a member's record locally and persist only its payments list.
    pub fn update_payments(&self, member: Member) -> Result<()> {
        let id = member.id;
        if self.read_state().get(id).is_none() {
            return Err(PledgeError::NotFound { id });
        }
        let payments = serde_json::to_value(&member.payments)?;
        let fields = serde_json::json!({ "payments": payments });

        let rollback = self.write_state().upsert(member);
        if let Err(e) = self.gateway.update_fields(id, &fields) {
            self.revert(Some(rollback), &e);
            return Err(e);
        }
        Ok(())
    }

    /// Log a new payment against a member and return it.
    pub fn add_payment(
        &self,
        member_id: MemberId,
        date: NaiveDate,
        amount: f64,
        note: impl Into<String>,
    ) -> Result<Payment> {
        let payment = Payment::new(date, amount, note)?;
        let current = self
            .member(member_id)
            .ok_or(PledgeError::NotFound { id: member_id })?;
        self.update_payments(current.with_payment(payment.clone()))?;
        Ok(payment)
    }

    pub fn delete_payment(&self, member_id: MemberId, payment_id: &str) -> Result<()> {
        let current = self
            .member(member_id)
            .ok_or(PledgeError::NotFound { id: member_id })?;
        self.update_payments(current.without_payment(payment_id)?)
    }

    /// Write new and updated members through the gateway in chunks, then
    /// apply them locally. A failed chunk aborts the rest and nothing is
    /// applied locally; chunks already written reach the roster through
    /// change events.
    pub fn bulk_write(&self, inserts: Vec<Member>, updates: Vec<Member>) -> Result<()> {
        for member in inserts.iter().chain(&updates) {
            member.validate()?;
        }
        let records: Vec<MemberRecord> = inserts
            .iter()
            .chain(&updates)
            .map(wire::to_record)
            .collect();

        for (i, chunk) in records.chunks(self.chunk_size).enumerate() {
            if let Err(e) = self.gateway.upsert(chunk) {
                let err = PledgeError::Import {
                    chunk: i + 1,
                    message: e.to_string(),
                };
                self.revert(None, &err);
                return Err(err);
            }
            log::debug!("Wrote chunk {} ({} records)", i + 1, chunk.len());
        }

        let mut state = self.write_state();
        for member in inserts.into_iter().chain(updates) {
            state.upsert(member);
        }
        Ok(())
    }

    // ── Import ─────────────────────────────────────────────────────

    /// Parse and analyse CSV text against the current roster. Without
    /// conflicts the import is committed right away.
    pub fn import_csv(&self, text: &str) -> Result<ImportOutcome> {
        let session = ImportSession::from_csv(text, self.read_state().members())?;
        if session.needs_confirmation() {
            log::info!(
                "Import has {} conflicts awaiting resolution",
                session.analysis.conflicts.len()
            );
            return Ok(ImportOutcome::NeedsResolution(session));
        }
        self.commit_import(session).map(ImportOutcome::Committed)
    }

    /// Commit a resolved import. New ids start after the current maximum.
    /// Updates are merged onto the roster as it is now, so changes made since
    /// the session was analyzed are kept.
    pub fn commit_import(&self, session: ImportSession) -> Result<ImportReport> {
        let plan = {
            let state = self.read_state();
            session.analysis.plan(state.next_id(), state.members())
        };
        let mut warnings = session.warnings;
        warnings.extend(plan.warnings.iter().cloned());
        let report = ImportReport {
            inserted: plan.inserts.len(),
            updated: plan.updates.len(),
            skipped: plan.skipped,
            warnings,
        };

        if !plan.is_empty() {
            self.bulk_write(plan.inserts, plan.updates)?;
        }
        log::info!(
            "Import committed: {} inserted, {} updated, {} skipped",
            report.inserted,
            report.updated,
            report.skipped
        );
        Ok(report)
    }

    // ── Remote changes ─────────────────────────────────────────────

    /// Merge one change reported by the gateway. Records that cannot be
    /// mapped are logged and dropped.
    pub fn merge_remote_event(&self, event: ChangeEvent) {
        let (kind, id) = (event.kind(), event.id());
        let change = match event {
            ChangeEvent::Insert(record) => wire::from_record(record).map(RemoteChange::Insert),
            ChangeEvent::Update(record) => wire::from_record(record).map(RemoteChange::Update),
            ChangeEvent::Delete { id } => Ok(RemoteChange::Delete(id)),
        };

        match change {
            Ok(change) => {
                log::debug!("Merging {kind:?} for member {id}");
                self.write_state().apply(change);
            }
            Err(e) => log::warn!("Ignoring {kind:?} event for member {id}: {e}"),
        }
    }

    /// Subscribe to the gateway's change events. Subscribing twice is a no-op.
    pub fn subscribe(&self) -> Result<()> {
        let mut current = lock(&self.subscription);
        if current.is_none() {
            *current = Some(self.gateway.subscribe()?);
        }
        Ok(())
    }

    pub fn unsubscribe(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            self.gateway.unsubscribe(subscription.id);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    /// Merge every queued change event in delivery order.
    /// Returns the number of events processed.
    pub fn process_remote_events(&self) -> usize {
        let events: Vec<ChangeEvent> = match lock(&self.subscription).as_ref() {
            Some(subscription) => subscription.event_rx.try_iter().collect(),
            None => return 0,
        };

        let count = events.len();
        for event in events {
            self.merge_remote_event(event);
        }
        count
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn members(&self) -> Vec<Member> {
        self.read_state().members().to_vec()
    }

    pub fn member(&self, id: MemberId) -> Option<Member> {
        self.read_state().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().is_empty()
    }

    /// The member open in the detail view, as currently stored.
    pub fn selected(&self) -> Option<Member> {
        self.read_state().selected().cloned()
    }

    /// Open a member by id, or close with `None`. Returns false for unknown ids.
    pub fn select(&self, id: Option<MemberId>) -> bool {
        self.write_state().select(id)
    }

    pub fn snapshot(&self) -> RosterState {
        self.read_state().clone()
    }

    pub fn notice(&self) -> Option<Notice> {
        lock(&self.notice).clone()
    }

    pub fn clear_notice(&self) {
        self.set_notice(None);
    }

    /// Tentative id for a new member.
    pub fn next_id(&self) -> MemberId {
        self.read_state().next_id()
    }

    pub fn stats(&self) -> RosterStats {
        RosterStats::compute(self.read_state().members())
    }

    pub fn search(&self, term: &str) -> Vec<Member> {
        stats::search(self.read_state().members(), term)
            .into_iter()
            .cloned()
            .collect()
    }
}

impl<G: Gateway> Drop for Store<G> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
