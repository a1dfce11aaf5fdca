mod availability;
mod bookings;
mod credentials;
mod error;
mod inbox;
pub mod slots;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub(crate) use bookings::validate_booking;

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type DayKey = (String, NaiveDate);
pub type SharedDay = Arc<RwLock<AvailabilityDay>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(batch = batch.len(), error = %e, "WAL flush failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Keep per-mentor and per-mentee booking indexes. Without them,
    /// listings fall back to a full scan.
    pub booking_index: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { booking_index: true }
    }
}

#[derive(Default)]
pub(super) struct BookingIndex {
    by_mentor: DashMap<String, Vec<Ulid>>,
    by_mentee: DashMap<String, Vec<Ulid>>,
}

impl BookingIndex {
    fn insert(&self, booking: &Booking) {
        self.by_mentor
            .entry(booking.mentor_id.clone())
            .or_default()
            .push(booking.id);
        self.by_mentee
            .entry(booking.mentee_id.clone())
            .or_default()
            .push(booking.id);
    }

    fn ids_for(&self, party: &Party) -> Vec<Ulid> {
        let map = match party {
            Party::Mentor(_) => &self.by_mentor,
            Party::Mentee(_) => &self.by_mentee,
        };
        map.get(party.user_id())
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

/// Per-tenant state: availability days, the booking ledger, notification
/// inboxes and calendar credentials, all rebuilt from the WAL at startup.
pub struct Engine {
    pub(super) days: DashMap<DayKey, SharedDay>,
    /// Mentor → dates that have ever been written, for month scans.
    pub(super) mentor_dates: DashMap<String, BTreeSet<NaiveDate>>,
    pub(super) bookings: DashMap<Ulid, Booking>,
    pub(super) booking_index: Option<BookingIndex>,
    pub(super) notifications: DashMap<Ulid, Notification>,
    pub(super) inboxes: DashMap<String, Vec<Ulid>>,
    pub(super) credentials: DashMap<String, CalendarCredentials>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss an event that is already in the WAL.
    pub(super) compaction_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a day-scoped event to an already-locked day.
fn apply_to_day(day: &mut AvailabilityDay, event: &Event) {
    match event {
        Event::DaySet {
            timezone,
            slots,
            updated_at,
            version,
            ..
        } => {
            day.timezone = timezone.clone();
            day.slots = slots.clone();
            day.updated_at = *updated_at;
            day.version = *version;
        }
        Event::SlotReserved { span, booking_id, .. } => {
            slots::mark_booked(day, span, *booking_id);
            day.version += 1;
        }
        Event::SlotReleased { span, booking_id, .. } => {
            slots::mark_free(day, span, *booking_id);
            day.version += 1;
        }
        _ => {}
    }
}

/// Extract the day key from a day-scoped event.
fn event_day_key(event: &Event) -> Option<DayKey> {
    match event {
        Event::DaySet { mentor_id, date, .. }
        | Event::SlotReserved { mentor_id, date, .. }
        | Event::SlotReleased { mentor_id, date, .. } => Some((mentor_id.clone(), *date)),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_options(wal_path, EngineOptions::default())
    }

    pub fn with_options(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            days: DashMap::new(),
            mentor_dates: DashMap::new(),
            bookings: DashMap::new(),
            booking_index: options.booking_index.then(BookingIndex::default),
            notifications: DashMap::new(),
            inboxes: DashMap::new(),
            credentials: DashMap::new(),
            compaction_gate: RwLock::new(()),
            wal_tx,
        };

        // We're the sole owner of every day Arc during replay, so try_write
        // always succeeds. Never block here: this may run inside an async
        // context (lazy tenant creation).
        for event in &events {
            match event_day_key(event) {
                Some((mentor_id, date)) => {
                    let shared = engine.day_entry(&mentor_id, date);
                    let mut guard = shared.try_write().map_err(|_| {
                        io::Error::other(format!("day {mentor_id}/{date} locked during replay"))
                    })?;
                    apply_to_day(&mut guard, event);
                    engine.mentor_dates.entry(mentor_id).or_default().insert(date);
                }
                None => engine.apply_record(event),
            }
        }
        tracing::debug!(events = events.len(), "engine replayed WAL");

        Ok(engine)
    }

    /// Apply a non-day event (bookings, inbox, credentials).
    fn apply_record(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                if let Some(index) = &self.booking_index {
                    index.insert(booking);
                }
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingCancelled { id } => {
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.status = BookingStatus::Cancelled;
                }
            }
            Event::NotificationCreated { notification } => {
                self.inboxes
                    .entry(notification.user_id.clone())
                    .or_default()
                    .push(notification.id);
                self.notifications.insert(notification.id, notification.clone());
            }
            Event::NotificationRead { id } => {
                if let Some(mut n) = self.notifications.get_mut(id) {
                    n.read = true;
                }
            }
            Event::CalendarConnected {
                mentor_id,
                credentials,
            } => {
                self.credentials.insert(mentor_id.clone(), credentials.clone());
            }
            Event::CalendarDisconnected { mentor_id } => {
                self.credentials.remove(mentor_id);
            }
            Event::DaySet { .. } | Event::SlotReserved { .. } | Event::SlotReleased { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append a day event and apply it to the locked day.
    pub(super) async fn persist_day(
        &self,
        day: &mut AvailabilityDay,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event);
        self.mentor_dates
            .entry(day.mentor_id.clone())
            .or_default()
            .insert(day.date);
        Ok(())
    }

    /// WAL-append a record event and apply it.
    pub(super) async fn persist_record(&self, event: &Event) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        self.wal_append(event).await?;
        self.apply_record(event);
        Ok(())
    }

    /// Get or create the shared cell for a day. Creating an empty day is
    /// indistinguishable from absence, so this is safe on failed writes.
    pub(super) fn day_entry(&self, mentor_id: &str, date: NaiveDate) -> SharedDay {
        self.days
            .entry((mentor_id.to_string(), date))
            .or_insert_with(|| Arc::new(RwLock::new(AvailabilityDay::empty(mentor_id, date))))
            .value()
            .clone()
    }

    pub async fn appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let shared_days: Vec<SharedDay> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for shared in shared_days {
            let day = shared.read().await;
            if day.version == 0 {
                continue;
            }
            events.push(Event::DaySet {
                mentor_id: day.mentor_id.clone(),
                date: day.date,
                timezone: day.timezone.clone(),
                slots: day.slots.clone(),
                updated_at: day.updated_at,
                version: day.version,
            });
        }

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));

        let mut notifications: Vec<Notification> =
            self.notifications.iter().map(|e| e.value().clone()).collect();
        notifications.sort_by_key(|n| n.id);
        events.extend(
            notifications
                .into_iter()
                .map(|notification| Event::NotificationCreated { notification }),
        );

        events.extend(self.credentials.iter().map(|e| Event::CalendarConnected {
            mentor_id: e.key().clone(),
            credentials: e.value().clone(),
        }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}
