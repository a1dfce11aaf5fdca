use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use ulid::Ulid;

use super::slots::{carry_holders, find_booked, find_free, normalize_slots};
use super::{Engine, EngineError};

pub(crate) fn validate_user_id(field: &str, id: &str) -> Result<(), EngineError> {
    if id.trim().is_empty() {
        return Err(EngineError::InvalidArgument(format!("{field} is required")));
    }
    if id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}

impl Engine {
    /// Absence is not an error: a day nobody wrote has zero slots.
    pub async fn get_day(&self, mentor_id: &str, date: NaiveDate) -> Result<AvailabilityDay, EngineError> {
        validate_user_id("mentor_id", mentor_id)?;
        let shared = match self.days.get(&(mentor_id.to_string(), date)) {
            Some(entry) => entry.value().clone(),
            None => return Ok(AvailabilityDay::empty(mentor_id, date)),
        };
        let day = shared.read().await.clone();
        Ok(day)
    }

    /// Replace the whole slot list for one day. Nothing is merged: slots the
    /// caller leaves out are gone, and `booked` is taken as given. A slot that
    /// stays booked keeps the booking holding it.
    ///
    /// With `expected_version`, the write only lands if the stored day is
    /// still at that version. Returns the new version.
    pub async fn set_day(
        &self,
        mentor_id: &str,
        date: NaiveDate,
        timezone: Option<String>,
        slots: Vec<Slot>,
        expected_version: Option<u64>,
    ) -> Result<u64, EngineError> {
        validate_user_id("mentor_id", mentor_id)?;
        let timezone = timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        if timezone.is_empty() || timezone.len() > MAX_TIMEZONE_LEN {
            return Err(EngineError::InvalidArgument("bad timezone label".into()));
        }
        let mut slots = normalize_slots(slots)?;

        let _gate = self.compaction_gate.read().await;
        let shared = self.day_entry(mentor_id, date);
        let mut guard = shared.write().await;

        if let Some(expected) = expected_version
            && expected != guard.version {
                return Err(EngineError::VersionConflict {
                    expected,
                    actual: guard.version,
                });
            }

        carry_holders(&guard.slots, &mut slots);
        let version = guard.version + 1;
        let event = Event::DaySet {
            mentor_id: mentor_id.to_string(),
            date,
            timezone,
            slots,
            updated_at: now_ms(),
            version,
        };
        self.persist_day(&mut guard, &event).await?;
        tracing::debug!(mentor_id, %date, version, slots = guard.slots.len(), "availability day replaced");
        Ok(version)
    }

    /// Drop every slot of a day. Returns how many slots were removed; a day
    /// with none is left untouched.
    pub async fn clear_day(&self, mentor_id: &str, date: NaiveDate) -> Result<usize, EngineError> {
        validate_user_id("mentor_id", mentor_id)?;
        let _gate = self.compaction_gate.read().await;
        let shared = match self.days.get(&(mentor_id.to_string(), date)) {
            Some(entry) => entry.value().clone(),
            None => return Ok(0),
        };
        let mut guard = shared.write().await;
        let removed = guard.slots.len();
        if removed == 0 {
            return Ok(0);
        }

        let event = Event::DaySet {
            mentor_id: mentor_id.to_string(),
            date,
            timezone: guard.timezone.clone(),
            slots: Vec::new(),
            updated_at: now_ms(),
            version: guard.version + 1,
        };
        self.persist_day(&mut guard, &event).await?;
        tracing::debug!(mentor_id, %date, removed, "availability day cleared");
        Ok(removed)
    }

    /// Unbooked slots for one day, ascending.
    pub async fn free_slots(&self, mentor_id: &str, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let day = self.get_day(mentor_id, date).await?;
        Ok(day.free_spans().collect())
    }

    /// Dates in the month that still have at least one free slot.
    pub async fn list_month(
        &self,
        mentor_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        validate_user_id("mentor_id", mentor_id)?;
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::InvalidArgument(format!("bad month {year}-{month:02}")))?;

        let candidates: Vec<NaiveDate> = match self.mentor_dates.get(mentor_id) {
            Some(dates) => dates
                .range(first..)
                .take_while(|d| d.year() == year && d.month() == month)
                .copied()
                .collect(),
            None => return Ok(Vec::new()),
        };

        let mut open = Vec::with_capacity(candidates.len());
        for date in candidates {
            if self.get_day(mentor_id, date).await?.has_free_slot() {
                open.push(date);
            }
        }
        Ok(open)
    }

    /// Flip the exact free slot to booked by `booking_id`. Check and flip
    /// happen under the day's write lock, so two requests for one slot can't
    /// both win.
    pub async fn reserve_slot(
        &self,
        mentor_id: &str,
        date: NaiveDate,
        span: Span,
        booking_id: Ulid,
    ) -> Result<(), EngineError> {
        validate_user_id("mentor_id", mentor_id)?;
        let _gate = self.compaction_gate.read().await;
        let shared = match self.days.get(&(mentor_id.to_string(), date)) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(EngineError::SlotUnavailable {
                    mentor_id: mentor_id.to_string(),
                    date,
                    span,
                });
            }
        };
        let mut guard = shared.write().await;
        find_free(&guard, &span)?;

        let event = Event::SlotReserved {
            mentor_id: mentor_id.to_string(),
            date,
            span,
            booking_id,
        };
        self.persist_day(&mut guard, &event).await
    }

    /// Free the slot `booking_id` holds. Returns `false` when that booking
    /// holds no slot with this span, which is not an error: the mentor may
    /// have rewritten the day and another booking may own the slot now.
    pub async fn release_slot(
        &self,
        mentor_id: &str,
        date: NaiveDate,
        span: Span,
        booking_id: Ulid,
    ) -> Result<bool, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let shared = match self.days.get(&(mentor_id.to_string(), date)) {
            Some(entry) => entry.value().clone(),
            None => return Ok(false),
        };
        let mut guard = shared.write().await;
        if find_booked(&guard, &span, booking_id).is_none() {
            return Ok(false);
        }

        let event = Event::SlotReleased {
            mentor_id: mentor_id.to_string(),
            date,
            span,
            booking_id,
        };
        self.persist_day(&mut guard, &event).await?;
        Ok(true)
    }
}
