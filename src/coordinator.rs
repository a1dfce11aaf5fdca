//! Booking workflow: slot reservation, ledger write, calendar, notifications.
//!
//! The slot and the booking record are authoritative and their errors reach
//! the caller. Calendar and notification calls run after them and only ever
//! degrade the result.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::calendar::{CalendarAdapter, MeetingRequest};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::Notifier;
use crate::observability::{
    BOOKINGS_CANCELLED_TOTAL, BOOKINGS_CREATED_TOTAL, BOOKINGS_REJECTED_TOTAL,
    CALENDAR_SOFT_FAILURES_TOTAL,
};

/// Cancellations of one booking are serialized on one of these stripes.
const CANCEL_STRIPES: usize = 64;

const MEETING_SUMMARY: &str = "Mentorship session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub mentor_id: String,
    /// The caller.
    pub mentee_id: String,
    pub mentee_email: String,
    pub mentor_email: Option<String>,
    pub span: Span,
    /// Availability day holding the slot. Defaults to the UTC date of `span.start`.
    pub date: Option<NaiveDate>,
    pub timezone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub booking_id: Ulid,
    pub meet_url: Option<String>,
    pub calendar_html_link: Option<String>,
    pub message: String,
    /// Soft failure tag when no meeting was created.
    pub calendar_status: Option<&'static str>,
}

pub struct Coordinator {
    engine: Arc<Engine>,
    calendar: CalendarAdapter,
    notifier: Notifier,
    cancel_locks: Vec<Mutex<()>>,
}

/// Empty identity means the connection carried no user.
fn authenticated(caller: &str) -> Result<&str, EngineError> {
    if caller.trim().is_empty() {
        return Err(EngineError::Unauthenticated);
    }
    Ok(caller)
}

fn same_user(caller: &str, owner: &str, what: &str) -> Result<(), EngineError> {
    if caller != owner {
        return Err(EngineError::Unauthorized(format!(
            "{caller} may not modify {what} of {owner}"
        )));
    }
    Ok(())
}

fn required(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

fn utc_date(ms: Ms) -> Result<NaiveDate, EngineError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| EngineError::InvalidArgument(format!("timestamp {ms} out of range")))
}

fn booking_meta(booking: &Booking) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("booking_id".to_string(), booking.id.to_string()),
        ("mentor_id".to_string(), booking.mentor_id.clone()),
        ("mentee_id".to_string(), booking.mentee_id.clone()),
        ("start".to_string(), format_ms(booking.span.start)),
        ("end".to_string(), format_ms(booking.span.end)),
    ])
}

impl Coordinator {
    pub fn new(engine: Arc<Engine>, calendar: CalendarAdapter, notifier: Notifier) -> Self {
        Self {
            engine,
            calendar,
            notifier,
            cancel_locks: (0..CANCEL_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    // ── Availability ─────────────────────────────────────────

    /// Replace a day's slots. Only the mentor may write their own days.
    pub async fn set_availability(
        &self,
        caller: &str,
        mentor_id: &str,
        date: NaiveDate,
        timezone: Option<String>,
        slots: Vec<Slot>,
        expected_version: Option<u64>,
    ) -> Result<u64, EngineError> {
        let caller = authenticated(caller)?;
        same_user(caller, mentor_id, "availability")?;
        self.engine
            .set_day(mentor_id, date, timezone, slots, expected_version)
            .await
    }

    /// Remove all of a day's slots. Returns the number removed.
    pub async fn clear_availability(
        &self,
        caller: &str,
        mentor_id: &str,
        date: NaiveDate,
    ) -> Result<usize, EngineError> {
        let caller = authenticated(caller)?;
        same_user(caller, mentor_id, "availability")?;
        self.engine.clear_day(mentor_id, date).await
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn create_booking(&self, request: BookingRequest) -> Result<BookingReceipt, EngineError> {
        let mentee_id = authenticated(&request.mentee_id)?.to_string();
        required("mentor_id", &request.mentor_id)?;
        required("mentee_email", &request.mentee_email)?;
        crate::engine::slots::validate_span(&request.span)?;

        let date = match request.date {
            Some(d) => d,
            None => utc_date(request.span.start)?,
        };
        let mut booking = Booking {
            id: Ulid::new(),
            mentor_id: request.mentor_id,
            mentee_id,
            mentee_email: request.mentee_email,
            mentor_email: request.mentor_email,
            span: request.span,
            date,
            timezone: request.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            notes: request.notes,
            status: BookingStatus::Confirmed,
            meet_url: None,
            calendar_event_id: None,
            calendar_html_link: None,
            created_at: now_ms(),
        };
        crate::engine::validate_booking(&booking)?;

        if let Err(e) = self
            .engine
            .reserve_slot(&booking.mentor_id, date, booking.span, booking.id)
            .await
        {
            if matches!(e, EngineError::SlotUnavailable { .. }) {
                metrics::counter!(BOOKINGS_REJECTED_TOTAL).increment(1);
            }
            debug!(mentor_id = %booking.mentor_id, %date, error = %e, "booking rejected");
            return Err(e);
        }

        let meeting = self
            .calendar
            .create_meeting(&MeetingRequest {
                mentor_id: booking.mentor_id.clone(),
                attendee_email: booking.mentee_email.clone(),
                mentor_email: booking.mentor_email.clone(),
                span: booking.span,
                summary: MEETING_SUMMARY.to_string(),
                description: booking.notes.clone(),
                timezone: booking.timezone.clone(),
                request_id: booking.id.to_string(),
            })
            .await;
        let calendar_status = match meeting {
            Ok(meeting) => {
                booking.meet_url = meeting.meet_link;
                booking.calendar_event_id = Some(meeting.event_id);
                booking.calendar_html_link = meeting.html_link;
                None
            }
            Err(soft) => {
                metrics::counter!(CALENDAR_SOFT_FAILURES_TOTAL, "reason" => soft.reason()).increment(1);
                warn!(booking_id = %booking.id, mentor_id = %booking.mentor_id, error = %soft, "no meeting created");
                Some(soft.reason())
            }
        };

        if let Err(e) = self.engine.create_booking_record(booking.clone()).await {
            error!(booking_id = %booking.id, error = %e, "booking persist failed, releasing slot");
            self.compensate(&booking).await;
            return Err(e);
        }
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking_id = %booking.id, mentor_id = %booking.mentor_id, mentee_id = %booking.mentee_id, "booking confirmed");

        let meta = booking_meta(&booking);
        let when = format_ms(booking.span.start);
        let _ = tokio::join!(
            self.notifier.notify(
                &booking.mentor_id,
                NotificationKind::BookingCreated,
                "New booking".to_string(),
                format!("{} booked a session at {when}", booking.mentee_email),
                meta.clone(),
            ),
            self.notifier.notify(
                &booking.mentee_id,
                NotificationKind::BookingConfirmed,
                "Booking confirmed".to_string(),
                format!("Your session at {when} is confirmed"),
                meta,
            ),
        );

        let message = match &booking.meet_url {
            Some(_) => "Booking confirmed. A meeting link was created.",
            None => "Booking confirmed. No calendar link was created.",
        };
        Ok(BookingReceipt {
            booking_id: booking.id,
            meet_url: booking.meet_url,
            calendar_html_link: booking.calendar_html_link,
            message: message.to_string(),
            calendar_status,
        })
    }

    /// Undo the side effects of a booking whose record never landed.
    async fn compensate(&self, booking: &Booking) {
        if let Err(e) = self
            .engine
            .release_slot(&booking.mentor_id, booking.date, booking.span, booking.id)
            .await
        {
            error!(booking_id = %booking.id, error = %e, "could not release slot after failed persist");
        }
        if let Some(event_id) = &booking.calendar_event_id
            && let Err(soft) = self.calendar.delete_meeting(&booking.mentor_id, event_id).await
        {
            warn!(booking_id = %booking.id, error = %soft, "orphaned calendar event");
        }
    }

    /// Cancel a booking on behalf of one of its parties. Cancelling twice
    /// succeeds without repeating any side effect.
    pub async fn cancel_booking(&self, requester: &str, id: Ulid) -> Result<Booking, EngineError> {
        let requester = authenticated(requester)?;
        let _stripe = self.cancel_locks[(id.0 % CANCEL_STRIPES as u128) as usize]
            .lock()
            .await;

        let booking = self.engine.get_booking(&id)?;
        if !booking.is_party(requester) {
            return Err(EngineError::Unauthorized(format!(
                "{requester} is not a party to booking {id}"
            )));
        }
        if booking.status == BookingStatus::Cancelled {
            debug!(booking_id = %id, "booking already cancelled");
            return Ok(booking);
        }

        if let Some(event_id) = &booking.calendar_event_id
            && let Err(soft) = self.calendar.delete_meeting(&booking.mentor_id, event_id).await
        {
            metrics::counter!(CALENDAR_SOFT_FAILURES_TOTAL, "reason" => soft.reason()).increment(1);
            warn!(booking_id = %id, error = %soft, "calendar event not deleted");
        }

        match self
            .engine
            .release_slot(&booking.mentor_id, booking.date, booking.span, booking.id)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(booking_id = %id, "no booked slot left to release"),
            Err(e) => warn!(booking_id = %id, error = %e, "slot not released"),
        }

        let cancelled = self
            .engine
            .set_booking_status(id, BookingStatus::Cancelled)
            .await?;
        metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking_id = %id, requester, "booking cancelled");

        let meta = booking_meta(&cancelled);
        let body = format!("The session at {} was cancelled", format_ms(cancelled.span.start));
        let _ = tokio::join!(
            self.notifier.notify(
                &cancelled.mentor_id,
                NotificationKind::BookingCancelled,
                "Booking cancelled".to_string(),
                body.clone(),
                meta.clone(),
            ),
            self.notifier.notify(
                &cancelled.mentee_id,
                NotificationKind::BookingCancelled,
                "Booking cancelled".to_string(),
                body,
                meta,
            ),
        );
        Ok(cancelled)
    }

    /// A single booking, visible to its two parties only.
    pub fn booking(&self, caller: &str, id: Ulid) -> Result<Booking, EngineError> {
        let caller = authenticated(caller)?;
        let booking = self.engine.get_booking(&id)?;
        if !booking.is_party(caller) {
            return Err(EngineError::Unauthorized(format!(
                "{caller} is not a party to booking {id}"
            )));
        }
        Ok(booking)
    }

    pub fn list_bookings(
        &self,
        caller: &str,
        party: &Party,
        from: Option<Ms>,
        to: Option<Ms>,
    ) -> Result<Vec<Booking>, EngineError> {
        let caller = authenticated(caller)?;
        same_user(caller, party.user_id(), "bookings")?;
        self.engine.list_bookings(party, from, to)
    }

    // ── Calendar connection ──────────────────────────────────

    pub async fn connect_calendar(
        &self,
        caller: &str,
        mentor_id: &str,
        credentials: CalendarCredentials,
    ) -> Result<(), EngineError> {
        let caller = authenticated(caller)?;
        same_user(caller, mentor_id, "calendar connection")?;
        self.engine.connect_calendar(mentor_id, credentials).await
    }

    pub async fn disconnect_calendar(&self, caller: &str, mentor_id: &str) -> Result<bool, EngineError> {
        let caller = authenticated(caller)?;
        same_user(caller, mentor_id, "calendar connection")?;
        self.engine.disconnect_calendar(mentor_id).await
    }

    // ── Inbox ────────────────────────────────────────────────

    pub fn notifications(&self, caller: &str, unread_only: bool) -> Result<Vec<Notification>, EngineError> {
        let caller = authenticated(caller)?;
        Ok(self.engine.list_notifications(caller, unread_only))
    }

    pub async fn mark_read(&self, caller: &str, id: Ulid) -> Result<(), EngineError> {
        let caller = authenticated(caller)?;
        self.engine.mark_notification_read(id, caller).await
    }
}
