use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Availability ─────────────────────────────────────────────────

/// One bookable range inside a mentor's day. Identified by its exact span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub span: Span,
    pub booked: bool,
    /// The booking occupying this slot. `None` for slots the mentor marked
    /// booked by hand.
    pub holder: Option<Ulid>,
}

impl Slot {
    pub fn free(span: Span) -> Self {
        Self {
            span,
            booked: false,
            holder: None,
        }
    }
}

/// All of one mentor's slots for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityDay {
    pub mentor_id: String,
    pub date: NaiveDate,
    pub timezone: String,
    /// Sorted by `span.start`, never overlapping.
    pub slots: Vec<Slot>,
    pub updated_at: Ms,
    /// Bumped on every mutation. Zero means the day was never written.
    pub version: u64,
}

impl AvailabilityDay {
    pub fn empty(mentor_id: &str, date: NaiveDate) -> Self {
        Self {
            mentor_id: mentor_id.to_string(),
            date,
            timezone: DEFAULT_TIMEZONE.to_string(),
            slots: Vec::new(),
            updated_at: 0,
            version: 0,
        }
    }

    pub fn free_spans(&self) -> impl Iterator<Item = Span> + '_ {
        self.slots.iter().filter(|s| !s.booked).map(|s| s.span)
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(|s| !s.booked)
    }
}

pub const DEFAULT_TIMEZONE: &str = "UTC";

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub mentor_id: String,
    pub mentee_id: String,
    pub mentee_email: String,
    pub mentor_email: Option<String>,
    pub span: Span,
    /// The availability day whose slot this booking occupies.
    pub date: NaiveDate,
    pub timezone: String,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub meet_url: Option<String>,
    pub calendar_event_id: Option<String>,
    pub calendar_html_link: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn is_party(&self, user_id: &str) -> bool {
        self.mentor_id == user_id || self.mentee_id == user_id
    }
}

/// Which side of a booking a listing is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Party {
    Mentor(String),
    Mentee(String),
}

impl Party {
    pub fn user_id(&self) -> &str {
        match self {
            Party::Mentor(id) | Party::Mentee(id) => id,
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        match self {
            Party::Mentor(id) => &booking.mentor_id == id,
            Party::Mentee(id) => &booking.mentee_id == id,
        }
    }
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    ContactMessage,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingCreated => "booking_created",
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::ContactMessage => "contact_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub meta: BTreeMap<String, String>,
    pub read: bool,
    pub created_at: Ms,
}

// ── Calendar credentials ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<Ms>,
    pub calendar_id: String,
    pub email: Option<String>,
}

impl CalendarCredentials {
    /// Tokens within a minute of expiry count as expired.
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at.is_some_and(|at| at - 60_000 <= now)
    }
}

pub const DEFAULT_CALENDAR_ID: &str = "primary";

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DaySet {
        mentor_id: String,
        date: NaiveDate,
        timezone: String,
        slots: Vec<Slot>,
        updated_at: Ms,
        version: u64,
    },
    SlotReserved {
        mentor_id: String,
        date: NaiveDate,
        span: Span,
        booking_id: Ulid,
    },
    SlotReleased {
        mentor_id: String,
        date: NaiveDate,
        span: Span,
        booking_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
    },
    NotificationCreated {
        notification: Notification,
    },
    NotificationRead {
        id: Ulid,
    },
    CalendarConnected {
        mentor_id: String,
        credentials: CalendarCredentials,
    },
    CalendarDisconnected {
        mentor_id: String,
    },
}

// ── Time conversion at the SQL boundary ─────────────────────────

/// A parsed point in time plus the calendar date it was written on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub ms: Ms,
    /// Date part as written (local to the string's offset), UTC for raw ms.
    pub date: NaiveDate,
}

/// Parse an RFC 3339 timestamp or integer milliseconds.
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<Ms>() {
        let date = DateTime::<Utc>::from_timestamp_millis(ms)?.date_naive();
        return Some(Timestamp { ms, date });
    }
    let dt = DateTime::parse_from_rfc3339(s).ok()?;
    Some(Timestamp {
        ms: dt.timestamp_millis(),
        date: dt.date_naive(),
    })
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Parse `YYYY-MM` into (year, month).
pub fn parse_month(s: &str) -> Option<(i32, u32)> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d").ok()?;
    Some((chrono::Datelike::year(&first), chrono::Datelike::month(&first)))
}

pub fn format_ms(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}
