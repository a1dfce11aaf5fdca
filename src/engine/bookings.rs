use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::validate_user_id;
use super::{Engine, EngineError};

pub(crate) fn validate_booking(booking: &Booking) -> Result<(), EngineError> {
    validate_user_id("mentor_id", &booking.mentor_id)?;
    validate_user_id("mentee_id", &booking.mentee_id)?;
    if booking.mentee_email.trim().is_empty() {
        return Err(EngineError::InvalidArgument("mentee_email is required".into()));
    }
    let emails = std::iter::once(&booking.mentee_email).chain(booking.mentor_email.as_ref());
    for email in emails {
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
    }
    if booking.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if booking.timezone.len() > MAX_TIMEZONE_LEN {
        return Err(EngineError::LimitExceeded("timezone label too long"));
    }
    super::slots::validate_span(&booking.span)
}

impl Engine {
    /// Persist a new booking record. The id is chosen by the caller.
    pub async fn create_booking_record(&self, booking: Booking) -> Result<Ulid, EngineError> {
        validate_booking(&booking)?;
        if self.bookings.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        let id = booking.id;
        self.persist_record(&Event::BookingCreated { booking }).await?;
        Ok(id)
    }

    pub fn get_booking(&self, id: &Ulid) -> Result<Booking, EngineError> {
        self.bookings
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::booking_not_found(*id))
    }

    /// Only confirmed → cancelled exists. Setting the status a booking
    /// already has is a no-op.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let current = self.get_booking(&id)?;
        match (current.status, status) {
            (from, to) if from == to => return Ok(current),
            (BookingStatus::Confirmed, BookingStatus::Cancelled) => {}
            (from, to) => {
                return Err(EngineError::InvalidArgument(format!(
                    "booking {id} cannot move from {} to {}",
                    from.as_str(),
                    to.as_str()
                )));
            }
        }
        self.persist_record(&Event::BookingCancelled { id }).await?;
        self.get_booking(&id)
    }

    /// Bookings for one party, ascending by start. `from` keeps bookings
    /// starting at or after it, `to` keeps bookings ending at or before it.
    pub fn list_bookings(
        &self,
        party: &Party,
        from: Option<Ms>,
        to: Option<Ms>,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_user_id("party", party.user_id())?;

        let mut items: Vec<Booking> = match &self.booking_index {
            Some(index) => index
                .ids_for(party)
                .iter()
                .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
                .collect(),
            None => {
                tracing::debug!(party = party.user_id(), "no booking index, scanning");
                self.bookings
                    .iter()
                    .filter(|e| party.matches(e.value()))
                    .map(|e| e.value().clone())
                    .collect()
            }
        };

        items.retain(|b| {
            from.is_none_or(|f| b.span.start >= f) && to.is_none_or(|t| b.span.end <= t)
        });
        items.sort_by_key(|b| (b.span.start, b.id));
        Ok(items)
    }
}
