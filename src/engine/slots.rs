use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Slot Locking Policy ──────────────────────────────────────────
//
// Pure functions over one day. The engine calls them while holding the
// day's write lock, so a find + flip pair is never interleaved with
// another writer on the same day.

/// Index of the slot whose span equals `span` exactly and is still free.
pub fn find_free(day: &AvailabilityDay, span: &Span) -> Result<usize, EngineError> {
    day.slots
        .iter()
        .position(|s| s.span == *span && !s.booked)
        .ok_or_else(|| EngineError::SlotUnavailable {
            mentor_id: day.mentor_id.clone(),
            date: day.date,
            span: *span,
        })
}

/// Index of the slot matching `span` that `holder` has booked, if any.
pub fn find_booked(day: &AvailabilityDay, span: &Span, holder: Ulid) -> Option<usize> {
    day.slots
        .iter()
        .position(|s| s.span == *span && s.booked && s.holder == Some(holder))
}

pub fn mark_booked(day: &mut AvailabilityDay, span: &Span, holder: Ulid) -> bool {
    match day.slots.iter_mut().find(|s| s.span == *span && !s.booked) {
        Some(slot) => {
            slot.booked = true;
            slot.holder = Some(holder);
            true
        }
        None => false,
    }
}

/// Free the slot only if `holder` is the booking occupying it.
pub fn mark_free(day: &mut AvailabilityDay, span: &Span, holder: Ulid) -> bool {
    match find_booked(day, span, holder) {
        Some(i) => {
            day.slots[i].booked = false;
            day.slots[i].holder = None;
            true
        }
        None => false,
    }
}

/// Keep the holder of a slot the replacement list still marks booked.
/// A slot written as free drops its holder.
pub(crate) fn carry_holders(previous: &[Slot], slots: &mut [Slot]) {
    for slot in slots.iter_mut() {
        if !slot.booked {
            slot.holder = None;
        } else if slot.holder.is_none() {
            slot.holder = previous
                .iter()
                .find(|p| p.span == slot.span && p.booked)
                .and_then(|p| p.holder);
        }
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidArgument(
            "slot start must be before end".into(),
        ));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SLOT_DURATION_MS {
        return Err(EngineError::LimitExceeded("slot too long"));
    }
    Ok(())
}

/// Sort a replacement slot list and reject overlaps.
pub(crate) fn normalize_slots(mut slots: Vec<Slot>) -> Result<Vec<Slot>, EngineError> {
    if slots.len() > MAX_SLOTS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many slots in one day"));
    }
    for slot in &slots {
        validate_span(&slot.span)?;
    }
    slots.sort_by_key(|s| (s.span.start, s.span.end));
    for pair in slots.windows(2) {
        if pair[0].span.overlaps(&pair[1].span) {
            return Err(EngineError::InvalidArgument(format!(
                "slots overlap: [{}, {}) and [{}, {})",
                format_ms(pair[0].span.start),
                format_ms(pair[0].span.end),
                format_ms(pair[1].span.start),
                format_ms(pair[1].span.end),
            )));
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const M: Ms = 60_000;
    // 2025-08-10T16:00:00Z
    const T0: Ms = 1_754_841_600_000;

    fn day(slots: Vec<Slot>) -> AvailabilityDay {
        let mut d = AvailabilityDay::empty("mentor", NaiveDate::from_ymd_opt(2025, 8, 10).unwrap());
        d.slots = slots;
        d
    }

    #[test]
    fn find_free_exact_match_only() {
        let d = day(vec![Slot::free(Span::new(T0, T0 + 30 * M))]);
        assert_eq!(find_free(&d, &Span::new(T0, T0 + 30 * M)).unwrap(), 0);
        // Contained but not equal
        assert!(matches!(
            find_free(&d, &Span::new(T0, T0 + 15 * M)),
            Err(EngineError::SlotUnavailable { .. })
        ));
    }

    #[test]
    fn find_free_skips_booked() {
        let holder = Ulid::new();
        let d = day(vec![Slot {
            span: Span::new(T0, T0 + 30 * M),
            booked: true,
            holder: Some(holder),
        }]);
        assert!(find_free(&d, &Span::new(T0, T0 + 30 * M)).is_err());
        assert_eq!(find_booked(&d, &Span::new(T0, T0 + 30 * M), holder), Some(0));
        assert_eq!(find_booked(&d, &Span::new(T0, T0 + 30 * M), Ulid::new()), None);
    }

    #[test]
    fn never_existed_and_booked_report_same_error() {
        let d = day(vec![Slot {
            span: Span::new(T0, T0 + 30 * M),
            booked: true,
            holder: None,
        }]);
        let booked = find_free(&d, &Span::new(T0, T0 + 30 * M)).unwrap_err();
        let missing = find_free(&d, &Span::new(T0 + 60 * M, T0 + 90 * M)).unwrap_err();
        assert!(matches!(booked, EngineError::SlotUnavailable { .. }));
        assert!(matches!(missing, EngineError::SlotUnavailable { .. }));
    }

    #[test]
    fn mark_booked_then_free() {
        let span = Span::new(T0, T0 + 30 * M);
        let mut d = day(vec![Slot::free(span)]);
        let holder = Ulid::new();
        assert!(mark_booked(&mut d, &span, holder));
        assert!(!mark_booked(&mut d, &span, Ulid::new()));
        assert!(d.slots[0].booked);
        assert_eq!(d.slots[0].holder, Some(holder));
        assert!(!mark_free(&mut d, &span, Ulid::new()));
        assert!(d.slots[0].booked);
        assert!(mark_free(&mut d, &span, holder));
        assert!(!mark_free(&mut d, &span, holder));
        assert!(!d.slots[0].booked);
        assert_eq!(d.slots[0].holder, None);
    }

    #[test]
    fn republished_booked_slot_keeps_its_holder() {
        let kept = Span::new(T0, T0 + 30 * M);
        let freed = Span::new(T0 + 30 * M, T0 + 60 * M);
        let a = Ulid::new();
        let b = Ulid::new();
        let previous = vec![
            Slot { span: kept, booked: true, holder: Some(a) },
            Slot { span: freed, booked: true, holder: Some(b) },
        ];
        let mut next = vec![
            Slot { span: kept, booked: true, holder: None },
            Slot::free(freed),
        ];
        carry_holders(&previous, &mut next);
        assert_eq!(next[0].holder, Some(a));
        assert_eq!(next[1].holder, None);
    }

    #[test]
    fn normalize_sorts_and_rejects_overlap() {
        let a = Slot::free(Span::new(T0 + 30 * M, T0 + 60 * M));
        let b = Slot::free(Span::new(T0, T0 + 30 * M));
        let sorted = normalize_slots(vec![a, b]).unwrap();
        assert_eq!(sorted, vec![b, a]);

        let c = Slot::free(Span::new(T0 + 15 * M, T0 + 45 * M));
        assert!(matches!(
            normalize_slots(vec![a, b, c]),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn validate_span_rejects_inverted_and_out_of_range() {
        assert!(matches!(
            validate_span(&Span { start: T0, end: T0 }),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(0, 1000)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(T0, T0 + MAX_SLOT_DURATION_MS + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_span(&Span::new(T0, T0 + M)).is_ok());
    }
}
