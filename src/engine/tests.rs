use super::*;
use crate::limits::*;

const START: Ms = 1_754_841_600_000; // 2025-08-10T16:00:00Z
const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 10).unwrap()
}

fn slot(start: Ms, end: Ms) -> Slot {
    Slot::free(Span::new(start, end))
}

fn two_slots() -> Vec<Slot> {
    vec![slot(START, START + 30 * M), slot(START + 30 * M, START + H)]
}

fn booking_for(mentor: &str, mentee: &str, span: Span) -> Booking {
    Booking {
        id: Ulid::new(),
        mentor_id: mentor.into(),
        mentee_id: mentee.into(),
        mentee_email: format!("{mentee}@example.com"),
        mentor_email: None,
        span,
        date: day(),
        timezone: DEFAULT_TIMEZONE.into(),
        notes: None,
        status: BookingStatus::Confirmed,
        meet_url: None,
        calendar_event_id: None,
        calendar_html_link: None,
        created_at: now_ms(),
    }
}

fn notification_for(user: &str, kind: NotificationKind) -> Notification {
    Notification {
        id: Ulid::new(),
        user_id: user.into(),
        kind,
        title: "t".into(),
        body: "b".into(),
        meta: Default::default(),
        read: false,
        created_at: now_ms(),
    }
}

fn creds(token: &str) -> CalendarCredentials {
    CalendarCredentials {
        access_token: token.into(),
        refresh_token: Some("refresh".into()),
        expires_at: None,
        calendar_id: DEFAULT_CALENDAR_ID.into(),
        email: None,
    }
}

// ── Slot policy ──────────────────────────────────────────

#[test]
fn find_free_requires_exact_match() {
    let mut d = AvailabilityDay::empty("m", day());
    d.slots = two_slots();
    assert_eq!(slots::find_free(&d, &Span::new(START, START + 30 * M)).unwrap(), 0);
    assert!(slots::find_free(&d, &Span::new(START, START + 29 * M)).is_err());
    assert!(slots::find_free(&d, &Span::new(START, START + H)).is_err());

    let holder = Ulid::new();
    assert!(slots::mark_booked(&mut d, &Span::new(START, START + 30 * M), holder));
    assert!(slots::find_free(&d, &Span::new(START, START + 30 * M)).is_err());
    assert_eq!(slots::find_booked(&d, &Span::new(START, START + 30 * M), holder), Some(0));
    assert!(!slots::mark_booked(&mut d, &Span::new(START, START + 30 * M), holder));
    assert!(slots::mark_free(&mut d, &Span::new(START, START + 30 * M), holder));
    assert!(!slots::mark_free(&mut d, &Span::new(START, START + 30 * M), holder));
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tandem_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

#[tokio::test]
async fn unknown_day_is_empty() {
    let engine = Engine::new(test_wal_path("unknown_day.wal")).unwrap();
    let d = engine.get_day("m", day()).await.unwrap();
    assert!(d.slots.is_empty());
    assert_eq!(d.version, 0);
    assert_eq!(d.timezone, DEFAULT_TIMEZONE);
    assert!(engine.free_slots("m", day()).await.unwrap().is_empty());
}

#[tokio::test]
async fn set_day_replaces_wholesale() {
    let engine = Engine::new(test_wal_path("set_day.wal")).unwrap();
    let v1 = engine
        .set_day("m", day(), Some("Europe/Berlin".into()), two_slots(), None)
        .await
        .unwrap();
    assert_eq!(v1, 1);

    let v2 = engine
        .set_day("m", day(), None, vec![slot(START + 2 * H, START + 3 * H)], None)
        .await
        .unwrap();
    assert_eq!(v2, 2);

    let d = engine.get_day("m", day()).await.unwrap();
    assert_eq!(d.slots, vec![slot(START + 2 * H, START + 3 * H)]);
    assert_eq!(d.timezone, DEFAULT_TIMEZONE);
    assert!(d.updated_at > 0);
}

#[tokio::test]
async fn set_day_twice_is_idempotent() {
    let engine = Engine::new(test_wal_path("idempotent.wal")).unwrap();
    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    let first = engine.get_day("m", day()).await.unwrap();
    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    let second = engine.get_day("m", day()).await.unwrap();
    assert_eq!(first.slots, second.slots);
    assert_eq!(first.timezone, second.timezone);
}

#[tokio::test]
async fn set_day_sorts_and_keeps_booked_flag() {
    let engine = Engine::new(test_wal_path("sorted.wal")).unwrap();
    let mut slots = two_slots();
    slots.reverse();
    slots[0].booked = true;
    engine.set_day("m", day(), None, slots, None).await.unwrap();

    let d = engine.get_day("m", day()).await.unwrap();
    assert_eq!(d.slots[0].span.start, START);
    assert!(d.slots[1].booked);
    assert_eq!(
        engine.free_slots("m", day()).await.unwrap(),
        vec![Span::new(START, START + 30 * M)]
    );
}

#[tokio::test]
async fn set_day_rejects_bad_input() {
    let engine = Engine::new(test_wal_path("bad_input.wal")).unwrap();

    let overlapping = vec![slot(START, START + H), slot(START + 30 * M, START + 2 * H)];
    let err = engine.set_day("m", day(), None, overlapping, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let backwards = vec![Slot::free(Span { start: START + H, end: START })];
    let err = engine.set_day("m", day(), None, backwards, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let too_long = vec![slot(START, START + MAX_SLOT_DURATION_MS + 1)];
    let err = engine.set_day("m", day(), None, too_long, None).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let too_many: Vec<Slot> = (0..=MAX_SLOTS_PER_DAY as i64)
        .map(|i| slot(START + i * M, START + (i + 1) * M))
        .collect();
    let err = engine.set_day("m", day(), None, too_many, None).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let err = engine.set_day("", day(), None, two_slots(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    // Nothing landed.
    assert_eq!(engine.get_day("m", day()).await.unwrap().version, 0);
}

#[tokio::test]
async fn set_day_compare_and_swap() {
    let engine = Engine::new(test_wal_path("cas.wal")).unwrap();
    let v = engine.set_day("m", day(), None, two_slots(), Some(0)).await.unwrap();
    assert_eq!(v, 1);

    let err = engine.set_day("m", day(), None, vec![], Some(0)).await.unwrap_err();
    match err {
        EngineError::VersionConflict { expected, actual } => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected VersionConflict, got {other}"),
    }

    // A reservation bumps the version too.
    engine
        .reserve_slot("m", day(), Span::new(START, START + 30 * M), Ulid::new())
        .await
        .unwrap();
    let err = engine.set_day("m", day(), None, vec![], Some(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::VersionConflict { actual: 2, .. }));
    assert_eq!(engine.set_day("m", day(), None, vec![], Some(2)).await.unwrap(), 3);
}

#[tokio::test]
async fn clear_day_reports_removed_slots() {
    let engine = Engine::new(test_wal_path("clear_day.wal")).unwrap();
    assert_eq!(engine.clear_day("m", day()).await.unwrap(), 0);
    assert_eq!(engine.get_day("m", day()).await.unwrap().version, 0);

    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    assert_eq!(engine.clear_day("m", day()).await.unwrap(), 2);
    let d = engine.get_day("m", day()).await.unwrap();
    assert!(d.slots.is_empty());
    assert_eq!(d.version, 2);
    assert_eq!(engine.clear_day("m", day()).await.unwrap(), 0);
}

#[tokio::test]
async fn reserve_and_release() {
    let engine = Engine::new(test_wal_path("reserve.wal")).unwrap();
    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    let span = Span::new(START, START + 30 * M);
    let holder = Ulid::new();

    engine.reserve_slot("m", day(), span, holder).await.unwrap();
    assert_eq!(
        engine.free_slots("m", day()).await.unwrap(),
        vec![Span::new(START + 30 * M, START + H)]
    );

    let err = engine.reserve_slot("m", day(), span, Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotUnavailable { .. }));

    assert!(!engine.release_slot("m", day(), span, Ulid::new()).await.unwrap());
    assert!(engine.release_slot("m", day(), span, holder).await.unwrap());
    assert!(!engine.release_slot("m", day(), span, holder).await.unwrap());
    assert_eq!(engine.free_slots("m", day()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn republished_slot_belongs_to_the_new_booking() {
    let engine = Engine::new(test_wal_path("republish_holder.wal")).unwrap();
    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    let span = Span::new(START, START + 30 * M);
    let first = Ulid::new();
    let second = Ulid::new();

    engine.reserve_slot("m", day(), span, first).await.unwrap();
    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    engine.reserve_slot("m", day(), span, second).await.unwrap();

    assert!(!engine.release_slot("m", day(), span, first).await.unwrap());
    let d = engine.get_day("m", day()).await.unwrap();
    assert!(d.slots[0].booked);
    assert_eq!(d.slots[0].holder, Some(second));
}

#[tokio::test]
async fn republishing_a_booked_slot_keeps_its_holder() {
    let engine = Engine::new(test_wal_path("republish_keep.wal")).unwrap();
    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    let span = Span::new(START, START + 30 * M);
    let holder = Ulid::new();
    engine.reserve_slot("m", day(), span, holder).await.unwrap();

    let mut slots = two_slots();
    slots[0].booked = true;
    engine.set_day("m", day(), None, slots, None).await.unwrap();
    assert_eq!(engine.get_day("m", day()).await.unwrap().slots[0].holder, Some(holder));
    assert!(engine.release_slot("m", day(), span, holder).await.unwrap());
}

#[tokio::test]
async fn reserve_on_missing_day_is_slot_unavailable() {
    let engine = Engine::new(test_wal_path("reserve_missing.wal")).unwrap();
    let err = engine
        .reserve_slot("m", day(), Span::new(START, START + 30 * M), Ulid::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotUnavailable { .. }));
    assert!(!engine
        .release_slot("m", day(), Span::new(START, START + 30 * M), Ulid::new())
        .await
        .unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_one_winner() {
    let engine = Arc::new(Engine::new(test_wal_path("reserve_race.wal")).unwrap());
    engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    let span = Span::new(START, START + 30 * M);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reserve_slot("m", day(), span, Ulid::new()).await })
        })
        .collect();
    let mut wins = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(engine.get_day("m", day()).await.unwrap().version, 2);
}

#[tokio::test]
async fn month_listing_only_days_with_free_slots() {
    let engine = Engine::new(test_wal_path("month.wal")).unwrap();
    let d10 = day();
    let d11 = NaiveDate::from_ymd_opt(2025, 8, 11).unwrap();
    let d12 = NaiveDate::from_ymd_opt(2025, 8, 12).unwrap();
    let sep1 = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();

    engine.set_day("m", d10, None, two_slots(), None).await.unwrap();
    engine
        .set_day("m", d11, None, vec![slot(START + 24 * H, START + 25 * H)], None)
        .await
        .unwrap();
    engine.set_day("m", d12, None, vec![], None).await.unwrap();
    engine
        .set_day("m", sep1, None, vec![slot(START + 30 * 24 * H, START + 30 * 24 * H + H)], None)
        .await
        .unwrap();

    engine
        .reserve_slot("m", d11, Span::new(START + 24 * H, START + 25 * H), Ulid::new())
        .await
        .unwrap();

    assert_eq!(engine.list_month("m", 2025, 8).await.unwrap(), vec![d10]);
    assert_eq!(engine.list_month("m", 2025, 9).await.unwrap(), vec![sep1]);
    assert!(engine.list_month("other", 2025, 8).await.unwrap().is_empty());
    assert!(engine.list_month("m", 2025, 13).await.is_err());
}

// ── Booking records ──────────────────────────────────────

#[tokio::test]
async fn booking_record_lifecycle() {
    let engine = Engine::new(test_wal_path("booking_record.wal")).unwrap();
    let b = booking_for("m", "x", Span::new(START, START + 30 * M));
    let id = engine.create_booking_record(b.clone()).await.unwrap();
    assert_eq!(engine.get_booking(&id).unwrap(), b);

    let err = engine.create_booking_record(b.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));

    let cancelled = engine.set_booking_status(id, BookingStatus::Cancelled).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    // Same status again is a no-op.
    engine.set_booking_status(id, BookingStatus::Cancelled).await.unwrap();
    let err = engine.set_booking_status(id, BookingStatus::Confirmed).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let err = engine.get_booking(&Ulid::new()).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    let err = engine
        .set_booking_status(Ulid::new(), BookingStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn booking_record_validation() {
    let engine = Engine::new(test_wal_path("booking_validation.wal")).unwrap();
    let mut b = booking_for("m", "x", Span::new(START, START + 30 * M));
    b.mentee_email = " ".into();
    assert!(matches!(
        engine.create_booking_record(b).await.unwrap_err(),
        EngineError::InvalidArgument(_)
    ));

    let mut b = booking_for("m", "x", Span::new(START, START + 30 * M));
    b.notes = Some("n".repeat(MAX_NOTES_LEN + 1));
    assert!(matches!(
        engine.create_booking_record(b).await.unwrap_err(),
        EngineError::LimitExceeded(_)
    ));
}

async fn seed_bookings(engine: &Engine) {
    for (i, mentee) in ["x", "y", "x"].iter().enumerate() {
        // Inserted out of order on purpose.
        let offset = (2 - i as i64) * H;
        let b = booking_for("m", mentee, Span::new(START + offset, START + offset + 30 * M));
        engine.create_booking_record(b).await.unwrap();
    }
    let other = booking_for("n", "x", Span::new(START + 3 * H, START + 4 * H));
    engine.create_booking_record(other).await.unwrap();
}

#[tokio::test]
async fn list_bookings_sorted_and_filtered() {
    let engine = Engine::new(test_wal_path("list_bookings.wal")).unwrap();
    seed_bookings(&engine).await;

    let mentor = engine.list_bookings(&Party::Mentor("m".into()), None, None).unwrap();
    let starts: Vec<Ms> = mentor.iter().map(|b| b.span.start).collect();
    assert_eq!(starts, vec![START, START + H, START + 2 * H]);

    let mentee = engine.list_bookings(&Party::Mentee("x".into()), None, None).unwrap();
    assert_eq!(mentee.len(), 3);

    let window = engine
        .list_bookings(&Party::Mentor("m".into()), Some(START + H), Some(START + H + 30 * M))
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].span.start, START + H);

    assert!(engine
        .list_bookings(&Party::Mentee("nobody".into()), None, None)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn listing_without_index_matches_indexed() {
    let indexed = Engine::new(test_wal_path("indexed.wal")).unwrap();
    let scanned = Engine::with_options(
        test_wal_path("scanned.wal"),
        EngineOptions { booking_index: false },
    )
    .unwrap();
    seed_bookings(&indexed).await;
    seed_bookings(&scanned).await;

    for party in [Party::Mentor("m".into()), Party::Mentee("x".into()), Party::Mentee("y".into())] {
        let a: Vec<Span> = indexed
            .list_bookings(&party, Some(START), None)
            .unwrap()
            .iter()
            .map(|b| b.span)
            .collect();
        let b: Vec<Span> = scanned
            .list_bookings(&party, Some(START), None)
            .unwrap()
            .iter()
            .map(|b| b.span)
            .collect();
        assert_eq!(a, b);
    }
}

// ── Inbox ────────────────────────────────────────────────

#[tokio::test]
async fn inbox_newest_first_and_mark_read() {
    let engine = Engine::new(test_wal_path("inbox.wal")).unwrap();
    let first = notification_for("u", NotificationKind::BookingCreated);
    let second = notification_for("u", NotificationKind::BookingCancelled);
    engine.store_notification(first.clone()).await.unwrap();
    engine.store_notification(second.clone()).await.unwrap();
    engine
        .store_notification(notification_for("other", NotificationKind::ContactMessage))
        .await
        .unwrap();

    let inbox = engine.list_notifications("u", false);
    assert_eq!(inbox.iter().map(|n| n.id).collect::<Vec<_>>(), vec![second.id, first.id]);

    let err = engine.mark_notification_read(first.id, "other").await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
    let err = engine.mark_notification_read(Ulid::new(), "u").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    engine.mark_notification_read(first.id, "u").await.unwrap();
    engine.mark_notification_read(first.id, "u").await.unwrap();
    let unread = engine.list_notifications("u", true);
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].id, second.id);
}

// ── Credentials ──────────────────────────────────────────

#[tokio::test]
async fn calendar_connection_lifecycle() {
    let engine = Engine::new(test_wal_path("credentials.wal")).unwrap();
    assert!(engine.calendar_credentials("m").is_none());

    engine.connect_calendar("m", creds("a1")).await.unwrap();
    engine.connect_calendar("m", creds("a2")).await.unwrap();
    assert_eq!(engine.calendar_credentials("m").unwrap().access_token, "a2");

    let err = engine.connect_calendar("m", creds("")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    assert!(engine.disconnect_calendar("m").await.unwrap());
    assert!(!engine.disconnect_calendar("m").await.unwrap());
    assert!(engine.calendar_credentials("m").is_none());
}

// ── WAL replay and compaction ────────────────────────────

async fn populate(engine: &Engine) -> Ulid {
    engine.set_day("m", day(), Some("Europe/Berlin".into()), two_slots(), None).await.unwrap();
    let b = booking_for("m", "x", Span::new(START, START + 30 * M));
    engine.reserve_slot("m", day(), b.span, b.id).await.unwrap();
    let id = engine.create_booking_record(b).await.unwrap();
    let n = notification_for("m", NotificationKind::BookingCreated);
    engine.store_notification(n.clone()).await.unwrap();
    engine.mark_notification_read(n.id, "m").await.unwrap();
    engine.connect_calendar("m", creds("tok")).await.unwrap();
    engine.connect_calendar("gone", creds("tok")).await.unwrap();
    engine.disconnect_calendar("gone").await.unwrap();
    id
}

async fn assert_populated(engine: &Engine, id: Ulid) {
    let d = engine.get_day("m", day()).await.unwrap();
    assert_eq!(d.version, 2);
    assert_eq!(d.timezone, "Europe/Berlin");
    assert!(d.slots[0].booked);
    assert_eq!(d.slots[0].holder, Some(id));
    assert!(!d.slots[1].booked);
    assert_eq!(engine.get_booking(&id).unwrap().mentee_id, "x");
    assert_eq!(engine.list_bookings(&Party::Mentee("x".into()), None, None).unwrap().len(), 1);
    let inbox = engine.list_notifications("m", false);
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].read);
    assert_eq!(engine.calendar_credentials("m").unwrap().access_token, "tok");
    assert!(engine.calendar_credentials("gone").is_none());
    assert_eq!(engine.list_month("m", 2025, 8).await.unwrap(), vec![day()]);
}

#[tokio::test]
async fn wal_replay_restores_everything() {
    let path = test_wal_path("replay.wal");
    let id = {
        let engine = Engine::new(path.clone()).unwrap();
        populate(&engine).await
    };
    let engine = Engine::new(path).unwrap();
    assert_populated(&engine, id).await;

    // Versions keep counting after restart.
    let v = engine.set_day("m", day(), None, two_slots(), Some(2)).await.unwrap();
    assert_eq!(v, 3);
}

#[tokio::test]
async fn writes_after_a_torn_tail_survive_the_next_restart() {
    let path = test_wal_path("torn_tail.wal");
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.set_day("m", day(), None, two_slots(), None).await.unwrap();
    }
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0, 0, 0, 0xde, 0xad]).unwrap();
    }
    let b = booking_for("m", "x", Span::new(START, START + 30 * M));
    let id = b.id;
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.reserve_slot("m", day(), b.span, b.id).await.unwrap();
        engine.create_booking_record(b).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let d = engine.get_day("m", day()).await.unwrap();
    assert_eq!(d.version, 2);
    assert!(d.slots[0].booked);
    assert_eq!(engine.get_booking(&id).unwrap().mentee_id, "x");
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let id = {
        let engine = Engine::new(path.clone()).unwrap();
        let id = populate(&engine).await;
        assert!(engine.appends_since_compact().await.unwrap() > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.appends_since_compact().await.unwrap(), 0);
        assert_populated(&engine, id).await;

        // Writes after compaction land in the new file.
        engine.cancel_for_test(id).await;
        id
    };
    let engine = Engine::new(path).unwrap();
    let d = engine.get_day("m", day()).await.unwrap();
    assert!(d.slots.iter().all(|s| !s.booked));
    assert_eq!(engine.get_booking(&id).unwrap().status, BookingStatus::Cancelled);
    assert_eq!(engine.calendar_credentials("m").unwrap().access_token, "tok");
}

impl Engine {
    async fn cancel_for_test(&self, id: Ulid) {
        let b = self.get_booking(&id).unwrap();
        self.release_slot(&b.mentor_id, b.date, b.span, b.id).await.unwrap();
        self.set_booking_status(id, BookingStatus::Cancelled).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compaction_concurrent_with_writes_loses_nothing() {
    let path = test_wal_path("compact_race.wal");
    let engine = Arc::new(Engine::new(path.clone()).unwrap());
    let days: Vec<NaiveDate> = (1..=20)
        .map(|d| NaiveDate::from_ymd_opt(2025, 8, d).unwrap())
        .collect();

    let writers: Vec<_> = days
        .iter()
        .copied()
        .map(|date| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.set_day("m", date, None, two_slots(), None).await.unwrap();
            })
        })
        .collect();
    let compactor = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.compact_wal().await.unwrap() })
    };
    for w in writers {
        w.await.unwrap();
    }
    compactor.await.unwrap();
    drop(engine);

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_month("m", 2025, 8).await.unwrap(), days);
}
