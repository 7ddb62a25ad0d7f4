use chrono::{Duration, NaiveDate};
use libris_core::db::{open_db, open_db_in_memory};
use libris_core::model::delivery_job::RetryPolicy;
use libris_core::repo::notification_repo::NotificationListQuery;
use libris_core::service::borrowing_service::NoEvents;
use libris_core::{
    Book, BorrowRequest, Borrowing, CatalogRepository, Cover, DeliveryEngine, DeliveryOptions,
    FixedClock, InventoryCoordinator, MessageTransport, NotificationDispatcher, NotificationKind,
    NotificationRepository, NotificationStatus, OverdueSweeper, SqliteCatalogRepository,
    SqliteLedgerRepository, SqliteNotificationRepository, SweepReport, TransportError, User,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::sync::{Arc, Barrier};
use std::thread;

struct StaticTransport {
    ok: bool,
}

impl MessageTransport for StaticTransport {
    fn send(&self, _recipient: &str, _text: &str) -> Result<(), TransportError> {
        if self.ok {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: 500,
                body: String::new(),
            })
        }
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Borrows on 2024-05-01, one copy per due date.
fn borrow_due(conn: &Connection, clock: &FixedClock, due_dates: &[NaiveDate]) -> Vec<Borrowing> {
    let catalog = SqliteCatalogRepository::new(conn);
    let book = Book::new("Dune", "Frank Herbert", 10, Cover::Soft, Decimal::ONE);
    let user = User::new("reader@example.com").unwrap();
    catalog.create_book(&book).unwrap();
    catalog.create_user(&user).unwrap();

    let coordinator = InventoryCoordinator::new(SqliteLedgerRepository::new(conn), NoEvents, clock);
    due_dates
        .iter()
        .map(|due| {
            coordinator
                .borrow(&BorrowRequest {
                    book_id: book.id,
                    user_id: user.id,
                    expected_return_date: *due,
                })
                .unwrap()
        })
        .collect()
}

fn sweep(conn: &Connection, clock: &FixedClock, today: NaiveDate) -> SweepReport {
    let dispatcher = NotificationDispatcher::new(SqliteNotificationRepository::new(conn), clock, 3);
    OverdueSweeper::new(SqliteLedgerRepository::new(conn), &dispatcher)
        .sweep_overdue(today)
        .unwrap()
}

fn deliver_all(conn: &Connection, clock: &FixedClock, ok: bool) {
    let transport = StaticTransport { ok };
    let engine = DeliveryEngine::new(
        SqliteNotificationRepository::new(conn),
        SqliteLedgerRepository::new(conn),
        &transport,
        clock,
        DeliveryOptions {
            policy: RetryPolicy::default(),
            claim_lease: std::time::Duration::from_secs(300),
            recipients: vec!["42".to_string()],
        },
    );
    engine.run_due(100).unwrap();
}

fn overdue_alerts(conn: &Connection, borrowing: &Borrowing) -> Vec<NotificationStatus> {
    SqliteNotificationRepository::new(conn)
        .list_notifications(&NotificationListQuery {
            kind: Some(NotificationKind::Overdue),
            borrowing_id: Some(borrowing.id),
            ..NotificationListQuery::default()
        })
        .unwrap()
        .into_iter()
        .map(|notification| notification.status)
        .collect()
}

#[test]
fn sweep_only_picks_open_borrowings_due_before_today() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::at_date(date(2024, 5, 1));
    let borrowings = borrow_due(
        &conn,
        &clock,
        &[date(2024, 5, 5), date(2024, 5, 6), date(2024, 5, 10)],
    );
    let returned = &borrowings[1];
    InventoryCoordinator::new(SqliteLedgerRepository::new(&conn), NoEvents, &clock)
        .return_book(returned.id)
        .unwrap();

    clock.set(date(2024, 5, 10).and_hms_opt(9, 0, 0).unwrap().and_utc());
    let report = sweep(&conn, &clock, date(2024, 5, 10));

    assert_eq!(
        report,
        SweepReport {
            scanned: 1,
            queued: 1,
            already_sent: 0,
            in_flight: 0,
        }
    );
    assert_eq!(overdue_alerts(&conn, &borrowings[0]).len(), 1);
    assert!(overdue_alerts(&conn, returned).is_empty());
    assert!(overdue_alerts(&conn, &borrowings[2]).is_empty());
}

#[test]
fn repeated_sweeps_do_not_duplicate_alerts() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::at_date(date(2024, 5, 1));
    let borrowing = borrow_due(&conn, &clock, &[date(2024, 5, 5)]).remove(0);
    clock.set(date(2024, 5, 6).and_hms_opt(0, 0, 0).unwrap().and_utc());
    let today = date(2024, 5, 6);

    assert_eq!(sweep(&conn, &clock, today).queued, 1);
    let second = sweep(&conn, &clock, today);
    assert_eq!(second.queued, 0);
    assert_eq!(second.in_flight, 1);

    deliver_all(&conn, &clock, true);
    assert_eq!(overdue_alerts(&conn, &borrowing), vec![NotificationStatus::Sent]);

    let third = sweep(&conn, &clock, today);
    assert_eq!(third.already_sent, 1);
    assert_eq!(third.queued, 0);

    clock.advance(Duration::days(3));
    let later = sweep(&conn, &clock, date(2024, 5, 9));
    assert_eq!(later.already_sent, 1);
    assert_eq!(overdue_alerts(&conn, &borrowing), vec![NotificationStatus::Sent]);
}

#[test]
fn retrying_alert_counts_as_in_flight() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::at_date(date(2024, 5, 1));
    let borrowing = borrow_due(&conn, &clock, &[date(2024, 5, 5)]).remove(0);
    clock.set(date(2024, 5, 6).and_hms_opt(0, 0, 0).unwrap().and_utc());

    sweep(&conn, &clock, date(2024, 5, 6));
    deliver_all(&conn, &clock, false);
    assert_eq!(overdue_alerts(&conn, &borrowing), vec![NotificationStatus::Failed]);

    let report = sweep(&conn, &clock, date(2024, 5, 6));
    assert_eq!(report.in_flight, 1);
    assert_eq!(report.queued, 0);
}

#[test]
fn exhausted_alert_is_requeued_by_next_sweep() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::at_date(date(2024, 5, 1));
    let borrowing = borrow_due(&conn, &clock, &[date(2024, 5, 5)]).remove(0);
    clock.set(date(2024, 5, 6).and_hms_opt(0, 0, 0).unwrap().and_utc());

    sweep(&conn, &clock, date(2024, 5, 6));
    for _ in 0..3 {
        deliver_all(&conn, &clock, false);
        clock.advance(Duration::seconds(60));
    }
    assert_eq!(overdue_alerts(&conn, &borrowing), vec![NotificationStatus::Failed]);

    clock.advance(Duration::days(1));
    let report = sweep(&conn, &clock, date(2024, 5, 7));
    assert_eq!(report.queued, 1);

    deliver_all(&conn, &clock, true);
    let mut statuses = overdue_alerts(&conn, &borrowing);
    statuses.sort_by_key(|status| status.as_str());
    assert_eq!(
        statuses,
        vec![NotificationStatus::Failed, NotificationStatus::Sent]
    );
}

#[test]
fn concurrent_sweeps_queue_one_alert() {
    const SWEEPERS: usize = 4;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.db");
    let clock = Arc::new(FixedClock::at_date(date(2024, 5, 1)));
    let borrowing = {
        let conn = open_db(&path).unwrap();
        borrow_due(&conn, &clock, &[date(2024, 5, 5)]).remove(0)
    };

    let barrier = Arc::new(Barrier::new(SWEEPERS));
    let handles: Vec<_> = (0..SWEEPERS)
        .map(|_| {
            let path = path.clone();
            let clock = Arc::clone(&clock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                barrier.wait();
                sweep(&conn, &clock, date(2024, 5, 6))
            })
        })
        .collect();

    let queued: usize = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().queued)
        .sum();
    assert_eq!(queued, 1);

    let conn = open_db(&path).unwrap();
    assert_eq!(overdue_alerts(&conn, &borrowing).len(), 1);
}
