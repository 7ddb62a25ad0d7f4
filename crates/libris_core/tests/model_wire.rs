use chrono::NaiveDate;
use libris_core::model::delivery_job::JobState;
use libris_core::model::payment::{Payment, PaymentKind};
use libris_core::{Book, Borrowing, Cover, Notification, NotificationKind, NotificationStatus};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

#[test]
fn notification_serializes_with_wire_names() {
    let borrowing_id = Uuid::new_v4();
    let notification =
        Notification::for_borrowing(NotificationKind::NewBorrowing, borrowing_id, 1_700_000_000_000);

    let value = serde_json::to_value(&notification).unwrap();
    assert_eq!(value["type"], json!("NEW_BORROWING"));
    assert_eq!(value["status"], json!("PENDING"));
    assert_eq!(value["borrowing_id"], json!(borrowing_id.to_string()));
    assert_eq!(value["sent_at"], json!(null));
}

#[test]
fn unknown_notification_type_survives_deserialization() {
    let raw = json!({
        "id": Uuid::new_v4(),
        "type": "PAYMENT_RECEIVED",
        "borrowing_id": null,
        "payment_id": null,
        "status": "FAILED",
        "created_at": 1,
        "sent_at": null,
        "error_message": "timeout"
    });

    let notification: Notification = serde_json::from_value(raw).unwrap();
    assert_eq!(
        notification.kind,
        NotificationKind::Other("PAYMENT_RECEIVED".to_string())
    );
    assert_eq!(notification.status, NotificationStatus::Failed);
}

#[test]
fn status_machine_rejects_leaving_sent() {
    let mut notification = Notification::for_borrowing(NotificationKind::Overdue, Uuid::new_v4(), 0);
    notification.mark_failed("boom").unwrap();
    notification.reopen().unwrap();
    notification.mark_sent(5).unwrap();

    assert_eq!(notification.error_message.as_deref(), Some("boom"));
    assert!(notification.mark_failed("again").is_err());
    assert!(notification.reopen().is_err());
    assert_eq!(notification.status, NotificationStatus::Sent);
}

#[test]
fn catalog_enums_use_uppercase_wire_names() {
    let book = Book::new(
        "Dune",
        "Frank Herbert",
        1,
        Cover::default(),
        Decimal::from_str("0.50").unwrap(),
    );
    let value = serde_json::to_value(&book).unwrap();
    assert_eq!(value["cover"], json!("SOFT"));

    let payment = Payment::new(
        Uuid::new_v4(),
        PaymentKind::Fine,
        Decimal::ONE,
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    );
    let value = serde_json::to_value(&payment).unwrap();
    assert_eq!(value["type"], json!("FINE"));
    assert_eq!(value["status"], json!("PENDING"));
    assert_eq!(value["payment_date"], json!("2024-01-01"));

    assert_eq!(serde_json::to_value(JobState::Exhausted).unwrap(), json!("exhausted"));
}

#[test]
fn borrowing_overdue_is_strictly_after_due_date() {
    let due = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
    let mut borrowing = Borrowing::open(
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        due,
    )
    .unwrap();

    assert!(!borrowing.is_overdue(due));
    assert!(borrowing.is_overdue(due.succ_opt().unwrap()));

    borrowing.actual_return_date = Some(due);
    assert!(!borrowing.is_overdue(due.succ_opt().unwrap()));
}
