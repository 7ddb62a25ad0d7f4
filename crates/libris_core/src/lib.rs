//! Core domain logic for the Libris lending library.
//! This crate owns the borrowing invariants and the admin notification pipeline.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod transport;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, LibrisConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_retry, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingSettings};
pub use model::book::{Book, BookId, Cover};
pub use model::borrowing::{Borrowing, BorrowingId};
pub use model::notification::{Notification, NotificationId, NotificationKind, NotificationStatus};
pub use model::user::{User, UserId};
pub use model::ValidationError;
pub use repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
pub use repo::ledger_repo::{LedgerRepository, SqliteLedgerRepository};
pub use repo::notification_repo::{NotificationRepository, SqliteNotificationRepository};
pub use repo::payment_repo::{PaymentRepository, SqlitePaymentRepository};
pub use repo::{RepoError, RepoResult};
pub use service::borrowing_service::{
    BorrowRequest, BorrowingEvents, InventoryCoordinator, LedgerServiceError,
};
pub use service::catalog_service::{CatalogService, CatalogServiceError};
pub use service::delivery::{DeliveryEngine, DeliveryError, DeliveryOptions, DeliveryOutcome};
pub use service::dispatcher::NotificationDispatcher;
pub use service::sweeper::{OverdueSweeper, SweepReport};
pub use transport::{MessageTransport, TransportError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
