use libris_core::db::open_db_in_memory;
use libris_core::repo::catalog_repo::BookListQuery;
use libris_core::service::catalog_service::NewBookRequest;
use libris_core::{
    Book, CatalogRepository, CatalogService, CatalogServiceError, Cover, SqliteCatalogRepository,
    ValidationError,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

fn request(title: &str, author: &str, inventory: u32) -> NewBookRequest {
    NewBookRequest {
        title: title.to_string(),
        author: author.to_string(),
        inventory,
        cover: Cover::Hard,
        daily_fee: Decimal::from_str("1.25").unwrap(),
    }
}

#[test]
fn add_and_get_book_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));

    let created = service.add_book(&request("  Dune ", "Frank Herbert", 3)).unwrap();
    let loaded = service.get_book(created.id).unwrap();

    assert_eq!(loaded.title, "Dune");
    assert_eq!(loaded.inventory, 3);
    assert_eq!(loaded.cover, Cover::Hard);
    assert_eq!(loaded.daily_fee, Decimal::from_str("1.25").unwrap());
}

#[test]
fn update_book_keeps_inventory() {
    let conn = open_db_in_memory().unwrap();
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));
    let mut book = service.add_book(&request("Dune", "Frank Herbert", 3)).unwrap();

    book.title = "Dune Messiah".to_string();
    book.cover = Cover::Soft;
    book.inventory = 100;
    let updated = service.update_book(&book).unwrap();

    assert_eq!(updated.title, "Dune Messiah");
    assert_eq!(updated.cover, Cover::Soft);
    assert_eq!(updated.inventory, 3);
}

#[test]
fn invalid_book_is_rejected_before_persistence() {
    let conn = open_db_in_memory().unwrap();
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));

    let mut bad = request("x", "y", 1);
    bad.title = "t".repeat(101);
    assert!(matches!(
        service.add_book(&bad),
        Err(CatalogServiceError::Validation(ValidationError::TooLong { .. }))
    ));

    let mut pricey = request("x", "y", 1);
    pricey.daily_fee = Decimal::from_str("10000.00").unwrap();
    assert!(matches!(
        service.add_book(&pricey),
        Err(CatalogServiceError::Validation(ValidationError::AmountTooLarge { .. }))
    ));

    assert!(service.list_books(&BookListQuery::default()).unwrap().is_empty());
}

#[test]
fn list_books_filters_and_sorts_by_title() {
    let conn = open_db_in_memory().unwrap();
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));
    service.add_book(&request("zen", "A. Author", 1)).unwrap();
    service.add_book(&request("Anathem", "Neal Stephenson", 0)).unwrap();
    service.add_book(&request("Cryptonomicon", "Neal Stephenson", 2)).unwrap();

    let all = service.list_books(&BookListQuery::default()).unwrap();
    let titles: Vec<_> = all.iter().map(|book| book.title.as_str()).collect();
    assert_eq!(titles, vec!["Anathem", "Cryptonomicon", "zen"]);

    let stephenson_on_shelf = service
        .list_books(&BookListQuery {
            search: Some("stephenson".to_string()),
            available_only: true,
            ..BookListQuery::default()
        })
        .unwrap();
    assert_eq!(stephenson_on_shelf.len(), 1);
    assert_eq!(stephenson_on_shelf[0].title, "Cryptonomicon");
}

#[test]
fn search_treats_like_wildcards_literally() {
    let conn = open_db_in_memory().unwrap();
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));
    service.add_book(&request("100% Rust", "A", 1)).unwrap();
    service.add_book(&request("1000 Rust", "B", 1)).unwrap();

    let hits = service
        .list_books(&BookListQuery {
            search: Some("100%".to_string()),
            ..BookListQuery::default()
        })
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "100% Rust");
}

#[test]
fn missing_book_maps_to_not_found() {
    let conn = open_db_in_memory().unwrap();
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));
    let id = Uuid::new_v4();

    assert!(matches!(
        service.get_book(id),
        Err(CatalogServiceError::BookNotFound(found)) if found == id
    ));
    assert!(matches!(
        service.delete_book(id),
        Err(CatalogServiceError::BookNotFound(_))
    ));

    let ghost = Book::new("Ghost", "Nobody", 1, Cover::Soft, Decimal::ONE);
    assert!(matches!(
        service.update_book(&ghost),
        Err(CatalogServiceError::BookNotFound(_))
    ));
}

#[test]
fn register_user_normalizes_and_rejects_duplicates() {
    let conn = open_db_in_memory().unwrap();
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));

    let user = service.register_user(" Reader@Example.com ").unwrap();
    assert_eq!(user.email, "reader@example.com");

    assert!(matches!(
        service.register_user("READER@example.com"),
        Err(CatalogServiceError::EmailTaken(email)) if email == "reader@example.com"
    ));
    assert!(matches!(
        service.register_user("not-an-email"),
        Err(CatalogServiceError::Validation(ValidationError::InvalidEmail(_)))
    ));

    let found = service.find_user_by_email("reader@EXAMPLE.com").unwrap().unwrap();
    assert_eq!(found.id, user.id);
}

#[test]
fn delete_user_removes_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCatalogRepository::new(&conn);
    let service = CatalogService::new(SqliteCatalogRepository::new(&conn));
    let user = service.register_user("gone@example.com").unwrap();

    service.delete_user(user.id).unwrap();

    assert!(repo.get_user(user.id).unwrap().is_none());
    assert!(matches!(
        service.get_user(user.id),
        Err(CatalogServiceError::UserNotFound(_))
    ));
}
