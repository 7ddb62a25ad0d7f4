//! Catalog use-case service.
//!
//! # Responsibility
//! - Provide book and borrower CRUD entry points.
//! - Map repository errors to catalog-level semantics.
//!
//! # Invariants
//! - Service APIs never bypass repository validation.
//! - Stock changes after creation go through the borrowing coordinator.

use crate::model::book::{Book, BookId, Cover};
use crate::model::user::{User, UserId};
use crate::model::ValidationError;
use crate::repo::catalog_repo::{BookListQuery, CatalogRepository};
use crate::repo::RepoError;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for catalog use-cases.
#[derive(Debug)]
pub enum CatalogServiceError {
    Validation(ValidationError),
    BookNotFound(BookId),
    UserNotFound(UserId),
    /// Email is already registered to another user.
    EmailTaken(String),
    Repo(RepoError),
}

impl Display for CatalogServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::BookNotFound(id) => write!(f, "book not found: {id}"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::EmailTaken(email) => write!(f, "email already registered: {email}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CatalogServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for CatalogServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for CatalogServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound { entity: "book", id } => Self::BookNotFound(id),
            RepoError::NotFound { entity: "user", id } => Self::UserNotFound(id),
            other => Self::Repo(other),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogServiceError>;

/// Request model for adding a title to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookRequest {
    pub title: String,
    pub author: String,
    /// Initial number of copies on the shelf.
    pub inventory: u32,
    pub cover: Cover,
    pub daily_fee: Decimal,
}

/// Use-case service wrapper for catalog CRUD.
pub struct CatalogService<R: CatalogRepository> {
    repo: R,
}

impl<R: CatalogRepository> CatalogService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Adds a book and returns the stored record.
    pub fn add_book(&self, request: &NewBookRequest) -> CatalogResult<Book> {
        let book = Book::new(
            request.title.trim(),
            request.author.trim(),
            request.inventory,
            request.cover,
            request.daily_fee,
        );
        self.repo.create_book(&book)?;
        Ok(book)
    }

    /// Replaces title, author, cover and fee. Inventory in `book` is ignored.
    pub fn update_book(&self, book: &Book) -> CatalogResult<Book> {
        self.repo.update_book(book)?;
        self.get_book(book.id)
    }

    pub fn get_book(&self, id: BookId) -> CatalogResult<Book> {
        self.repo
            .get_book(id)?
            .ok_or(CatalogServiceError::BookNotFound(id))
    }

    pub fn list_books(&self, query: &BookListQuery) -> CatalogResult<Vec<Book>> {
        Ok(self.repo.list_books(query)?)
    }

    /// Removes a book together with its borrowings and their side records.
    pub fn delete_book(&self, id: BookId) -> CatalogResult<()> {
        Ok(self.repo.delete_book(id)?)
    }

    pub fn register_user(&self, email: &str) -> CatalogResult<User> {
        let user = User::new(email)?;
        match self.repo.create_user(&user) {
            Ok(_) => Ok(user),
            Err(RepoError::Conflict(_)) => Err(CatalogServiceError::EmailTaken(user.email)),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_user(&self, id: UserId) -> CatalogResult<User> {
        self.repo
            .get_user(id)?
            .ok_or(CatalogServiceError::UserNotFound(id))
    }

    pub fn find_user_by_email(&self, email: &str) -> CatalogResult<Option<User>> {
        Ok(self.repo.find_user_by_email(email)?)
    }

    pub fn delete_user(&self, id: UserId) -> CatalogResult<()> {
        Ok(self.repo.delete_user(id)?)
    }
}
