//! Catalog repository: books and the borrower directory.
//!
//! # Responsibility
//! - Provide CRUD over `books` and `users`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - `update_book` never touches `inventory`; stock only moves through the
//!   ledger repository.
//! - Deleting a book or user cascades to its borrowings, payments and
//!   notifications.

use super::{
    is_unique_violation, parse_count, parse_decimal, parse_uuid, push_pagination, RepoError,
    RepoResult,
};
use crate::model::book::{Book, BookId, Cover};
use crate::model::user::{normalize_email, User, UserId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const BOOK_SELECT_SQL: &str = "SELECT
    id,
    title,
    author,
    inventory,
    cover,
    daily_fee
FROM books";

/// Query options for listing books.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookListQuery {
    /// Case-insensitive substring match on title or author.
    pub search: Option<String>,
    /// Only books with at least one copy on the shelf.
    pub available_only: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for catalog CRUD.
pub trait CatalogRepository {
    fn create_book(&self, book: &Book) -> RepoResult<BookId>;
    /// Replaces descriptive fields; inventory is left as stored.
    fn update_book(&self, book: &Book) -> RepoResult<()>;
    fn get_book(&self, id: BookId) -> RepoResult<Option<Book>>;
    fn list_books(&self, query: &BookListQuery) -> RepoResult<Vec<Book>>;
    fn delete_book(&self, id: BookId) -> RepoResult<()>;
    fn create_user(&self, user: &User) -> RepoResult<UserId>;
    fn get_user(&self, id: UserId) -> RepoResult<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    fn delete_user(&self, id: UserId) -> RepoResult<()>;
}

/// SQLite-backed catalog repository.
pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn create_book(&self, book: &Book) -> RepoResult<BookId> {
        book.validate()?;

        self.conn.execute(
            "INSERT INTO books (id, title, author, inventory, cover, daily_fee)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                book.id.to_string(),
                book.title.trim(),
                book.author.trim(),
                i64::from(book.inventory),
                cover_to_db(book.cover),
                book.daily_fee.normalize().to_string(),
            ],
        )?;

        Ok(book.id)
    }

    fn update_book(&self, book: &Book) -> RepoResult<()> {
        book.validate()?;

        let changed = self.conn.execute(
            "UPDATE books
             SET
                title = ?2,
                author = ?3,
                cover = ?4,
                daily_fee = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                book.id.to_string(),
                book.title.trim(),
                book.author.trim(),
                cover_to_db(book.cover),
                book.daily_fee.normalize().to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "book",
                id: book.id,
            });
        }

        Ok(())
    }

    fn get_book(&self, id: BookId) -> RepoResult<Option<Book>> {
        load_book(self.conn, id)
    }

    fn list_books(&self, query: &BookListQuery) -> RepoResult<Vec<Book>> {
        let mut sql = format!("{BOOK_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if query.available_only {
            sql.push_str(" AND inventory > 0");
        }

        if let Some(search) = query.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                sql.push_str(" AND (title LIKE ? ESCAPE '\\' OR author LIKE ? ESCAPE '\\')");
                let pattern = format!("%{}%", escape_like(search));
                bind_values.push(Value::Text(pattern.clone()));
                bind_values.push(Value::Text(pattern));
            }
        }

        sql.push_str(" ORDER BY title COLLATE NOCASE ASC, id ASC");
        push_pagination(&mut sql, &mut bind_values, query.limit, query.offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut books = Vec::new();
        while let Some(row) = rows.next()? {
            books.push(parse_book_row(row)?);
        }

        Ok(books)
    }

    fn delete_book(&self, id: BookId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM books WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: "book", id });
        }
        Ok(())
    }

    fn create_user(&self, user: &User) -> RepoResult<UserId> {
        let email = normalize_email(&user.email)?;
        let result = self.conn.execute(
            "INSERT INTO users (id, email) VALUES (?1, ?2);",
            params![user.id.to_string(), email],
        );

        match result {
            Ok(_) => Ok(user.id),
            Err(err) if is_unique_violation(&err) => Err(RepoError::Conflict(format!(
                "user email already registered: {email}"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT id, email FROM users WHERE id = ?1;",
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(id, email)| parse_user(&id, email)).transpose()
    }

    fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let normalized = normalize_email(email)?;
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT id, email FROM users WHERE email = ?1;",
                [normalized],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(id, email)| parse_user(&id, email)).transpose()
    }

    fn delete_user(&self, id: UserId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: "user", id });
        }
        Ok(())
    }
}

/// Loads one book; shared with the ledger repository for read-back.
pub(crate) fn load_book(conn: &Connection, id: BookId) -> RepoResult<Option<Book>> {
    let mut stmt = conn.prepare(&format!("{BOOK_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_book_row(row)?));
    }
    Ok(None)
}

fn parse_book_row(row: &Row<'_>) -> RepoResult<Book> {
    let id_text: String = row.get("id")?;
    let cover_text: String = row.get("cover")?;
    let cover = parse_cover(&cover_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid cover `{cover_text}` in books.cover"))
    })?;
    let fee_text: String = row.get("daily_fee")?;

    Ok(Book {
        id: parse_uuid(&id_text, "books.id")?,
        title: row.get("title")?,
        author: row.get("author")?,
        inventory: parse_count(row.get("inventory")?, "books.inventory")?,
        cover,
        daily_fee: parse_decimal(&fee_text, "books.daily_fee")?,
    })
}

fn parse_user(id: &str, email: String) -> RepoResult<User> {
    Ok(User {
        id: parse_uuid(id, "users.id")?,
        email,
    })
}

fn cover_to_db(cover: Cover) -> &'static str {
    match cover {
        Cover::Hard => "HARD",
        Cover::Soft => "SOFT",
    }
}

fn parse_cover(value: &str) -> Option<Cover> {
    match value {
        "HARD" => Some(Cover::Hard),
        "SOFT" => Some(Cover::Soft),
        _ => None,
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
