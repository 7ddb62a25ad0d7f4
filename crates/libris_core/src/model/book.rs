//! Book catalog record.
//!
//! # Invariants
//! - `inventory` counts copies on the shelf, not copies owned; it drops by
//!   one per open borrowing and is never negative.
//! - `daily_fee` fits `DECIMAL(6, 2)` and is never negative.

use super::{require_amount, require_text, ValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BookId = Uuid;

const TITLE_MAX_CHARS: usize = 100;
const AUTHOR_MAX_CHARS: usize = 100;
const DAILY_FEE_MAX_DIGITS: u32 = 6;

/// Physical binding of a book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cover {
    Hard,
    #[default]
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    /// Copies currently available for borrowing.
    pub inventory: u32,
    pub cover: Cover,
    /// Price per day in USD.
    pub daily_fee: Decimal,
}

impl Book {
    /// Creates a book record with a generated id.
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        inventory: u32,
        cover: Cover,
        daily_fee: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            author: author.into(),
            inventory,
            cover,
            daily_fee,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId { field: "book.id" });
        }
        require_text("title", &self.title, TITLE_MAX_CHARS)?;
        require_text("author", &self.author, AUTHOR_MAX_CHARS)?;
        require_amount("daily_fee", self.daily_fee, DAILY_FEE_MAX_DIGITS)
    }

    pub fn is_available(&self) -> bool {
        self.inventory > 0
    }
}
