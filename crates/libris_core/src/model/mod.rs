//! Domain model for catalog, ledger and notification records.
//!
//! # Responsibility
//! - Define canonical records used by repositories and services.
//! - Own field-level validation shared by every write path.
//!
//! # Invariants
//! - Every record is identified by a stable, non-nil UUID.
//! - `Book::inventory` is unsigned; a negative count is unrepresentable.
//! - `Borrowing::actual_return_date` only ever moves from `None` to `Some`.

use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod book;
pub mod borrowing;
pub mod delivery_job;
pub mod notification;
pub mod payment;
pub mod user;

/// Field-level validation failure raised before any persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NilId {
        field: &'static str,
    },
    Blank {
        field: &'static str,
    },
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    NegativeAmount {
        field: &'static str,
        value: Decimal,
    },
    AmountPrecision {
        field: &'static str,
        value: Decimal,
        max_scale: u32,
    },
    AmountTooLarge {
        field: &'static str,
        value: Decimal,
        max: Decimal,
    },
    InvalidEmail(String),
    DueBeforeBorrow {
        borrow_date: chrono::NaiveDate,
        expected_return_date: chrono::NaiveDate,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId { field } => write!(f, "{field} must not be nil"),
            Self::Blank { field } => write!(f, "{field} must not be blank"),
            Self::TooLong { field, max, actual } => {
                write!(f, "{field} is {actual} characters, max is {max}")
            }
            Self::NegativeAmount { field, value } => {
                write!(f, "{field} must be >= 0, got {value}")
            }
            Self::AmountPrecision {
                field,
                value,
                max_scale,
            } => write!(
                f,
                "{field} allows at most {max_scale} decimal places, got {value}"
            ),
            Self::AmountTooLarge { field, value, max } => {
                write!(f, "{field} must be <= {max}, got {value}")
            }
            Self::InvalidEmail(value) => write!(f, "invalid email address `{value}`"),
            Self::DueBeforeBorrow {
                borrow_date,
                expected_return_date,
            } => write!(
                f,
                "expected_return_date ({expected_return_date}) must be >= borrow_date ({borrow_date})"
            ),
        }
    }
}

impl Error for ValidationError {}

pub(crate) fn require_text(
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Blank { field });
    }
    let actual = value.chars().count();
    if actual > max_chars {
        return Err(ValidationError::TooLong {
            field,
            max: max_chars,
            actual,
        });
    }
    Ok(())
}

/// Checks a money amount against a `DECIMAL(max_digits, 2)` style column.
pub(crate) fn require_amount(
    field: &'static str,
    value: Decimal,
    max_digits: u32,
) -> Result<(), ValidationError> {
    const MAX_SCALE: u32 = 2;

    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::NegativeAmount { field, value });
    }
    if value.normalize().scale() > MAX_SCALE {
        return Err(ValidationError::AmountPrecision {
            field,
            value,
            max_scale: MAX_SCALE,
        });
    }
    // 10^(digits - scale) - 0.01, e.g. DECIMAL(6, 2) -> 9999.99
    let max = Decimal::from(10_i64.pow(max_digits - MAX_SCALE)) - Decimal::new(1, MAX_SCALE);
    if value > max {
        return Err(ValidationError::AmountTooLarge { field, value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{require_amount, require_text, ValidationError};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn require_amount_enforces_scale_and_bound() {
        assert!(require_amount("daily_fee", Decimal::from_str("2.50").unwrap(), 6).is_ok());
        assert!(require_amount("daily_fee", Decimal::from_str("9999.99").unwrap(), 6).is_ok());
        assert!(matches!(
            require_amount("daily_fee", Decimal::from_str("10000").unwrap(), 6),
            Err(ValidationError::AmountTooLarge { .. })
        ));
        assert!(matches!(
            require_amount("daily_fee", Decimal::from_str("1.999").unwrap(), 6),
            Err(ValidationError::AmountPrecision { .. })
        ));
        assert!(matches!(
            require_amount("daily_fee", Decimal::from_str("-0.01").unwrap(), 6),
            Err(ValidationError::NegativeAmount { .. })
        ));
    }

    #[test]
    fn require_text_counts_chars_not_bytes() {
        let title = "é".repeat(100);
        assert!(require_text("title", &title, 100).is_ok());
        assert_eq!(
            require_text("title", "   ", 100),
            Err(ValidationError::Blank { field: "title" })
        );
    }
}
