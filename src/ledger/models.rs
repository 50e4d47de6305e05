use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Order status enum - the per-order state machine
///
/// Transitions only move forward: NEW -> PROCESSING -> {PROCESSED | INVALID}.
/// Terminal statuses are never overwritten by a later stale response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

/// Order entity - one uploaded order number, owned by exactly one user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub number: String,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::float_option")]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

/// Withdrawal entity - immutable once created
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Withdrawal {
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    #[serde(rename = "order")]
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Balance - derived, never stored
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

/// Outcome of submitting an order number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSubmission {
    /// New order accepted for this user
    Created,
    /// Same number already uploaded by the same user (idempotent)
    AlreadyMine,
    /// Number already claimed by a different user
    AlreadyOther,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Processed.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
    }

    #[test]
    fn test_order_wire_format() {
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            number: "79927398713".to_string(),
            status: OrderStatus::Processed,
            accrual: Some(dec!(500)),
            uploaded_at: Utc::now(),
        };

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["number"], "79927398713");
        assert_eq!(json["status"], "PROCESSED");
        assert_eq!(json["accrual"], 500.0);
        assert!(json.get("id").is_none());
        assert!(json.get("user_id").is_none());
        assert!(json.get("uploaded_at").is_some());
    }

    #[test]
    fn test_order_without_accrual_omits_field() {
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            number: "79927398713".to_string(),
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        };

        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("accrual").is_none());
    }

    #[test]
    fn test_withdrawal_wire_format() {
        let w = Withdrawal {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_number: "2377225624".to_string(),
            sum: dec!(751),
            processed_at: Utc::now(),
        };

        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["order"], "2377225624");
        assert_eq!(json["sum"], 751.0);
        assert!(json.get("order_number").is_none());
    }
}
