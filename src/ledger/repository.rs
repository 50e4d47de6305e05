use super::models::*;
use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

/// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Ledger repository - THE source of truth for all state
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========== USER OPERATIONS ==========

    pub async fn create_user(&self, login: &str, password_hash: &str) -> AppResult<User> {
        let user = User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, login, password_hash)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user.id)
        .bind(&user.login)
        .bind(&user.password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error().and_then(|d| d.code()) {
            Some(code) if code == UNIQUE_VIOLATION => AppError::LoginTaken,
            _ => AppError::Database(e),
        })?;

        Ok(user)
    }

    pub async fn get_user_by_login(&self, login: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, password_hash
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    // ========== ORDER OPERATIONS ==========

    /// Submit an order number for a user.
    ///
    /// Relies on the uniqueness constraint (insert-or-conflict), not a
    /// pre-check, so two racing submissions of the same number cannot both
    /// create a row.
    pub async fn create_order(&self, user_id: Uuid, number: &str) -> AppResult<OrderSubmission> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, number, status)
            VALUES ($1, $2, $3, 'NEW')
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(number)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(OrderSubmission::Created);
        }

        // Conflict: the number exists, find out whose it is
        let existing = self
            .get_order_by_number(number)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Order {} vanished after conflict", number)))?;

        if existing.user_id == user_id {
            Ok(OrderSubmission::AlreadyMine)
        } else {
            Ok(OrderSubmission::AlreadyOther)
        }
    }

    pub async fn get_order_by_number(&self, number: &str) -> AppResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, number, status, accrual, uploaded_at
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn get_orders_by_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, number, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    pub async fn get_orders_by_status(&self, statuses: &[OrderStatus]) -> AppResult<Vec<Order>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, number, status, accrual, uploaded_at
            FROM orders
            WHERE status::text = ANY($1)
            ORDER BY uploaded_at
            "#,
        )
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    /// Apply an accrual result to an order as a single atomic write.
    ///
    /// Terminal orders are left untouched: a stale response can never move
    /// PROCESSED or INVALID backwards. Returns whether a row changed.
    pub async fn apply_accrual(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1 AND status NOT IN ('PROCESSED', 'INVALID')
            "#,
        )
        .bind(number)
        .bind(status)
        .bind(accrual)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========== BALANCE & WITHDRAWAL OPERATIONS ==========

    /// Current and withdrawn totals for a user, computed in one statement
    /// so both sums reflect the same committed snapshot.
    pub async fn get_balance(&self, user_id: Uuid) -> AppResult<Balance> {
        let balance = sqlx::query_as::<_, Balance>(
            r#"
            SELECT
                COALESCE((SELECT SUM(accrual) FROM orders
                          WHERE user_id = $1 AND status = 'PROCESSED'), 0)
                - COALESCE((SELECT SUM(sum) FROM withdrawals
                            WHERE user_id = $1), 0) AS current,
                COALESCE((SELECT SUM(sum) FROM withdrawals
                          WHERE user_id = $1), 0) AS withdrawn
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    /// Record a withdrawal if and only if the user can afford it.
    ///
    /// The user row is locked for the duration of the transaction, so two
    /// concurrent withdrawals for the same user recompute the balance one
    /// after the other and cannot jointly overdraw it. Accrual updates
    /// landing mid-transaction only ever increase the balance, never shrink
    /// it, so the check stays safe without locking orders.
    pub async fn create_withdrawal(
        &self,
        user_id: Uuid,
        order_number: &str,
        sum: Decimal,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let current: Decimal = sqlx::query_scalar(
            r#"
            SELECT
                COALESCE((SELECT SUM(accrual) FROM orders
                          WHERE user_id = $1 AND status = 'PROCESSED'), 0)
                - COALESCE((SELECT SUM(sum) FROM withdrawals
                            WHERE user_id = $1), 0)
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if sum > current {
            return Err(AppError::InsufficientFunds);
        }

        sqlx::query(
            r#"
            INSERT INTO withdrawals (id, user_id, order_number, sum)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(order_number)
        .bind(sum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_withdrawals_by_user(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT id, user_id, order_number, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}
