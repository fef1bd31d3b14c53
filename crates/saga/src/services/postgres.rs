//! PostgreSQL implementations of the saga services.

use async_trait::async_trait;
use common::{IssueId, OrderId, ProductId, ReportId, WorkflowId};
use domain::{Issue, IssueStatus, Money, Order, OrderError, OrderStatus, Product, Report};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use super::{InventoryLedger, IssueStore, OrderStore, ReportStore};
use crate::error::SagaError;

const PRODUCT_COLUMNS: &str = "product_id, product, description, inventory, price_cents";
const ORDER_COLUMNS: &str = "order_id, order_status, last_update_time, progress_remaining";
const REPORT_COLUMNS: &str = "id, repo_name, has_vuln, raw_report, created_at";
const ISSUE_COLUMNS: &str = "id, repo_name, issue_body, status, workflow_id, created_at";

fn count_to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn count_to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// PostgreSQL-backed inventory ledger and order store.
#[derive(Clone)]
pub struct PostgresShop {
    pool: PgPool,
}

impl PostgresShop {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a product unless one with the same ID already exists.
    pub async fn seed_product(&self, product: &Product) -> Result<(), SagaError> {
        sqlx::query(&format!(
            "INSERT INTO products ({PRODUCT_COLUMNS}) VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING"
        ))
        .bind(product.product_id.as_i64())
        .bind(&product.product)
        .bind(&product.description)
        .bind(count_to_i32(product.inventory))
        .bind(product.price.cents())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product, SagaError> {
        Ok(Product::new(
            ProductId::new(row.try_get("product_id")?),
            row.try_get::<String, _>("product")?,
            row.try_get::<String, _>("description")?,
            count_to_u32(row.try_get("inventory")?),
            Money::from_cents(row.try_get("price_cents")?),
        ))
    }

    fn row_to_order(row: PgRow) -> Result<Order, SagaError> {
        let code: i16 = row.try_get("order_status")?;
        Ok(Order {
            id: OrderId::new(row.try_get("order_id")?),
            status: OrderStatus::from_code(code).ok_or(OrderError::UnknownStatusCode(code))?,
            progress_remaining: count_to_u32(row.try_get("progress_remaining")?),
            last_update_time: row.try_get("last_update_time")?,
        })
    }

    /// Loads an order with a row lock held until the transaction ends.
    async fn lock_order(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<Order, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(order_id.as_i64())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(SagaError::OrderNotFound(order_id))?;
        Self::row_to_order(row)
    }

    async fn save_order(
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
    ) -> Result<(), SagaError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET order_status = $2, progress_remaining = $3, last_update_time = $4
            WHERE order_id = $1
            "#,
        )
        .bind(order.id.as_i64())
        .bind(order.status.code())
        .bind(count_to_i32(order.progress_remaining))
        .bind(order.last_update_time)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryLedger for PostgresShop {
    async fn get_product(&self, product_id: ProductId) -> Result<Product, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE product_id = $1"
        ))
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SagaError::ProductNotFound(product_id))?;
        Self::row_to_product(row)
    }

    async fn reserve(
        &self,
        product_id: ProductId,
        reservation_key: &str,
    ) -> Result<bool, SagaError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO inventory_reservations (reservation_key, product_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(reservation_key)
        .bind(product_id.as_i64())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let released: bool = sqlx::query_scalar(
                "SELECT released FROM inventory_reservations WHERE reservation_key = $1",
            )
            .bind(reservation_key)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(!released);
        }

        let taken = sqlx::query(
            "UPDATE products SET inventory = inventory - 1 WHERE product_id = $1 AND inventory > 0",
        )
        .bind(product_id.as_i64())
        .execute(&mut *tx)
        .await?;

        if taken.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        metrics::counter!("inventory_reserved").increment(1);
        Ok(true)
    }

    async fn release(
        &self,
        product_id: ProductId,
        reservation_key: &str,
    ) -> Result<bool, SagaError> {
        let mut tx = self.pool.begin().await?;

        let released = sqlx::query(
            r#"
            UPDATE inventory_reservations
            SET released = TRUE
            WHERE reservation_key = $1 AND product_id = $2 AND released = FALSE
            "#,
        )
        .bind(reservation_key)
        .bind(product_id.as_i64())
        .execute(&mut *tx)
        .await?;

        if released.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE products SET inventory = inventory + 1 WHERE product_id = $1")
            .bind(product_id.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        metrics::counter!("inventory_released").increment(1);
        Ok(true)
    }

    async fn restock(&self, product_id: ProductId, level: u32) -> Result<Product, SagaError> {
        let row = sqlx::query(&format!(
            "UPDATE products SET inventory = $2 WHERE product_id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(product_id.as_i64())
        .bind(count_to_i32(level))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SagaError::ProductNotFound(product_id))?;
        Self::row_to_product(row)
    }
}

#[async_trait]
impl OrderStore for PostgresShop {
    async fn create_order(&self, total_progress: u32) -> Result<Order, SagaError> {
        let row = sqlx::query(&format!(
            "INSERT INTO orders (order_status, progress_remaining) VALUES ($1, $2) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(OrderStatus::Pending.code())
        .bind(count_to_i32(total_progress))
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_order(row)
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, SagaError> {
        let mut tx = self.pool.begin().await?;
        let mut order = Self::lock_order(&mut tx, order_id).await?;
        if order.transition(status)? {
            Self::save_order(&mut tx, &order).await?;
        }
        tx.commit().await?;
        Ok(order)
    }

    async fn advance_progress(&self, order_id: OrderId) -> Result<u32, SagaError> {
        let mut tx = self.pool.begin().await?;
        let mut order = Self::lock_order(&mut tx, order_id).await?;
        let remaining = order.tick_progress()?;
        Self::save_order(&mut tx, &order).await?;
        tx.commit().await?;
        Ok(remaining)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn list_orders(&self) -> Result<Vec<Order>, SagaError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY order_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_order).collect()
    }
}

/// PostgreSQL-backed report and issue store.
#[derive(Clone)]
pub struct PostgresIssueTracker {
    pool: PgPool,
}

impl PostgresIssueTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_report(row: PgRow) -> Result<Report, SagaError> {
        Ok(Report {
            id: ReportId::new(row.try_get("id")?),
            repo_name: row.try_get("repo_name")?,
            has_vuln: row.try_get("has_vuln")?,
            raw_report: row.try_get("raw_report")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_issue(row: PgRow) -> Result<Issue, SagaError> {
        let status: String = row.try_get("status")?;
        Ok(Issue {
            id: IssueId::new(row.try_get("id")?),
            repo_name: row.try_get("repo_name")?,
            body: row.try_get("issue_body")?,
            status: status.parse()?,
            workflow_id: WorkflowId::new(row.try_get::<String, _>("workflow_id")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ReportStore for PostgresIssueTracker {
    async fn upsert_report(
        &self,
        repo_name: &str,
        has_vuln: bool,
        raw_report: &str,
    ) -> Result<Report, SagaError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reports (repo_name, has_vuln, raw_report)
            VALUES ($1, $2, $3)
            ON CONFLICT (repo_name) DO UPDATE
            SET has_vuln = EXCLUDED.has_vuln, raw_report = EXCLUDED.raw_report, created_at = NOW()
            RETURNING {REPORT_COLUMNS}
            "#
        ))
        .bind(repo_name)
        .bind(has_vuln)
        .bind(raw_report)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_report(row)
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"
        ))
        .bind(report_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_report).transpose()
    }

    async fn list_reports(&self) -> Result<Vec<Report>, SagaError> {
        let rows = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_report).collect()
    }
}

#[async_trait]
impl IssueStore for PostgresIssueTracker {
    async fn create_issue(
        &self,
        repo_name: &str,
        body: &str,
        workflow_id: &WorkflowId,
    ) -> Result<Issue, SagaError> {
        sqlx::query(
            r#"
            INSERT INTO issues (repo_name, issue_body, status, workflow_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workflow_id) DO NOTHING
            "#,
        )
        .bind(repo_name)
        .bind(body)
        .bind(IssueStatus::PendingApproval.as_str())
        .bind(workflow_id.as_str())
        .execute(&self.pool)
        .await?;

        self.get_issue_by_workflow(workflow_id)
            .await?
            .ok_or(SagaError::Database(sqlx::Error::RowNotFound))
    }

    async fn update_issue_status(
        &self,
        issue_id: IssueId,
        status: IssueStatus,
    ) -> Result<Issue, SagaError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE id = $1 FOR UPDATE"
        ))
        .bind(issue_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SagaError::IssueNotFound(issue_id))?;

        let mut issue = Self::row_to_issue(row)?;
        issue.resolve(status)?;

        sqlx::query("UPDATE issues SET status = $2 WHERE id = $1")
            .bind(issue_id.as_i64())
            .bind(issue.status.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(issue)
    }

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<Issue>, SagaError> {
        let row = sqlx::query(&format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = $1"))
            .bind(issue_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_issue).transpose()
    }

    async fn get_issue_by_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<Issue>, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE workflow_id = $1"
        ))
        .bind(workflow_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_issue).transpose()
    }

    async fn list_pending_issues(&self) -> Result<Vec<Issue>, SagaError> {
        let rows = sqlx::query(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE status = $1 ORDER BY created_at DESC"
        ))
        .bind(IssueStatus::PendingApproval.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_issue).collect()
    }
}
