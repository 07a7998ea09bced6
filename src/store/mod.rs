//! Catalog store: the relational backend for product lines, sets and
//! products. The Postgres adapter translates driver errors into the closed
//! [`StoreError`] kind set so the pipeline never inspects driver types.

use async_trait::async_trait;
use sqlx::postgres::{PgDatabaseError, PgPoolOptions};
use sqlx::{PgPool, QueryBuilder};
use tracing::info;

use crate::config::{DbCredentials, StoreConfig};
use crate::model::{Product, ProductLine, Set};

/// Postgres SQLSTATE for a unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write. `detail` is the server's
    /// diagnostic string, carried verbatim; the status stage extracts the
    /// offending business key from it.
    #[error("unique constraint conflict: {detail}")]
    Conflict { detail: String },
    #[error("row not found")]
    NotFound,
    /// Connection acquisition failed; fatal to the run.
    #[error("connection pool error: {0}")]
    Pool(#[source] sqlx::Error),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    fn classify(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::RowNotFound) {
            return StoreError::NotFound;
        }
        if matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) {
            return StoreError::Pool(err);
        }
        if let Some(dbe) = err.as_database_error() {
            if dbe.code().as_deref() == Some(UNIQUE_VIOLATION) {
                let detail = dbe
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .unwrap_or_else(|| dbe.message())
                    .to_string();
                return StoreError::Conflict { detail };
            }
        }
        StoreError::Database(err)
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product_line_by_name(&self, name: &str) -> Result<ProductLine, StoreError>;

    /// Insert a product line and return it with its assigned identifier.
    async fn add_product_line(&self, product_line: &ProductLine)
        -> Result<ProductLine, StoreError>;

    /// Batched upsert of sets; returns them with store-assigned identifiers.
    async fn add_sets(&self, sets: Vec<Set>) -> Result<Vec<Set>, StoreError>;

    /// Write one job's product list as a single durable unit.
    async fn add_products(&self, products: &[Product]) -> Result<(), StoreError>;

    /// Persisted products of one set, carrying store-assigned identifiers.
    async fn get_products_by_set_name(&self, set_name: &str) -> Result<Vec<Product>, StoreError>;
}

/// Production [`CatalogStore`] over a Postgres connection pool. The pool is
/// the only resource shared across pipeline workers; `PgPool` is safe for
/// concurrent use by many callers.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(creds: &DbCredentials, config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(&creds.url)
            .await
            .map_err(StoreError::Pool)?;
        info!(max_conns = config.max_connections, "catalog store connected");
        Ok(Self { pool })
    }
}

const PRODUCT_COLUMNS: &str = "product_id AS id, product_name AS name, \
     product_url_name AS url_name, product_line_name, product_line_url_name, \
     set_name, set_url_name, rarity_name AS rarity, custom_attributes, \
     product_number, print_edition, release_date, product_line_id, set_id";

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn get_product_line_by_name(&self, name: &str) -> Result<ProductLine, StoreError> {
        let row = sqlx::query_as::<_, ProductLine>(
            "SELECT product_line_id AS id, product_line_name AS name, \
             product_line_url_name AS url_name FROM product_lines \
             WHERE product_line_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        row.ok_or(StoreError::NotFound)
    }

    async fn add_product_line(
        &self,
        product_line: &ProductLine,
    ) -> Result<ProductLine, StoreError> {
        sqlx::query_as::<_, ProductLine>(
            "INSERT INTO product_lines (product_line_name, product_line_url_name) \
             VALUES ($1, $2) \
             RETURNING product_line_id AS id, product_line_name AS name, \
             product_line_url_name AS url_name",
        )
        .bind(&product_line.name)
        .bind(&product_line.url_name)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::classify)
    }

    async fn add_sets(&self, sets: Vec<Set>) -> Result<Vec<Set>, StoreError> {
        if sets.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;
        let mut qb = QueryBuilder::new(
            "INSERT INTO sets (set_name, set_url_name, card_count, release_date, product_line_id) ",
        );
        qb.push_values(sets.iter(), |mut b, set| {
            b.push_bind(&set.name)
                .push_bind(&set.url_name)
                .push_bind(set.count)
                .push_bind(&set.release_date)
                .push_bind(set.product_line_id);
        });
        // Re-running an ingest must hand back the identifiers assigned the
        // first time around, so resolve name collisions as an upsert.
        qb.push(
            " ON CONFLICT (set_url_name) DO UPDATE SET set_name = EXCLUDED.set_name \
             RETURNING set_id AS id, set_name AS name, set_url_name AS url_name, \
             card_count AS count, release_date, product_line_id",
        );
        let rows: Vec<Set> = qb
            .build_query_as()
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::classify)?;
        tx.commit().await.map_err(StoreError::classify)?;
        Ok(rows)
    }

    async fn add_products(&self, products: &[Product]) -> Result<(), StoreError> {
        if products.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;
        let mut qb = QueryBuilder::new(
            "INSERT INTO products (product_name, product_url_name, product_line_name, \
             product_line_url_name, rarity_name, custom_attributes, set_name, set_url_name, \
             product_number, print_edition, release_date, product_line_id, set_id) ",
        );
        qb.push_values(products.iter(), |mut b, p| {
            b.push_bind(&p.name)
                .push_bind(&p.url_name)
                .push_bind(&p.product_line_name)
                .push_bind(&p.product_line_url_name)
                .push_bind(&p.rarity)
                .push_bind(&p.custom_attributes)
                .push_bind(&p.product_number)
                .push_bind(&p.print_edition)
                .push_bind(&p.release_date)
                .push_bind(p.product_line_id)
                .push_bind(p.set_id);
        });
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(StoreError::classify)?;
        tx.commit().await.map_err(StoreError::classify)?;
        Ok(())
    }

    async fn get_products_by_set_name(&self, set_name: &str) -> Result<Vec<Product>, StoreError> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE set_name = $1"
        ))
        .bind(set_name)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::classify)
    }
}
