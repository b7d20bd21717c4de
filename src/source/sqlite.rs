use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use std::path::Path;
use std::str::FromStr;

use crate::error::SourceError;
use crate::model::{BaselineRecord, Direction, SavedState, TokenReading, Trigger};
use crate::source::PriceSource;

pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<SourceError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(SourceError::Open)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(SourceError::Open)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(SourceError::Open)
            .attach_with(|| format!("database path: {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(SourceError::Open)?;

        Ok(Self { pool })
    }
}

impl PriceSource for SqliteSource {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn get_tokens(&self) -> BoxFuture<'_, Result<Vec<TokenReading>, Report<SourceError>>> {
        Box::pin(async move {
            let rows: Vec<(String, i64, i64)> =
                sqlx::query_as("SELECT name, price, time FROM token_basics ORDER BY name")
                    .fetch_all(&self.pool)
                    .await
                    .change_context(SourceError::Unavailable)?;

            if rows.is_empty() {
                return Err(Report::new(SourceError::NoData).attach("table: token_basics"));
            }

            Ok(rows
                .into_iter()
                .map(|(name, price, timestamp)| TokenReading {
                    name,
                    price,
                    timestamp,
                })
                .collect())
        })
    }

    fn get_persisted_baselines(
        &self,
    ) -> BoxFuture<'_, Result<Vec<BaselineRecord>, Report<SourceError>>> {
        Box::pin(async move {
            let rows: Vec<(String, i64, i64, Option<String>, Option<bool>)> = sqlx::query_as(
                "SELECT n.token_basic_name, n.price, t.price, n.direction, n.armed \
                 FROM price_notifies n \
                 JOIN token_basics t ON t.name = n.token_basic_name \
                 ORDER BY n.id",
            )
            .fetch_all(&self.pool)
            .await
            .change_context(SourceError::Unavailable)?;

            Ok(rows
                .into_iter()
                .map(|(token_name, price, token_price, direction, armed)| {
                    let state = match (direction.as_deref().and_then(Direction::parse), armed) {
                        (Some(direction), Some(armed)) => Some(SavedState { direction, armed }),
                        _ => None,
                    };
                    BaselineRecord {
                        token_name,
                        price,
                        token_price,
                        state,
                    }
                })
                .collect())
        })
    }

    fn save_baselines(&self, triggers: &[Trigger]) -> BoxFuture<'_, Result<(), Report<SourceError>>> {
        let triggers = triggers.to_vec();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(SourceError::Unavailable)?;

            sqlx::query("DELETE FROM price_notifies")
                .execute(&mut *tx)
                .await
                .change_context(SourceError::Unavailable)?;

            for trigger in &triggers {
                sqlx::query(
                    "INSERT INTO price_notifies (price, token_basic_name, direction, armed) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(trigger.baseline_price)
                .bind(&trigger.token_name)
                .bind(trigger.direction.to_string())
                .bind(trigger.armed)
                .execute(&mut *tx)
                .await
                .change_context(SourceError::Unavailable)
                .attach_with(|| format!("token: {}", trigger.token_name))?;
            }

            tx.commit().await.change_context(SourceError::Unavailable)?;
            Ok(())
        })
    }
}
