use sea_orm::DatabaseConnection;

use crate::{EngineError, ResultEngine};

mod access;
mod expenses;
mod groups;
mod settlements;
mod snapshots;

pub use access::MembershipRole;
pub use expenses::ExpenseListFilter;
pub use settlements::SettlementListFilter;

/// How many times a write is attempted before giving up with
/// `SnapshotConflict`.
pub const MAX_SNAPSHOT_ATTEMPTS: u32 = 3;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

/// Like [`with_tx!`], but re-runs the whole transaction when the snapshot
/// version check fails, up to [`MAX_SNAPSHOT_ATTEMPTS`]. Any other error
/// aborts immediately.
macro_rules! with_retry_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let mut attempt: u32 = 1;
        loop {
            let $tx = $self.database.begin().await?;
            let result = async { $body }.await;
            match result {
                Ok(value) => {
                    $tx.commit().await?;
                    break Ok(value);
                }
                Err($crate::EngineError::SnapshotConflict(reason))
                    if attempt < $crate::ops::MAX_SNAPSHOT_ATTEMPTS =>
                {
                    $tx.rollback().await?;
                    tracing::warn!(attempt, %reason, "snapshot version conflict, retrying");
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        }
    }};
}

pub(crate) use with_retry_tx;
pub(crate) use with_tx;

#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }
}

fn normalize_required_name(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::MalformedEntry(format!(
            "{label} name must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        Ok(Engine {
            database: self.database,
        })
    }
}
