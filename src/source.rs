pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::SourceError;
use crate::model::{BaselineRecord, TokenReading, Trigger};

/// Where token prices and persisted notification baselines come from.
///
/// Uses `BoxFuture` so the trait stays object-safe (`dyn PriceSource`).
pub trait PriceSource: Send + Sync {
    /// Diagnostic name of the backing implementation.
    fn name(&self) -> &str;

    /// Current price of every tracked token.
    ///
    /// Fails with `SourceError::NoData` when there is nothing to read yet and
    /// `SourceError::Unavailable` on I/O failure.
    fn get_tokens(&self) -> BoxFuture<'_, Result<Vec<TokenReading>, Report<SourceError>>>;

    /// Persisted baselines, each joined with its token's live price. Read once at startup.
    fn get_persisted_baselines(
        &self,
    ) -> BoxFuture<'_, Result<Vec<BaselineRecord>, Report<SourceError>>>;

    /// Replace the persisted baselines with a snapshot of the engine's triggers.
    fn save_baselines(&self, triggers: &[Trigger]) -> BoxFuture<'_, Result<(), Report<SourceError>>>;
}
