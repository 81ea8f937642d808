use std::future::Future;
use std::sync::Arc;

use crate::{
    AccountIndex, BlockIndex, ChainParams, DomainError, ServeError, TableStore, TipObservation,
};

/// Cancellation handle threaded from the binary into every request.
pub trait CancelToken: Clone + Send + Sync + 'static {
    fn cancelled(&self) -> impl Future<Output = ()> + Send;

    fn is_cancelled(&self) -> bool;
}

impl CancelToken for tokio_util::sync::CancellationToken {
    async fn cancelled(&self) {
        tokio_util::sync::CancellationToken::cancelled(self).await
    }

    fn is_cancelled(&self) -> bool {
        tokio_util::sync::CancellationToken::is_cancelled(self)
    }
}

/// Everything a serving driver needs from the indexer: the columnar
/// tables, the lookup indexes and the chain parameters.
pub trait Domain: Clone + Send + Sync + 'static {
    type Tables: TableStore;

    fn tables(&self) -> &Self::Tables;

    fn blocks(&self) -> &BlockIndex;

    fn accounts(&self) -> &AccountIndex;

    fn params(&self) -> Arc<ChainParams>;

    /// Capture a consistent tip snapshot for one request.
    fn tip(&self) -> Result<TipObservation, DomainError> {
        let params = self.params();
        let (best_height, best_time) = self
            .blocks()
            .snapshot()
            .tip()
            .ok_or(DomainError::EmptyChain)?;
        Ok(TipObservation {
            best_height,
            best_time,
            best_cycle: params.cycle_from_height(best_height),
            params,
        })
    }
}

/// A serving surface bound to a domain, running until cancelled.
pub trait Driver<D: Domain, C: CancelToken> {
    type Config;

    fn run(
        cfg: Self::Config,
        domain: D,
        cancel: C,
    ) -> impl Future<Output = Result<(), ServeError>> + Send;
}
