//! Exchange-wide order cleanup.

use clotho_exchange::{ApiResult, ExchangeApi};
use clotho_telemetry::Metrics;
use tracing::{info, warn};

use crate::order_store::OrderStore;

/// Cancels every resting order on `symbol` and forgets all tracked orders.
///
/// The store is only cleared once the exchange confirms; on failure local
/// state is left as-is so a retry still sees it.
pub async fn cancel_all_orders(
    exchange: &dyn ExchangeApi,
    store: &OrderStore,
    symbol: &str,
) -> ApiResult<usize> {
    info!(symbol, tracked = store.total_len(), "Cancelling all open orders");
    match exchange.cancel_all_orders(symbol).await {
        Ok(cancelled) => {
            store.clear_all();
            info!(symbol, cancelled, "All open orders cancelled");
            Ok(cancelled)
        }
        Err(e) => {
            Metrics::order_error("cancel_all");
            warn!(symbol, error = %e, "Cancel-all failed");
            Err(e)
        }
    }
}
