//! Trading logic of the Clotho engine.
//!
//! - `order_store`: locally tracked orders (main ladder, stop ladder,
//!   position-closing orders) keyed by price level
//! - `ladder`: price-reactive ladder rebuilds
//! - `risk`: rate-limited position profit/loss evaluation
//! - `reconcile`: pruning of tracked orders that are no longer live
//! - `cleanup`: cancel-all used at startup, shutdown and by the fail-safe

pub mod cleanup;
pub mod config;
pub mod error;
pub mod ladder;
pub mod order_store;
pub mod reconcile;
pub mod risk;

pub use cleanup::cancel_all_orders;
pub use config::{ReconcileConfig, RiskConfig, StrategyConfig};
pub use error::{StrategyError, StrategyResult};
pub use ladder::{Direction, LadderEngine, PlacementOutcome, RebuildPlan, RebuildReport, TickDecision};
pub use order_store::{is_near, OrderStore, PruneReport, TrackedEntry, TrackedKind};
pub use reconcile::Reconciler;
pub use risk::{
    assess_position, CloseReason, PositionAssessment, PositionRiskManager, RiskReport, RiskTrigger,
};
