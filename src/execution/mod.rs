// Position reconciliation and the scheduled cycle driver
pub mod reconciler;
pub mod runner;
pub mod schedule;

pub use reconciler::{
    observe_position, AssetState, ObservedPosition, PositionAction, PositionReconciler,
    ReconcileDecision, ReconcileOutcome,
};
pub use runner::{AssetReport, BotRunner, CycleReport, RunnerSettings};
pub use schedule::{next_cycle_at, until_next_cycle};
