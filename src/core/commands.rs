// src/core/commands.rs
use crate::connectors::traits::{ExchangeGateway, MarketData, PositionStore};
use crate::core::planner::PositionPlanner;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Signals delivered by the external trigger bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Re-derive deltas and execute the netting plan.
    Recalculate,
    /// Alias trigger used by schedulers; same behavior as Recalculate.
    Execute,
    /// Stop consuming commands and shut down.
    Terminate,
}

/// Consumes bus commands until terminated. Ctrl+C behaves like `Terminate`.
///
/// These are the planner's only integration points: whoever owns the other
/// end of the channel (message queue consumer, scheduler, test) decides when
/// positions get recalculated.
pub async fn run_command_loop<M, G, S>(
    planner: &PositionPlanner<M, G, S>,
    mut commands: mpsc::Receiver<Command>,
) where
    M: MarketData,
    G: ExchangeGateway,
    S: PositionStore,
{
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Recalculate) | Some(Command::Execute) => {
                    info!("executing position changes");
                    if let Err(e) = planner.execute_position_changes().await {
                        error!("position run failed: {e}");
                    }
                }
                Some(Command::Terminate) | None => {
                    info!("terminating position executor");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, terminating");
                break;
            }
        }
    }
}
