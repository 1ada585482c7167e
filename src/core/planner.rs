// src/core/planner.rs
use crate::connectors::traits::{ExchangeGateway, MarketData, PositionStore};
use crate::core::executor::{ExecutionEngine, FillRequest};
use crate::error::{ChaserError, Result};
use crate::types::{OrderFlags, Side, SizeUnit, TargetPosition};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Aggression applied to every netting execution.
    pub aggression: Decimal,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            aggression: Decimal::new(5, 1),
        }
    }
}

/// Converts target portfolio weights plus live exposures into an ordered
/// trade sequence and drives each entry through the execution engine.
///
/// Closed-loop: deltas and ordering are recomputed from live exposures after
/// every executed entry, never replayed from a stale plan.
pub struct PositionPlanner<M, G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
    engine: ExecutionEngine<M, G>,
    config: PlannerConfig,
}

/// Live exchange exposures keyed the way targets are: coins as
/// `{coin}/USD`, perps by their own symbol.
fn mapped_exposures(raw: HashMap<String, Decimal>) -> HashMap<String, Decimal> {
    raw.into_iter()
        .map(|(k, v)| {
            if k.contains("PERP") {
                (k, v)
            } else {
                (format!("{k}/USD"), v)
            }
        })
        .collect()
}

/// Signed USD notional change per symbol: target weight times account value,
/// minus what is already held. Exposures with no target show up as full
/// unwinds.
fn netting_deltas(
    positions: &[TargetPosition],
    exposures: &HashMap<String, Decimal>,
    account_value: Decimal,
) -> HashMap<String, Decimal> {
    let mut targets: HashMap<String, Decimal> = HashMap::new();
    for position in positions {
        targets.insert(
            position.market_symbol(),
            account_value * position.relative_size,
        );
    }
    let mut deltas = targets;
    for (symbol, existing) in exposures {
        *deltas.entry(symbol.clone()).or_insert(Decimal::ZERO) -= existing;
    }
    deltas
}

/// Greedy interleave: largest sell first, and a buy is admitted as soon as
/// the absolute size already selected can fund it. Tends to keep realized
/// exposure roughly self-funding during execution.
fn plan_order(deltas: &HashMap<String, Decimal>) -> Vec<(String, Decimal)> {
    let mut sells: Vec<(String, Decimal)> = deltas
        .iter()
        .filter(|(_, v)| v.is_sign_negative() && !v.is_zero())
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let mut buys: Vec<(String, Decimal)> = deltas
        .iter()
        .filter(|(_, v)| v.is_sign_positive() && !v.is_zero())
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    // Largest-magnitude sell first; largest buy first. Symbol as tie-break
    // keeps the plan deterministic.
    sells.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    buys.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut orders = Vec::with_capacity(sells.len() + buys.len());
    let mut running = Decimal::ZERO;
    let mut next_sell = 0;
    let mut next_buy = 0;
    loop {
        if next_sell == sells.len() {
            orders.extend_from_slice(&buys[next_buy..]);
            break;
        }
        if next_buy == buys.len() {
            orders.extend_from_slice(&sells[next_sell..]);
            break;
        }
        let selected = if running >= buys[next_buy].1 {
            next_buy += 1;
            buys[next_buy - 1].clone()
        } else {
            next_sell += 1;
            sells[next_sell - 1].clone()
        };
        running += selected.1.abs();
        orders.push(selected);
    }
    orders
}

/// Quote-against-itself symbols (e.g. `USD/USD`) fall out of the exposure
/// mapping and are never tradable.
fn is_degenerate(symbol: &str) -> bool {
    matches!(symbol.split_once('/'), Some((base, quote)) if base == quote)
}

impl<M, G, S> PositionPlanner<M, G, S>
where
    M: MarketData,
    G: ExchangeGateway,
    S: PositionStore,
{
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        engine: ExecutionEngine<M, G>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            engine,
            config,
        }
    }

    async fn current_deltas(
        &self,
        positions: &[TargetPosition],
    ) -> Result<HashMap<String, Decimal>> {
        let exposures = mapped_exposures(self.gateway.notional_exposures().await?);
        let account_value = self.gateway.account_value().await?;
        Ok(netting_deltas(positions, &exposures, account_value))
    }

    /// Runs the full netting pass for every unfilled target position.
    pub async fn execute_position_changes(&self) -> Result<()> {
        let positions = self.store.fetch_unfilled().await?;
        if positions.is_empty() {
            return Err(ChaserError::Configuration(
                "no unfilled target positions".into(),
            ));
        }
        info!(targets = positions.len(), "executing position changes");

        let mut attempted: HashSet<String> = HashSet::new();
        loop {
            // Fills and slippage move the exposures every step, so the plan
            // is re-derived from live state before each execution.
            let deltas = self.current_deltas(&positions).await?;
            let plan = plan_order(&deltas);
            let Some((market, delta)) = plan
                .into_iter()
                .find(|(market, _)| !attempted.contains(market))
            else {
                break;
            };
            attempted.insert(market.clone());
            if is_degenerate(&market) {
                continue;
            }
            let side = if delta >= Decimal::ZERO {
                Side::Buy
            } else {
                Side::Sell
            };
            match self
                .engine
                .fill_limit_order(FillRequest {
                    market: market.clone(),
                    side,
                    size: delta.abs(),
                    unit: SizeUnit::Quote,
                    aggression: self.config.aggression,
                    flags: OrderFlags::default(),
                    client_id: Some(Uuid::new_v4().to_string()),
                })
                .await
            {
                Ok(report) => {
                    info!(%market, side = side.as_str(), notional = %delta.abs(), "fill complete");
                    if let Err(e) = self.store.record_report(&report).await {
                        warn!(%market, "failed to persist execution report: {e}");
                    }
                }
                Err(e) => {
                    // One failed market must not block the rest of the run.
                    error!(%market, exchange = "FTX", "execution failed: {e}");
                    continue;
                }
            }
        }

        let ids: Vec<i64> = positions.iter().map(|p| p.id).collect();
        self.store.mark_processed(&ids).await?;
        Ok(())
    }
}
