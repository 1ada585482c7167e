// src/orderbook.rs
use crate::error::ChaserError;
use crate::types::Side;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Number of levels per side covered by the exchange checksum.
const CHECKSUM_DEPTH: usize = 100;

/// One market's bid/ask ladder, keyed by price.
///
/// Pure data structure: the stream client applies diffs to it and verifies
/// the server checksum after every message; nothing here does I/O.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    pub last_update_time: f64,
    pub last_checksum: u32,
}

/// Sorted copy of the top of a book: bids descending, asks ascending.
#[derive(Debug, Clone, Default)]
pub struct BookSnapshot {
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub time: f64,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|(p, _)| *p)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => None,
        }
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_time = 0.0;
        self.last_checksum = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Applies one price-level diff. Size zero deletes the level, so no
    /// zero-size entry can ever persist in the maps.
    pub fn apply(&mut self, side: Side, price: Decimal, size: Decimal) {
        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if size.is_zero() {
            book.remove(&price);
        } else {
            book.insert(price, size);
        }
    }

    pub fn apply_diffs(&mut self, bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) {
        for &(price, size) in bids {
            self.apply(Side::Buy, price, size);
        }
        for &(price, size) in asks {
            self.apply(Side::Sell, price, size);
        }
    }

    /// Top `depth` levels per side as a sorted copy.
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self
                .bids
                .iter()
                .rev()
                .take(depth)
                .map(|(p, s)| (*p, *s))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(depth)
                .map(|(p, s)| (*p, *s))
                .collect(),
            time: self.last_update_time,
        }
    }

    /// CRC32 over the top 100 levels, zipped bid-then-ask per level, each
    /// level encoded as `price:size` and everything colon-joined. Numbers use
    /// the exchange's float encoding (see [`wire_number`]).
    pub fn checksum(&self) -> u32 {
        let top = self.snapshot(CHECKSUM_DEPTH);
        let mut parts: Vec<String> = Vec::with_capacity(top.bids.len() + top.asks.len());
        let rows = top.bids.len().max(top.asks.len());
        for i in 0..rows {
            if let Some((price, size)) = top.bids.get(i) {
                parts.push(format!("{}:{}", wire_number(*price), wire_number(*size)));
            }
            if let Some((price, size)) = top.asks.get(i) {
                parts.push(format!("{}:{}", wire_number(*price), wire_number(*size)));
            }
        }
        crc32fast::hash(parts.join(":").as_bytes())
    }

    /// Verifies the server checksum; on success it is retained on the book.
    pub fn verify_checksum(&mut self, market: &str, expected: u32) -> Result<(), ChaserError> {
        let computed = self.checksum();
        if computed != expected {
            return Err(ChaserError::ProtocolIntegrity {
                market: market.to_string(),
                computed,
                expected,
            });
        }
        self.last_checksum = expected;
        Ok(())
    }
}

/// Renders a level number the way the exchange writes it into checksummed
/// frames: shortest round-trip float, integral values keep a trailing `.0`,
/// magnitudes outside `[1e-4, 1e16)` switch to exponent form with a signed
/// two-digit exponent (`7e-06`, `1e+16`).
fn wire_number(value: Decimal) -> String {
    let value = value.to_f64().unwrap_or_default();
    if value == 0.0 {
        return "0.0".to_string();
    }
    let sci = format!("{value:e}");
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => (sci, 0),
    };
    if exponent < -4 || exponent >= 16 {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }
    let mut fixed = format!("{value}");
    if !fixed.contains('.') {
        fixed.push_str(".0");
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_diffs(
            &[
                (dec!(100.5), dec!(2)),
                (dec!(101.0), dec!(1)),
                (dec!(99.0), dec!(5)),
            ],
            &[
                (dec!(101.5), dec!(3)),
                (dec!(102.0), dec!(4)),
                (dec!(103.0), dec!(1)),
            ],
        );
        book
    }

    #[test]
    fn snapshot_is_sorted_both_sides() {
        let book = sample_book();
        let top = book.snapshot(10);
        assert_eq!(
            top.bids.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
            vec![dec!(101.0), dec!(100.5), dec!(99.0)]
        );
        assert_eq!(
            top.asks.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
            vec![dec!(101.5), dec!(102.0), dec!(103.0)]
        );
    }

    #[test]
    fn zero_size_deletes_level() {
        let mut book = sample_book();
        book.apply(Side::Buy, dec!(101.0), Decimal::ZERO);
        book.apply(Side::Sell, dec!(101.5), Decimal::ZERO);
        let top = book.snapshot(10);
        assert_eq!(top.best_bid(), Some(dec!(100.5)));
        assert_eq!(top.best_ask(), Some(dec!(102.0)));
        assert!(top.bids.iter().all(|(_, s)| !s.is_zero()));
        assert!(top.asks.iter().all(|(_, s)| !s.is_zero()));
    }

    #[test]
    fn diffs_update_existing_levels() {
        let mut book = sample_book();
        book.apply(Side::Buy, dec!(101.0), dec!(7));
        let top = book.snapshot(1);
        assert_eq!(top.bids[0], (dec!(101.0), dec!(7)));
    }

    #[test]
    fn snapshot_mid_is_simple_average() {
        let book = sample_book();
        let top = book.snapshot(10);
        assert_eq!(top.mid(), Some(dec!(101.25)));
    }

    #[test]
    fn wire_number_keeps_float_repr() {
        assert_eq!(wire_number(dec!(100)), "100.0");
        assert_eq!(wire_number(dec!(100.5)), "100.5");
        assert_eq!(wire_number(dec!(0.0001)), "0.0001");
        assert_eq!(wire_number(dec!(0.0000069)), "6.9e-06");
        assert_eq!(wire_number(Decimal::ZERO), "0.0");
    }

    #[test]
    fn checksum_uses_wire_float_encoding() {
        let mut book = OrderBook::new();
        book.apply_diffs(&[(dec!(100.0), dec!(1.0))], &[(dec!(101.0), dec!(2.0))]);
        assert_eq!(
            book.checksum(),
            crc32fast::hash(b"100.0:1.0:101.0:2.0")
        );
    }

    #[test]
    fn checksum_round_trips() {
        let mut book = sample_book();
        let sum = book.checksum();
        assert!(book.verify_checksum("BTC/USD", sum).is_ok());
        assert_eq!(book.last_checksum, sum);
    }

    #[test]
    fn checksum_detects_single_level_perturbation() {
        let mut book = sample_book();
        let sum = book.checksum();
        book.apply(Side::Sell, dec!(102.0), dec!(4.00001));
        let err = book.verify_checksum("BTC/USD", sum).unwrap_err();
        assert!(matches!(
            err,
            ChaserError::ProtocolIntegrity { .. }
        ));
    }

    #[test]
    fn checksum_covers_unbalanced_sides() {
        let mut book = OrderBook::new();
        book.apply_diffs(&[(dec!(10), dec!(1))], &[]);
        let one_sided = book.checksum();
        book.apply_diffs(&[], &[(dec!(11), dec!(1))]);
        assert_ne!(one_sided, book.checksum());
    }

    #[test]
    fn reset_clears_everything() {
        let mut book = sample_book();
        let sum = book.checksum();
        book.verify_checksum("BTC/USD", sum).unwrap();
        book.reset();
        assert!(book.is_empty());
        assert_eq!(book.last_checksum, 0);
    }
}
