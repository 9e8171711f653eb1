//! Per-instrument order book mirror built from snapshot + delta messages.
//!
//! Each book keeps the resting YES bids and NO bids only. Asks are derived
//! from the complementary side through `price -> 100 - price`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::types::Side;

/// A single resting price level. Price is in cents (0..=100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: i64,
    pub quantity: i64,
}

/// Two-sided book for one instrument.
///
/// Invariant: on each side prices are unique and strictly decreasing by
/// index (best bid first), and no level has a quantity `<= 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    pub ticker: String,
    yes: Vec<PriceLevel>,
    no: Vec<PriceLevel>,
    last_update: DateTime<Utc>,
}

impl OrderBook {
    /// Builds a book from raw `[price, quantity]` pairs.
    ///
    /// Pairs that are short, carry a non-positive quantity or an
    /// out-of-range price are dropped. Duplicate prices are merged.
    pub fn from_levels(ticker: &str, yes: &[Vec<i64>], no: &[Vec<i64>]) -> Self {
        Self {
            ticker: ticker.to_string(),
            yes: normalize_levels(yes),
            no: normalize_levels(no),
            last_update: Utc::now(),
        }
    }

    pub fn levels(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Best YES bid, or 0 when nobody is bidding.
    pub fn best_yes_bid(&self) -> i64 {
        self.yes.first().map(|l| l.price).unwrap_or(0)
    }

    /// Best YES ask (`100 - best NO bid`), or 100 when the NO side is empty.
    pub fn best_yes_ask(&self) -> i64 {
        self.no.first().map(|l| 100 - l.price).unwrap_or(100)
    }

    /// True when both sides carry at least one level.
    pub fn is_two_sided(&self) -> bool {
        !self.yes.is_empty() && !self.no.is_empty()
    }

    /// Ask ladder for a buyer of `side`, best (lowest) ask first.
    ///
    /// Buying YES walks the NO bids and vice versa. The source side is
    /// sorted descending, so mapping `100 - price` yields ascending order
    /// without a re-sort.
    pub fn ask_depth(&self, side: Side) -> Vec<PriceLevel> {
        self.levels(side.opposite())
            .iter()
            .map(|l| PriceLevel {
                price: 100 - l.price,
                quantity: l.quantity,
            })
            .collect()
    }

    /// Applies a quantity change at one price level.
    pub fn apply_delta(&mut self, side: Side, price: i64, delta: i64) {
        self.last_update = Utc::now();

        let levels = match side {
            Side::Yes => &mut self.yes,
            Side::No => &mut self.no,
        };

        if let Some(idx) = levels.iter().position(|l| l.price == price) {
            let quantity = levels[idx].quantity.saturating_add(delta);
            if quantity <= 0 {
                levels.remove(idx);
            } else {
                levels[idx].quantity = quantity;
            }
            return;
        }

        if delta <= 0 {
            return;
        }

        // Append, then bubble toward the front until order is restored.
        levels.push(PriceLevel {
            price,
            quantity: delta,
        });
        let mut i = levels.len() - 1;
        while i > 0 && levels[i].price > levels[i - 1].price {
            levels.swap(i, i - 1);
            i -= 1;
        }
    }
}

fn normalize_levels(raw: &[Vec<i64>]) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = raw
        .iter()
        .filter_map(|pair| match pair.as_slice() {
            [price, quantity, ..] if *quantity > 0 && (0..=100).contains(price) => {
                Some(PriceLevel {
                    price: *price,
                    quantity: *quantity,
                })
            }
            _ => None,
        })
        .collect();

    levels.sort_by(|a, b| b.price.cmp(&a.price));
    levels.dedup_by(|next, kept| {
        if next.price == kept.price {
            kept.quantity += next.quantity;
            true
        } else {
            false
        }
    });
    levels
}

/// Thread-safe map of instrument books.
///
/// The book ingestion task is the only writer; the engine reads through
/// short read-locked queries.
#[derive(Debug, Default)]
pub struct OrderBookStore {
    books: RwLock<HashMap<String, OrderBook>>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the instrument's book wholesale.
    pub fn apply_snapshot(&self, ticker: &str, yes: &[Vec<i64>], no: &[Vec<i64>]) {
        let book = OrderBook::from_levels(ticker, yes, no);
        debug!(
            ticker = %ticker,
            yes_levels = book.yes.len(),
            no_levels = book.no.len(),
            "orderbook snapshot"
        );
        self.books.write().insert(ticker.to_string(), book);
    }

    /// Applies a delta. No-op when no snapshot has been seen yet.
    pub fn apply_delta(&self, ticker: &str, side: Side, price: i64, delta: i64) {
        if !(0..=100).contains(&price) {
            debug!(ticker = %ticker, price, "dropping delta with out-of-range price");
            return;
        }
        let mut books = self.books.write();
        if let Some(book) = books.get_mut(ticker) {
            book.apply_delta(side, price, delta);
        }
    }

    pub fn has_book(&self, ticker: &str) -> bool {
        self.books.read().contains_key(ticker)
    }

    /// Returns a copy of the instrument's book.
    pub fn book(&self, ticker: &str) -> Option<OrderBook> {
        self.books.read().get(ticker).cloned()
    }

    /// Best YES bid, or 0 when no bid (or no book).
    pub fn best_yes_bid(&self, ticker: &str) -> i64 {
        self.books
            .read()
            .get(ticker)
            .map(OrderBook::best_yes_bid)
            .unwrap_or(0)
    }

    /// Best YES ask, or 100 when no ask (or no book).
    pub fn best_yes_ask(&self, ticker: &str) -> i64 {
        self.books
            .read()
            .get(ticker)
            .map(OrderBook::best_yes_ask)
            .unwrap_or(100)
    }

    /// Ask ladder for a buyer of `side`; empty when there is no book.
    pub fn ask_depth(&self, ticker: &str, side: Side) -> Vec<PriceLevel> {
        self.books
            .read()
            .get(ticker)
            .map(|b| b.ask_depth(side))
            .unwrap_or_default()
    }

    /// Top of book as `(yes_bid, yes_ask)` when both sides are populated.
    pub fn top_of_book(&self, ticker: &str) -> Option<(i64, i64)> {
        let books = self.books.read();
        let book = books.get(ticker)?;
        if !book.is_two_sided() {
            return None;
        }
        Some((book.best_yes_bid(), book.best_yes_ask()))
    }

    /// Drops the instrument's book.
    pub fn remove(&self, ticker: &str) {
        self.books.write().remove(ticker);
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_invariant(book: &OrderBook) {
        for side in [Side::Yes, Side::No] {
            let levels = book.levels(side);
            for level in levels {
                assert!(level.quantity > 0, "non-positive level on {side}: {level:?}");
            }
            for pair in levels.windows(2) {
                assert!(
                    pair[0].price > pair[1].price,
                    "{side} side not strictly descending: {levels:?}"
                );
            }
        }
    }

    #[test]
    fn test_snapshot_then_deltas_end_to_end() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![60, 10]], &[vec![35, 20]]);

        assert_eq!(store.best_yes_bid("X"), 60);
        assert_eq!(store.best_yes_ask("X"), 65);

        store.apply_delta("X", Side::Yes, 60, -10);
        assert_eq!(store.best_yes_bid("X"), 0);
        assert!(store.book("X").unwrap().levels(Side::Yes).is_empty());

        store.apply_delta("X", Side::No, 40, 5);
        let book = store.book("X").unwrap();
        assert_eq!(
            book.levels(Side::No),
            &[
                PriceLevel { price: 40, quantity: 5 },
                PriceLevel { price: 35, quantity: 20 },
            ]
        );
        assert_eq!(store.best_yes_ask("X"), 60);
        assert_invariant(&book);
    }

    #[test]
    fn test_empty_book_defaults() {
        let store = OrderBookStore::new();
        assert_eq!(store.best_yes_bid("missing"), 0);
        assert_eq!(store.best_yes_ask("missing"), 100);
        assert!(store.ask_depth("missing", Side::Yes).is_empty());
        assert!(store.top_of_book("missing").is_none());
    }

    #[test]
    fn test_delta_before_snapshot_is_ignored() {
        let store = OrderBookStore::new();
        store.apply_delta("X", Side::Yes, 50, 10);
        assert!(!store.has_book("X"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_drops_malformed_levels() {
        let store = OrderBookStore::new();
        store.apply_snapshot(
            "X",
            &[vec![55, 3], vec![54], vec![53, 0], vec![52, -4], vec![150, 2], vec![]],
            &[],
        );
        let book = store.book("X").unwrap();
        assert_eq!(book.levels(Side::Yes), &[PriceLevel { price: 55, quantity: 3 }]);
        assert!(book.levels(Side::No).is_empty());
    }

    #[test]
    fn test_snapshot_is_normalised_descending() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![10, 1], vec![30, 2], vec![20, 3], vec![30, 4]], &[]);
        let book = store.book("X").unwrap();
        assert_eq!(
            book.levels(Side::Yes),
            &[
                PriceLevel { price: 30, quantity: 6 },
                PriceLevel { price: 20, quantity: 3 },
                PriceLevel { price: 10, quantity: 1 },
            ]
        );
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![60, 10]], &[vec![35, 20]]);
        store.apply_snapshot("X", &[vec![45, 1]], &[]);
        let book = store.book("X").unwrap();
        assert_eq!(book.levels(Side::Yes), &[PriceLevel { price: 45, quantity: 1 }]);
        assert!(book.levels(Side::No).is_empty());
    }

    #[test]
    fn test_delta_updates_existing_level() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![60, 10], vec![58, 4]], &[]);
        store.apply_delta("X", Side::Yes, 58, 6);
        store.apply_delta("X", Side::Yes, 60, -3);
        let book = store.book("X").unwrap();
        assert_eq!(
            book.levels(Side::Yes),
            &[
                PriceLevel { price: 60, quantity: 7 },
                PriceLevel { price: 58, quantity: 10 },
            ]
        );
    }

    #[test]
    fn test_negative_delta_on_missing_level_is_noop() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![60, 10]], &[]);
        store.apply_delta("X", Side::Yes, 59, -5);
        assert_eq!(store.book("X").unwrap().levels(Side::Yes).len(), 1);
    }

    #[test]
    fn test_insert_keeps_unrelated_levels_in_place() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![70, 1], vec![50, 2], vec![30, 3]], &[]);
        store.apply_delta("X", Side::Yes, 60, 9);
        store.apply_delta("X", Side::Yes, 20, 4);
        store.apply_delta("X", Side::Yes, 80, 5);
        let prices: Vec<i64> = store
            .book("X")
            .unwrap()
            .levels(Side::Yes)
            .iter()
            .map(|l| l.price)
            .collect();
        assert_eq!(prices, vec![80, 70, 60, 50, 30, 20]);
    }

    #[test]
    fn test_ask_depth_is_ascending() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![60, 10], vec![55, 1]], &[vec![35, 20], vec![30, 5], vec![12, 1]]);

        let yes_asks = store.ask_depth("X", Side::Yes);
        assert_eq!(
            yes_asks,
            vec![
                PriceLevel { price: 65, quantity: 20 },
                PriceLevel { price: 70, quantity: 5 },
                PriceLevel { price: 88, quantity: 1 },
            ]
        );

        let no_asks = store.ask_depth("X", Side::No);
        assert_eq!(no_asks[0].price, 40);
        assert_eq!(no_asks[1].price, 45);
    }

    #[test]
    fn test_ask_depth_round_trip() {
        let book = OrderBook::from_levels("X", &[vec![61, 2], vec![44, 7]], &[vec![38, 3], vec![9, 1]]);
        for side in [Side::Yes, Side::No] {
            let converted = book.ask_depth(side);
            assert!(converted.windows(2).all(|w| w[0].price < w[1].price));

            let back: Vec<i64> = converted.iter().map(|l| 100 - l.price).collect();
            let original: Vec<i64> = book.levels(side.opposite()).iter().map(|l| l.price).collect();
            assert_eq!(back, original);
        }
    }

    #[test]
    fn test_extreme_delta_saturates_instead_of_overflowing() {
        let mut book = OrderBook::from_levels("X", &[vec![60, 10]], &[]);
        book.apply_delta(Side::Yes, 60, i64::MAX);
        assert_eq!(book.levels(Side::Yes)[0].quantity, i64::MAX);

        book.apply_delta(Side::Yes, 60, i64::MIN);
        book.apply_delta(Side::Yes, 60, i64::MIN);
        assert!(book.levels(Side::Yes).is_empty());
    }

    #[test]
    fn test_random_deltas_preserve_invariant() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let mut book = OrderBook::from_levels(
                "X",
                &[vec![rng.gen_range(1..99), rng.gen_range(1..50)]],
                &[vec![rng.gen_range(1..99), rng.gen_range(1..50)]],
            );
            for _ in 0..500 {
                let side = if rng.gen_bool(0.5) { Side::Yes } else { Side::No };
                let price = rng.gen_range(1..100);
                let delta = rng.gen_range(-30..30);
                book.apply_delta(side, price, delta);
                assert_invariant(&book);

                for side in [Side::Yes, Side::No] {
                    let asks = book.ask_depth(side);
                    assert!(asks.windows(2).all(|w| w[0].price < w[1].price));
                }
            }
        }
    }

    #[test]
    fn test_remove_drops_book() {
        let store = OrderBookStore::new();
        store.apply_snapshot("X", &[vec![60, 10]], &[vec![35, 20]]);
        assert_eq!(store.top_of_book("X"), Some((60, 65)));
        store.remove("X");
        assert!(!store.has_book("X"));
    }
}
