//! Tracks which instruments should receive live book updates.
//!
//! Subscribing only records intent; the command is forwarded to the
//! transport when a connection is attached. On every (re)connect the
//! ingestion task replays the whole tracked set as one subscribe command.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::store::OrderBookStore;

/// Command forwarded to the live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    Subscribe(Vec<String>),
}

#[derive(Debug)]
pub struct SubscriptionManager {
    tracked: RwLock<BTreeSet<String>>,
    connection: RwLock<Option<mpsc::UnboundedSender<SubscriptionCommand>>>,
    books: Arc<OrderBookStore>,
}

impl SubscriptionManager {
    pub fn new(books: Arc<OrderBookStore>) -> Self {
        Self {
            tracked: RwLock::new(BTreeSet::new()),
            connection: RwLock::new(None),
            books,
        }
    }

    /// Records the tickers and, if connected, forwards a subscribe command.
    pub fn subscribe(&self, tickers: &[String]) {
        let new: Vec<String> = {
            let mut tracked = self.tracked.write();
            tickers
                .iter()
                .filter(|t| tracked.insert((*t).clone()))
                .cloned()
                .collect()
        };

        if new.is_empty() {
            return;
        }

        let connection = self.connection.read();
        match connection.as_ref() {
            Some(tx) => {
                if tx.send(SubscriptionCommand::Subscribe(new)).is_err() {
                    // Connection is going away; replay on reconnect covers it.
                    warn!("subscription channel closed, deferring to reconnect");
                }
            }
            None => debug!(tickers = new.len(), "not connected, subscription recorded"),
        }
    }

    /// Forgets the tickers and drops any stored book for them.
    pub fn unsubscribe(&self, tickers: &[String]) {
        {
            let mut tracked = self.tracked.write();
            for t in tickers {
                tracked.remove(t);
            }
        }
        for t in tickers {
            self.books.remove(t);
        }
    }

    pub fn is_subscribed(&self, ticker: &str) -> bool {
        self.tracked.read().contains(ticker)
    }

    /// The full tracked set, sorted.
    pub fn tracked(&self) -> Vec<String> {
        self.tracked.read().iter().cloned().collect()
    }

    /// Called by the ingestion task once a connection is up.
    ///
    /// Returns the replay command for the current tracked set, if any.
    pub fn attach(
        &self,
        tx: mpsc::UnboundedSender<SubscriptionCommand>,
    ) -> Option<SubscriptionCommand> {
        // Hold the connection lock while snapshotting so a concurrent
        // subscribe either lands in the replay or is forwarded through `tx`.
        let mut connection = self.connection.write();
        *connection = Some(tx);
        let tickers = self.tracked();
        if tickers.is_empty() {
            None
        } else {
            Some(SubscriptionCommand::Subscribe(tickers))
        }
    }

    /// Called by the ingestion task when the connection ends.
    pub fn detach(&self) {
        *self.connection.write() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (Arc<OrderBookStore>, SubscriptionManager) {
        let books = Arc::new(OrderBookStore::new());
        let subs = SubscriptionManager::new(books.clone());
        (books, subs)
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_subscribe_before_connect_records_intent() {
        let (_, subs) = manager();
        subs.subscribe(&tickers(&["B", "A"]));
        assert!(!subs.is_connected());
        assert!(subs.is_subscribed("A"));
        assert_eq!(subs.tracked(), tickers(&["A", "B"]));
    }

    #[test]
    fn test_attach_replays_full_set() {
        let (_, subs) = manager();
        subs.subscribe(&tickers(&["A"]));
        subs.subscribe(&tickers(&["B"]));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let replay = subs.attach(tx);
        assert_eq!(replay, Some(SubscriptionCommand::Subscribe(tickers(&["A", "B"]))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_attach_with_nothing_tracked() {
        let (_, subs) = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(subs.attach(tx), None);
        assert!(subs.is_connected());
        subs.detach();
        assert!(!subs.is_connected());
    }

    #[test]
    fn test_subscribe_while_connected_forwards_only_new() {
        let (_, subs) = manager();
        subs.subscribe(&tickers(&["A"]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        subs.attach(tx);

        subs.subscribe(&tickers(&["A", "C"]));
        assert_eq!(rx.try_recv().unwrap(), SubscriptionCommand::Subscribe(tickers(&["C"])));

        // Idempotent: nothing new, nothing sent.
        subs.subscribe(&tickers(&["A", "C"]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_drops_book() {
        let (books, subs) = manager();
        subs.subscribe(&tickers(&["X"]));
        books.apply_snapshot("X", &[vec![60, 10]], &[vec![35, 20]]);

        subs.unsubscribe(&tickers(&["X"]));
        assert!(!subs.is_subscribed("X"));
        assert!(!books.has_book("X"));
    }

    #[test]
    fn test_subscribe_after_channel_dropped_does_not_panic() {
        let (_, subs) = manager();
        let (tx, rx) = mpsc::unbounded_channel();
        subs.attach(tx);
        drop(rx);
        subs.subscribe(&tickers(&["Z"]));
        assert!(subs.is_subscribed("Z"));
    }
}
