use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::debug;

/// Optimistic local copy of the user's balances, keyed by currency code.
///
/// The ledger is the source of truth. Locally the balance only moves by
/// deltas ([Wallet::debit] after a bet is acknowledged, [Wallet::credit] after
/// a win), so concurrent debits and credits commute. [Wallet::refresh]
/// replaces everything with a fresh session snapshot.
#[derive(Clone, Default)]
pub struct Wallet {
    balances: Arc<Mutex<HashMap<String, i64>>>,
}

impl Wallet {
    pub fn new(currency: &str, balance: i64) -> Self {
        let wallet = Self::default();
        wallet.refresh([(currency.to_string(), balance)]);
        wallet
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.balances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn debit(&self, currency: &str, amount: u64) -> i64 {
        self.apply(currency, |balance| balance.saturating_sub(clamp(amount)))
    }

    pub fn credit(&self, currency: &str, amount: u64) -> i64 {
        self.apply(currency, |balance| balance.saturating_add(clamp(amount)))
    }

    fn apply(&self, currency: &str, update: impl FnOnce(i64) -> i64) -> i64 {
        let mut balances = self.lock();
        let balance = balances.entry(currency.to_string()).or_default();
        let previous = *balance;
        *balance = update(previous);
        debug!(currency, previous, balance = *balance, "wallet updated");
        *balance
    }

    /// Replaces all balances wholesale.
    pub fn refresh(&self, balances: impl IntoIterator<Item = (String, i64)>) {
        let mut current = self.lock();
        current.clear();
        current.extend(balances);
    }

    pub fn balance(&self, currency: &str) -> i64 {
        self.lock().get(currency).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.lock().clone()
    }
}

/// Amounts beyond `i64::MAX` saturate instead of wrapping.
fn clamp(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_commute() {
        let first = Wallet::new("INR", 1_000);
        first.debit("INR", 50);
        first.credit("INR", 100);

        let second = Wallet::new("INR", 1_000);
        second.credit("INR", 100);
        second.debit("INR", 50);

        assert_eq!(first.balance("INR"), 1_050);
        assert_eq!(first.balance("INR"), second.balance("INR"));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let wallet = Wallet::new("INR", 0);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let wallet = wallet.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        if i % 2 == 0 {
                            wallet.credit("INR", 3);
                        } else {
                            wallet.debit("INR", 1);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(wallet.balance("INR"), 4 * 3_000 - 4 * 1_000);
    }

    #[test]
    fn test_huge_amounts_saturate() {
        let wallet = Wallet::new("INR", 1_000);
        assert_eq!(wallet.credit("INR", u64::MAX), i64::MAX);
        assert_eq!(wallet.credit("INR", 1), i64::MAX);

        let wallet = Wallet::new("INR", 1_000);
        assert_eq!(wallet.debit("INR", 1 << 63), 1_000 - i64::MAX);
        assert_eq!(wallet.debit("INR", u64::MAX), i64::MIN);

        // Back in range after a saturated debit
        assert_eq!(wallet.credit("INR", 10), i64::MIN + 10);
    }

    #[test]
    fn test_refresh_replaces_balances() {
        let wallet = Wallet::new("INR", 10);
        wallet.credit("USD", 5);
        wallet.refresh([("INR".to_string(), 700)]);
        assert_eq!(wallet.balance("INR"), 700);
        assert_eq!(wallet.balance("USD"), 0);
        assert_eq!(wallet.snapshot().len(), 1);
    }
}
