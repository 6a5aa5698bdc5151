use crate::{
    authority::RoundAuthority,
    notify::{Action, Notifier},
};
use roundplay_types::{api::RoundOutcome, RoundDuration};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, PoisonError, RwLock},
};
use tracing::debug;

/// One page of past outcomes. Pages are 1-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<RoundOutcome>,
    pub page: usize,
    pub total_pages: usize,
}

/// Rolling list of past outcomes per duration, newest first.
#[derive(Clone)]
pub struct RoundHistoryCache {
    outcomes: Arc<RwLock<HashMap<RoundDuration, VecDeque<RoundOutcome>>>>,
    capacity: usize,
    page_size: usize,
}

impl RoundHistoryCache {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            outcomes: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Records a freshly settled outcome. Outcomes already present (by period)
    /// are ignored.
    pub fn append(&self, duration: RoundDuration, outcome: RoundOutcome) -> bool {
        let mut outcomes = self.outcomes.write().unwrap_or_else(PoisonError::into_inner);
        let list = outcomes.entry(duration).or_default();
        if list
            .iter()
            .any(|existing| existing.period_number == outcome.period_number)
        {
            return false;
        }

        // Keep newest first even if an older round lands late
        let position = list
            .iter()
            .position(|existing| existing.period_number < outcome.period_number)
            .unwrap_or(list.len());
        list.insert(position, outcome);
        list.truncate(self.capacity);
        true
    }

    /// Replaces the history for `duration` with an authoritative listing.
    pub fn replace(&self, duration: RoundDuration, mut listing: Vec<RoundOutcome>) {
        listing.sort_by(|a, b| b.period_number.cmp(&a.period_number));
        listing.dedup_by_key(|outcome| outcome.period_number);
        listing.truncate(self.capacity);
        self.outcomes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(duration, listing.into());
    }

    pub fn latest(&self, duration: RoundDuration) -> Option<RoundOutcome> {
        self.outcomes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&duration)
            .and_then(|list| list.front().cloned())
    }

    pub fn len(&self, duration: RoundDuration) -> usize {
        self.outcomes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&duration)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, duration: RoundDuration) -> bool {
        self.len(duration) == 0
    }

    /// Returns `page` (clamped to the available range).
    pub fn page(&self, duration: RoundDuration, page: usize) -> Page {
        let outcomes = self.outcomes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = outcomes.get(&duration).filter(|list| !list.is_empty()) else {
            return Page {
                items: Vec::new(),
                page: 1,
                total_pages: 1,
            };
        };
        let total_pages = list.len().div_ceil(self.page_size);
        let page = page.clamp(1, total_pages);
        let items = list
            .iter()
            .skip((page - 1) * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect();
        Page {
            items,
            page,
            total_pages,
        }
    }

    /// Loads the authoritative listing for `duration`. A failure leaves the
    /// cached history untouched and raises a banner.
    pub async fn load<A: RoundAuthority>(
        &self,
        authority: &A,
        notifier: &Notifier,
        duration: RoundDuration,
    ) -> bool {
        match authority.results(duration).await {
            Ok(listing) => {
                debug!(%duration, count = listing.len(), "loaded round history");
                self.replace(duration, listing);
                true
            }
            Err(err) => {
                notifier.failure(duration, Action::FetchResults, err);
                false
            }
        }
    }
}
