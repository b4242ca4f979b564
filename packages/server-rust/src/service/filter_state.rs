//! Observable store for a view's [`FilterState`].
//!
//! Updates are serialized and each one publishes a single
//! [`FilterSnapshot`], so observers never see a half-applied
//! `clear_search`. Every snapshot carries a generation used to drop
//! responses of superseded fetches.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use coladmin_core::{FilterExpr, FilterSlot, FilterState, Pagination, DEFAULT_CATEGORY};
use parking_lot::Mutex;
use tokio::sync::watch;

/// One published state plus what changed relative to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSnapshot {
    pub state: FilterState,
    pub generation: u64,
    /// Slots whose encoded value differs from the previous snapshot.
    pub changed: Vec<FilterSlot>,
}

impl FilterSnapshot {
    /// Writes only the slots this update changed into `params`.
    pub fn write_changed(&self, params: &mut BTreeMap<String, String>) {
        for slot in &self.changed {
            self.state.write_slot(*slot, params);
        }
    }
}

/// Issued by [`QueryFilterState::begin_fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
}

/// What to ask the gateway for under the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub filter: FilterExpr,
    pub pagination: Pagination,
}

pub struct QueryFilterState {
    current: ArcSwap<FilterSnapshot>,
    publisher: watch::Sender<Arc<FilterSnapshot>>,
    write_lock: Mutex<()>,
    category_field: String,
    page_size: u32,
}

impl QueryFilterState {
    #[must_use]
    pub fn new(initial: FilterState, category_field: impl Into<String>, page_size: u32) -> Self {
        let snapshot = Arc::new(FilterSnapshot {
            state: initial,
            generation: 0,
            changed: Vec::new(),
        });
        let (publisher, _rx) = watch::channel(Arc::clone(&snapshot));
        Self {
            current: ArcSwap::new(snapshot),
            publisher,
            write_lock: Mutex::new(()),
            category_field: category_field.into(),
            page_size: page_size.max(1),
        }
    }

    /// Restores state from a query string such as `?q=foo&page=2`.
    #[must_use]
    pub fn from_query_string(
        query: &str,
        category_field: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self::new(FilterState::from_query_string(query), category_field, page_size)
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<FilterSnapshot> {
        self.current.load_full()
    }

    #[must_use]
    pub fn state(&self) -> FilterState {
        self.current.load().state.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<FilterSnapshot>> {
        self.publisher.subscribe()
    }

    pub fn set_query(&self, query: impl Into<String>) -> Option<Arc<FilterSnapshot>> {
        let query = query.into();
        self.update(|s| s.query = query)
    }

    pub fn set_filter(&self, filter: impl Into<String>) -> Option<Arc<FilterSnapshot>> {
        let filter = filter.into();
        self.update(|s| s.filter = filter)
    }

    /// An empty category means the default, `"all"`.
    pub fn set_category(&self, category: impl Into<String>) -> Option<Arc<FilterSnapshot>> {
        let mut category = category.into();
        if category.is_empty() {
            category = DEFAULT_CATEGORY.to_string();
        }
        self.update(|s| s.category = category)
    }

    /// Pages below 1 are clamped to 1.
    pub fn set_page(&self, page: u32) -> Option<Arc<FilterSnapshot>> {
        self.update(|s| s.page = page.max(1))
    }

    /// Resets query, filter and category in one published update.
    pub fn clear_search(&self) -> Option<Arc<FilterSnapshot>> {
        self.update(FilterState::clear_search)
    }

    /// Starts a fetch for the current state.
    #[must_use]
    pub fn begin_fetch(&self) -> (FetchTicket, FetchRequest) {
        let snapshot = self.current.load();
        let request = FetchRequest {
            filter: snapshot.state.to_filter_expr(&self.category_field),
            pagination: snapshot.state.pagination(self.page_size),
        };
        (
            FetchTicket {
                generation: snapshot.generation,
            },
            request,
        )
    }

    /// Whether no update has landed since `ticket` was issued.
    #[must_use]
    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        self.current.load().generation == ticket.generation
    }

    /// Writes all four slots into a shared parameter map.
    pub fn write_to(&self, params: &mut BTreeMap<String, String>) {
        self.current.load().state.write_to(params);
    }

    /// Applies `edit` and publishes the result. Returns `None`, publishing
    /// nothing, when the edit leaves every slot as it was.
    fn update(&self, edit: impl FnOnce(&mut FilterState)) -> Option<Arc<FilterSnapshot>> {
        let _guard = self.write_lock.lock();
        let previous = self.current.load_full();
        let mut state = previous.state.clone();
        edit(&mut state);

        let changed: Vec<FilterSlot> = FilterSlot::ALL
            .into_iter()
            .filter(|slot| previous.state.encoded(*slot) != state.encoded(*slot))
            .collect();
        if changed.is_empty() {
            return None;
        }

        let next = Arc::new(FilterSnapshot {
            state,
            generation: previous.generation + 1,
            changed,
        });
        self.current.store(Arc::clone(&next));
        self.publisher.send_replace(Arc::clone(&next));
        Some(next)
    }
}
