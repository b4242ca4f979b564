//! View filter state and its flat key/value encoding.
//!
//! Four slots (`query`, `filter`, `category`, `page`) each hold either their
//! default or an explicit value. A slot equal to its default is absent from
//! the encoding, so shared URLs stay short.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::{FilterExpr, Pagination};
use crate::types::Value;

pub const DEFAULT_CATEGORY: &str = "all";
pub const DEFAULT_PAGE: u32 = 1;

/// One slot of [`FilterState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterSlot {
    Query,
    Filter,
    Category,
    Page,
}

impl FilterSlot {
    pub const ALL: [FilterSlot; 4] = [Self::Query, Self::Filter, Self::Category, Self::Page];

    /// Key used in the persisted encoding.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Query => "q",
            Self::Filter => "filter",
            Self::Category => "category",
            Self::Page => "page",
        }
    }
}

/// Parameters describing which subset of a collection a view displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub query: String,
    /// `field:value` narrows to an exact match; anything else is an extra search term.
    pub filter: String,
    pub category: String,
    /// Always `>= 1`.
    pub page: u32,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            query: String::new(),
            filter: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
            page: DEFAULT_PAGE,
        }
    }
}

impl FilterState {
    /// Encoded value of `slot`, or `None` when the slot holds its default.
    #[must_use]
    pub fn encoded(&self, slot: FilterSlot) -> Option<String> {
        match slot {
            FilterSlot::Query => (!self.query.is_empty()).then(|| self.query.clone()),
            FilterSlot::Filter => (!self.filter.is_empty()).then(|| self.filter.clone()),
            FilterSlot::Category => {
                (self.category != DEFAULT_CATEGORY).then(|| self.category.clone())
            }
            FilterSlot::Page => (self.page != DEFAULT_PAGE).then(|| self.page.to_string()),
        }
    }

    /// Non-default slots as `(key, value)` pairs, in slot order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        FilterSlot::ALL
            .iter()
            .filter_map(|slot| self.encoded(*slot).map(|v| (slot.key(), v)))
            .collect()
    }

    /// Decodes from flat pairs. Unknown keys are ignored, later duplicates win,
    /// and a missing, malformed or zero page decodes to page 1.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut state = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                "q" => state.query = value.to_string(),
                "filter" => state.filter = value.to_string(),
                "category" => state.category = value.to_string(),
                "page" => {
                    state.page = value
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|p| *p >= 1)
                        .unwrap_or(DEFAULT_PAGE);
                }
                _ => {}
            }
        }
        state
    }

    #[must_use]
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.to_pairs())
            .finish()
    }

    /// Decodes a query string, with or without a leading `?`.
    #[must_use]
    pub fn from_query_string(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    /// Writes one slot into a shared parameter map, touching no other key.
    pub fn write_slot(&self, slot: FilterSlot, params: &mut BTreeMap<String, String>) {
        match self.encoded(slot) {
            Some(value) => {
                params.insert(slot.key().to_string(), value);
            }
            None => {
                params.remove(slot.key());
            }
        }
    }

    /// Writes all four slots into a shared parameter map, preserving foreign keys.
    pub fn write_to(&self, params: &mut BTreeMap<String, String>) {
        for slot in FilterSlot::ALL {
            self.write_slot(slot, params);
        }
    }

    /// Resets `query` and `filter` to empty and `category` to `"all"`.
    /// The page is left as is.
    pub fn clear_search(&mut self) {
        self.query.clear();
        self.filter.clear();
        DEFAULT_CATEGORY.clone_into(&mut self.category);
    }

    /// Translates the state into a gateway filter.
    ///
    /// `category_field` names the record field the category slot narrows on.
    #[must_use]
    pub fn to_filter_expr(&self, category_field: &str) -> FilterExpr {
        let mut exprs = Vec::new();
        if !self.query.is_empty() {
            exprs.push(FilterExpr::Search {
                text: self.query.clone(),
            });
        }
        if !self.filter.is_empty() {
            exprs.push(match self.filter.split_once(':') {
                Some((field, value)) if !field.trim().is_empty() => FilterExpr::Equals {
                    field: field.trim().to_string(),
                    value: Value::String(value.trim().to_string()),
                },
                _ => FilterExpr::Search {
                    text: self.filter.clone(),
                },
            });
        }
        if self.category != DEFAULT_CATEGORY {
            exprs.push(FilterExpr::Equals {
                field: category_field.to_string(),
                value: Value::String(self.category.clone()),
            });
        }
        FilterExpr::all_of(exprs)
    }

    #[must_use]
    pub fn pagination(&self, page_size: u32) -> Pagination {
        Pagination::new(self.page, page_size)
    }
}
