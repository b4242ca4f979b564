//! Query types exchanged with the collection data gateway.

use serde::{Deserialize, Serialize};

use crate::types::{Value, Values};

/// Row-level filter expression understood by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum FilterExpr {
    /// Matches every record.
    All,
    /// Record id is one of the given ids.
    IdIn { ids: Vec<String> },
    /// Field holds exactly this value.
    Equals { field: String, value: Value },
    /// Case-insensitive substring match against any text value.
    Search { text: String },
    /// Every sub-expression matches.
    And { exprs: Vec<FilterExpr> },
}

impl FilterExpr {
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self::IdIn {
            ids: vec![id.into()],
        }
    }

    /// Combines expressions, dropping `All` terms and flattening a single survivor.
    #[must_use]
    pub fn all_of(exprs: Vec<FilterExpr>) -> Self {
        let mut kept: Vec<FilterExpr> = exprs.into_iter().filter(|e| *e != Self::All).collect();
        match kept.len() {
            0 => Self::All,
            1 => kept.remove(0),
            _ => Self::And { exprs: kept },
        }
    }

    /// Evaluates the expression against one record's id and values.
    ///
    /// Reference semantics for gateway implementations that filter in memory.
    #[must_use]
    pub fn matches(&self, id: &str, values: &Values) -> bool {
        match self {
            Self::All => true,
            Self::IdIn { ids } => ids.iter().any(|candidate| candidate == id),
            Self::Equals { field, value } => values.get(field) == Some(value),
            Self::Search { text } => {
                let needle = text.to_lowercase();
                values.values().any(|v| {
                    v.as_str()
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
                })
            }
            Self::And { exprs } => exprs.iter().all(|e| e.matches(id, values)),
        }
    }
}

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Page number, starting at 1.
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    #[must_use]
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Number of items preceding this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.page_size as usize
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self
        }
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    /// Whether pages after `pagination` can still hold items.
    #[must_use]
    pub fn has_more(&self, pagination: Pagination) -> bool {
        (pagination.offset() + self.items.len()) < usize::try_from(self.total).unwrap_or(usize::MAX)
            && !self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn all_of_flattens() {
        assert_eq!(FilterExpr::all_of(vec![FilterExpr::All]), FilterExpr::All);
        let id = FilterExpr::id("a");
        assert_eq!(FilterExpr::all_of(vec![FilterExpr::All, id.clone()]), id);
        let both = FilterExpr::all_of(vec![id.clone(), FilterExpr::Search { text: "x".into() }]);
        assert!(matches!(both, FilterExpr::And { exprs } if exprs.len() == 2));
    }

    #[test]
    fn search_is_case_insensitive_over_strings() {
        let v = values(&[("title", Value::from("Quarterly Report")), ("n", Value::Int(1))]);
        assert!(FilterExpr::Search { text: "report".into() }.matches("r1", &v));
        assert!(!FilterExpr::Search { text: "1".into() }.matches("r1", &v));
    }

    #[test]
    fn equals_and_ids() {
        let v = values(&[("status", Value::from("open"))]);
        let expr = FilterExpr::all_of(vec![
            FilterExpr::Equals {
                field: "status".into(),
                value: Value::from("open"),
            },
            FilterExpr::IdIn {
                ids: vec!["r1".into(), "r2".into()],
            },
        ]);
        assert!(expr.matches("r2", &v));
        assert!(!expr.matches("r3", &v));
    }

    #[test]
    fn pagination_offsets() {
        let p = Pagination::new(0, 10);
        assert_eq!(p.page, 1);
        assert_eq!(p.offset(), 0);
        assert_eq!(p.next().offset(), 10);
    }

    #[test]
    fn has_more_stops_at_total() {
        let page = Page {
            items: vec![1, 2],
            total: 4,
        };
        assert!(page.has_more(Pagination::new(1, 2)));
        assert!(!page.has_more(Pagination::new(2, 2)));
        let empty: Page<u8> = Page {
            items: vec![],
            total: 10,
        };
        assert!(!empty.has_more(Pagination::new(9, 2)));
    }

    #[test]
    fn filter_expr_wire_shape() {
        let json = serde_json::to_value(FilterExpr::id("a")).unwrap();
        assert_eq!(json["op"], "idIn");
        assert_eq!(json["ids"][0], "a");
    }
}
