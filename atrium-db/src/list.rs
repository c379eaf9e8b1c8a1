//! List requests: page, order and search as they arrive from an API.

use crate::error::DbResult;
use crate::query::{self, Pagination, QueryOption};
use crate::schema::FieldMap;
use serde::Deserialize;

/// Order applied when a request doesn't name one.
pub const DEFAULT_ORDER: &[&str] = &["-createdAt"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListRequest {
    pub page: i64,
    pub page_size: i64,
    /// Tokens like `name` or `-createdAt`.
    pub order_by: Vec<String>,
    pub search: Option<String>,
}

impl ListRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    pub fn with_order_by<S: Into<String>>(mut self, tokens: impl IntoIterator<Item = S>) -> Self {
        self.order_by = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.page_size)
    }

    pub fn offset(&self) -> i64 {
        self.pagination().offset()
    }

    pub fn limit(&self) -> i64 {
        self.pagination().limit()
    }

    pub fn has_explicit_order(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// The requested order, or `default` when none was given.
    pub fn order_by_or<'a>(&'a self, default: &'a [&'a str]) -> Vec<&'a str> {
        if self.has_explicit_order() {
            self.order_by.iter().map(String::as_str).collect()
        } else {
            default.to_vec()
        }
    }

    /// Options for this request: pagination, order (falling back to
    /// `default_order`) and search over `search_columns`.
    pub fn options(
        &self,
        fields: &FieldMap,
        default_order: &[&str],
        search_columns: &[&'static str],
    ) -> DbResult<Vec<QueryOption>> {
        let mut options = vec![query::order_by(self.order_by_or(default_order), fields)?];
        if let Some(term) = self.search.as_deref() {
            options.push(query::search(term, search_columns)?);
        }
        options.push(query::paginate(self.page, self.page_size));
        Ok(options)
    }
}
