//! Pagination and filtering types for repository queries
//!
//! This module provides types for controlling pagination and filtering of
//! repository query results, and the [`Paginated`] value every list call
//! returns.
//!
//! # Example
//!
//! ```rust
//! use entity_repository::repository::{FilterCondition, Pagination};
//!
//! // Second page of ten
//! let pagination = Pagination::new(1, 10);
//! assert_eq!(pagination.offset(), 10);
//!
//! // Filter conditions are AND-ed together
//! let filters = vec![
//!     FilterCondition::eq("status", "open"),
//!     FilterCondition::gte("total", 100_i64),
//! ];
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Page size used when a caller does not say otherwise
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Pagination parameters for list queries
///
/// Page indexes are zero-based: index 1 with size 10 addresses items 11-20.
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::Pagination;
///
/// let page = Pagination::new(2, 20);
/// assert_eq!(page.offset(), 40);
/// assert_eq!(page.limit(), 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Zero-based page index
    pub index: u64,
    /// Number of items per page
    pub size: u64,
}

impl Pagination {
    /// Create new pagination parameters
    #[must_use]
    pub const fn new(index: u64, size: u64) -> Self {
        Self { index, size }
    }

    /// Create pagination for the first page with the given size
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::Pagination;
    ///
    /// let first_page = Pagination::first_page(25);
    /// assert_eq!(first_page.index, 0);
    /// assert_eq!(first_page.offset(), 0);
    /// ```
    #[must_use]
    pub const fn first_page(size: u64) -> Self {
        Self { index: 0, size }
    }

    /// Number of items to skip
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.index.saturating_mul(self.size)
    }

    /// Maximum number of items to return
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.size
    }

    /// Clamp the page size between 1 and `max_size`
    ///
    /// A `max_size` of zero disables the upper bound.
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::Pagination;
    ///
    /// assert_eq!(Pagination::new(0, 500).clamped(100).size, 100);
    /// assert_eq!(Pagination::new(0, 0).clamped(100).size, 1);
    /// ```
    #[must_use]
    pub fn clamped(self, max_size: u64) -> Self {
        let mut size = self.size.max(1);
        if max_size > 0 {
            size = size.min(max_size);
        }
        Self {
            index: self.index,
            size,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            index: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of results plus the metadata needed to navigate the rest
///
/// `count` is the number of items matching the filter before pagination.
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::Paginated;
///
/// let page = Paginated::new(vec!["a", "b"], 0, 2, 5);
/// assert_eq!(page.pages, 3);
/// assert!(page.has_next);
/// assert!(!page.has_previous);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Items of the requested page, in query order
    pub items: Vec<T>,
    /// Zero-based page index
    pub index: u64,
    /// Requested page size
    pub size: u64,
    /// Total number of matching items across all pages
    pub count: u64,
    /// Total number of pages
    pub pages: u64,
    /// Whether a page precedes this one
    pub has_previous: bool,
    /// Whether a page follows this one
    pub has_next: bool,
}

impl<T> Paginated<T> {
    /// Build a page, deriving the page count and navigation flags
    #[must_use]
    pub fn new(items: Vec<T>, index: u64, size: u64, count: u64) -> Self {
        let pages = if size == 0 { 0 } else { count.div_ceil(size) };
        Self {
            items,
            index,
            size,
            count,
            pages,
            has_previous: index > 0,
            has_next: index.saturating_add(1) < pages,
        }
    }

    /// An empty page (no matching items)
    #[must_use]
    pub fn empty(pagination: Pagination) -> Self {
        Self::new(Vec::new(), pagination.index, pagination.size, 0)
    }

    /// Transform the items while keeping the page metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            index: self.index,
            size: self.size,
            count: self.count,
            pages: self.pages,
            has_previous: self.has_previous,
            has_next: self.has_next,
        }
    }

    /// Number of items on this page
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this page holds no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Comparison operators for filter conditions
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::FilterOperator;
///
/// assert_eq!(format!("{}", FilterOperator::Equal), "=");
/// assert_eq!(format!("{}", FilterOperator::Like), "LIKE");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Not equal to (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// Pattern matching (LIKE, `%` and `_` wildcards)
    Like,
    /// Value is in a list (IN)
    In,
    /// Value is null (IS NULL)
    IsNull,
    /// Value is not null (IS NOT NULL)
    IsNotNull,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::In => write!(f, "IN"),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// A value that can be used in filter conditions
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::FilterValue;
///
/// let string_val: FilterValue = "open".into();
/// let int_val: FilterValue = 42_i64.into();
/// let bool_val: FilterValue = true.into();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    /// String value
    String(String),
    /// 64-bit integer value
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// List of string values (for IN operator)
    StringList(Vec<String>),
    /// List of integer values (for IN operator)
    IntegerList(Vec<i64>),
    /// Null value (for IS NULL / IS NOT NULL)
    Null,
}

impl FilterValue {
    /// Convert a scalar JSON value into a filter value
    ///
    /// Returns `None` for arrays and objects, which cannot be compared.
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::FilterValue;
    /// use serde_json::json;
    ///
    /// assert_eq!(FilterValue::from_json(&json!(7)), Some(FilterValue::Integer(7)));
    /// assert_eq!(FilterValue::from_json(&json!([1, 2])), None);
    /// ```
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Boolean(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Compare a row value against this filter value
    ///
    /// Returns `None` when the two are not comparable (different types, lists,
    /// nulls), which makes every ordering operator fail to match.
    fn compare(&self, value: &Value) -> Option<Ordering> {
        match (self, value) {
            (Self::String(expected), Value::String(actual)) => Some(actual.as_str().cmp(expected)),
            (Self::Integer(expected), Value::Number(actual)) => match actual.as_i64() {
                Some(actual) => Some(actual.cmp(expected)),
                None => actual.as_f64()?.partial_cmp(&(*expected as f64)),
            },
            (Self::Float(expected), Value::Number(actual)) => actual.as_f64()?.partial_cmp(expected),
            (Self::Boolean(expected), Value::Bool(actual)) => Some(actual.cmp(expected)),
            _ => None,
        }
    }

    fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::StringList(list), Value::String(actual)) => list.iter().any(|s| s == actual),
            (Self::IntegerList(list), Value::Number(actual)) => actual
                .as_i64()
                .is_some_and(|actual| list.contains(&actual)),
            _ => false,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::StringList(list) => write!(f, "[{}]", list.join(", ")),
            Self::IntegerList(list) => {
                let rendered: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Uuid> for FilterValue {
    fn from(id: Uuid) -> Self {
        Self::String(id.to_string())
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(list: Vec<String>) -> Self {
        Self::StringList(list)
    }
}

impl From<Vec<i64>> for FilterValue {
    fn from(list: Vec<i64>) -> Self {
        Self::IntegerList(list)
    }
}

/// A single filter condition for querying entities
///
/// A slice of conditions forms the query predicate; all of them must match.
/// Field names may address nested objects with dots (`"address.city"`).
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::FilterCondition;
/// use serde_json::json;
///
/// let filter = FilterCondition::gte("total", 100_i64);
/// assert!(filter.matches(&json!({ "total": 150 })));
/// assert!(!filter.matches(&json!({ "total": 20 })));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// The field name to filter on
    pub field: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The value to compare against
    pub value: FilterValue,
}

impl FilterCondition {
    /// Create a new filter condition
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter (field = value)
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Equal, value.into())
    }

    /// Create a not-equal filter (field != value)
    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::NotEqual, value.into())
    }

    /// Create a greater-than filter (field > value)
    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThan, value.into())
    }

    /// Create a greater-than-or-equal filter (field >= value)
    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThanOrEqual, value.into())
    }

    /// Create a less-than filter (field < value)
    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThan, value.into())
    }

    /// Create a less-than-or-equal filter (field <= value)
    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThanOrEqual, value.into())
    }

    /// Create a LIKE pattern filter
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::FilterCondition;
    ///
    /// let filter = FilterCondition::like("email", "%@example.com");
    /// ```
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Like, FilterValue::String(pattern.into()))
    }

    /// Create an IN list filter for strings
    pub fn in_strings(field: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(field, FilterOperator::In, FilterValue::StringList(values))
    }

    /// Create an IN list filter for integers
    pub fn in_integers(field: impl Into<String>, values: Vec<i64>) -> Self {
        Self::new(field, FilterOperator::In, FilterValue::IntegerList(values))
    }

    /// Create an IS NULL filter
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, FilterValue::Null)
    }

    /// Create an IS NOT NULL filter
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, FilterValue::Null)
    }

    /// Evaluate this condition against a JSON row
    ///
    /// A missing field behaves like SQL NULL: it only satisfies `IS NULL`.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        let value = field_value(row, &self.field).unwrap_or(&Value::Null);
        if value.is_null() {
            return self.operator == FilterOperator::IsNull;
        }
        match self.operator {
            FilterOperator::IsNull => false,
            FilterOperator::IsNotNull => true,
            FilterOperator::Equal => self.value.compare(value) == Some(Ordering::Equal),
            FilterOperator::NotEqual => {
                matches!(self.value.compare(value), Some(o) if o != Ordering::Equal)
            }
            FilterOperator::GreaterThan => self.value.compare(value) == Some(Ordering::Greater),
            FilterOperator::GreaterThanOrEqual => matches!(
                self.value.compare(value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::LessThan => self.value.compare(value) == Some(Ordering::Less),
            FilterOperator::LessThanOrEqual => matches!(
                self.value.compare(value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Like => match (&self.value, value) {
                (FilterValue::String(pattern), Value::String(actual)) => like(pattern, actual),
                _ => false,
            },
            FilterOperator::In => self.value.contains(value),
        }
    }
}

impl fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            FilterOperator::IsNull | FilterOperator::IsNotNull => {
                write!(f, "{} {}", self.field, self.operator)
            }
            _ => write!(f, "{} {} {}", self.field, self.operator, self.value),
        }
    }
}

/// Evaluate a whole predicate (all conditions AND-ed) against a row
#[must_use]
pub fn matches_all(filters: &[FilterCondition], row: &Value) -> bool {
    filters.iter().all(|filter| filter.matches(row))
}

/// Resolve a possibly dotted field path inside a JSON row
pub(crate) fn field_value<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(row, |current, segment| current.get(segment))
}

/// SQL LIKE matching: `%` matches any run of characters, `_` exactly one
fn like(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
