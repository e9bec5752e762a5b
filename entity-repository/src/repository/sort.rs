//! Sort specifications for list and single-item queries
//!
//! A [`SortSpec`] is an ordered list of `(field, direction)` pairs. Field names
//! are opaque to this layer; the only rule is that they are non-empty, and a
//! spec is validated before it is handed to the store.
//!
//! # Example
//!
//! ```rust
//! use entity_repository::repository::{SortDirection, SortSpec};
//!
//! let spec = SortSpec::by("placed_at", SortDirection::Descending).then_by("id", SortDirection::Ascending);
//! assert!(spec.validate().is_ok());
//!
//! let parsed: SortSpec = "placed_at desc, id".parse().unwrap();
//! assert_eq!(parsed, spec);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{RepositoryError, RepositoryOperation};
use super::traits::RepositoryResult;

/// Sort direction for ordering query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order (A-Z, 0-9, oldest first)
    #[default]
    Ascending,
    /// Descending order (Z-A, 9-0, newest first)
    Descending,
}

impl SortDirection {
    /// The opposite direction
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            other => Err(RepositoryError::validation_failed(format!(
                "Invalid sort direction '{other}'"
            ))),
        }
    }
}

/// A single `(field, direction)` ordering term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// Field to order by (dotted paths address nested values)
    pub field: String,
    /// Direction for this field
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sort {
    /// Create a sort term
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    /// Ascending sort on `field`
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Ascending)
    }

    /// Descending sort on `field`
    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Descending)
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.direction)
    }
}

/// Ordered sequence of sort terms; earlier terms take precedence
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortSpec {
    sorts: Vec<Sort>,
}

impl SortSpec {
    /// An empty spec (store-native order)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a spec with a single term
    pub fn by(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            sorts: vec![Sort::new(field, direction)],
        }
    }

    /// Append a lower-precedence term
    #[must_use]
    pub fn then_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push(Sort::new(field, direction));
        self
    }

    /// Check that every term names a field
    ///
    /// # Errors
    ///
    /// Returns a `ValidationFailed` error naming the offending position when a
    /// field is empty or whitespace.
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::{RepositoryErrorKind, Sort, SortSpec};
    ///
    /// let spec = SortSpec::from(vec![Sort::asc("")]);
    /// let err = spec.validate().unwrap_err();
    /// assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
    /// ```
    pub fn validate(&self) -> RepositoryResult<()> {
        for (position, sort) in self.sorts.iter().enumerate() {
            if sort.field.trim().is_empty() {
                return Err(RepositoryError::validation_failed(format!(
                    "Invalid field: sort term {position} has an empty field name"
                )));
            }
        }
        Ok(())
    }

    /// Same fields with every direction flipped
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            sorts: self
                .sorts
                .iter()
                .map(|s| Sort::new(s.field.clone(), s.direction.reversed()))
                .collect(),
        }
    }

    /// Terms in precedence order
    #[must_use]
    pub fn terms(&self) -> &[Sort] {
        &self.sorts
    }

    /// Whether the spec has no terms
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorts.is_empty()
    }
}

impl From<Vec<Sort>> for SortSpec {
    fn from(sorts: Vec<Sort>) -> Self {
        Self { sorts }
    }
}

impl From<Sort> for SortSpec {
    fn from(sort: Sort) -> Self {
        Self { sorts: vec![sort] }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.sorts.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join(", "))
    }
}

/// Parses `"field [asc|desc], other [asc|desc]"`; direction defaults to ascending
impl FromStr for SortSpec {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }

        let mut sorts = Vec::new();
        for term in s.split(',') {
            let mut parts = term.split_whitespace();
            let field = parts.next().unwrap_or_default();
            let direction = match parts.next() {
                Some(dir) => dir.parse()?,
                None => SortDirection::Ascending,
            };
            if parts.next().is_some() {
                return Err(RepositoryError::validation_failed(format!(
                    "Invalid sort term '{}'",
                    term.trim()
                ))
                .with_operation(RepositoryOperation::List));
            }
            sorts.push(Sort::new(field, direction));
        }

        let spec = Self { sorts };
        spec.validate()?;
        Ok(spec)
    }
}
