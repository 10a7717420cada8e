//! Describes where the fields of a `TransactionRecord` live in an input file.

use crate::error::Res;
use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

/// Locates one field in a row, either by zero-based position or by header name.
///
/// In JSON a number is a position and a string is a header name.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Index(usize),
    Name(String),
}

impl Display for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Column::Index(ix) => write!(f, "column {ix}"),
            Column::Name(name) => write!(f, "column '{name}'"),
        }
    }
}

/// The expected column layout of an input file.
///
/// The default matches the upstream export: `id,date,amount,transaction_id` with the account number
/// carried by the file name rather than by a column.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ColumnLayout {
    #[serde(
        serialize_with = "serialize_delimiter",
        deserialize_with = "deserialize_delimiter"
    )]
    delimiter: u8,
    transaction_id: Column,
    account_number: Option<Column>,
    amount: Column,
    occurred_at: Column,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            delimiter: b',',
            transaction_id: Column::Index(3),
            account_number: None,
            amount: Column::Index(2),
            occurred_at: Column::Index(1),
        }
    }
}

impl ColumnLayout {
    pub fn new(
        transaction_id: Column,
        account_number: Option<Column>,
        amount: Column,
        occurred_at: Column,
    ) -> Self {
        Self {
            delimiter: b',',
            transaction_id,
            account_number,
            amount,
            occurred_at,
        }
    }

    /// A layout that finds every field by its snake_case header name.
    pub fn by_header() -> Self {
        Self::new(
            Column::Name("transaction_id".into()),
            Some(Column::Name("account_number".into())),
            Column::Name("amount".into()),
            Column::Name("date".into()),
        )
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// True when any field is located by header name, in which case the first row of a file must
    /// be a header row.
    pub fn requires_headers(&self) -> bool {
        self.columns().any(|c| matches!(c, Column::Name(_)))
    }

    /// Resolves the layout to positions. Header names are matched against `headers` after both are
    /// converted to snake_case, so `Transaction ID` matches `transaction_id`.
    pub fn resolve<S: AsRef<str>>(&self, headers: Option<&[S]>) -> Res<Positions> {
        let mapping = headers.map(HeaderMapping::new);
        let find = |column: &Column| -> Res<usize> {
            match column {
                Column::Index(ix) => Ok(*ix),
                Column::Name(name) => mapping
                    .as_ref()
                    .context("The layout uses header names but the file has no header row")?
                    .position(name),
            }
        };
        Ok(Positions {
            transaction_id: find(&self.transaction_id)?,
            account_number: self.account_number.as_ref().map(find).transpose()?,
            amount: find(&self.amount)?,
            occurred_at: find(&self.occurred_at)?,
        })
    }

    fn columns(&self) -> impl Iterator<Item = &Column> {
        [&self.transaction_id, &self.amount, &self.occurred_at]
            .into_iter()
            .chain(self.account_number.as_ref())
    }
}

/// A `ColumnLayout` resolved against a particular file.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Positions {
    pub(crate) transaction_id: usize,
    pub(crate) account_number: Option<usize>,
    pub(crate) amount: usize,
    pub(crate) occurred_at: usize,
}

/// Maps snake_case header names to their positions in a header row. A name that appears more than
/// once is only an error if the layout looks it up.
struct HeaderMapping {
    positions: HashMap<String, usize>,
    duplicates: HashSet<String>,
}

impl HeaderMapping {
    fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        let mut positions = HashMap::with_capacity(headers.len());
        let mut duplicates = HashSet::new();
        for (ix, header) in headers.iter().enumerate() {
            let key = to_snake_case(header.as_ref());
            if key.is_empty() {
                continue;
            }
            if positions.contains_key(&key) {
                duplicates.insert(key);
            } else {
                positions.insert(key, ix);
            }
        }
        Self {
            positions,
            duplicates,
        }
    }

    fn position(&self, name: &str) -> Res<usize> {
        let key = to_snake_case(name);
        if self.duplicates.contains(&key) {
            bail!("Header '{name}' appears more than once in the file");
        }
        self.positions
            .get(&key)
            .copied()
            .with_context(|| format!("Header '{name}' was not found in the file"))
    }
}

/// Converts a header like `Account #` to `account_number`.
fn to_snake_case(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .replace(['-', ' '], "_")
        .replace('#', "number")
        .chars()
        .filter(|&c| c.is_ascii_alphanumeric() || c == '_')
        .collect()
}

fn serialize_delimiter<S: Serializer>(delimiter: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&char::from(*delimiter).to_string())
}

fn deserialize_delimiter<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let s = String::deserialize(deserializer)?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c as u8),
        _ => Err(serde::de::Error::custom(format!(
            "The delimiter must be a single ascii character, got '{s}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("Account #"), "account_number");
        assert_eq!(to_snake_case(" Transaction ID "), "transaction_id");
        assert_eq!(to_snake_case("occurred-at"), "occurred_at");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_default_layout_is_positional() {
        let layout = ColumnLayout::default();
        assert!(!layout.requires_headers());
        let positions = layout.resolve::<&str>(None).unwrap();
        assert_eq!(positions.transaction_id, 3);
        assert_eq!(positions.account_number, None);
        assert_eq!(positions.amount, 2);
        assert_eq!(positions.occurred_at, 1);
    }

    #[test]
    fn test_resolve_by_header() {
        let layout = ColumnLayout::by_header();
        assert!(layout.requires_headers());
        let headers = ["Date", "Account Number", "Amount", "Transaction ID"];
        let positions = layout.resolve(Some(&headers[..])).unwrap();
        assert_eq!(positions.transaction_id, 3);
        assert_eq!(positions.account_number, Some(1));
        assert_eq!(positions.amount, 2);
        assert_eq!(positions.occurred_at, 0);
    }

    #[test]
    fn test_resolve_missing_header() {
        let layout = ColumnLayout::by_header();
        let headers = ["date", "amount", "transaction_id"];
        let err = layout.resolve(Some(&headers[..])).unwrap_err();
        assert!(err.to_string().contains("account_number"));
    }

    #[test]
    fn test_resolve_names_without_headers() {
        let layout = ColumnLayout::by_header();
        assert!(layout.resolve::<&str>(None).is_err());
    }

    #[test]
    fn test_duplicate_headers() {
        let layout = ColumnLayout::by_header();
        let headers = ["amount", "Amount", "date", "transaction_id", "account_number"];
        let err = layout.resolve(Some(&headers[..])).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_duplicate_unused_headers_are_ignored() {
        let layout = ColumnLayout::by_header();
        let headers = ["transaction_id", "account_number", "amount", "date", "note", "Note"];
        let positions = layout.resolve(Some(&headers[..])).unwrap();
        assert_eq!(positions.transaction_id, 0);
        assert_eq!(positions.occurred_at, 3);
    }

    #[test]
    fn test_layout_serde() {
        let json = r#"{"delimiter":";","transaction_id":"Transaction ID","account_number":0,"amount":2,"occurred_at":"date"}"#;
        let layout: ColumnLayout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.delimiter(), b';');
        assert_eq!(layout.account_number, Some(Column::Index(0)));
        assert_eq!(
            layout.transaction_id,
            Column::Name("Transaction ID".to_string())
        );
        let back = serde_json::to_string(&layout).unwrap();
        assert_eq!(json, back);
    }

    #[test]
    fn test_layout_serde_defaults() {
        let layout: ColumnLayout = serde_json::from_str("{}").unwrap();
        assert_eq!(layout, ColumnLayout::default());
    }

    #[test]
    fn test_bad_delimiter() {
        let json = r#"{"delimiter":";;"}"#;
        assert!(serde_json::from_str::<ColumnLayout>(json).is_err());
    }
}
