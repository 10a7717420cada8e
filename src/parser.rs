//! Turns the raw content of one input file into a lazy sequence of `TransactionRecord`s.
//!
//! A row that cannot be converted is rejected: it is counted, logged and skipped, and parsing
//! carries on with the next row.

use crate::error::Res;
use crate::model::{parse_timestamp, Amount, ColumnLayout, Positions, TransactionRecord};
use anyhow::Context;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use serde::Serialize;
use std::str::FromStr;
use tracing::{debug, warn};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Counts of rows seen so far by a `Records` iterator.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct ParseStats {
    pub(crate) parsed: u64,
    pub(crate) rejected: u64,
}

impl ParseStats {
    pub fn parsed(&self) -> u64 {
        self.parsed
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

enum State {
    /// The first row has not been seen yet.
    Start,
    Resolved(Positions),
    /// The header row did not satisfy the layout, so no row can be converted.
    Unresolvable,
}

/// A finite, single-pass iterator over the records of one file.
pub struct Records<'a> {
    rows: StringRecordsIntoIter<&'a [u8]>,
    layout: &'a ColumnLayout,
    fallback_account: Option<&'a str>,
    state: State,
    stats: ParseStats,
    header_line: Option<u64>,
}

/// Parses `content` according to `layout`.
///
/// `fallback_account` is used for rows that carry no account number of their own, typically because
/// the layout has no account column and the account is encoded in the file name.
pub fn parse<'a>(
    content: &'a [u8],
    layout: &'a ColumnLayout,
    fallback_account: Option<&'a str>,
) -> Records<'a> {
    let content = content.strip_prefix(BOM).unwrap_or(content);
    let rows = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(layout.delimiter())
        .from_reader(content)
        .into_records();
    Records {
        rows,
        layout,
        fallback_account,
        state: State::Start,
        stats: ParseStats::default(),
        header_line: None,
    }
}

impl Records<'_> {
    /// The counts for the rows consumed so far. Call this after the iterator is exhausted to get
    /// the totals for the file.
    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// The line of the row that was skipped as a header, if any. Such a row is counted neither as
    /// parsed nor as rejected.
    pub fn header_line(&self) -> Option<u64> {
        self.header_line
    }

    /// Decides how to read the file from its first row. Returns true if the row was a header row.
    fn start(&mut self, line: u64, row: &StringRecord) -> bool {
        if self.layout.requires_headers() {
            self.header_line = Some(line);
            let headers: Vec<&str> = row.iter().collect();
            self.state = match self.layout.resolve(Some(&headers[..])) {
                Ok(positions) => State::Resolved(positions),
                Err(e) => {
                    warn!("Unable to read the file with the configured layout: {e:#}");
                    State::Unresolvable
                }
            };
            return true;
        }

        let positions = match self.layout.resolve::<&str>(None) {
            Ok(positions) => positions,
            Err(e) => {
                warn!("Unable to read the file with the configured layout: {e:#}");
                self.state = State::Unresolvable;
                return false;
            }
        };
        self.state = State::Resolved(positions);
        let header = looks_like_header(row, &positions);
        if header {
            debug!("Skipping line {line} as a header row: {:?}", row);
            self.header_line = Some(line);
        }
        header
    }

    fn reject(&mut self, line: u64, e: anyhow::Error) {
        self.stats.rejected += 1;
        warn!("Rejected row at line {line}: {e:#}");
    }

    fn convert(&self, row: &StringRecord, positions: &Positions) -> Res<TransactionRecord> {
        let transaction_id = cell(row, positions.transaction_id, "transaction id")?;
        let account_number = positions
            .account_number
            .and_then(|ix| row.get(ix))
            .filter(|s| !s.is_empty())
            .or(self.fallback_account)
            .context("The row has no account number and none could be derived from the file")?;
        let amount_str = cell(row, positions.amount, "amount")?;
        let amount = Amount::from_str(amount_str)
            .with_context(|| format!("Invalid amount '{amount_str}'"))?;
        let occurred_at = parse_timestamp(cell(row, positions.occurred_at, "date")?)?;
        Ok(TransactionRecord::new(transaction_id, account_number, amount, occurred_at))
    }
}

impl Iterator for Records<'_> {
    type Item = TransactionRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or_default();
                    self.reject(line, e.into());
                    continue;
                }
            };
            let line = row.position().map(|p| p.line()).unwrap_or_default();

            if matches!(self.state, State::Start) && self.start(line, &row) {
                continue;
            }

            let positions = match &self.state {
                State::Resolved(positions) => *positions,
                _ => {
                    self.stats.rejected += 1;
                    continue;
                }
            };

            match self.convert(&row, &positions) {
                Ok(record) => {
                    self.stats.parsed += 1;
                    return Some(record);
                }
                Err(e) => self.reject(line, e),
            }
        }
    }
}

/// Returns the non-empty, trimmed value at `ix`.
fn cell<'r>(row: &'r StringRecord, ix: usize, name: &str) -> Res<&'r str> {
    row.get(ix)
        .filter(|s| !s.is_empty())
        .with_context(|| format!("The {name} is missing (column {ix})"))
}

/// A positional file may or may not start with a header row. The first row is a header if neither
/// its amount nor its date can be parsed.
fn looks_like_header(row: &StringRecord, positions: &Positions) -> bool {
    let amount_parses = row
        .get(positions.amount)
        .is_some_and(|s| Amount::from_str(s).is_ok());
    let date_parses = row
        .get(positions.occurred_at)
        .is_some_and(|s| parse_timestamp(s).is_ok());
    !amount_parses && !date_parses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;

    fn collect(
        content: &str,
        layout: &ColumnLayout,
        account: Option<&str>,
    ) -> (Vec<TransactionRecord>, ParseStats) {
        let mut records = parse(content.as_bytes(), layout, account);
        let out: Vec<TransactionRecord> = records.by_ref().collect();
        (out, records.stats())
    }

    fn counts(parsed: u64, rejected: u64) -> ParseStats {
        ParseStats { parsed, rejected }
    }

    const UPSTREAM: &str = "\
id,date,amount,transaction_id
1,2024-01-05 10:00:00,100.00,tx1
2,2024-01-20 12:30:00,-40.00,tx2
3,2024-02-01 08:15:00,60.00,tx3
";

    #[test]
    fn test_parse_upstream_export() {
        let (records, stats) = collect(UPSTREAM, &ColumnLayout::default(), Some("acctA"));
        assert_eq!(stats, counts(3, 0));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].transaction_id(), "tx1");
        assert_eq!(records[0].account_number(), "acctA");
        assert_eq!(records[1].amount().to_string(), "-40.00");
        assert_eq!(
            records[2].occurred_at(),
            parse_timestamp("2024-02-01 08:15:00").unwrap()
        );
    }

    #[test]
    fn test_positional_without_header_row() {
        let content = "1,2024-01-05 10:00:00,100.00,tx1\n2,2024-01-06 10:00:00,5,tx2\n";
        let (records, stats) = collect(content, &ColumnLayout::default(), Some("acctA"));
        assert_eq!(records.len(), 2);
        assert_eq!(stats.rejected(), 0);
    }

    #[test]
    fn test_malformed_first_data_row_is_rejected_not_skipped() {
        // The date parses, so this is a data row with a bad amount rather than a header.
        let content = "1,2024-01-05 10:00:00,abc,tx1\n2,2024-01-06 10:00:00,5,tx2\n";
        let (records, stats) = collect(content, &ColumnLayout::default(), Some("acctA"));
        assert_eq!(records.len(), 1);
        assert_eq!(stats, counts(1, 1));
    }

    #[test]
    fn test_unreadable_first_row_is_taken_as_header() {
        // Neither the date nor the amount parses, which is indistinguishable from a header row.
        let content = "1,garbage,abc,tx1\n2,2024-01-06 10:00:00,5,tx2\n";
        let layout = ColumnLayout::default();
        let mut records = parse(content.as_bytes(), &layout, Some("a"));
        assert_eq!(records.by_ref().count(), 1);
        assert_eq!(records.stats(), counts(1, 0));
        assert_eq!(records.header_line(), Some(1));

        let mut records = parse(UPSTREAM.as_bytes(), &layout, Some("a"));
        records.by_ref().for_each(drop);
        assert_eq!(records.header_line(), Some(1));

        let headerless = "1,2024-01-05 10:00:00,100.00,tx1\n";
        let mut records = parse(headerless.as_bytes(), &layout, Some("a"));
        records.by_ref().for_each(drop);
        assert_eq!(records.header_line(), None);
    }

    #[test]
    fn test_duplicate_header_on_unused_column() {
        let content = "\
transaction_id,account_number,amount,date,note,note
tx1,a,1,2024-01-05,x,y
";
        let (records, stats) = collect(content, &ColumnLayout::by_header(), None);
        assert_eq!(stats, counts(1, 0));
        assert_eq!(records[0].transaction_id(), "tx1");
    }

    #[test]
    fn test_non_numeric_amount_does_not_abort() {
        let content = "\
transaction_id,account_number,amount,date
tx1,acctA,100,2024-01-05
tx2,acctA,forty,2024-01-20
tx3,acctA,60,2024-02-01
";
        let (records, stats) = collect(content, &ColumnLayout::by_header(), None);
        let ids: Vec<&str> = records.iter().map(|r| r.transaction_id()).collect();
        assert_eq!(ids, vec!["tx1", "tx3"]);
        assert_eq!(stats, counts(2, 1));
    }

    #[test]
    fn test_rejects_bad_rows() {
        let content = "\
transaction_id,account_number,amount,date
tx1,acctA,100,not-a-date
,acctA,100,2024-01-05
tx3,,100,2024-01-05
tx4,acctA,1.005,2024-01-05
tx5,acctA
tx6,acctB,-7.5,2024-03-09 11:00:00
";
        let (records, stats) = collect(content, &ColumnLayout::by_header(), None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transaction_id(), "tx6");
        assert_eq!(records[0].amount().to_string(), "-7.50");
        assert_eq!(stats.rejected(), 5);
    }

    #[test]
    fn test_account_column_falls_back_to_file_account() {
        let content = "\
transaction_id,account_number,amount,date
tx1,,100,2024-01-05
tx2,acctB,100,2024-01-05
";
        let (records, _) = collect(content, &ColumnLayout::by_header(), Some("acctA"));
        assert_eq!(records[0].account_number(), "acctA");
        assert_eq!(records[1].account_number(), "acctB");
    }

    #[test]
    fn test_missing_header_rejects_every_row() {
        let content = "transaction_id,amount,date\ntx1,100,2024-01-05\ntx2,5,2024-01-05\n";
        let (records, stats) = collect(content, &ColumnLayout::by_header(), None);
        assert!(records.is_empty());
        assert_eq!(stats, counts(0, 2));
    }

    #[test]
    fn test_empty_file() {
        let (records, stats) = collect("", &ColumnLayout::default(), Some("acctA"));
        assert!(records.is_empty());
        assert_eq!(stats, ParseStats::default());

        let header_only = "id,date,amount,transaction_id\n";
        let (records, stats) = collect(header_only, &ColumnLayout::default(), Some("a"));
        assert!(records.is_empty());
        assert_eq!(stats, ParseStats::default());
    }

    #[test]
    fn test_custom_delimiter_and_bom() {
        let layout = ColumnLayout::new(
            Column::Name("ID".into()),
            Some(Column::Index(1)),
            Column::Name("Amount".into()),
            Column::Name("Date".into()),
        )
        .with_delimiter(b';');
        let content = "\u{feff}ID;Account #;Amount;Date\ntx1;9;\"$1,000.00\";2024-01-05\n";
        let (records, stats) = collect(content, &layout, None);
        assert_eq!(stats.parsed(), 1);
        assert_eq!(records[0].account_number(), "9");
        assert_eq!(records[0].amount().to_string(), "1000.00");
    }

    #[test]
    fn test_is_lazy() {
        let layout = ColumnLayout::default();
        let mut records = parse(UPSTREAM.as_bytes(), &layout, Some("a")).peekable();
        assert!(records.peek().is_some());
        let first = records.next().unwrap();
        assert_eq!(first.transaction_id(), "tx1");
        assert_eq!(records.count(), 2);
    }
}
