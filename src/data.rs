use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Days, NaiveDate};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::categorizing::rule_store::RuleStore;
use crate::categorizing::transaction::Transaction;
use crate::categorizing::StoreError;
use crate::config::ColumnConfig;
use crate::persist::write_atomic;

/// Exports often put a few lines of account summary above the real header.
const HEADER_SCAN_ROWS: usize = 20;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"];
const EXPENSE_MARKERS: [&str; 4] = ["expense", "debit", "out", "dr"];
const INCOME_MARKERS: [&str; 4] = ["income", "credit", "in", "cr"];

const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xls", "xlsb", "ods"];

const EXPORT_HEADER: [&str; 8] = ["Name", "Category", "Amount", "Date", "Person", "Source", "Merchant", "Type"];
// Spreadsheet programs need it to read the export as UTF-8.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{0}")]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook {0} has no sheets")]
    EmptyWorkbook(PathBuf),
    #[error("no header row with columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Positions of the logical columns in the header row.
#[derive(Debug, PartialEq)]
struct ColumnIndex {
    date: usize,
    description: usize,
    amount: usize,
    category: Option<usize>,
    kind: Option<usize>,
    direction: Option<usize>,
    detail: Option<usize>,
}

fn header_name(cell: &str) -> String {
    cell.trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn find_column(header: &[String], aliases: &[String]) -> Option<usize> {
    header
        .iter()
        .position(|name| aliases.iter().any(|alias| alias.to_lowercase() == *name))
}

impl ColumnIndex {
    /// Fails with the names of the required columns the row lacks.
    fn locate(row: &[String], columns: &ColumnConfig) -> Result<ColumnIndex, Vec<String>> {
        let header: Vec<String> = row.iter().map(|cell| header_name(cell)).collect();

        let date = find_column(&header, &columns.date);
        let description = find_column(&header, &columns.description);
        let amount = find_column(&header, &columns.amount);

        match (date, description, amount) {
            (Some(date), Some(description), Some(amount)) => Ok(ColumnIndex {
                date,
                description,
                amount,
                category: find_column(&header, &columns.category),
                kind: find_column(&header, &columns.kind),
                direction: find_column(&header, &columns.direction),
                detail: find_column(&header, &columns.detail),
            }),
            _ => {
                let missing = [("date", date), ("description", description), ("amount", amount)]
                    .into_iter()
                    .filter(|(_, index)| index.is_none())
                    .map(|(name, _)| name.to_string())
                    .collect();
                Err(missing)
            },
        }
    }
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or_default().trim()
}

fn optional_cell(row: &[String], index: Option<usize>) -> Option<String> {
    index
        .map(|index| cell(row, index))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parses the date part of a date or date-time cell.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.trim().split(|c: char| c.is_whitespace() || c == 'T').next()?;

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

/// Parses an amount cell, dropping currency symbols and thousands separators.
/// `direction` (an income/expense column) decides the sign when present.
pub fn parse_amount(value: &str, direction: Option<&str>) -> Option<Decimal> {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '¥' | '￥' | '$' | '€' | '£' | ','))
        .collect();

    let amount = match cleaned.strip_prefix('(').and_then(|inner| inner.strip_suffix(')')) {
        Some(inner) => -Decimal::from_str(inner).ok()?,
        None => Decimal::from_str(&cleaned).ok()?,
    };

    let Some(direction) = direction.map(|value| value.trim().to_lowercase()) else {
        return Some(amount);
    };

    if direction.contains("支出") || EXPENSE_MARKERS.contains(&direction.as_str()) {
        Some(-amount.abs())
    } else if direction.contains("收入") || INCOME_MARKERS.contains(&direction.as_str()) {
        Some(amount.abs())
    } else {
        Some(amount)
    }
}

fn parse_row(row: &[String], index: &ColumnIndex) -> Option<Transaction> {
    let date = parse_date(cell(row, index.date))?;
    let direction = index.direction.map(|column| cell(row, column));
    let amount = parse_amount(cell(row, index.amount), direction)?;

    let mut tx = Transaction::new(date, amount, cell(row, index.description));
    if let Some(detail) = optional_cell(row, index.detail) {
        tx = tx.with_detail(detail);
    }
    if let Some(kind) = optional_cell(row, index.kind) {
        tx = tx.with_kind(kind);
    }
    if let Some(category) = optional_cell(row, index.category) {
        tx = tx.with_category(category);
    }

    Some(tx)
}

/// Finds the header among the first rows and parses everything below it.
/// Rows whose date or amount cannot be read are skipped.
fn read_rows<I>(mut rows: I, columns: &ColumnConfig) -> Result<Vec<Transaction>, LoadError>
where
    I: Iterator<Item = Result<Vec<String>, LoadError>>,
{
    let mut missing: Option<Vec<String>> = None;
    let mut index = None;
    for row in rows.by_ref().take(HEADER_SCAN_ROWS) {
        let row = row?;
        match ColumnIndex::locate(&row, columns) {
            Ok(found) => {
                index = Some(found);
                break;
            },
            Err(lacking) => {
                if missing.as_ref().map_or(true, |best| lacking.len() < best.len()) {
                    missing = Some(lacking);
                }
            },
        }
    }

    let Some(index) = index else {
        let missing = missing.unwrap_or_else(|| vec!["date".to_string(), "description".to_string(), "amount".to_string()]);
        return Err(LoadError::MissingColumns(missing));
    };
    debug!("columns {:?}", index);

    let mut transactions = Vec::new();
    for (number, row) in rows.enumerate() {
        let row = row?;
        if row.iter().all(|value| value.trim().is_empty()) {
            continue;
        }

        match parse_row(&row, &index) {
            Some(tx) => transactions.push(tx),
            None => warn!("skipping unreadable row {} after the header: {:?}", number + 1, row),
        }
    }

    Ok(transactions)
}

/// Reads transactions from CSV. The header row may be preceded by up to a few
/// lines of preamble.
pub fn read_transactions<R: Read>(reader: R, columns: &ColumnConfig) -> Result<Vec<Transaction>, LoadError> {
    let csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let rows = csv_reader
        .into_records()
        .map(|record| -> Result<Vec<String>, LoadError> { Ok(record?.iter().map(str::to_string).collect()) });
    read_rows(rows, columns)
}

// Day zero of the 1900 date system, as Excel counts it.
fn excel_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.floor() as u64))
}

fn cell_text(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        Data::Float(number) => number.to_string(),
        Data::Int(number) => number.to_string(),
        Data::Bool(flag) => flag.to_string(),
        Data::DateTime(datetime) => excel_date(datetime.as_f64())
            .map(|date| date.to_string())
            .unwrap_or_default(),
        Data::Error(err) => format!("#{:?}", err),
    }
}

/// Reads transactions from the first sheet of a spreadsheet, with the same
/// header detection as [`read_transactions`].
pub fn read_workbook(path: &Path, columns: &ColumnConfig) -> Result<Vec<Transaction>, LoadError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::EmptyWorkbook(path.to_path_buf()))??;

    let rows = range
        .rows()
        .map(|row| -> Result<Vec<String>, LoadError> { Ok(row.iter().map(cell_text).collect()) });
    read_rows(rows, columns)
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map_or(false, |extension| {
            WORKBOOK_EXTENSIONS.contains(&extension.to_lowercase().as_str())
        })
}

/// Loads a statement, as a spreadsheet when the extension says so and as CSV
/// otherwise.
pub fn load_transactions(path: &Path, columns: &ColumnConfig) -> Result<Vec<Transaction>, LoadError> {
    let io_error = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let transactions = if is_workbook(path) {
        fs::metadata(path).map_err(io_error)?;
        read_workbook(path, columns)?
    } else {
        read_transactions(File::open(path).map_err(io_error)?, columns)?
    };

    info!("read {} transactions from {}", transactions.len(), path.display());
    Ok(transactions)
}

/// One row of the categorized export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Amount")]
    pub amount: Decimal,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Person")]
    pub person: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Merchant")]
    pub merchant: String,
    #[serde(rename = "Type")]
    pub kind: String,
}

impl From<&Transaction> for ExportRecord {
    fn from(tx: &Transaction) -> Self {
        ExportRecord {
            name: tx.display_name(),
            category: tx.category().unwrap_or_default().to_string(),
            amount: tx.amount(),
            date: tx.date(),
            person: tx.person().clone().unwrap_or_default(),
            source: String::new(),
            merchant: tx.description().clone(),
            kind: tx.kind().clone().unwrap_or_default(),
        }
    }
}

/// Export rows, newest first. Rows on the same day keep their input order.
pub fn export_records(transactions: &[Transaction], source: &str) -> Vec<ExportRecord> {
    let mut records: Vec<ExportRecord> = transactions
        .iter()
        .map(|tx| ExportRecord {
            source: source.to_string(),
            ..ExportRecord::from(tx)
        })
        .collect();
    records.sort_by(|a, b| b.date.cmp(&a.date));
    records
}

/// `<prefix>-<YYYY-MM>.csv`, named after the month of the newest row.
pub fn output_path(dir: &Path, prefix: &str, records: &[ExportRecord]) -> PathBuf {
    match records.iter().map(|record| record.date).max() {
        Some(newest) => dir.join(format!("{}-{}.csv", prefix, newest.format("%Y-%m"))),
        None => dir.join(format!("{}.csv", prefix)),
    }
}

/// Writes the export as UTF-8 CSV with a byte order mark.
pub fn write_records<W: Write>(mut writer: W, records: &[ExportRecord]) -> Result<(), csv::Error> {
    writer.write_all(UTF8_BOM)?;
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(EXPORT_HEADER)?;
    for record in records {
        csv_writer.serialize(record)?;
    }

    csv_writer.flush()?;

    Ok(())
}

/// Writes the export file and then persists the rule store. Both are replaced
/// atomically; if the export cannot be written the store is left as it was.
pub fn export_transactions(
    records: &[ExportRecord],
    dir: &Path,
    prefix: &str,
    store: &mut RuleStore,
) -> Result<PathBuf, ExportError> {
    let path = output_path(dir, prefix, records);

    write_atomic(&path, |writer| write_records(writer, records).map_err(io::Error::from)).map_err(|source| {
        ExportError::Write {
            path: path.clone(),
            source,
        }
    })?;
    info!("wrote {} rows to {}", records.len(), path.display());

    store.save()?;

    Ok(path)
}
