//! Statement file adapter - CSV and Excel exports into typed rows

use std::io::Cursor;

use calamine::{Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::domain::result::{Error, Result};
use crate::domain::{AmexRow, Institution, StatementRow, WealthsimpleRow};

const AMEX_REQUIRED: &[&str] = &["Date", "Description", "Amount"];
const WEALTHSIMPLE_REQUIRED: &[&str] = &["date", "transaction", "description", "amount", "balance"];

/// Supported statement file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Excel,
}

impl FileFormat {
    /// Detect the format from the file name's extension (case-insensitive)
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(FileFormat::Csv),
            "xls" | "xlsx" => Ok(FileFormat::Excel),
            _ => Err(Error::validation(format!(
                "Unsupported file type for '{}': only .csv, .xls and .xlsx are accepted",
                file_name
            ))),
        }
    }
}

/// Rows parsed from one statement file
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub rows: Vec<StatementRow>,
}

impl ParsedStatement {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Header row plus string cells, before institution mapping
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require(&self, institution: Institution, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|col| self.column(col).is_none())
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "Missing required {} columns: {}",
                institution,
                missing.join(", ")
            )))
        }
    }
}

/// Parse a statement export into typed rows for `institution`
pub fn parse_statement(
    file_name: &str,
    bytes: &[u8],
    institution: Institution,
) -> Result<ParsedStatement> {
    let format = FileFormat::from_file_name(file_name)?;
    let mut table = match format {
        FileFormat::Csv => read_csv(bytes)?,
        FileFormat::Excel => read_excel(bytes)?,
    };

    let rows = match institution {
        Institution::Amex => {
            for h in table.headers.iter_mut() {
                *h = h.trim().to_string();
            }
            table.require(institution, AMEX_REQUIRED)?;
            parse_amex(&table)?
        }
        Institution::Wealthsimple => {
            for h in table.headers.iter_mut() {
                *h = h.trim().to_lowercase();
            }
            table.require(institution, WEALTHSIMPLE_REQUIRED)?;
            parse_wealthsimple(&table)?
        }
    };

    tracing::debug!(file = %file_name, %institution, rows = rows.len(), "parsed statement");
    Ok(ParsedStatement { rows })
}

fn read_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .byte_headers()
        .map_err(|e| Error::validation(format!("Unreadable CSV header: {}", e)))?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.byte_records() {
        let record = result.map_err(|e| Error::validation(format!("Malformed CSV: {}", e)))?;
        rows.push(
            record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).to_string())
                .collect(),
        );
    }
    Ok(Table { headers, rows })
}

fn read_excel(bytes: &[u8]) -> Result<Table> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| Error::validation(format!("Unreadable spreadsheet: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::validation("Spreadsheet has no worksheets"))?
        .map_err(|e| Error::validation(format!("Unreadable worksheet: {}", e)))?;

    let mut rows = range.rows().map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>());
    let headers = rows.next().unwrap_or_default();
    Ok(Table {
        headers,
        rows: rows.collect(),
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

/// Excel serial day number to a date (epoch 1899-12-30, absorbing the 1900 leap-year bug)
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial.trunc() as i64))
}

fn parse_amex(table: &Table) -> Result<Vec<StatementRow>> {
    let col = |name: &str| table.column(name);
    let (date, date_processed, description, cardmember) = (
        col("Date"),
        col("Date Processed"),
        col("Description"),
        col("Cardmember"),
    );
    let (amount, foreign, commission, rate) = (
        col("Amount"),
        col("Foreign Spend Amount"),
        col("Commission"),
        col("Exchange Rate"),
    );
    let (merchant, address, info) = (
        col("Merchant"),
        col("Merchant Address"),
        col("Additional Information"),
    );

    let mut rows = Vec::new();
    for (i, cells) in data_rows(table) {
        let line = i + 2;
        rows.push(StatementRow::Amex(AmexRow {
            date: parse_date(cell(cells, date), line)?,
            date_processed: parse_date(cell(cells, date_processed), line)?,
            description: cell(cells, description).trim().to_string(),
            cardmember: cell(cells, cardmember).trim().to_string(),
            amount: parse_amount(cell(cells, amount), line)?.unwrap_or(Decimal::ZERO),
            foreign_spend_amount: parse_amount(cell(cells, foreign), line)?,
            commission: parse_amount(cell(cells, commission), line)?,
            exchange_rate: parse_amount(cell(cells, rate), line)?,
            merchant: optional_text(cell(cells, merchant)),
            merchant_address: optional_text(cell(cells, address)),
            additional_information: optional_text(cell(cells, info)),
        }));
    }
    Ok(rows)
}

fn parse_wealthsimple(table: &Table) -> Result<Vec<StatementRow>> {
    let col = |name: &str| table.column(name);
    let (date, transaction, description, amount, balance) = (
        col("date"),
        col("transaction"),
        col("description"),
        col("amount"),
        col("balance"),
    );

    let mut rows = Vec::new();
    for (i, cells) in data_rows(table) {
        let line = i + 2;
        rows.push(StatementRow::Wealthsimple(WealthsimpleRow {
            date: parse_date(cell(cells, date), line)?,
            transaction: cell(cells, transaction).trim().to_string(),
            description: cell(cells, description).trim().to_string(),
            amount: parse_amount(cell(cells, amount), line)?.unwrap_or(Decimal::ZERO),
            balance: parse_amount(cell(cells, balance), line)?,
        }));
    }
    Ok(rows)
}

/// Data rows with their 0-based index, skipping fully blank lines
fn data_rows(table: &Table) -> impl Iterator<Item = (usize, &Vec<String>)> {
    table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
}

fn cell(cells: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| cells.get(i)).map(String::as_str).unwrap_or("")
}

fn optional_text(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_date(s: &str, line: usize) -> Result<Option<NaiveDate>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }

    // Abbreviated months sometimes carry a trailing period ("12 Jan. 2024")
    let cleaned = s.replace('.', "");
    let date_formats = [
        "%Y-%m-%d", "%d %b %Y", "%b %d, %Y", "%d %B %Y", "%B %d, %Y", "%m/%d/%Y", "%Y/%m/%d",
        "%d-%b-%Y",
    ];
    for fmt in &date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return Ok(Some(date));
        }
    }
    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Some(dt.date()));
        }
    }
    // Date columns read as plain numbers from a spreadsheet
    if let Ok(serial) = s.parse::<f64>() {
        if (1.0..2_958_466.0).contains(&serial) {
            return Ok(excel_serial_to_date(serial));
        }
    }

    Err(Error::validation(format!("Row {}: unrecognized date '{}'", line, s)))
}

/// Parse an amount cell. Blank is None; anything unparseable is a validation error.
fn parse_amount(s: &str, line: usize) -> Result<Option<Decimal>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }

    // (100.00) -> -100.00
    let (negate, inner) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };

    let cleaned: String = inner
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E' | '+'))
        .collect();

    let amount = cleaned
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|_| Error::validation(format!("Row {}: invalid amount '{}'", line, s)))?;

    Ok(Some(if negate && amount > Decimal::ZERO {
        -amount
    } else {
        amount
    }))
}
