//! Statement rows - one typed variant per supported institution

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::fingerprint::{row_fingerprint, FileFingerprint};
use super::result::{Error, Result};

/// Financial institution a statement file comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Institution {
    Amex,
    Wealthsimple,
}

impl Institution {
    pub const ALL: [Institution; 2] = [Institution::Amex, Institution::Wealthsimple];

    pub fn as_str(&self) -> &'static str {
        match self {
            Institution::Amex => "amex",
            Institution::Wealthsimple => "wealthsimple",
        }
    }

    /// Append-only raw table owned by this institution
    pub fn raw_table(&self) -> &'static str {
        match self {
            Institution::Amex => "raw_amex_transactions",
            Institution::Wealthsimple => "raw_wealthsimple_transactions",
        }
    }
}

impl fmt::Display for Institution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Institution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "amex" => Ok(Institution::Amex),
            "wealthsimple" => Ok(Institution::Wealthsimple),
            other => Err(Error::validation(format!(
                "Unsupported institution: '{}' (expected 'amex' or 'wealthsimple')",
                other
            ))),
        }
    }
}

/// One American Express statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmexRow {
    pub date: Option<NaiveDate>,
    pub date_processed: Option<NaiveDate>,
    pub description: String,
    pub cardmember: String,
    pub amount: Decimal,
    pub foreign_spend_amount: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
    pub merchant: Option<String>,
    pub merchant_address: Option<String>,
    pub additional_information: Option<String>,
}

/// One Wealthsimple statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WealthsimpleRow {
    pub date: Option<NaiveDate>,
    pub transaction: String,
    pub description: String,
    pub amount: Decimal,
    pub balance: Option<Decimal>,
}

/// A parsed statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "institution", rename_all = "lowercase")]
pub enum StatementRow {
    Amex(AmexRow),
    Wealthsimple(WealthsimpleRow),
}

impl StatementRow {
    pub fn institution(&self) -> Institution {
        match self {
            StatementRow::Amex(_) => Institution::Amex,
            StatementRow::Wealthsimple(_) => Institution::Wealthsimple,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            StatementRow::Amex(row) => &row.description,
            StatementRow::Wealthsimple(row) => &row.description,
        }
    }

    /// Normalized field set, keyed by warehouse column name
    pub fn fields(&self) -> BTreeMap<&'static str, JsonValue> {
        let mut fields = BTreeMap::new();
        match self {
            StatementRow::Amex(row) => {
                fields.insert("date", opt_date(row.date));
                fields.insert("date_processed", opt_date(row.date_processed));
                fields.insert("description", json!(row.description));
                fields.insert("cardmember", json!(row.cardmember));
                fields.insert("amount", json!(row.amount.normalize().to_string()));
                fields.insert("foreign_spend_amount", opt_decimal(row.foreign_spend_amount));
                fields.insert("commission", opt_decimal(row.commission));
                fields.insert("exchange_rate", opt_decimal(row.exchange_rate));
                fields.insert("merchant", json!(row.merchant));
                fields.insert("merchant_address", json!(row.merchant_address));
                fields.insert("additional_information", json!(row.additional_information));
            }
            StatementRow::Wealthsimple(row) => {
                fields.insert("date", opt_date(row.date));
                fields.insert("transaction", json!(row.transaction));
                fields.insert("description", json!(row.description));
                fields.insert("amount", json!(row.amount.normalize().to_string()));
                fields.insert("balance", opt_decimal(row.balance));
            }
        }
        fields
    }

    pub fn fingerprint(&self) -> String {
        row_fingerprint(&self.fields())
    }

    /// Round every decimal to the scale of its warehouse column
    ///
    /// The row then fingerprints exactly what the warehouse stores.
    pub fn at_column_scale(self) -> Self {
        match self {
            StatementRow::Amex(row) => StatementRow::Amex(AmexRow {
                amount: to_scale(row.amount, MONEY_SCALE),
                foreign_spend_amount: row.foreign_spend_amount.map(|d| to_scale(d, MONEY_SCALE)),
                commission: row.commission.map(|d| to_scale(d, MONEY_SCALE)),
                exchange_rate: row.exchange_rate.map(|d| to_scale(d, RATE_SCALE)),
                ..row
            }),
            StatementRow::Wealthsimple(row) => StatementRow::Wealthsimple(WealthsimpleRow {
                amount: to_scale(row.amount, MONEY_SCALE),
                balance: row.balance.map(|d| to_scale(d, MONEY_SCALE)),
                ..row
            }),
        }
    }
}

/// Scale of the DECIMAL(18, 2) money columns in the raw tables
const MONEY_SCALE: u32 = 2;
/// Scale of the DECIMAL(18, 6) exchange_rate column
const RATE_SCALE: u32 = 6;

fn to_scale(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

fn opt_date(date: Option<NaiveDate>) -> JsonValue {
    date.map(|d| json!(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(JsonValue::Null)
}

// normalize() so "4.50" and "4.5" fingerprint the same
fn opt_decimal(value: Option<Decimal>) -> JsonValue {
    value
        .map(|d| json!(d.normalize().to_string()))
        .unwrap_or(JsonValue::Null)
}

/// A parsed row tagged with its provenance, ready to append
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub row: StatementRow,
    pub file_name: String,
    pub file_fingerprint: FileFingerprint,
    pub row_fingerprint: String,
    pub ingested_at: DateTime<Utc>,
    pub processed: bool,
}

impl RawRecord {
    pub fn new(
        row: StatementRow,
        file_name: impl Into<String>,
        file_fingerprint: FileFingerprint,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        let row = row.at_column_scale();
        let row_fingerprint = row.fingerprint();
        Self {
            row,
            file_name: file_name.into(),
            file_fingerprint,
            row_fingerprint,
            ingested_at,
            processed: false,
        }
    }

    pub fn institution(&self) -> Institution {
        self.row.institution()
    }
}
