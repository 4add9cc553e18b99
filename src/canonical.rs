// 🧭 Canonicalizer - Raw fields → unified schema
// Maps source columns onto the ledger schema and normalizes timestamp, amount, currency

use crate::error::CanonicalizationError;
use crate::extract::RawRecord;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Output format for every canonical timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Accepted input formats, tried in order (first match wins)
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

pub const DEFAULT_CURRENCY: &str = "USD";

// ============================================================================
// FIELD MAPPING
// ============================================================================

/// FieldMapping - `{schema_field: source_column}` for one source format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub timestamp: String,
    pub description: String,
    pub amount: String,

    /// Absent mapping (or absent column) → default currency
    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub account_number: Option<String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        FieldMapping {
            timestamp: "Date".to_string(),
            description: "Description".to_string(),
            amount: "Amount".to_string(),
            currency: Some("Currency".to_string()),
            account_number: Some("Account Number".to_string()),
        }
    }
}

// ============================================================================
// CANONICAL FIELDS
// ============================================================================

/// The hashed part of a transaction: everything except status and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFields {
    pub timestamp: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub source: String,
    pub account_number: Option<String>,
}

impl CanonicalFields {
    /// Field map keyed by schema name, sorted (input to the identity hash)
    pub fn to_field_map(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("timestamp".to_string(), Value::from(self.timestamp.clone()));
        fields.insert("description".to_string(), Value::from(self.description.clone()));
        fields.insert("amount".to_string(), Value::from(self.amount));
        fields.insert("currency".to_string(), Value::from(self.currency.clone()));
        fields.insert("source".to_string(), Value::from(self.source.clone()));
        fields.insert(
            "account_number".to_string(),
            self.account_number.clone().map(Value::from).unwrap_or(Value::Null),
        );
        fields
    }
}

// ============================================================================
// CANONICALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    date_formats: Vec<String>,
    default_currency: String,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Canonicalizer {
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect(),
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_formats(date_formats: Vec<String>, default_currency: impl Into<String>) -> Self {
        Canonicalizer {
            date_formats,
            default_currency: default_currency.into(),
        }
    }

    /// Map one raw record onto the unified schema
    ///
    /// Fails on a missing required column, an unrecognized date or a
    /// non-numeric amount. The caller skips the row; nothing else is affected.
    pub fn canonicalize(
        &self,
        raw: &RawRecord,
        mapping: &FieldMapping,
        source: &str,
    ) -> Result<CanonicalFields, CanonicalizationError> {
        let timestamp = self.parse_timestamp(required(raw, "timestamp", &mapping.timestamp)?)?;
        let description = required(raw, "description", &mapping.description)?.trim().to_string();
        let amount = parse_amount(required(raw, "amount", &mapping.amount)?)?;

        let currency = optional(raw, mapping.currency.as_deref())
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());

        let account_number = optional(raw, mapping.account_number.as_deref()).map(str::to_string);

        Ok(CanonicalFields {
            timestamp,
            description,
            amount,
            currency,
            source: source.to_string(),
            account_number,
        })
    }

    /// Try each accepted format in order; dates without a time get midnight
    pub fn parse_timestamp(&self, value: &str) -> Result<String, CanonicalizationError> {
        let value = value.trim();

        for format in &self.date_formats {
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
                return Ok(dt.format(TIMESTAMP_FORMAT).to_string());
            }
            if let Ok(date) = NaiveDate::parse_from_str(value, format) {
                if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                    return Ok(dt.format(TIMESTAMP_FORMAT).to_string());
                }
            }
        }

        Err(CanonicalizationError::InvalidTimestamp(value.to_string()))
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a statement amount: "1,234.50", "-$45.99", "(12.00)"
pub fn parse_amount(value: &str) -> Result<f64, CanonicalizationError> {
    let invalid = || CanonicalizationError::InvalidAmount(value.to_string());

    let mut text = value.trim();
    let mut negative = false;
    let mut signed = false;

    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        negative = true;
        signed = true;
        text = inner.trim();
    }

    // At most one sign, either side of the currency symbol: "-$5", "$-5"
    let mut take_sign = |text: &mut &str| -> Result<(), CanonicalizationError> {
        let (rest, minus) = match text.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => match text.strip_prefix('+') {
                Some(rest) => (rest, false),
                None => return Ok(()),
            },
        };
        if signed {
            return Err(invalid());
        }
        signed = true;
        negative = minus;
        *text = rest.trim_start();
        Ok(())
    };

    take_sign(&mut text)?;
    if let Some(rest) = text.strip_prefix(['$', '€', '£']) {
        text = rest.trim_start();
    }
    take_sign(&mut text)?;

    let cleaned: String = text.chars().filter(|c| *c != ',').collect();

    // f64::from_str also takes "inf" / "NaN" and signs; demand digits only
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid());
    }

    let amount: f64 = cleaned.parse().map_err(|_| invalid())?;
    if !amount.is_finite() {
        return Err(invalid());
    }

    Ok(if negative { -amount } else { amount })
}

fn required<'a>(
    raw: &'a RawRecord,
    field: &'static str,
    column: &str,
) -> Result<&'a str, CanonicalizationError> {
    raw.get(column).ok_or_else(|| CanonicalizationError::MissingField {
        field,
        column: column.to_string(),
    })
}

/// Unmapped column, missing column and blank value all count as absent
fn optional<'a>(raw: &'a RawRecord, column: Option<&str>) -> Option<&'a str> {
    column
        .and_then(|c| raw.get(c))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ============================================================================
// TESTS
// ============================================================================
