//! The in-memory transaction table.
//!
//! RULE: A Dataset is immutable once built.
//! Queries and analyses work on row-index views, never on the rows themselves.
//!
//! Loading does one-time normalization:
//!   1. Column names: trim, lowercase, spaces -> underscores, parentheses removed
//!   2. timestamp parsed (unparsable -> null)
//!   3. hour_of_day / day_of_week / is_weekend derived from timestamp
//!   4. amount_inr coerced to decimal (unparsable -> null)
//!   5. fraud_flag / is_weekend coerced to boolean, missing -> false

use crate::{
    error::{InsightError, InsightResult},
    types::{Cell, ColumnKind, GroupKey, Row},
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

// ── Schema constants ─────────────────────────────────────────────────────────

pub const TIMESTAMP: &str = "timestamp";
pub const AMOUNT: &str = "amount_inr";
pub const TRANSACTION_ID: &str = "transaction_id";
pub const STATUS: &str = "transaction_status";
pub const FRAUD_FLAG: &str = "fraud_flag";
pub const HOUR_OF_DAY: &str = "hour_of_day";
pub const DAY_OF_WEEK: &str = "day_of_week";
pub const IS_WEEKEND: &str = "is_weekend";

/// Columns every source table must carry after normalization.
pub const REQUIRED_COLUMNS: [&str; 2] = [TIMESTAMP, AMOUNT];

const DERIVED_COLUMNS: [&str; 3] = [HOUR_OF_DAY, DAY_OF_WEEK, IS_WEEKEND];

const NULL_TOKENS: [&str; 7] = ["", "na", "n/a", "nan", "null", "none", "nat"];

const TIMESTAMP_LAYOUTS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M",
];

/// Documented meaning of each domain column. Handed to the intent producer
/// so the model knows which columns and values exist.
pub const COLUMN_INFO: [(&str, &str); 17] = [
    ("transaction_id", "Unique identifier for each transaction"),
    ("timestamp", "Date and time of transaction"),
    ("transaction_type", "P2P, P2M, Bill Payment, Recharge"),
    ("amount_inr", "Transaction amount in Indian Rupees"),
    ("transaction_status", "SUCCESS, FAILED, PENDING"),
    ("merchant_category", "Category for P2M transactions: Food, Grocery, Fuel, Entertainment, Shopping, Healthcare, Education, Transport, Utilities, Other; null for P2P transactions"),
    ("sender_age_group", "Age group of sender: 18-25, 26-35, 36-45, 46-55, 56+"),
    ("receiver_age_group", "Age group of receiver; only applicable for P2P transactions, null otherwise"),
    ("sender_state", "Indian state of the sender"),
    ("sender_bank", "Sender's bank: SBI, HDFC, ICICI, Axis, PNB, Kotak, IndusInd, Yes Bank"),
    ("receiver_bank", "Receiver's bank: SBI, HDFC, ICICI, Axis, PNB, Kotak, IndusInd, Yes Bank"),
    ("device_type", "Device used: Android, iOS, Web"),
    ("network_type", "4G, 5G, WiFi"),
    ("hour_of_day", "Hour of transaction (0-23), derived from timestamp"),
    ("day_of_week", "Day of transaction (Monday-Sunday), derived from timestamp"),
    ("is_weekend", "true on Saturday and Sunday, derived from timestamp"),
    ("fraud_flag", "true = flagged for review; this is NOT a confirmed fraud determination"),
];

// ── Schema ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.kind)
    }

    /// Resolve a column reference or fail with a plan validation error.
    pub fn resolve(&self, name: &str) -> InsightResult<(usize, ColumnKind)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (i, f.kind))
            .ok_or_else(|| InsightError::PlanValidation(format!("unknown column '{name}'")))
    }

    /// The column used to count rows: transaction_id when present,
    /// otherwise the first column.
    pub fn identifier_column(&self) -> String {
        if self.contains(TRANSACTION_ID) {
            TRANSACTION_ID.to_string()
        } else {
            self.fields
                .first()
                .map(|f| f.name.clone())
                .unwrap_or_else(|| TRANSACTION_ID.to_string())
        }
    }
}

/// Normalize a raw header: trim, lowercase, spaces to underscores,
/// parentheses removed. `"Amount (INR)"` becomes `"amount_inr"`.
pub fn normalize_column_name(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(' ', "_")
        .replace(['(', ')'], "")
}

// ── Dataset ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Schema,
    rows:   Vec<Row>,
}

impl Dataset {
    /// Build from already-typed rows. Every row must match the schema width.
    pub fn new(schema: Schema, rows: Vec<Row>) -> InsightResult<Self> {
        let width = schema.fields().len();
        if let Some(pos) = rows.iter().position(|r| r.len() != width) {
            return Err(InsightError::DataLoad(format!(
                "row {pos} has {} cells, schema has {width} columns",
                rows[pos].len()
            )));
        }
        Ok(Self { schema, rows })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> InsightResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| InsightError::DataLoad(format!("cannot read {}: {e}", path.display())))?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_str(text: &str) -> InsightResult<Self> {
        Self::from_csv_reader(text.as_bytes())
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> InsightResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| InsightError::DataLoad(format!("unreadable header row: {e}")))?
            .iter()
            .map(normalize_column_name)
            .collect();

        for (i, name) in headers.iter().enumerate() {
            if headers[..i].contains(name) {
                return Err(InsightError::DataLoad(format!(
                    "duplicate column '{name}' after normalization"
                )));
            }
        }

        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record
                .map_err(|e| InsightError::DataLoad(format!("malformed record {}: {e}", line + 1)))?;
            raw_rows.push(record.iter().map(str::to_string).collect());
        }

        if raw_rows.is_empty() {
            return Err(InsightError::DataLoad("source contains no rows".to_string()));
        }

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !headers.iter().any(|h| h == *c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(InsightError::Schema { missing });
        }

        let dataset = normalize(&headers, &raw_rows)?;
        log::debug!(
            "Normalized {} rows into {} columns",
            dataset.len(),
            dataset.schema.fields().len()
        );
        Ok(dataset)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &Row {
        &self.rows[index]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A view over every row, in original order.
    pub fn all_indices(&self) -> Vec<usize> {
        (0..self.rows.len()).collect()
    }

    /// Distinct values of a column in first-seen order.
    pub fn unique_values(&self, column: &str) -> InsightResult<Vec<Cell>> {
        let (idx, _) = self.schema.resolve(column)?;
        let mut seen: BTreeSet<GroupKey> = BTreeSet::new();
        let mut values: Vec<Cell> = Vec::new();
        for row in &self.rows {
            let cell = &row[idx];
            if seen.insert(GroupKey(vec![cell.clone()])) {
                values.push(cell.clone());
            }
        }
        Ok(values)
    }

    /// The first `n` rows.
    pub fn sample(&self, n: usize) -> &[Row] {
        &self.rows[..n.min(self.rows.len())]
    }
}

// ── Normalization ────────────────────────────────────────────────────────────

fn normalize(headers: &[String], raw_rows: &[Vec<String>]) -> InsightResult<Dataset> {
    let mut fields: Vec<Field> = Vec::new();
    let mut columns: Vec<Vec<Cell>> = Vec::new();
    let mut timestamps: Vec<Option<NaiveDateTime>> = Vec::new();
    let mut has_fraud_flag = false;

    for (col, name) in headers.iter().enumerate() {
        // Derived fields are always recomputed from the timestamp.
        if DERIVED_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        let raw: Vec<&str> = raw_rows
            .iter()
            .map(|r| r.get(col).map(String::as_str).unwrap_or(""))
            .collect();

        let (kind, cells) = match name.as_str() {
            TIMESTAMP => {
                timestamps = raw.iter().map(|v| parse_timestamp(v)).collect();
                let unparsed = timestamps.iter().filter(|t| t.is_none()).count();
                if unparsed == timestamps.len() {
                    return Err(InsightError::DataLoad(
                        "no row has a parseable timestamp".to_string(),
                    ));
                }
                if unparsed > 0 {
                    log::warn!("{unparsed} timestamp value(s) could not be parsed and are null");
                }
                let cells = timestamps
                    .iter()
                    .map(|t| t.map(Cell::Timestamp).unwrap_or(Cell::Null))
                    .collect();
                (ColumnKind::Timestamp, cells)
            }
            AMOUNT => {
                let cells: Vec<Cell> = raw
                    .iter()
                    .map(|v| v.parse::<f64>().ok().filter(|f| f.is_finite()).map(Cell::Float).unwrap_or(Cell::Null))
                    .collect();
                let coerced = raw
                    .iter()
                    .zip(cells.iter())
                    .filter(|(v, c)| c.is_null() && !is_null_token(v))
                    .count();
                if coerced > 0 {
                    log::warn!("{coerced} {AMOUNT} value(s) are not numeric and were set to null");
                }
                (ColumnKind::Float, cells)
            }
            FRAUD_FLAG => {
                has_fraud_flag = true;
                (ColumnKind::Bool, raw.iter().map(|v| Cell::Bool(parse_bool(v))).collect())
            }
            _ => {
                let kind = infer_kind(&raw);
                (kind, raw.iter().map(|v| parse_cell(v, kind)).collect())
            }
        };

        fields.push(Field { name: name.clone(), kind });
        columns.push(cells);
    }

    fields.push(Field { name: HOUR_OF_DAY.to_string(), kind: ColumnKind::Int });
    columns.push(
        timestamps
            .iter()
            .map(|t| t.map(|t| Cell::Int(i64::from(t.hour()))).unwrap_or(Cell::Null))
            .collect(),
    );
    fields.push(Field { name: DAY_OF_WEEK.to_string(), kind: ColumnKind::Text });
    columns.push(
        timestamps
            .iter()
            .map(|t| t.map(|t| Cell::Text(weekday_name(t.weekday()).to_string())).unwrap_or(Cell::Null))
            .collect(),
    );
    fields.push(Field { name: IS_WEEKEND.to_string(), kind: ColumnKind::Bool });
    columns.push(
        timestamps
            .iter()
            .map(|t| Cell::Bool(t.map(|t| is_weekend(t.weekday())).unwrap_or(false)))
            .collect(),
    );
    if !has_fraud_flag {
        fields.push(Field { name: FRAUD_FLAG.to_string(), kind: ColumnKind::Bool });
        columns.push(vec![Cell::Bool(false); raw_rows.len()]);
    }

    let mut rows: Vec<Row> = vec![Vec::with_capacity(columns.len()); raw_rows.len()];
    for column in columns {
        for (row, cell) in rows.iter_mut().zip(column) {
            row.push(cell);
        }
    }
    Dataset::new(Schema::new(fields), rows)
}

fn is_null_token(raw: &str) -> bool {
    let lower = raw.trim().to_lowercase();
    NULL_TOKENS.contains(&lower.as_str())
}

fn infer_kind(raw: &[&str]) -> ColumnKind {
    let mut values = raw.iter().filter(|v| !is_null_token(v)).peekable();
    if values.peek().is_none() {
        return ColumnKind::Text;
    }
    let values: Vec<&&str> = values.collect();
    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        ColumnKind::Int
    } else if values.iter().all(|v| v.parse::<f64>().map(f64::is_finite).unwrap_or(false)) {
        ColumnKind::Float
    } else {
        ColumnKind::Text
    }
}

fn parse_cell(raw: &str, kind: ColumnKind) -> Cell {
    if is_null_token(raw) {
        return Cell::Null;
    }
    match kind {
        ColumnKind::Int       => raw.parse().map(Cell::Int).unwrap_or(Cell::Null),
        ColumnKind::Float     => raw.parse().map(Cell::Float).unwrap_or(Cell::Null),
        ColumnKind::Bool      => Cell::Bool(parse_bool(raw)),
        ColumnKind::Timestamp => parse_timestamp(raw).map(Cell::Timestamp).unwrap_or(Cell::Null),
        ColumnKind::Text      => Cell::Text(raw.to_string()),
    }
}

/// Lenient boolean coercion. Missing or unrecognized values are false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "1" | "1.0"
    )
}

/// Parse a timestamp in any of the accepted layouts.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(ts) = TIMESTAMP_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
    {
        return Some(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}
