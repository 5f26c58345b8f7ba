//! Seeded synthetic transaction table.
//!
//! RULE: Output depends only on (rows, seed). Same inputs, byte-identical CSV.
//! All randomness flows through one Pcg64Mcg stream seeded from the caller's
//! seed; nothing calls a platform RNG.
//!
//! Rows go through the same CSV reader and normalization as real files,
//! including the raw "amount (INR)" header.

use crate::{
    dataset::Dataset,
    error::{InsightError, InsightResult},
    types::TIMESTAMP_FORMAT,
};
use chrono::{Duration, NaiveDate};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

const HEADERS: [&str; 14] = [
    "transaction id",
    "timestamp",
    "transaction type",
    "merchant_category",
    "amount (INR)",
    "transaction_status",
    "sender_age_group",
    "receiver_age_group",
    "sender_state",
    "sender_bank",
    "receiver_bank",
    "device_type",
    "network_type",
    "fraud_flag",
];

const TRANSACTION_TYPES: [(&str, f64); 4] =
    [("P2P", 0.45), ("P2M", 0.35), ("Bill Payment", 0.12), ("Recharge", 0.08)];
const MERCHANT_CATEGORIES: [&str; 10] = [
    "Food", "Grocery", "Fuel", "Entertainment", "Shopping",
    "Healthcare", "Education", "Transport", "Utilities", "Other",
];
const AGE_GROUPS: [(&str, f64); 5] =
    [("18-25", 0.25), ("26-35", 0.35), ("36-45", 0.20), ("46-55", 0.12), ("56+", 0.08)];
const STATES: [&str; 10] = [
    "Maharashtra", "Karnataka", "Tamil Nadu", "Delhi", "Uttar Pradesh",
    "Gujarat", "Rajasthan", "West Bengal", "Telangana", "Andhra Pradesh",
];
const BANKS: [(&str, f64); 8] = [
    ("SBI", 0.25), ("HDFC", 0.18), ("ICICI", 0.15), ("Axis", 0.12),
    ("PNB", 0.10), ("Kotak", 0.08), ("IndusInd", 0.07), ("Yes Bank", 0.05),
];
const DEVICES: [(&str, f64); 3] = [("Android", 0.75), ("iOS", 0.20), ("Web", 0.05)];
const NETWORKS: [(&str, f64); 3] = [("4G", 0.55), ("5G", 0.25), ("WiFi", 0.20)];

/// Base failure probability; Web and 4G add to it.
const BASE_FAILURE: f64 = 0.04;
const FLAG_PROBABILITY: f64 = 0.002;
/// Window the timestamps are spread across.
const SPAN_DAYS: i64 = 365;

/// The generator's single random stream.
struct SynthRng {
    inner: Pcg64Mcg,
}

impl SynthRng {
    fn new(seed: u64) -> Self {
        Self { inner: Pcg64Mcg::seed_from_u64(seed) }
    }

    /// Roll a float in [0.0, 1.0).
    fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n). `n` must be non-zero.
    fn below(&mut self, n: u64) -> u64 {
        self.inner.next_u64() % n
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[self.below(items.len() as u64) as usize]
    }

    /// Weighted choice; weights need not sum to one.
    fn weighted<'a>(&mut self, items: &[(&'a str, f64)]) -> &'a str {
        let total: f64 = items.iter().map(|(_, w)| w).sum();
        let mut roll = self.next_f64() * total;
        for (item, weight) in items {
            if roll < *weight {
                return item;
            }
            roll -= weight;
        }
        items[items.len() - 1].0
    }

    /// Simplified Pareto draw: heavy right tail above `x_min`.
    fn pareto(&mut self, x_min: f64, alpha: f64) -> f64 {
        let u = self.next_f64().max(1e-10);
        x_min * u.powf(-1.0 / alpha)
    }
}

/// Generate `rows` transactions as CSV text.
pub fn generate_csv(rows: usize, seed: u64) -> InsightResult<String> {
    let mut rng = SynthRng::new(seed);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADERS).map_err(write_error)?;

    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| InsightError::DataLoad("invalid synthetic start date".to_string()))?;

    for i in 0..rows {
        let offset = Duration::seconds(rng.below((SPAN_DAYS * 86_400) as u64) as i64);
        let timestamp = (start + offset).format(TIMESTAMP_FORMAT).to_string();

        let txn_type = rng.weighted(&TRANSACTION_TYPES);
        let merchant = if txn_type == "P2M" { rng.pick(&MERCHANT_CATEGORIES) } else { "" };
        let receiver_age = if txn_type == "P2P" { rng.weighted(&AGE_GROUPS) } else { "" };

        let amount = match txn_type {
            "Recharge" => rng.pareto(50.0, 2.0).min(5_000.0),
            "Bill Payment" => rng.pareto(200.0, 1.8).min(50_000.0),
            _ => rng.pareto(100.0, 1.3).min(100_000.0),
        };

        let device = rng.weighted(&DEVICES);
        let network = rng.weighted(&NETWORKS);
        let mut failure_p = BASE_FAILURE;
        if device == "Web" {
            failure_p += 0.02;
        }
        if network == "4G" {
            failure_p += 0.01;
        }
        let status = if rng.chance(failure_p) {
            "FAILED"
        } else if rng.chance(0.01) {
            "PENDING"
        } else {
            "SUCCESS"
        };
        // High-value transfers are flagged more often.
        let flag_p = if amount > 20_000.0 { FLAG_PROBABILITY * 5.0 } else { FLAG_PROBABILITY };
        let flagged = rng.chance(flag_p);

        let id = format!("TXN{:010}", i + 1);
        let amount = format!("{amount:.2}");
        let record = [
            id.as_str(),
            timestamp.as_str(),
            txn_type,
            merchant,
            amount.as_str(),
            status,
            rng.weighted(&AGE_GROUPS),
            receiver_age,
            rng.pick(&STATES),
            rng.weighted(&BANKS),
            rng.weighted(&BANKS),
            device,
            network,
            if flagged { "1" } else { "0" },
        ];
        writer.write_record(record).map_err(write_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| InsightError::DataLoad(format!("synthetic CSV flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| InsightError::DataLoad(format!("synthetic CSV is not UTF-8: {e}")))
}

/// Generate and load a synthetic dataset.
pub fn synthetic_dataset(rows: usize, seed: u64) -> InsightResult<Dataset> {
    let text = generate_csv(rows, seed)?;
    log::info!("Generated {rows} synthetic transactions (seed {seed})");
    Dataset::from_csv_str(&text)
}

fn write_error(e: csv::Error) -> InsightError {
    InsightError::DataLoad(format!("synthetic CSV write failed: {e}"))
}
