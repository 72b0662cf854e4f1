use crate::error::StoreError;
use crate::events::Timestamp;
use crate::store::Journal;
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

const JOURNAL_NAME: &str = "usage.jsonl";

/// Purpose of a model call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Chat,
    IncidentAnalysis,
}

/// Token consumption of one completed generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub timestamp: Timestamp,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: UsageKind,
}

impl UsageRecord {
    pub fn new(input_tokens: u64, output_tokens: u64, model: impl Into<String>, kind: UsageKind) -> Self {
        Self {
            timestamp: Utc::now(),
            input_tokens,
            output_tokens,
            model: model.into(),
            kind,
        }
    }
}

/// Per-million-token prices in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: 0.075,
            output_per_million: 0.30,
        }
    }
}

impl Pricing {
    /// Cost of a call in USD, rounded to six decimal places
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let raw = (input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }
}

/// Aggregate usage across every recorded call
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub total_requests: usize,
}

/// Append-only record of model usage
#[derive(Debug, Default)]
pub struct UsageLedger {
    records: RwLock<Vec<UsageRecord>>,
    journal: Option<Journal>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journaled ledger in `dir`
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let (journal, records) = Journal::open_with_records::<UsageRecord>(dir, JOURNAL_NAME)?;
        info!("Loaded {} usage records from {}", records.len(), journal.path().display());
        Ok(Self {
            records: RwLock::new(records),
            journal: Some(journal),
        })
    }

    pub fn record(&self, record: UsageRecord) -> Result<(), StoreError> {
        if let Some(journal) = &self.journal {
            journal.append(&record)?;
        }
        self.records.write().unwrap().push(record);
        Ok(())
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Totals over every record, priced at `pricing`
    pub fn totals(&self, pricing: &Pricing) -> UsageTotals {
        let records = self.records.read().unwrap();
        let total_input_tokens = records.iter().map(|r| r.input_tokens).sum();
        let total_output_tokens = records.iter().map(|r| r.output_tokens).sum();

        UsageTotals {
            total_input_tokens,
            total_output_tokens,
            total_cost: pricing.cost(total_input_tokens, total_output_tokens),
            total_requests: records.len(),
        }
    }
}
