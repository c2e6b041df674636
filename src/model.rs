use crate::error::{ReportError, Result};
use crate::schema::{BalanceType, ReportFilters, ReportTemplate, TemplateRow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// One reporting bucket. The list of periods is fixed once per execution and
/// `key` is the join key everywhere else (period value maps, column
/// fieldnames, chart labels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub key: String,
    pub label: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

impl Period {
    pub fn new(key: &str, label: &str, from_date: NaiveDate, to_date: NaiveDate) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            from_date,
            to_date,
        }
    }
}

/// Opening/closing/movement triple for one account in one period.
/// While untransformed, `closing == opening + movement`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodValue {
    pub opening: f64,
    pub closing: f64,
    pub movement: f64,
}

impl PeriodValue {
    pub fn new(opening: f64, closing: f64, movement: f64) -> Self {
        Self {
            opening,
            closing,
            movement,
        }
    }

    pub fn value_for(&self, balance_type: BalanceType) -> f64 {
        match balance_type {
            BalanceType::Opening => self.opening,
            BalanceType::Closing => self.closing,
            BalanceType::Movement => self.movement,
        }
    }

    /// Folds the opening into the movement, so movement reads "since report
    /// start" instead of "within this period".
    pub fn accumulate(&mut self) {
        self.movement += self.opening;
    }

    /// Subtracts the opening from the closing, the inverse reinterpretation.
    pub fn unaccumulate(&mut self) {
        self.closing -= self.opening;
    }

    pub fn reverse(&mut self) {
        self.opening = -self.opening;
        self.closing = -self.closing;
        self.movement = -self.movement;
    }
}

/// Per-account balance grid built by the balance collector. Read-only after
/// collection; callers needing a sign-reversed view take a copy via
/// [`AccountBalance::reversed`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    pub account_name: String,
    pub account_number: String,
    pub period_values: BTreeMap<String, PeriodValue>,
}

impl AccountBalance {
    pub fn new(account_id: &str, account_name: &str, account_number: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            account_name: account_name.to_string(),
            account_number: account_number.to_string(),
            period_values: BTreeMap::new(),
        }
    }

    pub fn set_period(&mut self, period_key: &str, value: PeriodValue) {
        self.period_values.insert(period_key.to_string(), value);
    }

    /// One value per period in the caller's period order, 0.0 where a period
    /// is missing. Callers must pass the execution's period list; the map's
    /// own key order is alphabetical and means nothing chronologically.
    pub fn ordered_values(&self, periods: &[Period], balance_type: BalanceType) -> Vec<f64> {
        periods
            .iter()
            .map(|period| {
                self.period_values
                    .get(&period.key)
                    .map(|pv| pv.value_for(balance_type))
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Copy with every period value negated. The original is untouched.
    pub fn reversed(&self) -> AccountBalance {
        let mut copy = self.clone();
        for value in copy.period_values.values_mut() {
            value.reverse();
        }
        copy
    }

    pub fn accumulate_values(&mut self) {
        for value in self.period_values.values_mut() {
            value.accumulate();
        }
    }

    pub fn unaccumulate_values(&mut self) {
        for value in self.period_values.values_mut() {
            value.unaccumulate();
        }
    }
}

/// Identity of the underlying account on a synthesized detail row.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailAccount {
    pub id: String,
    pub name: String,
    pub number: String,
}

/// A template row with its computed per-period values. Structural rows keep
/// an empty value vector. Detail rows are synthesized during layout, not
/// part of the template.
#[derive(Debug, Clone)]
pub struct ProcessedRow {
    pub row: TemplateRow,
    pub template_index: usize,
    pub values: Vec<f64>,
    pub account_details: BTreeMap<String, AccountBalance>,
    pub is_detail_row: bool,
    pub parent_reference: Option<String>,
    pub detail_account: Option<DetailAccount>,
}

impl ProcessedRow {
    pub fn new(row: TemplateRow, template_index: usize, values: Vec<f64>) -> Self {
        Self {
            row,
            template_index,
            values,
            account_details: BTreeMap::new(),
            is_detail_row: false,
            parent_reference: None,
            detail_account: None,
        }
    }
}

/// One side-by-side column group within a section.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub index: usize,
    pub label: Option<String>,
    pub rows: Vec<ProcessedRow>,
}

impl Segment {
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            label: None,
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Section {
    pub index: usize,
    pub label: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub fieldname: String,
    pub label: String,
    pub fieldtype: String,
    pub options: Option<String>,
    pub width: u32,
    pub align: Option<String>,
    pub hidden: bool,
}

/// Flat display row keyed by column fieldname, plus the `_segment_info`
/// metadata entry.
pub type ReportRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<ChartSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportChart {
    pub data: ChartData,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOutput {
    pub columns: Vec<Column>,
    pub rows: Vec<ReportRow>,
    pub chart: Option<ReportChart>,
}

/// Cooperative cancellation flag, carried by [`ReportContext`] and consulted
/// before each batched ledger query, the only blocking points in the
/// pipeline.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-execution state bag. Created when an execution starts, dropped when
/// it returns; never shared across executions.
pub struct ReportContext<'a> {
    pub filters: &'a ReportFilters,
    pub template: ReportTemplate,
    pub periods: Vec<Period>,
    pub currency: Option<String>,
    pub processed_rows: Vec<ProcessedRow>,
    pub account_data: BTreeMap<String, AccountBalance>,
    pub summary: BTreeMap<String, Vec<f64>>,
    pub account_details: BTreeMap<String, BTreeMap<String, AccountBalance>>,
    pub cancel: Option<&'a CancelToken>,
}

impl<'a> ReportContext<'a> {
    pub fn new(filters: &'a ReportFilters, template: ReportTemplate, periods: Vec<Period>) -> Self {
        Self {
            filters,
            template,
            periods,
            currency: None,
            processed_rows: Vec::new(),
            account_data: BTreeMap::new(),
            summary: BTreeMap::new(),
            account_details: BTreeMap::new(),
            cancel: None,
        }
    }

    pub fn period_keys(&self) -> Vec<String> {
        self.periods.iter().map(|p| p.key.clone()).collect()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if let Some(token) = self.cancel {
            if token.is_cancelled() {
                return Err(ReportError::Cancelled);
            }
        }
        Ok(())
    }
}
