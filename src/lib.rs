//! # Financial Report Engine
//!
//! A library for executing declarative financial report templates against a
//! general ledger, producing period-columned report rows, layout metadata and
//! an optional chart.
//!
//! ## Core Concepts
//!
//! - **Report Template**: An ordered list of rows declaring WHAT to compute
//!   (account balances, formulas, external values) and HOW to present it
//!   (sections, side-by-side segments, formatting)
//! - **Periods**: The reporting buckets (months, quarters, years) the caller
//!   supplies; every computed row carries one value per period
//! - **Balance Collection**: Batched ledger reads that rebase running
//!   balances on stored checkpoints instead of replaying full posting history
//! - **Reference Codes**: Symbolic row names (e.g. `INC001`) that formulas on
//!   other rows combine arithmetically, resolved in dependency order
//! - **Views**: The standard absolute report, or a growth view showing
//!   period-over-period percentage change
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_report_engine::*;
//! use chrono::NaiveDate;
//! use std::collections::BTreeMap;
//!
//! let mut ledger = MemoryLedger::new();
//! ledger.add_account(
//!     Account::new("4100 - Sales", "Sales", "4100")
//!         .with_attribute("root_type", serde_json::json!("Income")),
//! );
//! ledger.add_posting(Posting::new(
//!     "4100 - Sales",
//!     NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
//!     0.0,
//!     1200.0,
//! ));
//!
//! let mut income = TemplateRow::new(
//!     "Income",
//!     RowSource::AccountData {
//!         account_filter: serde_json::json!(["root_type", "=", "Income"]),
//!         balance_type: BalanceType::Movement,
//!     },
//! );
//! income.reference_code = Some("INC001".to_string());
//! income.reverse_sign = true;
//!
//! let mut template = ReportTemplate::new("Profit and Loss");
//! template.rows.push(income);
//!
//! let mut templates = BTreeMap::new();
//! templates.insert(template.name.clone(), template);
//!
//! let periods = vec![Period::new(
//!     "jan_2024",
//!     "Jan 2024",
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
//! )];
//!
//! let filters = ReportFilters::new(
//!     "Profit and Loss",
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
//! );
//!
//! let output = run_report(&ledger, &templates, &periods, &filters).unwrap();
//! ```

pub mod account_filter;
pub mod collector;
pub mod engine;
pub mod error;
pub mod formula;
pub mod layout;
pub mod ledger;
pub mod model;
pub mod processor;
pub mod resolver;
pub mod schema;
pub mod utils;
pub mod views;

pub use account_filter::select_accounts;
pub use collector::{BalanceCollector, CollectedData};
pub use engine::{PeriodSource, ReportEngine, TemplateSource};
pub use error::{ReportError, Result};
pub use formula::CompiledFormula;
pub use layout::build_layout;
pub use ledger::{
    Account, BalanceCheckpoint, BalanceSnapshot, LedgerStore, MemoryLedger, MovementFilter,
    Posting,
};
pub use model::*;
pub use processor::{CustomApiHook, RowProcessor};
pub use schema::*;
pub use utils::{round_currency, round_to};
pub use views::{apply_growth_view, build_chart};

/// Executes one report: resolves the template, collects balances, computes
/// every row and lays the result out for display.
pub fn run_report(
    ledger: &dyn LedgerStore,
    templates: &dyn TemplateSource,
    periods: &dyn PeriodSource,
    filters: &ReportFilters,
) -> Result<ReportOutput> {
    ReportEngine::new(ledger, templates, periods).execute(filters)
}
