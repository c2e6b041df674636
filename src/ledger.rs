use crate::error::Result;
use crate::model::Period;
use crate::schema::ReportFilters;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A ledger account as the filter predicates see it. Fixed columns cover
/// identity; everything else (root_type, account_type, custom fields) lives
/// in the open attribute map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub number: String,
    pub company: Option<String>,
    pub disabled: bool,
    pub is_group: bool,
    pub attributes: BTreeMap<String, Value>,
}

impl Account {
    pub fn new(id: &str, name: &str, number: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            number: number.to_string(),
            company: None,
            disabled: false,
            is_group: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, field: &str, value: Value) -> Self {
        self.attributes.insert(field.to_string(), value);
        self
    }

    /// Attribute lookup used by filter predicates. Fixed columns resolve
    /// first, then the attribute map.
    pub fn attribute(&self, field: &str) -> Option<Value> {
        match field {
            "name" => Some(Value::String(self.id.clone())),
            "account_name" => Some(Value::String(self.name.clone())),
            "account_number" => Some(Value::String(self.number.clone())),
            "company" => self.company.clone().map(Value::String),
            _ => self.attributes.get(field).cloned(),
        }
    }
}

/// One general-ledger posting as the in-memory store keeps it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub account: String,
    pub posting_date: NaiveDate,
    pub debit: f64,
    pub credit: f64,
    pub company: Option<String>,
    pub project: Option<String>,
    pub cost_center: Option<String>,
    pub finance_book: Option<String>,
    pub is_opening: bool,
    pub is_closing_entry: bool,
    pub is_cancelled: bool,
    pub dimensions: BTreeMap<String, String>,
}

impl Posting {
    pub fn new(account: &str, posting_date: NaiveDate, debit: f64, credit: f64) -> Self {
        Self {
            account: account.to_string(),
            posting_date,
            debit,
            credit,
            ..Default::default()
        }
    }

    pub fn movement(&self) -> f64 {
        self.debit - self.credit
    }
}

/// A stored balance checkpoint: per-account closing balances as of a date,
/// written by a period-closing process outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheckpoint {
    pub company: Option<String>,
    pub as_of: NaiveDate,
    pub balances: BTreeMap<String, f64>,
}

/// Checkpoint balances resolved for one report execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub as_of: NaiveDate,
    pub balances: BTreeMap<String, f64>,
}

/// The standard posting filter applied to every movement query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementFilter {
    pub company: Option<String>,
    pub projects: Vec<String>,
    pub cost_centers: Vec<String>,
    pub finance_book: Option<String>,
    pub include_default_book_entries: bool,
    pub dimensions: BTreeMap<String, Vec<String>>,
    pub ignore_closing_entries: bool,
}

impl MovementFilter {
    pub fn from_filters(filters: &ReportFilters) -> Self {
        Self {
            company: filters.company.clone(),
            projects: filters.project.clone(),
            cost_centers: filters.cost_center.clone(),
            finance_book: filters.finance_book.clone(),
            include_default_book_entries: filters.include_default_book_entries,
            dimensions: filters.dimensions.clone(),
            ignore_closing_entries: filters.ignore_closing_entries,
        }
    }
}

/// Read interface onto the general ledger. All methods are batched: the
/// engine issues at most one checkpoint query, one gap query and one wide
/// movement query per execution, whatever the account and period counts.
pub trait LedgerStore {
    /// Enabled leaf accounts, optionally scoped to one company, ordered by id.
    fn accounts(&self, company: Option<&str>) -> Result<Vec<Account>>;

    /// The most recent balance checkpoint strictly before `before`, with
    /// balances for the requested accounts. `None` when no checkpoint exists.
    fn closing_balances_before(
        &self,
        accounts: &[String],
        before: NaiveDate,
        filter: &MovementFilter,
    ) -> Result<Option<BalanceSnapshot>>;

    /// Net movement per account over postings strictly between `after` and
    /// `before` (both exclusive). Opening-entry postings count here: this
    /// query reconstructs balances, not period activity.
    fn movements_between(
        &self,
        accounts: &[String],
        after: NaiveDate,
        before: NaiveDate,
        filter: &MovementFilter,
    ) -> Result<BTreeMap<String, f64>>;

    /// Wide movement query: per account, one net movement per period, from
    /// postings dated within each period's `[from_date, to_date]`.
    /// Opening-entry postings are excluded. Accounts without qualifying
    /// postings may be omitted; callers zero-fill.
    fn movements_by_period(
        &self,
        accounts: &[String],
        periods: &[Period],
        filter: &MovementFilter,
    ) -> Result<BTreeMap<String, Vec<f64>>>;

    fn company_currency(&self, company: Option<&str>) -> Result<Option<String>>;
}

/// In-memory [`LedgerStore`] carrying the full standard-filter semantics.
/// Backs the test suite and demos; also usable as a fixture store by
/// downstream crates.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    accounts: Vec<Account>,
    postings: Vec<Posting>,
    checkpoints: Vec<BalanceCheckpoint>,
    currencies: BTreeMap<String, String>,
    default_finance_books: BTreeMap<String, String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&mut self, account: Account) {
        self.accounts.push(account);
    }

    pub fn add_posting(&mut self, posting: Posting) {
        self.postings.push(posting);
    }

    pub fn add_checkpoint(&mut self, checkpoint: BalanceCheckpoint) {
        self.checkpoints.push(checkpoint);
    }

    pub fn set_company_currency(&mut self, company: &str, currency: &str) {
        self.currencies
            .insert(company.to_string(), currency.to_string());
    }

    pub fn set_default_finance_book(&mut self, company: &str, book: &str) {
        self.default_finance_books
            .insert(company.to_string(), book.to_string());
    }

    fn posting_matches(&self, posting: &Posting, filter: &MovementFilter) -> bool {
        if posting.is_cancelled {
            return false;
        }
        if let Some(company) = &filter.company {
            if posting.company.as_deref() != Some(company.as_str()) {
                return false;
            }
        }
        if filter.ignore_closing_entries && posting.is_closing_entry {
            return false;
        }
        if !filter.projects.is_empty() {
            match &posting.project {
                Some(project) if filter.projects.contains(project) => {}
                _ => return false,
            }
        }
        if !filter.cost_centers.is_empty() {
            match &posting.cost_center {
                Some(cost_center) if filter.cost_centers.contains(cost_center) => {}
                _ => return false,
            }
        }

        // Unset book is always admitted; a set book must be the filtered one
        // or, when requested, the company default.
        let book = posting.finance_book.as_deref().unwrap_or("");
        if !book.is_empty() {
            let mut allowed = filter.finance_book.as_deref() == Some(book);
            if !allowed && filter.include_default_book_entries {
                if let Some(company) = &filter.company {
                    allowed = self.default_finance_books.get(company).map(String::as_str)
                        == Some(book);
                }
            }
            if !allowed {
                return false;
            }
        }

        for (dimension, accepted) in &filter.dimensions {
            if accepted.is_empty() {
                continue;
            }
            match posting.dimensions.get(dimension) {
                Some(value) if accepted.contains(value) => {}
                _ => return false,
            }
        }

        true
    }
}

impl LedgerStore for MemoryLedger {
    fn accounts(&self, company: Option<&str>) -> Result<Vec<Account>> {
        let mut result: Vec<Account> = self
            .accounts
            .iter()
            .filter(|account| !account.disabled && !account.is_group)
            .filter(|account| match company {
                Some(c) => account.company.as_deref() == Some(c),
                None => true,
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    fn closing_balances_before(
        &self,
        accounts: &[String],
        before: NaiveDate,
        filter: &MovementFilter,
    ) -> Result<Option<BalanceSnapshot>> {
        let latest = self
            .checkpoints
            .iter()
            .filter(|cp| cp.as_of < before)
            .filter(|cp| match (&filter.company, &cp.company) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => true,
                (None, _) => true,
            })
            .max_by_key(|cp| cp.as_of);

        Ok(latest.map(|cp| BalanceSnapshot {
            as_of: cp.as_of,
            balances: accounts
                .iter()
                .filter_map(|account| {
                    cp.balances
                        .get(account)
                        .map(|balance| (account.clone(), *balance))
                })
                .collect(),
        }))
    }

    fn movements_between(
        &self,
        accounts: &[String],
        after: NaiveDate,
        before: NaiveDate,
        filter: &MovementFilter,
    ) -> Result<BTreeMap<String, f64>> {
        let mut movements = BTreeMap::new();
        for posting in &self.postings {
            if !accounts.contains(&posting.account) {
                continue;
            }
            if posting.posting_date <= after || posting.posting_date >= before {
                continue;
            }
            if !self.posting_matches(posting, filter) {
                continue;
            }
            *movements.entry(posting.account.clone()).or_insert(0.0) += posting.movement();
        }
        Ok(movements)
    }

    fn movements_by_period(
        &self,
        accounts: &[String],
        periods: &[Period],
        filter: &MovementFilter,
    ) -> Result<BTreeMap<String, Vec<f64>>> {
        let mut movements: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let report_start = match periods.first() {
            Some(period) => period.from_date,
            None => return Ok(movements),
        };

        for posting in &self.postings {
            if posting.is_opening || posting.posting_date < report_start {
                continue;
            }
            if !accounts.contains(&posting.account) {
                continue;
            }
            if !self.posting_matches(posting, filter) {
                continue;
            }
            for (index, period) in periods.iter().enumerate() {
                if posting.posting_date >= period.from_date && posting.posting_date <= period.to_date
                {
                    movements
                        .entry(posting.account.clone())
                        .or_insert_with(|| vec![0.0; periods.len()])[index] += posting.movement();
                    break;
                }
            }
        }

        Ok(movements)
    }

    fn company_currency(&self, company: Option<&str>) -> Result<Option<String>> {
        Ok(company.and_then(|c| self.currencies.get(c).cloned()))
    }
}
