use crate::account_filter::select_accounts;
use crate::error::Result;
use crate::ledger::{Account, LedgerStore, MovementFilter};
use crate::model::{AccountBalance, Period, PeriodValue, ReportContext};
use crate::schema::{BalanceType, ReportFilters, RowSource, TemplateRow};
use chrono::NaiveDate;
use log::{debug, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One ledger-backed row's share of the collected data: the summed value
/// vector and the per-account breakdown behind it. When `reverse_sign` was
/// set on the row, the breakdown holds the reversed copies, so detail rows
/// always agree with the summary they sit under.
#[derive(Debug, Clone, Default)]
pub struct RowAccountData {
    pub values: Vec<f64>,
    pub breakdown: BTreeMap<String, AccountBalance>,
}

/// Everything the balance collector hands to the row processor.
#[derive(Debug, Clone, Default)]
pub struct CollectedData {
    /// Per-row data, keyed by template row index.
    pub rows: BTreeMap<usize, RowAccountData>,
    /// Running balances for every requested account, before sign reversal.
    pub balances: BTreeMap<String, AccountBalance>,
}

struct AccountRequest {
    template_index: usize,
    account_filter: Value,
    balance_type: BalanceType,
    reverse_sign: bool,
    display_name: String,
}

/// Fetches and rebases ledger balances for the template's account rows.
///
/// The collector issues at most three batched store calls per execution
/// (checkpoint, gap movement, per-period movement) and then derives running
/// per-period balances locally, so every requested account ends up with one
/// `PeriodValue` per period even when the ledger has no activity for it.
/// Account metadata maps live on the instance and die with it; nothing is
/// cached process-wide.
pub struct BalanceCollector<'a> {
    ledger: &'a dyn LedgerStore,
    filters: &'a ReportFilters,
    periods: &'a [Period],
    movement_filter: MovementFilter,
    requests: Vec<AccountRequest>,
}

impl<'a> BalanceCollector<'a> {
    pub fn new(
        ledger: &'a dyn LedgerStore,
        filters: &'a ReportFilters,
        periods: &'a [Period],
    ) -> Self {
        Self {
            ledger,
            filters,
            periods,
            movement_filter: MovementFilter::from_filters(filters),
            requests: Vec::new(),
        }
    }

    /// Registers every ledger-backed row of the template.
    pub fn add_template_rows(&mut self, rows: &[TemplateRow]) {
        for (index, row) in rows.iter().enumerate() {
            if let RowSource::AccountData {
                account_filter,
                balance_type,
            } = &row.source
            {
                self.requests.push(AccountRequest {
                    template_index: index,
                    account_filter: account_filter.clone(),
                    balance_type: *balance_type,
                    reverse_sign: row.reverse_sign,
                    display_name: row.display_name.clone(),
                });
            }
        }
    }

    /// Runs the batched fetches and derives the per-row data. The context
    /// supplies the cancellation token, consulted before each store call.
    pub fn collect(&self, ctx: &ReportContext<'_>) -> Result<CollectedData> {
        let mut collected = CollectedData::default();
        if self.requests.is_empty() || self.periods.is_empty() {
            return Ok(collected);
        }

        ctx.check_cancelled()?;
        let universe = self.ledger.accounts(self.filters.company.as_deref())?;

        let mut selections: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut requested: BTreeSet<String> = BTreeSet::new();
        for request in &self.requests {
            let matched = match select_accounts(&request.account_filter, &universe) {
                Ok(accounts) => accounts,
                Err(error) => {
                    warn!(
                        "Account filter on row '{}' is invalid ({}); the row will report zeros",
                        request.display_name, error
                    );
                    Vec::new()
                }
            };
            let ids: Vec<String> = matched.iter().map(|account| account.id.clone()).collect();
            requested.extend(ids.iter().cloned());
            selections.insert(request.template_index, ids);
        }

        if requested.is_empty() {
            for request in &self.requests {
                collected.rows.insert(
                    request.template_index,
                    RowAccountData {
                        values: vec![0.0; self.periods.len()],
                        breakdown: BTreeMap::new(),
                    },
                );
            }
            return Ok(collected);
        }

        let account_ids: Vec<String> = requested.iter().cloned().collect();
        let first_start = self.periods[0].from_date;

        ctx.check_cancelled()?;
        let snapshot =
            self.ledger
                .closing_balances_before(&account_ids, first_start, &self.movement_filter)?;

        // A checkpoint whose balances sum to exactly zero is treated as
        // absent; everything is then rebuilt from posting history.
        let (anchor_date, mut opening) = match snapshot {
            Some(snapshot) if snapshot.balances.values().sum::<f64>() != 0.0 => {
                debug!(
                    "Opening anchor: checkpoint dated {} covering {} account(s)",
                    snapshot.as_of,
                    snapshot.balances.len()
                );
                (snapshot.as_of, snapshot.balances)
            }
            _ => {
                debug!(
                    "No usable balance checkpoint before {}; starting from a zero anchor",
                    first_start
                );
                (zero_anchor_date(), BTreeMap::new())
            }
        };

        // Postings dated after the anchor but before the report window move
        // the anchor balances forward. Opening-entry postings count here.
        if (first_start - anchor_date).num_days() > 1 {
            ctx.check_cancelled()?;
            let gap = self.ledger.movements_between(
                &account_ids,
                anchor_date,
                first_start,
                &self.movement_filter,
            )?;
            for (account, movement) in gap {
                *opening.entry(account).or_insert(0.0) += movement;
            }
        }

        ctx.check_cancelled()?;
        let movements =
            self.ledger
                .movements_by_period(&account_ids, self.periods, &self.movement_filter)?;

        // Running balance for every requested account, movement or not, so
        // anchored-but-inactive accounts keep carrying their balance.
        let by_id: BTreeMap<&str, &Account> =
            universe.iter().map(|account| (account.id.as_str(), account)).collect();
        let zero_movements = vec![0.0; self.periods.len()];
        for account_id in &account_ids {
            let (name, number) = by_id
                .get(account_id.as_str())
                .map(|account| (account.name.as_str(), account.number.as_str()))
                .unwrap_or((account_id.as_str(), ""));
            let account_movements = movements.get(account_id).unwrap_or(&zero_movements);

            let mut balance = AccountBalance::new(account_id, name, number);
            let mut running = opening.get(account_id).copied().unwrap_or(0.0);
            for (i, period) in self.periods.iter().enumerate() {
                let movement = account_movements.get(i).copied().unwrap_or(0.0);
                let closing = running + movement;
                balance.set_period(&period.key, PeriodValue::new(running, closing, movement));
                running = closing;
            }

            match self.filters.accumulated_values {
                Some(true) => balance.accumulate_values(),
                Some(false) => balance.unaccumulate_values(),
                None => {}
            }
            collected.balances.insert(account_id.clone(), balance);
        }

        for request in &self.requests {
            let mut values = vec![0.0; self.periods.len()];
            let mut breakdown = BTreeMap::new();
            if let Some(ids) = selections.get(&request.template_index) {
                for account_id in ids {
                    if let Some(balance) = collected.balances.get(account_id) {
                        let entry = if request.reverse_sign {
                            balance.reversed()
                        } else {
                            balance.clone()
                        };
                        for (i, value) in entry
                            .ordered_values(self.periods, request.balance_type)
                            .iter()
                            .enumerate()
                        {
                            values[i] += value;
                        }
                        breakdown.insert(account_id.clone(), entry);
                    }
                }
            }
            debug!(
                "Row '{}' aggregates {} account(s)",
                request.display_name,
                breakdown.len()
            );
            collected
                .rows
                .insert(request.template_index, RowAccountData { values, breakdown });
        }

        Ok(collected)
    }
}

fn zero_anchor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;
    use crate::ledger::{BalanceCheckpoint, MemoryLedger, Posting};
    use crate::model::CancelToken;
    use crate::schema::ReportTemplate;
    use serde_json::json;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn quarter_periods() -> Vec<Period> {
        vec![
            Period::new("q1_2024", "Q1 2024", date(2024, 1, 1), date(2024, 3, 31)),
            Period::new("q2_2024", "Q2 2024", date(2024, 4, 1), date(2024, 6, 30)),
        ]
    }

    fn account_row(filter: Value, balance_type: BalanceType, reverse_sign: bool) -> TemplateRow {
        let mut row = TemplateRow::new(
            "Test Row",
            RowSource::AccountData {
                account_filter: filter,
                balance_type,
            },
        );
        row.reverse_sign = reverse_sign;
        row
    }

    fn collect_rows(
        ledger: &MemoryLedger,
        filters: &ReportFilters,
        periods: &[Period],
        rows: &[TemplateRow],
    ) -> CollectedData {
        let ctx = ReportContext::new(filters, ReportTemplate::new("Test"), periods.to_vec());
        let mut collector = BalanceCollector::new(ledger, filters, &ctx.periods);
        collector.add_template_rows(rows);
        collector.collect(&ctx).unwrap()
    }

    #[test]
    fn test_running_balances_keep_the_period_invariant() {
        let mut ledger = MemoryLedger::new();
        ledger.add_account(Account::new("acc.cash", "Cash", "1100"));
        ledger.add_account(Account::new("acc.inventory", "Inventory", "1200"));
        ledger.add_checkpoint(BalanceCheckpoint {
            company: None,
            as_of: date(2023, 12, 15),
            balances: BTreeMap::from([
                ("acc.cash".to_string(), 500.0),
                ("acc.inventory".to_string(), 200.0),
            ]),
        });
        // Inside the anchor gap, carried into the opening balance.
        ledger.add_posting(Posting::new("acc.cash", date(2023, 12, 20), 100.0, 0.0));
        // Report-window activity on cash only; inventory stays untouched.
        ledger.add_posting(Posting::new("acc.cash", date(2024, 2, 10), 50.0, 0.0));

        let filters = ReportFilters::default();
        let periods = quarter_periods();
        let rows = vec![account_row(
            json!(["name", "in", ["acc.cash", "acc.inventory"]]),
            BalanceType::Closing,
            false,
        )];
        let collected = collect_rows(&ledger, &filters, &periods, &rows);

        for balance in collected.balances.values() {
            for value in balance.period_values.values() {
                assert!(
                    (value.closing - (value.opening + value.movement)).abs() < 1e-9,
                    "closing must equal opening plus movement for {}",
                    balance.account_id
                );
            }
        }

        let cash = &collected.balances["acc.cash"];
        assert_eq!(cash.period_values["q1_2024"].opening, 600.0);
        assert_eq!(cash.period_values["q1_2024"].closing, 650.0);
        assert_eq!(cash.period_values["q2_2024"].opening, 650.0);
        assert_eq!(cash.period_values["q2_2024"].closing, 650.0);

        // The anchored-but-inactive account still carries its balance.
        let inventory = &collected.balances["acc.inventory"];
        assert_eq!(inventory.period_values["q1_2024"].opening, 200.0);
        assert_eq!(inventory.period_values["q2_2024"].closing, 200.0);

        let row = &collected.rows[&0];
        assert_eq!(row.values, vec![850.0, 850.0]);
        assert_eq!(row.breakdown.len(), 2);
    }

    #[test]
    fn test_zero_sum_checkpoint_falls_back_to_posting_history() {
        let mut ledger = MemoryLedger::new();
        ledger.add_account(Account::new("acc.cash", "Cash", "1100"));
        ledger.add_checkpoint(BalanceCheckpoint {
            company: None,
            as_of: date(2023, 12, 31),
            balances: BTreeMap::from([("acc.cash".to_string(), 0.0)]),
        });
        // With the checkpoint unusable, the opening balance is rebuilt from
        // the full posting history, opening entries included.
        let mut opening = Posting::new("acc.cash", date(2010, 6, 1), 300.0, 0.0);
        opening.is_opening = true;
        ledger.add_posting(opening);
        ledger.add_posting(Posting::new("acc.cash", date(2023, 11, 5), 200.0, 0.0));
        // An opening entry dated inside the window counts nowhere.
        let mut stray = Posting::new("acc.cash", date(2024, 2, 1), 999.0, 0.0);
        stray.is_opening = true;
        ledger.add_posting(stray);

        let filters = ReportFilters::default();
        let periods = quarter_periods();
        let rows = vec![account_row(
            json!(["name", "=", "acc.cash"]),
            BalanceType::Closing,
            false,
        )];
        let collected = collect_rows(&ledger, &filters, &periods, &rows);

        let cash = &collected.balances["acc.cash"];
        assert_eq!(cash.period_values["q1_2024"].opening, 500.0);
        assert_eq!(cash.period_values["q1_2024"].movement, 0.0);
        assert_eq!(cash.period_values["q2_2024"].closing, 500.0);
    }

    #[test]
    fn test_adjacent_checkpoint_skips_the_gap_query() {
        let mut ledger = MemoryLedger::new();
        ledger.add_account(Account::new("acc.cash", "Cash", "1100"));
        ledger.add_checkpoint(BalanceCheckpoint {
            company: None,
            as_of: date(2023, 12, 31),
            balances: BTreeMap::from([("acc.cash".to_string(), 500.0)]),
        });
        // Dated on the checkpoint day itself, so already inside its figure;
        // the one-day gap must not re-count it.
        ledger.add_posting(Posting::new("acc.cash", date(2023, 12, 31), 100.0, 0.0));

        let filters = ReportFilters::default();
        let periods = quarter_periods();
        let rows = vec![account_row(
            json!(["name", "=", "acc.cash"]),
            BalanceType::Opening,
            false,
        )];
        let collected = collect_rows(&ledger, &filters, &periods, &rows);

        assert_eq!(
            collected.balances["acc.cash"].period_values["q1_2024"].opening,
            500.0
        );
        assert_eq!(collected.rows[&0].values, vec![500.0, 500.0]);
    }

    #[test]
    fn test_accumulated_value_transforms() {
        let mut ledger = MemoryLedger::new();
        ledger.add_account(Account::new("acc.sales", "Sales", "4000"));
        ledger.add_posting(Posting::new("acc.sales", date(2024, 1, 15), 100.0, 0.0));
        ledger.add_posting(Posting::new("acc.sales", date(2024, 5, 15), 50.0, 0.0));

        let periods = quarter_periods();
        let rows = vec![account_row(
            json!(["name", "=", "acc.sales"]),
            BalanceType::Movement,
            false,
        )];

        let plain = ReportFilters::default();
        let collected = collect_rows(&ledger, &plain, &periods, &rows);
        assert_eq!(collected.rows[&0].values, vec![100.0, 50.0]);

        let mut accumulated = ReportFilters::default();
        accumulated.accumulated_values = Some(true);
        let collected = collect_rows(&ledger, &accumulated, &periods, &rows);
        assert_eq!(
            collected.rows[&0].values,
            vec![100.0, 150.0],
            "accumulated movements are cumulative from the report start"
        );

        let closing_rows = vec![account_row(
            json!(["name", "=", "acc.sales"]),
            BalanceType::Closing,
            false,
        )];
        let mut unaccumulated = ReportFilters::default();
        unaccumulated.accumulated_values = Some(false);
        let collected = collect_rows(&ledger, &unaccumulated, &periods, &closing_rows);
        assert_eq!(
            collected.rows[&0].values,
            vec![100.0, 50.0],
            "unaccumulated closings show each period in isolation"
        );
    }

    #[test]
    fn test_invalid_filter_zeroes_the_row_and_spares_the_rest() {
        let mut ledger = MemoryLedger::new();
        ledger.add_account(Account::new("acc.sales", "Sales", "4000"));
        ledger.add_posting(Posting::new("acc.sales", date(2024, 1, 15), 0.0, 250.0));

        let filters = ReportFilters::default();
        let periods = quarter_periods();
        let rows = vec![
            account_row(json!(["name", "~", "x"]), BalanceType::Movement, false),
            account_row(json!(["name", "=", "acc.sales"]), BalanceType::Movement, false),
        ];
        let collected = collect_rows(&ledger, &filters, &periods, &rows);

        assert_eq!(collected.rows[&0].values, vec![0.0, 0.0]);
        assert!(collected.rows[&0].breakdown.is_empty());
        assert_eq!(collected.rows[&1].values, vec![-250.0, 0.0]);
    }

    #[test]
    fn test_reverse_sign_flips_summary_and_breakdown() {
        let mut ledger = MemoryLedger::new();
        ledger.add_account(Account::new("acc.sales", "Sales", "4000"));
        ledger.add_posting(Posting::new("acc.sales", date(2024, 1, 15), 0.0, 1000.0));

        let filters = ReportFilters::default();
        let periods = quarter_periods();
        let rows = vec![account_row(
            json!(["name", "=", "acc.sales"]),
            BalanceType::Movement,
            true,
        )];
        let collected = collect_rows(&ledger, &filters, &periods, &rows);

        assert_eq!(collected.rows[&0].values, vec![1000.0, 0.0]);
        let detail = &collected.rows[&0].breakdown["acc.sales"];
        assert_eq!(detail.period_values["q1_2024"].movement, 1000.0);
        // The shared balance map keeps the un-reversed original.
        assert_eq!(
            collected.balances["acc.sales"].period_values["q1_2024"].movement,
            -1000.0
        );
    }

    #[test]
    fn test_cancellation_aborts_collection() {
        let mut ledger = MemoryLedger::new();
        ledger.add_account(Account::new("acc.cash", "Cash", "1100"));

        let filters = ReportFilters::default();
        let rows = vec![account_row(
            json!(["name", "=", "acc.cash"]),
            BalanceType::Closing,
            false,
        )];

        let token = CancelToken::new();
        token.cancel();
        let mut ctx = ReportContext::new(&filters, ReportTemplate::new("Test"), quarter_periods());
        ctx.cancel = Some(&token);
        let mut collector = BalanceCollector::new(&ledger, &filters, &ctx.periods);
        collector.add_template_rows(&rows);

        assert!(matches!(
            collector.collect(&ctx),
            Err(ReportError::Cancelled)
        ));
    }
}
