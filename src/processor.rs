use crate::collector::{CollectedData, RowAccountData};
use crate::formula::CompiledFormula;
use crate::model::{Period, ProcessedRow, ReportContext};
use crate::resolver::processing_order;
use crate::schema::{ReportFilters, RowSource, TemplateRow};
use crate::utils::round_currency;
use log::{debug, error, warn};
use std::collections::BTreeMap;

/// Supplies per-period values for `CustomAPI` rows. Implementations resolve
/// the row's dotted endpoint path however they like (HTTP, plugin registry,
/// fixtures); the engine only needs one value per period back.
pub trait CustomApiHook {
    fn fetch(
        &self,
        endpoint: &str,
        filters: &ReportFilters,
        periods: &[Period],
        row: &TemplateRow,
    ) -> crate::error::Result<Vec<f64>>;
}

/// Dispatches every template row to its computation and registers the
/// resulting vectors under the rows' reference codes.
///
/// Rows are visited in resolver order (API rows, account rows, formulas in
/// dependency order, structural rows) and handed back in template order. A
/// failing row degrades to zeros and is logged; processing itself never
/// fails.
pub struct RowProcessor<'a> {
    api_hook: Option<&'a dyn CustomApiHook>,
}

impl<'a> RowProcessor<'a> {
    pub fn new(api_hook: Option<&'a dyn CustomApiHook>) -> Self {
        Self { api_hook }
    }

    pub fn process(&self, ctx: &mut ReportContext<'_>, collected: CollectedData) {
        let CollectedData {
            rows: mut collected_rows,
            balances,
        } = collected;
        ctx.account_data = balances;

        let order = processing_order(&ctx.template.rows);
        let period_count = ctx.periods.len();
        let mut computed: Vec<ProcessedRow> = Vec::with_capacity(order.len());

        for index in order {
            let row = ctx.template.rows[index].clone();
            let processed = match row.source.clone() {
                RowSource::AccountData { .. } => {
                    let data = collected_rows.remove(&index).unwrap_or_else(|| {
                        RowAccountData {
                            values: vec![0.0; period_count],
                            breakdown: BTreeMap::new(),
                        }
                    });
                    let mut processed = ProcessedRow::new(row, index, data.values);
                    processed.account_details = data.breakdown;
                    processed
                }
                RowSource::CustomApi { endpoint } => {
                    let values = self.fetch_api_values(&endpoint, &row, ctx, period_count);
                    ProcessedRow::new(row, index, values)
                }
                RowSource::CalculatedAmount { formula } => {
                    let values = evaluate_formula(&formula, &row, ctx, period_count);
                    ProcessedRow::new(row, index, values)
                }
                RowSource::BlankLine | RowSource::ColumnBreak | RowSource::SectionBreak => {
                    ProcessedRow::new(row, index, Vec::new())
                }
            };

            if let Some(code) = processed.row.reference_code.clone() {
                if !code.is_empty() && !processed.row.source.is_structural() {
                    ctx.summary.insert(code.clone(), processed.values.clone());
                    if !processed.account_details.is_empty() {
                        ctx.account_details
                            .insert(code, processed.account_details.clone());
                    }
                }
            }
            computed.push(processed);
        }

        // Back to the order the template author declared.
        computed.sort_by_key(|row| row.template_index);
        debug!("Processed {} template row(s)", computed.len());
        ctx.processed_rows = computed;
    }

    fn fetch_api_values(
        &self,
        endpoint: &str,
        row: &TemplateRow,
        ctx: &ReportContext<'_>,
        period_count: usize,
    ) -> Vec<f64> {
        let hook = match self.api_hook {
            Some(hook) => hook,
            None => {
                warn!(
                    "No custom API registry is configured; row '{}' reports zeros",
                    row.display_name
                );
                return vec![0.0; period_count];
            }
        };
        match hook.fetch(endpoint, ctx.filters, &ctx.periods, row) {
            Ok(mut values) => {
                // One value per period, padding or truncating as needed.
                values.resize(period_count, 0.0);
                if row.reverse_sign {
                    for value in &mut values {
                        *value = -*value;
                    }
                }
                values
            }
            Err(failure) => {
                error!(
                    "Custom API '{}' failed for row '{}': {}",
                    endpoint, row.display_name, failure
                );
                vec![0.0; period_count]
            }
        }
    }
}

/// One parse per row, one evaluation per period. A parse failure zeroes the
/// whole row; an evaluation failure zeroes that period; both are logged and
/// never abort the report.
fn evaluate_formula(
    formula: &str,
    row: &TemplateRow,
    ctx: &ReportContext<'_>,
    period_count: usize,
) -> Vec<f64> {
    let compiled = match CompiledFormula::compile(formula) {
        Ok(compiled) => compiled,
        Err(failure) => {
            error!(
                "Formula on row '{}' does not parse: {}",
                row.display_name, failure
            );
            return vec![0.0; period_count];
        }
    };

    let negation = if row.reverse_sign { -1.0 } else { 1.0 };
    let mut values = Vec::with_capacity(period_count);
    for i in 0..period_count {
        let mut bindings = BTreeMap::new();
        for (code, vector) in &ctx.summary {
            bindings.insert(code.clone(), vector.get(i).copied().unwrap_or(0.0));
        }
        let value = match compiled.evaluate(&bindings) {
            Ok(value) => round_currency(value * negation),
            Err(failure) => {
                error!(
                    "Formula on row '{}' failed for period {}: {}",
                    row.display_name, i, failure
                );
                0.0
            }
        };
        values.push(value);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;
    use crate::schema::ReportTemplate;
    use chrono::NaiveDate;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn two_periods() -> Vec<Period> {
        vec![
            Period::new("p1", "Jan 2024", date(2024, 1, 1), date(2024, 1, 31)),
            Period::new("p2", "Feb 2024", date(2024, 2, 1), date(2024, 2, 29)),
        ]
    }

    fn account_row(code: &str) -> TemplateRow {
        let mut row = TemplateRow::new(
            code,
            RowSource::AccountData {
                account_filter: serde_json::Value::Null,
                balance_type: Default::default(),
            },
        );
        row.reference_code = Some(code.to_string());
        row
    }

    fn formula_row(code: &str, formula: &str) -> TemplateRow {
        let mut row = TemplateRow::new(
            code,
            RowSource::CalculatedAmount {
                formula: formula.to_string(),
            },
        );
        row.reference_code = Some(code.to_string());
        row
    }

    fn collected_with(values: &[(usize, Vec<f64>)]) -> CollectedData {
        let mut collected = CollectedData::default();
        for (index, vector) in values {
            collected.rows.insert(
                *index,
                RowAccountData {
                    values: vector.clone(),
                    breakdown: BTreeMap::new(),
                },
            );
        }
        collected
    }

    struct FixedHook(Vec<f64>);

    impl CustomApiHook for FixedHook {
        fn fetch(
            &self,
            _endpoint: &str,
            _filters: &ReportFilters,
            _periods: &[Period],
            _row: &TemplateRow,
        ) -> crate::error::Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    struct FailingHook;

    impl CustomApiHook for FailingHook {
        fn fetch(
            &self,
            endpoint: &str,
            _filters: &ReportFilters,
            _periods: &[Period],
            _row: &TemplateRow,
        ) -> crate::error::Result<Vec<f64>> {
            Err(ReportError::CustomApi {
                endpoint: endpoint.to_string(),
                details: "service unavailable".to_string(),
            })
        }
    }

    #[test]
    fn test_formula_combines_account_vectors() {
        let filters = ReportFilters::default();
        let mut template = ReportTemplate::new("P&L");
        template.rows = vec![
            account_row("INC001"),
            account_row("EXP001"),
            formula_row("NET001", "INC001 - EXP001"),
        ];
        let mut ctx = ReportContext::new(&filters, template, two_periods());
        let collected = collected_with(&[
            (0, vec![1000.0, 1200.0]),
            (1, vec![400.0, 500.0]),
        ]);

        RowProcessor::new(None).process(&mut ctx, collected);

        assert_eq!(ctx.processed_rows.len(), 3);
        assert_eq!(ctx.processed_rows[2].values, vec![600.0, 700.0]);
        assert_eq!(ctx.summary["NET001"], vec![600.0, 700.0]);
    }

    #[test]
    fn test_rows_return_to_template_order() {
        // The formula sits before the account row it references; it is
        // computed second but displayed first.
        let filters = ReportFilters::default();
        let mut template = ReportTemplate::new("T");
        template.rows = vec![formula_row("NET", "INC * 2"), account_row("INC")];
        let mut ctx = ReportContext::new(&filters, template, two_periods());

        RowProcessor::new(None).process(&mut ctx, collected_with(&[(1, vec![5.0, 7.0])]));

        assert_eq!(ctx.processed_rows[0].row.display_name, "NET");
        assert_eq!(ctx.processed_rows[0].values, vec![10.0, 14.0]);
        assert_eq!(ctx.processed_rows[1].row.display_name, "INC");
    }

    #[test]
    fn test_parse_failure_zeroes_the_whole_row() {
        let filters = ReportFilters::default();
        let mut template = ReportTemplate::new("T");
        template.rows = vec![formula_row("BAD", "1 +")];
        let mut ctx = ReportContext::new(&filters, template, two_periods());

        RowProcessor::new(None).process(&mut ctx, CollectedData::default());

        assert_eq!(ctx.processed_rows[0].values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_evaluation_failure_zeroes_only_that_period() {
        let filters = ReportFilters::default();
        let mut template = ReportTemplate::new("T");
        template.rows = vec![
            account_row("A"),
            account_row("B"),
            formula_row("RATIO", "A / B"),
        ];
        let mut ctx = ReportContext::new(&filters, template, two_periods());
        let collected = collected_with(&[(0, vec![10.0, 10.0]), (1, vec![5.0, 0.0])]);

        RowProcessor::new(None).process(&mut ctx, collected);

        assert_eq!(ctx.processed_rows[2].values, vec![2.0, 0.0]);
    }

    #[test]
    fn test_api_values_padded_and_sign_reversed() {
        let filters = ReportFilters::default();
        let mut template = ReportTemplate::new("T");
        let mut api_row = TemplateRow::new(
            "Exchange Gain",
            RowSource::CustomApi {
                endpoint: "fx.gains".to_string(),
            },
        );
        api_row.reference_code = Some("FX".to_string());
        api_row.reverse_sign = true;
        template.rows = vec![api_row];
        let mut ctx = ReportContext::new(&filters, template, two_periods());

        let hook = FixedHook(vec![3.0]);
        RowProcessor::new(Some(&hook)).process(&mut ctx, CollectedData::default());

        assert_eq!(ctx.processed_rows[0].values, vec![-3.0, 0.0]);
        assert_eq!(ctx.summary["FX"], vec![-3.0, 0.0]);
    }

    #[test]
    fn test_api_failures_degrade_to_zeros() {
        let filters = ReportFilters::default();
        let mut template = ReportTemplate::new("T");
        template.rows = vec![TemplateRow::new(
            "External",
            RowSource::CustomApi {
                endpoint: "missing.endpoint".to_string(),
            },
        )];
        let mut ctx = ReportContext::new(&filters, template.clone(), two_periods());
        RowProcessor::new(None).process(&mut ctx, CollectedData::default());
        assert_eq!(ctx.processed_rows[0].values, vec![0.0, 0.0]);

        let mut ctx = ReportContext::new(&filters, template, two_periods());
        let hook = FailingHook;
        RowProcessor::new(Some(&hook)).process(&mut ctx, CollectedData::default());
        assert_eq!(ctx.processed_rows[0].values, vec![0.0, 0.0]);
    }
}
