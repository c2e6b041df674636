use crate::collector::BalanceCollector;
use crate::error::{ReportError, Result};
use crate::layout::build_layout;
use crate::ledger::LedgerStore;
use crate::model::{CancelToken, Period, ReportContext, ReportOutput};
use crate::processor::{CustomApiHook, RowProcessor};
use crate::schema::{ReportFilters, ReportTemplate, SelectedView};
use crate::views::{apply_growth_view, build_chart};
use log::{info, warn};
use std::collections::BTreeMap;

/// Resolves template names to stored templates. Template storage and its
/// structural validation stay outside the engine.
pub trait TemplateSource {
    fn load_template(&self, name: &str) -> Result<Option<ReportTemplate>>;
}

impl TemplateSource for BTreeMap<String, ReportTemplate> {
    fn load_template(&self, name: &str) -> Result<Option<ReportTemplate>> {
        Ok(self.get(name).cloned())
    }
}

/// Produces the reporting periods for an execution. Fiscal-year and
/// periodicity interpretation happens in the implementation, not here.
pub trait PeriodSource {
    fn period_list(&self, filters: &ReportFilters) -> Result<Vec<Period>>;
}

impl PeriodSource for Vec<Period> {
    fn period_list(&self, _filters: &ReportFilters) -> Result<Vec<Period>> {
        Ok(self.clone())
    }
}

/// The report pipeline: validate filters, resolve the template and periods,
/// collect ledger balances, compute every row, lay the rows out, then apply
/// the selected view and extract the chart.
pub struct ReportEngine<'a> {
    ledger: &'a dyn LedgerStore,
    templates: &'a dyn TemplateSource,
    periods: &'a dyn PeriodSource,
    api_hook: Option<&'a dyn CustomApiHook>,
}

impl<'a> ReportEngine<'a> {
    pub fn new(
        ledger: &'a dyn LedgerStore,
        templates: &'a dyn TemplateSource,
        periods: &'a dyn PeriodSource,
    ) -> Self {
        Self {
            ledger,
            templates,
            periods,
            api_hook: None,
        }
    }

    /// Registers the hook serving `CustomAPI` rows. Without one, those rows
    /// report zeros.
    pub fn with_api_hook(mut self, hook: &'a dyn CustomApiHook) -> Self {
        self.api_hook = Some(hook);
        self
    }

    pub fn execute(&self, filters: &ReportFilters) -> Result<ReportOutput> {
        self.run(filters, None)
    }

    /// Like [`execute`](Self::execute), but checks the token before each
    /// batched ledger query and aborts with [`ReportError::Cancelled`] once
    /// it is flagged.
    pub fn execute_with_cancel(
        &self,
        filters: &ReportFilters,
        cancel: &CancelToken,
    ) -> Result<ReportOutput> {
        self.run(filters, Some(cancel))
    }

    fn run(&self, filters: &ReportFilters, cancel: Option<&CancelToken>) -> Result<ReportOutput> {
        validate_filters(filters)?;

        let template = self
            .templates
            .load_template(&filters.report_template)?
            .ok_or_else(|| ReportError::TemplateNotFound(filters.report_template.clone()))?;
        if template.disabled {
            return Err(ReportError::TemplateDisabled(template.name.clone()));
        }

        let periods = self.periods.period_list(filters)?;
        if periods.is_empty() {
            return Err(ReportError::EmptyPeriodList);
        }
        info!(
            "Executing report '{}' over {} period(s)",
            template.name,
            periods.len()
        );

        let mut ctx = ReportContext::new(filters, template, periods);
        ctx.cancel = cancel;
        ctx.currency = self.ledger.company_currency(filters.company.as_deref())?;

        let collected = {
            let mut collector = BalanceCollector::new(self.ledger, filters, &ctx.periods);
            collector.add_template_rows(&ctx.template.rows);
            collector.collect(&ctx)?
        };

        RowProcessor::new(self.api_hook).process(&mut ctx, collected);

        let (columns, mut rows) = build_layout(&ctx);
        if filters.selected_view == SelectedView::Growth {
            apply_growth_view(&mut rows);
        }
        let chart = build_chart(&ctx);

        info!(
            "Report '{}' produced {} display row(s)",
            ctx.template.name,
            rows.len()
        );
        Ok(ReportOutput {
            columns,
            rows,
            chart,
        })
    }
}

fn validate_filters(filters: &ReportFilters) -> Result<()> {
    if filters.report_template.is_empty() {
        return Err(ReportError::MissingFilter("report_template".to_string()));
    }
    if filters.period_start_date.is_none() {
        return Err(ReportError::MissingFilter("period_start_date".to_string()));
    }
    if filters.period_end_date.is_none() {
        return Err(ReportError::MissingFilter("period_end_date".to_string()));
    }
    if filters.presentation_currency.is_some() {
        warn!("presentation_currency is not supported and will be ignored");
    }
    if filters.selected_view == SelectedView::Unsupported {
        warn!("Unsupported view selection; falling back to the standard report");
    }
    Ok(())
}
