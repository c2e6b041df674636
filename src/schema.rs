use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BalanceType {
    #[schemars(description = "Balance carried into the period from prior activity")]
    Opening,

    #[schemars(description = "Balance at the end of the period: opening plus movement")]
    Closing,

    #[schemars(description = "Net debit-minus-credit activity within the period")]
    Movement,
}

impl Default for BalanceType {
    fn default() -> Self {
        Self::Closing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FieldType {
    Currency,
    Float,
    Int,
    Percent,
}

/// What a template row computes. The tag doubles as the row's kind in the
/// stored document, so authored JSON reads
/// `{"data_source": "AccountData", "account_filter": [...], ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "data_source")]
pub enum RowSource {
    #[schemars(
        description = "Sum ledger balances of every account matching the filter tree, one value per period"
    )]
    AccountData {
        #[serde(default)]
        #[schemars(
            description = "Filter tree over account attributes: a [field, operator, value] leaf or an {\"and\"|\"or\": [subtree, ...]} node. A JSON string holding such a tree is also accepted."
        )]
        account_filter: Value,

        #[serde(default)]
        #[schemars(description = "Which side of the period balance this row displays")]
        balance_type: BalanceType,
    },

    #[schemars(
        description = "Evaluate an arithmetic formula once per period, referencing other rows by their reference codes"
    )]
    CalculatedAmount {
        formula: String,
    },

    #[serde(rename = "CustomAPI")]
    #[schemars(description = "Fetch one value per period from a registered external endpoint")]
    CustomApi {
        endpoint: String,
    },

    #[schemars(description = "Visual spacer row; never computed")]
    BlankLine,

    #[schemars(description = "Starts a new side-by-side segment within the current section")]
    ColumnBreak,

    #[schemars(description = "Starts a new report section; the row's display name labels it")]
    SectionBreak,
}

impl RowSource {
    /// Structural rows shape the layout and never carry values.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            RowSource::BlankLine | RowSource::ColumnBreak | RowSource::SectionBreak
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateRow {
    #[serde(default)]
    #[schemars(
        description = "Symbolic code other rows' formulas may reference (e.g. 'INC001'). Must be unique among rows that have one."
    )]
    pub reference_code: Option<String>,

    #[serde(default)]
    #[schemars(description = "Label shown in the report; section breaks use it as the section title")]
    pub display_name: String,

    #[serde(flatten)]
    pub source: RowSource,

    #[serde(default)]
    #[schemars(description = "Negate every computed value (e.g. to show credit balances as positive)")]
    pub reverse_sign: bool,

    #[serde(default)]
    pub indentation_level: u32,

    #[serde(default)]
    pub bold_text: bool,

    #[serde(default)]
    pub italic_text: bool,

    #[serde(default)]
    #[schemars(description = "Flag negative values for highlighting in the rendered report")]
    pub warn_if_negative: bool,

    #[serde(default)]
    #[schemars(description = "Overrides the Currency default for this row's period cells")]
    pub fieldtype: Option<FieldType>,

    #[serde(default)]
    pub color: Option<String>,

    #[serde(default)]
    #[schemars(
        description = "Compute the row (so formulas can reference it) but keep it out of the rendered report"
    )]
    pub hidden_calculation: bool,

    #[serde(default)]
    #[schemars(description = "Drop the row from the rendered report when all period values are near zero")]
    pub hide_when_empty: bool,

    #[serde(default)]
    pub include_in_charts: bool,
}

impl TemplateRow {
    pub fn new(display_name: &str, source: RowSource) -> Self {
        Self {
            reference_code: None,
            display_name: display_name.to_string(),
            source,
            reverse_sign: false,
            indentation_level: 0,
            bold_text: false,
            italic_text: false,
            warn_if_negative: false,
            fieldtype: None,
            color: None,
            hidden_calculation: false,
            hide_when_empty: false,
            include_in_charts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportTemplate {
    #[schemars(description = "Template name referenced by the report_template filter")]
    pub name: String,

    #[serde(default)]
    #[schemars(description = "Disabled templates refuse to execute")]
    pub disabled: bool,

    #[schemars(description = "Report rows in display order")]
    pub rows: Vec<TemplateRow>,
}

impl ReportTemplate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            disabled: false,
            rows: Vec::new(),
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportTemplate)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Periodicity {
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FilterBasedOn {
    #[serde(rename = "Fiscal Year")]
    FiscalYear,
    #[serde(rename = "Date Range")]
    DateRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SelectedView {
    #[schemars(description = "Absolute values per period (default)")]
    Report,

    #[schemars(description = "Period-over-period percentage change; the first period stays absolute")]
    Growth,

    #[serde(other)]
    #[schemars(description = "Any unrecognized view; logged and treated as Report")]
    Unsupported,
}

impl Default for SelectedView {
    fn default() -> Self {
        Self::Report
    }
}

/// Execution-time filters. Everything defaults so a partial JSON document
/// parses; `report_template`, `period_start_date` and `period_end_date` are
/// validated as required at execution start (an empty template name counts
/// as missing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReportFilters {
    #[schemars(description = "Name of the report template to execute (required)")]
    pub report_template: String,

    #[schemars(description = "Restricts accounts and postings to one company and selects the report currency")]
    pub company: Option<String>,

    #[schemars(description = "First day of the reporting window (required)")]
    pub period_start_date: Option<NaiveDate>,

    #[schemars(description = "Last day of the reporting window (required)")]
    pub period_end_date: Option<NaiveDate>,

    pub from_fiscal_year: Option<String>,

    pub to_fiscal_year: Option<String>,

    #[schemars(description = "Granularity the external period generator splits the window into")]
    pub periodicity: Option<Periodicity>,

    pub filter_based_on: Option<FilterBasedOn>,

    #[schemars(
        description = "None leaves balances as computed; true folds openings into movements (since report start); false subtracts openings from closings (within the period)"
    )]
    pub accumulated_values: Option<bool>,

    #[schemars(description = "Expand each account row into per-account detail rows")]
    pub show_account_details: bool,

    pub selected_view: SelectedView,

    #[schemars(description = "Keep only postings booked against these projects")]
    pub project: Vec<String>,

    #[schemars(description = "Keep only postings booked against these cost centers")]
    pub cost_center: Vec<String>,

    pub finance_book: Option<String>,

    #[schemars(description = "Also admit postings on the company's default finance book")]
    pub include_default_book_entries: bool,

    #[schemars(description = "Accounting-dimension field name to accepted values")]
    pub dimensions: BTreeMap<String, Vec<String>>,

    #[schemars(description = "Exclude period-closing postings from movements")]
    pub ignore_closing_entries: bool,

    #[schemars(description = "Unsupported; logged and ignored")]
    pub presentation_currency: Option<String>,
}

impl ReportFilters {
    pub fn new(
        report_template: &str,
        period_start_date: NaiveDate,
        period_end_date: NaiveDate,
    ) -> Self {
        Self {
            report_template: report_template.to_string(),
            period_start_date: Some(period_start_date),
            period_end_date: Some(period_end_date),
            ..Default::default()
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportFilters)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
