use chrono::NaiveDate;
use financial_report_engine::*;
use serde_json::json;
use std::collections::BTreeMap;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn build_ledger() -> MemoryLedger {
    let mut ledger = MemoryLedger::new();
    ledger.set_company_currency("Harbor Trading Ltd", "USD");

    for (id, name, number, root_type, kind) in [
        ("4100 - Product Sales", "Product Sales", "4100", "Income", "Sales"),
        ("4200 - Service Income", "Service Income", "4200", "Income", "Service"),
        ("5000 - Materials", "Materials", "5000", "Expense", "Direct Cost"),
        ("5100 - Rent", "Rent", "5100", "Expense", "Operating"),
        ("5200 - Wages", "Wages", "5200", "Expense", "Operating"),
    ] {
        let mut account = Account::new(id, name, number)
            .with_attribute("root_type", json!(root_type))
            .with_attribute("account_type", json!(kind));
        account.company = Some("Harbor Trading Ltd".to_string());
        ledger.add_account(account);
    }

    let mut post = |account: &str, posting_date: NaiveDate, debit: f64, credit: f64| {
        let mut posting = Posting::new(account, posting_date, debit, credit);
        posting.company = Some("Harbor Trading Ltd".to_string());
        ledger.add_posting(posting);
    };

    for (month, product, service, materials, wages) in [
        (1, 52_000.0, 9_000.0, 21_000.0, 14_000.0),
        (2, 48_500.0, 9_500.0, 19_400.0, 14_000.0),
        (3, 61_000.0, 11_000.0, 24_400.0, 14_800.0),
    ] {
        post("4100 - Product Sales", date(2024, month, 15), 0.0, product);
        post("4200 - Service Income", date(2024, month, 22), 0.0, service);
        post("5000 - Materials", date(2024, month, 8), materials, 0.0);
        post("5100 - Rent", date(2024, month, 1), 6_500.0, 0.0);
        post("5200 - Wages", date(2024, month, 28), wages, 0.0);
    }

    ledger
}

fn build_template() -> ReportTemplate {
    let mut income = TemplateRow::new(
        "Income",
        RowSource::AccountData {
            account_filter: json!(["root_type", "=", "Income"]),
            balance_type: BalanceType::Movement,
        },
    );
    income.reference_code = Some("INC001".to_string());
    income.reverse_sign = true;
    income.include_in_charts = true;

    let mut cogs = TemplateRow::new(
        "Cost of Goods Sold",
        RowSource::AccountData {
            account_filter: json!(["account_type", "=", "Direct Cost"]),
            balance_type: BalanceType::Movement,
        },
    );
    cogs.reference_code = Some("COGS001".to_string());

    let mut gross = TemplateRow::new(
        "Gross Profit",
        RowSource::CalculatedAmount {
            formula: "INC001 - COGS001".to_string(),
        },
    );
    gross.reference_code = Some("GP001".to_string());
    gross.bold_text = true;
    gross.include_in_charts = true;

    let mut opex = TemplateRow::new(
        "Operating Expenses",
        RowSource::AccountData {
            account_filter: json!(["account_type", "=", "Operating"]),
            balance_type: BalanceType::Movement,
        },
    );
    opex.reference_code = Some("OPEX001".to_string());

    let mut net = TemplateRow::new(
        "Net Profit",
        RowSource::CalculatedAmount {
            formula: "GP001 - OPEX001".to_string(),
        },
    );
    net.reference_code = Some("NET001".to_string());
    net.bold_text = true;
    net.warn_if_negative = true;
    net.include_in_charts = true;

    let mut template = ReportTemplate::new("Profit and Loss");
    template.rows = vec![
        TemplateRow::new("Trading", RowSource::SectionBreak),
        income,
        cogs,
        gross,
        TemplateRow::new("Operations", RowSource::SectionBreak),
        opex,
        net,
    ];
    template
}

fn main() -> anyhow::Result<()> {
    let ledger = build_ledger();
    let template = build_template();
    let mut templates = BTreeMap::new();
    templates.insert(template.name.clone(), template);

    let periods = vec![
        Period::new("jan_2024", "Jan 2024", date(2024, 1, 1), date(2024, 1, 31)),
        Period::new("feb_2024", "Feb 2024", date(2024, 2, 1), date(2024, 2, 29)),
        Period::new("mar_2024", "Mar 2024", date(2024, 3, 1), date(2024, 3, 31)),
    ];

    let mut filters = ReportFilters::new("Profit and Loss", date(2024, 1, 1), date(2024, 3, 31));
    filters.company = Some("Harbor Trading Ltd".to_string());

    let output = run_report(&ledger, &templates, &periods, &filters)?;

    println!("📊 Profit and Loss - Q1 2024\n");
    for row in &output.rows {
        let name = row
            .get("account_name")
            .and_then(|value| value.as_str())
            .unwrap_or("");
        let cells: Vec<String> = periods
            .iter()
            .map(|period| match row.get(&period.key) {
                Some(value) if value.is_number() => {
                    format!("{:>12.2}", value.as_f64().unwrap_or(0.0))
                }
                _ => format!("{:>12}", ""),
            })
            .collect();
        println!("  {:<24}{}", name, cells.join(" "));
    }

    if let Some(chart) = &output.chart {
        println!("\n📈 Chart: {:?} over {} series", chart.chart_type, chart.data.datasets.len());
    }

    let mut writer = csv::Writer::from_path("profit_and_loss.csv")?;
    let headers: Vec<&str> = output.columns.iter().map(|c| c.label.as_str()).collect();
    writer.write_record(&headers)?;
    for row in &output.rows {
        let record: Vec<String> = output
            .columns
            .iter()
            .map(|column| match row.get(&column.fieldname) {
                Some(serde_json::Value::Number(number)) => {
                    format!("{:.2}", number.as_f64().unwrap_or(0.0))
                }
                Some(serde_json::Value::String(text)) => text.clone(),
                _ => String::new(),
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    println!("\n✅ Report exported to profit_and_loss.csv");
    Ok(())
}
