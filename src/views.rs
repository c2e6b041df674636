use crate::model::{ChartData, ChartSeries, ChartType, ReportChart, ReportContext, ReportRow};
use crate::utils::round_to;
use log::debug;
use serde_json::{json, Value};

/// Rewrites the formatted rows into period-over-period growth percentages.
///
/// The first period stays absolute; later periods become the percentage
/// change against the *original* previous value, so the transform can run in
/// place without chaining onto already-rewritten cells. Blank rows and the
/// `total` column are never touched; in side-by-side reports each segment is
/// transformed independently.
pub fn apply_growth_view(rows: &mut [ReportRow]) {
    for row in rows.iter_mut() {
        let info = match read_segment_info(row) {
            Some(info) => info,
            None => continue,
        };
        if info.total_segments <= 1 {
            if !is_flagged(row, "is_blank_line") {
                growth_transform(row, &info.period_keys, "");
            }
        } else {
            for i in 0..info.total_segments {
                let prefix = format!("seg_{}_", i);
                if !is_flagged(row, &format!("{}is_blank_line", prefix)) {
                    growth_transform(row, &info.period_keys, &prefix);
                }
            }
        }
    }
}

struct SegmentInfo {
    total_segments: usize,
    period_keys: Vec<String>,
}

fn read_segment_info(row: &ReportRow) -> Option<SegmentInfo> {
    let info = row.get("_segment_info")?;
    let total_segments = info.get("total_segments")?.as_u64()? as usize;
    let period_keys = info
        .get("period_keys")?
        .as_array()?
        .iter()
        .filter_map(|key| key.as_str().map(str::to_string))
        .collect();
    Some(SegmentInfo {
        total_segments,
        period_keys,
    })
}

fn is_flagged(row: &ReportRow, key: &str) -> bool {
    row.get(key).and_then(Value::as_i64).unwrap_or(0) != 0
}

fn growth_transform(row: &mut ReportRow, period_keys: &[String], prefix: &str) {
    let originals: Vec<Option<f64>> = period_keys
        .iter()
        .map(|key| row.get(&format!("{}{}", prefix, key)).and_then(Value::as_f64))
        .collect();

    for i in 1..period_keys.len() {
        let current = match originals[i] {
            Some(value) => value,
            None => continue,
        };
        let previous = match originals[i - 1] {
            Some(value) => value,
            None => continue,
        };
        let growth = if previous == 0.0 {
            if current > 0.0 {
                100.0
            } else {
                0.0
            }
        } else {
            round_to(((current - previous) / previous.abs()) * 100.0, 2)
        };
        row.insert(format!("{}{}", prefix, period_keys[i]), json!(growth));
    }
}

/// Chart series come from the computed rows, before layout, so rows hidden
/// from the table can still chart. Structural rows and all-zero series are
/// dropped; an empty chart is `None`.
pub fn build_chart(ctx: &ReportContext<'_>) -> Option<ReportChart> {
    let mut datasets = Vec::new();
    for row in &ctx.processed_rows {
        if !row.row.include_in_charts || row.row.source.is_structural() {
            continue;
        }
        let mut values: Vec<f64> = row.values.iter().map(|value| round_to(*value, 2)).collect();
        values.resize(ctx.periods.len(), 0.0);
        if values.iter().all(|value| *value == 0.0) {
            continue;
        }
        datasets.push(ChartSeries {
            name: row.row.display_name.clone(),
            values,
        });
    }
    if datasets.is_empty() {
        debug!("No chartable rows; skipping the chart");
        return None;
    }

    let chart_type = if ctx.filters.accumulated_values.unwrap_or(false) && ctx.periods.len() > 1 {
        ChartType::Line
    } else {
        ChartType::Bar
    };
    Some(ReportChart {
        data: ChartData {
            labels: ctx.periods.iter().map(|period| period.label.clone()).collect(),
            datasets,
        },
        chart_type,
        currency: ctx.currency.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Period, ProcessedRow};
    use crate::schema::{ReportFilters, ReportTemplate, RowSource, TemplateRow};
    use chrono::NaiveDate;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn flat_row(values: &[(&str, Value)], period_keys: &[String]) -> ReportRow {
        let mut row = ReportRow::new();
        for (key, value) in values {
            row.insert(key.to_string(), value.clone());
        }
        row.insert(
            "_segment_info".to_string(),
            json!({ "total_segments": 1, "period_keys": period_keys }),
        );
        row
    }

    #[test]
    fn test_growth_against_original_previous_values() {
        let period_keys = keys(&["p1", "p2", "p3", "p4"]);
        let mut rows = vec![flat_row(
            &[
                ("account", json!("Sales")),
                ("p1", json!(100.0)),
                ("p2", json!(200.0)),
                ("p3", json!(0.0)),
                ("p4", json!(-50.0)),
            ],
            &period_keys,
        )];

        apply_growth_view(&mut rows);

        assert_eq!(rows[0]["p1"], json!(100.0), "first period stays absolute");
        assert_eq!(rows[0]["p2"], json!(100.0));
        assert_eq!(rows[0]["p3"], json!(-100.0));
        assert_eq!(rows[0]["p4"], json!(0.0), "zero baseline with a fall maps to 0");
    }

    #[test]
    fn test_growth_spares_blanks_totals_and_text_cells() {
        let period_keys = keys(&["p1", "p2"]);
        let mut rows = vec![
            flat_row(
                &[
                    ("is_blank_line", json!(1)),
                    ("p1", json!(10.0)),
                    ("p2", json!(20.0)),
                ],
                &period_keys,
            ),
            flat_row(
                &[
                    ("p1", json!(10.0)),
                    ("p2", json!("")),
                    ("total", json!(30.0)),
                ],
                &period_keys,
            ),
        ];

        apply_growth_view(&mut rows);

        assert_eq!(rows[0]["p2"], json!(20.0), "blank rows are untouched");
        assert_eq!(rows[1]["p2"], json!(""), "text cells are untouched");
        assert_eq!(rows[1]["total"], json!(30.0));
    }

    #[test]
    fn test_growth_transforms_each_segment_independently() {
        let period_keys = keys(&["p1", "p2"]);
        let mut row = ReportRow::new();
        row.insert("seg_0_p1".to_string(), json!(100.0));
        row.insert("seg_0_p2".to_string(), json!(150.0));
        row.insert("seg_1_is_blank_line".to_string(), json!(1));
        row.insert("seg_1_p1".to_string(), json!(40.0));
        row.insert("seg_1_p2".to_string(), json!(80.0));
        row.insert(
            "_segment_info".to_string(),
            json!({ "total_segments": 2, "period_keys": period_keys }),
        );
        let mut rows = vec![row];

        apply_growth_view(&mut rows);

        assert_eq!(rows[0]["seg_0_p2"], json!(50.0));
        assert_eq!(
            rows[0]["seg_1_p2"],
            json!(80.0),
            "blank segments are untouched"
        );
    }

    #[test]
    fn test_chart_keeps_marked_nonzero_rows() {
        let filters = ReportFilters::default();
        let periods = vec![
            Period::new("p1", "Jan 2024", date(2024, 1, 1), date(2024, 1, 31)),
            Period::new("p2", "Feb 2024", date(2024, 2, 1), date(2024, 2, 29)),
        ];
        let mut ctx = ReportContext::new(&filters, ReportTemplate::new("T"), periods);
        ctx.currency = Some("EUR".to_string());

        let mut charted = TemplateRow::new(
            "Sales",
            RowSource::CalculatedAmount {
                formula: String::new(),
            },
        );
        charted.include_in_charts = true;
        let mut structural = TemplateRow::new("Break", RowSource::SectionBreak);
        structural.include_in_charts = true;
        let mut silent = TemplateRow::new(
            "Nothing",
            RowSource::CalculatedAmount {
                formula: String::new(),
            },
        );
        silent.include_in_charts = true;
        // Hidden from the table, still charted.
        let mut hidden = TemplateRow::new(
            "Internal",
            RowSource::CalculatedAmount {
                formula: String::new(),
            },
        );
        hidden.include_in_charts = true;
        hidden.hidden_calculation = true;

        ctx.processed_rows = vec![
            ProcessedRow::new(charted, 0, vec![100.456, 200.0]),
            ProcessedRow::new(structural, 1, Vec::new()),
            ProcessedRow::new(silent, 2, vec![0.0, 0.0]),
            ProcessedRow::new(hidden, 3, vec![5.0]),
        ];

        let chart = build_chart(&ctx).expect("two qualifying datasets");
        assert_eq!(chart.data.datasets.len(), 2);
        assert_eq!(chart.data.datasets[0].name, "Sales");
        assert_eq!(chart.data.datasets[0].values, vec![100.46, 200.0]);
        assert_eq!(
            chart.data.datasets[1].values,
            vec![5.0, 0.0],
            "short vectors are zero-padded"
        );
        assert_eq!(chart.data.labels, vec!["Jan 2024", "Feb 2024"]);
        assert_eq!(chart.chart_type, ChartType::Bar);
        assert_eq!(chart.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_chart_type_and_empty_chart() {
        let mut filters = ReportFilters::default();
        filters.accumulated_values = Some(true);
        let periods = vec![
            Period::new("p1", "Jan", date(2024, 1, 1), date(2024, 1, 31)),
            Period::new("p2", "Feb", date(2024, 2, 1), date(2024, 2, 29)),
        ];
        let mut ctx = ReportContext::new(&filters, ReportTemplate::new("T"), periods);
        let mut charted = TemplateRow::new(
            "Sales",
            RowSource::CalculatedAmount {
                formula: String::new(),
            },
        );
        charted.include_in_charts = true;
        ctx.processed_rows = vec![ProcessedRow::new(charted, 0, vec![10.0, 20.0])];

        let chart = build_chart(&ctx).expect("qualifying dataset");
        assert_eq!(
            chart.chart_type,
            ChartType::Line,
            "accumulated multi-period reports chart as lines"
        );

        ctx.processed_rows.clear();
        assert!(build_chart(&ctx).is_none());
    }
}
