use crate::model::{
    Column, DetailAccount, ProcessedRow, ReportContext, ReportRow, Section, Segment,
};
use crate::schema::{FieldType, RowSource, TemplateRow};
use log::debug;
use serde_json::json;

/// Magnitude below which a period value counts as empty for
/// `hide_when_empty`.
const EMPTY_EPSILON: f64 = 0.01;

/// Turns the computed row list into display columns and rows.
///
/// The pipeline is: visibility filter, section/segment grouping, segment
/// padding, optional detail expansion, then formatting through either the
/// flat renderer (single segment) or the side-by-side renderer.
pub fn build_layout(ctx: &ReportContext<'_>) -> (Vec<Column>, Vec<ReportRow>) {
    let visible: Vec<ProcessedRow> = ctx
        .processed_rows
        .iter()
        .filter(|row| is_visible(row))
        .cloned()
        .collect();

    let mut sections = organize_sections(visible);
    pad_sections(&mut sections);
    if ctx.filters.show_account_details {
        expand_details(&mut sections, ctx);
    }

    let total_segments = sections
        .iter()
        .map(|section| section.segments.len())
        .max()
        .unwrap_or(1);
    let columns = build_columns(ctx, &sections, total_segments);
    let rows = if total_segments <= 1 {
        format_flat(&sections, ctx)
    } else {
        format_segmented(&sections, ctx, total_segments)
    };
    debug!(
        "Laid out {} display row(s) across {} section(s), {} segment(s) wide",
        rows.len(),
        sections.len(),
        total_segments
    );
    (columns, rows)
}

fn is_visible(row: &ProcessedRow) -> bool {
    if matches!(row.row.source, RowSource::BlankLine) {
        return true;
    }
    if row.row.hidden_calculation {
        return false;
    }
    if row.row.hide_when_empty
        && !row.values.iter().any(|value| value.abs() > EMPTY_EPSILON)
    {
        return false;
    }
    true
}

/// Splits on `SectionBreak` rows. A break's display name labels the *next*
/// section; empty runs produce no section.
fn organize_sections(rows: Vec<ProcessedRow>) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut pending_label: Option<String> = None;
    let mut current: Vec<ProcessedRow> = Vec::new();

    for row in rows {
        if matches!(row.row.source, RowSource::SectionBreak) {
            if !current.is_empty() {
                push_section(
                    &mut sections,
                    pending_label.take(),
                    std::mem::take(&mut current),
                );
            }
            pending_label = row_label(&row.row);
        } else {
            current.push(row);
        }
    }
    if !current.is_empty() {
        push_section(&mut sections, pending_label.take(), current);
    }
    sections
}

fn push_section(sections: &mut Vec<Section>, label: Option<String>, rows: Vec<ProcessedRow>) {
    let mut section = Section {
        index: sections.len(),
        label,
        segments: split_segments(rows),
    };
    inject_section_headers(&mut section);
    sections.push(section);
}

fn row_label(row: &TemplateRow) -> Option<String> {
    if row.display_name.is_empty() {
        None
    } else {
        Some(row.display_name.clone())
    }
}

/// Splits a section's rows on `ColumnBreak`. Unlike sections, empty runs
/// keep their segment slot: segment position is what lines columns up.
fn split_segments(rows: Vec<ProcessedRow>) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut pending_label: Option<String> = None;
    let mut current: Vec<ProcessedRow> = Vec::new();

    for row in rows {
        if matches!(row.row.source, RowSource::ColumnBreak) {
            segments.push(Segment {
                index: segments.len(),
                label: pending_label.take(),
                rows: std::mem::take(&mut current),
            });
            pending_label = row_label(&row.row);
        } else {
            current.push(row);
        }
    }
    segments.push(Segment {
        index: segments.len(),
        label: pending_label.take(),
        rows: current,
    });
    segments
}

/// The section label becomes a bold blank header atop the first non-empty
/// segment; every later non-empty segment gets an unlabeled blank header so
/// rows stay vertically aligned across segments.
fn inject_section_headers(section: &mut Section) {
    let label = match section.label.clone() {
        Some(label) => label,
        None => return,
    };
    let mut label_pending = true;
    for segment in &mut section.segments {
        if segment.rows.is_empty() {
            continue;
        }
        let header = if label_pending {
            label_pending = false;
            section_header(Some(&label))
        } else {
            section_header(None)
        };
        segment.rows.insert(0, header);
    }
}

fn section_header(label: Option<&str>) -> ProcessedRow {
    let mut row = TemplateRow::new(label.unwrap_or(""), RowSource::BlankLine);
    row.bold_text = label.is_some();
    ProcessedRow::new(row, 0, Vec::new())
}

fn pad_sections(sections: &mut [Section]) {
    let max_segments = sections
        .iter()
        .map(|section| section.segments.len())
        .max()
        .unwrap_or(0);
    for section in sections {
        while section.segments.len() < max_segments {
            section.segments.push(Segment::empty(section.segments.len()));
        }
    }
}

fn expand_details(sections: &mut [Section], ctx: &ReportContext<'_>) {
    for section in sections.iter_mut() {
        for segment in &mut section.segments {
            let rows = std::mem::take(&mut segment.rows);
            let mut expanded = Vec::with_capacity(rows.len());
            for row in rows {
                let details = detail_rows(&row, ctx);
                expanded.push(row);
                expanded.extend(details);
            }
            segment.rows = expanded;
        }
    }
}

/// One synthesized row per account behind a ledger-backed summary row,
/// indented one level deeper and named `"<number> - <name>"`.
fn detail_rows(parent: &ProcessedRow, ctx: &ReportContext<'_>) -> Vec<ProcessedRow> {
    let balance_type = match &parent.row.source {
        RowSource::AccountData { balance_type, .. } => *balance_type,
        _ => return Vec::new(),
    };

    let mut rows = Vec::with_capacity(parent.account_details.len());
    for (account_id, balance) in &parent.account_details {
        let display_name = if balance.account_number.is_empty() {
            balance.account_name.clone()
        } else {
            format!("{} - {}", balance.account_number, balance.account_name)
        };
        let mut template_row = parent.row.clone();
        template_row.display_name = display_name;
        template_row.reference_code = None;
        template_row.indentation_level = parent.row.indentation_level + 1;
        template_row.bold_text = false;
        template_row.italic_text = true;
        template_row.include_in_charts = false;

        let mut detail = ProcessedRow::new(
            template_row,
            parent.template_index,
            balance.ordered_values(&ctx.periods, balance_type),
        );
        detail.is_detail_row = true;
        detail.parent_reference = parent.row.reference_code.clone();
        detail.detail_account = Some(DetailAccount {
            id: account_id.clone(),
            name: balance.account_name.clone(),
            number: balance.account_number.clone(),
        });
        rows.push(detail);
    }
    rows
}

fn row_value_map(row: &ProcessedRow, ctx: &ReportContext<'_>) -> ReportRow {
    let mut map = ReportRow::new();
    let account = row
        .detail_account
        .as_ref()
        .map(|detail| detail.id.clone())
        .unwrap_or_else(|| row.row.display_name.clone());
    map.insert("account".to_string(), json!(account));
    map.insert("account_name".to_string(), json!(row.row.display_name));
    if let Some(detail) = &row.detail_account {
        map.insert("acc_name".to_string(), json!(detail.name));
        map.insert("acc_number".to_string(), json!(detail.number));
    }
    if !row.account_details.is_empty() {
        let children: Vec<&String> = row.account_details.keys().collect();
        map.insert("child_accounts".to_string(), json!(children));
    }
    if let Some(currency) = &ctx.currency {
        map.insert("currency".to_string(), json!(currency));
    }
    map.insert("indent".to_string(), json!(row.row.indentation_level));
    if let Some(start) = ctx.filters.period_start_date {
        map.insert("period_start_date".to_string(), json!(start));
    }
    if let Some(end) = ctx.filters.period_end_date {
        map.insert("period_end_date".to_string(), json!(end));
    }

    let mut total = 0.0;
    for (i, period) in ctx.periods.iter().enumerate() {
        match row.values.get(i) {
            Some(value) => {
                map.insert(period.key.clone(), json!(value));
                total += value;
            }
            None => {
                map.insert(period.key.clone(), json!(""));
            }
        }
    }
    if ctx.filters.accumulated_values == Some(false) && !row.values.is_empty() {
        let total_value = if row.row.fieldtype == Some(FieldType::Percent) {
            total / ctx.periods.len() as f64
        } else {
            total
        };
        map.insert("total".to_string(), json!(total_value));
    }
    map
}

/// Formatting rules in application order; a later rule wins on key
/// collision.
fn apply_formatting(map: &mut ReportRow, row: &ProcessedRow) {
    if row.row.bold_text {
        map.insert("bold".to_string(), json!(1));
    }
    if row.row.italic_text {
        map.insert("italic".to_string(), json!(1));
    }
    if row.is_detail_row {
        map.insert("is_detail".to_string(), json!(1));
        map.insert(
            "account_name".to_string(),
            json!(format!("• {}", row.row.display_name)),
        );
    }
    if row.row.warn_if_negative {
        map.insert("warn_if_negative".to_string(), json!(1));
    }
    if matches!(row.row.source, RowSource::BlankLine) {
        map.insert("is_blank_line".to_string(), json!(1));
    }
    if let Some(fieldtype) = &row.row.fieldtype {
        map.insert("fieldtype".to_string(), json!(fieldtype));
    }
    if let Some(color) = &row.row.color {
        map.insert("color".to_string(), json!(color));
    }
    if let RowSource::AccountData { account_filter, .. } = &row.row.source {
        if !account_filter.is_null() {
            map.insert(
                "account_filters".to_string(),
                json!(account_filter.to_string()),
            );
        }
    }
}

fn segment_info(total_segments: usize, period_keys: &[String]) -> serde_json::Value {
    json!({ "total_segments": total_segments, "period_keys": period_keys })
}

fn format_flat(sections: &[Section], ctx: &ReportContext<'_>) -> Vec<ReportRow> {
    let period_keys = ctx.period_keys();
    let info = segment_info(1, &period_keys);
    let mut rows = Vec::new();
    for section in sections {
        for segment in &section.segments {
            for row in &segment.rows {
                let mut map = row_value_map(row, ctx);
                apply_formatting(&mut map, row);
                map.insert("_segment_info".to_string(), info.clone());
                rows.push(map);
            }
        }
    }
    rows
}

/// Side-by-side renderer: one output row per vertical position, each
/// segment's cells prefixed `seg_<i>_`. Positions a segment does not reach
/// are filled with empty cells.
fn format_segmented(
    sections: &[Section],
    ctx: &ReportContext<'_>,
    total_segments: usize,
) -> Vec<ReportRow> {
    let period_keys = ctx.period_keys();
    let info = segment_info(total_segments, &period_keys);
    let with_total = ctx.filters.accumulated_values == Some(false);
    let mut rows = Vec::new();

    for section in sections {
        let height = section
            .segments
            .iter()
            .map(|segment| segment.rows.len())
            .max()
            .unwrap_or(0);
        for position in 0..height {
            let mut out = ReportRow::new();
            for (i, segment) in section.segments.iter().enumerate() {
                let prefix = format!("seg_{}_", i);
                match segment.rows.get(position) {
                    Some(row) => {
                        let mut cell = row_value_map(row, ctx);
                        apply_formatting(&mut cell, row);
                        for (key, value) in cell {
                            out.insert(format!("{}{}", prefix, key), value);
                        }
                    }
                    None => {
                        out.insert(format!("{}account", prefix), json!(""));
                        out.insert(format!("{}account_name", prefix), json!(""));
                        for key in &period_keys {
                            out.insert(format!("{}{}", prefix, key), json!(""));
                        }
                        if with_total {
                            out.insert(format!("{}total", prefix), json!(""));
                        }
                    }
                }
            }
            out.insert("_segment_info".to_string(), info.clone());
            rows.push(out);
        }
    }
    rows
}

fn account_column(fieldname: &str, label: &str) -> Column {
    Column {
        fieldname: fieldname.to_string(),
        label: label.to_string(),
        fieldtype: "Data".to_string(),
        options: None,
        width: 300,
        align: Some("left".to_string()),
        hidden: false,
    }
}

fn currency_column(fieldname: &str) -> Column {
    Column {
        fieldname: fieldname.to_string(),
        label: "Currency".to_string(),
        fieldtype: "Link".to_string(),
        options: Some("Currency".to_string()),
        width: 100,
        align: None,
        hidden: true,
    }
}

fn period_column(fieldname: &str, label: &str) -> Column {
    Column {
        fieldname: fieldname.to_string(),
        label: label.to_string(),
        fieldtype: "Currency".to_string(),
        options: Some("currency".to_string()),
        width: 150,
        align: None,
        hidden: false,
    }
}

fn build_columns(
    ctx: &ReportContext<'_>,
    sections: &[Section],
    total_segments: usize,
) -> Vec<Column> {
    let with_total = ctx.filters.accumulated_values == Some(false);
    let mut columns = Vec::new();

    if total_segments <= 1 {
        columns.push(account_column("account", "Account"));
        columns.push(currency_column("currency"));
        for period in &ctx.periods {
            columns.push(period_column(&period.key, &period.label));
        }
        if with_total {
            columns.push(period_column("total", "Total"));
        }
        return columns;
    }

    for i in 0..total_segments {
        // Labels come from the first section that labels this position.
        let label = sections.iter().find_map(|section| {
            section
                .segments
                .get(i)
                .and_then(|segment| segment.label.clone())
        });
        let prefix = format!("seg_{}_", i);
        let account_label = label
            .clone()
            .unwrap_or_else(|| format!("Account (Segment {})", i + 1));
        columns.push(account_column(&format!("{}account", prefix), &account_label));
        columns.push(currency_column(&format!("{}currency", prefix)));
        for period in &ctx.periods {
            let period_label = match &label {
                Some(segment_label) => format!("{} - {}", segment_label, period.label),
                None => period.label.clone(),
            };
            columns.push(period_column(
                &format!("{}{}", prefix, period.key),
                &period_label,
            ));
        }
        if with_total {
            let total_label = match &label {
                Some(segment_label) => format!("{} - Total", segment_label),
                None => "Total".to_string(),
            };
            columns.push(period_column(&format!("{}total", prefix), &total_label));
        }
    }
    columns
}
