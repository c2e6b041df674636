use crate::formula::extract_references;
use crate::schema::{RowSource, TemplateRow};
use log::warn;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Topological order over the template's formula rows (indices into the row
/// list). Rows whose formulas reference another formula row's code are
/// computed after it; ties keep template order. Rows trapped in a reference
/// cycle are appended in template order, so evaluation still visits every
/// row exactly once.
pub fn calculation_order(rows: &[TemplateRow]) -> Vec<usize> {
    let formula_rows: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| matches!(row.source, RowSource::CalculatedAmount { .. }))
        .map(|(index, _)| index)
        .collect();

    let code_to_row: BTreeMap<&str, usize> = formula_rows
        .iter()
        .filter_map(|&index| {
            rows[index]
                .reference_code
                .as_deref()
                .map(|code| (code, index))
        })
        .collect();

    let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut in_degree: BTreeMap<usize, usize> =
        formula_rows.iter().map(|&index| (index, 0)).collect();

    for &index in &formula_rows {
        if let RowSource::CalculatedAmount { formula } = &rows[index].source {
            let mut seen = BTreeSet::new();
            for reference in extract_references(formula) {
                if let Some(&dep_index) = code_to_row.get(reference.as_str()) {
                    // A self-reference counts as a cycle of one.
                    if seen.insert(dep_index) {
                        dependents.entry(dep_index).or_default().push(index);
                        *in_degree.entry(index).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    let mut queue: VecDeque<usize> = formula_rows
        .iter()
        .copied()
        .filter(|index| in_degree[index] == 0)
        .collect();
    let mut order = Vec::with_capacity(formula_rows.len());

    while let Some(index) = queue.pop_front() {
        order.push(index);
        if let Some(children) = dependents.get(&index) {
            for &child in children {
                let degree = in_degree.entry(child).or_insert(1);
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() < formula_rows.len() {
        let placed: BTreeSet<usize> = order.iter().copied().collect();
        let leftovers: Vec<usize> = formula_rows
            .iter()
            .copied()
            .filter(|index| !placed.contains(index))
            .collect();
        let codes: Vec<&str> = leftovers
            .iter()
            .map(|&index| rows[index].reference_code.as_deref().unwrap_or("<unnamed>"))
            .collect();
        warn!(
            "Circular formula dependencies involve [{}]; those rows fall back to template order",
            codes.join(", ")
        );
        order.extend(leftovers);
    }

    order
}

/// Full processing order for a template: external API rows first, then
/// ledger-backed rows, then formulas in dependency order, then structural
/// rows. Display order is restored separately after computation.
pub fn processing_order(rows: &[TemplateRow]) -> Vec<usize> {
    let mut order = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        if matches!(row.source, RowSource::CustomApi { .. }) {
            order.push(index);
        }
    }
    for (index, row) in rows.iter().enumerate() {
        if matches!(row.source, RowSource::AccountData { .. }) {
            order.push(index);
        }
    }
    order.extend(calculation_order(rows));
    for (index, row) in rows.iter().enumerate() {
        if row.source.is_structural() {
            order.push(index);
        }
    }
    order
}
