use crate::error::{ReportError, Result};
use crate::ledger::Account;
use crate::utils::sql_like_match;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    NotLike,
    In,
    NotIn,
}

impl FilterOperator {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "=" | "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "like" => Ok(Self::Like),
            "not like" => Ok(Self::NotLike),
            "in" => Ok(Self::In),
            "not in" => Ok(Self::NotIn),
            other => Err(ReportError::FilterExpression(format!(
                "unknown operator '{}'",
                other
            ))),
        }
    }
}

/// Parsed account-filter tree: `[field, operator, value]` leaves combined by
/// `and`/`or` nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountFilter {
    Leaf {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    All(Vec<AccountFilter>),
    Any(Vec<AccountFilter>),
}

impl AccountFilter {
    /// Parses an authored filter value. `null` and blank strings mean "no
    /// filter" (`Ok(None)`); a JSON string holding a tree is unwrapped once;
    /// structural mistakes (wrong leaf arity, unknown operator, non-array
    /// children) are errors, which callers turn into a skipped row.
    pub fn parse(raw: &Value) -> Result<Option<AccountFilter>> {
        match raw {
            Value::Null => Ok(None),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => {
                let inner: Value = serde_json::from_str(text.trim()).map_err(|e| {
                    ReportError::FilterExpression(format!("filter is not valid JSON: {}", e))
                })?;
                Self::parse_tree(&inner).map(Some)
            }
            other => Self::parse_tree(other).map(Some),
        }
    }

    fn parse_tree(value: &Value) -> Result<AccountFilter> {
        match value {
            Value::Array(items) => {
                if items.len() != 3 {
                    return Err(ReportError::FilterExpression(format!(
                        "leaf must be [field, operator, value], got {} element(s)",
                        items.len()
                    )));
                }
                let field = items[0].as_str().ok_or_else(|| {
                    ReportError::FilterExpression("leaf field must be a string".to_string())
                })?;
                let operator = items[1].as_str().ok_or_else(|| {
                    ReportError::FilterExpression("leaf operator must be a string".to_string())
                })?;
                Ok(AccountFilter::Leaf {
                    field: field.to_string(),
                    operator: FilterOperator::parse(operator)?,
                    value: items[2].clone(),
                })
            }
            Value::Object(map) => {
                let (combinator, children) = if let Some(children) = map.get("and") {
                    ("and", children)
                } else if let Some(children) = map.get("or") {
                    ("or", children)
                } else {
                    // No recognized combinator: contributes no constraint.
                    return Ok(AccountFilter::All(Vec::new()));
                };
                let items = children.as_array().ok_or_else(|| {
                    ReportError::FilterExpression(format!(
                        "'{}' children must be an array",
                        combinator
                    ))
                })?;
                let parsed = items
                    .iter()
                    .map(Self::parse_tree)
                    .collect::<Result<Vec<_>>>()?;
                Ok(match combinator {
                    "and" => AccountFilter::All(parsed),
                    _ => AccountFilter::Any(parsed),
                })
            }
            // Scalars in tree position contribute no constraint.
            _ => Ok(AccountFilter::All(Vec::new())),
        }
    }

    /// Drops leaves with a null value or a field unknown to the account
    /// universe, then collapses nodes left without children. `None` means
    /// the whole tree pruned away.
    pub fn prune(self, known_fields: &BTreeSet<String>) -> Option<AccountFilter> {
        match self {
            AccountFilter::Leaf { field, value, .. }
                if value.is_null() || !known_fields.contains(&field) =>
            {
                None
            }
            leaf @ AccountFilter::Leaf { .. } => Some(leaf),
            AccountFilter::All(children) => {
                let kept: Vec<AccountFilter> = children
                    .into_iter()
                    .filter_map(|child| child.prune(known_fields))
                    .collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(AccountFilter::All(kept))
                }
            }
            AccountFilter::Any(children) => {
                let kept: Vec<AccountFilter> = children
                    .into_iter()
                    .filter_map(|child| child.prune(known_fields))
                    .collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(AccountFilter::Any(kept))
                }
            }
        }
    }

    pub fn matches(&self, account: &Account) -> bool {
        match self {
            AccountFilter::Leaf {
                field,
                operator,
                value,
            } => leaf_matches(account, field, *operator, value),
            AccountFilter::All(children) => children.iter().all(|child| child.matches(account)),
            AccountFilter::Any(children) => children.iter().any(|child| child.matches(account)),
        }
    }
}

/// Field names the predicates can constrain: the fixed account columns plus
/// every attribute key present anywhere in the universe. Computed per
/// execution, never cached process-wide.
pub fn known_fields(accounts: &[Account]) -> BTreeSet<String> {
    let mut fields: BTreeSet<String> = ["name", "account_name", "account_number", "company"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for account in accounts {
        fields.extend(account.attributes.keys().cloned());
    }
    fields
}

/// Parse, prune against the universe, and select the matching accounts.
/// An absent or fully pruned tree selects no accounts.
pub fn select_accounts<'a>(raw: &Value, universe: &'a [Account]) -> Result<Vec<&'a Account>> {
    let parsed = match AccountFilter::parse(raw)? {
        Some(filter) => filter,
        None => return Ok(Vec::new()),
    };
    let known = known_fields(universe);
    let pruned = match parsed.prune(&known) {
        Some(filter) => filter,
        None => return Ok(Vec::new()),
    };
    Ok(universe
        .iter()
        .filter(|account| pruned.matches(account))
        .collect())
}

fn leaf_matches(account: &Account, field: &str, operator: FilterOperator, expected: &Value) -> bool {
    // Missing attribute: every comparison is false, SQL NULL style.
    let actual = match account.attribute(field) {
        Some(value) if !value.is_null() => value,
        _ => return false,
    };

    match operator {
        FilterOperator::Eq => json_eq(&actual, expected),
        FilterOperator::Ne => !json_eq(&actual, expected),
        FilterOperator::Gt => json_cmp(&actual, expected) == Some(std::cmp::Ordering::Greater),
        FilterOperator::Lt => json_cmp(&actual, expected) == Some(std::cmp::Ordering::Less),
        FilterOperator::Ge => matches!(
            json_cmp(&actual, expected),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
        FilterOperator::Le => matches!(
            json_cmp(&actual, expected),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ),
        FilterOperator::Like => {
            sql_like_match(&auto_wildcard(&value_text(expected)), &value_text(&actual))
        }
        FilterOperator::NotLike => {
            !sql_like_match(&auto_wildcard(&value_text(expected)), &value_text(&actual))
        }
        FilterOperator::In => expected
            .as_array()
            .map(|items| items.iter().any(|item| json_eq(&actual, item)))
            .unwrap_or(false),
        FilterOperator::NotIn => expected
            .as_array()
            .map(|items| !items.iter().any(|item| json_eq(&actual, item)))
            .unwrap_or(false),
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn json_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Bare patterns get wrapped in `%...%`; patterns already carrying a
/// wildcard are used as written.
fn auto_wildcard(pattern: &str) -> String {
    if pattern.contains('%') {
        pattern.to_string()
    } else {
        format!("%{}%", pattern)
    }
}
