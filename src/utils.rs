/// Decimal places used when rounding monetary results for display.
pub const CURRENCY_PRECISION: u32 = 2;

pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

pub fn round_currency(value: f64) -> f64 {
    round_to(value, CURRENCY_PRECISION)
}

/// SQL-style LIKE matching: `%` matches any run of characters, `_` matches
/// exactly one. Case-insensitive, as ledger backends collate account
/// attributes case-insensitively.
pub fn sql_like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            // Backtrack: let the last % swallow one more character
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }

    pi == p.len()
}
