//! vi-VN number and date rendering used in reports, exports and emails.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use num_traits::Zero;

const FRACTION_DIGITS: usize = 3;

/// Formats like `Number.toLocaleString("vi-VN")`: `.` groups thousands, `,`
/// separates at most three fraction digits.
pub fn format_number(amount: &BigDecimal) -> String {
    let rounded = amount.round(FRACTION_DIGITS as i64);
    let negative = rounded < BigDecimal::zero();
    let (digits, _) = rounded
        .abs()
        .with_scale(FRACTION_DIGITS as i64)
        .as_bigint_and_exponent();

    let padded = format!("{:0>width$}", digits.to_string(), width = FRACTION_DIGITS + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - FRACTION_DIGITS);
    let frac_part = frac_part.trim_end_matches('0');

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if !frac_part.is_empty() {
        out.push(',');
        out.push_str(frac_part);
    }
    out
}

pub fn format_vnd(amount: &BigDecimal) -> String {
    format!("{}đ", format_number(amount))
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

/// `d/m/yyyy`, the vi-VN short date.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%-d/%-m/%Y").to_string()
}

/// The vi-VN date made safe for a file name.
pub fn file_date(date: NaiveDate) -> String {
    format_date(date).replace('/', "-")
}
