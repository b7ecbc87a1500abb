use fixed::types::I80F48;
use marginfi_risk_types::constants::EXP_10_I80F48;

use crate::{math_error, RiskResult};

const SHORT_ADDRESS_HEAD: usize = 6;
const SHORT_ADDRESS_TAIL: usize = 4;

const HOURS_PER_YEAR: f64 = 365.25 * 24.0;
const APY_CAP: f64 = 3.0;

pub trait NumTraitsWithTolerance<T> {
    fn is_zero_with_tolerance(&self, t: T) -> bool;
    fn is_positive_with_tolerance(&self, t: T) -> bool;
}

impl<T> NumTraitsWithTolerance<T> for I80F48
where
    I80F48: PartialOrd<T>,
{
    fn is_zero_with_tolerance(&self, t: T) -> bool {
        self.abs() < t
    }

    fn is_positive_with_tolerance(&self, t: T) -> bool {
        self.gt(&t)
    }
}

/// `AbCdEf...WxYz`. Anything too short to elide is returned as is.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= SHORT_ADDRESS_HEAD + SHORT_ADDRESS_TAIL {
        return address.to_string();
    }

    let head: String = chars[..SHORT_ADDRESS_HEAD].iter().collect();
    let tail: String = chars[chars.len() - SHORT_ADDRESS_TAIL..].iter().collect();

    format!("{head}...{tail}")
}

/// Drops the `None` entries, keeping the order of the rest.
pub fn shake_undefined_item<T>(items: Vec<Option<T>>) -> Vec<T> {
    items.into_iter().flatten().collect()
}

#[inline]
pub fn exp_10(decimals: u8) -> RiskResult<I80F48> {
    EXP_10_I80F48
        .get(decimals as usize)
        .copied()
        .ok_or_else(math_error!())
}

/// UI amount to native units, rounded down.
pub fn ui_to_native(amount: I80F48, decimals: u8) -> RiskResult<u64> {
    let native = amount
        .checked_mul(exp_10(decimals)?)
        .ok_or_else(math_error!())?
        .floor();

    native.checked_to_num::<u64>().ok_or_else(math_error!())
}

pub fn native_to_ui(amount: I80F48, decimals: u8) -> RiskResult<I80F48> {
    amount
        .checked_div(exp_10(decimals)?)
        .ok_or_else(math_error!())
}

/// Hourly compounded APY, capped at 300%.
pub fn apr_to_apy(apr: f64) -> f64 {
    let apy = (1.0 + apr / HOURS_PER_YEAR).powf(HOURS_PER_YEAR) - 1.0;
    apy.min(APY_CAP)
}

/// Compact number rendering: `0`, `< 0.01`, or two decimals with a k/m/b/t suffix.
pub fn clamped_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value < 0.01 {
        return "< 0.01".to_string();
    }

    let (scaled, suffix) = match value.abs() {
        v if v >= 1e12 => (value / 1e12, "t"),
        v if v >= 1e9 => (value / 1e9, "b"),
        v if v >= 1e6 => (value / 1e6, "m"),
        v if v >= 1e3 => (value / 1e3, "k"),
        _ => (value, ""),
    };

    format!("{scaled:.2}{suffix}")
}

/// `0.1234` -> `12.34%`
pub fn percent_formatter(value: f64) -> String {
    if value == 0.0 {
        return "0%".to_string();
    }

    let percent = value * 100.0;
    let grouped = group_thousands(&format!("{:.2}", percent.abs()));
    if percent < 0.0 {
        format!("-{grouped}%")
    } else {
        format!("{grouped}%")
    }
}

fn group_thousands(formatted: &str) -> String {
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted, ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if frac_part.is_empty() {
        grouped
    } else {
        format!("{grouped}.{frac_part}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_macro::types::I80F48;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T", "4Nd1mB...DB4T")]
    #[test_case("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "EPjFWd...Dt1v")]
    #[test_case("0123456789", "0123456789")]
    #[test_case("", "")]
    fn shortens_addresses(input: &str, expected: &str) {
        assert_eq!(short_address(input), expected);
    }

    #[test]
    fn shake_keeps_order_of_defined_items() {
        let shaken = shake_undefined_item(vec![Some(3), None, Some(1), None, None, Some(2)]);
        assert_eq!(shaken, vec![3, 1, 2]);

        let empty: Vec<u8> = shake_undefined_item(vec![None, None]);
        assert!(empty.is_empty());
    }

    #[test]
    fn native_amount_conversions() {
        assert_eq!(ui_to_native(I80F48!(1.5), 6).unwrap(), 1_500_000);
        assert_eq!(ui_to_native(I80F48!(0.0000019), 6).unwrap(), 1);
        assert_eq!(native_to_ui(I80F48!(2_500_000_000), 9).unwrap(), I80F48!(2.5));
        assert!(exp_10(30).is_err());
    }

    #[test]
    fn apy_is_capped() {
        assert!((apr_to_apy(0.1) - 0.10517).abs() < 0.0001);
        assert_eq!(apr_to_apy(5.0), 3.0);
        assert_eq!(apr_to_apy(0.0), 0.0);
    }

    #[test_case(0.0, "0")]
    #[test_case(0.005, "< 0.01")]
    #[test_case(12.346, "12.35")]
    #[test_case(1_230.0, "1.23k")]
    #[test_case(2_500_000.0, "2.50m")]
    fn clamps_numbers(value: f64, expected: &str) {
        assert_eq!(clamped_number(value), expected);
    }

    #[test_case(0.0, "0%")]
    #[test_case(0.1234, "12.34%")]
    #[test_case(-0.05, "-5.00%")]
    #[test_case(25.0, "2,500.00%")]
    fn formats_percentages(value: f64, expected: &str) {
        assert_eq!(percent_formatter(value), expected);
    }
}
