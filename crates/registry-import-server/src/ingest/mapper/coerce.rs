//! Invariant value coercion for mapped scalars
//!
//! Every function takes an already trimmed, non-empty value. Input that does
//! not parse yields `None`.

use chrono::{DateTime, NaiveDate};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"];

pub fn text(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn int(value: &str) -> Option<i32> {
    let value = value.trim();
    value.parse::<i32>().ok().or_else(|| {
        // "17.0" style exports from spreadsheets
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .filter(|f| *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
            .map(|f| f as i32)
    })
}

pub fn decimal(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn boolean(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

pub fn date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Split a list value such as `"100, 200;300"` into its items
pub fn list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

/// Canonical form of a path segment: lowercase without separators
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Canonical form of a dotted path
pub fn normalize_path(path: &str) -> String {
    path.split('.').map(normalize_key).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int() {
        assert_eq!(int("17"), Some(17));
        assert_eq!(int(" 17 "), Some(17));
        assert_eq!(int("17.0"), Some(17));
        assert_eq!(int("17.5"), None);
        assert_eq!(int("seventeen"), None);
        assert_eq!(int("1e20"), None);
    }

    #[test]
    fn test_decimal_is_invariant() {
        assert_eq!(decimal("1234.5"), Some(1234.5));
        assert_eq!(decimal("1234,5"), None);
        assert_eq!(decimal("NaN"), None);
    }

    #[test]
    fn test_boolean() {
        assert_eq!(boolean("TRUE"), Some(true));
        assert_eq!(boolean("0"), Some(false));
        assert_eq!(boolean("maybe"), None);
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 14);
        assert_eq!(date("2021-03-14"), expected);
        assert_eq!(date("14.03.2021"), expected);
        assert_eq!(date("03/14/2021"), expected);
        assert_eq!(date("2021-03-14T10:00:00Z"), expected);
        assert_eq!(date("14 March"), None);
    }

    #[test]
    fn test_list_splits_on_comma_and_semicolon() {
        let items: Vec<_> = list("100, 200;;300 ").collect();
        assert_eq!(items, vec!["100", "200", "300"]);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("ActivityCategory.Code"), "activitycategory.code");
        assert_eq!(normalize_path("activity_category.code"), "activitycategory.code");
        assert_eq!(normalize_key("Address-Part1"), "addresspart1");
    }
}
