use std::sync::LazyLock;

use regex::Regex;

static NON_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\D").expect("valid regex"));

/// Country prefix and national number length accepted for lead phones.
#[derive(Debug, Clone, Copy)]
pub struct PhoneRules {
    pub country_code: &'static str,
    pub national_digits: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        // Spain
        Self {
            country_code: "34",
            national_digits: 9,
        }
    }
}

/// Canonical `+<country><digits>` form, or `None` when the input does not
/// carry exactly one national number.
pub fn normalize_phone(raw: &str, rules: PhoneRules) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits = NON_DIGITS.replace_all(trimmed, "");
    let mut national: &str = &digits;
    if let Some(rest) = national.strip_prefix("00") {
        national = rest;
    }
    if national.len() > rules.national_digits {
        if let Some(rest) = national.strip_prefix(rules.country_code) {
            national = rest;
        }
    }

    if national.len() != rules.national_digits {
        return None;
    }

    Some(format!("+{}{}", rules.country_code, national))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_spanish_inputs() {
        let rules = PhoneRules::default();
        assert_eq!(normalize_phone("612 345 678", rules).as_deref(), Some("+34612345678"));
        assert_eq!(normalize_phone("+34 612-345-678", rules).as_deref(), Some("+34612345678"));
        assert_eq!(normalize_phone("0034612345678", rules).as_deref(), Some("+34612345678"));
    }

    #[test]
    fn rejects_wrong_digit_counts() {
        let rules = PhoneRules::default();
        assert_eq!(normalize_phone("", rules), None);
        assert_eq!(normalize_phone("12345", rules), None);
        assert_eq!(normalize_phone("+34 612 345 6789", rules), None);
    }

    #[test]
    fn national_number_starting_with_country_digits_is_kept() {
        // 9 digits that happen to begin with "34" are a national number, not a prefix
        let rules = PhoneRules::default();
        assert_eq!(normalize_phone("341234567", rules).as_deref(), Some("+34341234567"));
    }
}
