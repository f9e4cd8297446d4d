//! Contact-field validation shared by lead intake, consultation summaries and the
//! messaging client.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::LazyLock;

static KR_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^010-?\d{4}-?\d{4}$|^02-?\d{3,4}-?\d{4}$|^0\d{1,2}-?\d{3,4}-?\d{4}$")
        .expect("Korean phone pattern compiles")
});

// RFC 5322 simplified: local@domain.tld
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email pattern compiles")
});

/// Validate email address shape.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') {
        return false;
    }
    if !EMAIL.is_match(email) {
        tracing::warn!("❌ Invalid email format");
        return false;
    }
    true
}

/// Accepts domestic Korean numbers: mobile `010-xxxx-xxxx`, Seoul `02-xxx(x)-xxxx`
/// and regional `0xx-xxx(x)-xxxx`, with or without dashes.
pub fn is_valid_kr_phone(raw: &str) -> bool {
    KR_PHONE.is_match(raw.trim())
}

/// Strip everything that is not an ASCII digit.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a Korean phone number to E.164 (`+821012345678`).
///
/// Parsing goes through `phonenumber` first; numbers it rejects fall back to prefix
/// rules (`82…` gets a `+`, a leading trunk `0` is replaced by `+82`).
pub fn normalize_kr_phone(raw: &str) -> String {
    if let Ok(number) = phonenumber::parse(Some(CountryId::KR), raw) {
        if phonenumber::is_valid(&number) {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("✓ Valid KR phone normalized");
            return formatted;
        }
    }

    let digits = digits_only(raw);
    if digits.starts_with("82") {
        format!("+{}", digits)
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("+82{}", rest)
    } else {
        format!("+82{}", digits)
    }
}
