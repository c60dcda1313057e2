//! Phone number normalization for pairing-code logins.

use crate::error::PhoneNumberError;

/// Shortest number accepted once formatting characters are stripped.
pub const MIN_PHONE_DIGITS: usize = 7;

/// Strip everything but ASCII digits and check the result is usable.
///
/// No country-code inference happens: the number must already be in
/// international format, so a leading `0` is rejected.
pub fn normalize(raw: &str) -> Result<String, PhoneNumberError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(PhoneNumberError::InvalidFormat);
    }
    if digits.starts_with('0') {
        return Err(PhoneNumberError::LeadingZero);
    }
    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_international_number() {
        assert_eq!(normalize("+1 (234) 5550123").unwrap(), "12345550123");
    }

    #[test]
    fn test_leading_zero_rejected() {
        assert_eq!(normalize("0234555"), Err(PhoneNumberError::LeadingZero));
        assert_eq!(normalize("(0) 234-5550"), Err(PhoneNumberError::LeadingZero));
    }

    #[test]
    fn test_short_numbers_rejected() {
        for raw in ["123", "", "+-()", "12a34b56", "012345"] {
            assert_eq!(
                normalize(raw),
                Err(PhoneNumberError::InvalidFormat),
                "input {raw:?}"
            );
        }
    }

    #[test]
    fn test_exactly_seven_digits_accepted() {
        assert_eq!(normalize("1-234-567").unwrap(), "1234567");
    }

    #[test]
    fn test_non_ascii_digits_are_stripped() {
        // Arabic-Indic digits are not accepted as digits.
        assert_eq!(normalize("١٢٣٤٥٦٧"), Err(PhoneNumberError::InvalidFormat));
    }

    #[test]
    fn test_messages_are_distinct() {
        assert_ne!(
            PhoneNumberError::InvalidFormat.to_string(),
            PhoneNumberError::LeadingZero.to_string()
        );
    }
}
