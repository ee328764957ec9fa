use std::ops::RangeInclusive;
use std::time::Duration;

/// Characters EPICS record names may contain besides ASCII alphanumerics.
const CHANNEL_PUNCTUATION: &[char] = &['_', '-', ':', '.', '[', ']', '<', '>', ';', '{', '}', '$'];

/// Validates if a given string is a usable EPICS channel name (or a fragment
/// of one, such as a prefix or an attribute name).
///
/// # Arguments
///
/// * `name` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the name only contains characters allowed in record names.
/// * `Err(&'static str)` if the name is empty or contains whitespace or other
///   characters Channel Access would not resolve.
pub fn is_valid_channel_fragment(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || CHANNEL_PUNCTUATION.contains(&c))
    {
        Ok(())
    } else {
        Err("Channel name contains characters not allowed in EPICS record names")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string has content other than whitespace.
pub fn is_not_blank(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates that a timeout is non-zero.
pub fn is_positive_duration(value: Duration) -> Result<(), &'static str> {
    if value.is_zero() {
        Err("Duration must be greater than zero")
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_fragments() {
        assert!(is_valid_channel_fragment("DET:").is_ok());
        assert!(is_valid_channel_fragment("PIMEGA:cam1:NumExposures_RBV").is_ok());
        assert!(is_valid_channel_fragment("").is_err());
        assert!(is_valid_channel_fragment("DET: ").is_err());
        assert!(is_valid_channel_fragment("DET\t").is_err());
    }

    #[test]
    fn ranges() {
        assert!(is_in_range(5, 1..=10).is_ok());
        assert!(is_in_range(0, 1..=10).is_err());
        assert!(is_in_range(0.5, 0.0..=1.0).is_ok());
    }

    #[test]
    fn blanks_and_durations() {
        assert!(is_not_blank("  ").is_err());
        assert!(is_not_blank("DET:").is_ok());
        assert!(is_positive_duration(Duration::ZERO).is_err());
        assert!(is_positive_duration(Duration::from_millis(1)).is_ok());
    }
}
