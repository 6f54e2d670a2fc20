//! Small validation helpers shared by the configuration layer.
//!
//! Each helper returns `Err(&'static str)` with a fixed message; callers attach the
//! field name when turning it into an `IngestError::Configuration`.

use std::ops::RangeInclusive;

/// Validates that a value is a nonzero power of two.
///
/// Ring and chunk capacities must satisfy this so that wraparound can be computed
/// with a bitwise AND against `capacity - 1`.
///
/// # Arguments
///
/// * `value` - The value to validate.
///
/// # Returns
///
/// * `Ok(())` if the value is a power of two.
/// * `Err(&'static str)` otherwise.
pub fn is_power_of_two(value: u32) -> Result<(), &'static str> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err("Value must be a nonzero power of two")
    }
}

/// Validates that `value` is an exact multiple of `divisor`.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `divisor` - The required factor. A zero divisor is always rejected.
///
/// # Returns
///
/// * `Ok(())` if `value % divisor == 0`.
/// * `Err(&'static str)` otherwise.
pub fn is_multiple_of(value: u32, divisor: u32) -> Result<(), &'static str> {
    if divisor == 0 {
        return Err("Divisor cannot be zero");
    }
    if value % divisor == 0 {
        Ok(())
    } else {
        Err("Value must be an exact multiple of the divisor")
    }
}

/// Validates that a count is greater than zero.
pub fn is_nonzero(value: u64) -> Result<(), &'static str> {
    if value > 0 {
        Ok(())
    } else {
        Err("Value must be greater than 0")
    }
}

/// Validates if a given string is a valid file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powers_of_two() {
        assert!(is_power_of_two(1).is_ok());
        assert!(is_power_of_two(256).is_ok());
        assert!(is_power_of_two(4096).is_ok());
        assert!(is_power_of_two(0).is_err());
        assert!(is_power_of_two(0x3FFF >> 2).is_err());
        assert!(is_power_of_two(300).is_err());
    }

    #[test]
    fn multiples() {
        assert!(is_multiple_of(1024, 256).is_ok());
        assert!(is_multiple_of(256, 256).is_ok());
        assert!(is_multiple_of(128, 256).is_err());
        assert!(is_multiple_of(256, 0).is_err());
    }

    #[test]
    fn paths() {
        assert!(is_valid_path("samples.bin").is_ok());
        assert!(is_valid_path("").is_err());
        assert!(is_valid_path("bad\0path").is_err());
    }

    #[test]
    fn ranges() {
        assert!(is_in_range(10u32, 1..=60_000).is_ok());
        assert!(is_in_range(0u32, 1..=60_000).is_err());
        assert!(is_nonzero(0).is_err());
        assert!(is_nonzero(2560).is_ok());
    }
}
