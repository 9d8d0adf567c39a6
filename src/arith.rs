use thiserror::Error;

/// Failure of a checked 64-bit signed division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DivisionError {
    #[error("division by zero")]
    DivideByZero,

    #[error("division overflow")]
    Overflow,
}

/// Divides `x` by `y` without trapping on a zero divisor or `i64::MIN / -1`.
pub fn div64(x: i64, y: i64) -> Result<i64, DivisionError> {
    if y == 0 {
        return Err(DivisionError::DivideByZero);
    }
    x.checked_div(y).ok_or(DivisionError::Overflow)
}

/// Remainder of `x / y` with the same failure cases as [`div64`].
pub fn mod64(x: i64, y: i64) -> Result<i64, DivisionError> {
    if y == 0 {
        return Err(DivisionError::DivideByZero);
    }
    x.checked_rem(y).ok_or(DivisionError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_div64_truncates_toward_zero() {
        assert_eq!(div64(7, 2), Ok(3));
        assert_eq!(div64(-7, 2), Ok(-3));
        assert_eq!(div64(i64::MAX, 1), Ok(i64::MAX));
    }

    #[test]
    fn test_div64_errors() {
        assert_eq!(div64(1, 0), Err(DivisionError::DivideByZero));
        assert_eq!(div64(i64::MIN, -1), Err(DivisionError::Overflow));
        assert_eq!(div64(i64::MIN, 1), Ok(i64::MIN));
    }

    #[test]
    fn test_mod64() {
        assert_eq!(mod64(7, 3), Ok(1));
        assert_eq!(mod64(-7, 3), Ok(-1));
        assert_eq!(mod64(7, 0), Err(DivisionError::DivideByZero));
        assert_eq!(mod64(i64::MIN, -1), Err(DivisionError::Overflow));
    }
}
