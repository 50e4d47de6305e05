/// Luhn checksum validation for order numbers.
///
/// An order number is accepted only if it is a non-empty string of digits
/// whose Luhn checksum is zero.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let parity = number.len() % 2;
    let mut sum = 0u32;

    for (i, ch) in number.chars().enumerate() {
        let mut digit = match ch.to_digit(10) {
            Some(d) => d,
            None => return false,
        };

        if i % 2 == parity {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_numbers() {
        assert!(is_valid("79927398713"));
        assert!(is_valid("4561261212345467"));
        assert!(is_valid("2377225624"));
    }

    #[test]
    fn test_invalid_checksum() {
        assert!(!is_valid("79927398710"));
        assert!(!is_valid("1234567890"));
    }

    #[test]
    fn test_non_digit_input() {
        assert!(!is_valid("7992739871a"));
        assert!(!is_valid("79 927398713"));
        assert!(!is_valid("-9927398713"));
    }

    #[test]
    fn test_empty_input() {
        assert!(!is_valid(""));
    }
}
