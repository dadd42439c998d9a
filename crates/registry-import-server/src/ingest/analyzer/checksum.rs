//! Business identifier check digit
//!
//! Identifiers are left-padded with zeros to eight digits. The last digit is
//! the check digit; the others are weighted `1..=10` by position and summed
//! modulo 11. A remainder of 10 triggers a second pass with weights shifted
//! by two. A final remainder of 10 is accepted for any check digit.

const MIN_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Valid,
    NotNumeric,
    Mismatch,
}

pub fn verify(stat_id: &str) -> ChecksumOutcome {
    let stat_id = stat_id.trim();
    let digits: Option<Vec<u32>> = stat_id.chars().map(|c| c.to_digit(10)).collect();
    let Some(mut digits) = digits.filter(|d| !d.is_empty()) else {
        return ChecksumOutcome::NotNumeric;
    };

    if digits.len() < MIN_LENGTH {
        let mut padded = vec![0; MIN_LENGTH - digits.len()];
        padded.append(&mut digits);
        digits = padded;
    }

    let Some((check, body)) = digits.split_last() else {
        return ChecksumOutcome::NotNumeric;
    };

    let mut remainder = weighted_remainder(body, 1);
    if remainder >= 10 {
        remainder = weighted_remainder(body, 3);
    }

    if remainder == *check || remainder == 10 {
        ChecksumOutcome::Valid
    } else {
        ChecksumOutcome::Mismatch
    }
}

fn weighted_remainder(body: &[u32], offset: u32) -> u32 {
    let sum: u32 = body
        .iter()
        .enumerate()
        .map(|(i, digit)| digit * ((i as u32 % 10) + offset))
        .sum();
    sum % 11
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifier() {
        // 1*1 + 2*2 + 3*3 + 4*4 + 5*5 + 6*6 + 7*7 = 140, 140 % 11 = 8
        assert_eq!(verify("12345678"), ChecksumOutcome::Valid);
        assert_eq!(verify("12345670"), ChecksumOutcome::Mismatch);
    }

    #[test]
    fn test_short_identifier_is_padded() {
        // 0000001 weighted: 1*7 = 7
        assert_eq!(verify("17"), ChecksumOutcome::Valid);
        assert_eq!(verify("18"), ChecksumOutcome::Mismatch);
    }

    #[test]
    fn test_second_pass_on_remainder_ten() {
        // 0000005 weighted: 5*7 = 35, 35 % 11 = 2; second pass not used
        assert_eq!(verify("52"), ChecksumOutcome::Valid);
        // 0000003 weighted: 3*7 = 21 % 11 = 10; second pass: 3*9 = 27 % 11 = 5
        assert_eq!(verify("35"), ChecksumOutcome::Valid);
        assert_eq!(verify("30"), ChecksumOutcome::Mismatch);
    }

    #[test]
    fn test_non_numeric() {
        assert_eq!(verify("12A45678"), ChecksumOutcome::NotNumeric);
        assert_eq!(verify(""), ChecksumOutcome::NotNumeric);
    }
}
