use crate::models::NormalizedKey;

/// Number of trailing digits replaced when no width is configured
pub const DEFAULT_COARSEN_DIGITS: usize = 3;

/// Digit written in place of each coarsened position
const PLACEHOLDER_DIGIT: char = '0';

/// Coarsen a postal code by replacing its lowest-order digits with zeros
///
/// Non-digit characters (hyphens, dots, whitespace) are dropped first so that
/// `01422-123` and `01422123` land on the same key. Codes with no more digits
/// than `coarsen_digits` collapse to all zeros.
///
/// # Arguments
/// * `postal_code` - Raw postal code as stored
/// * `coarsen_digits` - How many trailing digits to zero out
pub fn normalize_postal_code(postal_code: &str, coarsen_digits: usize) -> NormalizedKey {
    let digits: Vec<char> = postal_code.chars().filter(char::is_ascii_digit).collect();
    let keep = digits.len().saturating_sub(coarsen_digits);

    let key: String = digits[..keep]
        .iter()
        .copied()
        .chain(std::iter::repeat(PLACEHOLDER_DIGIT).take(digits.len() - keep))
        .collect();

    NormalizedKey::new_unchecked(key)
}

/// Normalizer bound to a configured coarsening width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostalCodeNormalizer {
    coarsen_digits: usize,
}

impl PostalCodeNormalizer {
    pub fn new(coarsen_digits: usize) -> Self {
        Self { coarsen_digits }
    }

    pub fn coarsen_digits(&self) -> usize {
        self.coarsen_digits
    }

    #[inline]
    pub fn normalize(&self, postal_code: &str) -> NormalizedKey {
        normalize_postal_code(postal_code, self.coarsen_digits)
    }
}

impl Default for PostalCodeNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COARSEN_DIGITS)
    }
}
