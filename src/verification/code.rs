//! Numeric verification code generation.

use rand::Rng;

/// Number of digits in every issued code.
pub const CODE_LENGTH: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Generate a zero-padded 6-digit code.
///
/// `gen_range` samples uniformly (rejection sampling, no modulo bias) from
/// the OS-seeded thread RNG, so each of the 10^6 codes is equally likely.
pub fn generate_code() -> String {
    let n = rand::thread_rng().gen_range(0..CODE_SPACE);
    format!("{n:0width$}", width = CODE_LENGTH)
}

/// Whether `code` has the shape of an issued code.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}
