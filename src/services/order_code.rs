use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

const CODE_PREFIX: &str = "TRG";
const TIMESTAMP_DIGITS: i64 = 100_000_000;
const RANDOM_SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^TRG-\d{8}-[A-Z0-9]{6}$").expect("valid order code pattern"));

/// Produces human-shareable order codes: the low-order 8 digits of the
/// current epoch-millisecond timestamp plus 6 random base-36 characters.
/// No external state is consulted; the store's unique index on `code` is
/// the backstop for the astronomically rare collision, and the caller
/// retries generation on conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderCodeGenerator;

impl OrderCodeGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self) -> String {
        let timestamp_suffix = (Utc::now().timestamp_millis() % TIMESTAMP_DIGITS).unsigned_abs();

        let mut rng = rand::thread_rng();
        let random: String = (0..RANDOM_SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();

        format!("{CODE_PREFIX}-{timestamp_suffix:08}-{random}")
    }
}

/// Whether a string has the shape of an order code. Used to short-circuit
/// store lookups for obviously malformed input.
pub fn is_valid_code(code: &str) -> bool {
    CODE_PATTERN.is_match(code)
}
