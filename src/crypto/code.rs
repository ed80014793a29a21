use crate::error::{AppError, Result};
use rand::Rng;
use rand::rngs::OsRng;

/// The default code length.
pub const DEFAULT_CODE_LENGTH: usize = 4;
/// The default code alphabet: uppercase letters and digits.
pub const DEFAULT_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a code of `length` characters drawn uniformly from `alphabet`.
///
/// A zero length is clamped to one character; an empty alphabet yields an
/// empty string. Callers normally go through [`CodeFormat`], which rejects
/// both at construction.
pub fn generate(alphabet: &[u8], length: usize) -> String {
    if alphabet.is_empty() {
        return String::new();
    }

    let mut rng = OsRng;
    (0..length.max(1))
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// The fixed shape of a code, shared by the generator and the redeem-side
/// validator so the two cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFormat {
    alphabet: Vec<u8>,
    length: usize,
}

impl CodeFormat {
    /// Builds a format from an alphabet of uppercase ASCII letters and digits.
    ///
    /// # Arguments
    ///
    /// * `alphabet` - The allowed characters. Duplicates are dropped.
    /// * `length` - The exact code length, at least 1.
    pub fn new(alphabet: &str, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(AppError::Configuration(
                "code length must be at least 1".to_string(),
            ));
        }

        let mut chars: Vec<u8> = Vec::with_capacity(alphabet.len());
        for c in alphabet.chars() {
            if !(c.is_ascii_uppercase() || c.is_ascii_digit()) {
                return Err(AppError::Configuration(format!(
                    "code alphabet may only contain A-Z and 0-9, found {:?}",
                    c
                )));
            }
            if !chars.contains(&(c as u8)) {
                chars.push(c as u8);
            }
        }

        if chars.is_empty() {
            return Err(AppError::Configuration(
                "code alphabet must not be empty".to_string(),
            ));
        }

        Ok(Self {
            alphabet: chars,
            length,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn alphabet(&self) -> &str {
        // Only ASCII bytes are ever stored.
        std::str::from_utf8(&self.alphabet).unwrap_or_default()
    }

    /// Produces a fresh code. No uniqueness is implied.
    pub fn generate(&self) -> String {
        generate(&self.alphabet, self.length)
    }

    /// Checks a candidate code, naming the first rule it breaks.
    pub fn check(&self, code: &str) -> std::result::Result<(), String> {
        if code.chars().count() != self.length {
            return Err(format!(
                "user is allowed to send only {}-character code",
                self.length
            ));
        }

        if !code.bytes().all(|b| self.alphabet.contains(&b)) {
            return Err(
                "user can only enter numbers along with upper-case alphabets".to_string(),
            );
        }

        Ok(())
    }

    pub fn matches(&self, code: &str) -> bool {
        self.check(code).is_ok()
    }
}

impl Default for CodeFormat {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.as_bytes().to_vec(),
            length: DEFAULT_CODE_LENGTH,
        }
    }
}
