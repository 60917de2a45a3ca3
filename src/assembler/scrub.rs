use regex::Regex;
use sha2::{Digest, Sha256};

const EMAIL: &str = r"[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*";
const IP_ADDRESS: &str =
    r"(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)){3}";
// Card and phone numbers.
const DIGIT_RUN: &str = r"[0-9+]{10,21}";
const NAME_LITERAL: &str = r"name = '[a-z A-Z]*'";

const MASK: &str = "?";
const NAME_MASK: &str = "name = '?'";

/// Masks personal data in query text before it leaves the process.
#[derive(Debug, Clone)]
pub struct Scrubber {
    // Applied in order: emails and IPs before digit runs so their digits are
    // not half-masked first.
    rules: Vec<(Regex, &'static str)>,
    hash_query: bool,
}

impl Scrubber {
    pub fn new(hash_query: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            rules: vec![
                (Regex::new(EMAIL)?, MASK),
                (Regex::new(IP_ADDRESS)?, MASK),
                (Regex::new(DIGIT_RUN)?, MASK),
                (Regex::new(NAME_LITERAL)?, NAME_MASK),
            ],
            hash_query,
        })
    }

    /// Strip backticks and mask sensitive substrings; with hashing enabled the
    /// masked text is replaced by its SHA-256 hex digest.
    pub fn apply(&self, query: &str) -> String {
        let mut masked = query.replace('`', "");
        for (pattern, replacement) in &self.rules {
            masked = pattern.replace_all(&masked, *replacement).into_owned();
        }

        if self.hash_query {
            format!("{:x}", Sha256::digest(masked.as_bytes()))
        } else {
            masked
        }
    }
}
