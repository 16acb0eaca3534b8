use std::collections::HashSet;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

const REFERENCE_PREFIX: &str = "TRN";
const TIMESTAMP_DIGITS_MODULUS: i64 = 100_000_000;

/// Issues human-auditable reference numbers of the form `TRN-12345678-9F3A0B1C`.
///
/// The middle group is the last eight digits of the unix timestamp and the
/// suffix is four random bytes in hex. Every issued or seeded reference is
/// remembered and a collision is regenerated. Seeding with the references
/// already in storage extends uniqueness across restarts.
#[derive(Debug, Default)]
pub struct ReferenceGenerator {
    issued: Mutex<HashSet<String>>,
}

impl ReferenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the generator with references that already exist in storage.
    pub fn with_existing<I>(references: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            issued: Mutex::new(references.into_iter().collect()),
        }
    }

    pub fn next(&self, at: DateTime<Utc>) -> String {
        let stamp = at.timestamp().rem_euclid(TIMESTAMP_DIGITS_MODULUS);
        let mut issued = self.issued.lock();
        loop {
            let candidate = format!("{}-{:08}-{}", REFERENCE_PREFIX, stamp, random_suffix());
            if issued.insert(candidate.clone()) {
                return candidate;
            }
            tracing::debug!(%candidate, "reference collision, regenerating");
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.issued.lock().contains(reference)
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().len()
    }
}

fn random_suffix() -> String {
    let bytes = Uuid::new_v4();
    let mut suffix = String::with_capacity(8);
    for byte in &bytes.as_bytes()[..4] {
        let _ = write!(suffix, "{:02X}", byte);
    }
    suffix
}
