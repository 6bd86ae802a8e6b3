//! Day-bucketed validation tokens.
//!
//! Every participant derives the same token from the current calendar date in
//! an agreed fixed offset, so no key exchange is needed. The PRNG is local to
//! each call; nothing process-wide is reseeded.

use chrono::{DateTime, Datelike, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::error::DiscoveryError;
use crate::messages::DEFAULT_ZONE_LABEL;

/// Produces the shared token of the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGenerator {
    zone_label: String,
    offset_seconds: i32,
}

impl TokenGenerator {
    /// A generator for the zone named `zone_label`, `offset_seconds` east of UTC.
    ///
    /// An empty label falls back to [`DEFAULT_ZONE_LABEL`]. The label is only
    /// descriptive; the offset alone decides the calendar day.
    pub fn new(zone_label: impl Into<String>, offset_seconds: i32) -> Self {
        let zone_label = zone_label.into();
        Self {
            zone_label: if zone_label.is_empty() {
                DEFAULT_ZONE_LABEL.to_string()
            } else {
                zone_label
            },
            offset_seconds,
        }
    }

    pub fn zone_label(&self) -> &str {
        &self.zone_label
    }

    pub fn offset_seconds(&self) -> i32 {
        self.offset_seconds
    }

    /// Seed for the current day.
    pub fn seed(&self) -> Result<i64, DiscoveryError> {
        self.seed_at(Utc::now())
    }

    /// Month, day and year of `now` in this zone, concatenated without
    /// separators or padding and read as one integer (19 Oct 2026 -> 10192026).
    pub fn seed_at(&self, now: DateTime<Utc>) -> Result<i64, DiscoveryError> {
        let local = now
            .naive_utc()
            .checked_add_signed(Duration::seconds(i64::from(self.offset_seconds)))
            .ok_or_else(|| {
                DiscoveryError::Token(format!(
                    "offset {}s out of range for zone {}",
                    self.offset_seconds, self.zone_label
                ))
            })?;
        let digits = format!("{}{}{}", local.month(), local.day(), local.year());
        digits
            .parse::<i64>()
            .map_err(|e| DiscoveryError::Token(format!("seed {:?}: {}", digits, e)))
    }

    /// Token for the current day.
    pub fn token(&self) -> Result<String, DiscoveryError> {
        self.token_at(Utc::now())
    }

    pub fn token_at(&self, now: DateTime<Utc>) -> Result<String, DiscoveryError> {
        let seed = self.seed_at(now)?;
        let mut rng = ChaCha20Rng::seed_from_u64(seed as u64);
        Ok(rng.gen_range(0..i64::MAX).to_string())
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ZONE_LABEL, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn seed_concatenates_month_day_year() {
        let tokens = TokenGenerator::default();
        assert_eq!(tokens.seed_at(at(2026, 10, 19, 12)).unwrap(), 10192026);
        assert_eq!(tokens.seed_at(at(2026, 1, 5, 12)).unwrap(), 152026);
    }

    #[test]
    fn offset_moves_the_calendar_day() {
        let utc = TokenGenerator::default();
        let east = TokenGenerator::new("GMT+6", 6 * 3600);
        let now = at(2026, 10, 19, 20);
        assert_eq!(east.seed_at(now).unwrap(), 10202026);
        assert_ne!(utc.token_at(now).unwrap(), east.token_at(now).unwrap());
    }

    #[test]
    fn same_day_same_token() {
        let a = TokenGenerator::new("GMT", 0);
        let b = TokenGenerator::new("GMT", 0);
        assert_eq!(
            a.token_at(at(2026, 10, 19, 1)).unwrap(),
            b.token_at(at(2026, 10, 19, 23)).unwrap()
        );
        assert_eq!(a.token().unwrap(), b.token().unwrap());
    }

    #[test]
    fn consecutive_days_differ() {
        let tokens = TokenGenerator::default();
        assert_ne!(
            tokens.token_at(at(2026, 10, 18, 12)).unwrap(),
            tokens.token_at(at(2026, 10, 19, 12)).unwrap()
        );
    }

    #[test]
    fn full_day_offset_is_accepted() {
        let today = TokenGenerator::default();
        let tomorrow = TokenGenerator::new("GMT", 24 * 3600);
        let now = at(2026, 10, 19, 12);
        assert_eq!(tomorrow.seed_at(now).unwrap(), 10202026);
        assert_ne!(today.token_at(now).unwrap(), tomorrow.token_at(now).unwrap());
    }

    #[test]
    fn token_is_independent_of_earlier_calls() {
        let tokens = TokenGenerator::default();
        let now = at(2026, 10, 19, 12);
        let first = tokens.token_at(now).unwrap();
        let _ = TokenGenerator::new("X", 3600).token_at(at(2001, 2, 3, 4)).unwrap();
        assert_eq!(tokens.token_at(now).unwrap(), first);
        assert!(first.parse::<i64>().unwrap() >= 0);
    }

    #[test]
    fn empty_label_uses_default() {
        assert_eq!(TokenGenerator::new("", 0).zone_label(), DEFAULT_ZONE_LABEL);
        assert_eq!(TokenGenerator::new("", 0), TokenGenerator::default());
    }
}
