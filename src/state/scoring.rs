//! Tap scoring policy and winner selection.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dao::models::RoundResultEntity;

/// Every tap whose ordinal is a multiple of this value earns the bonus.
pub const BONUS_TAP_INTERVAL: u64 = 11;
/// Points earned by a bonus tap, replacing the regular point.
pub const BONUS_TAP_POINTS: u64 = 10;
/// Points earned by a regular tap.
pub const REGULAR_TAP_POINTS: u64 = 1;

/// Closed set of roles resolved by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    /// Can create rounds; scores like a survivor.
    Admin,
    /// Regular player.
    Survivor,
    /// Taps are counted but never scored.
    Nikita,
}

impl UserRole {
    /// Whether taps by this role contribute to scores.
    pub fn is_scoring_exempt(self) -> bool {
        matches!(self, UserRole::Nikita)
    }

    /// Parse the wire name of a role, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(UserRole::Admin),
            "SURVIVOR" => Some(UserRole::Survivor),
            "NIKITA" => Some(UserRole::Nikita),
            _ => None,
        }
    }
}

/// Points earned by the tap that brings a user's count to `new_taps`.
pub fn score_increase(role: UserRole, new_taps: u64) -> u64 {
    if role.is_scoring_exempt() {
        0
    } else if new_taps % BONUS_TAP_INTERVAL == 0 {
        BONUS_TAP_POINTS
    } else {
        REGULAR_TAP_POINTS
    }
}

/// Apply one accepted tap to a ledger entry, returning the score increase.
///
/// Taps and score are always updated together.
pub fn apply_tap(entry: &mut RoundResultEntity, role: UserRole) -> u64 {
    let new_taps = entry.taps + 1;
    let increase = score_increase(role, new_taps);
    entry.taps = new_taps;
    entry.score += increase;
    increase
}

/// Pick the winning entry: highest score, earliest-created entry on ties.
///
/// `entries` must be in creation order when timestamps can collide.
pub fn pick_winner<'a, I>(entries: I) -> Option<&'a RoundResultEntity>
where
    I: IntoIterator<Item = &'a RoundResultEntity>,
{
    entries.into_iter().fold(None, |best, candidate| match best {
        Some(current)
            if current.score > candidate.score
                || (current.score == candidate.score
                    && current.created_at <= candidate.created_at) =>
        {
            Some(current)
        }
        _ => Some(candidate),
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use uuid::Uuid;

    use super::*;

    fn entry(user: &str, score: u64, created_secs: u64) -> RoundResultEntity {
        let mut entry = RoundResultEntity::empty(
            Uuid::nil(),
            user.into(),
            user.into(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(created_secs),
        );
        entry.score = score;
        entry
    }

    fn tap_n(role: UserRole, n: u64) -> RoundResultEntity {
        let mut ledger = entry("u", 0, 0);
        for _ in 0..n {
            apply_tap(&mut ledger, role);
        }
        ledger
    }

    #[test]
    fn every_eleventh_tap_is_worth_ten() {
        assert_eq!(score_increase(UserRole::Survivor, 1), 1);
        assert_eq!(score_increase(UserRole::Survivor, 10), 1);
        assert_eq!(score_increase(UserRole::Survivor, 11), 10);
        assert_eq!(score_increase(UserRole::Survivor, 12), 1);
        assert_eq!(score_increase(UserRole::Admin, 22), 10);
    }

    #[test]
    fn eleven_taps_score_twenty_and_twenty_two_score_forty() {
        let ledger = tap_n(UserRole::Survivor, 11);
        assert_eq!((ledger.taps, ledger.score), (11, 20));

        let ledger = tap_n(UserRole::Survivor, 22);
        assert_eq!((ledger.taps, ledger.score), (22, 40));
    }

    #[test]
    fn score_follows_closed_form() {
        for n in 0..60 {
            let ledger = tap_n(UserRole::Survivor, n);
            assert_eq!(ledger.taps, n);
            assert_eq!(ledger.score, n + 9 * (n / 11), "after {n} taps");
        }
    }

    #[test]
    fn exempt_role_counts_taps_without_scoring() {
        let ledger = tap_n(UserRole::Nikita, 33);
        assert_eq!(ledger.taps, 33);
        assert_eq!(ledger.score, 0);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(UserRole::parse("nikita"), Some(UserRole::Nikita));
        assert_eq!(UserRole::parse(" ADMIN "), Some(UserRole::Admin));
        assert_eq!(UserRole::parse("Survivor"), Some(UserRole::Survivor));
        assert_eq!(UserRole::parse("goose"), None);
    }

    #[test]
    fn winner_is_highest_score() {
        let entries = [entry("a", 5, 0), entry("b", 9, 1), entry("c", 7, 2)];
        assert_eq!(pick_winner(&entries).unwrap().user_id, "b");
    }

    #[test]
    fn winner_tie_goes_to_earliest_entry() {
        let entries = [entry("late", 9, 5), entry("early", 9, 1), entry("low", 3, 0)];
        assert_eq!(pick_winner(&entries).unwrap().user_id, "early");

        let same_instant = [entry("first", 4, 1), entry("second", 4, 1)];
        assert_eq!(pick_winner(&same_instant).unwrap().user_id, "first");
    }

    #[test]
    fn no_entries_no_winner() {
        let entries: Vec<RoundResultEntity> = Vec::new();
        assert!(pick_winner(&entries).is_none());
    }
}
