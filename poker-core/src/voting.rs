use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use thiserror::Error;

use crate::deck::{DeckType, MAX_CARD_VALUE_LEN};
use crate::domain::{ParticipantRole, Round, Vote};
use crate::ids::ParticipantId;

#[derive(Debug, Error)]
pub enum VotingError {
    #[error("round is not active")]
    RoundNotActive,
    #[error("round is already revealed")]
    AlreadyRevealed,
    #[error("card value is not in this room's deck")]
    CardNotInDeck,
    #[error("card value exceeds the maximum length of {MAX_CARD_VALUE_LEN}")]
    CardValueTooLong,
    #[error("participant is not permitted to vote")]
    RoleForbidden,
}

/// Validates a card value against a room's deck, enforcing the wire-protocol
/// length bound ahead of the deck membership check.
pub fn validate_card_value(deck: &DeckType, card_value: &str) -> Result<(), VotingError> {
    if card_value.chars().count() > MAX_CARD_VALUE_LEN {
        return Err(VotingError::CardValueTooLong);
    }

    if !deck.contains(card_value) {
        return Err(VotingError::CardNotInDeck);
    }

    Ok(())
}

/// Checks whether `role` may cast a vote; pure precondition, no I/O.
pub fn ensure_may_vote(role: ParticipantRole) -> Result<(), VotingError> {
    if role.may_vote() {
        Ok(())
    } else {
        Err(VotingError::RoleForbidden)
    }
}

/// Checks whether `role` may perform host-only operations.
pub fn ensure_is_host(role: ParticipantRole) -> Result<(), VotingError> {
    if role.is_host() {
        Ok(())
    } else {
        Err(VotingError::RoleForbidden)
    }
}

/// Checks that a round may be revealed: it must be currently active.
pub fn ensure_revealable(round: &Round) -> Result<(), VotingError> {
    if round.is_revealed() {
        Err(VotingError::AlreadyRevealed)
    } else {
        Ok(())
    }
}

/// The computed outcome of a reveal, per the statistics algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealStats {
    pub average: Option<Decimal>,
    pub median: Option<String>,
    pub consensus_reached: bool,
}

/// A lightweight view over a cast vote, enough to compute statistics without
/// touching the whole persisted `Vote` record.
#[derive(Debug, Clone)]
pub struct CastCard {
    pub participant_id: ParticipantId,
    pub card_value: String,
}

impl From<&Vote> for CastCard {
    fn from(vote: &Vote) -> Self {
        Self {
            participant_id: vote.participant_id,
            card_value: vote.card_value.clone(),
        }
    }
}

/// Computes reveal statistics for a set of cast cards.
///
/// - `average`: arithmetic mean of the numeric cards, rounded half-up to 2
///   decimal places, or `None` if there are no numeric cards.
/// - `median`: the statistical median of the numeric cards if every card is
///   numeric (formatted as an integer when whole, else one decimal place);
///   otherwise the mode if its frequency exceeds half the cards, else the
///   literal string `"mixed"`.
/// - `consensus_reached`: `false` if any card is non-numeric; `true` if every
///   numeric card is equal; otherwise `true` iff population variance < 2.0.
pub fn compute_stats(cards: &[CastCard]) -> RevealStats {
    if cards.is_empty() {
        return RevealStats {
            average: None,
            median: None,
            consensus_reached: false,
        };
    }

    let numeric: Vec<f64> = cards
        .iter()
        .filter_map(|c| parse_numeric(&c.card_value))
        .collect();

    let all_numeric = numeric.len() == cards.len();

    let average = if !numeric.is_empty() {
        Some(round_half_up_2dp(mean(&numeric)))
    } else {
        None
    };

    let median = if all_numeric {
        Some(format_median(median_of(&numeric)))
    } else {
        Some(mode_or_mixed(cards))
    };

    let consensus_reached = if numeric.len() != cards.len() {
        false
    } else if is_constant(&numeric) {
        true
    } else {
        population_variance(&numeric) < 2.0
    };

    RevealStats {
        average,
        median,
        consensus_reached,
    }
}

fn parse_numeric(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_variance(values: &[f64]) -> f64 {
    let mu = mean(values);
    values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("card values are finite"));

    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn round_half_up_2dp(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or(Decimal::ZERO)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn format_median(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

fn mode_or_mixed(cards: &[CastCard]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for card in cards {
        *counts.entry(card.card_value.as_str()).or_insert(0) += 1;
    }

    let (mode_value, mode_count) = counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .expect("cards is non-empty");

    if mode_count as f64 > cards.len() as f64 / 2.0 {
        mode_value.to_string()
    } else {
        "mixed".to_string()
    }
}

/// Session history roll-up, recomputed on every reveal over all revealed
/// rounds of a session (see spec §4.4).
#[derive(Debug, Clone)]
pub struct RevealedRoundFacts {
    pub consensus_reached: bool,
    pub votes: Vec<CastCard>,
    pub started_at: DateTime<Utc>,
    pub revealed_at: DateTime<Utc>,
}

pub fn recompute_session_stats(
    rounds: &[RevealedRoundFacts],
) -> (u32, u32, f64, u32, f64) {
    let total_rounds = rounds.len() as u32;
    let total_votes: u32 = rounds.iter().map(|r| r.votes.len() as u32).sum();
    let rounds_with_consensus = rounds.iter().filter(|r| r.consensus_reached).count() as u32;

    let consensus_rate = if total_rounds > 0 {
        rounds_with_consensus as f64 / total_rounds as f64
    } else {
        0.0
    };

    let average_estimation_time_seconds = if total_rounds > 0 {
        rounds
            .iter()
            .map(|r| (r.revealed_at - r.started_at).num_milliseconds() as f64 / 1000.0)
            .sum::<f64>()
            / total_rounds as f64
    } else {
        0.0
    };

    (
        total_rounds,
        total_votes,
        consensus_rate,
        rounds_with_consensus,
        average_estimation_time_seconds,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(value: &str) -> CastCard {
        CastCard {
            participant_id: ParticipantId::new(),
            card_value: value.to_string(),
        }
    }

    #[test]
    fn two_voter_reveal_matches_scenario_one() {
        let cards = vec![card("5"), card("8")];
        let stats = compute_stats(&cards);

        assert_eq!(stats.average, Some(Decimal::new(650, 2)));
        assert_eq!(stats.median.as_deref(), Some("6.5"));
        assert!(!stats.consensus_reached, "variance 2.25 >= 2.0");
    }

    #[test]
    fn consensus_scenario_two() {
        let cards = vec![card("5"), card("5")];
        let stats = compute_stats(&cards);

        assert_eq!(stats.average, Some(Decimal::new(500, 2)));
        assert_eq!(stats.median.as_deref(), Some("5"));
        assert!(stats.consensus_reached);
    }

    #[test]
    fn mixed_cards_scenario_three() {
        let cards = vec![card("5"), card("8"), card("?")];
        let stats = compute_stats(&cards);

        assert_eq!(stats.average, Some(Decimal::new(650, 2)));
        assert_eq!(stats.median.as_deref(), Some("mixed"));
        assert!(!stats.consensus_reached);
    }

    #[test]
    fn mode_wins_when_majority_repeats() {
        let cards = vec![card("5"), card("5"), card("8")];
        let stats = compute_stats(&cards);

        // "5" has frequency 2 out of 3 (> 1.5), so it wins over "mixed".
        assert_eq!(stats.median.as_deref(), Some("5"));
    }

    #[test]
    fn all_non_numeric_has_no_average() {
        let cards = vec![card("?"), card("☕")];
        let stats = compute_stats(&cards);

        assert_eq!(stats.average, None);
        assert!(!stats.consensus_reached);
    }

    #[test]
    fn validates_card_length() {
        let deck = DeckType::Fibonacci;
        let too_long = "x".repeat(MAX_CARD_VALUE_LEN + 1);
        assert!(matches!(
            validate_card_value(&deck, &too_long),
            Err(VotingError::CardValueTooLong)
        ));
    }

    #[test]
    fn validates_deck_membership() {
        let deck = DeckType::Tshirt;
        assert!(validate_card_value(&deck, "M").is_ok());
        assert!(matches!(
            validate_card_value(&deck, "5"),
            Err(VotingError::CardNotInDeck)
        ));
    }
}
