use serde::{Deserialize, Serialize};

/// The maximum length of a card value, per the wire protocol contract.
pub const MAX_CARD_VALUE_LEN: usize = 10;

/// The set of card values a room's voters may choose from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "deckType", rename_all = "kebab-case")]
pub enum DeckType {
    Fibonacci,
    Tshirt,
    PowersOfTwo,
    Custom { custom_deck: Vec<String> },
}

impl DeckType {
    /// Returns the ordered set of allowed card values for this deck.
    pub fn values(&self) -> Vec<&str> {
        match self {
            DeckType::Fibonacci => vec![
                "0", "1", "2", "3", "5", "8", "13", "21", "34", "55", "89", "?", "∞", "☕",
            ],
            DeckType::Tshirt => vec!["XS", "S", "M", "L", "XL", "XXL", "?", "☕"],
            DeckType::PowersOfTwo => vec!["0", "1", "2", "4", "8", "16", "32", "64", "?", "☕"],
            DeckType::Custom { custom_deck } => custom_deck.iter().map(|s| s.as_str()).collect(),
        }
    }

    /// Returns true if `card_value` is a member of this deck.
    pub fn contains(&self, card_value: &str) -> bool {
        self.values().iter().any(|v| *v == card_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fibonacci_contains_known_values() {
        let deck = DeckType::Fibonacci;
        assert!(deck.contains("5"));
        assert!(deck.contains("☕"));
        assert!(!deck.contains("M"));
    }

    #[test]
    fn custom_deck_honors_configured_values() {
        let deck = DeckType::Custom {
            custom_deck: vec!["small".into(), "medium".into(), "large".into()],
        };

        assert!(deck.contains("medium"));
        assert!(!deck.contains("5"));
    }
}
