use serde::{Deserialize, Serialize};

use crate::codec::Guess;
use crate::puzzle::Puzzle;

pub type UserId = String;

/// Stored progress of one user on one puzzle.
///
/// The puzzle fields are copied when the record is created and are not
/// updated if the puzzle changes later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameStateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: UserId,
    pub puzzle_id: String,
    #[serde(default)]
    pub guesses: Vec<Guess>,
    #[serde(default)]
    pub creator_name: String,
    #[serde(default)]
    pub created_at: u64,
    pub num_groups: usize,
    pub words_per_group: usize,
}

impl GameStateRecord {
    /// A fresh, unsaved record for `user_id` playing `puzzle`.
    pub fn new_for(user_id: impl Into<UserId>, puzzle: &Puzzle) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            puzzle_id: puzzle.id().to_string(),
            guesses: Vec::new(),
            creator_name: puzzle.creator_name().to_string(),
            created_at: puzzle.created_at(),
            num_groups: puzzle.num_groups(),
            words_per_group: puzzle.words_per_group(),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.user_id, &self.puzzle_id)
    }

    /// Same record with `guesses` replaced by the current ledger.
    pub fn with_guesses(&self, guesses: &[Guess]) -> Self {
        Self {
            guesses: guesses.to_vec(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::tests::sample_puzzle;
    use serde_json::json;

    #[test]
    fn new_record_copies_puzzle_metadata() {
        let puzzle = sample_puzzle();
        let record = GameStateRecord::new_for("u1", &puzzle);
        assert_eq!(record.id, None);
        assert_eq!(record.key(), ("u1", "p1"));
        assert_eq!(record.creator_name, "casey");
        assert_eq!(record.created_at, 1_700_000_000_000);
        assert_eq!(record.num_groups, 4);
        assert_eq!(record.words_per_group, 4);
        assert!(record.guesses.is_empty());
    }

    #[test]
    fn serializes_with_integer_guesses() {
        let puzzle = sample_puzzle();
        let record = GameStateRecord {
            id: Some("gs1".into()),
            ..GameStateRecord::new_for("u1", &puzzle)
        }
        .with_guesses(&[Guess(15), Guess(0b1_0001_0011_0000)]);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "gs1",
                "userId": "u1",
                "puzzleId": "p1",
                "guesses": [15, 4400],
                "creatorName": "casey",
                "createdAt": 1_700_000_000_000u64,
                "numGroups": 4,
                "wordsPerGroup": 4
            })
        );
        let back: GameStateRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn unsaved_record_omits_id() {
        let record = GameStateRecord::new_for("u1", &sample_puzzle());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("id").is_none());
    }
}
