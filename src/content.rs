//! External content tables and the media naming contract.
//!
//! Two read-only JSON inputs feed plan generation: the sentence catalogue
//! (one entry per recorded stimulus) and the per-run sentence-to-character
//! association. Media file names are derived here and nowhere else; the
//! naming is case-sensitive by contract (lowercase `.mp4`, `.wav`).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::assignment::Side;

/// The four animated characters. Fixed cast; the association tables may
/// only reference these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharacterId {
    P1,
    P2,
    P3,
    P4,
}

pub const CHARACTER_IDS: [CharacterId; 4] =
    [CharacterId::P1, CharacterId::P2, CharacterId::P3, CharacterId::P4];

impl CharacterId {
    pub fn as_str(self) -> &'static str {
        match self {
            CharacterId::P1 => "P1",
            CharacterId::P2 => "P2",
            CharacterId::P3 => "P3",
            CharacterId::P4 => "P4",
        }
    }

    pub fn gender(self) -> Gender {
        match self {
            CharacterId::P1 | CharacterId::P3 => Gender::M,
            CharacterId::P2 | CharacterId::P4 => Gender::F,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
        }
    }
}

/// One row of the sentence catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceInfo {
    pub sentence_id: u32,
    pub run: u32,
    pub category: String,
    pub theme: String,
    pub truth_value: String,
}

/// Per-run ordered character assignment, positional over the run's
/// stimulus order after rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterAssociation {
    pub run: u32,
    pub characters: Vec<CharacterId>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ContentError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ContentError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ContentError::Decode {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_sentences(path: &Path) -> Result<Vec<SentenceInfo>, ContentError> {
    load_json(path)
}

pub fn load_associations(path: &Path) -> Result<Vec<CharacterAssociation>, ContentError> {
    load_json(path)
}

// =============================================================================
// Media naming contract
// =============================================================================

pub const CUE_FILE: &str = "Sentences/beep.wav";
pub const FEEDBACK_OK_FILE: &str = "Animations/FeedbackOkRobot.mp4";
pub const FEEDBACK_NOT_OK_FILE: &str = "Animations/FeedbackNotOkRobot.mp4";

/// `Sentences/Sentence{id}_{category}_{theme}_{truth}_Gender_{g}.wav`
pub fn sentence_audio_file(sentence: &SentenceInfo, gender: Gender) -> String {
    format!(
        "Sentences/Sentence{}_{}_{}_{}_Gender_{}.wav",
        sentence.sentence_id,
        sentence.category,
        sentence.theme,
        sentence.truth_value,
        gender.as_str()
    )
}

/// Speaking animation for the sentence phase.
pub fn sentence_animation_file(true_side: Side, character: CharacterId) -> String {
    let anim = match true_side {
        Side::Right => "SentenceTrueRight",
        Side::Left => "SentenceTrueLeft",
    };
    format!("Animations/{}{}.mp4", anim, character.as_str())
}

/// Idle animation looped during the response window.
pub fn wait_animation_file(true_side: Side, character: CharacterId) -> String {
    let anim = match true_side {
        Side::Right => "WaitTrueRight",
        Side::Left => "WaitTrueLeft",
    };
    format!("Animations/{}{}.mp4", anim, character.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_names_follow_the_contract() {
        let sentence = SentenceInfo {
            sentence_id: 12,
            run: 3,
            category: "Math".into(),
            theme: "Geometry".into(),
            truth_value: "True".into(),
        };
        assert_eq!(
            sentence_audio_file(&sentence, Gender::F),
            "Sentences/Sentence12_Math_Geometry_True_Gender_F.wav"
        );
        assert_eq!(
            sentence_animation_file(Side::Right, CharacterId::P1),
            "Animations/SentenceTrueRightP1.mp4"
        );
        assert_eq!(
            wait_animation_file(Side::Left, CharacterId::P3),
            "Animations/WaitTrueLeftP3.mp4"
        );
    }

    #[test]
    fn character_genders_match_the_cast() {
        assert_eq!(CharacterId::P1.gender(), Gender::M);
        assert_eq!(CharacterId::P2.gender(), Gender::F);
        assert_eq!(CharacterId::P3.gender(), Gender::M);
        assert_eq!(CharacterId::P4.gender(), Gender::F);
    }

    #[test]
    fn association_decodes_known_characters_only() {
        let ok: Result<CharacterAssociation, _> =
            serde_json::from_str(r#"{"run":1,"characters":["P1","P4"]}"#);
        assert!(ok.is_ok());
        let bad: Result<CharacterAssociation, _> =
            serde_json::from_str(r#"{"run":1,"characters":["P9"]}"#);
        assert!(bad.is_err());
    }
}
