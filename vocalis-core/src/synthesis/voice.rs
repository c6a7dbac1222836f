//! Voice descriptors and pattern matching.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceQuality {
    #[default]
    Unspecified,
    Experimental,
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    #[default]
    Unspecified,
    Male,
    Female,
}

/// One voice an engine can speak with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Voice {
    pub name: String,
    /// BCP-47-ish language tag, e.g. `en-US`.
    pub language: String,
    pub engine: String,
    pub sample_rate: u32,
    pub quality: VoiceQuality,
    pub region: String,
    pub gender: VoiceGender,
    pub age: u32,
}

/// Voice selector. Empty strings, zero numbers and `Unspecified` enums match
/// anything; string fields compare ASCII case-insensitively.
pub type VoicePattern = Voice;

impl Voice {
    pub fn matches(&self, pattern: &VoicePattern) -> bool {
        fn text(value: &str, want: &str) -> bool {
            want.is_empty() || value.eq_ignore_ascii_case(want)
        }

        text(&self.name, &pattern.name)
            && text(&self.language, &pattern.language)
            && text(&self.engine, &pattern.engine)
            && (pattern.sample_rate == 0 || self.sample_rate == pattern.sample_rate)
            && (pattern.quality == VoiceQuality::Unspecified || self.quality == pattern.quality)
            && text(&self.region, &pattern.region)
            && (pattern.gender == VoiceGender::Unspecified || self.gender == pattern.gender)
            && (pattern.age == 0 || self.age == pattern.age)
    }
}

/// Index of the first voice matching `pattern`.
pub fn voice_index(voices: &[Voice], pattern: &VoicePattern) -> Option<usize> {
    voices.iter().position(|v| v.matches(pattern))
}

/// Index of the first voice whose language equals `language`
/// (case-insensitive).
pub fn voice_index_by_language(voices: &[Voice], language: &str) -> Option<usize> {
    voices
        .iter()
        .position(|v| v.language.eq_ignore_ascii_case(language))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> Vec<Voice> {
        vec![
            Voice {
                name: "Tone US".into(),
                language: "en-US".into(),
                engine: "tone".into(),
                sample_rate: 16_000,
                quality: VoiceQuality::Normal,
                gender: VoiceGender::Female,
                ..Voice::default()
            },
            Voice {
                name: "Tone GB".into(),
                language: "en-GB".into(),
                engine: "tone".into(),
                sample_rate: 16_000,
                quality: VoiceQuality::Normal,
                gender: VoiceGender::Male,
                ..Voice::default()
            },
            Voice {
                name: "Tone DE".into(),
                language: "de-DE".into(),
                engine: "tone".into(),
                sample_rate: 22_050,
                ..Voice::default()
            },
        ]
    }

    #[test]
    fn empty_pattern_matches_first_voice() {
        assert_eq!(voice_index(&catalogue(), &VoicePattern::default()), Some(0));
    }

    #[test]
    fn string_fields_are_case_insensitive() {
        let pattern = VoicePattern {
            language: "EN-gb".into(),
            ..VoicePattern::default()
        };
        assert_eq!(voice_index(&catalogue(), &pattern), Some(1));
    }

    #[test]
    fn every_specified_field_must_match() {
        let pattern = VoicePattern {
            language: "en-US".into(),
            gender: VoiceGender::Male,
            ..VoicePattern::default()
        };
        assert_eq!(voice_index(&catalogue(), &pattern), None);

        let by_rate = VoicePattern {
            sample_rate: 22_050,
            ..VoicePattern::default()
        };
        assert_eq!(voice_index(&catalogue(), &by_rate), Some(2));
    }

    #[test]
    fn language_lookup() {
        assert_eq!(voice_index_by_language(&catalogue(), "DE-de"), Some(2));
        assert_eq!(voice_index_by_language(&catalogue(), "fr-FR"), None);
    }

    #[test]
    fn partial_json_pattern_uses_wildcards() {
        let pattern: VoicePattern =
            serde_json::from_str(r#"{"gender":"male"}"#).expect("pattern parses");
        assert_eq!(voice_index(&catalogue(), &pattern), Some(1));
    }
}
