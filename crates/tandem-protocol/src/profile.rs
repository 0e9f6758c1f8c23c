//! Participant profiles.
//!
//! Clients describe themselves with a loosely-typed [`ProfilePayload`]. The
//! payload is validated at the boundary and turned into a [`Profile`], the
//! snapshot the server stores and shows to other participants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Age assumed when a browsing client does not send one.
pub const DEFAULT_AGE: u32 = 25;

/// Maximum accepted display name length in characters.
pub const MAX_NAME_LENGTH: usize = 64;

/// Payload validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present but its value is out of range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidField {
        /// Offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// What a participant is looking for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dating,
    #[default]
    Friendship,
    Study,
}

impl Mode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dating => "dating",
            Mode::Friendship => "friendship",
            Mode::Study => "study",
        }
    }
}

/// Profile fields as sent by a client. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
}

impl ProfilePayload {
    /// Create a payload carrying the three fields `join` requires.
    #[must_use]
    pub fn new(name: impl Into<String>, age: u32, gender: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            age: Some(age),
            gender: Some(gender.into()),
            ..Default::default()
        }
    }

    /// Validate a presence registration.
    ///
    /// Only the name is required; everything else falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is missing, blank or too long.
    pub fn into_presence_profile(self) -> Result<Profile, ValidationError> {
        let name = validate_name(self.name.as_deref())?;
        let gender = self
            .gender
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "other".to_string());
        Ok(self.finish(name, self.age.unwrap_or(DEFAULT_AGE), gender))
    }

    /// Validate a `join` request.
    ///
    /// Name, a non-zero age and gender are mandatory. Gender is lower-cased.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or invalid field.
    pub fn into_join_profile(self) -> Result<Profile, ValidationError> {
        let name = validate_name(self.name.as_deref())?;
        let age = match self.age {
            None => return Err(ValidationError::MissingField("age")),
            Some(0) => {
                return Err(ValidationError::InvalidField {
                    field: "age",
                    reason: "must be greater than zero",
                })
            }
            Some(age) => age,
        };
        let gender = match self.gender.as_deref().map(str::trim) {
            Some(g) if !g.is_empty() => g.to_lowercase(),
            _ => return Err(ValidationError::MissingField("gender")),
        };
        Ok(self.finish(name, age, gender))
    }

    fn finish(&self, name: String, age: u32, gender: String) -> Profile {
        let bio = self
            .bio
            .clone()
            .unwrap_or_else(|| format!("Hi, I'm {}!", name));
        Profile {
            name,
            age,
            gender,
            interests: self.interests.clone().unwrap_or_default(),
            values: self.values.clone().unwrap_or_default(),
            personality_tags: self.personality_tags.clone().unwrap_or_default(),
            bio,
            country: self.country.clone().unwrap_or_else(|| "Unknown".to_string()),
            flag: self.flag.clone().unwrap_or_else(|| "🌍".to_string()),
            mode: self.mode.unwrap_or_default(),
        }
    }
}

fn validate_name(name: Option<&str>) -> Result<String, ValidationError> {
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::InvalidField {
            field: "name",
            reason: "too long",
        });
    }
    Ok(name.to_string())
}

/// A validated participant profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub interests: Vec<String>,
    pub values: Vec<String>,
    pub personality_tags: Vec<String>,
    pub bio: String,
    pub country: String,
    pub flag: String,
    pub mode: Mode,
}

impl Profile {
    /// The short form shown to a freshly matched partner.
    #[must_use]
    pub fn summary(&self) -> PartnerSummary {
        PartnerSummary {
            name: self.name.clone(),
            age: self.age,
        }
    }
}

/// Partner details carried by the `matched` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerSummary {
    pub name: String,
    pub age: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_requires_name_age_gender() {
        let payload = ProfilePayload {
            name: Some("Alice".into()),
            ..Default::default()
        };
        assert_eq!(
            payload.into_join_profile(),
            Err(ValidationError::MissingField("age"))
        );

        let payload = ProfilePayload {
            name: Some("  ".into()),
            age: Some(30),
            gender: Some("female".into()),
            ..Default::default()
        };
        assert_eq!(
            payload.into_join_profile(),
            Err(ValidationError::MissingField("name"))
        );

        let payload = ProfilePayload {
            gender: None,
            ..ProfilePayload::new("Bob", 30, "")
        };
        assert_eq!(
            payload.into_join_profile(),
            Err(ValidationError::MissingField("gender"))
        );
    }

    #[test]
    fn test_join_rejects_zero_age() {
        let err = ProfilePayload::new("Alice", 0, "female")
            .into_join_profile()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "age", .. }));
    }

    #[test]
    fn test_join_lowercases_gender() {
        let profile = ProfilePayload::new("Alice", 29, "Female")
            .into_join_profile()
            .unwrap();
        assert_eq!(profile.gender, "female");
        assert_eq!(profile.bio, "Hi, I'm Alice!");
        assert_eq!(profile.mode, Mode::Friendship);
    }

    #[test]
    fn test_presence_defaults() {
        let payload = ProfilePayload {
            name: Some("Carol".into()),
            country: Some("Germany".into()),
            ..Default::default()
        };
        let profile = payload.into_presence_profile().unwrap();

        assert_eq!(profile.age, DEFAULT_AGE);
        assert_eq!(profile.gender, "other");
        assert_eq!(profile.country, "Germany");
        assert!(profile.interests.is_empty());
    }

    #[test]
    fn test_payload_wire_names() {
        let payload: ProfilePayload = serde_json::from_str(
            r#"{"name":"Dana","age":31,"gender":"female","personalityTags":["calm"],"mode":"study"}"#,
        )
        .unwrap();

        assert_eq!(payload.personality_tags, Some(vec!["calm".to_string()]));
        assert_eq!(payload.mode, Some(Mode::Study));
    }
}
