use serde::{Deserialize, Serialize};

/// Tenant identifier. One messaging session and one lock record per id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
  /// Create a client id, trimming surrounding whitespace.
  ///
  /// Returns `None` for an empty id so callers can treat "no id" as a no-op.
  pub fn new(raw: impl AsRef<str>) -> Option<Self> {
    let trimmed = raw.as_ref().trim();
    if trimmed.is_empty() {
      None
    } else {
      Some(Self(trimmed.to_string()))
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ClientId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Verified user identity returned by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for UserId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// Recipient chat identifier understood by the messaging transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatId(String);

impl ChatId {
  /// Build a chat id from the recipient's country code and mobile number.
  pub fn new(country_code: &str, mobile_number: &str, suffix: &str) -> Self {
    Self(format!("{}{}{}", country_code, mobile_number, suffix))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ChatId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}
