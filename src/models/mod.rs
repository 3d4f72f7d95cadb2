//! Model selection and parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TendrilError;

/// A provider/model pair, written as `"provider:model_id"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ModelRef {
    pub provider: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse `"provider:model_id"`. A selector without a colon is a bare
    /// model id with no provider; the empty string yields an empty ref.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.split_once(':') {
            Some((provider, model_id)) => Self::new(provider.trim(), model_id.trim()),
            None => Self::new("", s),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.provider.is_empty() && self.model_id.is_empty()
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.provider.is_empty() {
            write!(f, "{}", self.model_id)
        } else {
            write!(f, "{}:{}", self.provider, self.model_id)
        }
    }
}

impl FromStr for ModelRef {
    type Err = TendrilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let model = Self::parse(s);
        if model.model_id.is_empty() {
            return Err(TendrilError::InvalidArgument(format!(
                "Invalid model selector '{s}': expected 'provider:model_id'"
            )));
        }
        Ok(model)
    }
}
