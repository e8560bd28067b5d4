//! Translation engine identifiers.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Supported translation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum EngineKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepl")]
    DeepL,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::OpenAi => "openai",
            EngineKind::DeepL => "deepl",
            EngineKind::Gemini => "gemini",
            EngineKind::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(EngineKind::OpenAi),
            "deepl" => Ok(EngineKind::DeepL),
            "gemini" => Ok(EngineKind::Gemini),
            "openrouter" => Ok(EngineKind::OpenRouter),
            other => Err(ModelError::unknown("engine", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_wire_names() {
        assert_eq!(serde_json::to_string(&EngineKind::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(serde_json::to_string(&EngineKind::DeepL).unwrap(), "\"deepl\"");
        let parsed: EngineKind = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(parsed, EngineKind::OpenRouter);
        assert_eq!("Gemini".parse::<EngineKind>().unwrap(), EngineKind::Gemini);
    }
}
