//! System API keys for the engines, read from the environment.

use subx_models::EngineKind;

#[derive(Debug, Clone, Default)]
pub struct EngineKeys {
    pub openai: Option<String>,
    pub deepl: Option<String>,
    pub gemini: Option<String>,
    pub openrouter: Option<String>,
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl EngineKeys {
    pub fn from_env() -> Self {
        Self {
            openai: non_empty("OPENAI_API_KEY"),
            deepl: non_empty("DEEPL_API_KEY"),
            gemini: non_empty("GEMINI_API_KEY"),
            openrouter: non_empty("OPENROUTER_API_KEY"),
        }
    }

    pub fn get(&self, kind: EngineKind) -> Option<&str> {
        match kind {
            EngineKind::OpenAi => self.openai.as_deref(),
            EngineKind::DeepL => self.deepl.as_deref(),
            EngineKind::Gemini => self.gemini.as_deref(),
            EngineKind::OpenRouter => self.openrouter.as_deref(),
        }
    }

    /// Engines with a system key configured.
    pub fn configured(&self) -> Vec<EngineKind> {
        [
            EngineKind::OpenAi,
            EngineKind::DeepL,
            EngineKind::Gemini,
            EngineKind::OpenRouter,
        ]
        .into_iter()
        .filter(|k| self.get(*k).is_some())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_skips_blank() {
        std::env::set_var("OPENAI_API_KEY", "sk-1");
        std::env::set_var("DEEPL_API_KEY", "  ");
        std::env::remove_var("GEMINI_API_KEY");
        std::env::remove_var("OPENROUTER_API_KEY");

        let keys = EngineKeys::from_env();
        assert_eq!(keys.get(EngineKind::OpenAi), Some("sk-1"));
        assert_eq!(keys.get(EngineKind::DeepL), None);
        assert_eq!(keys.configured(), vec![EngineKind::OpenAi]);

        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("DEEPL_API_KEY");
    }
}
