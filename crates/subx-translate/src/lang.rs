//! Language code tables.

/// English name used in prompts. Unknown codes are passed through.
pub fn language_name(code: &str) -> &str {
    match code {
        "tr" => "Turkish",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ar" => "Arabic",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "it" => "Italian",
        other => other,
    }
}

/// DeepL `target_lang` value.
pub fn deepl_target(code: &str) -> Option<&'static str> {
    Some(match code {
        "tr" => "TR",
        "en" => "EN-US",
        "ja" => "JA",
        "ko" => "KO",
        "zh" => "ZH",
        "fr" => "FR",
        "de" => "DE",
        "es" => "ES",
        "pt" => "PT-BR",
        "ru" => "RU",
        "it" => "IT",
        _ => return None,
    })
}

/// DeepL `source_lang` value. Source codes carry no regional variant.
pub fn deepl_source(code: &str) -> Option<&'static str> {
    deepl_target(code).map(|t| t.split('-').next().unwrap_or(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("ja"), "Japanese");
        assert_eq!(language_name("ar"), "Arabic");
        assert_eq!(language_name("xx"), "xx");
    }

    #[test]
    fn test_deepl_codes() {
        assert_eq!(deepl_target("en"), Some("EN-US"));
        assert_eq!(deepl_target("pt"), Some("PT-BR"));
        assert_eq!(deepl_target("ar"), None);
        assert_eq!(deepl_source("en"), Some("EN"));
        assert_eq!(deepl_source("pt"), Some("PT"));
        assert_eq!(deepl_source("tr"), Some("TR"));
    }
}
