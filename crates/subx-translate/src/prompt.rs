//! Prompts for the chat-style engines and parsing of their numbered replies.

use crate::lang::language_name;

/// Context lines included in a prompt.
const PROMPT_CONTEXT_LINES: usize = 5;

/// System instructions shared by OpenAI, OpenRouter and Gemini.
pub fn system_prompt(source_lang: &str, target_lang: &str, overlap_count: usize) -> String {
    let mut prompt = format!(
        "You are a professional subtitle translator. Translate from {} to {}.\n\
         Rules:\n\
         - Keep the same numbering format (1. 2. 3. etc)\n\
         - Each output line must correspond to the same numbered input line\n\
         - Preserve the meaning and tone; keep translations natural and conversational\n\
         - Keep formatting tags such as <i>, <b> and {{\\an8}} exactly as they are\n\
         - A term written as term[=translation] must be rendered with that translation; \
           do not output the [=...] marker itself\n\
         - Do NOT add explanations, just translate",
        language_name(source_lang),
        language_name(target_lang),
    );
    if overlap_count > 0 {
        prompt.push_str(&format!(
            "\n- Lines 1 to {} repeat the end of the previous batch and are context only; \
             still output them so the numbering stays aligned",
            overlap_count
        ));
    }
    prompt
}

/// Numbered lines, optionally preceded by recent translated context.
pub fn user_message(lines: &[String], context: Option<&[String]>) -> String {
    let numbered = lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}", i + 1, line.replace('\n', " \\N ")))
        .collect::<Vec<_>>()
        .join("\n");

    match context.filter(|c| !c.is_empty()) {
        Some(ctx) => {
            let tail = &ctx[ctx.len().saturating_sub(PROMPT_CONTEXT_LINES)..];
            format!(
                "Previous context:\n{}\n\nTranslate these lines:\n{}",
                tail.join("\n"),
                numbered
            )
        }
        None => numbered,
    }
}

/// Split a numbered reply into exactly `expected` lines.
///
/// Blank lines are dropped and a `N. `, `N) `, `N- ` or `N: ` prefix is
/// removed when the separator sits within the first 5 characters. The
/// result is padded with empty strings or truncated.
pub fn parse_numbered_response(text: &str, expected: usize) -> Vec<String> {
    let mut results: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| strip_number(line).replace(" \\N ", "\n"))
        .collect();

    results.resize(expected, String::new());
    results
}

fn strip_number(line: &str) -> &str {
    for sep in [". ", ") ", "- ", ": "] {
        if let Some(idx) = line.find(sep) {
            let prefix = &line[..idx];
            if idx < 5 && !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
                return &line[idx + sep.len()..];
            }
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_parse_numbered_response() {
        let text = "1. Merhaba\n\n2) Nasılsın?\n3- İyiyim\n4: Tamam";
        assert_eq!(
            parse_numbered_response(text, 4),
            s(&["Merhaba", "Nasılsın?", "İyiyim", "Tamam"])
        );
    }

    #[test]
    fn test_parse_pads_and_truncates() {
        assert_eq!(parse_numbered_response("1. a", 3), s(&["a", "", ""]));
        assert_eq!(parse_numbered_response("1. a\n2. b\n3. c", 2), s(&["a", "b"]));
    }

    #[test]
    fn test_parse_keeps_unnumbered_and_far_separators() {
        assert_eq!(
            parse_numbered_response("Hello. World\n123456. x", 2),
            s(&["Hello. World", "123456. x"])
        );
    }

    #[test]
    fn test_user_message_context_tail() {
        let ctx = s(&["c1", "c2", "c3", "c4", "c5", "c6", "c7"]);
        let msg = user_message(&s(&["one", "two"]), Some(&ctx));
        assert!(msg.starts_with("Previous context:\nc3\nc4\nc5\nc6\nc7\n\n"));
        assert!(msg.ends_with("Translate these lines:\n1. one\n2. two"));
        assert_eq!(user_message(&s(&["x"]), Some(&[])), "1. x");
    }

    #[test]
    fn test_multiline_cues_round_trip() {
        let msg = user_message(&s(&["top\nbottom"]), None);
        assert_eq!(msg, "1. top \\N bottom");
        assert_eq!(
            parse_numbered_response("1. üst \\N alt", 1),
            s(&["üst\nalt"])
        );
    }

    #[test]
    fn test_system_prompt_mentions_overlap() {
        let p = system_prompt("ja", "tr", 20);
        assert!(p.contains("from Japanese to Turkish"));
        assert!(p.contains("Lines 1 to 20"));
        assert!(!system_prompt("ja", "tr", 0).contains("Lines 1 to"));
    }
}
