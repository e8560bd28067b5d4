//! Glossary term hints.
//!
//! Before translation every occurrence of a source term is annotated as
//! `term[=translation]`; engines are told to honour the hint. Afterwards
//! any marker the engine echoed back is removed.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[=[^\]]+\]").ok());

/// Compiled set of source → target terms.
#[derive(Debug, Clone)]
pub struct Glossary {
    terms: HashMap<String, String>,
    pattern: Option<Regex>,
}

impl Glossary {
    pub fn new<I, S, T>(terms: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let terms: HashMap<String, String> = terms
            .into_iter()
            .map(|(s, t)| (s.into(), t.into()))
            .filter(|(s, t)| !s.trim().is_empty() && !t.trim().is_empty())
            .collect();

        // Longest first so "New York City" wins over "New York"
        let mut sources: Vec<&String> = terms.keys().collect();
        sources.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let pattern = if sources.is_empty() {
            None
        } else {
            let alternation = sources
                .iter()
                .map(|s| regex::escape(s))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&alternation).ok()
        };

        Self { terms, pattern }
    }

    pub fn empty() -> Self {
        Self {
            terms: HashMap::new(),
            pattern: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }
}

/// Annotate glossary terms in `text`.
pub fn apply_glossary_pre(text: &str, glossary: &Glossary) -> String {
    let Some(pattern) = &glossary.pattern else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let src = &caps[0];
            match glossary.terms.get(src) {
                Some(tgt) => format!("{}[={}]", src, tgt),
                None => src.to_string(),
            }
        })
        .into_owned()
}

/// Strip glossary markers from engine output.
pub fn apply_glossary_post(text: &str) -> String {
    match MARKER.as_ref() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}
