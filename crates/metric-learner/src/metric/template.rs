use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::core::errors::TemplateError;

pub const DEFAULT_TEMPLATE: &str = "Rate the quality of the answer '{prediction}' for the question '{input}' \
on a scale from 0 to 1, where 0 is completely incorrect and 1 is perfect.";

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("token regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Input,
    Prediction,
    Gold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Slot),
}

/// Scoring instruction with `{input}`, `{prediction}` and `{gold}` slots.
///
/// `{{` and `}}` render as literal braces. Any other `{name}` is rejected
/// when the template is parsed, not when it is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in TOKEN.captures_iter(&source) {
            let Some(token) = caps.get(0) else { continue };
            literal.push_str(&source[last..token.start()]);
            last = token.end();

            match token.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                "{" | "}" => {
                    return Err(TemplateError::UnbalancedBrace {
                        brace: token.as_str().chars().next().unwrap_or('{'),
                        offset: token.start(),
                    });
                }
                _ => {
                    let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                    let slot = match name {
                        "input" => Slot::Input,
                        "prediction" => Slot::Prediction,
                        "gold" => Slot::Gold,
                        other => {
                            return Err(TemplateError::UnknownPlaceholder {
                                name: other.to_string(),
                            });
                        }
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(slot));
                }
            }
        }

        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Fills the slots. A missing gold renders as the empty string.
    pub fn render(&self, input: &str, prediction: &str, gold: Option<&str>) -> String {
        let mut out = String::with_capacity(self.source.len() + input.len() + prediction.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(Slot::Input) => out.push_str(input),
                Segment::Slot(Slot::Prediction) => out.push_str(prediction),
                Segment::Slot(Slot::Gold) => out.push_str(gold.unwrap_or_default()),
            }
        }
        out
    }

    /// Whether the template itself shows the gold answer.
    pub fn mentions_gold(&self) -> bool {
        self.segments.contains(&Segment::Slot(Slot::Gold))
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE).expect("default template is valid")
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = TemplateError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Self::new(source)
    }
}

impl From<PromptTemplate> for String {
    fn from(template: PromptTemplate) -> Self {
        template.source
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn renders_default_template() {
        let rendered = PromptTemplate::default().render("What is 2+2?", "4", None);
        assert_eq!(
            rendered,
            "Rate the quality of the answer '4' for the question 'What is 2+2?' on a scale from 0 to 1, where 0 is completely incorrect and 1 is perfect."
        );
    }

    #[rstest]
    fn escaped_braces_are_literal() {
        let template = PromptTemplate::new("{{\"q\": \"{input}\"}}").unwrap();
        assert_eq!(template.render("hi", "", None), "{\"q\": \"hi\"}");
    }

    #[rstest]
    fn absent_gold_renders_empty() {
        let template = PromptTemplate::new("gold=[{gold}]").unwrap();
        assert!(template.mentions_gold());
        assert_eq!(template.render("", "", None), "gold=[]");
        assert_eq!(template.render("", "", Some("Paris")), "gold=[Paris]");
    }

    #[rstest]
    #[case("Rate {answer}", TemplateError::UnknownPlaceholder { name: "answer".to_string() })]
    #[case("Rate {input", TemplateError::UnbalancedBrace { brace: '{', offset: 5 })]
    #[case("Rate input}", TemplateError::UnbalancedBrace { brace: '}', offset: 10 })]
    fn invalid_templates_are_rejected(#[case] source: &str, #[case] expected: TemplateError) {
        assert_eq!(PromptTemplate::new(source).unwrap_err(), expected);
    }

    #[rstest]
    fn serializes_as_plain_string() {
        let template = PromptTemplate::new("Score {prediction}").unwrap();
        let json = serde_json::to_string(&template).unwrap();
        assert_eq!(json, "\"Score {prediction}\"");

        let back: PromptTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
        assert!(serde_json::from_str::<PromptTemplate>("\"{oops}\"").is_err());
    }
}
