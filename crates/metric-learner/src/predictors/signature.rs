use anyhow::{Result, anyhow, bail};
use std::fmt;
use std::str::FromStr;

/// Named input and output fields of a [`Predict`](super::Predict) program,
/// written `"question, context -> answer"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub instruction: String,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
}

fn parse_fields(side: &str) -> Result<Vec<String>> {
    let fields: Vec<String> = side
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect();

    for field in &fields {
        if !field.chars().all(|c| c.is_alphanumeric() || c == '_') {
            bail!("invalid field name `{field}`");
        }
    }
    Ok(fields)
}

impl Signature {
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// The instruction, or a generic one naming the fields.
    pub fn objective(&self) -> String {
        if !self.instruction.is_empty() {
            return self.instruction.clone();
        }

        let quote = |fields: &[String]| {
            fields
                .iter()
                .map(|k| format!("`{k}`"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Given the fields {}, produce the fields {}.",
            quote(&self.input_fields),
            quote(&self.output_fields)
        )
    }
}

impl FromStr for Signature {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let (inputs, outputs) = text
            .split_once("->")
            .ok_or_else(|| anyhow!("signature `{text}` must look like `inputs -> outputs`"))?;

        let input_fields = parse_fields(inputs)?;
        let output_fields = parse_fields(outputs)?;
        if input_fields.is_empty() || output_fields.is_empty() {
            bail!("signature `{text}` needs at least one input and one output field");
        }
        if let Some(dup) = output_fields.iter().find(|f| input_fields.contains(f)) {
            bail!("field `{dup}` is both an input and an output");
        }

        Ok(Self {
            instruction: String::new(),
            input_fields,
            output_fields,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.input_fields.join(", "),
            self.output_fields.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn parses_fields_in_order() {
        let sig: Signature = "question, context -> answer".parse().unwrap();
        assert_eq!(sig.input_fields, vec!["question", "context"]);
        assert_eq!(sig.output_fields, vec!["answer"]);
        assert_eq!(sig.to_string(), "question, context -> answer");
    }

    #[rstest]
    #[case("question answer")]
    #[case("-> answer")]
    #[case("question ->")]
    #[case("question -> question")]
    #[case("the question -> answer")]
    fn rejects_malformed_signatures(#[case] text: &str) {
        assert!(text.parse::<Signature>().is_err());
    }

    #[rstest]
    fn default_objective_names_fields() {
        let sig: Signature = "question -> answer".parse().unwrap();
        assert_eq!(
            sig.objective(),
            "Given the fields `question`, produce the fields `answer`."
        );
        assert_eq!(sig.with_instruction("Answer briefly.").objective(), "Answer briefly.");
    }
}
