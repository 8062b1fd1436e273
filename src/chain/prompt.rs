use std::collections::{BTreeSet, HashMap};

use super::ChainError;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A prompt with `{name}` placeholders. `{{` and `}}` produce literal braces.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    input_variables: Vec<String>,
    template: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses `template` and checks every placeholder against `input_variables`.
    pub fn new<S: AsRef<str>>(input_variables: &[S], template: &str) -> Result<Self, ChainError> {
        let segments = parse(template)?;
        let declared: BTreeSet<&str> = input_variables.iter().map(AsRef::as_ref).collect();
        for segment in &segments {
            if let Segment::Variable(name) = segment {
                if !declared.contains(name.as_str()) {
                    return Err(ChainError::UndeclaredVariable(name.clone()));
                }
            }
        }
        Ok(Self {
            input_variables: input_variables
                .iter()
                .map(|v| v.as_ref().to_string())
                .collect(),
            template: template.to_string(),
            segments,
        })
    }

    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    pub fn format(&self, inputs: &HashMap<String, String>) -> Result<String, ChainError> {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    let value = inputs
                        .get(name)
                        .ok_or_else(|| ChainError::MissingVariable(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn parse(template: &str) -> Result<Vec<Segment>, ChainError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(ChainError::MalformedTemplate(format!(
                                "unterminated placeholder '{{{}'",
                                name
                            )))
                        }
                    }
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(ChainError::MalformedTemplate(
                        "empty placeholder '{}'".to_string(),
                    ));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Variable(name));
            }
            '}' => {
                return Err(ChainError::MalformedTemplate(
                    "single '}' encountered in template".to_string(),
                ))
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
