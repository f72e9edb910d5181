//! System-prompt compilation.
//!
//! The prompt definition (identity, business rules, quote fields,
//! workflow) lives in a TOML file so operators can tune it without a
//! rebuild; the surrounding structure, including the mandatory JSON
//! response contract, is rendered from an embedded template at startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tera::{Context, Tera};
use thiserror::Error;

const SYSTEM_PROMPT_TEMPLATE: &str = r#"{{ identity }}

Business Rules:
{% for rule in business_rules %}- {{ rule }}
{% endfor %}
Quote Fields Needed: {% for field in quote_fields_needed %}{{ field }}{% if not loop.last %}, {% endif %}{% endfor %}

Workflow: {{ workflow }}

You MUST respond ONLY with a valid JSON object matching this exact schema - no extra text:
{
  "reply_to_user": "<string: message to send to the customer>",
  "extracted_data": {
    "address": "<string or 'unknown'>",
    "elevator_access": "<string or 'unknown'>",
    "stairs": "<string or 'unknown'>",
    "inventory": "<string or 'unknown'>"
  },
  "action": "<one of: continue | handoff | schedule>"
}"#;

#[derive(Clone, Debug, Deserialize)]
pub struct PromptDefinition {
    pub identity: String,
    pub business_rules: Vec<String>,
    pub quote_fields_needed: Vec<String>,
    pub workflow: String,
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("could not read prompt definition `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse prompt definition `{path}`: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("prompt template render failed: {0}")]
    Render(#[from] tera::Error),
}

/// Load the definition file and compile the full system prompt. Called
/// once at bootstrap; any failure is fatal so a bad prompt surfaces
/// immediately.
pub fn compile(path: &Path) -> Result<String, PromptError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| PromptError::Read { path: path.to_path_buf(), source })?;
    let definition: PromptDefinition = toml::from_str(&raw)
        .map_err(|source| PromptError::Parse { path: path.to_path_buf(), source })?;
    compile_definition(&definition)
}

pub fn compile_definition(definition: &PromptDefinition) -> Result<String, PromptError> {
    let mut tera = Tera::default();
    tera.add_raw_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)?;

    let mut context = Context::new();
    context.insert("identity", &definition.identity);
    context.insert("business_rules", &definition.business_rules);
    context.insert("quote_fields_needed", &definition.quote_fields_needed);
    context.insert("workflow", &definition.workflow);

    Ok(tera.render("system_prompt", &context)?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{compile, compile_definition, PromptDefinition};

    fn definition() -> PromptDefinition {
        PromptDefinition {
            identity: "You are the quoting assistant.".to_string(),
            business_rules: vec![
                "Never quote a price yourself.".to_string(),
                "Collect all quote fields before handing off.".to_string(),
            ],
            quote_fields_needed: vec!["address".to_string(), "inventory".to_string()],
            workflow: "Gather details, then hand off.".to_string(),
        }
    }

    #[test]
    fn compiled_prompt_contains_all_sections_and_the_contract() {
        let prompt = compile_definition(&definition()).expect("compile");

        assert!(prompt.starts_with("You are the quoting assistant."));
        assert!(prompt.contains("- Never quote a price yourself."));
        assert!(prompt.contains("Quote Fields Needed: address, inventory"));
        assert!(prompt.contains("Workflow: Gather details, then hand off."));
        assert!(prompt.contains(r#""action": "<one of: continue | handoff | schedule>""#));
    }

    #[test]
    fn compile_reads_a_toml_definition_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("system_prompt.toml");
        fs::write(
            &path,
            r#"
identity = "You are the quoting assistant."
business_rules = ["Be brief."]
quote_fields_needed = ["address"]
workflow = "Gather details."
"#,
        )
        .expect("write definition");

        let prompt = compile(&path).expect("compile");
        assert!(prompt.contains("- Be brief."));
    }

    #[test]
    fn missing_definition_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let result = compile(&dir.path().join("absent.toml"));
        assert!(result.is_err());
    }
}
