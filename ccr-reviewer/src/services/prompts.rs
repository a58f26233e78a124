//! Prompt templates
//!
//! Placeholders are written `{{name}}`. `render` substitutes in a single pass
//! so content that itself contains `{{...}}` is never re-expanded.

pub const STANDARD_CLASSIFICATION_SYSTEM: &str = "You are a standards analysis expert that helps \
determine which technology classifications apply to software development standards.";

pub const STANDARD_CLASSIFICATION_TEMPLATE: &str = r#"Given a standard's content and a list of possible classifications, determine which classifications apply to this standard.

Classifications: {{classifications}}

Standard Content:
{{content}}

A standard is either universal (it applies to every codebase regardless of technology) or scoped to specific classifications.
- Use the title and sub headers of the standard to decide whether it is universal.
- A "security" standard is universal. A "Docker" standard may be universal if it applies to all codebases and "Docker" is not in the Classifications list.
- If the standard is universal, return an empty list.
- Otherwise return only names taken from the Classifications list above.

Respond with a single JSON object and nothing else:
{"classifications": ["<name>", ...]}"#;

pub const CODEBASE_CLASSIFICATION_SYSTEM: &str = "You are a technology stack analysis expert. \
Analyze codebases to determine which technologies and programming languages are used. \
Consider all aspects including code files, configuration files, and dependencies.";

pub const CODEBASE_CLASSIFICATION_TEMPLATE: &str = r#"Analyze this codebase and identify which technology classifications it uses, choosing only from the list below.

Available Technology Classifications:
{{classifications}}

Codebase Files and Content:
{{content}}

Key areas to consider:
1. Programming languages
2. Frameworks & libraries
3. Build tools & package managers
4. Config files
5. Infrastructure & deployment

Respond with a single JSON object and nothing else. Use an empty list when nothing matches:
{"classifications": ["<name>", ...]}"#;

pub const COMPLIANCE_SYSTEM: &str = "You are a code compliance analysis expert. \
Analyze code against compliance standards. Determine if code meets each standard. \
Provide detailed recommendations for non-compliant areas. \
Consider the codebase as a whole when evaluating compliance.";

pub const COMPLIANCE_TEMPLATE: &str = r#"{{custom_prompt}}Given the set of standards below:
{{standards}}

Compare the entire codebase of the submitted repository below, to assess how well the standards are adhered to:
{{codebase}}

For each standard:
- Determine if the codebase as a whole is compliant (true/false)
- List specific files/sections in the codebase that are relevant to the standard (if any)
- If non-compliant, provide concise recommendations of 1-2 sentences
- Consider dependencies and interactions between different parts of the code

Respond with a single JSON object and nothing else, covering every standard reference exactly once:
{
  "standards": [
    {
      "standard_ref": "<reference such as S1>",
      "title": "<short title of the standard>",
      "compliant": true,
      "relevant_sections": ["<file/path>"],
      "recommendations": "<text, or null when compliant>"
    }
  ],
  "summary": "<overall narrative, informative but concise>",
  "recommendations": ["<specific change needed>"]
}"#;

pub const CUSTOM_PROMPT_PREFIX: &str = "Additional instructions for this review:\n";

pub const MALFORMED_RETRY_SUFFIX: &str = "\n\nYour previous reply could not be used: {{reason}}\n\
Reply again with only the JSON object described above.";

/// Substitute `{{key}}` placeholders in one pass
///
/// Unknown placeholders are left as written.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
