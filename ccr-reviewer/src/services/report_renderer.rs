//! Markdown rendering for compliance reports

use std::path::Path;

use super::llm_gateway::ComplianceResult;
use crate::models::Standard;

const COMPLIANT_COLOUR: &str = "#00703c";
const NON_COMPLIANT_COLOUR: &str = "#d4351c";

/// Render one standard set's compliance result
///
/// `result.standards` must be in the same order as `standards` (the Gateway
/// guarantees this).
pub fn render_report(set_name: &str, standards: &[Standard], result: &ComplianceResult) -> String {
    let mut out = format!("# {}\n\n", set_name);

    for (standard, verdict) in standards.iter().zip(&result.standards) {
        let heading = if verdict.title.trim().is_empty() {
            title_from_path(&standard.repository_path)
        } else {
            verdict.title.trim().to_string()
        };
        let (colour, label) = if verdict.compliant {
            (COMPLIANT_COLOUR, "Yes")
        } else {
            (NON_COMPLIANT_COLOUR, "No")
        };

        out.push_str(&format!("## {}\n\n", heading));
        out.push_str(&format!(
            "Compliant: <span style=\"color: {}\">**{}**</span>\n\n",
            colour, label
        ));

        out.push_str("Relevant Files/Sections:\n");
        if verdict.relevant_sections.is_empty() {
            out.push_str("- None identified\n");
        } else {
            for section in &verdict.relevant_sections {
                out.push_str(&format!("- {}\n", section));
            }
        }
        out.push('\n');

        if let Some(recommendations) = verdict
            .recommendations
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
        {
            out.push_str(recommendations);
            out.push_str("\n\n");
        }
    }

    out.push_str("## Summary\n\n");
    out.push_str(result.summary.trim());
    out.push_str("\n\n## Specific Recommendations\n\n");
    if result.recommendations.is_empty() {
        out.push_str("- No changes required\n");
    } else {
        for recommendation in &result.recommendations {
            out.push_str(&format!("- {}\n", recommendation.trim()));
        }
    }

    out
}

/// Report for a set none of whose standards apply to the codebase
pub fn render_no_applicable_standards(set_name: &str) -> String {
    format!(
        "# {}\n\nNo standards in this set apply to the repository's classifications.\n",
        set_name
    )
}

/// File-name-safe form of a standard set name
pub fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "standard-set".to_string()
    } else {
        slug
    }
}

/// `docs/error_handling.md` → `Error Handling`
fn title_from_path(path: &str) -> String {
    let stem = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or(path);

    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_gateway::StandardVerdict;
    use chrono::Utc;
    use uuid::Uuid;

    fn standard(path: &str) -> Standard {
        Standard {
            id: Uuid::new_v4(),
            text: "rule".to_string(),
            repository_path: path.to_string(),
            standard_set_id: Uuid::new_v4(),
            classification_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_report_format() {
        let standards = vec![standard("docs/error_handling.md"), standard("logging.md")];
        let result = ComplianceResult {
            standards: vec![
                StandardVerdict {
                    standard_ref: "S1".into(),
                    title: String::new(),
                    compliant: true,
                    relevant_sections: vec!["src/app.js".into()],
                    recommendations: None,
                },
                StandardVerdict {
                    standard_ref: "S2".into(),
                    title: "Structured Logging".into(),
                    compliant: false,
                    relevant_sections: vec![],
                    recommendations: Some("Use a logger.".into()),
                },
            ],
            summary: "Mostly fine.".into(),
            recommendations: vec!["Replace console.log".into()],
        };

        let report = render_report("Node", &standards, &result);

        assert!(report.starts_with("# Node\n"));
        assert!(report.contains("## Error Handling\n"));
        assert!(report.contains("## Structured Logging\n"));
        assert!(report.contains("<span style=\"color: #00703c\">**Yes**</span>"));
        assert!(report.contains("<span style=\"color: #d4351c\">**No**</span>"));
        assert!(report.contains("- src/app.js\n"));
        assert!(report.contains("Use a logger."));
        assert!(report.contains("## Specific Recommendations\n\n- Replace console.log\n"));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Python Standards"), "python-standards");
        assert_eq!(slug("  node.js / TS "), "node-js-ts");
        assert_eq!(slug("***"), "standard-set");
    }

    #[test]
    fn test_title_from_path() {
        assert_eq!(title_from_path("a/b/secure_coding.md"), "Secure Coding");
        assert_eq!(title_from_path("API-design.txt"), "Api Design");
    }
}
