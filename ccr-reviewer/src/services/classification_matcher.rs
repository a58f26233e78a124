//! Classification Matcher
//!
//! Maps names returned by the model onto the known vocabulary. Matching is
//! exact after trimming and ignoring case; anything else is dropped with a
//! warning. An empty result means "universal".

use std::collections::HashSet;
use uuid::Uuid;

use crate::models::Classification;

/// Resolve model-supplied names to classification ids
///
/// Output order follows the model's order, without duplicates.
pub fn match_classifications(llm_names: &[String], known: &[Classification]) -> Vec<Uuid> {
    let mut matched = Vec::new();
    let mut seen = HashSet::new();

    for raw in llm_names {
        let name = raw.trim();
        if name.is_empty() {
            continue;
        }
        let wanted = name.to_lowercase();

        match known.iter().find(|c| c.name.trim().to_lowercase() == wanted) {
            Some(classification) => {
                if seen.insert(classification.id) {
                    matched.push(classification.id);
                }
            }
            None => {
                tracing::warn!(
                    classification = %name,
                    "Discarding classification not in vocabulary"
                );
            }
        }
    }

    matched
}
