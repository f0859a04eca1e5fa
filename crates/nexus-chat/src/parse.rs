use std::collections::BTreeMap;

use nexus_core::{AutoLinking, ContextResult, NodeId, NodeSummary};
use serde::{Deserialize, Serialize};

/// Node ids cited in a reply, split by whether the context contains them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Citations {
    pub known: Vec<NodeId>,
    pub unknown: Vec<String>,
}

/// Longest bracketed token still treated as a citation.
const MAX_CITATION_LEN: usize = 128;

/// Collect `[NODE-ID]` citations in order of first appearance.
pub fn citations(reply: &str, context: &ContextResult) -> Citations {
    let mut out = Citations::default();
    let mut rest = reply;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        let token = after[..close].trim();
        rest = &after[close + 1..];

        if token.is_empty()
            || token.len() > MAX_CITATION_LEN
            || token.contains(|c: char| c.is_whitespace() || c == '[')
        {
            continue;
        }
        if context.contains(token) {
            if !out.known.iter().any(|id| id.as_str() == token) {
                out.known.push(NodeId::from(token));
            }
        } else if !out.unknown.iter().any(|t| t == token) {
            out.unknown.push(token.to_string());
        }
    }
    out
}

/// An edge the model proposes for a newly added node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSuggestion {
    pub target_id: NodeId,
    pub justification: String,
    pub confidence: f64,
}

#[derive(Deserialize)]
struct LlmLink {
    target_id: String,
    #[serde(default)]
    justification: String,
    #[serde(default)]
    confidence: f64,
}

/// Parse raw LLM output into link suggestions. Unknown targets, empty
/// justifications and anything under the threshold are dropped; the
/// strongest `max_connections` survive. Returns empty vec on total parse
/// failure.
pub fn link_suggestions(raw: &str, settings: &AutoLinking, candidates: &[NodeSummary]) -> Vec<LinkSuggestion> {
    let json_str = match extract_json_array(raw) {
        Some(s) => s,
        None => return vec![],
    };

    let links: Vec<LlmLink> = match serde_json::from_str(&json_str) {
        Ok(links) => links,
        Err(_) => parse_object_by_object(&json_str),
    };

    let mut best: BTreeMap<&str, LinkSuggestion> = BTreeMap::new();
    for link in links {
        let Some(candidate) = candidates.iter().find(|c| c.id.as_str() == link.target_id.trim()) else {
            continue;
        };
        let justification = link.justification.trim();
        if justification.is_empty()
            || !link.confidence.is_finite()
            || link.confidence < settings.threshold
            || link.confidence > 1.0
        {
            continue;
        }
        let suggestion = LinkSuggestion {
            target_id: candidate.id.clone(),
            justification: justification.to_string(),
            confidence: link.confidence,
        };
        match best.get(candidate.id.as_str()) {
            Some(existing) if existing.confidence >= suggestion.confidence => {}
            _ => {
                best.insert(candidate.id.as_str(), suggestion);
            }
        }
    }

    let mut out: Vec<LinkSuggestion> = best.into_values().collect();
    out.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.target_id.cmp(&b.target_id))
    });
    out.truncate(settings.max_connections);
    out
}

/// Longest justification kept from a manual connection reply, in characters.
const MAX_JUSTIFICATION_LEN: usize = 200;

/// First non-empty line of the reply, without surrounding quotes, fences or
/// a leading "Justification:" label. `None` if nothing usable is left.
pub fn justification(raw: &str) -> Option<String> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))?;
    let line = line
        .strip_prefix("Justification:")
        .or_else(|| line.strip_prefix("justification:"))
        .unwrap_or(line)
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_JUSTIFICATION_LEN).collect())
}

/// Extract the JSON array substring from raw LLM output.
fn extract_json_array(raw: &str) -> Option<String> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

/// Try to parse individual objects from a malformed JSON array.
fn parse_object_by_object(json_str: &str) -> Vec<LlmLink> {
    let mut links = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, ch) in json_str.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(link) = serde_json::from_str::<LlmLink>(&json_str[s..=i]) {
                            links.push(link);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    links
}
