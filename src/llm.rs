//! Prompt construction and response parsing for the reasoning provider.
//!
//! Everything here is a pure function: prompts in, parsed structures out.
//! The coordinator owns transport, retries, and caching. Parsers are
//! deliberately tolerant: small local models drift from the requested
//! format, so each parser accepts the common drift shapes before giving
//! up with [`Error::Parse`] (which the retry layer treats as transient).

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{InsertionHint, Suggestion};

/// One ranked candidate as reported by the provider. `index` is 1-based,
/// matching the numbering used in the prompt.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RankingItem {
    pub index: usize,
    pub score: f32,
    pub reason: String,
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn extract_json_array(text: &str) -> Option<&str> {
    let first = text.find('[')?;
    let last = text.rfind(']')?;
    (last > first).then(|| &text[first..=last])
}

fn extract_json_object(text: &str) -> Option<&str> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    (last > first).then(|| &text[first..=last])
}

// --- Reranking ---

/// Ask the provider to score each candidate 0-10 for relevance to the
/// source document. The response is requested as plain lines rather than
/// JSON: small models produce the line format far more reliably.
pub fn build_rerank_prompt(doc_title: &str, doc_content: &str, candidates: &[Suggestion]) -> String {
    let preview = truncate_chars(doc_content, 800);

    let candidate_lines: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "{}. Title: \"{}\"\n   Embedding Similarity: {:.2}\n   Context: {}",
                i + 1,
                s.title,
                s.similarity,
                s.context
            )
        })
        .collect();

    format!(
        r#"You are ranking {count} documents for relevance to the current document.

Current Document: "{title}"
Content: {preview}

Documents to rank:
{candidates}

TASK: For EACH of the {count} documents above, provide:
1. A relevance score (0.0 to 10.0, where 10 is most relevant)
2. A brief reason (max 15 words)

STRICT FORMATTING RULES:
- Output ONLY the rankings in the exact format below.
- Do NOT use Markdown formatting (no bolding, no italics).
- Do NOT include the document title in the output line.
- Keep each ranking on a SINGLE line.

Required Format:
Document 1: [score] - [reason]
Document 2: [score] - [reason]
...

Make sure you analyze ALL {count} documents. Do not skip any!"#,
        count = candidates.len(),
        title = doc_title,
        preview = preview,
        candidates = candidate_lines.join("\n\n"),
    )
}

/// Parse ranking lines of the form `Document N: score - reason`, with the
/// observed drift variants (`Doc N:`, `Source N:`, `N. score - reason`,
/// stray `*`/`#` decoration), then fall back to JSON shapes: a plain
/// array, a single object, or an object wrapping the array under
/// `candidates` or `indexes`.
pub fn parse_rankings(response: &str) -> Result<Vec<RankingItem>> {
    let mut rankings = Vec::new();

    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(item) = parse_ranking_line(trimmed) {
            rankings.push(item);
        }
    }

    if !rankings.is_empty() {
        return Ok(rankings);
    }

    let json_text = extract_json_array(response).unwrap_or(response);
    if let Ok(items) = serde_json::from_str::<Vec<RankingItem>>(json_text) {
        return Ok(items);
    }
    if let Ok(single) = serde_json::from_str::<RankingItem>(json_text) {
        return Ok(vec![single]);
    }

    #[derive(Deserialize)]
    struct WrappedCandidates {
        candidates: Vec<RankingItem>,
    }
    #[derive(Deserialize)]
    struct WrappedIndexes {
        indexes: Vec<RankingItem>,
    }
    if let Ok(wrapped) = serde_json::from_str::<WrappedCandidates>(json_text) {
        return Ok(wrapped.candidates);
    }
    if let Ok(wrapped) = serde_json::from_str::<WrappedIndexes>(json_text) {
        return Ok(wrapped.indexes);
    }

    Err(Error::Parse(format!(
        "no rankings recognized in response: {}",
        truncate_chars(response, 200)
    )))
}

fn parse_ranking_line(line: &str) -> Option<RankingItem> {
    // Markers are matched case-insensitively on the original line;
    // offsets from a lowercased copy would be wrong for characters whose
    // lowercase form has a different byte length.
    let (index_part, rest_part) = if let Some(idx) = find_ascii_ci(line, "document ") {
        split_on_colon(&line[idx + 9..])?
    } else if let Some(idx) = find_ascii_ci(line, "doc ") {
        split_on_colon(&line[idx + 4..])?
    } else if let Some(idx) = find_ascii_ci(line, "source ") {
        split_on_colon(&line[idx + 7..])?
    } else {
        // "1. 8.5 - reason"
        let dot = line.find('.')?;
        let head = &line[..dot];
        head.trim().parse::<usize>().ok()?;
        (head, &line[dot + 1..])
    };

    let index: usize = index_part
        .trim()
        .replace(['#', '*'], "")
        .parse()
        .ok()?;

    let content = rest_part.trim();
    let (score_str, reason) = if let Some(dash) = content.find(" - ") {
        (&content[..dash], &content[dash + 3..])
    } else if let Some(dash) = content.find('-') {
        (&content[..dash], &content[dash + 1..])
    } else if let Some(colon) = content.find(':') {
        (&content[..colon], &content[colon + 1..])
    } else {
        (content, "Relevant")
    };

    let score: f32 = score_str.trim().replace('*', "").parse().ok()?;
    Some(RankingItem {
        index,
        score,
        reason: reason.trim().to_string(),
    })
}

fn split_on_colon(after: &str) -> Option<(&str, &str)> {
    let colon = after.find(':')?;
    Some((&after[..colon], &after[colon + 1..]))
}

/// Byte offset of the first ASCII-case-insensitive occurrence of
/// `needle` (which must be ASCII) in `haystack`. Matching ASCII bytes
/// always sit on UTF-8 character boundaries, so the offset is safe to
/// slice with.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(h, n)| h.eq_ignore_ascii_case(n))
    })
}

/// Apply provider rankings back onto the candidate list.
///
/// Ranked candidates carry their score and reason and sort by score
/// descending; candidates the provider skipped are appended below them,
/// ordered by similarity, so no candidate is ever silently dropped.
/// Out-of-range indices are discarded.
pub fn merge_rankings(candidates: &[Suggestion], rankings: Vec<RankingItem>) -> Vec<Suggestion> {
    let mut ranked_indices = std::collections::HashSet::new();
    let mut merged: Vec<Suggestion> = Vec::with_capacity(candidates.len());

    for ranking in rankings {
        let Some(idx) = ranking.index.checked_sub(1) else {
            continue;
        };
        if idx >= candidates.len() || !ranked_indices.insert(idx) {
            continue;
        }
        let mut suggestion = candidates[idx].clone();
        suggestion.llm_score = Some(ranking.score);
        suggestion.llm_reason = Some(ranking.reason);
        merged.push(suggestion);
    }

    for (idx, candidate) in candidates.iter().enumerate() {
        if !ranked_indices.contains(&idx) {
            merged.push(candidate.clone());
        }
    }

    merged.sort_by(|a, b| match (a.llm_score, b.llm_score) {
        (Some(sa), Some(sb)) => sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => b
            .similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal),
    });

    merged
}

// --- Keyword extraction ---

pub fn build_keyword_prompt(doc_title: &str, doc_content: &str) -> String {
    let body = truncate_chars(doc_content, 3000);
    format!(
        r#"Extract the most important keywords, concepts, and topics from this document titled "{title}".

Document Content:
{body}

Task: Identify 5-15 key terms that represent the main concepts discussed in this document. These should be:
- Technical terms, theories, or concepts mentioned
- Named entities (people, places, specific things)
- Important topics or themes
- Terms that other related documents might reference

Return ONLY a JSON array of strings (no explanations):
["keyword1", "keyword2", "keyword3", ...]

Keywords:"#,
        title = doc_title,
        body = body,
    )
}

/// Accepts a bare JSON string array, an object with a `keywords` array,
/// or an object whose first array-valued field holds the keywords.
pub fn parse_keywords(response: &str) -> Result<Vec<String>> {
    let trimmed = response.trim();

    if let Ok(keywords) = serde_json::from_str::<Vec<String>>(trimmed) {
        return Ok(keywords);
    }

    let object = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(trimmed)
        .map_err(|e| Error::Parse(format!("keyword response was not JSON: {}", e)))?;

    let array = match object.get("keywords") {
        Some(serde_json::Value::Array(arr)) => Some(arr),
        _ => object.values().find_map(|v| v.as_array()),
    };

    let keywords: Vec<String> = array
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if keywords.is_empty() {
        return Err(Error::Parse(
            "keyword response had no string array".into(),
        ));
    }
    Ok(keywords)
}

// --- Insertion points ---

pub fn build_insertion_prompt(link_title: &str, doc_content: &str, link_context: &str) -> String {
    let body = truncate_chars(doc_content, 2000);
    format!(
        r#"Find the best place to insert a link to "{title}" in this document.

Document Content:
{body}

Link Context (what the linked document is about):
{context}

Task: Identify the specific phrase or sentence where this link would add most value. Consider:
- Where would a reader naturally want more information?
- Which sentence mentions concepts explained by the link?
- Where would the link flow naturally?

IMPORTANT: Return ONLY valid JSON, no other text.

Respond with this exact JSON format:
{{
  "phrase": "exact text from document to replace",
  "reason": "why this is the best insertion point",
  "confidence": 0.85
}}

If no good insertion point exists, return: {{"phrase": null, "reason": "No natural insertion point found", "confidence": 0.0}}"#,
        title = link_title,
        body = body,
        context = link_context,
    )
}

pub fn parse_insertion(response: &str) -> Result<InsertionHint> {
    #[derive(Deserialize)]
    struct Raw {
        phrase: Option<String>,
        #[serde(default)]
        confidence: f32,
        #[serde(default)]
        reason: String,
    }

    let trimmed = response.trim();
    let json_text = extract_json_object(trimmed).unwrap_or(trimmed);
    let raw: Raw = serde_json::from_str(json_text)
        .map_err(|e| Error::Parse(format!("insertion response was not JSON: {}", e)))?;

    Ok(InsertionHint {
        phrase: raw.phrase.filter(|p| !p.is_empty()),
        confidence: raw.confidence.clamp(0.0, 1.0),
        reason: raw.reason,
    })
}
