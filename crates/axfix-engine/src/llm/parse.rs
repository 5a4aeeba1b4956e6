//! Parsing of model output: tagged fix responses, JSON grouping answers, and
//! line lookups. Models wrap things in fences and stray prose often enough
//! that every parser here salvages before it gives up.

use super::client::sanitize_api_response;
use axfix_core::issue::LineRange;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Phrase the fix prompt asks the model to use when it will not attempt a fix.
pub const DECLINE_PHRASE: &str = "unable to confidently address";

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

/// Body of a fenced block (```lang ... ```), if the text is one.
pub fn strip_markdown_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open,
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].to_string())
}

fn extract_balanced_json_from(content: &str, start: usize) -> Option<&str> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&content[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_json_candidates(content: &str, max_candidates: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, ch) in content.char_indices() {
        if out.len() >= max_candidates {
            break;
        }
        if ch == '{' || ch == '[' {
            if let Some(candidate) = extract_balanced_json_from(content, idx) {
                push_unique_candidate(&mut out, candidate);
            }
        }
    }
    out
}

/// Deserialize JSON that may be fenced or surrounded by prose. Candidates are
/// tried in order: the raw text, the fence body, then balanced fragments.
pub fn parse_structured_content<T>(content: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let mut candidates = Vec::new();
    push_unique_candidate(&mut candidates, content);
    if let Some(stripped) = strip_markdown_fences(content) {
        push_unique_candidate(&mut candidates, stripped);
    }

    let mut idx = 0usize;
    while idx < candidates.len() && idx < 2 {
        let current = candidates[idx].clone();
        for extracted in extract_json_candidates(&current, 4) {
            push_unique_candidate(&mut candidates, extracted);
        }
        idx += 1;
    }

    let mut last_err: Option<String> = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(&candidate) {
            Ok(data) => return Ok(data),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(anyhow::anyhow!(
        "Failed to parse structured response: {}\nContent: {}",
        last_err.unwrap_or_else(|| "unknown parse error".to_string()),
        sanitize_api_response(content)
    ))
}

/// Text between `<tag>` and the last `</tag>`.
pub fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].rfind(&close)? + start;
    Some(&text[start..end])
}

pub fn is_declined(text: &str) -> bool {
    text.to_lowercase().contains(DECLINE_PHRASE)
}

/// What a fix response carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixResponse {
    pub explanation: Option<String>,
    pub file: Option<String>,
}

/// Split a `<response><explanation>..</explanation><file>..</file></response>`
/// answer. The file body keeps its content exactly, minus one leading and one
/// trailing newline and an optional code fence.
pub fn parse_fix_response(text: &str) -> FixResponse {
    let explanation = extract_tag(text, "explanation")
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);

    let file = extract_tag(text, "file").map(|body| {
        let body = body.strip_prefix('\n').unwrap_or(body);
        let body = body.strip_suffix('\n').unwrap_or(body);
        match strip_markdown_fences(body) {
            Some(inner) => inner,
            None => body.to_string(),
        }
    });

    FixResponse { explanation, file }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroupingAnswer {
    Bare(Vec<Vec<usize>>),
    Wrapped { groups: Vec<Vec<usize>> },
}

/// `[[1,2],[3]]`, or the same wrapped as `{"groups": ...}` in JSON mode.
pub fn parse_groups(content: &str) -> anyhow::Result<Vec<Vec<usize>>> {
    let answer: GroupingAnswer = parse_structured_content(content)?;
    let groups = match answer {
        GroupingAnswer::Bare(groups) | GroupingAnswer::Wrapped { groups } => groups,
    };
    Ok(groups.into_iter().filter(|g| !g.is_empty()).collect())
}

#[derive(Deserialize)]
struct LineAnswer {
    start: usize,
    #[serde(default)]
    end: Option<usize>,
}

/// `{"start": 12, "end": 14}`; `end` may be omitted for a single line.
pub fn parse_line_answer(content: &str) -> anyhow::Result<LineRange> {
    let answer: LineAnswer = parse_structured_content(content)?;
    if answer.start == 0 {
        return Err(anyhow::anyhow!("line numbers are 1-based, got 0"));
    }
    Ok(LineRange::new(answer.start, answer.end.unwrap_or(answer.start)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct ParseProbe {
        description: String,
    }

    #[test]
    fn test_parse_structured_content_handles_markdown_fences() {
        let fenced = "```json\n{\"description\":\"hello\"}\n```";
        let parsed: ParseProbe = parse_structured_content(fenced).unwrap();
        assert_eq!(parsed.description, "hello");
    }

    #[test]
    fn test_parse_structured_content_handles_leading_prose() {
        let chatty = "Sure! Here you go: {\"description\":\"hello\"} Let me know.";
        let parsed: ParseProbe = parse_structured_content(chatty).unwrap();
        assert_eq!(parsed.description, "hello");
        assert!(parse_structured_content::<ParseProbe>("no json here").is_err());
    }

    #[test]
    fn test_parse_fix_response() {
        let text = "<response>\n<explanation>\nAdded alt text.\n</explanation>\n<file>\nexport const A = () => <img alt=\"Logo\" />;\n</file>\n</response>";
        let parsed = parse_fix_response(text);
        assert_eq!(parsed.explanation.as_deref(), Some("Added alt text."));
        assert_eq!(
            parsed.file.as_deref(),
            Some("export const A = () => <img alt=\"Logo\" />;")
        );
    }

    #[test]
    fn test_parse_fix_response_strips_code_fence() {
        let text = "<file>\n```tsx\nconst a = 1;\n```\n</file>";
        assert_eq!(parse_fix_response(text).file.as_deref(), Some("const a = 1;\n"));
    }

    #[test]
    fn test_parse_fix_response_without_file() {
        let parsed = parse_fix_response("I could not do it.");
        assert_eq!(parsed.file, None);
        assert_eq!(parsed.explanation, None);
    }

    #[test]
    fn test_is_declined() {
        assert!(is_declined(
            "Sorry, I am Unable to confidently address this issue."
        ));
        assert!(!is_declined("<file>ok</file>"));
    }

    #[test]
    fn test_parse_groups_forms() {
        assert_eq!(parse_groups("[[1,2],[3]]").unwrap(), vec![vec![1, 2], vec![3]]);
        assert_eq!(
            parse_groups("```json\n{\"groups\": [[2], [1, 3], []]}\n```").unwrap(),
            vec![vec![2], vec![1, 3]]
        );
        assert!(parse_groups("group them all").is_err());
    }

    #[test]
    fn test_parse_line_answer() {
        assert_eq!(
            parse_line_answer("{\"start\": 14, \"end\": 12}").unwrap(),
            LineRange::new(12, 14)
        );
        assert_eq!(
            parse_line_answer("The element is at {\"start\": 7}").unwrap(),
            LineRange::single(7)
        );
        assert!(parse_line_answer("{\"start\": 0}").is_err());
    }
}
