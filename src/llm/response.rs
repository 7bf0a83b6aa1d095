//! Parsing of reasoning-service replies.
//!
//! Every role prompt asks the model to reason freely and then emit a final line starting with
//! `RESPONSE:`. Anything that does not follow the convention is a malformed response, which the
//! caller retries.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{GuiPilotError, GuiPilotResult};

fn response_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Tolerates markdown emphasis around the marker, e.g. `**RESPONSE:**`.
    RE.get_or_init(|| Regex::new(r"(?i)\**\s*RESPONSE\s*:\s*\**").expect("static regex"))
}

fn list_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•]|\d+\s*[.)])\s*").expect("static regex"))
}

/// Text after the last `RESPONSE:` marker, trimmed.
pub fn extract_response(text: &str) -> GuiPilotResult<&str> {
    let last = response_marker()
        .find_iter(text)
        .last()
        .ok_or_else(|| GuiPilotError::MalformedResponse(format!("missing 'RESPONSE:' marker in: {}", preview(text))))?;
    let body = text[last.end()..].trim().trim_matches('`').trim();
    if body.is_empty() {
        return Err(GuiPilotError::MalformedResponse("empty body after 'RESPONSE:'".into()));
    }
    Ok(body)
}

/// Split a `;`- or newline-separated list, stripping bullets and numbering.
pub fn parse_list(body: &str) -> Vec<String> {
    body.split([';', '\n'])
        .map(|item| list_prefix().replace(item, "").trim().trim_end_matches('.').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// `RESPONSE:` body parsed as a non-empty list.
pub fn parse_response_list(text: &str) -> GuiPilotResult<Vec<String>> {
    let items = parse_list(extract_response(text)?);
    if items.is_empty() {
        return Err(GuiPilotError::MalformedResponse("response list is empty".into()));
    }
    Ok(items)
}

/// `RESPONSE: yes` / `RESPONSE: no`.
pub fn parse_yes_no(text: &str) -> GuiPilotResult<bool> {
    let body = extract_response(text)?;
    let first = body
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .to_lowercase();
    match first.as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(GuiPilotError::MalformedResponse(format!("expected yes/no, got: {}", preview(body)))),
    }
}

/// True when a body reads as "nothing left to do".
pub fn is_done_marker(body: &str) -> bool {
    let normalized = body.trim().trim_end_matches('.').to_lowercase();
    matches!(normalized.as_str(), "done" | "none" | "finished" | "complete" | "completed")
}

/// Split `label: rest` where label is one of `labels` (case-insensitive).
pub fn split_labelled<'a>(body: &'a str, labels: &[&str]) -> Option<(String, &'a str)> {
    let (head, rest) = body.split_once(':')?;
    let head = head.trim().trim_matches('*').trim().to_lowercase();
    labels
        .iter()
        .find(|l| l.eq_ignore_ascii_case(&head))
        .map(|l| (l.to_string(), rest.trim()))
}

pub fn preview(text: &str) -> String {
    const MAX: usize = 160;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_required() {
        let err = extract_response("I think we should open the browser").unwrap_err();
        assert!(matches!(err, GuiPilotError::MalformedResponse(_)));
    }

    #[test]
    fn last_marker_wins_and_markdown_is_tolerated() {
        let text = "Reasoning: the format is RESPONSE: <list>\n**RESPONSE:** Open the browser; Search dogs";
        assert_eq!(extract_response(text).unwrap(), "Open the browser; Search dogs");
    }

    #[test]
    fn list_strips_numbering_and_blanks() {
        let items = parse_list("1. Open the browser;  2) Click the search bar ;; - Type dogs.");
        assert_eq!(items, vec!["Open the browser", "Click the search bar", "Type dogs"]);
    }

    #[test]
    fn newline_lists_are_accepted() {
        let items = parse_response_list("RESPONSE:\n1. open the application\n2. insert image\n").unwrap();
        assert_eq!(items, vec!["open the application", "insert image"]);
    }

    #[test]
    fn yes_no() {
        assert!(parse_yes_no("looks right\nRESPONSE: Yes.").unwrap());
        assert!(!parse_yes_no("RESPONSE: no, the dialog is still open").unwrap());
        assert!(parse_yes_no("RESPONSE: maybe").is_err());
    }

    #[test]
    fn done_markers() {
        assert!(is_done_marker("DONE"));
        assert!(is_done_marker(" none. "));
        assert!(!is_done_marker("Download the image"));
    }

    #[test]
    fn labelled_split() {
        let (label, rest) = split_labelled("Minor: click slightly to the right", &["minor", "major"]).unwrap();
        assert_eq!(label, "minor");
        assert_eq!(rest, "click slightly to the right");
        assert!(split_labelled("Unclear: ?", &["minor", "major"]).is_none());
    }
}
