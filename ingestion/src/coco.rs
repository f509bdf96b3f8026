//! Incremental COCO JSON parser.
//!
//! COCO annotation files are a single root object whose `images`,
//! `annotations` and `categories` keys hold arrays that can run into the
//! hundreds of thousands of elements. [`CocoStream`] walks the document
//! exactly once, character by character, and yields a [`CocoEvent`] the
//! instant any element of those three arrays closes, without ever holding
//! the whole file (or even a whole array) in memory at once.
//!
//! The character-driven scanning style (`scan_value`/`scan_string`/
//! `skip_ws`) follows the same idiom as [`json_stream_parser`], generalized
//! with an explicit bracket stack so it isn't limited to a single value.
//! Each extracted element's source text is then fed, char by char, into a
//! fresh `json_stream_parser::JsonStreamParser`, reusing its existing
//! scalar/object FSM rather than re-implementing JSON value parsing.

use common::error::AppError;
use json_stream_parser::JsonStreamParser;
use serde_json::Value;
use std::iter::Peekable;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CocoParseError {
    #[error("malformed COCO document: {0}")]
    Malformed(String),
    #[error("unexpected end of input")]
    UnexpectedEof,
}

impl From<CocoParseError> for AppError {
    fn from(err: CocoParseError) -> Self {
        AppError::ParseError(err.to_string())
    }
}

/// One fully-materialized element pulled from the `images`, `annotations`
/// or `categories` array.
#[derive(Debug, Clone)]
pub enum CocoEvent {
    Category(Value),
    Image(Value),
    Annotation(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayKind {
    Images,
    Annotations,
    Categories,
}

/// Pull parser over any `Iterator<Item = char>` source. Construct from a
/// string via [`CocoStream::new`], or from a streaming file reader via
/// [`crate::scanner::read_chars`] to avoid loading the document into
/// memory up front.
pub struct CocoStream<I: Iterator<Item = char>> {
    chars: Peekable<I>,
    current_array: Option<ArrayKind>,
    started_root: bool,
    finished: bool,
}

impl<I: Iterator<Item = char>> CocoStream<I> {
    pub fn new(chars: I) -> Self {
        Self {
            chars: chars.peekable(),
            current_array: None,
            started_root: false,
            finished: false,
        }
    }

    fn skip_ws(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    /// Reads one JSON string literal, quotes included, honouring `\"`
    /// escapes so an escaped quote doesn't end the scan early.
    fn scan_string(&mut self) -> Result<String, CocoParseError> {
        let mut out = String::new();
        match self.chars.next() {
            Some('"') => out.push('"'),
            _ => return Err(CocoParseError::Malformed("expected '\"'".to_string())),
        }
        loop {
            let c = self.chars.next().ok_or(CocoParseError::UnexpectedEof)?;
            out.push(c);
            if c == '\\' {
                let escaped = self.chars.next().ok_or(CocoParseError::UnexpectedEof)?;
                out.push(escaped);
                continue;
            }
            if c == '"' {
                break;
            }
        }
        Ok(out)
    }

    /// Reads a balanced `{...}` or `[...]`, tracking nesting depth with an
    /// explicit stack so arbitrarily deep structures never recurse.
    fn scan_bracketed(&mut self) -> Result<String, CocoParseError> {
        let mut out = String::new();
        let mut stack: Vec<char> = Vec::new();
        loop {
            match self.chars.peek().copied() {
                None => return Err(CocoParseError::UnexpectedEof),
                Some('"') => {
                    out.push_str(&self.scan_string()?);
                    if stack.is_empty() {
                        break;
                    }
                }
                Some(c) => {
                    self.chars.next();
                    out.push(c);
                    match c {
                        '{' | '[' => stack.push(c),
                        '}' | ']' => {
                            stack.pop();
                            if stack.is_empty() {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(out)
    }

    /// Reads a bare number/bool/null token up to the next structural
    /// delimiter.
    fn scan_scalar(&mut self) -> Result<String, CocoParseError> {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == ',' || c == ']' || c == '}' || c.is_whitespace() {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        if out.is_empty() {
            return Err(CocoParseError::UnexpectedEof);
        }
        Ok(out)
    }

    /// Reads one JSON value of any shape and returns its raw source text.
    fn scan_value(&mut self) -> Result<String, CocoParseError> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('"') => self.scan_string(),
            Some('{') | Some('[') => self.scan_bracketed(),
            Some(_) => self.scan_scalar(),
            None => Err(CocoParseError::UnexpectedEof),
        }
    }

    /// Returns whether the root object contains `target` among its first
    /// `limit` top-level keys, skipping every other key's value without
    /// materializing it. Used by the folder scanner's layout heuristics,
    /// which only need to know a file is "COCO-like", not parse it.
    pub fn probe_top_level_key(&mut self, target: &str, limit: usize) -> bool {
        if !self.started_root {
            self.skip_ws();
            match self.chars.next() {
                Some('{') => self.started_root = true,
                _ => return false,
            }
        }
        let mut seen = 0usize;
        loop {
            self.skip_ws();
            match self.chars.peek().copied() {
                Some('}') | None => return false,
                Some(',') => {
                    self.chars.next();
                    continue;
                }
                Some('"') => {
                    let key_raw = match self.scan_string() {
                        Ok(k) => k,
                        Err(_) => return false,
                    };
                    let key = key_raw.trim_matches('"');
                    if key == target {
                        return true;
                    }
                    seen += 1;
                    if seen >= limit {
                        return false;
                    }
                    self.skip_ws();
                    if self.chars.next() != Some(':') {
                        return false;
                    }
                    if self.scan_value().is_err() {
                        return false;
                    }
                }
                Some(_) => return false,
            }
        }
    }
}

/// True if `source`'s root object declares an `images` key within its
/// first ten top-level keys (§4.4's COCO-like header heuristic).
pub fn is_coco_like(source: &str) -> bool {
    CocoStream::new(source.chars()).probe_top_level_key("images", 10)
}

fn parse_element(src: &str) -> Result<Value, CocoParseError> {
    let mut parser = JsonStreamParser::new();
    for c in src.chars() {
        parser
            .add_char(c)
            .map_err(|msg| CocoParseError::Malformed(format!("element parse failed: {msg}")))?;
    }
    Ok(parser.get_result().clone())
}

impl<I: Iterator<Item = char>> Iterator for CocoStream<I> {
    type Item = Result<CocoEvent, CocoParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(kind) = self.current_array {
                self.skip_ws();
                match self.chars.peek().copied() {
                    Some(']') => {
                        self.chars.next();
                        self.current_array = None;
                        continue;
                    }
                    Some(',') => {
                        self.chars.next();
                        continue;
                    }
                    Some(_) => {
                        let src = match self.scan_value() {
                            Ok(s) => s,
                            Err(e) => {
                                self.finished = true;
                                return Some(Err(e));
                            }
                        };
                        let value = match parse_element(&src) {
                            Ok(v) => v,
                            Err(e) => {
                                self.finished = true;
                                return Some(Err(e));
                            }
                        };
                        let event = match kind {
                            ArrayKind::Images => CocoEvent::Image(value),
                            ArrayKind::Annotations => CocoEvent::Annotation(value),
                            ArrayKind::Categories => CocoEvent::Category(value),
                        };
                        return Some(Ok(event));
                    }
                    None => {
                        self.finished = true;
                        return Some(Err(CocoParseError::UnexpectedEof));
                    }
                }
            }

            if !self.started_root {
                self.skip_ws();
                match self.chars.next() {
                    Some('{') => self.started_root = true,
                    Some(c) => {
                        self.finished = true;
                        return Some(Err(CocoParseError::Malformed(format!(
                            "expected '{{' at document start, found '{c}'"
                        ))));
                    }
                    None => {
                        self.finished = true;
                        return None;
                    }
                }
            }

            self.skip_ws();
            match self.chars.peek().copied() {
                Some('}') => {
                    self.chars.next();
                    self.finished = true;
                    return None;
                }
                Some(',') => {
                    self.chars.next();
                    continue;
                }
                Some('"') => {
                    let key_raw = match self.scan_string() {
                        Ok(k) => k,
                        Err(e) => {
                            self.finished = true;
                            return Some(Err(e));
                        }
                    };
                    let key = key_raw.trim_matches('"').to_string();
                    self.skip_ws();
                    match self.chars.next() {
                        Some(':') => {}
                        _ => {
                            self.finished = true;
                            return Some(Err(CocoParseError::Malformed(
                                "expected ':' after object key".to_string(),
                            )));
                        }
                    }
                    self.skip_ws();
                    let kind = match key.as_str() {
                        "images" => Some(ArrayKind::Images),
                        "annotations" => Some(ArrayKind::Annotations),
                        "categories" => Some(ArrayKind::Categories),
                        _ => None,
                    };
                    match (kind, self.chars.peek().copied()) {
                        (Some(k), Some('[')) => {
                            self.chars.next();
                            self.current_array = Some(k);
                        }
                        _ => {
                            if let Err(e) = self.scan_value() {
                                self.finished = true;
                                return Some(Err(e));
                            }
                        }
                    }
                    continue;
                }
                Some(c) => {
                    self.finished = true;
                    return Some(Err(CocoParseError::Malformed(format!(
                        "unexpected '{c}' in root object"
                    ))));
                }
                None => {
                    self.finished = true;
                    return Some(Err(CocoParseError::UnexpectedEof));
                }
            }
        }
    }
}

/// Convenience entry point over an in-memory string. Streaming callers
/// should drive [`CocoStream`] directly over a char source built by
/// [`crate::scanner::read_chars`] instead.
pub fn parse_coco_str(source: &str) -> CocoStream<std::str::Chars<'_>> {
    CocoStream::new(source.chars())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(src: &str) -> Vec<CocoEvent> {
        parse_coco_str(src).map(|r| r.unwrap()).collect()
    }

    #[test]
    fn yields_events_for_each_array_in_order() {
        let doc = r#"{
            "categories": [{"id": 1, "name": "cat"}],
            "images": [{"id": 10, "file_name": "a.jpg"}, {"id": 11, "file_name": "b.jpg"}],
            "annotations": [{"id": 100, "image_id": 10, "category_id": 1, "bbox": [0,0,1,1]}]
        }"#;
        let events = collect(doc);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], CocoEvent::Category(_)));
        assert!(matches!(events[1], CocoEvent::Image(_)));
        assert!(matches!(events[2], CocoEvent::Image(_)));
        assert!(matches!(events[3], CocoEvent::Annotation(_)));
    }

    #[test]
    fn skips_unrelated_keys() {
        let doc = r#"{
            "info": {"description": "test set", "nested": {"a": [1,2,3]}},
            "licenses": [{"id": 1, "name": "MIT"}],
            "images": [{"id": 1, "file_name": "x.jpg"}],
            "annotations": [],
            "categories": []
        }"#;
        let events = collect(doc);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CocoEvent::Image(_)));
    }

    #[test]
    fn preserves_element_field_values() {
        let doc = r#"{"annotations": [{"id": 5, "bbox": [1.5, 2.5, 10.0, 20.0], "iscrowd": 0}]}"#;
        let events = collect(doc);
        let CocoEvent::Annotation(value) = &events[0] else {
            panic!("expected annotation event");
        };
        assert_eq!(value["id"], 5);
        assert_eq!(value["bbox"][2], 10.0);
    }

    #[test]
    fn handles_strings_with_escaped_quotes_and_brackets() {
        let doc = r#"{"images": [{"id": 1, "file_name": "a\"b].jpg"}]}"#;
        let events = collect(doc);
        let CocoEvent::Image(value) = &events[0] else {
            panic!("expected image event");
        };
        assert_eq!(value["file_name"], "a\"b].jpg");
    }

    #[test]
    fn empty_arrays_yield_nothing() {
        let doc = r#"{"images": [], "annotations": [], "categories": []}"#;
        assert!(collect(doc).is_empty());
    }

    #[test]
    fn is_coco_like_detects_images_key_within_first_ten_keys() {
        let doc = r#"{"info": {}, "licenses": [], "images": [], "annotations": [], "categories": []}"#;
        assert!(is_coco_like(doc));
    }

    #[test]
    fn is_coco_like_rejects_document_without_images_key() {
        let doc = r#"{"data": [{"filename": "a.jpg", "label": "cat"}]}"#;
        assert!(!is_coco_like(doc));
    }

    #[test]
    fn malformed_document_reports_error_without_panicking() {
        let doc = r#"{"images": [ {"id": 1 "#;
        let result: Vec<_> = parse_coco_str(doc).collect();
        assert!(result.last().unwrap().is_err());
    }
}
