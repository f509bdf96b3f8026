//! Streaming parsers for classification JSONL, COCO-results prediction
//! arrays, and per-image detection-annotation JSON (C3, continued from
//! [`crate::coco`]).
//!
//! Every parser here tolerates malformed individual records: a bad line
//! or array element is skipped with a `tracing::warn!`, never fatal to
//! the overall import (§4.3).

use crate::coco::CocoParseError;
use json_stream_parser::JsonStreamParser;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::iter::Peekable;
use tracing::warn;

const FILENAME_KEYS: &[&str] = &["filename", "file_name", "image", "path"];
const LABEL_KEYS: &[&str] = &["label", "class", "category", "class_name"];

/// One classification record after alias resolution: a file name and its
/// (possibly multiple) labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRecord {
    pub file_name: String,
    pub labels: Vec<String>,
}

fn extract_labels(obj: &serde_json::Map<String, Value>) -> Vec<String> {
    for key in LABEL_KEYS {
        if let Some(value) = obj.get(*key) {
            return match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => {
                    let labels: Vec<String> = items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                    if labels.is_empty() {
                        vec!["unknown".to_string()]
                    } else {
                        labels
                    }
                }
                Value::Number(n) => vec![n.to_string()],
                _ => vec!["unknown".to_string()],
            };
        }
    }
    vec!["unknown".to_string()]
}

fn parse_classification_line(line: &str) -> Option<ClassificationRecord> {
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;
    let file_name = FILENAME_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))?
        .to_string();
    Some(ClassificationRecord {
        file_name,
        labels: extract_labels(obj),
    })
}

/// Parses classification JSONL, skipping blank and malformed lines.
pub fn parse_classification_jsonl(text: &str) -> impl Iterator<Item = ClassificationRecord> + '_ {
    text.lines().enumerate().filter_map(|(idx, line)| {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match parse_classification_line(trimmed) {
            Some(record) => Some(record),
            None => {
                warn!(line = idx + 1, "skipping malformed classification JSONL record");
                None
            }
        }
    })
}

/// One record from a COCO-results prediction array:
/// `{image_id, category_id, bbox:[x,y,w,h], score}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CocoResultRecord {
    pub image_id: i64,
    pub category_id: i64,
    pub bbox: [f64; 4],
    pub score: Option<f64>,
}

fn parse_coco_result_value(value: &Value) -> Option<CocoResultRecord> {
    let obj = value.as_object()?;
    let image_id = obj.get("image_id")?.as_i64()?;
    let category_id = obj.get("category_id")?.as_i64()?;
    let bbox_values = obj.get("bbox")?.as_array()?;
    if bbox_values.len() != 4 {
        return None;
    }
    let mut bbox = [0.0f64; 4];
    for (slot, v) in bbox.iter_mut().zip(bbox_values) {
        *slot = v.as_f64()?;
    }
    let score = obj.get("score").and_then(Value::as_f64);
    Some(CocoResultRecord {
        image_id,
        category_id,
        bbox,
        score,
    })
}

/// Pull parser over a bare top-level JSON array (COCO-results files are
/// `[{...}, {...}, ...]` with no wrapping object), built in the same
/// character-driven idiom as [`crate::coco::CocoStream`].
pub struct JsonArrayStream<I: Iterator<Item = char>> {
    chars: Peekable<I>,
    started: bool,
    finished: bool,
}

impl<I: Iterator<Item = char>> JsonArrayStream<I> {
    pub fn new(chars: I) -> Self {
        Self {
            chars: chars.peekable(),
            started: false,
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

    fn scan_value(&mut self) -> Result<String, CocoParseError> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('"') => self.scan_string(),
            Some('{') | Some('[') => self.scan_bracketed(),
            Some(_) => self.scan_scalar(),
            None => Err(CocoParseError::UnexpectedEof),
        }
    }
}

impl<I: Iterator<Item = char>> Iterator for JsonArrayStream<I> {
    type Item = Result<Value, CocoParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if !self.started {
            self.skip_ws();
            match self.chars.next() {
                Some('[') => self.started = true,
                Some(c) => {
                    self.finished = true;
                    return Some(Err(CocoParseError::Malformed(format!(
                        "expected '[' at document start, found '{c}'"
                    ))));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
        loop {
            self.skip_ws();
            match self.chars.peek().copied() {
                Some(']') => {
                    self.chars.next();
                    self.finished = true;
                    return None;
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
                    let mut parser = JsonStreamParser::new();
                    for c in src.chars() {
                        if let Err(msg) = parser.add_char(c) {
                            self.finished = true;
                            return Some(Err(CocoParseError::Malformed(msg)));
                        }
                    }
                    return Some(Ok(parser.get_result().clone()));
                }
                None => {
                    self.finished = true;
                    return Some(Err(CocoParseError::UnexpectedEof));
                }
            }
        }
    }
}

/// Parses a COCO-results prediction array, skipping malformed elements.
pub fn parse_coco_results(text: &str) -> impl Iterator<Item = CocoResultRecord> + '_ {
    JsonArrayStream::new(text.chars())
        .enumerate()
        .filter_map(|(idx, result)| match result {
            Ok(value) => match parse_coco_result_value(&value) {
                Some(record) => Some(record),
                None => {
                    warn!(index = idx, "skipping malformed COCO-results record");
                    None
                }
            },
            Err(e) => {
                warn!(index = idx, error = %e, "stopping COCO-results parse");
                None
            }
        })
}

/// One per-image detection-annotation JSON file:
/// `{filename, categories:{int->name}, annotations:[...], info?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionAnnotationFile {
    pub filename: String,
    #[serde(default)]
    pub categories: HashMap<String, String>,
    #[serde(default)]
    pub annotations: Vec<DetectionAnnotationEntry>,
    pub info: Option<DetectionAnnotationInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionAnnotationEntry {
    pub bbox: NormalizedBBox,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub class_id: i64,
}

/// A bbox normalised to `[0, 1]`, relative to image width/height.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NormalizedBBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionAnnotationInfo {
    pub annotations_source: Option<String>,
    pub created_at: Option<String>,
}

impl NormalizedBBox {
    /// Converts to absolute pixel coordinates using the sample's known
    /// width/height, looked up by the caller from the in-memory samples
    /// map built for the dataset.
    pub fn to_pixels(self, width: i32, height: i32) -> common::storage::types::annotation::BBox {
        common::storage::types::annotation::BBox {
            x: self.x * f64::from(width),
            y: self.y * f64::from(height),
            w: self.w * f64::from(width),
            h: self.h * f64::from(height),
        }
    }
}

/// Parses one detection-annotation JSON document. The whole document is
/// one image's worth of annotations, small enough to deserialize in one
/// shot (unlike the dataset-scale COCO/JSONL formats).
pub fn parse_detection_annotation_file(text: &str) -> Result<DetectionAnnotationFile, CocoParseError> {
    serde_json::from_str(text).map_err(|e| CocoParseError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filename_and_label_aliases() {
        let text = r#"{"file_name": "a.jpg", "class": "cat"}
{"image": "b.jpg", "category": "dog"}
"#;
        let records: Vec<_> = parse_classification_jsonl(text).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].file_name, "a.jpg");
        assert_eq!(records[0].labels, vec!["cat".to_string()]);
        assert_eq!(records[1].labels, vec!["dog".to_string()]);
    }

    #[test]
    fn multi_label_records_keep_every_label() {
        let text = r#"{"filename": "a.jpg", "label": ["cat", "indoor"]}"#;
        let records: Vec<_> = parse_classification_jsonl(text).collect();
        assert_eq!(records[0].labels, vec!["cat".to_string(), "indoor".to_string()]);
    }

    #[test]
    fn missing_label_becomes_unknown() {
        let text = r#"{"filename": "a.jpg"}"#;
        let records: Vec<_> = parse_classification_jsonl(text).collect();
        assert_eq!(records[0].labels, vec!["unknown".to_string()]);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let text = "not json\n{\"filename\": \"a.jpg\", \"label\": \"x\"}\n";
        let records: Vec<_> = parse_classification_jsonl(text).collect();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn parses_coco_results_array() {
        let text = r#"[
            {"image_id": 1, "category_id": 2, "bbox": [1.0, 2.0, 3.0, 4.0], "score": 0.9},
            {"image_id": 1, "category_id": 3, "bbox": [0,0,1,1]}
        ]"#;
        let records: Vec<_> = parse_coco_results(text).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].score, Some(0.9));
        assert_eq!(records[1].score, None);
    }

    #[test]
    fn skips_coco_result_entries_with_wrong_bbox_length() {
        let text = r#"[{"image_id": 1, "category_id": 1, "bbox": [1,2,3]}]"#;
        let records: Vec<_> = parse_coco_results(text).collect();
        assert!(records.is_empty());
    }

    #[test]
    fn parses_detection_annotation_file_and_converts_bbox() {
        let text = r#"{
            "filename": "a.jpg",
            "categories": {"0": "cat"},
            "annotations": [{"bbox": {"x": 0.1, "y": 0.2, "w": 0.3, "h": 0.4}, "confidence": 0.5, "class_id": 0}]
        }"#;
        let parsed = parse_detection_annotation_file(text).unwrap();
        assert_eq!(parsed.filename, "a.jpg");
        let pixel = parsed.annotations[0].bbox.to_pixels(100, 200);
        assert_eq!(pixel.x, 10.0);
        assert_eq!(pixel.y, 40.0);
        assert_eq!(pixel.w, 30.0);
        assert_eq!(pixel.h, 80.0);
    }
}
