//! Folder scanner (C4): detects which of the five supported dataset
//! layouts a directory tree follows, working uniformly over local and
//! object-store paths via [`StorageManager`].
//!
//! Classification layouts are checked first since a JSONL file is never a
//! valid COCO annotation file. Grounded on the reference implementation's
//! own layout priority and alias tables (`folder_scanner.py`).

use crate::coco::is_coco_like;
use common::error::AppError;
use common::storage::store::{EntryKind, StorageManager};
use std::collections::BTreeMap;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff", "webp"];

const MAX_PEEK_SIZE: u64 = 500 * 1024 * 1024;

/// Maps a directory name to its canonical split, or `None` if it isn't a
/// recognised split alias.
pub fn canonical_split(name: &str) -> Option<&'static str> {
    match name.to_lowercase().as_str() {
        "train" | "training" | "train2017" | "train2014" => Some("train"),
        "val" | "valid" | "validation" | "val2017" | "val2014" => Some("val"),
        "test" | "testing" | "test2017" | "test2014" => Some("test"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    Coco,
    ClassificationJsonl,
}

#[derive(Debug, Clone)]
pub struct DetectedSplit {
    pub name: String,
    pub annotation_path: String,
    pub image_dir: String,
    pub image_count: usize,
    pub annotation_file_size: u64,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub root_path: String,
    pub dataset_name: String,
    pub format: DetectedFormat,
    pub splits: Vec<DetectedSplit>,
    pub warnings: Vec<String>,
}

pub struct FolderScanner<'a> {
    storage: &'a StorageManager,
}

impl<'a> FolderScanner<'a> {
    pub fn new(storage: &'a StorageManager) -> Self {
        Self { storage }
    }

    pub async fn scan(&self, root_path: &str) -> Result<ScanResult, AppError> {
        if !self.storage.isdir(root_path).await? {
            return Err(AppError::BadInput(format!(
                "path is not a directory: {root_path}"
            )));
        }
        let root = root_path.trim_end_matches('/').to_string();
        let mut warnings = Vec::new();

        let splits = self.try_classification_split_dirs(&root, &mut warnings).await?;
        if !splits.is_empty() {
            return Ok(self.finish(root, DetectedFormat::ClassificationJsonl, splits, warnings));
        }
        let splits = self.try_classification_flat(&root, &mut warnings).await?;
        if !splits.is_empty() {
            return Ok(self.finish(root, DetectedFormat::ClassificationJsonl, splits, warnings));
        }

        let mut splits = self.try_coco_split_dirs(&root, &mut warnings).await?;
        if splits.is_empty() {
            splits = self.try_coco_annotations_dir(&root, &mut warnings).await?;
        }
        if splits.is_empty() {
            splits = self.try_coco_flat(&root, &mut warnings).await?;
        }
        Ok(self.finish(root, DetectedFormat::Coco, splits, warnings))
    }

    fn finish(
        &self,
        root: String,
        format: DetectedFormat,
        splits: Vec<DetectedSplit>,
        warnings: Vec<String>,
    ) -> ScanResult {
        ScanResult {
            dataset_name: basename(&root),
            root_path: root,
            format,
            splits,
            warnings,
        }
    }

    async fn count_images(&self, dir: &str) -> Result<usize, AppError> {
        let entries = self.storage.list_dir_detail(dir).await?;
        Ok(entries
            .into_iter()
            .filter(|e| {
                e.kind == EntryKind::File
                    && extension_of(&e.name)
                        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            })
            .count())
    }

    async fn split_dirs(&self, root: &str) -> Result<BTreeMap<String, String>, AppError> {
        let entries = self.storage.list_dir_detail(root).await?;
        let mut found = BTreeMap::new();
        for entry in entries {
            if entry.kind != EntryKind::Dir {
                continue;
            }
            if let Some(canonical) = canonical_split(&entry.name) {
                found
                    .entry(canonical.to_string())
                    .or_insert_with(|| self.storage.resolve_image_path(root, &entry.name).unwrap_or(entry.name));
            }
        }
        Ok(found)
    }

    async fn is_coco_annotation(&self, path: &str, size: u64) -> bool {
        if size > MAX_PEEK_SIZE {
            return false;
        }
        match self.storage.read_bytes(path).await {
            Ok(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => is_coco_like(text),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    async fn is_classification_jsonl(&self, path: &str) -> bool {
        let bytes = match self.storage.read_bytes(path).await {
            Ok(b) => b,
            Err(_) => return false,
        };
        let text = match std::str::from_utf8(&bytes) {
            Ok(t) => t,
            Err(_) => return false,
        };
        let mut checked = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: serde_json::Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(_) => return false,
            };
            let Some(obj) = record.as_object() else {
                return false;
            };
            let has_filename = ["filename", "file_name", "image", "path"]
                .iter()
                .any(|k| obj.contains_key(*k));
            let has_label = ["label", "class", "category", "class_name"]
                .iter()
                .any(|k| obj.contains_key(*k));
            let has_bbox = obj.contains_key("bbox") || obj.contains_key("annotations");
            if !(has_filename && has_label && !has_bbox) {
                return false;
            }
            checked += 1;
            if checked >= 5 {
                break;
            }
        }
        checked > 0
    }

    /// Layout D: split directories each holding a JSONL plus images.
    async fn try_classification_split_dirs(
        &self,
        root: &str,
        _warnings: &mut Vec<String>,
    ) -> Result<Vec<DetectedSplit>, AppError> {
        let split_dirs = self.split_dirs(root).await?;
        let mut splits = Vec::new();
        for (canonical, dir) in split_dirs {
            let entries = self.storage.list_dir_detail(&dir).await?;
            let mut jsonls: Vec<_> = entries
                .iter()
                .filter(|e| e.kind == EntryKind::File && e.name.to_lowercase().ends_with(".jsonl"))
                .collect();
            jsonls.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in jsonls {
                let path = self.storage.resolve_image_path(&dir, &entry.name)?;
                if self.is_classification_jsonl(&path).await {
                    let image_count = self.count_images(&dir).await?;
                    if image_count > 0 {
                        splits.push(DetectedSplit {
                            name: canonical.clone(),
                            annotation_path: path,
                            image_dir: dir.clone(),
                            image_count,
                            annotation_file_size: entry.size,
                        });
                    }
                    break;
                }
            }
        }
        Ok(splits)
    }

    /// Layout E: a flat JSONL at root plus `images/` or co-located images.
    async fn try_classification_flat(
        &self,
        root: &str,
        _warnings: &mut Vec<String>,
    ) -> Result<Vec<DetectedSplit>, AppError> {
        let entries = self.storage.list_dir_detail(root).await?;
        let mut jsonls: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::File && e.name.to_lowercase().ends_with(".jsonl"))
            .collect();
        jsonls.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in jsonls {
            let path = self.storage.resolve_image_path(root, &entry.name)?;
            if self.is_classification_jsonl(&path).await {
                let images_dir = self.storage.resolve_image_path(root, "images")?;
                let (image_dir, image_count) = if self.storage.isdir(&images_dir).await? {
                    (images_dir.clone(), self.count_images(&images_dir).await?)
                } else {
                    (root.to_string(), self.count_images(root).await?)
                };
                if image_count > 0 {
                    return Ok(vec![DetectedSplit {
                        name: basename(root),
                        annotation_path: path,
                        image_dir,
                        image_count,
                        annotation_file_size: entry.size,
                    }]);
                }
            }
        }
        Ok(Vec::new())
    }

    /// Layout B (Roboflow-style): split directories each holding a COCO
    /// JSON plus co-located images.
    async fn try_coco_split_dirs(
        &self,
        root: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<DetectedSplit>, AppError> {
        let split_dirs = self.split_dirs(root).await?;
        let mut splits = Vec::new();
        for (canonical, dir) in split_dirs {
            let entries = self.storage.list_dir_detail(&dir).await?;
            let mut jsons: Vec<_> = entries
                .iter()
                .filter(|e| e.kind == EntryKind::File && e.name.to_lowercase().ends_with(".json"))
                .collect();
            jsons.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in jsons {
                let path = self.storage.resolve_image_path(&dir, &entry.name)?;
                if self.is_coco_annotation(&path, entry.size).await {
                    let image_count = self.count_images(&dir).await?;
                    if image_count > 0 {
                        splits.push(DetectedSplit {
                            name: canonical.clone(),
                            annotation_path: path,
                            image_dir: dir.clone(),
                            image_count,
                            annotation_file_size: entry.size,
                        });
                    }
                    break;
                }
                warnings.push(format!("found JSON but not valid COCO: {path}"));
            }
        }
        Ok(splits)
    }

    /// Layout A (standard COCO): an `annotations/` directory with
    /// per-split JSON matched to `images/<split>/` or `<split>/`.
    async fn try_coco_annotations_dir(
        &self,
        root: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<DetectedSplit>, AppError> {
        let ann_dir = self.storage.resolve_image_path(root, "annotations")?;
        if !self.storage.isdir(&ann_dir).await? {
            return Ok(Vec::new());
        }
        let entries = self.storage.list_dir_detail(&ann_dir).await?;
        let mut coco_files = Vec::new();
        let mut sorted: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::File && e.name.to_lowercase().ends_with(".json"))
            .collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in sorted {
            let path = self.storage.resolve_image_path(&ann_dir, &entry.name)?;
            if self.is_coco_annotation(&path, entry.size).await {
                coco_files.push((path, entry.size));
            } else {
                warnings.push(format!("found JSON but not valid COCO: {path}"));
            }
        }
        if coco_files.is_empty() {
            return Ok(Vec::new());
        }

        let mut image_dirs: BTreeMap<String, String> = BTreeMap::new();
        let images_root = self.storage.resolve_image_path(root, "images")?;
        if self.storage.isdir(&images_root).await? {
            for sub in self.storage.list_dir_detail(&images_root).await? {
                if sub.kind == EntryKind::Dir {
                    if let Some(canonical) = canonical_split(&sub.name) {
                        image_dirs.entry(canonical.to_string()).or_insert_with(|| {
                            self.storage
                                .resolve_image_path(&images_root, &sub.name)
                                .unwrap_or(sub.name.clone())
                        });
                    }
                }
            }
            if image_dirs.is_empty() {
                image_dirs.insert("_flat".to_string(), images_root.clone());
            }
        }
        for entry in self.storage.list_dir_detail(root).await? {
            if entry.kind == EntryKind::Dir && entry.name.to_lowercase() != "annotations" {
                if let Some(canonical) = canonical_split(&entry.name) {
                    image_dirs.entry(canonical.to_string()).or_insert_with(|| {
                        self.storage
                            .resolve_image_path(root, &entry.name)
                            .unwrap_or(entry.name.clone())
                    });
                }
            }
        }

        let mut splits = Vec::new();
        for (path, size) in coco_files {
            let stem = stem_of(&path).to_lowercase();
            let mut matched: Option<(String, String)> = None;
            for alias in ["train2017", "train2014", "train", "training", "val2017", "val2014", "val", "valid", "validation", "test2017", "test2014", "test", "testing"] {
                if stem.contains(alias) {
                    if let Some(canonical) = canonical_split(alias) {
                        if let Some(dir) = image_dirs.get(canonical) {
                            matched = Some((canonical.to_string(), dir.clone()));
                            break;
                        }
                    }
                }
            }
            if matched.is_none() {
                if let Some(flat) = image_dirs.get("_flat") {
                    matched = Some((basename(root), flat.clone()));
                }
            }
            if let Some((name, dir)) = matched {
                let image_count = self.count_images(&dir).await?;
                splits.push(DetectedSplit {
                    name,
                    annotation_path: path,
                    image_dir: dir,
                    image_count,
                    annotation_file_size: size,
                });
            }
        }
        Ok(splits)
    }

    /// Layout C: a single COCO JSON at root plus `images/` or co-located
    /// images.
    async fn try_coco_flat(
        &self,
        root: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<DetectedSplit>, AppError> {
        let entries = self.storage.list_dir_detail(root).await?;
        let mut jsons: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::File && e.name.to_lowercase().ends_with(".json"))
            .collect();
        jsons.sort_by(|a, b| a.name.cmp(&b.name));
        let mut found = None;
        for entry in jsons {
            let path = self.storage.resolve_image_path(root, &entry.name)?;
            if self.is_coco_annotation(&path, entry.size).await {
                found = Some((path, entry.size));
                break;
            }
            warnings.push(format!("found JSON but not valid COCO: {path}"));
        }
        let Some((path, size)) = found else {
            return Ok(Vec::new());
        };
        let images_dir = self.storage.resolve_image_path(root, "images")?;
        let (image_dir, image_count) = if self.storage.isdir(&images_dir).await? {
            (images_dir.clone(), self.count_images(&images_dir).await?)
        } else {
            (root.to_string(), self.count_images(root).await?)
        };
        if image_count == 0 {
            warnings.push(format!(
                "COCO annotation found ({path}) but no images in {image_dir}"
            ));
            return Ok(Vec::new());
        }
        Ok(vec![DetectedSplit {
            name: basename(root),
            annotation_path: path,
            image_dir,
            image_count,
            annotation_file_size: size,
        }])
    }
}

fn basename(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("gs://") {
        return rest.trim_end_matches('/').rsplit('/').next().unwrap_or(rest).to_string();
    }
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn stem_of(path: &str) -> String {
    let name = basename(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name,
    }
}

fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_split_maps_known_aliases() {
        assert_eq!(canonical_split("train2017"), Some("train"));
        assert_eq!(canonical_split("Validation"), Some("val"));
        assert_eq!(canonical_split("testing"), Some("test"));
        assert_eq!(canonical_split("other"), None);
    }

    #[test]
    fn basename_handles_gs_uri() {
        assert_eq!(basename("gs://bucket/a/b/"), "b");
        assert_eq!(basename("/tmp/data/my-set"), "my-set");
    }

    #[test]
    fn stem_of_strips_extension() {
        assert_eq!(stem_of("/a/b/instances_train2017.json"), "instances_train2017");
        assert_eq!(stem_of("/a/b/.hidden"), ".hidden");
    }

    #[test]
    fn extension_of_lowercases() {
        assert_eq!(extension_of("IMAGE.JPG"), Some("jpg".to_string()));
        assert_eq!(extension_of("noext"), None);
    }
}
