use std::{fs, path::Path};

use anyhow::{Context, Result, bail};

/// Fallback name for class ids the label map does not cover.
pub const UNKNOWN_LABEL: &str = "object";

/// The 80 COCO categories in the zero-based order used by YOLO-family exports.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Class id to display name lookup.
#[derive(Clone, Debug)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    pub fn coco() -> Self {
        Self::from_names(COCO_LABELS.iter().map(|name| name.to_string()))
    }

    pub fn from_names(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Load one label per line; blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read label map {}", path.display()))?;
        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            bail!("Label map {} contains no labels", path.display());
        }
        Ok(Self { names })
    }

    pub fn name(&self, class_id: i64) -> &str {
        usize::try_from(class_id)
            .ok()
            .and_then(|idx| self.names.get(idx))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::coco()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn coco_lookup_and_fallback() {
        let labels = LabelMap::coco();
        assert_eq!(labels.len(), 80);
        assert_eq!(labels.name(0), "person");
        assert_eq!(labels.name(41), "cup");
        assert_eq!(labels.name(80), UNKNOWN_LABEL);
        assert_eq!(labels.name(-1), UNKNOWN_LABEL);
    }

    #[test]
    fn file_labels_skip_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# custom\ncat\n\n dog ").unwrap();
        let labels = LabelMap::from_file(file.path()).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.name(1), "dog");
    }
}
