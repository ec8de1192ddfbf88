use bytes::Bytes;
use providers::{ImageInput, ProviderKind, TagRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of an image, unique within one run.
pub type ImageId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub id: ImageId,
    pub path: PathBuf,
}

/// The resolved images of a run, in resolver order.
#[derive(Debug, Clone, Default)]
pub struct ImageSet {
    entries: Vec<ImageEntry>,
}

impl ImageSet {
    pub fn new(entries: Vec<ImageEntry>) -> Self {
        Self { entries }
    }

    /// Builds a set from bare ids rooted at `dir`.
    pub fn from_ids<I, S>(dir: &Path, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                ImageEntry {
                    path: dir.join(&id),
                    id,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn ids(&self) -> Vec<ImageId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    pub fn path(&self, id: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads the listed images from disk, in the given order.
    pub async fn load(&self, ids: &[ImageId]) -> std::io::Result<Vec<ImageInput>> {
        let mut inputs = Vec::with_capacity(ids.len());
        for id in ids {
            let path = self.path(id).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{id} is not part of the image set"),
                )
            })?;
            let bytes = tokio::fs::read(path).await?;
            inputs.push(ImageInput {
                id: id.clone(),
                bytes: Bytes::from(bytes),
            });
        }
        Ok(inputs)
    }
}

/// Tag records of one provider for one run, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResult {
    entries: Vec<(ImageId, TagRecord)>,
    index: HashMap<ImageId, usize>,
}

impl ProviderResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record, returning the one it replaced.
    pub fn insert(&mut self, id: ImageId, record: TagRecord) -> Option<TagRecord> {
        match self.index.get(&id) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos].1, record)),
            None => {
                self.index.insert(id.clone(), self.entries.len());
                self.entries.push((id, record));
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TagRecord> {
        self.index.get(id).map(|&pos| &self.entries[pos].1)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ImageId, &TagRecord)> {
        self.entries.iter().map(|(id, record)| (id, record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ImageId, TagRecord)> for ProviderResult {
    fn from_iter<T: IntoIterator<Item = (ImageId, TagRecord)>>(iter: T) -> Self {
        let mut result = ProviderResult::new();
        for (id, record) in iter {
            result.insert(id, record);
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Vendor,
    Malformed,
    InvalidRequest,
    Io,
    Association,
}

/// A batch whose images ended up without data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub images: Vec<ImageId>,
    pub kind: FailureKind,
    pub error: String,
}

/// One provider's completed run: its result plus what happened along the way.
#[derive(Debug, Clone)]
pub struct ProviderRun {
    pub kind: ProviderKind,
    pub result: ProviderResult,
    pub batches_planned: usize,
    pub batches_issued: usize,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ProviderRun {
    pub fn association_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Association)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub image: ImageId,
    /// One cell per column; `None` means the provider has no data for this image.
    pub cells: Vec<Option<TagRecord>>,
}

/// Per-image, per-provider tag matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    pub(crate) columns: Vec<ProviderKind>,
    pub(crate) rows: Vec<TableRow>,
}

impl AggregateTable {
    pub fn columns(&self) -> &[ProviderKind] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, image: &str) -> Option<&TableRow> {
        self.rows.iter().find(|r| r.image == image)
    }

    pub fn cell(&self, image: &str, kind: ProviderKind) -> Option<&TagRecord> {
        let col = self.columns.iter().position(|c| *c == kind)?;
        self.row(image).and_then(|r| r.cells[col].as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::Tag;

    fn tag(label: &str) -> Tag {
        Tag {
            label: label.to_string(),
            confidence: 0.5,
        }
    }

    #[test]
    fn result_keeps_insertion_order_and_reports_replacements() {
        let mut result = ProviderResult::new();
        assert!(result.insert("b.jpg".into(), vec![tag("x")]).is_none());
        assert!(result.insert("a.jpg".into(), vec![]).is_none());
        let replaced = result.insert("b.jpg".into(), vec![tag("y")]);
        assert_eq!(replaced, Some(vec![tag("x")]));

        let ids: Vec<_> = result.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b.jpg", "a.jpg"]);
        assert_eq!(result.get("b.jpg"), Some(&vec![tag("y")]));
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn load_reads_bytes_in_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"first").unwrap();
        std::fs::write(dir.path().join("b.png"), b"second").unwrap();
        let set = ImageSet::from_ids(dir.path(), ["a.png", "b.png"]);

        let inputs = set.load(&["b.png".into(), "a.png".into()]).await.unwrap();
        assert_eq!(inputs[0].id, "b.png");
        assert_eq!(&inputs[0].bytes[..], b"second");
        assert_eq!(&inputs[1].bytes[..], b"first");

        assert!(set.load(&["missing.png".into()]).await.is_err());
    }
}
