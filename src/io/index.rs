//! Dataset index: stores accepted dataset documents and answers product queries.

use crate::core::dataset_doc::CatalogDocument;
use crate::core::products::{product_by_name, ProductSpec};
use crate::types::{CfsiError, CfsiResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A dataset document accepted by the index, with the URIs it was indexed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDataset {
    pub document: CatalogDocument,
    pub uris: Vec<String>,
}

impl IndexedDataset {
    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn product(&self) -> &str {
        &self.document.product.name
    }
}

/// Check a dataset document against its product definition.
///
/// Returns the resolved dataset, or a human readable reason when the
/// document cannot be indexed.
pub fn resolve_dataset(doc: CatalogDocument, uri: &str) -> Result<IndexedDataset, String> {
    let product: &ProductSpec = product_by_name(&doc.product.name)
        .ok_or_else(|| format!("Unknown product '{}'", doc.product.name))?;

    if doc.crs.trim().is_empty() {
        return Err(format!("Dataset {} has no CRS", doc.id));
    }

    for name in product.measurement_names() {
        if !doc.measurements.contains_key(&name) {
            return Err(format!("Dataset {} is missing measurement {}", doc.id, name));
        }
    }

    for (name, measurement) in &doc.measurements {
        if !doc.grids.contains_key(&measurement.grid) {
            return Err(format!(
                "Measurement {} references unknown grid '{}'",
                name, measurement.grid
            ));
        }
    }

    Ok(IndexedDataset { document: doc, uris: vec![uri.to_string()] })
}

/// Catalogue of indexed datasets
pub trait DatasetIndex {
    /// Insert a new dataset. Fails with [`CfsiError::DocumentMismatch`] when a
    /// different document is already stored under the same id; adding an
    /// identical document is a no-op.
    fn add(&mut self, dataset: &IndexedDataset) -> CfsiResult<()>;

    /// Store `dataset`, replacing any existing record with the same id
    fn update(&mut self, dataset: &IndexedDataset) -> CfsiResult<()>;

    fn get(&self, product: &str, id: &str) -> CfsiResult<Option<IndexedDataset>>;

    /// All datasets of `product`, ordered by id
    fn find_datasets(&self, product: &str) -> CfsiResult<Vec<IndexedDataset>>;
}

/// Index backed by one JSON file per dataset: `{root}/{product}/{id}.json`
#[derive(Debug, Clone)]
pub struct FileIndex {
    root: PathBuf,
}

impl FileIndex {
    pub fn open<P: AsRef<Path>>(root: P) -> CfsiResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        log::debug!("Opened dataset index at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_path(&self, product: &str, id: &str) -> CfsiResult<PathBuf> {
        let safe = |s: &str| !s.is_empty() && !s.contains(['/', '\\']) && s != "." && s != "..";
        if !safe(product) || !safe(id) {
            return Err(CfsiError::InvalidFormat(format!(
                "Invalid dataset key {}/{}",
                product, id
            )));
        }
        Ok(self.root.join(product).join(format!("{}.json", id)))
    }

    fn write(&self, dataset: &IndexedDataset) -> CfsiResult<()> {
        let path = self.dataset_path(dataset.product(), dataset.id())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(dataset)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(path: &Path) -> CfsiResult<IndexedDataset> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl DatasetIndex for FileIndex {
    fn add(&mut self, dataset: &IndexedDataset) -> CfsiResult<()> {
        if let Some(existing) = self.get(dataset.product(), dataset.id())? {
            if existing.document == dataset.document {
                log::debug!("Dataset {} already indexed", dataset.id());
                return Ok(());
            }
            return Err(CfsiError::DocumentMismatch { id: dataset.id().to_string() });
        }
        self.write(dataset)
    }

    fn update(&mut self, dataset: &IndexedDataset) -> CfsiResult<()> {
        self.write(dataset)
    }

    fn get(&self, product: &str, id: &str) -> CfsiResult<Option<IndexedDataset>> {
        let path = self.dataset_path(product, id)?;
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn find_datasets(&self, product: &str) -> CfsiResult<Vec<IndexedDataset>> {
        let dir = self.root.join(product);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| Self::read(p)).collect()
    }
}
