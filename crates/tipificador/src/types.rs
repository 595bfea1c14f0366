//! Shared domain types: categories, job and batch metadata records.
//!
//! Metadata records are persisted as `meta.json` inside the job or batch
//! directory and double as the wire shape for status endpoints, so all field
//! names are camelCase.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The closed set of business categories a page can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Home-care attendance record sheets.
    CRC,
    /// Electronic sales invoice.
    FEV,
    /// Clinical history and service certifications.
    HEV,
    /// Medical-order prescription.
    OPF,
    /// Service authorisation.
    PDE,
}

impl Category {
    /// All categories in output order.
    pub const ALL: [Category; 5] = [
        Category::CRC,
        Category::FEV,
        Category::HEV,
        Category::OPF,
        Category::PDE,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::CRC => "CRC",
            Category::FEV => "FEV",
            Category::HEV => "HEV",
            Category::OPF => "OPF",
            Category::PDE => "PDE",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page classification map keyed by the string form of the global page index.
///
/// `IndexMap` keeps the caller's insertion order, which assembly preserves for
/// every category except HEV.
pub type Classifications = IndexMap<String, Option<Category>>;

/// Persistent job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMeta {
    pub job_id: String,
    /// Number of source PDFs.
    pub files: usize,
    pub total_pages: usize,
    /// Global page index -> (source PDF index, local page index).
    pub page_map: Vec<(usize, usize)>,
    /// Seconds since the epoch.
    pub created_at: u64,
}

impl JobMeta {
    /// Resolve a global page index, or `None` when out of range.
    pub fn resolve(&self, global: usize) -> Option<(usize, usize)> {
        self.page_map.get(global).copied()
    }

    /// Group global page indices by their owning source PDF, in page order.
    pub fn pages_by_pdf(&self) -> IndexMap<usize, Vec<usize>> {
        let mut grouped: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for (global, (pdf_idx, _)) in self.page_map.iter().enumerate() {
            grouped.entry(*pdf_idx).or_default().push(global);
        }
        grouped
    }
}

/// Lifecycle state of a single package inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Pending,
    Processing,
    Done,
    Error,
    Cancelled,
}

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Ready,
    Processing,
    Cancelling,
    Cancelled,
    Done,
    Partial,
    Error,
    Pending,
}

/// Per-package record inside the batch metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMeta {
    /// Display name, equal to the top-level folder name.
    pub name: String,
    /// Folder under the batch `input/` directory.
    pub folder: String,
    pub status: PackageStatus,
    pub job_id: Option<String>,
    /// File name under the batch `results/` directory once done.
    pub result_file: Option<String>,
    /// Client-facing archive name derived from the invoice number.
    pub download_name: Option<String>,
    pub error: Option<String>,
}

impl PackageMeta {
    pub fn new(folder: impl Into<String>) -> Self {
        let folder = folder.into();
        Self {
            name: folder.clone(),
            folder,
            status: PackageStatus::Pending,
            job_id: None,
            result_file: None,
            download_name: None,
            error: None,
        }
    }
}

/// Persistent batch record. The single piece of state shared between request
/// handlers and the batch worker; always written atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMeta {
    pub batch_id: String,
    pub created_at: u64,
    pub status: BatchStatus,
    pub cancel_requested: bool,
    pub packages: Vec<PackageMeta>,
    pub all_zip: Option<String>,
}

impl BatchMeta {
    pub fn package(&self, name: &str) -> Option<&PackageMeta> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn package_mut(&mut self, name: &str) -> Option<&mut PackageMeta> {
        self.packages.iter_mut().find(|p| p.name == name)
    }

    pub fn count(&self, status: PackageStatus) -> usize {
        self.packages.iter().filter(|p| p.status == status).count()
    }
}

/// Body of the process endpoint; also built internally by the batch worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    /// Page classifications; keys are global page indices as strings.
    pub classifications: Classifications,
    /// Manual NIT, normalised and used verbatim when present.
    #[serde(default)]
    pub nit_override: Option<String>,
    /// Manual invoice code, normalised and used verbatim when present.
    #[serde(default)]
    pub ocfe_override: Option<String>,
    /// Keep the job scratch directory after processing.
    #[serde(default)]
    pub keep_job: bool,
}

/// Current UNIX timestamp in whole seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
