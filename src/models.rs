// src/models.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix appended to a destination path while its body is being streamed.
pub const PART_SUFFIX: &str = "part";

/// Target platform of a downloadable file, as tagged by the vendor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Audio,
    Ebook,
    Linux,
    Mac,
    Windows,
    Video,
    Other,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::Android,
        Platform::Audio,
        Platform::Ebook,
        Platform::Linux,
        Platform::Mac,
        Platform::Windows,
        Platform::Video,
        Platform::Other,
    ];

    /// Platforms that carry games rather than media.
    pub const GAMES: [Platform; 4] = [
        Platform::Linux,
        Platform::Mac,
        Platform::Windows,
        Platform::Android,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Audio => "audio",
            Platform::Ebook => "ebook",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
            Platform::Video => "video",
            Platform::Other => "other",
        }
    }

    /// Maps a vendor platform tag. Tags we do not know land in `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "android" => Platform::Android,
            "audio" => Platform::Audio,
            "ebook" => Platform::Ebook,
            "linux" => Platform::Linux,
            "mac" => Platform::Mac,
            "windows" => Platform::Windows,
            "video" => Platform::Video,
            _ => Platform::Other,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest algorithms the vendor publishes for its files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

/// A vendor-supplied digest. The hex value is kept lower-case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub hex: String,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, hex: impl AsRef<str>) -> Self {
        Self {
            algorithm,
            hex: hex.as_ref().trim().to_ascii_lowercase(),
        }
    }

    pub fn md5(hex: impl AsRef<str>) -> Self {
        Self::new(HashAlgorithm::Md5, hex)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.algorithm, self.hex)
    }
}

/// One downloadable file inside a purchase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub platform: Platform,
    pub item_name: String,
    pub file_name: String,
    pub url: String,
    pub size_bytes: u64,
    pub checksum: Option<Checksum>,
    #[serde(default)]
    pub is_trove_flag: bool,
}

impl FileEntry {
    /// The value used to decide that two entries carry the same content.
    pub fn identity_key(&self) -> IdentityKey {
        match &self.checksum {
            Some(checksum) => IdentityKey::Checksum(checksum.hex.clone()),
            None => IdentityKey::NameSize(self.file_name.clone(), self.size_bytes),
        }
    }
}

/// A purchase as returned by the catalog. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurchaseRecord {
    pub purchase_id: String,
    pub purchased_at: NaiveDateTime,
    pub bundle_name: String,
    pub files: Vec<FileEntry>,
}

/// Content identity: the checksum when the vendor gives one, otherwise name and size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentityKey {
    Checksum(String),
    NameSize(String, u64),
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Checksum(hex) => f.write_str(hex),
            IdentityKey::NameSize(name, size) => write!(f, "{name}:{size}"),
        }
    }
}

/// The purchase that owns a canonical file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwningPurchase {
    pub purchase_id: String,
    pub purchased_at: NaiveDateTime,
    pub bundle_name: String,
}

impl From<&PurchaseRecord> for OwningPurchase {
    fn from(record: &PurchaseRecord) -> Self {
        Self {
            purchase_id: record.purchase_id.clone(),
            purchased_at: record.purchased_at,
            bundle_name: record.bundle_name.clone(),
        }
    }
}

/// Where a canonical file is placed on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Placement {
    /// Under the owning purchase's dated folder.
    Purchase,
    /// Under the fixed special-collection folder; no regular purchase carries it.
    SpecialCollection,
}

/// The single deduplicated representation of a file across all purchases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalFile {
    pub identity_key: IdentityKey,
    pub owner: OwningPurchase,
    pub platform: Platform,
    pub item_name: String,
    pub file_name: String,
    pub url: String,
    pub size_bytes: u64,
    pub checksum: Option<Checksum>,
    pub placement: Placement,
}

impl CanonicalFile {
    pub fn from_entry(entry: &FileEntry, owner: OwningPurchase, placement: Placement) -> Self {
        Self {
            identity_key: entry.identity_key(),
            owner,
            platform: entry.platform,
            item_name: entry.item_name.clone(),
            file_name: entry.file_name.clone(),
            url: entry.url.clone(),
            size_bytes: entry.size_bytes,
            checksum: entry.checksum.clone(),
            placement,
        }
    }
}

/// The status of a download task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Verifying,
    Done,
    Failed(Option<String>),
}

/// Ephemeral unit of work for one canonical file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub file: CanonicalFile,
    pub destination: PathBuf,
    pub state: TaskState,
    pub attempt_count: u32,
}

impl DownloadTask {
    pub fn new(file: CanonicalFile, destination: PathBuf) -> Self {
        Self {
            file,
            destination,
            state: TaskState::Pending,
            attempt_count: 0,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.file.size_bytes
    }

    /// Returns the path for the temporary download file.
    /// e.g., for "/path/to/file.zip", it returns "/path/to/file.zip.part"
    pub fn temporary_path(&self) -> PathBuf {
        temporary_path(&self.destination)
    }
}

pub fn temporary_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Formats a byte count with binary units, e.g. `1.50 MiB`.
pub fn human_size(bytes: u64) -> String {
    const SUFFIXES: [&str; 5] = ["B", "kiB", "MiB", "GiB", "TiB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let exponent = ((63 - bytes.leading_zeros()) / 10).min(SUFFIXES.len() as u32 - 1);
    let value = bytes as f64 / (1u64 << (exponent * 10)) as f64;
    format!("{:.2} {}", value, SUFFIXES[exponent as usize])
}
