//! Stored-file bookkeeping types.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What a `stored_files` row points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    SourceVideo,
    Subtitle,
    TranslatedSubtitle,
    ExportVideo,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::SourceVideo => "source_video",
            FileType::Subtitle => "subtitle",
            FileType::TranslatedSubtitle => "translated_subtitle",
            FileType::ExportVideo => "export_video",
        }
    }

    /// Directory segment in the object key layout.
    pub fn key_segment(&self) -> &'static str {
        match self {
            FileType::SourceVideo => "source",
            FileType::Subtitle | FileType::TranslatedSubtitle => "subtitle",
            FileType::ExportVideo => "export",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// S3-compatible provider behind a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    /// Cloudflare R2
    #[default]
    R2,
    /// Backblaze B2
    B2,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::R2 => "r2",
            StorageProvider::B2 => "b2",
        }
    }
}
