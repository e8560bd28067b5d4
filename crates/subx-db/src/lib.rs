//! Supabase (PostgREST) persistence.
//!
//! This crate provides:
//! - A REST client with retry, tracing spans and request metrics
//! - Hand-written row structs and typed patches
//! - The `Store` trait, implemented over Supabase and in memory

pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod patch;
pub mod retry;
pub mod rows;
pub mod store;
pub mod supabase_store;

pub use client::{Query, SupabaseClient, SupabaseConfig};
pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use patch::{truncate_error, JobPatch, ProjectPatch, SubtitleFilePatch};
pub use retry::RetryConfig;
pub use rows::{
    EngineRow, GlossaryTermRow, JobRow, PlanRow, ProfileRow, ProjectRow, StoredFileRow,
    SubtitleFileRow, UserApiKeyRow, UserStorageConfigRow,
};
pub use store::{Store, StoredFileQuery};
pub use supabase_store::SupabaseStore;
