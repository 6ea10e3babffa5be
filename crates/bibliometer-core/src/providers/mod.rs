//! Provider-specific API shapes and their normalization into the canonical
//! [`Publication`](crate::models::Publication) record.
//!
//! Each provider keeps its own serde structs; the only cross-provider
//! surface is [`RawRecord`], a tagged union the orchestrator feeds through
//! [`RawRecord::normalize`].

pub mod openalex;
pub mod scopus;

pub use openalex::OpenAlexWork;
pub use scopus::ScopusEntry;

use crate::models::Publication;

/// One raw search entry, tagged by the provider it came from.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Scopus(ScopusEntry),
    OpenAlex(OpenAlexWork),
}

impl RawRecord {
    /// Total mapping onto the canonical record. `None` means the entry is
    /// unusable (no title, or a provider error pseudo-entry); everything
    /// else gets documented defaults for missing fields. Pure and
    /// idempotent: the same raw entry always maps to the same record.
    ///
    /// `fallback_index` becomes the record id when the provider sent none.
    pub fn normalize(&self, fallback_index: usize) -> Option<Publication> {
        match self {
            RawRecord::Scopus(entry) => scopus::normalize_entry(entry, fallback_index),
            RawRecord::OpenAlex(work) => openalex::normalize_work(work, fallback_index),
        }
    }
}
