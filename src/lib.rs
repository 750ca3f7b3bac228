//! Tamper-evident chain of custody for regulated documents.
//!
//! [`DocumentStore`] keeps metadata and content, and records every event on
//! a document as a signed, hash-linked block through [`ChainLedger`].
//! [`VerificationEngine`] re-checks all of it without mutating anything, and
//! [`ReportLifecycle`] drives generated reports through to regulator
//! acknowledgement.

pub mod builder;
pub mod chain;
pub mod clock;
pub mod config;
pub mod content;
pub mod document;
pub mod error;
pub mod hash;
pub mod locks;
pub mod report;
pub mod retention;
pub mod search;
pub mod signer;
pub mod store;
pub mod types;
pub mod utils;
pub mod verify;

pub use builder::DocumentStoreBuilder;
pub use chain::{BlockBody, BlockDraft, ChainAction, ChainBlock, ChainLedger};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::LedgerConfig;
pub use content::{ContentStore, MemoryContentStore, SledContentStore};
pub use document::{
    AccessLevel, Document, DocumentMetadata, DocumentStatus, DocumentType, NewDocument,
    SignatureType, Submission,
};
pub use error::{LedgerError, Result};
pub use hash::HashAlgorithm;
pub use report::{
    Distributor, ParameterSpec, ReportDefinition, ReportInstance, ReportLifecycle, ReportStatus,
    TemplateRenderer,
};
pub use retention::{RetentionPolicy, RetentionPolicyResolver};
pub use search::{Page, SearchCriteria, SortField, SortOrder};
pub use signer::{Ed25519Signer, Signer, UnsignedSigner};
pub use store::DocumentStore;
pub use types::{Actor, TimeStamp};
pub use verify::{Issue, Severity, VerificationEngine, VerificationResult};
