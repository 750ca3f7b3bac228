//! Document metadata and classification types
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::ChainBlock;
use crate::error::{LedgerError, Result};
use crate::hash::{ContentHashes, HashAlgorithm};
use crate::types::TimeStamp;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    #[n(0)]
    AccountStatement,
    #[n(1)]
    LoanAgreement,
    #[n(2)]
    LoanApplication,
    #[n(3)]
    Mortgage,
    #[n(4)]
    CreditReport,
    #[n(5)]
    KycDocument,
    #[n(6)]
    AmlReport,
    #[n(7)]
    SuspiciousActivityReport,
    #[n(8)]
    CurrencyTransactionReport,
    #[n(9)]
    FinancialStatement,
    #[n(10)]
    AuditReport,
    #[n(11)]
    TaxDocument,
    #[n(12)]
    RegulatoryReport,
    #[n(13)]
    RegulatoryFiling,
    #[n(14)]
    BoardMinutes,
    #[n(15)]
    Contract,
    #[n(16)]
    Policy,
    #[n(17)]
    Procedure,
    #[n(18)]
    ComplianceCertificate,
    #[n(19)]
    CustomerCorrespondence,
    #[n(20)]
    Invoice,
    #[n(21)]
    Receipt,
    #[n(22)]
    IdentityDocument,
    #[n(23)]
    PowerOfAttorney,
    #[n(24)]
    Collateral,
    #[n(25)]
    InternalMemo,
    #[n(26)]
    Other,
}

impl DocumentType {
    /// Kinds that are filed with, or produced for, a regulator.
    pub fn is_regulatory(&self) -> bool {
        matches!(
            self,
            DocumentType::AmlReport
                | DocumentType::SuspiciousActivityReport
                | DocumentType::CurrencyTransactionReport
                | DocumentType::RegulatoryReport
                | DocumentType::RegulatoryFiling
                | DocumentType::ComplianceCertificate
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum DocumentStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Approved,
    #[n(3)]
    Published,
    #[n(4)]
    Archived,
    #[n(5)]
    Superseded,
    #[n(6)]
    Revoked,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::PendingApproval => "PENDING_APPROVAL",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Published => "PUBLISHED",
            DocumentStatus::Archived => "ARCHIVED",
            DocumentStatus::Superseded => "SUPERSEDED",
            DocumentStatus::Revoked => "REVOKED",
        };
        f.write_str(name)
    }
}

/// Ordered from least to most sensitive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode,
)]
pub enum AccessLevel {
    #[n(0)]
    Public,
    #[n(1)]
    Internal,
    #[n(2)]
    Confidential,
    #[n(3)]
    Restricted,
    #[n(4)]
    Secret,
    #[n(5)]
    TopSecret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum SignatureType {
    #[n(0)]
    Simple,
    #[n(1)]
    Advanced,
    #[n(2)]
    Qualified,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct DocumentMetadata {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub external_id: Option<String>, // regulator-assigned reference
    #[n(2)]
    pub document_type: DocumentType,
    #[n(3)]
    pub status: DocumentStatus,
    #[n(4)]
    pub access_level: AccessLevel,
    #[n(5)]
    pub title: String,
    #[n(6)]
    pub version: String, // major.minor
    #[n(7)]
    pub mime_type: String,
    #[n(8)]
    pub file_size: u64,
    #[n(9)]
    pub file_name: String,
    #[n(10)]
    pub hashes: ContentHashes,
    #[n(11)]
    pub hash_algorithm: HashAlgorithm,
    #[n(12)]
    pub owner_id: String,
    #[n(13)]
    pub owner_name: String,
    #[n(14)]
    pub department: Option<String>,
    #[n(15)]
    pub branch: Option<String>,
    #[n(16)]
    pub customer_id: Option<String>,
    #[n(17)]
    pub application_id: Option<String>,
    #[n(18)]
    pub tags: Vec<String>,
    #[n(19)]
    pub created_at: TimeStamp,
    #[n(20)]
    pub modified_at: TimeStamp,
    #[n(21)]
    pub published_at: Option<TimeStamp>,
    #[n(22)]
    pub expires_at: Option<TimeStamp>,
    #[n(23)]
    pub retention_until: TimeStamp,
    #[n(24)]
    pub requires_approval: bool,
    #[n(25)]
    pub approvers: Vec<String>,
    #[n(26)]
    pub approved_by: Option<String>,
    #[n(27)]
    pub approved_at: Option<TimeStamp>,
    #[n(28)]
    pub is_signed: bool,
    #[n(29)]
    pub signed_by: Option<String>,
    #[n(30)]
    pub signed_at: Option<TimeStamp>,
    #[n(31)]
    pub signature_type: Option<SignatureType>,
    #[n(32)]
    pub genesis_block_hash: String,
    #[n(33)]
    pub latest_block_hash: String,
    #[n(34)]
    pub block_count: u64,
}

impl DocumentMetadata {
    pub fn is_pending_approval(&self) -> bool {
        self.status == DocumentStatus::PendingApproval
    }

    /// Version with the minor component incremented, "1.9" -> "1.10".
    pub fn next_version(&self) -> Result<String> {
        let invalid = || LedgerError::InvalidParameter {
            context: self.id.clone(),
            name: "version".to_string(),
            reason: format!("'{}' is not major.minor", self.version),
        };
        let (major, minor) = self.version.split_once('.').ok_or_else(invalid)?;
        let major: u32 = major.parse().map_err(|_| invalid())?;
        let minor: u32 = minor.parse().map_err(|_| invalid())?;

        Ok(format!("{major}.{}", minor + 1))
    }

    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.file_name.to_lowercase().contains(&needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    }
}

/// Everything needed to register a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub content: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub document_type: DocumentType,
    pub access_level: AccessLevel,
    pub title: String,
    pub owner_id: String,
    pub owner_name: String,
    pub requires_approval: bool,
    pub approvers: Vec<String>,
    pub tags: Vec<String>,
    pub department: Option<String>,
    pub branch: Option<String>,
    pub customer_id: Option<String>,
    pub application_id: Option<String>,
    pub expires_at: Option<TimeStamp>,
    pub metadata: BTreeMap<String, String>, // recorded on the genesis block
}

impl NewDocument {
    pub fn new(
        content: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        document_type: DocumentType,
        title: impl Into<String>,
        owner_id: impl Into<String>,
        owner_name: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            document_type,
            access_level: AccessLevel::Internal,
            title: title.into(),
            owner_id: owner_id.into(),
            owner_name: owner_name.into(),
            requires_approval: false,
            approvers: vec![],
            tags: vec![],
            department: None,
            branch: None,
            customer_id: None,
            application_id: None,
            expires_at: None,
            metadata: BTreeMap::new(),
        }
    }
    pub fn set_access_level(mut self, level: AccessLevel) -> Self {
        self.access_level = level;
        self
    }
    pub fn set_requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }
    pub fn set_approvers(mut self, approvers: Vec<String>) -> Self {
        self.approvers = approvers;
        self
    }
    pub fn set_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
    pub fn set_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }
    pub fn set_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
    pub fn set_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }
    pub fn set_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }
    pub fn set_expires_at(mut self, expires_at: TimeStamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of an audited read.
#[derive(Debug, Clone)]
pub struct Document {
    pub metadata: DocumentMetadata,
    pub content: Vec<u8>,
    pub chain: Vec<ChainBlock>,
}

/// Receipt for a regulator submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub document_id: String,
    pub regulator_code: String,
    pub submission_ref: String,
    pub submitted_at: TimeStamp,
}
