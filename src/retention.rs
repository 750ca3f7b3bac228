//! Retention rules per document type.
//!
//! The built-in table carries the statutory minimums. Deployments may
//! lengthen a type's retention through configuration, never shorten it.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::{DocumentMetadata, DocumentStatus, DocumentType};
use crate::error::{LedgerError, Result};
use crate::types::TimeStamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_years: u32,
    pub archive_after_days: u32,
    #[serde(default)]
    pub delete_after_archive: bool,
    #[serde(default)]
    pub legal_hold_exempt: bool,
    #[serde(default)]
    pub regulation: Option<String>,
}

impl RetentionPolicy {
    pub fn new(retention_years: u32, archive_after_days: u32) -> Self {
        Self {
            retention_years,
            archive_after_days,
            delete_after_archive: false,
            legal_hold_exempt: false,
            regulation: None,
        }
    }
    pub fn deletable_after_archive(mut self) -> Self {
        self.delete_after_archive = true;
        self
    }
    pub fn legal_hold_exempt(mut self) -> Self {
        self.legal_hold_exempt = true;
        self
    }
    pub fn cite(mut self, regulation: &str) -> Self {
        self.regulation = Some(regulation.to_string());
        self
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::new(7, 365)
    }
}

fn builtin(document_type: DocumentType) -> Option<RetentionPolicy> {
    use DocumentType::*;

    let policy = match document_type {
        AccountStatement => RetentionPolicy::new(7, 365).cite("BSA 31 CFR 1020.410"),
        LoanAgreement => RetentionPolicy::new(8, 730),
        LoanApplication => RetentionPolicy::new(5, 365).cite("Reg B 12 CFR 1002.12"),
        Mortgage => RetentionPolicy::new(10, 1095),
        CreditReport => RetentionPolicy::new(5, 365)
            .deletable_after_archive()
            .cite("FCRA"),
        KycDocument => RetentionPolicy::new(5, 365).cite("31 CFR 1020.220"),
        AmlReport => RetentionPolicy::new(5, 365).cite("BSA 31 CFR 1010.430"),
        SuspiciousActivityReport => RetentionPolicy::new(5, 180).cite("31 CFR 1020.320(d)"),
        CurrencyTransactionReport => RetentionPolicy::new(5, 180).cite("31 CFR 1010.306"),
        FinancialStatement => RetentionPolicy::new(10, 730),
        AuditReport => RetentionPolicy::new(7, 730).cite("SOX 802"),
        TaxDocument => RetentionPolicy::new(7, 365).cite("26 CFR 1.6001-1"),
        RegulatoryReport => RetentionPolicy::new(8, 365),
        RegulatoryFiling => RetentionPolicy::new(10, 365),
        BoardMinutes => RetentionPolicy::new(10, 1825),
        Contract => RetentionPolicy::new(8, 730),
        Policy => RetentionPolicy::new(5, 730).deletable_after_archive(),
        Procedure => RetentionPolicy::new(5, 730).deletable_after_archive(),
        ComplianceCertificate => RetentionPolicy::new(5, 365),
        CustomerCorrespondence => RetentionPolicy::new(3, 180).deletable_after_archive(),
        Invoice => RetentionPolicy::new(7, 365).deletable_after_archive(),
        Receipt => RetentionPolicy::new(7, 365).deletable_after_archive(),
        IdentityDocument => RetentionPolicy::new(5, 365).cite("31 CFR 1020.220"),
        PowerOfAttorney => RetentionPolicy::new(10, 1095),
        Collateral => RetentionPolicy::new(10, 1095),
        InternalMemo => RetentionPolicy::new(2, 90)
            .deletable_after_archive()
            .legal_hold_exempt(),
        Other => return None,
    };
    Some(policy)
}

#[derive(Debug, Clone, Default)]
pub struct RetentionPolicyResolver {
    default: RetentionPolicy,
    overrides: BTreeMap<DocumentType, RetentionPolicy>,
}

impl RetentionPolicyResolver {
    pub fn new(
        default: RetentionPolicy,
        overrides: BTreeMap<DocumentType, RetentionPolicy>,
    ) -> Self {
        Self { default, overrides }
    }

    pub fn resolve(&self, document_type: DocumentType) -> RetentionPolicy {
        let base = builtin(document_type).unwrap_or_else(|| self.default.clone());
        let Some(mut policy) = self.overrides.get(&document_type).cloned() else {
            return base;
        };

        if policy.retention_years < base.retention_years {
            warn!(
                ?document_type,
                configured = policy.retention_years,
                minimum = base.retention_years,
                "retention override below minimum, keeping minimum"
            );
            policy.retention_years = base.retention_years;
        }
        policy
    }

    /// Earliest instant a document of this type created at `created_at` may be destroyed.
    pub fn retention_until(
        &self,
        document_type: DocumentType,
        created_at: TimeStamp,
    ) -> Result<TimeStamp> {
        let policy = self.resolve(document_type);
        created_at
            .plus_years(policy.retention_years)
            .ok_or_else(|| LedgerError::InvalidParameter {
                context: format!("{document_type:?}"),
                name: "retention_years".to_string(),
                reason: format!("{} years overflows the calendar", policy.retention_years),
            })
    }

    pub fn archive_due(&self, document_type: DocumentType, created_at: TimeStamp) -> Option<TimeStamp> {
        let policy = self.resolve(document_type);
        created_at.plus(Duration::days(i64::from(policy.archive_after_days)))
    }

    /// Archived, past retention, and its policy allows deletion.
    pub fn is_deletable(&self, document: &DocumentMetadata, now: TimeStamp) -> bool {
        let policy = self.resolve(document.document_type);
        document.status == DocumentStatus::Archived
            && policy.delete_after_archive
            && document.retention_until <= now
    }
}
