//! Document store: metadata, content and the chain of custody kept in step.
//!
//! Every mutating operation follows the same shape:
//!
//! 1. take the document's write lock,
//! 2. validate preconditions against the stored metadata,
//! 3. build the new metadata and seal the event block (signing happens here),
//! 4. write content if it changed,
//! 5. commit the block and metadata in one sled batch.
//!
//! A failure before step 5 leaves nothing behind; content written in step 4
//! is restored if the commit fails. Callers that keep their own records in
//! step with a document (report instances) add them to the same batch.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use sled::Batch;
use tracing::{debug, error, info, warn};

use crate::builder::DocumentStoreBuilder;
use crate::chain::{BlockDraft, ChainAction, ChainBlock, ChainLedger};
use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::content::ContentStore;
use crate::document::{
    Document, DocumentMetadata, DocumentStatus, NewDocument, SignatureType, Submission,
};
use crate::error::{LedgerError, Result};
use crate::hash::{self, ContentHashes};
use crate::locks::DocumentGuard;
use crate::retention::RetentionPolicyResolver;
use crate::search::{Page, SearchCriteria};
use crate::signer::Signer;
use crate::types::{Actor, TimeStamp};
use crate::utils::{self, DOCUMENT_HRP};

const DOCUMENT_PREFIX: &str = "doc/";

pub const OWNER_ROLE: &str = "OWNER";
pub const APPROVER_ROLE: &str = "APPROVER";
pub const SIGNER_ROLE: &str = "SIGNER";
pub const SUBMITTER_ROLE: &str = "SUBMITTER";

/// Metadata, content and chain read together under the document's lock.
pub(crate) struct Snapshot {
    pub metadata: DocumentMetadata,
    pub content: Result<Option<Vec<u8>>>,
    pub chain: Result<Vec<ChainBlock>>,
}

pub struct DocumentStore {
    db: Arc<sled::Db>,
    ledger: ChainLedger,
    content: Arc<dyn ContentStore>,
    retention: RetentionPolicyResolver,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl DocumentStore {
    /// Use [`DocumentStore::builder`], which validates `config` first.
    pub(crate) fn new(
        db: Arc<sled::Db>,
        config: LedgerConfig,
        signer: Arc<dyn Signer>,
        content: Arc<dyn ContentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = ChainLedger::new(
            Arc::clone(&db),
            signer,
            Arc::clone(&clock),
            config.hash_algorithm,
        );
        Self {
            db,
            ledger,
            content,
            retention: config.retention_resolver(),
            clock,
            config,
        }
    }

    pub fn builder(db: Arc<sled::Db>) -> DocumentStoreBuilder {
        DocumentStoreBuilder::new(db)
    }

    pub fn ledger(&self) -> &ChainLedger {
        &self.ledger
    }

    pub fn retention(&self) -> &RetentionPolicyResolver {
        &self.retention
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn metadata_key(document_id: &str) -> Vec<u8> {
        format!("{DOCUMENT_PREFIX}{document_id}").into_bytes()
    }

    /// Metadata without recording a read. Used by verification and reporting.
    pub fn metadata(&self, document_id: &str) -> Result<DocumentMetadata> {
        match self.db.get(Self::metadata_key(document_id))? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(LedgerError::document_not_found(document_id)),
        }
    }

    /// A consistent view for verification. Writers hold the same lock from
    /// their content write through the batch commit, so no half-applied
    /// mutation is ever observed.
    pub(crate) fn snapshot(&self, document_id: &str) -> Result<Snapshot> {
        self.ledger.with_document(document_id, |_| {
            let metadata = self.metadata(document_id)?;
            Ok(Snapshot {
                metadata,
                content: self.content.get(document_id).map_err(LedgerError::from),
                chain: self.ledger.full_chain(document_id),
            })
        })
    }

    fn load_content(&self, document_id: &str) -> Result<Vec<u8>> {
        self.content
            .get(document_id)?
            .ok_or_else(|| LedgerError::StorageFailed {
                reason: format!("content for '{document_id}' is missing"),
            })
    }

    /// Seals `draft` for `metadata`'s chain and stages both into one batch.
    fn stage(
        &self,
        guard: &DocumentGuard<'_>,
        metadata: &mut DocumentMetadata,
        draft: BlockDraft,
    ) -> Result<(Batch, ChainBlock)> {
        let mut batch = Batch::default();
        let block = if metadata.block_count == 0 {
            let block = self.ledger.stage_genesis(guard, draft, &mut batch)?;
            metadata.genesis_block_hash = block.block_hash.clone();
            block
        } else {
            self.ledger.stage_append(guard, draft, &mut batch)?
        };

        metadata.latest_block_hash = block.block_hash.clone();
        metadata.block_count = block.body.sequence + 1;
        batch.insert(
            Self::metadata_key(&metadata.id),
            hash::canonicalize(&*metadata)?,
        );
        Ok((batch, block))
    }

    fn record(
        &self,
        guard: &DocumentGuard<'_>,
        metadata: &mut DocumentMetadata,
        draft: BlockDraft,
    ) -> Result<ChainBlock> {
        self.record_with(guard, metadata, draft, |_, _| Ok(()))
    }

    /// Like [`Self::record`], letting `companion` add its own entries to the
    /// batch once the block is sealed. Either everything commits or nothing does.
    fn record_with(
        &self,
        guard: &DocumentGuard<'_>,
        metadata: &mut DocumentMetadata,
        draft: BlockDraft,
        companion: impl FnOnce(&ChainBlock, &mut Batch) -> Result<()>,
    ) -> Result<ChainBlock> {
        let (mut batch, block) = self.stage(guard, metadata, draft)?;
        companion(&block, &mut batch)?;
        self.db.apply_batch(batch)?;
        debug!(
            document_id = %metadata.id,
            action = block.action().name(),
            block_count = metadata.block_count,
            "recorded"
        );
        Ok(block)
    }

    /// Like [`Self::record`], writing `content` first and putting the
    /// previous bytes back if the commit does not go through.
    fn record_with_content(
        &self,
        guard: &DocumentGuard<'_>,
        metadata: &mut DocumentMetadata,
        draft: BlockDraft,
        content: &[u8],
        previous: Option<Vec<u8>>,
        companion: impl FnOnce(&DocumentMetadata, &mut Batch) -> Result<()>,
    ) -> Result<ChainBlock> {
        let document_id = guard.id();
        let (mut batch, block) = self.stage(guard, metadata, draft)?;
        companion(&*metadata, &mut batch)?;
        self.content.put(document_id, content)?;

        if let Err(err) = self.db.apply_batch(batch) {
            warn!(document_id, error = %err, "commit failed, restoring previous content");
            let restored = match previous {
                Some(bytes) => self.content.put(document_id, &bytes).map(|_| ()),
                None => self.content.remove(document_id),
            };
            if let Err(restore_err) = restored {
                error!(document_id, error = %restore_err, "failed to restore content");
            }
            return Err(err.into());
        }
        Ok(block)
    }

    pub fn store_document(&self, request: NewDocument) -> Result<DocumentMetadata> {
        self.store_document_with(request, |_, _| Ok(()))
    }

    /// Stores a document, committing `companion`'s entries with its genesis block.
    pub(crate) fn store_document_with(
        &self,
        request: NewDocument,
        companion: impl FnOnce(&DocumentMetadata, &mut Batch) -> Result<()>,
    ) -> Result<DocumentMetadata> {
        let id = utils::new_uuid_to_bech32(DOCUMENT_HRP)?;

        self.ledger.with_document(&id, |guard| {
            let now = self.clock.timestamp();
            let algorithm = self.config.hash_algorithm;
            let hashes = ContentHashes::compute(&request.content, algorithm);
            let retention_until = self.retention.retention_until(request.document_type, now)?;
            let status = if request.requires_approval {
                DocumentStatus::PendingApproval
            } else {
                DocumentStatus::Draft
            };

            let mut metadata = DocumentMetadata {
                id: id.clone(),
                external_id: None,
                document_type: request.document_type,
                status,
                access_level: request.access_level,
                title: request.title,
                version: "1.0".to_string(),
                mime_type: request.mime_type,
                file_size: request.content.len() as u64,
                file_name: request.file_name,
                hashes,
                hash_algorithm: algorithm,
                owner_id: request.owner_id,
                owner_name: request.owner_name,
                department: request.department,
                branch: request.branch,
                customer_id: request.customer_id,
                application_id: request.application_id,
                tags: request.tags,
                created_at: now,
                modified_at: now,
                published_at: None,
                expires_at: request.expires_at,
                retention_until,
                requires_approval: request.requires_approval,
                approvers: request.approvers,
                approved_by: None,
                approved_at: None,
                is_signed: false,
                signed_by: None,
                signed_at: None,
                signature_type: None,
                genesis_block_hash: String::new(),
                latest_block_hash: String::new(),
                block_count: 0,
            };

            let draft = BlockDraft::new(
                ChainAction::Created {
                    document_type: metadata.document_type,
                    file_name: metadata.file_name.clone(),
                    version: metadata.version.clone(),
                },
                Actor::new(metadata.owner_id.clone(), OWNER_ROLE),
                metadata.hashes.content_hash.clone(),
            )
            .with_metadata(request.metadata);

            self.record_with_content(
                guard,
                &mut metadata,
                draft,
                &request.content,
                None,
                companion,
            )?;
            info!(
                document_id = %metadata.id,
                document_type = ?metadata.document_type,
                status = %metadata.status,
                retention_until = %metadata.retention_until,
                "document stored"
            );
            Ok(metadata)
        })
    }

    /// Audited read: appends a VIEWED block before returning.
    pub fn get_document(&self, document_id: &str, actor: Actor) -> Result<Document> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            let content = self.load_content(document_id)?;
            let draft = BlockDraft::new(
                ChainAction::Viewed,
                actor,
                metadata.hashes.content_hash.clone(),
            );
            self.record(guard, &mut metadata, draft)?;
            let chain = self.ledger.full_chain(document_id)?;

            Ok(Document {
                metadata,
                content,
                chain,
            })
        })
    }

    /// Audited download, recorded separately from views.
    pub fn download_document(&self, document_id: &str, actor: Actor) -> Result<Vec<u8>> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            let content = self.load_content(document_id)?;
            let draft = BlockDraft::new(
                ChainAction::Downloaded,
                actor,
                metadata.hashes.content_hash.clone(),
            );
            self.record(guard, &mut metadata, draft)?;
            Ok(content)
        })
    }

    /// Replaces the content and bumps the minor version. A document that
    /// needs approval goes back to PENDING_APPROVAL and loses its approval.
    pub fn update_document(
        &self,
        document_id: &str,
        new_content: Vec<u8>,
        actor: Actor,
        comment: Option<String>,
    ) -> Result<DocumentMetadata> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            let previous_content = self.content.get(document_id)?;
            let previous_hash = metadata.hashes.content_hash.clone();
            let previous_version = metadata.version.clone();
            let version = metadata.next_version()?;

            metadata.hashes = ContentHashes::compute(&new_content, metadata.hash_algorithm);
            metadata.file_size = new_content.len() as u64;
            metadata.version = version.clone();
            metadata.modified_at = self.clock.timestamp();
            if metadata.requires_approval {
                metadata.status = DocumentStatus::PendingApproval;
                metadata.approved_by = None;
                metadata.approved_at = None;
            }

            let draft = BlockDraft::new(
                ChainAction::Modified {
                    previous_hash,
                    previous_version,
                    version,
                    comment,
                },
                actor,
                metadata.hashes.content_hash.clone(),
            );
            self.record_with_content(
                guard,
                &mut metadata,
                draft,
                &new_content,
                previous_content,
                |_, _| Ok(()),
            )?;
            info!(document_id, version = %metadata.version, status = %metadata.status, "document updated");
            Ok(metadata)
        })
    }

    fn require_pending(metadata: &DocumentMetadata, action: &'static str) -> Result<()> {
        if metadata.status != DocumentStatus::PendingApproval {
            return Err(LedgerError::InvalidStatus {
                id: metadata.id.clone(),
                action,
                reason: format!("status is {}, expected PENDING_APPROVAL", metadata.status),
            });
        }
        Ok(())
    }

    fn require_approver(metadata: &DocumentMetadata, approver_id: &str) -> Result<()> {
        if !metadata.approvers.is_empty() && !metadata.approvers.iter().any(|a| a == approver_id) {
            return Err(LedgerError::Unauthorized {
                id: metadata.id.clone(),
                actor: approver_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn approve_document(
        &self,
        document_id: &str,
        approver_id: &str,
        approver_name: &str,
        approver_role: &str,
    ) -> Result<DocumentMetadata> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            Self::require_pending(&metadata, "approve")?;
            Self::require_approver(&metadata, approver_id)?;

            let now = self.clock.timestamp();
            metadata.status = DocumentStatus::Approved;
            metadata.approved_by = Some(approver_id.to_string());
            metadata.approved_at = Some(now);
            metadata.modified_at = now;

            let draft = BlockDraft::new(
                ChainAction::Approved {
                    approver_name: approver_name.to_string(),
                },
                Actor::new(approver_id, approver_role),
                metadata.hashes.content_hash.clone(),
            );
            self.record(guard, &mut metadata, draft)?;
            info!(document_id, approver_id, "document approved");
            Ok(metadata)
        })
    }

    /// Sends a pending document back to DRAFT.
    pub fn reject_document(
        &self,
        document_id: &str,
        approver_id: &str,
        approver_name: &str,
        reason: &str,
    ) -> Result<DocumentMetadata> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            Self::require_pending(&metadata, "reject")?;
            Self::require_approver(&metadata, approver_id)?;

            metadata.status = DocumentStatus::Draft;
            metadata.modified_at = self.clock.timestamp();

            let draft = BlockDraft::new(
                ChainAction::Rejected {
                    approver_name: approver_name.to_string(),
                    reason: reason.to_string(),
                },
                Actor::new(approver_id, APPROVER_ROLE),
                metadata.hashes.content_hash.clone(),
            );
            self.record(guard, &mut metadata, draft)?;
            info!(document_id, approver_id, reason, "document rejected");
            Ok(metadata)
        })
    }

    /// Signing is independent of workflow status, any document can be signed.
    pub fn sign_document(
        &self,
        document_id: &str,
        signer_id: &str,
        signer_name: &str,
        signature_type: SignatureType,
        certificate_serial: Option<String>,
    ) -> Result<DocumentMetadata> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;

            let payload = format!("{}{}", metadata.hashes.content_hash, signer_id);
            let content_signature = self
                .ledger
                .signer()
                .sign(payload.as_bytes())
                .map_err(|source| LedgerError::SigningFailed {
                    id: document_id.to_string(),
                    action: "SIGNED",
                    source,
                })?;

            let now = self.clock.timestamp();
            metadata.is_signed = true;
            metadata.signed_by = Some(signer_id.to_string());
            metadata.signed_at = Some(now);
            metadata.signature_type = Some(signature_type);
            metadata.modified_at = now;

            let draft = BlockDraft::new(
                ChainAction::Signed {
                    signer_name: signer_name.to_string(),
                    signature_type,
                    certificate_serial,
                    content_signature,
                },
                Actor::new(signer_id, SIGNER_ROLE),
                metadata.hashes.content_hash.clone(),
            );
            self.record(guard, &mut metadata, draft)?;
            info!(document_id, signer_id, ?signature_type, "document signed");
            Ok(metadata)
        })
    }

    pub fn submit_to_regulator(
        &self,
        document_id: &str,
        regulator_code: &str,
        submitter_id: &str,
        submitter_name: &str,
    ) -> Result<Submission> {
        self.submit_to_regulator_with(
            document_id,
            regulator_code,
            submitter_id,
            submitter_name,
            |_, _| Ok(()),
        )
    }

    /// Submits, committing `companion`'s entries with the SUBMITTED block.
    pub(crate) fn submit_to_regulator_with(
        &self,
        document_id: &str,
        regulator_code: &str,
        submitter_id: &str,
        submitter_name: &str,
        companion: impl FnOnce(&Submission, &mut Batch) -> Result<()>,
    ) -> Result<Submission> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            let now = self.clock.timestamp();
            let submission_ref = utils::submission_reference(regulator_code, now.to_datetime_utc());

            metadata.status = DocumentStatus::Published;
            metadata.published_at = Some(now);
            metadata.external_id = Some(submission_ref.clone());
            metadata.modified_at = now;

            let mut extra = BTreeMap::new();
            extra.insert("submitter_name".to_string(), submitter_name.to_string());
            let draft = BlockDraft::new(
                ChainAction::Submitted {
                    regulator_code: regulator_code.to_string(),
                    submission_ref: submission_ref.clone(),
                },
                Actor::new(submitter_id, SUBMITTER_ROLE),
                metadata.hashes.content_hash.clone(),
            )
            .with_metadata(extra);
            let submission = Submission {
                document_id: document_id.to_string(),
                regulator_code: regulator_code.to_string(),
                submission_ref,
                submitted_at: now,
            };
            self.record_with(guard, &mut metadata, draft, |_, batch| {
                companion(&submission, batch)
            })?;
            info!(
                document_id,
                regulator_code,
                submission_ref = %submission.submission_ref,
                "document submitted to regulator"
            );
            Ok(submission)
        })
    }

    /// Records the regulator's acknowledgement of an earlier submission.
    pub fn record_acknowledgement(
        &self,
        document_id: &str,
        acknowledgement_ref: &str,
        actor: Actor,
    ) -> Result<DocumentMetadata> {
        self.record_acknowledgement_with(document_id, acknowledgement_ref, actor, |_, _| Ok(()))
    }

    /// Records an acknowledgement, committing `companion`'s entries with its block.
    pub(crate) fn record_acknowledgement_with(
        &self,
        document_id: &str,
        acknowledgement_ref: &str,
        actor: Actor,
        companion: impl FnOnce(&ChainBlock, &mut Batch) -> Result<()>,
    ) -> Result<DocumentMetadata> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            metadata.modified_at = self.clock.timestamp();

            let draft = BlockDraft::new(
                ChainAction::Acknowledged {
                    acknowledgement_ref: acknowledgement_ref.to_string(),
                },
                actor,
                metadata.hashes.content_hash.clone(),
            );
            self.record_with(guard, &mut metadata, draft, companion)?;
            info!(document_id, acknowledgement_ref, "submission acknowledged");
            Ok(metadata)
        })
    }

    pub fn archive_document(&self, document_id: &str, actor: Actor) -> Result<DocumentMetadata> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            if metadata.status == DocumentStatus::Archived {
                return Err(LedgerError::InvalidStatus {
                    id: document_id.to_string(),
                    action: "archive",
                    reason: "document is already ARCHIVED".to_string(),
                });
            }

            metadata.status = DocumentStatus::Archived;
            metadata.modified_at = self.clock.timestamp();

            let draft = BlockDraft::new(
                ChainAction::Archived,
                actor,
                metadata.hashes.content_hash.clone(),
            );
            self.record(guard, &mut metadata, draft)?;
            info!(document_id, "document archived");
            Ok(metadata)
        })
    }

    /// Pushes `retention_until` later. It can never move earlier.
    pub fn extend_retention(
        &self,
        document_id: &str,
        retention_until: TimeStamp,
        actor: Actor,
    ) -> Result<DocumentMetadata> {
        self.ledger.with_document(document_id, |guard| {
            let mut metadata = self.metadata(document_id)?;
            let previous_until = metadata.retention_until;
            if retention_until <= previous_until {
                return Err(LedgerError::InvalidParameter {
                    context: document_id.to_string(),
                    name: "retention_until".to_string(),
                    reason: format!("{retention_until} does not extend {previous_until}"),
                });
            }

            metadata.retention_until = retention_until;
            metadata.modified_at = self.clock.timestamp();

            let draft = BlockDraft::new(
                ChainAction::RetentionExtended {
                    previous_until,
                    retention_until,
                },
                actor,
                metadata.hashes.content_hash.clone(),
            );
            self.record(guard, &mut metadata, draft)?;
            info!(document_id, %retention_until, "retention extended");
            Ok(metadata)
        })
    }

    /// The chain of custody, read without recording a view.
    pub fn get_chain(&self, document_id: &str) -> Result<Vec<ChainBlock>> {
        self.metadata(document_id)?;
        self.ledger.full_chain(document_id)
    }

    fn all_documents(&self) -> Result<Vec<DocumentMetadata>> {
        self.db
            .scan_prefix(DOCUMENT_PREFIX)
            .map(|entry| -> Result<DocumentMetadata> {
                let (_, value) = entry?;
                Ok(minicbor::decode(&value)?)
            })
            .collect()
    }

    pub fn search_documents(&self, criteria: &SearchCriteria) -> Result<Page<DocumentMetadata>> {
        let now = self.clock.timestamp();
        let window = days(self.config.expiring_soon_days, "expiring_soon_days")?;
        let expiring_before = now.plus(window).unwrap_or(now);

        let mut matches: Vec<_> = self
            .all_documents()?
            .into_iter()
            .filter(|doc| criteria.matches(doc, now, expiring_before))
            .collect();
        matches.sort_by(|a, b| criteria.compare(a, b));

        let limit = criteria
            .limit
            .unwrap_or(self.config.default_page_limit)
            .clamp(1, self.config.max_page_limit);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(criteria.offset)
            .take(limit)
            .collect();

        Ok(Page {
            items,
            total,
            offset: criteria.offset,
            limit,
        })
    }

    /// Non-archived documents older than the configured archival age.
    pub fn documents_for_archival(&self) -> Result<Vec<DocumentMetadata>> {
        let now = self.clock.timestamp();
        let window = days(self.config.archive_after_days, "archive_after_days")?;
        let cutoff = now.minus(window).unwrap_or(now);

        Ok(self
            .all_documents()?
            .into_iter()
            .filter(|doc| doc.status != DocumentStatus::Archived && doc.created_at < cutoff)
            .collect())
    }

    /// Archived documents whose retention has run out and whose policy
    /// allows deletion. The ledger itself never deletes anything.
    pub fn documents_eligible_for_deletion(&self) -> Result<Vec<DocumentMetadata>> {
        let now = self.clock.timestamp();
        Ok(self
            .all_documents()?
            .into_iter()
            .filter(|doc| self.retention.is_deletable(doc, now))
            .collect())
    }
}

fn days(days: i64, name: &str) -> Result<Duration> {
    Duration::try_days(days).ok_or_else(|| LedgerError::InvalidParameter {
        context: "config".to_string(),
        name: name.to_string(),
        reason: format!("{days} days is out of range"),
    })
}
