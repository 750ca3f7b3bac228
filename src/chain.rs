//! Per-document chain of custody.
//!
//! Every event on a document is sealed into a [`ChainBlock`] whose
//! `previous_block_hash` is the hash of the block before it. Blocks are only
//! ever added at the tail; nothing in this module rewrites or removes one.
//!
//! Sealing a block:
//!
//! 1. the [`BlockBody`] (everything but `signature` and `block_hash`) is
//!    canonicalized and signed,
//! 2. `block_hash` is the digest of the canonical `(body, signature)` pair.

use std::collections::BTreeMap;
use std::sync::Arc;

use sled::Batch;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::document::{DocumentType, SignatureType};
use crate::error::{LedgerError, Result};
use crate::hash::{self, HashAlgorithm};
use crate::locks::{DocumentGuard, DocumentLocks};
use crate::signer::Signer;
use crate::types::{Actor, TimeStamp};
use crate::utils::{self, BLOCK_HRP};

const CHAIN_PREFIX: &str = "chain/";

/// The event a block records, with only the fields that event needs.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ChainAction {
    #[n(0)]
    Created {
        #[n(0)]
        document_type: DocumentType,
        #[n(1)]
        file_name: String,
        #[n(2)]
        version: String,
    },
    #[n(1)]
    Viewed,
    #[n(2)]
    Downloaded,
    #[n(3)]
    Modified {
        #[n(0)]
        previous_hash: String,
        #[n(1)]
        previous_version: String,
        #[n(2)]
        version: String,
        #[n(3)]
        comment: Option<String>,
    },
    #[n(4)]
    Approved {
        #[n(0)]
        approver_name: String,
    },
    #[n(5)]
    Rejected {
        #[n(0)]
        approver_name: String,
        #[n(1)]
        reason: String,
    },
    #[n(6)]
    Signed {
        #[n(0)]
        signer_name: String,
        #[n(1)]
        signature_type: SignatureType,
        #[n(2)]
        certificate_serial: Option<String>,
        #[n(3)]
        content_signature: String, // over content hash + signer id
    },
    #[n(7)]
    Submitted {
        #[n(0)]
        regulator_code: String,
        #[n(1)]
        submission_ref: String,
    },
    #[n(8)]
    Acknowledged {
        #[n(0)]
        acknowledgement_ref: String,
    },
    #[n(9)]
    Archived,
    #[n(10)]
    RetentionExtended {
        #[n(0)]
        previous_until: TimeStamp,
        #[n(1)]
        retention_until: TimeStamp,
    },
}

impl ChainAction {
    pub fn name(&self) -> &'static str {
        match self {
            ChainAction::Created { .. } => "CREATED",
            ChainAction::Viewed => "VIEWED",
            ChainAction::Downloaded => "DOWNLOADED",
            ChainAction::Modified { .. } => "MODIFIED",
            ChainAction::Approved { .. } => "APPROVED",
            ChainAction::Rejected { .. } => "REJECTED",
            ChainAction::Signed { .. } => "SIGNED",
            ChainAction::Submitted { .. } => "SUBMITTED",
            ChainAction::Acknowledged { .. } => "ACKNOWLEDGED",
            ChainAction::Archived => "ARCHIVED",
            ChainAction::RetentionExtended { .. } => "RETENTION_EXTENDED",
        }
    }
}

/// The signed portion of a block.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct BlockBody {
    #[n(0)]
    pub block_id: String,
    #[n(1)]
    pub document_id: String,
    #[n(2)]
    pub sequence: u64,
    #[n(3)]
    pub previous_block_hash: String,
    #[n(4)]
    pub timestamp: TimeStamp,
    #[n(5)]
    pub action: ChainAction,
    #[n(6)]
    pub actor: Actor,
    #[n(7)]
    pub document_hash: String, // content hash at the time of the event
    #[n(8)]
    pub metadata: BTreeMap<String, String>,
    #[n(9)]
    pub hash_algorithm: HashAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ChainBlock {
    #[n(0)]
    pub body: BlockBody,
    #[n(1)]
    pub signature: String,
    #[n(2)]
    pub block_hash: String,
}

#[derive(minicbor::Encode)]
struct SealedPayload<'a> {
    #[n(0)]
    body: &'a BlockBody,
    #[n(1)]
    signature: &'a str,
}

impl ChainBlock {
    pub fn block_id(&self) -> &str {
        &self.body.block_id
    }
    pub fn previous_block_hash(&self) -> &str {
        &self.body.previous_block_hash
    }
    pub fn action(&self) -> &ChainAction {
        &self.body.action
    }
    pub fn is_genesis(&self) -> bool {
        self.body.sequence == 0
    }

    /// Bytes the signature is taken over.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        hash::canonicalize(&self.body)
    }

    /// Recomputes the block hash from the stored body and signature.
    pub fn compute_hash(&self) -> Result<String> {
        seal_hash(&self.body, &self.signature)
    }
}

fn seal_hash(body: &BlockBody, signature: &str) -> Result<String> {
    let payload = hash::canonicalize(&SealedPayload { body, signature })?;
    Ok(hash::hash(&payload, body.hash_algorithm))
}

/// Input for a new block; the ledger fills in linkage, time and identity.
#[derive(Debug, Clone)]
pub struct BlockDraft {
    pub action: ChainAction,
    pub actor: Actor,
    pub document_hash: String,
    pub metadata: BTreeMap<String, String>,
}

impl BlockDraft {
    pub fn new(action: ChainAction, actor: Actor, document_hash: impl Into<String>) -> Self {
        Self {
            action,
            actor,
            document_hash: document_hash.into(),
            metadata: BTreeMap::new(),
        }
    }
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct ChainLedger {
    db: Arc<sled::Db>,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    algorithm: HashAlgorithm, // used for new chains only
    locks: DocumentLocks,
}

impl ChainLedger {
    pub fn new(
        db: Arc<sled::Db>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            db,
            signer,
            clock,
            algorithm,
            locks: DocumentLocks::new(),
        }
    }

    /// Storage key of block `sequence` in `document_id`'s chain.
    pub fn block_key(document_id: &str, sequence: u64) -> Vec<u8> {
        format!("{CHAIN_PREFIX}{document_id}/{sequence:020}").into_bytes()
    }

    fn chain_prefix(document_id: &str) -> Vec<u8> {
        format!("{CHAIN_PREFIX}{document_id}/").into_bytes()
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Runs `f` holding `document_id`'s write lock.
    pub fn with_document<T>(
        &self,
        document_id: &str,
        f: impl FnOnce(&DocumentGuard<'_>) -> Result<T>,
    ) -> Result<T> {
        self.locks.with_document(document_id, f)
    }

    fn seal(
        &self,
        document_id: &str,
        sequence: u64,
        previous_block_hash: String,
        algorithm: HashAlgorithm,
        draft: BlockDraft,
    ) -> Result<ChainBlock> {
        let action = draft.action.name();
        let body = BlockBody {
            block_id: utils::new_uuid_to_bech32(BLOCK_HRP)?,
            document_id: document_id.to_string(),
            sequence,
            previous_block_hash,
            timestamp: self.clock.timestamp(),
            action: draft.action,
            actor: draft.actor,
            document_hash: draft.document_hash,
            metadata: draft.metadata,
            hash_algorithm: algorithm,
        };

        let payload = hash::canonicalize(&body)?;
        let signature = self
            .signer
            .sign(&payload)
            .map_err(|source| LedgerError::SigningFailed {
                id: document_id.to_string(),
                action,
                source,
            })?;
        let block_hash = seal_hash(&body, &signature)?;

        Ok(ChainBlock {
            body,
            signature,
            block_hash,
        })
    }

    /// Seals the genesis block and adds it to `batch`. Nothing is written
    /// until the caller applies the batch.
    pub(crate) fn stage_genesis(
        &self,
        guard: &DocumentGuard<'_>,
        draft: BlockDraft,
        batch: &mut Batch,
    ) -> Result<ChainBlock> {
        let document_id = guard.id();
        if self.tail(document_id)?.is_some() {
            return Err(LedgerError::InvalidStatus {
                id: document_id.to_string(),
                action: "create genesis",
                reason: "chain already exists".to_string(),
            });
        }
        if !matches!(draft.action, ChainAction::Created { .. }) {
            return Err(LedgerError::InvalidStatus {
                id: document_id.to_string(),
                action: "create genesis",
                reason: format!("genesis must record CREATED, not {}", draft.action.name()),
            });
        }

        let block = self.seal(
            document_id,
            0,
            self.algorithm.genesis_sentinel(),
            self.algorithm,
            draft,
        )?;
        batch.insert(Self::block_key(document_id, 0), hash::canonicalize(&block)?);
        Ok(block)
    }

    /// Seals the next block after the current tail and adds it to `batch`.
    pub(crate) fn stage_append(
        &self,
        guard: &DocumentGuard<'_>,
        draft: BlockDraft,
        batch: &mut Batch,
    ) -> Result<ChainBlock> {
        let document_id = guard.id();
        let Some(tail) = self.tail(document_id)? else {
            error!(document_id, action = draft.action.name(), "chain of custody missing");
            return Err(LedgerError::ChainNotFound {
                document_id: document_id.to_string(),
            });
        };

        let sequence = tail.body.sequence + 1;
        let block = self.seal(
            document_id,
            sequence,
            tail.block_hash,
            tail.body.hash_algorithm,
            draft,
        )?;
        batch.insert(
            Self::block_key(document_id, sequence),
            hash::canonicalize(&block)?,
        );
        Ok(block)
    }

    pub fn create_genesis(&self, guard: &DocumentGuard<'_>, draft: BlockDraft) -> Result<ChainBlock> {
        let mut batch = Batch::default();
        let block = self.stage_genesis(guard, draft, &mut batch)?;
        self.db.apply_batch(batch)?;
        debug!(document_id = guard.id(), block_id = block.block_id(), "genesis block written");
        Ok(block)
    }

    pub fn append(&self, guard: &DocumentGuard<'_>, draft: BlockDraft) -> Result<ChainBlock> {
        let mut batch = Batch::default();
        let block = self.stage_append(guard, draft, &mut batch)?;
        self.db.apply_batch(batch)?;
        debug!(
            document_id = guard.id(),
            sequence = block.body.sequence,
            action = block.action().name(),
            "block appended"
        );
        Ok(block)
    }

    pub fn tail(&self, document_id: &str) -> Result<Option<ChainBlock>> {
        match self.db.scan_prefix(Self::chain_prefix(document_id)).next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(minicbor::decode(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Every block of the chain in sequence order.
    pub fn full_chain(&self, document_id: &str) -> Result<Vec<ChainBlock>> {
        self.db
            .scan_prefix(Self::chain_prefix(document_id))
            .map(|entry| -> Result<ChainBlock> {
                let (_, value) = entry?;
                Ok(minicbor::decode(&value)?)
            })
            .collect()
    }
}
