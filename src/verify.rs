//! Read-only integrity checks over a document, its content and its chain.
//!
//! [`VerificationEngine::verify_document`] never fails. Everything it finds
//! wrong is reported as an [`Issue`], so one call can surface a broken link
//! and a bad signature together.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chain::{ChainAction, ChainBlock};
use crate::document::DocumentMetadata;
use crate::error::Result;
use crate::hash::{ContentHashes, HashAlgorithm};
use crate::signer::UNSIGNED;
use crate::store::{DocumentStore, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub block_id: Option<String>,
}

impl Issue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            block_id: None,
        }
    }
    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }
    fn info(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            ..Self::error(code, message)
        }
    }
    fn at(mut self, block: &ChainBlock) -> Self {
        self.block_id = Some(block.block_id().to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub document_id: String,
    pub is_valid: bool,
    pub content_intact: bool,
    pub hash_match: bool,
    pub chain_intact: bool,
    pub chain_length: usize,
    /// Ids of blocks whose `previous_block_hash` does not match their predecessor.
    pub broken_links: Vec<String>,
    pub issues: Vec<Issue>,
}

impl VerificationResult {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            is_valid: false,
            content_intact: false,
            hash_match: false,
            chain_intact: false,
            chain_length: 0,
            broken_links: vec![],
            issues: vec![],
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    fn finish(mut self) -> Self {
        self.is_valid = self.content_intact
            && self.hash_match
            && self.chain_intact
            && self.errors().next().is_none();
        self
    }
}

pub struct VerificationEngine {
    store: Arc<DocumentStore>,
}

impl VerificationEngine {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub fn verify_document(&self, document_id: &str) -> VerificationResult {
        let mut result = VerificationResult::new(document_id);

        // one locked read, so a concurrent writer never shows up half-applied
        let snapshot = match self.store.snapshot(document_id) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                result
                    .issues
                    .push(Issue::error("DOCUMENT_NOT_FOUND", err.to_string()));
                return result.finish();
            }
        };

        let Snapshot {
            metadata,
            content,
            chain,
        } = snapshot;
        check_content(&metadata, content, &mut result);

        match chain {
            Ok(chain) if chain.is_empty() => {
                result.issues.push(Issue::error(
                    "CHAIN_NOT_FOUND",
                    "document has no genesis block",
                ));
            }
            Ok(chain) => {
                result.chain_length = chain.len();
                result.chain_intact = self.check_chain(&chain, &mut result);
                check_head(&metadata, &chain, &mut result);
            }
            Err(err) => {
                result
                    .issues
                    .push(Issue::error("CHAIN_UNREADABLE", err.to_string()));
            }
        }

        let result = result.finish();
        if result.is_valid {
            debug!(document_id, chain_length = result.chain_length, "document verified");
        } else {
            warn!(
                document_id,
                issues = result.errors().count(),
                "document failed verification"
            );
        }
        result
    }

    /// Link, hash, sequence and signature checks. Returns whether the chain holds.
    fn check_chain(&self, chain: &[ChainBlock], result: &mut VerificationResult) -> bool {
        let signer = self.store.ledger().signer();
        let mut intact = true;
        let mut unsigned = 0usize;

        let genesis = &chain[0];
        let algorithm: HashAlgorithm = genesis.body.hash_algorithm;
        if genesis.previous_block_hash() != algorithm.genesis_sentinel() {
            intact = false;
            result.broken_links.push(genesis.block_id().to_string());
            result.issues.push(
                Issue::error("LINK_BROKEN", "genesis block does not start from the sentinel")
                    .at(genesis),
            );
        }
        if !matches!(genesis.action(), ChainAction::Created { .. }) {
            intact = false;
            result.issues.push(
                Issue::error(
                    "GENESIS_ACTION",
                    format!("genesis records {}, expected CREATED", genesis.action().name()),
                )
                .at(genesis),
            );
        }

        for (index, block) in chain.iter().enumerate() {
            if block.body.sequence != index as u64 {
                intact = false;
                result.issues.push(
                    Issue::error(
                        "SEQUENCE_GAP",
                        format!("block at position {index} has sequence {}", block.body.sequence),
                    )
                    .at(block),
                );
            }

            if index > 0 {
                let previous = &chain[index - 1];
                if block.previous_block_hash() != previous.block_hash {
                    intact = false;
                    result.broken_links.push(block.block_id().to_string());
                    result.issues.push(
                        Issue::error(
                            "LINK_BROKEN",
                            format!(
                                "previous hash {} does not match block {}",
                                block.previous_block_hash(),
                                previous.block_id()
                            ),
                        )
                        .at(block),
                    );
                }
                if block.body.hash_algorithm != algorithm {
                    intact = false;
                    result.issues.push(
                        Issue::error(
                            "ALGORITHM_CHANGED",
                            format!(
                                "block uses {} but the chain started with {}",
                                block.body.hash_algorithm.name(),
                                algorithm.name()
                            ),
                        )
                        .at(block),
                    );
                }
            }

            match block.compute_hash() {
                Ok(hash) if hash == block.block_hash => {}
                Ok(hash) => {
                    intact = false;
                    result.issues.push(
                        Issue::error(
                            "BLOCK_HASH_MISMATCH",
                            format!("stored hash {} recomputes to {hash}", block.block_hash),
                        )
                        .at(block),
                    );
                }
                Err(err) => {
                    intact = false;
                    result
                        .issues
                        .push(Issue::error("BLOCK_HASH_MISMATCH", err.to_string()).at(block));
                }
            }

            if block.signature == UNSIGNED {
                unsigned += 1;
                if signer.is_signing() {
                    result.issues.push(
                        Issue::warning("UNSIGNED_BLOCK", "block was recorded without a signature")
                            .at(block),
                    );
                }
                continue;
            }
            let verified = block
                .signing_payload()
                .is_ok_and(|payload| signer.verify(&payload, &block.signature));
            if !verified {
                intact = false;
                result.issues.push(
                    Issue::error("SIGNATURE_INVALID", "signature does not verify").at(block),
                );
            }
        }

        if unsigned == chain.len() && !signer.is_signing() {
            result.issues.push(Issue::info(
                "UNSIGNED_CHAIN",
                "signing is disabled, only hash linkage was checked",
            ));
        }
        intact
    }
}

fn check_content(
    metadata: &DocumentMetadata,
    content: Result<Option<Vec<u8>>>,
    result: &mut VerificationResult,
) {
    let content = match content {
        Ok(Some(content)) => content,
        Ok(None) => {
            result
                .issues
                .push(Issue::error("CONTENT_MISSING", "no stored content"));
            return;
        }
        Err(err) => {
            result
                .issues
                .push(Issue::error("CONTENT_MISSING", err.to_string()));
            return;
        }
    };

    let actual = ContentHashes::compute(&content, metadata.hash_algorithm);
    result.hash_match = actual.content_hash == metadata.hashes.content_hash;
    if !result.hash_match {
        result.issues.push(Issue::error(
            "HASH_MISMATCH",
            format!(
                "content hashes to {} but {} is recorded",
                actual.content_hash, metadata.hashes.content_hash
            ),
        ));
    }

    let mut intact = result.hash_match;
    if actual.sha512 != metadata.hashes.sha512 || actual.blake3 != metadata.hashes.blake3 {
        intact = false;
        result.issues.push(Issue::error(
            "CHECKSUM_MISMATCH",
            "secondary checksums do not match stored content",
        ));
    }
    if content.len() as u64 != metadata.file_size {
        intact = false;
        result.issues.push(Issue::warning(
            "FILE_SIZE_MISMATCH",
            format!(
                "content is {} bytes but {} is recorded",
                content.len(),
                metadata.file_size
            ),
        ));
    }
    result.content_intact = intact;
}

/// Cross-checks the cached head pointers in the metadata against the chain.
fn check_head(metadata: &DocumentMetadata, chain: &[ChainBlock], result: &mut VerificationResult) {
    let (Some(genesis), Some(tail)) = (chain.first(), chain.last()) else {
        return;
    };

    if metadata.genesis_block_hash != genesis.block_hash {
        result.issues.push(
            Issue::error(
                "GENESIS_MISMATCH",
                "recorded genesis hash does not match the first block",
            )
            .at(genesis),
        );
    }
    if metadata.latest_block_hash != tail.block_hash {
        result.issues.push(
            Issue::error(
                "LATEST_MISMATCH",
                "recorded latest hash does not match the last block",
            )
            .at(tail),
        );
    }
    if metadata.block_count != chain.len() as u64 {
        result.issues.push(Issue::error(
            "BLOCK_COUNT_MISMATCH",
            format!(
                "{} blocks recorded but the chain holds {}",
                metadata.block_count,
                chain.len()
            ),
        ));
    }
    if tail.body.document_hash != metadata.hashes.content_hash {
        result.issues.push(
            Issue::error(
                "HEAD_HASH_MISMATCH",
                "last block was recorded against different content",
            )
            .at(tail),
        );
    }
}
