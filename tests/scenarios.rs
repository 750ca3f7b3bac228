use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::Context;
use chrono::Duration;
use document_custody::error::{DeliveryError, RenderError, SignerError, StorageError};
use document_custody::report::ParameterSpec;
use document_custody::store::APPROVER_ROLE;
use document_custody::{
    Actor, ChainAction, ChainBlock, ChainLedger, ContentStore, Distributor, DocumentStatus,
    DocumentStore, DocumentType, Ed25519Signer, FixedClock, LedgerConfig, MemoryContentStore,
    NewDocument, ReportDefinition, ReportInstance, ReportLifecycle, ReportStatus, SearchCriteria,
    Signer, SignatureType, SortField, SortOrder, TemplateRenderer, TimeStamp, UnsignedSigner,
    VerificationEngine,
};
use parking_lot::Mutex;
use sled::open;
use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

struct Harness {
    db: Arc<sled::Db>,
    store: Arc<DocumentStore>,
    clock: Arc<FixedClock>,
    content: Arc<MemoryContentStore>,
    _dir: TempDir, // declared last so it is dropped after the db
}

fn at(year: i32, month: u32, day: u32, hour: u32) -> TimeStamp {
    TimeStamp::new_with(year, month, day, hour, 0, 0).expect("valid test date")
}

fn harness_with(name: &str, signer: Arc<dyn Signer>, now: TimeStamp) -> anyhow::Result<Harness> {
    // Sled holds a file lock per database, so every test gets its own.
    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join(name))?);
    let clock = Arc::new(FixedClock::new(now.to_datetime_utc()));
    let content = Arc::new(MemoryContentStore::new());

    let store = DocumentStore::builder(Arc::clone(&db))
        .set_config(LedgerConfig::default())
        .set_signer(signer)
        .set_clock(clock.clone())
        .set_content_store(content.clone())
        .build()?;

    Ok(Harness {
        db,
        store: Arc::new(store),
        clock,
        content,
        _dir: dir,
    })
}

fn harness(name: &str) -> anyhow::Result<Harness> {
    harness_with(
        name,
        Arc::new(Ed25519Signer::from_seed([9u8; 32])),
        at(2025, 1, 1, 0),
    )
}

fn contract(requires_approval: bool) -> NewDocument {
    NewDocument::new(
        b"master services agreement".to_vec(),
        "msa.pdf",
        "application/pdf",
        DocumentType::Contract,
        "Master services agreement",
        "u_owner",
        "Olive Owner",
    )
    .set_requires_approval(requires_approval)
}

#[test]
fn store_view_and_reject_premature_approval() -> anyhow::Result<()> {
    let h = harness("happy_path.db")?;

    let meta = h.store.store_document(contract(false))?;
    assert_eq!(meta.status, DocumentStatus::Draft);
    assert_eq!(meta.block_count, 1);
    assert_eq!(meta.genesis_block_hash, meta.latest_block_hash);
    assert_eq!(meta.version, "1.0");

    let document = h
        .store
        .get_document(&meta.id, Actor::new("u_reader", "AUDITOR"))?;
    assert_eq!(document.metadata.block_count, 2);
    assert_eq!(document.chain.len(), 2);
    assert_eq!(document.content, b"master services agreement");
    assert_eq!(document.chain[1].action().name(), "VIEWED");

    let err = h
        .store
        .approve_document(&meta.id, "u_boss", "Bea Boss", "APPROVER")
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
    assert_eq!(h.store.metadata(&meta.id)?.block_count, 2);

    Ok(())
}

#[test]
fn approval_resets_on_edit() -> anyhow::Result<()> {
    let h = harness("approval_reset.db")?;

    let meta = h.store.store_document(contract(true))?;
    assert_eq!(meta.status, DocumentStatus::PendingApproval);

    let meta = h
        .store
        .approve_document(&meta.id, "u_boss", "Bea Boss", "APPROVER")?;
    assert_eq!(meta.status, DocumentStatus::Approved);
    assert_eq!(meta.block_count, 2);
    assert_eq!(meta.approved_by.as_deref(), Some("u_boss"));

    let meta = h.store.update_document(
        &meta.id,
        b"master services agreement, amended".to_vec(),
        Actor::new("u_owner", "OWNER"),
        Some("clause 4 amended".to_string()),
    )?;
    assert_eq!(meta.status, DocumentStatus::PendingApproval);
    assert_eq!(meta.block_count, 3);
    assert_eq!(meta.version, "1.1");
    assert_eq!(meta.approved_by, None);
    assert_eq!(meta.approved_at, None);

    let chain = h.store.get_chain(&meta.id)?;
    match chain[2].action() {
        document_custody::ChainAction::Modified {
            previous_version,
            version,
            ..
        } => {
            assert_eq!(previous_version, "1.0");
            assert_eq!(version, "1.1");
        }
        other => panic!("expected MODIFIED, got {}", other.name()),
    }

    Ok(())
}

#[test]
fn approver_list_is_enforced() -> anyhow::Result<()> {
    let h = harness("approver_list.db")?;

    let meta = h
        .store
        .store_document(contract(true).set_approvers(vec!["u_legal".to_string()]))?;

    let err = h
        .store
        .approve_document(&meta.id, "u_intern", "Ian Intern", "APPROVER")
        .unwrap_err();
    assert_eq!(err.code(), "UNAUTHORIZED");

    let meta = h
        .store
        .reject_document(&meta.id, "u_legal", "Lee Legal", "missing signatures")?;
    assert_eq!(meta.status, DocumentStatus::Draft);
    assert_eq!(meta.block_count, 2);

    let chain = h.store.get_chain(&meta.id)?;
    assert_eq!(chain[1].action().name(), "REJECTED");
    assert_eq!(chain[1].body.actor.id, "u_legal");
    assert_eq!(chain[1].body.actor.role, APPROVER_ROLE);

    Ok(())
}

#[test]
fn sign_submit_and_acknowledge() -> anyhow::Result<()> {
    let h = harness("sign_submit.db")?;
    let meta = h.store.store_document(contract(false))?;

    let meta = h.store.sign_document(
        &meta.id,
        "u_notary",
        "Nia Notary",
        SignatureType::Qualified,
        Some("SER-001".to_string()),
    )?;
    assert!(meta.is_signed);
    assert_eq!(meta.signature_type, Some(SignatureType::Qualified));

    let submission = h
        .store
        .submit_to_regulator(&meta.id, "fca", "u_filer", "Fay Filer")?;
    assert!(submission.submission_ref.starts_with("FCA-20250101-"));

    let meta = h.store.metadata(&meta.id)?;
    assert_eq!(meta.status, DocumentStatus::Published);
    assert_eq!(meta.external_id.as_ref(), Some(&submission.submission_ref));
    assert_eq!(meta.published_at, Some(at(2025, 1, 1, 0)));

    let meta = h
        .store
        .record_acknowledgement(&meta.id, "ACK-77", Actor::new("FCA", "REGULATOR"))?;
    assert_eq!(meta.block_count, 4);

    let engine = VerificationEngine::new(Arc::clone(&h.store));
    let result = engine.verify_document(&meta.id);
    assert!(result.is_valid, "{:?}", result.issues);

    Ok(())
}

#[test]
fn retention_from_type_and_only_extends() -> anyhow::Result<()> {
    let h = harness("retention.db")?;

    let meta = h.store.store_document(NewDocument::new(
        b"loan".to_vec(),
        "loan.pdf",
        "application/pdf",
        DocumentType::LoanAgreement,
        "Loan agreement",
        "u_owner",
        "Olive Owner",
    ))?;
    assert_eq!(meta.retention_until, at(2033, 1, 1, 0));
    assert_eq!(
        h.store
            .retention()
            .archive_due(meta.document_type, meta.created_at),
        Some(at(2027, 1, 1, 0))
    );

    let err = h
        .store
        .extend_retention(&meta.id, at(2030, 1, 1, 0), Actor::new("u_records", "RECORDS"))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");

    let meta = h
        .store
        .extend_retention(&meta.id, at(2040, 1, 1, 0), Actor::new("u_records", "RECORDS"))?;
    assert_eq!(meta.retention_until, at(2040, 1, 1, 0));
    assert_eq!(meta.block_count, 2);

    Ok(())
}

#[test]
fn archival_and_deletion_queries() -> anyhow::Result<()> {
    let h = harness("archival.db")?;
    let memo = h.store.store_document(NewDocument::new(
        b"lunch rota".to_vec(),
        "memo.txt",
        "text/plain",
        DocumentType::InternalMemo,
        "Lunch rota",
        "u_owner",
        "Olive Owner",
    ))?;
    let contract = h.store.store_document(contract(false))?;

    assert!(h.store.documents_for_archival()?.is_empty());

    h.clock.advance(Duration::days(400));
    let due: Vec<_> = h
        .store
        .documents_for_archival()?
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert!(due.contains(&memo.id));
    assert!(due.contains(&contract.id));

    let actor = Actor::new("u_records", "RECORDS");
    h.store.archive_document(&memo.id, actor.clone())?;
    h.store.archive_document(&contract.id, actor.clone())?;
    let err = h
        .store
        .archive_document(&memo.id, actor.clone())
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
    assert!(h.store.documents_for_archival()?.is_empty());

    // memo retention is two years and deletable once archived; contracts are not
    assert!(h.store.documents_eligible_for_deletion()?.is_empty());
    h.clock.advance(Duration::days(365 * 2));
    let deletable: Vec<_> = h
        .store
        .documents_eligible_for_deletion()?
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(deletable, vec![memo.id]);

    Ok(())
}

#[test]
fn search_filters_sorts_and_pages() -> anyhow::Result<()> {
    let h = harness("search.db")?;

    for i in 0..5 {
        h.clock.advance(Duration::minutes(1));
        h.store.store_document(
            NewDocument::new(
                format!("statement {i}").into_bytes(),
                format!("statement-{i}.pdf"),
                "application/pdf",
                DocumentType::AccountStatement,
                format!("Statement {i}"),
                "u_teller",
                "Tom Teller",
            )
            .set_customer("c_1")
            .set_tags(vec!["monthly".to_string()]),
        )?;
    }
    h.store.store_document(NewDocument::new(
        b"sar".to_vec(),
        "sar.pdf",
        "application/pdf",
        DocumentType::SuspiciousActivityReport,
        "SAR 2025-01",
        "u_aml",
        "Ann Aml",
    ))?;

    let page = h.store.search_documents(
        &SearchCriteria::new()
            .set_type(DocumentType::AccountStatement)
            .sort(SortField::CreatedAt, SortOrder::Ascending)
            .page(0, 2),
    )?;
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total_pages(), 3);
    assert!(page.has_next());
    assert_eq!(page.items[0].title, "Statement 0");

    let last = h.store.search_documents(
        &SearchCriteria::new()
            .set_customer("c_1")
            .set_tag("monthly")
            .sort(SortField::CreatedAt, SortOrder::Ascending)
            .page(4, 2),
    )?;
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_next());
    assert_eq!(last.items[0].title, "Statement 4");

    let regulatory = h
        .store
        .search_documents(&SearchCriteria::new().regulatory_only())?;
    assert_eq!(regulatory.total, 1);
    assert_eq!(regulatory.items[0].document_type, DocumentType::SuspiciousActivityReport);

    let keyword = h
        .store
        .search_documents(&SearchCriteria::new().set_keyword("STATEMENT 3"))?;
    assert_eq!(keyword.total, 1);

    Ok(())
}

#[test]
fn expiring_soon_window() -> anyhow::Result<()> {
    let h = harness("expiring.db")?;

    h.store
        .store_document(contract(false).set_expires_at(at(2025, 1, 20, 0)))?;
    h.store
        .store_document(contract(false).set_expires_at(at(2025, 6, 1, 0)))?;
    h.store.store_document(contract(false))?;

    let page = h
        .store
        .search_documents(&SearchCriteria::new().expiring_soon())?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].expires_at, Some(at(2025, 1, 20, 0)));

    Ok(())
}

/// Signs until switched off, then fails every request.
struct FlakySigner {
    inner: Ed25519Signer,
    down: AtomicBool,
}

impl Signer for FlakySigner {
    fn sign(&self, payload: &[u8]) -> Result<String, SignerError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SignerError::Backend("hsm offline".to_string()));
        }
        self.inner.sign(payload)
    }

    fn verify(&self, payload: &[u8], signature: &str) -> bool {
        self.inner.verify(payload, signature)
    }
}

#[test]
fn signing_failure_writes_nothing() -> anyhow::Result<()> {
    let signer = Arc::new(FlakySigner {
        inner: Ed25519Signer::from_seed([3u8; 32]),
        down: AtomicBool::new(false),
    });
    let h = harness_with("signing_failure.db", signer.clone(), at(2025, 1, 1, 0))?;
    let before = h.store.store_document(contract(true))?;

    signer.down.store(true, Ordering::SeqCst);
    let err = h
        .store
        .approve_document(&before.id, "u_boss", "Bea Boss", "APPROVER")
        .unwrap_err();
    assert_eq!(err.code(), "SIGNING_FAILED");
    assert!(err.is_retryable());

    let err = h
        .store
        .update_document(&before.id, b"v2".to_vec(), Actor::new("u_owner", "OWNER"), None)
        .unwrap_err();
    assert_eq!(err.code(), "SIGNING_FAILED");

    let after = h.store.metadata(&before.id)?;
    assert_eq!(after, before);
    assert_eq!(h.store.get_chain(&before.id)?.len(), 1);
    assert_eq!(
        h.content.get(&before.id)?,
        Some(b"master services agreement".to_vec())
    );

    // nothing is left half-written for a document that never got created
    let err = h.store.store_document(contract(false)).unwrap_err();
    assert_eq!(err.code(), "SIGNING_FAILED");
    let all = h.store.search_documents(&SearchCriteria::new())?;
    assert_eq!(all.total, 1);

    Ok(())
}

#[test]
fn content_tampering_is_detected() -> anyhow::Result<()> {
    let h = harness("content_tamper.db")?;
    let meta = h.store.store_document(contract(false))?;
    let engine = VerificationEngine::new(Arc::clone(&h.store));

    assert!(engine.verify_document(&meta.id).is_valid);

    h.content.put(&meta.id, b"master services agreement (forged)")?;
    let result = engine.verify_document(&meta.id);

    assert!(!result.is_valid);
    assert!(!result.hash_match);
    assert!(!result.content_intact);
    assert!(result.chain_intact);
    assert!(result.has_issue("HASH_MISMATCH"));

    Ok(())
}

#[test]
fn block_tampering_is_detected() -> anyhow::Result<()> {
    let h = harness("block_tamper.db")?;
    let meta = h.store.store_document(contract(false))?;
    h.store
        .get_document(&meta.id, Actor::new("u_reader", "AUDITOR"))?;
    h.store
        .download_document(&meta.id, Actor::new("u_reader", "AUDITOR"))?;

    let key = ChainLedger::block_key(&meta.id, 1);
    let stored = h.db.get(&key)?.context("block 1 missing")?;
    let mut block: ChainBlock = minicbor::decode(&stored)?;
    block.body.actor.id = "u_someone_else".to_string();
    h.db.insert(&key, minicbor::to_vec(&block)?)?;

    let engine = VerificationEngine::new(Arc::clone(&h.store));
    let result = engine.verify_document(&meta.id);

    assert!(!result.is_valid);
    assert!(!result.chain_intact);
    assert_eq!(result.chain_length, 3);
    let flagged: Vec<_> = result
        .errors()
        .filter_map(|issue| issue.block_id.as_deref())
        .collect();
    assert!(flagged.contains(&block.block_id()));
    assert!(result.has_issue("BLOCK_HASH_MISMATCH"));

    // same call, same answer
    assert_eq!(engine.verify_document(&meta.id), result);

    Ok(())
}

#[test]
fn missing_document_reports_instead_of_failing() -> anyhow::Result<()> {
    let h = harness("missing.db")?;
    let engine = VerificationEngine::new(Arc::clone(&h.store));

    let result = engine.verify_document("doc_nothing");

    assert!(!result.is_valid);
    assert!(result.has_issue("DOCUMENT_NOT_FOUND"));
    assert_eq!(
        h.store.get_chain("doc_nothing").unwrap_err().code(),
        "NOT_FOUND"
    );

    Ok(())
}

#[test]
fn concurrent_reads_serialize_on_the_chain() -> anyhow::Result<()> {
    let h = harness("concurrent.db")?;
    let meta = h.store.store_document(contract(false))?;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&h.store);
            let id = meta.id.clone();
            thread::spawn(move || store.get_document(&id, Actor::new(format!("u_{i}"), "AUDITOR")))
        })
        .collect();
    for handle in handles {
        handle.join().expect("reader thread panicked")?;
    }

    let engine = VerificationEngine::new(Arc::clone(&h.store));
    let result = engine.verify_document(&meta.id);
    assert!(result.is_valid, "{:?}", result.issues);
    assert_eq!(result.chain_length, 9);
    assert_eq!(h.store.metadata(&meta.id)?.block_count, 9);

    Ok(())
}

#[test]
fn verification_during_writes_sees_no_tampering() -> anyhow::Result<()> {
    let h = harness_with("verify_while_writing.db", Arc::new(UnsignedSigner), at(2025, 1, 1, 0))?;
    let meta = h.store.store_document(contract(false))?;
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = Arc::clone(&h.store);
        let done = Arc::clone(&done);
        let id = meta.id.clone();
        thread::spawn(move || {
            let written = (0..300).try_for_each(|i| {
                store
                    .update_document(
                        &id,
                        format!("revision {i}").into_bytes(),
                        Actor::new("u_owner", "OWNER"),
                        None,
                    )
                    .map(|_| ())
            });
            done.store(true, Ordering::SeqCst);
            written
        })
    };

    let engine = VerificationEngine::new(Arc::clone(&h.store));
    while !done.load(Ordering::SeqCst) {
        let result = engine.verify_document(&meta.id);
        assert!(result.is_valid, "untouched document reported invalid: {:?}", result.issues);
    }
    writer.join().expect("writer thread panicked")?;

    let result = engine.verify_document(&meta.id);
    assert!(result.is_valid, "{:?}", result.issues);
    assert_eq!(result.chain_length, 301);

    Ok(())
}

#[test]
fn missing_chain_is_reported() -> anyhow::Result<()> {
    let h = harness("missing_chain.db")?;
    let meta = h.store.store_document(contract(false))?;
    h.store
        .get_document(&meta.id, Actor::new("u_reader", "AUDITOR"))?;

    for sequence in 0..2 {
        h.db.remove(ChainLedger::block_key(&meta.id, sequence))?;
    }

    let err = h
        .store
        .get_document(&meta.id, Actor::new("u_reader", "AUDITOR"))
        .unwrap_err();
    assert_eq!(err.code(), "CHAIN_NOT_FOUND");
    assert!(!err.is_retryable());
    assert_eq!(h.store.metadata(&meta.id)?.block_count, 2);

    let engine = VerificationEngine::new(Arc::clone(&h.store));
    let result = engine.verify_document(&meta.id);
    assert!(!result.is_valid);
    assert!(!result.chain_intact);
    assert_eq!(result.chain_length, 0);
    assert!(result.has_issue("CHAIN_NOT_FOUND"));

    Ok(())
}

/// Keeps content in memory and rejects writes while `down` is set.
#[derive(Default)]
struct UnreliableContentStore {
    inner: MemoryContentStore,
    down: AtomicBool,
}

impl ContentStore for UnreliableContentStore {
    fn put(&self, document_id: &str, bytes: &[u8]) -> Result<String, StorageError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("bucket unavailable".to_string()));
        }
        self.inner.put(document_id, bytes)
    }

    fn get(&self, document_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(document_id)
    }

    fn remove(&self, document_id: &str) -> Result<(), StorageError> {
        self.inner.remove(document_id)
    }
}

struct UnreliableHarness {
    db: Arc<sled::Db>,
    store: Arc<DocumentStore>,
    content: Arc<UnreliableContentStore>,
    _dir: TempDir,
}

fn unreliable_harness(name: &str) -> anyhow::Result<UnreliableHarness> {
    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join(name))?);
    let content = Arc::new(UnreliableContentStore::default());
    let store = DocumentStore::builder(Arc::clone(&db))
        .set_signer(Arc::new(Ed25519Signer::from_seed([6u8; 32])))
        .set_clock(Arc::new(FixedClock::new(at(2025, 1, 1, 0).to_datetime_utc())))
        .set_content_store(content.clone())
        .build()?;

    Ok(UnreliableHarness {
        db,
        store: Arc::new(store),
        content,
        _dir: dir,
    })
}

#[test]
fn content_storage_failure_writes_nothing() -> anyhow::Result<()> {
    let h = unreliable_harness("storage_failure.db")?;
    let before = h.store.store_document(contract(false))?;

    h.content.down.store(true, Ordering::SeqCst);
    let err = h
        .store
        .update_document(&before.id, b"v2".to_vec(), Actor::new("u_owner", "OWNER"), None)
        .unwrap_err();
    assert_eq!(err.code(), "STORAGE_FAILED");
    assert!(err.is_retryable());
    assert_eq!(h.store.metadata(&before.id)?, before);
    assert_eq!(h.store.get_chain(&before.id)?.len(), 1);
    assert_eq!(
        h.content.get(&before.id)?,
        Some(b"master services agreement".to_vec())
    );

    // a create that fails leaves no metadata or blocks behind
    let err = h.store.store_document(contract(false)).unwrap_err();
    assert_eq!(err.code(), "STORAGE_FAILED");
    assert_eq!(h.store.search_documents(&SearchCriteria::new())?.total, 1);
    assert_eq!(h.db.scan_prefix("chain/").count(), 1);

    h.content.down.store(false, Ordering::SeqCst);
    h.store
        .update_document(&before.id, b"v2".to_vec(), Actor::new("u_owner", "OWNER"), None)?;
    let engine = VerificationEngine::new(Arc::clone(&h.store));
    assert!(engine.verify_document(&before.id).is_valid);

    Ok(())
}

struct TextRenderer {
    fail: bool,
}

impl TemplateRenderer for TextRenderer {
    fn render(
        &self,
        definition: &ReportDefinition,
        parameters: &BTreeMap<String, String>,
        _period_start: TimeStamp,
        period_end: TimeStamp,
    ) -> Result<Vec<u8>, RenderError> {
        if self.fail {
            return Err(RenderError("template missing".to_string()));
        }
        Ok(format!("{} {period_end} {parameters:?}", definition.name).into_bytes())
    }
}

#[derive(Default)]
struct RecordingDistributor {
    sent: Mutex<Vec<(String, Vec<String>)>>,
}

impl Distributor for RecordingDistributor {
    fn notify(&self, instance: &ReportInstance, recipients: &[String]) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .push((instance.id.clone(), recipients.to_vec()));
        Ok(())
    }
}

fn sar_definition() -> ReportDefinition {
    ReportDefinition::new(
        "SAR_DAILY",
        "Suspicious activity",
        DocumentType::SuspiciousActivityReport,
    )
    .regulatory("FINCEN", "T+6H")
    .add_parameter(ParameterSpec::required("branch").set_pattern("[A-Z]{3}[0-9]{2}"))
    .set_recipients(vec!["mlro@bank.example".to_string()])
}

fn branch(code: &str) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();
    parameters.insert("branch".to_string(), code.to_string());
    parameters
}

#[test]
fn regulatory_report_deadline_and_lifecycle() -> anyhow::Result<()> {
    let h = harness_with(
        "report_deadline.db",
        Arc::new(Ed25519Signer::from_seed([5u8; 32])),
        at(2026, 1, 10, 7),
    )?;
    let distributor = Arc::new(RecordingDistributor::default());
    let reports = ReportLifecycle::new(
        Arc::clone(&h.db),
        Arc::clone(&h.store),
        Arc::new(TextRenderer { fail: false }),
    )
    .set_distributor(distributor.clone());
    reports.register_definition(sar_definition())?;

    let instance = reports.generate_report(
        "SAR_DAILY",
        branch("LON01"),
        "u_mlro",
        at(2026, 1, 9, 0),
        at(2026, 1, 10, 0),
    )?;
    assert_eq!(instance.status, ReportStatus::Generated);
    assert_eq!(
        reports.submission_deadline(&instance)?,
        Some(at(2026, 1, 10, 6))
    );
    assert_eq!(distributor.sent.lock().len(), 1);

    let document_id = instance.document_id.clone().context("report document")?;
    let document = h.store.metadata(&document_id)?;
    assert_eq!(document.access_level, document_custody::AccessLevel::Restricted);
    assert_eq!(document.status, DocumentStatus::PendingApproval);

    let overdue = reports.overdue_submissions()?;
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, instance.id);

    let err = reports
        .record_acknowledgement(&instance.id, "ACK-1")
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");

    let submitted = reports.submit_to_regulator(&instance.id, "u_mlro", "Mo Mlro")?;
    assert_eq!(submitted.status, ReportStatus::Submitted);
    assert!(reports.overdue_submissions()?.is_empty());

    let acknowledged = reports.record_acknowledgement(&instance.id, "ACK-1")?;
    assert_eq!(acknowledged.status, ReportStatus::Acknowledged);
    assert_eq!(acknowledged.acknowledgement_ref.as_deref(), Some("ACK-1"));
    assert_eq!(reports.instance(&instance.id)?, acknowledged);

    let chain = h.store.get_chain(&document_id)?;
    let actions: Vec<_> = chain.iter().map(|b| b.action().name()).collect();
    assert_eq!(actions, vec!["CREATED", "SUBMITTED", "ACKNOWLEDGED"]);

    Ok(())
}

#[test]
fn report_input_and_render_failures() -> anyhow::Result<()> {
    let h = harness("report_failures.db")?;
    let reports = ReportLifecycle::new(
        Arc::clone(&h.db),
        Arc::clone(&h.store),
        Arc::new(TextRenderer { fail: true }),
    );
    reports.register_definition(sar_definition())?;

    let err = reports
        .generate_report("SAR_DAILY", BTreeMap::new(), "u", at(2025, 1, 1, 0), at(2025, 1, 1, 0))
        .unwrap_err();
    assert_eq!(err.code(), "MISSING_PARAMETER");

    let err = reports
        .generate_report("SAR_DAILY", branch("london"), "u", at(2025, 1, 1, 0), at(2025, 1, 1, 0))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");

    let err = reports
        .generate_report("NOPE", BTreeMap::new(), "u", at(2025, 1, 1, 0), at(2025, 1, 1, 0))
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let failed = reports.generate_report(
        "SAR_DAILY",
        branch("LON01"),
        "u",
        at(2024, 12, 31, 0),
        at(2025, 1, 1, 0),
    )?;
    assert_eq!(failed.status, ReportStatus::Failed);
    assert_eq!(failed.document_id, None);
    assert!(failed.error.is_some());

    let err = reports
        .submit_to_regulator(&failed.id, "u", "U")
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");

    Ok(())
}

#[test]
fn report_storage_failure_is_recorded_on_the_instance() -> anyhow::Result<()> {
    let h = unreliable_harness("report_storage_failure.db")?;
    let reports = ReportLifecycle::new(
        Arc::clone(&h.db),
        Arc::clone(&h.store),
        Arc::new(TextRenderer { fail: false }),
    );
    reports.register_definition(sar_definition())?;

    h.content.down.store(true, Ordering::SeqCst);
    let failed = reports.generate_report(
        "SAR_DAILY",
        branch("LON01"),
        "u_mlro",
        at(2024, 12, 31, 0),
        at(2025, 1, 1, 0),
    )?;

    assert_eq!(failed.status, ReportStatus::Failed);
    assert_eq!(failed.document_id, None);
    assert!(failed.error.as_deref().is_some_and(|e| e.contains("bucket unavailable")));
    assert_eq!(reports.instance(&failed.id)?, failed);
    assert_eq!(h.store.search_documents(&SearchCriteria::new())?.total, 0);

    Ok(())
}

#[test]
fn failed_report_submission_can_be_retried() -> anyhow::Result<()> {
    let signer = Arc::new(FlakySigner {
        inner: Ed25519Signer::from_seed([7u8; 32]),
        down: AtomicBool::new(false),
    });
    let h = harness_with("report_retry.db", signer.clone(), at(2026, 1, 10, 1))?;
    let reports = ReportLifecycle::new(
        Arc::clone(&h.db),
        Arc::clone(&h.store),
        Arc::new(TextRenderer { fail: false }),
    );
    reports.register_definition(sar_definition())?;
    let generated = reports.generate_report(
        "SAR_DAILY",
        branch("LON01"),
        "u_mlro",
        at(2026, 1, 9, 0),
        at(2026, 1, 10, 0),
    )?;
    assert_eq!(reports.instance(&generated.id)?, generated);
    let document_id = generated.document_id.clone().context("report document")?;

    signer.down.store(true, Ordering::SeqCst);
    let err = reports
        .submit_to_regulator(&generated.id, "u_mlro", "Mo Mlro")
        .unwrap_err();
    assert_eq!(err.code(), "SIGNING_FAILED");
    assert_eq!(reports.instance(&generated.id)?, generated);
    assert_eq!(h.store.get_chain(&document_id)?.len(), 1);

    signer.down.store(false, Ordering::SeqCst);
    let submitted = reports.submit_to_regulator(&generated.id, "u_mlro", "Mo Mlro")?;
    assert_eq!(reports.instance(&generated.id)?, submitted);

    let chain = h.store.get_chain(&document_id)?;
    let refs: Vec<_> = chain
        .iter()
        .filter_map(|block| match block.action() {
            ChainAction::Submitted { submission_ref, .. } => Some(submission_ref.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(refs.len(), 1);
    assert_eq!(submitted.submission_ref.as_ref(), Some(&refs[0]));

    let err = reports
        .submit_to_regulator(&generated.id, "u_mlro", "Mo Mlro")
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
    assert_eq!(h.store.get_chain(&document_id)?.len(), 2);

    Ok(())
}

#[test]
fn operational_reports_cannot_be_submitted() -> anyhow::Result<()> {
    let h = harness("operational_report.db")?;
    let reports = ReportLifecycle::new(
        Arc::clone(&h.db),
        Arc::clone(&h.store),
        Arc::new(TextRenderer { fail: false }),
    );
    reports.register_definition(ReportDefinition::new(
        "BRANCH_KPI",
        "Branch KPIs",
        DocumentType::Other,
    ))?;

    let instance = reports.generate_report(
        "BRANCH_KPI",
        BTreeMap::new(),
        "u_ops",
        at(2024, 12, 1, 0),
        at(2025, 1, 1, 0),
    )?;
    assert_eq!(instance.status, ReportStatus::Generated);
    let document = h
        .store
        .metadata(instance.document_id.as_deref().context("report document")?)?;
    assert_eq!(document.access_level, document_custody::AccessLevel::Confidential);
    assert_eq!(document.status, DocumentStatus::Draft);

    let err = reports
        .submit_to_regulator(&instance.id, "u_ops", "Ops")
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
    assert_eq!(reports.submission_deadline(&instance)?, None);

    Ok(())
}
