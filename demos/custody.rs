//! Walks one document and one regulatory report through their lifecycles.
//!
//! ```sh
//! RUST_LOG=document_custody=debug cargo run --example custody
//! ```
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use document_custody::{
    Actor, DocumentStore, DocumentType, LedgerConfig, NewDocument, ReportDefinition,
    ReportLifecycle, SignatureType, TemplateRenderer, TimeStamp, VerificationEngine,
    error::RenderError, report::ParameterSpec,
};
use tracing_subscriber::EnvFilter;

struct PlainTextRenderer;

impl TemplateRenderer for PlainTextRenderer {
    fn render(
        &self,
        definition: &ReportDefinition,
        parameters: &BTreeMap<String, String>,
        period_start: TimeStamp,
        period_end: TimeStamp,
    ) -> Result<Vec<u8>, RenderError> {
        let mut body = format!("{}\n{period_start} .. {period_end}\n", definition.name);
        for (key, value) in parameters {
            body.push_str(&format!("{key}: {value}\n"));
        }
        Ok(body.into_bytes())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LedgerConfig::from_toml_str(&format!(
        "[signing]\nenabled = true\ned25519_seed = \"{}\"\n",
        "2a".repeat(32)
    ))?;
    let db = Arc::new(sled::Config::new().temporary(true).open()?);
    let store = Arc::new(
        DocumentStore::builder(Arc::clone(&db))
            .set_config(config)
            .build()?,
    );

    let loan = store.store_document(
        NewDocument::new(
            b"loan terms v1".to_vec(),
            "loan-4411.pdf",
            "application/pdf",
            DocumentType::LoanAgreement,
            "Loan agreement 4411",
            "u_officer",
            "Loan Officer",
        )
        .set_requires_approval(true)
        .set_approvers(vec!["u_credit".to_string()])
        .set_customer("c_4411"),
    )?;
    println!("stored {} retained until {}", loan.id, loan.retention_until);

    store.approve_document(&loan.id, "u_credit", "Credit Committee", "APPROVER")?;
    store.sign_document(&loan.id, "u_notary", "Notary", SignatureType::Qualified, None)?;
    let document = store.get_document(&loan.id, Actor::new("u_auditor", "AUDITOR"))?;
    println!(
        "{} is {} with {} blocks",
        document.metadata.id,
        document.metadata.status,
        document.chain.len()
    );

    let engine = VerificationEngine::new(Arc::clone(&store));
    let result = engine.verify_document(&loan.id);
    println!("valid: {} ({} issues)", result.is_valid, result.issues.len());

    let reports = ReportLifecycle::new(
        Arc::clone(&db),
        Arc::clone(&store),
        Arc::new(PlainTextRenderer),
    );
    reports.register_definition(
        ReportDefinition::new(
            "CTR_DAILY",
            "Currency transaction report",
            DocumentType::CurrencyTransactionReport,
        )
        .regulatory("FINCEN", "T+15D")
        .add_parameter(ParameterSpec::required("branch").set_pattern("[A-Z]{3}[0-9]{2}")),
    )?;

    let mut parameters = BTreeMap::new();
    parameters.insert("branch".to_string(), "NYC01".to_string());
    let period_start = TimeStamp::new_with(2026, 1, 9, 0, 0, 0).context("period start")?;
    let period_end = TimeStamp::new_with(2026, 1, 10, 0, 0, 0).context("period end")?;
    let instance = reports.generate_report(
        "CTR_DAILY",
        parameters,
        "u_compliance",
        period_start,
        period_end,
    )?;
    println!("report {} is {}", instance.id, instance.status);

    let instance = reports.submit_to_regulator(&instance.id, "u_compliance", "Compliance Desk")?;
    let instance = reports.record_acknowledgement(&instance.id, "FINCEN-ACK-0001")?;
    println!(
        "report {} is {} ({})",
        instance.id,
        instance.status,
        instance.submission_ref.unwrap_or_default()
    );

    Ok(())
}
