//! Generated reports and their path to a regulator.
//!
//! ```text
//! GENERATING -> GENERATED -> SUBMITTED -> ACKNOWLEDGED
//!           \-> FAILED
//! ```
//!
//! Each generated report is stored as a document, so its chain of custody
//! records generation, submission and acknowledgement like any other record.
//! An instance's new status is committed in the same batch as the block that
//! records it, so the two never disagree.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use regex::Regex;
use sled::Batch;
use tracing::{error, info, warn};

use crate::document::{AccessLevel, DocumentType, NewDocument};
use crate::error::{DeliveryError, LedgerError, RenderError, Result};
use crate::locks::DocumentLocks;
use crate::store::DocumentStore;
use crate::types::{Actor, TimeStamp};
use crate::utils::{self, REPORT_HRP};

const DEFINITION_PREFIX: &str = "report/def/";
const INSTANCE_PREFIX: &str = "report/inst/";

pub const REGULATOR_ROLE: &str = "REGULATOR";

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ParameterSpec {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub required: bool,
    #[n(2)]
    pub pattern: Option<String>, // whole value must match
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            pattern: None,
        }
    }
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }
    pub fn set_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    fn regex(&self) -> Option<std::result::Result<Regex, regex::Error>> {
        self.pattern
            .as_ref()
            .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ReportDefinition {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub document_type: DocumentType,
    #[n(3)]
    pub regulatory: bool,
    #[n(4)]
    pub regulator_code: Option<String>,
    #[n(5)]
    pub parameters: Vec<ParameterSpec>,
    #[n(6)]
    pub submission_deadline: Option<String>, // "T+<n>H" or "T+<n>D" after period end
    #[n(7)]
    pub recipients: Vec<String>,
    #[n(8)]
    pub mime_type: String,
    #[n(9)]
    pub file_extension: String,
}

impl ReportDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, document_type: DocumentType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            document_type,
            regulatory: false,
            regulator_code: None,
            parameters: vec![],
            submission_deadline: None,
            recipients: vec![],
            mime_type: "application/pdf".to_string(),
            file_extension: "pdf".to_string(),
        }
    }
    /// Marks the report as filed with `regulator_code` within `deadline`.
    pub fn regulatory(
        mut self,
        regulator_code: impl Into<String>,
        deadline: impl Into<String>,
    ) -> Self {
        self.regulatory = true;
        self.regulator_code = Some(regulator_code.into());
        self.submission_deadline = Some(deadline.into());
        self
    }
    pub fn add_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }
    pub fn set_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }
    pub fn set_format(
        mut self,
        mime_type: impl Into<String>,
        file_extension: impl Into<String>,
    ) -> Self {
        self.mime_type = mime_type.into();
        self.file_extension = file_extension.into();
        self
    }

    pub fn deadline(&self) -> Result<Option<SubmissionDeadline>> {
        self.submission_deadline
            .as_deref()
            .map(|raw| {
                SubmissionDeadline::parse(raw).ok_or_else(|| LedgerError::InvalidParameter {
                    context: self.id.clone(),
                    name: "submission_deadline".to_string(),
                    reason: format!("'{raw}' is not T+<n>H or T+<n>D"),
                })
            })
            .transpose()
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LedgerError::MissingParameter {
                context: "report definition".to_string(),
                name: "id".to_string(),
            });
        }
        if self.regulatory && self.regulator_code.is_none() {
            return Err(LedgerError::MissingParameter {
                context: self.id.clone(),
                name: "regulator_code".to_string(),
            });
        }
        self.deadline()?;
        for parameter in &self.parameters {
            if let Some(Err(err)) = parameter.regex() {
                return Err(LedgerError::InvalidParameter {
                    context: self.id.clone(),
                    name: parameter.name.clone(),
                    reason: format!("pattern does not compile: {err}"),
                });
            }
        }
        Ok(())
    }

    fn check_parameters(&self, parameters: &BTreeMap<String, String>) -> Result<()> {
        for spec in &self.parameters {
            let value = parameters
                .get(&spec.name)
                .filter(|value| !value.trim().is_empty());
            let Some(value) = value else {
                if spec.required {
                    return Err(LedgerError::MissingParameter {
                        context: self.id.clone(),
                        name: spec.name.clone(),
                    });
                }
                continue;
            };

            let invalid = |reason: String| LedgerError::InvalidParameter {
                context: self.id.clone(),
                name: spec.name.clone(),
                reason,
            };
            match spec.regex() {
                Some(Ok(regex)) if !regex.is_match(value) => {
                    return Err(invalid(format!("'{value}' does not match the expected format")));
                }
                Some(Err(err)) => return Err(invalid(err.to_string())),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Time allowed after the end of the reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionDeadline {
    Hours(u32),
    Days(u32),
}

impl SubmissionDeadline {
    pub fn parse(raw: &str) -> Option<Self> {
        let offset = raw.trim().strip_prefix("T+")?;
        if let Some(hours) = offset.strip_suffix('H') {
            return hours.parse().ok().map(SubmissionDeadline::Hours);
        }
        let days = offset.strip_suffix('D')?;
        days.parse().ok().map(SubmissionDeadline::Days)
    }

    pub fn after(&self, period_end: TimeStamp) -> Option<TimeStamp> {
        let offset = match self {
            SubmissionDeadline::Hours(hours) => Duration::hours(i64::from(*hours)),
            SubmissionDeadline::Days(days) => Duration::days(i64::from(*days)),
        };
        period_end.plus(offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ReportStatus {
    #[n(0)]
    Generating,
    #[n(1)]
    Generated,
    #[n(2)]
    Failed,
    #[n(3)]
    Submitted,
    #[n(4)]
    Acknowledged,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReportStatus::Generating => "GENERATING",
            ReportStatus::Generated => "GENERATED",
            ReportStatus::Failed => "FAILED",
            ReportStatus::Submitted => "SUBMITTED",
            ReportStatus::Acknowledged => "ACKNOWLEDGED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ReportInstance {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub definition_id: String,
    #[n(2)]
    pub document_id: Option<String>,
    #[n(3)]
    pub status: ReportStatus,
    #[n(4)]
    pub parameters: BTreeMap<String, String>,
    #[n(5)]
    pub period_start: TimeStamp,
    #[n(6)]
    pub period_end: TimeStamp,
    #[n(7)]
    pub generated_by: String,
    #[n(8)]
    pub created_at: TimeStamp,
    #[n(9)]
    pub generated_at: Option<TimeStamp>,
    #[n(10)]
    pub error: Option<String>,
    #[n(11)]
    pub submitted_by: Option<String>,
    #[n(12)]
    pub submitted_at: Option<TimeStamp>,
    #[n(13)]
    pub submission_ref: Option<String>,
    #[n(14)]
    pub acknowledged_at: Option<TimeStamp>,
    #[n(15)]
    pub acknowledgement_ref: Option<String>,
}

impl ReportInstance {
    fn fail(&mut self, error: String) {
        self.status = ReportStatus::Failed;
        self.error = Some(error);
    }
}

/// Produces report bytes from a definition and its inputs.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        definition: &ReportDefinition,
        parameters: &BTreeMap<String, String>,
        period_start: TimeStamp,
        period_end: TimeStamp,
    ) -> std::result::Result<Vec<u8>, RenderError>;
}

/// Tells recipients a report is ready.
pub trait Distributor: Send + Sync {
    fn notify(
        &self,
        instance: &ReportInstance,
        recipients: &[String],
    ) -> std::result::Result<(), DeliveryError>;
}

pub struct ReportLifecycle {
    db: Arc<sled::Db>,
    store: Arc<DocumentStore>,
    renderer: Arc<dyn TemplateRenderer>,
    distributor: Option<Arc<dyn Distributor>>,
    locks: DocumentLocks,
}

impl ReportLifecycle {
    pub fn new(
        db: Arc<sled::Db>,
        store: Arc<DocumentStore>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            db,
            store,
            renderer,
            distributor: None,
            locks: DocumentLocks::new(),
        }
    }

    pub fn set_distributor(mut self, distributor: Arc<dyn Distributor>) -> Self {
        self.distributor = Some(distributor);
        self
    }

    fn definition_key(id: &str) -> Vec<u8> {
        format!("{DEFINITION_PREFIX}{id}").into_bytes()
    }

    fn instance_key(id: &str) -> Vec<u8> {
        format!("{INSTANCE_PREFIX}{id}").into_bytes()
    }

    fn save_instance(&self, instance: &ReportInstance) -> Result<()> {
        self.db
            .insert(Self::instance_key(&instance.id), minicbor::to_vec(instance)?)?;
        Ok(())
    }

    fn stage_instance(batch: &mut Batch, instance: &ReportInstance) -> Result<()> {
        batch.insert(Self::instance_key(&instance.id), minicbor::to_vec(instance)?);
        Ok(())
    }

    /// Validates and stores a definition, replacing one with the same id.
    pub fn register_definition(&self, definition: ReportDefinition) -> Result<ReportDefinition> {
        definition.validate()?;
        self.db.insert(
            Self::definition_key(&definition.id),
            minicbor::to_vec(&definition)?,
        )?;
        info!(definition_id = %definition.id, regulatory = definition.regulatory, "report definition registered");
        Ok(definition)
    }

    pub fn definition(&self, definition_id: &str) -> Result<ReportDefinition> {
        match self.db.get(Self::definition_key(definition_id))? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(LedgerError::NotFound {
                kind: "report definition",
                id: definition_id.to_string(),
            }),
        }
    }

    pub fn instance(&self, instance_id: &str) -> Result<ReportInstance> {
        match self.db.get(Self::instance_key(instance_id))? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(LedgerError::NotFound {
                kind: "report instance",
                id: instance_id.to_string(),
            }),
        }
    }

    /// Renders and stores a report. Input errors are returned; a failure
    /// while rendering or storing leaves the instance FAILED and still
    /// returns it. A GENERATED instance is committed with its document.
    pub fn generate_report(
        &self,
        definition_id: &str,
        parameters: BTreeMap<String, String>,
        generated_by: &str,
        period_start: TimeStamp,
        period_end: TimeStamp,
    ) -> Result<ReportInstance> {
        let definition = self.definition(definition_id)?;
        definition.check_parameters(&parameters)?;
        if period_end < period_start {
            return Err(LedgerError::InvalidParameter {
                context: definition.id.clone(),
                name: "period_end".to_string(),
                reason: format!("{period_end} is before {period_start}"),
            });
        }

        let mut instance = ReportInstance {
            id: utils::new_uuid_to_bech32(REPORT_HRP)?,
            definition_id: definition.id.clone(),
            document_id: None,
            status: ReportStatus::Generating,
            parameters,
            period_start,
            period_end,
            generated_by: generated_by.to_string(),
            created_at: self.store.clock().timestamp(),
            generated_at: None,
            error: None,
            submitted_by: None,
            submitted_at: None,
            submission_ref: None,
            acknowledged_at: None,
            acknowledgement_ref: None,
        };
        self.save_instance(&instance)?;

        let outcome = self
            .renderer
            .render(&definition, &instance.parameters, period_start, period_end)
            .map_err(|err| err.to_string())
            .and_then(|content| {
                self.store_report(&definition, &instance, content)
                    .map_err(|err| err.to_string())
            });
        match outcome {
            Ok(generated) => instance = generated,
            Err(err) => {
                warn!(instance_id = %instance.id, definition_id, error = %err, "report generation failed");
                instance.fail(err);
                if let Err(save_err) = self.save_instance(&instance) {
                    error!(instance_id = %instance.id, error = %save_err, "failed to record report failure");
                }
            }
        }

        if instance.status == ReportStatus::Generated {
            info!(
                instance_id = %instance.id,
                definition_id,
                document_id = instance.document_id.as_deref().unwrap_or_default(),
                "report generated"
            );
            self.distribute(&definition, &instance);
        }
        Ok(instance)
    }

    /// Stores the rendered report and returns the instance as committed with it.
    fn store_report(
        &self,
        definition: &ReportDefinition,
        instance: &ReportInstance,
        content: Vec<u8>,
    ) -> Result<ReportInstance> {
        let period_end = instance.period_end.to_datetime_utc();
        let access_level = if definition.regulatory {
            AccessLevel::Restricted
        } else {
            AccessLevel::Confidential
        };
        let request = NewDocument::new(
            content,
            format!(
                "{}_{}.{}",
                definition.id,
                period_end.format("%Y%m%d"),
                definition.file_extension
            ),
            definition.mime_type.clone(),
            definition.document_type,
            format!(
                "{} {} to {}",
                definition.name,
                instance.period_start.to_datetime_utc().format("%Y-%m-%d"),
                period_end.format("%Y-%m-%d")
            ),
            instance.generated_by.clone(),
            instance.generated_by.clone(),
        )
        .set_access_level(access_level)
        .set_requires_approval(definition.regulatory)
        .insert_metadata("report_definition_id", definition.id.clone())
        .insert_metadata("report_instance_id", instance.id.clone());

        let mut generated = instance.clone();
        let generated_at = self.store.clock().timestamp();
        self.store.store_document_with(request, |metadata, batch| {
            generated.status = ReportStatus::Generated;
            generated.document_id = Some(metadata.id.clone());
            generated.generated_at = Some(generated_at);
            Self::stage_instance(batch, &generated)
        })?;
        Ok(generated)
    }

    fn distribute(&self, definition: &ReportDefinition, instance: &ReportInstance) {
        let Some(distributor) = &self.distributor else {
            return;
        };
        if definition.recipients.is_empty() {
            return;
        }
        if let Err(err) = distributor.notify(instance, &definition.recipients) {
            warn!(instance_id = %instance.id, error = %err, "report distribution failed");
        }
    }

    fn require_status(
        instance: &ReportInstance,
        expected: ReportStatus,
        action: &'static str,
    ) -> Result<()> {
        if instance.status != expected {
            return Err(LedgerError::InvalidStatus {
                id: instance.id.clone(),
                action,
                reason: format!("status is {}, expected {expected}", instance.status),
            });
        }
        Ok(())
    }

    fn document_of(instance: &ReportInstance, action: &'static str) -> Result<String> {
        instance
            .document_id
            .clone()
            .ok_or_else(|| LedgerError::InvalidStatus {
                id: instance.id.clone(),
                action,
                reason: "report has no stored document".to_string(),
            })
    }

    pub fn submit_to_regulator(
        &self,
        instance_id: &str,
        submitter_id: &str,
        submitter_name: &str,
    ) -> Result<ReportInstance> {
        self.locks.with_document(instance_id, |_| {
            let mut instance = self.instance(instance_id)?;
            let definition = self.definition(&instance.definition_id)?;
            if !definition.regulatory {
                return Err(LedgerError::InvalidStatus {
                    id: instance.id.clone(),
                    action: "submit",
                    reason: format!("'{}' is not a regulatory report", definition.id),
                });
            }
            Self::require_status(&instance, ReportStatus::Generated, "submit")?;
            let document_id = Self::document_of(&instance, "submit")?;
            let regulator_code =
                definition
                    .regulator_code
                    .as_deref()
                    .ok_or_else(|| LedgerError::MissingParameter {
                        context: definition.id.clone(),
                        name: "regulator_code".to_string(),
                    })?;

            self.store.submit_to_regulator_with(
                &document_id,
                regulator_code,
                submitter_id,
                submitter_name,
                |submission, batch| {
                    instance.status = ReportStatus::Submitted;
                    instance.submitted_by = Some(submitter_id.to_string());
                    instance.submitted_at = Some(submission.submitted_at);
                    instance.submission_ref = Some(submission.submission_ref.clone());
                    Self::stage_instance(batch, &instance)
                },
            )?;
            info!(instance_id, regulator_code, "report submitted");
            Ok(instance)
        })
    }

    pub fn record_acknowledgement(
        &self,
        instance_id: &str,
        acknowledgement_ref: &str,
    ) -> Result<ReportInstance> {
        self.locks.with_document(instance_id, |_| {
            let mut instance = self.instance(instance_id)?;
            Self::require_status(&instance, ReportStatus::Submitted, "acknowledge")?;
            let document_id = Self::document_of(&instance, "acknowledge")?;
            let definition = self.definition(&instance.definition_id)?;
            let regulator = definition.regulator_code.unwrap_or_default();

            self.store.record_acknowledgement_with(
                &document_id,
                acknowledgement_ref,
                Actor::new(regulator, REGULATOR_ROLE),
                |block, batch| {
                    instance.status = ReportStatus::Acknowledged;
                    instance.acknowledged_at = Some(block.body.timestamp);
                    instance.acknowledgement_ref = Some(acknowledgement_ref.to_string());
                    Self::stage_instance(batch, &instance)
                },
            )?;
            info!(instance_id, acknowledgement_ref, "report acknowledged");
            Ok(instance)
        })
    }

    /// When `instance` is due with its regulator, if its definition sets a deadline.
    pub fn submission_deadline(&self, instance: &ReportInstance) -> Result<Option<TimeStamp>> {
        let definition = self.definition(&instance.definition_id)?;
        Ok(definition
            .deadline()?
            .and_then(|deadline| deadline.after(instance.period_end)))
    }

    /// Regulatory reports still waiting in GENERATED past their deadline.
    pub fn overdue_submissions(&self) -> Result<Vec<ReportInstance>> {
        let now = self.store.clock().timestamp();
        let mut deadlines: BTreeMap<String, Option<SubmissionDeadline>> = BTreeMap::new();
        let mut overdue = vec![];

        for entry in self.db.scan_prefix(INSTANCE_PREFIX) {
            let (_, value) = entry?;
            let instance: ReportInstance = minicbor::decode(&value)?;
            if instance.status != ReportStatus::Generated {
                continue;
            }

            let deadline = match deadlines.get(&instance.definition_id) {
                Some(deadline) => *deadline,
                None => {
                    let definition = self.definition(&instance.definition_id)?;
                    let deadline = if definition.regulatory {
                        definition.deadline()?
                    } else {
                        None
                    };
                    deadlines.insert(instance.definition_id.clone(), deadline);
                    deadline
                }
            };

            let due = deadline.and_then(|deadline| deadline.after(instance.period_end));
            if due.is_some_and(|due| due < now) {
                overdue.push(instance);
            }
        }
        Ok(overdue)
    }
}
