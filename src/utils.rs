//! Identifier helpers

use bech32::Bech32m;
use chrono::{DateTime, Utc};
use uuid7::uuid7;

use crate::error::{LedgerError, Result};

pub const DOCUMENT_HRP: &str = "doc_";
pub const BLOCK_HRP: &str = "blk_";
pub const REPORT_HRP: &str = "rpt_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| LedgerError::Identifier(e.to_string()))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| LedgerError::Identifier(e.to_string()))
}

/// Reference handed to a regulator, e.g. `FCA-20260110-0193A4F2`.
pub fn submission_reference(regulator_code: &str, at: DateTime<Utc>) -> String {
    let uuid = uuid7();
    // the leading uuid7 bytes are the timestamp, the tail is random
    let entropy = hex::encode_upper(&uuid.as_bytes()[12..]);
    format!(
        "{}-{}-{}",
        regulator_code.trim().to_uppercase(),
        at.format("%Y%m%d"),
        entropy
    )
}
