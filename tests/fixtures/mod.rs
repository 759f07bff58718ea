//! Test fixtures shared by the integration suites

use serde_json::{json, Value};
use utility_check::models::job::ExtractedFields;

pub const ELECTRICITY_ACCOUNT: &str = "0390315";
pub const GAS_ACCOUNT: &str = "830938";

/// Submission with one electricity and one gas account.
pub fn two_account_submission() -> Value {
    json!({
        "owner_id": "u1",
        "job_status": "new",
        "notify": false,
        "first_check": "1",
        "data": [
            {"account": ELECTRICITY_ACCOUNT, "account_type": "code", "utility": "electricity"},
            {"account": GAS_ACCOUNT, "account_type": "code", "city": "Yerevan", "utility": "gas"}
        ]
    })
}

/// Same account listed twice.
pub fn duplicate_submission() -> Value {
    let mut body = two_account_submission();
    body["data"][1]["account"] = ELECTRICITY_ACCOUNT.into();
    body
}

pub fn electricity_fields() -> ExtractedFields {
    ExtractedFields {
        address: Some("Yerevan, Tumanyan 12, apt. 4".to_string()),
        consumption: Some("142".to_string()),
        debit_full: Some("6 390.00".to_string()),
        ..Default::default()
    }
}

/// Portal URL the scripted extractor is registered for.
pub const PORTAL_URL: &str = "https://portal.itfllc.am/check";
