// Wire format for member records exchanged with the remote store

use crate::error::{PledgeError, Result};
use crate::member::{Frequency, Member, MemberId, Payment};
use serde::{Deserialize, Deserializer, Serialize};

/// A member row exactly as the remote store holds it.
///
/// Optional text columns are `null` rather than empty, and the pledge lives in
/// the snake-case `committed_amount` column. Use [`to_record`] and
/// [`from_record`] to move between this and [`Member`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: MemberId,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub committed_amount: f64,
    pub frequency: Frequency,
    #[serde(default)]
    pub payments: Option<Vec<Payment>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Numeric columns sometimes arrive as strings (e.g. Postgres `numeric`).
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid amount '{s}'"))),
    }
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Convert an in-memory member to its wire record. Empty strings become `null`.
pub fn to_record(member: &Member) -> MemberRecord {
    MemberRecord {
        id: member.id,
        name: member.name.clone(),
        phone: none_if_empty(&member.phone),
        email: none_if_empty(&member.email),
        committed_amount: member.committed_amount,
        frequency: member.frequency,
        payments: Some(member.payments.clone()),
        notes: none_if_empty(&member.notes),
    }
}

/// Convert a wire record to an in-memory member.
/// `null` text becomes an empty string and `null` payments an empty list.
pub fn from_record(record: MemberRecord) -> Result<Member> {
    if record.name.trim().is_empty() {
        return Err(PledgeError::Mapping(format!(
            "Record {} has no name",
            record.id
        )));
    }
    if !record.committed_amount.is_finite() {
        return Err(PledgeError::Mapping(format!(
            "Record {} has a non-finite committed_amount",
            record.id
        )));
    }

    Ok(Member {
        id: record.id,
        name: record.name,
        phone: record.phone.unwrap_or_default(),
        email: record.email.unwrap_or_default(),
        committed_amount: record.committed_amount,
        frequency: record.frequency,
        notes: record.notes.unwrap_or_default(),
        payments: record.payments.unwrap_or_default(),
    })
}

/// Parse a raw JSON row into a wire record, reporting shape problems as mapping errors.
pub fn record_from_json(value: serde_json::Value) -> Result<MemberRecord> {
    serde_json::from_value(value).map_err(|e| PledgeError::Mapping(e.to_string()))
}

/// Parse a raw JSON row straight into a member.
pub fn member_from_json(value: serde_json::Value) -> Result<Member> {
    from_record(record_from_json(value)?)
}
