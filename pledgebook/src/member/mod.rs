// Member and payment records held by the roster

use crate::error::{PledgeError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned member identity.
pub type MemberId = i64;

/// How often a member intends to pay toward their pledge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Monthly,
    #[default]
    Yearly,
    #[serde(rename = "One-time")]
    OneTime,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "Monthly",
            Frequency::Yearly => "Yearly",
            Frequency::OneTime => "One-time",
        }
    }

    /// Loose parse used for free-form input such as CSV cells.
    /// Anything unrecognised (including empty) is `Yearly`.
    pub fn from_loose(value: &str) -> Self {
        let lower = value.to_lowercase();
        if lower.contains("month") {
            Frequency::Monthly
        } else if lower.contains("one") {
            Frequency::OneTime
        } else {
            Frequency::Yearly
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single payment logged against a member's pledge.
/// Payments are never edited in place; a correction is delete + re-add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

impl Payment {
    /// Create a payment with a freshly generated id.
    pub fn new(date: NaiveDate, amount: f64, note: impl Into<String>) -> Result<Self> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(PledgeError::Validation(format!(
                "Payment amount must be positive, got {amount}"
            )));
        }
        Ok(Payment {
            id: nanoid::nanoid!(),
            date,
            amount,
            note: note.into(),
        })
    }
}

/// The editable fields of a member, without identity or payment history.
/// This is the shape produced by the CSV parser and the add/edit form.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MemberFields {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub committed_amount: f64,
    pub frequency: Frequency,
    pub notes: String,
}

/// A community member with a pledge and the payments made toward it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub committed_amount: f64,
    pub frequency: Frequency,
    pub notes: String,
    pub payments: Vec<Payment>,
}

impl Member {
    /// Build a member with no payments from its editable fields.
    pub fn new(id: MemberId, fields: MemberFields) -> Self {
        Member {
            id,
            name: fields.name,
            phone: fields.phone,
            email: fields.email,
            committed_amount: fields.committed_amount,
            frequency: fields.frequency,
            notes: fields.notes,
            payments: Vec::new(),
        }
    }

    /// Overwrite every editable field with `fields`, keeping `id` and `payments`.
    pub fn merged_with(&self, fields: &MemberFields) -> Self {
        Member {
            id: self.id,
            name: fields.name.clone(),
            phone: fields.phone.clone(),
            email: fields.email.clone(),
            committed_amount: fields.committed_amount,
            frequency: fields.frequency,
            notes: fields.notes.clone(),
            payments: self.payments.clone(),
        }
    }

    pub fn fields(&self) -> MemberFields {
        MemberFields {
            name: self.name.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
            committed_amount: self.committed_amount,
            frequency: self.frequency,
            notes: self.notes.clone(),
        }
    }

    /// Check the invariants a member must hold before it is stored.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PledgeError::Validation(format!(
                "Member {} has an empty name",
                self.id
            )));
        }
        if !self.committed_amount.is_finite() || self.committed_amount < 0.0 {
            return Err(PledgeError::Validation(format!(
                "Member {} has an invalid committed amount: {}",
                self.id, self.committed_amount
            )));
        }
        Ok(())
    }

    pub fn total_paid(&self) -> f64 {
        self.payments.iter().fold(0.0, |acc, p| acc + p.amount)
    }

    /// Outstanding amount, never negative.
    pub fn balance(&self) -> f64 {
        (self.committed_amount - self.total_paid()).max(0.0)
    }

    /// Percentage of the pledge paid, capped at 100.
    /// A zero pledge divides by 1 instead.
    pub fn progress(&self) -> f64 {
        let divisor = if self.committed_amount > 0.0 {
            self.committed_amount
        } else {
            1.0
        };
        (self.total_paid() * 100.0 / divisor).min(100.0)
    }

    /// Return a copy with `payment` added, newest date first.
    pub fn with_payment(&self, payment: Payment) -> Self {
        let mut next = self.clone();
        next.payments.insert(0, payment);
        // stable: equal dates keep the newly added payment on top
        next.payments.sort_by(|a, b| b.date.cmp(&a.date));
        next
    }

    /// Return a copy without the payment `payment_id`.
    pub fn without_payment(&self, payment_id: &str) -> Result<Self> {
        if !self.payments.iter().any(|p| p.id == payment_id) {
            return Err(PledgeError::PaymentNotFound {
                member_id: self.id,
                payment_id: payment_id.to_string(),
            });
        }
        let mut next = self.clone();
        next.payments.retain(|p| p.id != payment_id);
        Ok(next)
    }
}
