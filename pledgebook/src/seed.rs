// Built-in default roster used to seed an empty store and as the offline fallback

use crate::error::Result;
use crate::member::{Frequency, Member, MemberId, Payment};
use crate::wire::{self, MemberRecord};
use chrono::NaiveDate;
use std::path::Path;

fn seed_member(
    id: MemberId,
    name: &str,
    phone: &str,
    committed_amount: f64,
    frequency: Frequency,
) -> Member {
    Member {
        id,
        name: name.to_string(),
        phone: phone.to_string(),
        email: String::new(),
        committed_amount,
        frequency,
        notes: String::new(),
        payments: Vec::new(),
    }
}

fn seed_payment(id: &str, (y, m, d): (i32, u32, u32), amount: f64, note: &str) -> Payment {
    Payment {
        id: id.to_string(),
        date: NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default(),
        amount,
        note: note.to_string(),
    }
}

/// The roster shipped with the crate.
pub fn default_roster() -> Vec<Member> {
    use Frequency::*;

    let mut roster = vec![
        seed_member(1, "Ibrahim Siddiqui", "716-555-0101", 2400.0, Yearly),
        seed_member(2, "Maryam Chowdhury", "716-555-0102", 1200.0, Yearly),
        seed_member(3, "Tariq Hossain", "332-555-0103", 1800.0, Yearly),
        seed_member(4, "Nadia Rahman", "", 600.0, OneTime),
        seed_member(5, "Khalid Bhuiyan", "917-555-0105", 4000.0, Yearly),
        seed_member(6, "Rashid Ali", "", 1000.0, OneTime),
        seed_member(7, "Sana Mustafa", "(347) 555-0107", 600.0, Monthly),
        seed_member(8, "Youssef Haddad", "646-555-0108", 0.0, Monthly),
    ];

    roster[2].payments = vec![
        seed_payment("seed-3-2", (2023, 12, 1), 100.0, "December"),
        seed_payment("seed-3-1", (2023, 11, 13), 150.0, "Collected after Jumu'ah"),
    ];
    roster[4].payments = vec![seed_payment("seed-5-1", (2023, 11, 14), 500.0, "")];
    roster[7].notes = "Prefers not to disclose monthly amount".to_string();

    roster
}

/// Load a roster from a YAML file of wire records, or fall back to the built-in one.
pub fn load_roster(path: Option<&Path>) -> Result<Vec<Member>> {
    let Some(path) = path else {
        return Ok(default_roster());
    };

    let content = std::fs::read_to_string(path)?;
    let records: Vec<MemberRecord> = serde_yaml::from_str(&content)?;
    records.into_iter().map(wire::from_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_default_roster_is_valid() {
        let roster = default_roster();
        let ids: HashSet<_> = roster.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), roster.len());
        for member in &roster {
            member.validate().unwrap();
        }
        assert!(roster.iter().any(|m| !m.payments.is_empty()));
    }

    #[test]
    fn test_load_roster_from_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("seed.yaml");
        std::fs::write(
            &path,
            "- id: 10\n  name: Layla\n  committed_amount: 300\n  frequency: One-time\n",
        )
        .unwrap();

        let roster = load_roster(Some(&path)).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].frequency, Frequency::OneTime);
        assert!(roster[0].payments.is_empty());
    }

    #[test]
    fn test_load_roster_default() {
        assert_eq!(load_roster(None).unwrap(), default_roster());
    }
}
