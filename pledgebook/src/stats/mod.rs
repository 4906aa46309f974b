// Roster totals, leaderboards and search

use crate::member::{Frequency, Member, MemberId};
use serde::Serialize;

/// Aggregate fundraising figures for the whole roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RosterStats {
    pub member_count: usize,
    pub total_committed: f64,
    pub total_collected: f64,
    pub total_outstanding: f64,
    /// Percent of committed money collected; 0 when nothing is committed.
    pub collection_rate: f64,
}

impl RosterStats {
    pub fn compute(members: &[Member]) -> Self {
        let total_committed: f64 = members.iter().map(|m| m.committed_amount).sum();
        let total_collected: f64 = members.iter().map(Member::total_paid).sum();
        let total_outstanding: f64 = members.iter().map(Member::balance).sum();
        let collection_rate = if total_committed > 0.0 {
            total_collected * 100.0 / total_committed
        } else {
            0.0
        };

        RosterStats {
            member_count: members.len(),
            total_committed,
            total_collected,
            total_outstanding,
            collection_rate,
        }
    }
}

/// One member's pledge figures, flattened for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSummary {
    pub id: MemberId,
    pub name: String,
    pub phone: String,
    pub frequency: Frequency,
    pub committed: f64,
    pub paid: f64,
    pub balance: f64,
    pub progress: f64,
    pub payments: usize,
}

impl From<&Member> for MemberSummary {
    fn from(m: &Member) -> Self {
        MemberSummary {
            id: m.id,
            name: m.name.clone(),
            phone: m.phone.clone(),
            frequency: m.frequency,
            committed: m.committed_amount,
            paid: m.total_paid(),
            balance: m.balance(),
            progress: m.progress(),
            payments: m.payments.len(),
        }
    }
}

/// The `n` largest pledges, biggest first. Ties keep roster order.
pub fn top_pledgers(members: &[Member], n: usize) -> Vec<&Member> {
    let mut sorted: Vec<&Member> = members.iter().collect();
    sorted.sort_by(|a, b| b.committed_amount.total_cmp(&a.committed_amount));
    sorted.truncate(n);
    sorted
}

/// Members whose name contains `term` (ignoring case) or whose phone contains
/// it verbatim. An empty term matches everyone.
pub fn search<'a>(members: &'a [Member], term: &str) -> Vec<&'a Member> {
    let needle = term.trim().to_lowercase();
    members
        .iter()
        .filter(|m| {
            needle.is_empty()
                || m.name.to_lowercase().contains(&needle)
                || m.phone.contains(term.trim())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{MemberFields, Payment};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn member(id: MemberId, name: &str, phone: &str, committed: f64, paid: &[f64]) -> Member {
        let base = Member::new(
            id,
            MemberFields {
                name: name.into(),
                phone: phone.into(),
                committed_amount: committed,
                ..Default::default()
            },
        );
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        paid.iter().fold(base, |m, amount| {
            m.with_payment(Payment::new(day, *amount, "").unwrap())
        })
    }

    #[test]
    fn test_roster_stats() {
        let members = vec![
            member(1, "Amina", "", 1000.0, &[250.0, 250.0]),
            member(2, "Bilal", "", 500.0, &[600.0]),
            member(3, "Chen", "", 500.0, &[]),
        ];
        let stats = RosterStats::compute(&members);

        assert_eq!(stats.member_count, 3);
        assert_eq!(stats.total_committed, 2000.0);
        assert_eq!(stats.total_collected, 1100.0);
        // overpayment does not reduce anyone else's balance
        assert_eq!(stats.total_outstanding, 1000.0);
        assert_eq!(stats.collection_rate, 55.0);
    }

    #[test]
    fn test_collection_rate_with_nothing_committed() {
        let stats = RosterStats::compute(&[member(1, "Amina", "", 0.0, &[5.0])]);
        assert_eq!(stats.collection_rate, 0.0);
        assert_eq!(RosterStats::compute(&[]), RosterStats::default());
    }

    #[test]
    fn test_top_pledgers_is_stable() {
        let members = vec![
            member(1, "A", "", 100.0, &[]),
            member(2, "B", "", 900.0, &[]),
            member(3, "C", "", 100.0, &[]),
            member(4, "D", "", 400.0, &[]),
        ];
        let top: Vec<MemberId> = top_pledgers(&members, 3).iter().map(|m| m.id).collect();
        assert_eq!(top, vec![2, 4, 1]);
        assert_eq!(top_pledgers(&members, 10).len(), 4);
    }

    #[test]
    fn test_search() {
        let members = vec![
            member(1, "Amina Rahman", "(716) 555-0100", 1.0, &[]),
            member(2, "Bilal Haddad", "716-555-0199", 1.0, &[]),
        ];
        let found = |term: &str| -> Vec<MemberId> {
            search(&members, term).iter().map(|m| m.id).collect()
        };

        assert_eq!(found("RAHMAN"), vec![1]);
        assert_eq!(found("0199"), vec![2]);
        assert_eq!(found("716"), vec![1, 2]);
        assert_eq!(found(""), vec![1, 2]);
        assert!(found("zzz").is_empty());
    }

    #[test]
    fn test_member_summary() {
        let summary = MemberSummary::from(&member(7, "Amina", "", 400.0, &[100.0]));
        assert_eq!(summary.paid, 100.0);
        assert_eq!(summary.balance, 300.0);
        assert_eq!(summary.progress, 25.0);
        assert_eq!(summary.payments, 1);
    }
}
