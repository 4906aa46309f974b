//! Prompt building for a question-answering assistant over the roster.
//!
//! No model client ships with the crate; callers provide one through the
//! [`Assistant`] trait.

use crate::error::Result;
use crate::import::normalize_phone;
use crate::member::Member;

/// Returned when the assistant answers with nothing.
pub const EMPTY_ANSWER: &str = "I couldn't generate a response.";

/// A text-in, text-out language model.
pub trait Assistant {
    fn ask(&self, prompt: &str) -> Result<String>;
}

/// One line of context per member. The remaining amount is not clamped, so
/// overpayments show up as negative.
pub fn context_line(member: &Member) -> String {
    let paid = member.total_paid();
    let phone = if member.phone.is_empty() {
        "N/A"
    } else {
        &member.phone
    };
    format!(
        "{} (Phone: {}): Committed ${}, Paid ${}, Remaining ${}, Freq: {}",
        member.name,
        phone,
        member.committed_amount,
        paid,
        member.committed_amount - paid,
        member.frequency
    )
}

pub fn build_context(members: &[Member]) -> String {
    members
        .iter()
        .map(context_line)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(question: &str, members: &[Member]) -> String {
    format!(
        "You are an assistant for a community contribution tracker.\n\
         Here is the current data of members and their contributions:\n\
         \n\
         --- START DATA ---\n\
         {}\n\
         --- END DATA ---\n\
         \n\
         User Question: \"{}\"\n\
         \n\
         Instructions:\n\
         1. Answer based ONLY on the provided data.\n\
         2. If asked to draft a message, keep it polite and professional.\n\
         3. If analyzing finances, provide exact numbers.\n\
         4. Be concise and helpful.\n",
        build_context(members),
        question.trim()
    )
}

/// Ask `question` about `members`. Never fails: errors come back as
/// `"Error: ..."` text and an empty reply as [`EMPTY_ANSWER`].
pub fn answer<A: Assistant + ?Sized>(assistant: &A, question: &str, members: &[Member]) -> String {
    match assistant.ask(&build_prompt(question, members)) {
        Ok(reply) if reply.trim().is_empty() => EMPTY_ANSWER.to_string(),
        Ok(reply) => reply,
        Err(e) => {
            log::warn!("Assistant request failed: {e}");
            format!("Error: {e}")
        }
    }
}

/// A payment reminder ready to paste into a message.
pub fn reminder_text(member: &Member, organization: &str) -> String {
    let paid = member.total_paid();
    format!(
        "Hello {},\n\nThis is a friendly reminder regarding your pledge to {}.\n\
         Committed: ${}\nPaid so far: ${}\nRemaining Balance: ${}\n\n\
         Thank you for your continued support!",
        member.name,
        organization,
        member.committed_amount,
        paid,
        member.committed_amount - paid
    )
}

/// A `wa.me` chat link for the member's phone, digits only. `None` when the
/// phone has no digits.
pub fn whatsapp_link(member: &Member) -> Option<String> {
    let digits = normalize_phone(&member.phone);
    (!digits.is_empty()).then(|| format!("https://wa.me/{digits}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PledgeError;
    use crate::member::{Frequency, MemberFields, Payment};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    struct Canned {
        reply: Result<String>,
        prompts: RefCell<Vec<String>>,
    }

    impl Canned {
        fn new(reply: Result<String>) -> Self {
            Canned {
                reply,
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl Assistant for Canned {
        fn ask(&self, prompt: &str) -> Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(PledgeError::Other(e.to_string())),
            }
        }
    }

    fn roster() -> Vec<Member> {
        let paid = Member::new(
            1,
            MemberFields {
                name: "Amina".into(),
                phone: "716-555-0100".into(),
                committed_amount: 1200.0,
                frequency: Frequency::Monthly,
                ..Default::default()
            },
        )
        .with_payment(
            Payment::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1300.5, "").unwrap(),
        );
        let unpaid = Member::new(
            2,
            MemberFields {
                name: "Bilal".into(),
                committed_amount: 500.0,
                frequency: Frequency::OneTime,
                ..Default::default()
            },
        );
        vec![paid, unpaid]
    }

    #[test]
    fn test_build_context() {
        assert_eq!(
            build_context(&roster()),
            "Amina (Phone: 716-555-0100): Committed $1200, Paid $1300.5, \
             Remaining $-100.5, Freq: Monthly\n\
             Bilal (Phone: N/A): Committed $500, Paid $0, Remaining $500, Freq: One-time"
        );
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_prompt_carries_question_and_data() {
        let assistant = Canned::new(Ok("Bilal owes $500.".into()));
        let reply = answer(&assistant, " Who owes the most? ", &roster());
        assert_eq!(reply, "Bilal owes $500.");

        let prompts = assistant.prompts.borrow();
        assert!(prompts[0].contains("User Question: \"Who owes the most?\""));
        assert!(prompts[0].contains("Bilal (Phone: N/A)"));
    }

    #[test]
    fn test_errors_become_text() {
        let assistant = Canned::new(Err(PledgeError::Other("quota exceeded".into())));
        assert_eq!(answer(&assistant, "hi", &[]), "Error: quota exceeded");
    }

    #[test]
    fn test_empty_reply_fallback() {
        let assistant = Canned::new(Ok("  ".into()));
        assert_eq!(answer(&assistant, "hi", &[]), EMPTY_ANSWER);
    }

    #[test]
    fn test_reminder_text() {
        let text = reminder_text(&roster()[1], "Eastside Community Center");
        assert!(text.starts_with("Hello Bilal,"));
        assert!(text.contains("pledge to Eastside Community Center."));
        assert!(text.contains("Remaining Balance: $500"));
    }

    #[test]
    fn test_whatsapp_link() {
        let members = roster();
        assert_eq!(
            whatsapp_link(&members[0]).as_deref(),
            Some("https://wa.me/7165550100")
        );
        assert_eq!(whatsapp_link(&members[1]), None);
    }
}
