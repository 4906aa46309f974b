use crate::member::{Member, MemberId};

/// A remote change already mapped into in-memory members.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    Insert(Member),
    Update(Member),
    Delete(MemberId),
}

/// What an optimistic mutation replaced, so it can be put back if the write fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollback {
    pub id: MemberId,
    /// Former position and value; `None` when the mutation created the entry.
    pub previous: Option<(usize, Member)>,
    pub was_selected: bool,
}

/// The client-side copy of the member collection plus the open detail view.
///
/// Members keep fetch/insertion order and ids are unique. The selection is
/// only an id; [`RosterState::selected`] always reads the current record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterState {
    members: Vec<Member>,
    selected: Option<MemberId>,
}

impl RosterState {
    /// Build from a member list. Later duplicates of an id are dropped.
    pub fn new(members: Vec<Member>) -> Self {
        let mut state = RosterState::default();
        state.replace_all(members);
        state
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    fn position(&self, id: MemberId) -> Option<usize> {
        self.members.iter().position(|m| m.id == id)
    }

    pub fn selected_id(&self) -> Option<MemberId> {
        self.selected
    }

    /// The currently open member, looked up fresh from the collection.
    pub fn selected(&self) -> Option<&Member> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Open a member (or close with `None`). Unknown ids are refused.
    pub fn select(&mut self, id: Option<MemberId>) -> bool {
        match id {
            Some(id) if self.get(id).is_none() => false,
            _ => {
                self.selected = id;
                true
            }
        }
    }

    /// Tentative id for an optimistic insert: max existing + 1.
    pub fn next_id(&self) -> MemberId {
        self.members.iter().map(|m| m.id).max().unwrap_or(0) + 1
    }

    /// Swap in a whole new collection. The selection survives only if its id still exists.
    pub fn replace_all(&mut self, members: Vec<Member>) {
        let mut seen = std::collections::HashSet::new();
        self.members = members.into_iter().filter(|m| seen.insert(m.id)).collect();
        if let Some(id) = self.selected {
            if self.get(id).is_none() {
                self.selected = None;
            }
        }
    }

    /// Replace the member with the same id in place, or append it.
    pub fn upsert(&mut self, member: Member) -> Rollback {
        let id = member.id;
        let was_selected = self.selected == Some(id);
        let previous = match self.position(id) {
            Some(idx) => {
                let old = std::mem::replace(&mut self.members[idx], member);
                Some((idx, old))
            }
            None => {
                self.members.push(member);
                None
            }
        };
        Rollback {
            id,
            previous,
            was_selected,
        }
    }

    /// Remove a member, clearing the selection if it was open.
    /// Returns `None` if the id was absent.
    pub fn remove(&mut self, id: MemberId) -> Option<Rollback> {
        let idx = self.position(id)?;
        let was_selected = self.selected == Some(id);
        let old = self.members.remove(idx);
        if was_selected {
            self.selected = None;
        }
        Some(Rollback {
            id,
            previous: Some((idx, old)),
            was_selected,
        })
    }

    /// Undo an optimistic mutation.
    pub fn restore(&mut self, rollback: Rollback) {
        match rollback.previous {
            None => {
                if let Some(idx) = self.position(rollback.id) {
                    self.members.remove(idx);
                    if self.selected == Some(rollback.id) {
                        self.selected = None;
                    }
                }
            }
            Some((idx, old)) => {
                match self.position(rollback.id) {
                    Some(current) => self.members[current] = old,
                    None => {
                        let at = idx.min(self.members.len());
                        self.members.insert(at, old);
                    }
                }
                if rollback.was_selected {
                    self.selected = Some(rollback.id);
                }
            }
        }
    }

    /// Merge one remote change. Idempotent under redelivery; unknown ids
    /// on update/delete are ignored.
    pub fn apply(&mut self, change: RemoteChange) {
        match change {
            RemoteChange::Insert(member) => {
                if self.get(member.id).is_none() {
                    self.members.push(member);
                }
            }
            RemoteChange::Update(member) => {
                if let Some(idx) = self.position(member.id) {
                    self.members[idx] = member;
                }
            }
            RemoteChange::Delete(id) => {
                self.remove(id);
            }
        }
    }

    /// Pure form of [`apply`](Self::apply): the state after `change`.
    pub fn merged(mut self, change: RemoteChange) -> Self {
        self.apply(change);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberFields;
    use pretty_assertions::assert_eq;

    fn member(id: MemberId, name: &str) -> Member {
        Member::new(
            id,
            MemberFields {
                name: name.into(),
                committed_amount: 100.0,
                ..Default::default()
            },
        )
    }

    fn ids(state: &RosterState) -> Vec<MemberId> {
        state.members().iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_new_drops_duplicate_ids() {
        let state = RosterState::new(vec![member(1, "A"), member(2, "B"), member(1, "A2")]);
        assert_eq!(ids(&state), vec![1, 2]);
        assert_eq!(state.get(1).unwrap().name, "A");
    }

    #[test]
    fn test_insert_replay_never_duplicates() {
        let events = vec![
            RemoteChange::Insert(member(1, "A")),
            RemoteChange::Insert(member(2, "B")),
            RemoteChange::Insert(member(1, "A")),
            RemoteChange::Update(member(2, "B2")),
            RemoteChange::Insert(member(2, "B")),
            RemoteChange::Delete(1),
            RemoteChange::Insert(member(1, "A again")),
            RemoteChange::Insert(member(1, "A again")),
        ];

        let state = events
            .iter()
            .cloned()
            .fold(RosterState::default(), RosterState::merged);
        assert_eq!(ids(&state), vec![2, 1]);
        assert_eq!(state.get(2).unwrap().name, "B2");

        // Replaying the whole stream on top changes nothing further
        let replayed = events.into_iter().fold(state.clone(), RosterState::merged);
        let mut unique = ids(&replayed);
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), replayed.len());
    }

    #[test]
    fn test_update_and_delete_unknown_are_noops() {
        let state = RosterState::new(vec![member(1, "A")]);
        let after = state
            .clone()
            .merged(RemoteChange::Update(member(9, "ghost")))
            .merged(RemoteChange::Delete(9));
        assert_eq!(after, state);
    }

    #[test]
    fn test_remote_update_is_seen_through_selection() {
        let mut state = RosterState::new(vec![member(1, "A"), member(2, "B")]);
        assert!(state.select(Some(2)));
        state.apply(RemoteChange::Update(member(2, "B confirmed")));
        assert_eq!(state.selected().unwrap().name, "B confirmed");
    }

    #[test]
    fn test_delete_clears_only_matching_selection() {
        let mut state = RosterState::new(vec![member(1, "A"), member(2, "B")]);
        state.select(Some(1));

        state.apply(RemoteChange::Delete(2));
        assert_eq!(state.selected_id(), Some(1));

        state.apply(RemoteChange::Delete(1));
        assert_eq!(state.selected_id(), None);
        assert!(state.selected().is_none());
    }

    #[test]
    fn test_select_unknown_refused() {
        let mut state = RosterState::new(vec![member(1, "A")]);
        assert!(!state.select(Some(5)));
        assert_eq!(state.selected_id(), None);
        assert!(state.select(None));
    }

    #[test]
    fn test_next_id() {
        assert_eq!(RosterState::default().next_id(), 1);
        let state = RosterState::new(vec![member(4, "A"), member(2, "B")]);
        assert_eq!(state.next_id(), 5);
    }

    #[test]
    fn test_upsert_then_restore_edit() {
        let mut state = RosterState::new(vec![member(1, "A"), member(2, "B")]);
        let original = state.clone();

        let rollback = state.upsert(member(1, "A edited"));
        assert_eq!(state.get(1).unwrap().name, "A edited");
        assert_eq!(ids(&state), vec![1, 2]);

        state.restore(rollback);
        assert_eq!(state, original);
    }

    #[test]
    fn test_upsert_then_restore_create() {
        let mut state = RosterState::new(vec![member(1, "A")]);
        let original = state.clone();

        let rollback = state.upsert(member(2, "B"));
        assert_eq!(ids(&state), vec![1, 2]);

        state.restore(rollback);
        assert_eq!(state, original);
    }

    #[test]
    fn test_remove_then_restore_position_and_selection() {
        let mut state = RosterState::new(vec![member(1, "A"), member(2, "B"), member(3, "C")]);
        state.select(Some(2));
        let original = state.clone();

        let rollback = state.remove(2).unwrap();
        assert_eq!(ids(&state), vec![1, 3]);
        assert_eq!(state.selected_id(), None);

        state.restore(rollback);
        assert_eq!(state, original);
        assert!(state.remove(42).is_none());
    }

    #[test]
    fn test_replace_all_keeps_selection_when_present() {
        let mut state = RosterState::new(vec![member(1, "A"), member(2, "B")]);
        state.select(Some(2));

        state.replace_all(vec![member(2, "B2"), member(3, "C")]);
        assert_eq!(state.selected().unwrap().name, "B2");

        state.replace_all(vec![member(3, "C")]);
        assert_eq!(state.selected_id(), None);
    }
}
