//! Recipient-set computation for notification fan-out.
//!
//! Every function here is pure: callers load ids from storage, these decide
//! who gets notified and how an existing recipient list has to change.

use std::collections::HashSet;

/// Distinct ids in order of first appearance.
pub fn distinct<I>(ids: I) -> Vec<i64>
where
    I: IntoIterator<Item = i64>,
{
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Recipients of a `message_created` notification: every explicit assignee
/// plus the single assignee. The creator is not excluded, a self-assigned
/// creator is notified like anyone else.
pub fn for_message_created(assignees: &[i64], assignee: Option<i64>) -> Vec<i64> {
    distinct(assignees.iter().copied().chain(assignee))
}

/// Recipients of a `comment_created` notification: the message's assignees
/// and its creator, never the commenter.
pub fn for_comment(assignees: &[i64], creator: Option<i64>, commenter: i64) -> Vec<i64> {
    distinct(
        assignees
            .iter()
            .copied()
            .chain(creator)
            .filter(|id| *id != commenter),
    )
}

/// Recipients of a `message_updated` notification: everyone attached to the
/// message after the update, except the editor.
pub fn for_message_updated(
    assignees: &[i64],
    assignee: Option<i64>,
    creator: Option<i64>,
    editor: i64,
) -> Vec<i64> {
    distinct(
        assignees
            .iter()
            .copied()
            .chain(assignee)
            .chain(creator)
            .filter(|id| *id != editor),
    )
}

/// Recipients of a `message_assigned` notification: users that were not
/// assignees before, except the assigner.
pub fn for_assignment(before: &[i64], requested: &[i64], assigner: i64) -> Vec<i64> {
    let before: HashSet<i64> = before.iter().copied().collect();
    distinct(
        requested
            .iter()
            .copied()
            .filter(|id| !before.contains(id) && *id != assigner),
    )
}

/// Difference between an existing recipient list and the wanted one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientDiff {
    /// Present now, not wanted: delete.
    pub remove: Vec<i64>,
    /// Wanted, not present: insert unread.
    pub add: Vec<i64>,
}

impl RecipientDiff {
    pub fn compute(existing: &[i64], wanted: &[i64]) -> Self {
        let wanted = distinct(wanted.iter().copied());
        let wanted_set: HashSet<i64> = wanted.iter().copied().collect();
        let existing_set: HashSet<i64> = existing.iter().copied().collect();

        Self {
            remove: distinct(existing.iter().copied().filter(|id| !wanted_set.contains(id))),
            add: wanted
                .into_iter()
                .filter(|id| !existing_set.contains(id))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}
