/*
    merge.rs - Reconcile two deltas computed from the same base

    The prioritized delta is kept whole. Unprioritized edits are queued
    only for members the prioritized side left alone, and a prioritized
    deletion withdraws any queued edit of the same member. Instances are
    unioned by id.

    merge(a, b) and merge(b, a) differ only in which side wins a conflict.
*/

use super::delta::{touches, Delta, MemberChange};

pub fn merge(prioritized: &Delta, unprioritized: &Delta) -> Delta {
    let mut merged = prioritized.clone();

    let unclaimed = |change: &&MemberChange| !prioritized.edits(change.node, &change.key);
    let mut updates: Vec<MemberChange> =
        unprioritized.updated_member.iter().filter(unclaimed).cloned().collect();
    let mut creates: Vec<MemberChange> =
        unprioritized.created_member.iter().filter(unclaimed).cloned().collect();

    for deleted in &prioritized.deleted_member {
        withdraw(&mut updates, deleted);
        withdraw(&mut creates, deleted);
    }

    for deleted in &unprioritized.deleted_member {
        let already_deleted = prioritized.deletes(deleted.node, &deleted.key);
        let edited = prioritized.edits(deleted.node, &deleted.key);
        if already_deleted || edited {
            withdraw(&mut updates, deleted);
            withdraw(&mut creates, deleted);
        } else if !touches(&merged.deleted_member, deleted.node, &deleted.key) {
            merged.deleted_member.push(deleted.clone());
        }
    }

    merged.updated_member.extend(updates);
    merged.created_member.extend(creates);

    for created in &unprioritized.created_instance {
        if !merged.creates_instance(created.node) {
            merged.created_instance.push(created.clone());
        }
    }
    for deleted in &unprioritized.deleted_instance {
        if !merged.creates_instance(deleted.node) && !merged.deletes_instance(deleted.node) {
            merged.deleted_instance.push(deleted.clone());
        }
    }

    merged
}

fn withdraw(queue: &mut Vec<MemberChange>, target: &MemberChange) {
    queue.retain(|change| !change.targets(target.node, &target.key));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FieldValue, NodeId, NodeRecord};
    use crate::graph::Scalar;
    use crate::sync::delta::{InstanceChange, MemberKey};
    use std::collections::BTreeMap;

    fn field(node: u64, name: &str, value: &str) -> MemberChange {
        MemberChange::new(
            NodeId(node),
            MemberKey::Field(name.into()),
            FieldValue::Native(Scalar::from(value)),
        )
    }

    #[test]
    fn test_prioritized_update_wins() {
        let e = Delta { updated_member: vec![field(1, "hoge", "value2")], ..Delta::default() };
        let f = Delta { updated_member: vec![field(1, "hoge", "value3")], ..Delta::default() };

        assert_eq!(merge(&e, &f).updated_member, vec![field(1, "hoge", "value2")]);
        assert_eq!(merge(&f, &e).updated_member, vec![field(1, "hoge", "value3")]);
    }

    #[test]
    fn test_unrelated_edits_are_combined() {
        let e = Delta { updated_member: vec![field(1, "hoge", "value2")], ..Delta::default() };
        let f = Delta { created_member: vec![field(1, "hoge3", "value3")], ..Delta::default() };
        let merged = merge(&e, &f);
        assert_eq!(merged.updated_member.len(), 1);
        assert_eq!(merged.created_member, vec![field(1, "hoge3", "value3")]);
    }

    #[test]
    fn test_prioritized_edit_beats_unprioritized_delete() {
        let f = Delta { updated_member: vec![field(1, "boohuu", "value3")], ..Delta::default() };
        let e = Delta { deleted_member: vec![field(1, "boohuu", "value2")], ..Delta::default() };
        let merged = merge(&f, &e);
        assert_eq!(merged.updated_member, vec![field(1, "boohuu", "value3")]);
        assert!(merged.deleted_member.is_empty());
    }

    #[test]
    fn test_unprioritized_kind_change_keeps_only_the_create() {
        let before = InstanceChange { node: NodeId(5), record: NodeRecord::List(BTreeMap::new()) };
        let after = InstanceChange { node: NodeId(5), record: NodeRecord::Object(BTreeMap::new()) };
        let f = Delta {
            deleted_instance: vec![before],
            created_instance: vec![after.clone()],
            ..Delta::default()
        };

        let merged = merge(&Delta::default(), &f);
        assert_eq!(merged.created_instance, vec![after]);
        assert!(merged.deleted_instance.is_empty());
    }

    #[test]
    fn test_duplicate_deletes_are_collapsed() {
        let e = Delta { deleted_member: vec![field(1, "hoge2", "x")], ..Delta::default() };
        let merged = merge(&e, &e.clone());
        assert_eq!(merged.deleted_member.len(), 1);
    }
}
