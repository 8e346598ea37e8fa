/*
    diff.rs - Delta between two snapshots

    Nodes are matched by id. Members of a node present on both sides are
    compared by name (objects), position (lists, tuples), key (dicts) or
    membership (sets). Sets only ever produce creates and deletes.
*/

use super::delta::{Delta, InstanceChange, MemberChange, MemberKey};
use crate::codec::{FieldValue, NodeId, NodeRecord, Position, Snapshot};
use std::collections::BTreeMap;

pub fn diff(before: &Snapshot, after: &Snapshot) -> Delta {
    let mut delta = Delta::default();

    for (id, old) in &before.nodes {
        match after.nodes.get(id) {
            None => delta.deleted_instance.push(InstanceChange { node: *id, record: old.clone() }),
            Some(new) if new.kind() != old.kind() => {
                delta.deleted_instance.push(InstanceChange { node: *id, record: old.clone() });
                delta.created_instance.push(InstanceChange { node: *id, record: new.clone() });
            }
            Some(new) => diff_members(*id, old, new, &mut delta),
        }
    }
    for (id, new) in &after.nodes {
        if !before.nodes.contains_key(id) {
            delta.created_instance.push(InstanceChange { node: *id, record: new.clone() });
        }
    }

    delta
}

fn diff_members(node: NodeId, old: &NodeRecord, new: &NodeRecord, delta: &mut Delta) {
    match (old, new) {
        (NodeRecord::Object(before), NodeRecord::Object(after)) => {
            diff_keyed(node, before, after, |name| MemberKey::Field(name.clone()), delta)
        }
        (NodeRecord::List(before), NodeRecord::List(after))
        | (NodeRecord::Tuple(before), NodeRecord::Tuple(after)) => {
            diff_keyed(node, before, after, |position: &Position| MemberKey::Index(position.0), delta)
        }
        (NodeRecord::Set(before), NodeRecord::Set(after)) => {
            for element in before.values() {
                if !after.values().any(|other| other == element) {
                    delta.deleted_member.push(entry(node, element, element));
                }
            }
            for element in after.values() {
                if !before.values().any(|other| other == element) {
                    delta.created_member.push(entry(node, element, element));
                }
            }
        }
        (
            NodeRecord::Dict { keys: old_keys, values: old_values },
            NodeRecord::Dict { keys: new_keys, values: new_values },
        ) => {
            let lookup = |keys: &[FieldValue], values: &[FieldValue], key: &FieldValue| {
                keys.iter().position(|k| k == key).and_then(|i| values.get(i).cloned())
            };
            for (key, value) in old_keys.iter().zip(old_values) {
                match lookup(new_keys, new_values, key) {
                    None => delta.deleted_member.push(entry(node, key, value)),
                    Some(current) if current != *value => {
                        delta.updated_member.push(entry(node, key, &current))
                    }
                    Some(_) => {}
                }
            }
            for (key, value) in new_keys.iter().zip(new_values) {
                if !old_keys.contains(key) {
                    delta.created_member.push(entry(node, key, value));
                }
            }
        }
        _ => {}
    }
}

fn diff_keyed<K: Ord>(
    node: NodeId,
    before: &BTreeMap<K, FieldValue>,
    after: &BTreeMap<K, FieldValue>,
    member_key: impl Fn(&K) -> MemberKey,
    delta: &mut Delta,
) {
    for (key, old) in before {
        match after.get(key) {
            None => delta.deleted_member.push(MemberChange::new(node, member_key(key), old.clone())),
            Some(new) if new != old => {
                delta.updated_member.push(MemberChange::new(node, member_key(key), new.clone()))
            }
            Some(_) => {}
        }
    }
    for (key, new) in after {
        if !before.contains_key(key) {
            delta.created_member.push(MemberChange::new(node, member_key(key), new.clone()));
        }
    }
}

fn entry(node: NodeId, key: &FieldValue, value: &FieldValue) -> MemberChange {
    MemberChange::new(node, MemberKey::Entry(key.clone()), value.clone())
}
