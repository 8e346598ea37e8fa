use crate::codec::{FieldValue, NodeId, NodeRecord};
use serde::{Deserialize, Serialize};

/// Address of a member inside its node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemberKey {
    /// List or tuple slot
    Index(usize),
    /// Object field
    Field(String),
    /// Dict key or set element
    Entry(FieldValue),
}

impl MemberKey {
    /// Slot index, also accepting the string form some peers send
    pub fn index(&self) -> Option<usize> {
        match self {
            MemberKey::Index(index) => Some(*index),
            MemberKey::Field(name) => name.parse().ok(),
            MemberKey::Entry(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberChange {
    #[serde(rename = "instance_id")]
    pub node: NodeId,
    #[serde(rename = "member_name")]
    pub key: MemberKey,
    pub value: FieldValue,
}

impl MemberChange {
    pub fn new(node: NodeId, key: MemberKey, value: FieldValue) -> Self {
        MemberChange { node, key, value }
    }

    pub fn targets(&self, node: NodeId, key: &MemberKey) -> bool {
        self.node == node && self.key == *key
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceChange {
    #[serde(rename = "instance_id")]
    pub node: NodeId,
    #[serde(rename = "value")]
    pub record: NodeRecord,
}

/// Operations turning one snapshot into another
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub updated_member: Vec<MemberChange>,
    pub created_member: Vec<MemberChange>,
    pub deleted_member: Vec<MemberChange>,
    pub created_instance: Vec<InstanceChange>,
    pub deleted_instance: Vec<InstanceChange>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of operations
    pub fn len(&self) -> usize {
        self.updated_member.len()
            + self.created_member.len()
            + self.deleted_member.len()
            + self.created_instance.len()
            + self.deleted_instance.len()
    }

    /// Updates or creates of the given member
    pub fn edits(&self, node: NodeId, key: &MemberKey) -> bool {
        touches(&self.updated_member, node, key) || touches(&self.created_member, node, key)
    }

    pub fn deletes(&self, node: NodeId, key: &MemberKey) -> bool {
        touches(&self.deleted_member, node, key)
    }

    pub fn creates_instance(&self, node: NodeId) -> bool {
        self.created_instance.iter().any(|change| change.node == node)
    }

    pub fn deletes_instance(&self, node: NodeId) -> bool {
        self.deleted_instance.iter().any(|change| change.node == node)
    }
}

pub(crate) fn touches(changes: &[MemberChange], node: NodeId, key: &MemberKey) -> bool {
    changes.iter().any(|change| change.targets(node, key))
}
