/*
    Sync subsystem - Reconcile two snapshots of the same graph

    Both sides diff their current snapshot against the last agreed base,
    the two deltas are merged under the conflict policy, and the result is
    replayed onto the live graph.

    Flow on the host:
    1. diff(base, host) and diff(base, client)
    2. merge the deltas, the prioritized side first
    3. apply the merged delta to the host graph
    4. re-encode and send the client what it is missing
*/

pub mod apply;
pub mod delta;
pub mod diff;
pub mod merge;

pub use apply::{apply, ApplyContext};
pub use delta::{Delta, InstanceChange, MemberChange, MemberKey};
pub use diff::diff;
pub use merge::merge;

use serde::{Deserialize, Serialize};

/// Which side's delta wins a conflict; the wire value is the discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    HostPrioritized = 1,
    #[default]
    ClientPrioritized = 2,
}

impl ConflictPolicy {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::HostPrioritized),
            2 => Some(ConflictPolicy::ClientPrioritized),
            _ => None,
        }
    }

    /// Merge the two sides' deltas under this policy
    pub fn merge(&self, host: &Delta, client: &Delta) -> Delta {
        match self {
            ConflictPolicy::HostPrioritized => merge(host, client),
            ConflictPolicy::ClientPrioritized => merge(client, host),
        }
    }
}
