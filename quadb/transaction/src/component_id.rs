use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for label-derived component ids.
const COMPONENT_NAMESPACE: Uuid = Uuid::from_u128(0x6a2f_31c4_8d0e_4b7a_9e55_0c1d_f3a8_7b21);

/// Identity of a transactional component.
///
/// Two ids are equal when their tokens are equal. The label is carried for display only.
/// Journal entries are routed back to components by token, so a component must be
/// recreated with the same token after a restart; [`ComponentId::from_label`] derives
/// the token from the label for exactly that purpose.
#[derive(Clone, Serialize, Deserialize)]
pub struct ComponentId {
    token: [u8; 16],
    label: String,
}

impl ComponentId {
    /// A fresh random id.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            token: Uuid::new_v4().into_bytes(),
            label: label.into(),
        }
    }

    /// An id whose token is derived from `label`, stable across restarts.
    pub fn from_label(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            token: Uuid::new_v5(&COMPONENT_NAMESPACE, label.as_bytes()).into_bytes(),
            label,
        }
    }

    pub fn from_bytes(label: impl Into<String>, token: [u8; 16]) -> Self {
        Self {
            token,
            label: label.into(),
        }
    }

    pub fn token(&self) -> &[u8; 16] {
        &self.token
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for ComponentId {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for ComponentId {}

impl Hash for ComponentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.label, Uuid::from_bytes(self.token).simple())
    }
}
