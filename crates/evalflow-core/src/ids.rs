//! Identifier newtypes
//!
//! Every entity is keyed by a UUID. Wrapping them keeps a page id from being
//! passed where an evaluation id is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Underlying UUID
            #[inline]
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Proposal identifier
    ProposalId
);
define_id!(
    /// Evaluation step identifier
    EvaluationId
);
define_id!(
    /// Rubric criterion identifier
    CriterionId
);
define_id!(
    /// Platform user identifier
    UserId
);
define_id!(
    /// Space role identifier
    RoleId
);
define_id!(
    /// Space (tenant) identifier
    SpaceId
);
define_id!(
    /// Page identifier
    PageId
);
define_id!(
    /// Page permission row identifier
    PermissionId
);
