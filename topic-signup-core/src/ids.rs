//! Typed identifiers.
//!
//! Storage hands out plain integer keys; wrapping them keeps a topic id from
//! ever being passed where a team id is expected.

use core::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i32);

        impl $name {
            #[must_use]
            pub const fn get(self) -> i32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, " {}"), self.0)
            }
        }

        impl From<i32> for $name {
            fn from(value: i32) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(AssignmentId, "assignment");
define_id!(TopicId, "topic");
define_id!(TeamId, "team");
define_id!(UserId, "user");
