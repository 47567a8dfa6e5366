//! Strongly-typed identifiers for hierarchy nodes, roles and grants.
//!
//! Grant rows reference hierarchy nodes that may live in another database, so
//! the type is the only thing keeping a component id from being bound where an
//! action id belongs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(
    /// `modules.id`
    ModuleId
);
uuid_id!(
    /// `sub_modules.id`
    SubModuleId
);
uuid_id!(
    /// `module_components.id`
    ComponentId
);
uuid_id!(
    /// `module_component_actions.id`
    ActionId
);
uuid_id!(RoleId);
uuid_id!(GrantId);
