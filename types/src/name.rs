//! Name types for accounts, permissions, actions, and contract tables.
//!
//! Names are compact strings with lexicographic ordering; scope lists are
//! kept strictly sorted by this ordering. Distinct newtypes keep the
//! different name spaces from being mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

name_type! {
    /// An account name. Also used as a scope name: every scope is either an
    /// account or one of the built-in scopes in [`crate::params`].
    AccountName
}

name_type! {
    /// A permission name within an account's permission tree (`owner`,
    /// `active`, or a custom permission).
    PermissionName
}

name_type! {
    /// An action name. The empty action name is the contract-wide default
    /// used by permission links.
    ActionName
}

name_type! {
    /// A contract table name.
    TableName
}

impl ActionName {
    /// The contract-wide default link (matches any action of a contract).
    pub fn any() -> Self {
        Self::new("")
    }
}
