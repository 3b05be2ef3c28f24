//! Identities and Names
//!
//! An identity is the (name, user, instance) triple that names one runnable
//! service instance. Names follow a `<type>:<path>` scheme, e.g. `svc:echo`
//! or `exe:tools/indexer`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User id whose instances are visible to every user.
pub const ROOT_USER_ID: &str = "505C0EE9-3013-43C0-82B0-A84F50CF8D84";

/// User id meaning "run as the caller's user". Never valid as a registry key.
pub const INHERIT_USER_ID: &str = "D26290E4-4485-4EAE-81A2-66D1EEB40A9D";

/// Sentinel for "no instance".
pub const INVALID_INSTANCE_ID: u32 = 0;

/// Name of the broker's own service.
pub const SHELL_NAME: &str = "svc:shell";

/// Unique identity of a service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    name: String,
    user_id: String,
    #[serde(default)]
    instance: String,
}

impl Identity {
    /// Identity whose instance qualifier is the path part of `name`.
    pub fn new(name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let name = name.into();
        let instance = name_path(&name).to_string();
        Self {
            name,
            user_id: user_id.into(),
            instance,
        }
    }

    /// Identity with an explicit instance qualifier. An empty qualifier
    /// falls back to the name path.
    pub fn with_instance(
        name: impl Into<String>,
        user_id: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let mut instance = instance.into();
        if instance.is_empty() {
            instance = name_path(&name).to_string();
        }
        Self {
            name,
            user_id: user_id.into(),
            instance,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Same name and instance under another user.
    pub fn for_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            user_id: user_id.into(),
            instance: self.instance.clone(),
        }
    }

    /// True when the instance qualifier is the one derived from the name.
    pub fn has_default_instance(&self) -> bool {
        self.instance.is_empty() || self.instance == name_path(&self.name)
    }

    /// True when `user_id` still carries the inherit sentinel.
    pub fn inherits_user(&self) -> bool {
        self.user_id == INHERIT_USER_ID
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.name, self.instance, self.user_id)
    }
}

/// Identity the broker uses for itself.
pub fn shell_identity() -> Identity {
    Identity::new(SHELL_NAME, ROOT_USER_ID)
}

/// Validate a `<type>:<path>` name.
pub fn is_valid_name(name: &str) -> bool {
    let mut parts = name.split(':');
    let (Some(kind), Some(path), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !kind.is_empty()
        && kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !path.is_empty()
        && !path.starts_with("//")
}

/// The `<type>` part of a name, or the whole name if it has no separator.
pub fn name_type(name: &str) -> &str {
    name.split_once(':').map(|(kind, _)| kind).unwrap_or(name)
}

/// The `<path>` part of a name, or the whole name if it has no separator.
pub fn name_path(name: &str) -> &str {
    name.split_once(':').map(|(_, path)| path).unwrap_or(name)
}

/// A user id must be a canonical hyphenated GUID.
pub fn is_valid_user_id(user_id: &str) -> bool {
    user_id.len() == 36 && Uuid::parse_str(user_id).is_ok()
}

/// Generate a fresh user id in the canonical upper-case form.
pub fn generate_user_id() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}
