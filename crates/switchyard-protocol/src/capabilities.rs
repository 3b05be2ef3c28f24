//! Capability Model
//!
//! Manifest-declared capability specs and the per-connection requests computed
//! from them. Pure data, no I/O.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::identity::Identity;

/// Matches any target name or any interface.
pub const WILDCARD: &str = "*";

/// Capability classes the broker itself understands (requested of `svc:shell`)
pub mod classes {
    /// Connect to instances running as another user.
    pub const USER_ID: &str = "user_id";
    /// Register a process the caller started itself.
    pub const CLIENT_PROCESS: &str = "client_process";
    /// Connect to a non-default instance qualifier.
    pub const INSTANCE_NAME: &str = "instance_name";
}

/// Interfaces and classes requested of one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    #[serde(default)]
    pub classes: BTreeSet<String>,
    #[serde(default)]
    pub interfaces: BTreeSet<String>,
}

impl CapabilityRequest {
    /// Request granting every interface.
    pub fn any_interface() -> Self {
        let mut request = Self::default();
        request.interfaces.insert(WILDCARD.to_string());
        request
    }

    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.insert(name.into());
        self
    }

    pub fn with_class(mut self, name: impl Into<String>) -> Self {
        self.classes.insert(name.into());
        self
    }

    /// Whether `interface` may be bound under this request.
    pub fn allows_interface(&self, interface: &str) -> bool {
        self.interfaces.contains(WILDCARD) || self.interfaces.contains(interface)
    }
}

/// A service's manifest capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Class name → interfaces this service provides under that class.
    #[serde(default)]
    pub provided: BTreeMap<String, BTreeSet<String>>,
    /// Target name (or `*`) → what this service requests of it.
    #[serde(default)]
    pub required: BTreeMap<String, CapabilityRequest>,
}

impl CapabilitySpec {
    pub fn require(mut self, target: impl Into<String>, request: CapabilityRequest) -> Self {
        self.required.insert(target.into(), request);
        self
    }

    pub fn provide<I, S>(mut self, class: impl Into<String>, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provided
            .entry(class.into())
            .or_default()
            .extend(interfaces.into_iter().map(Into::into));
        self
    }

    /// True when the spec carries a wildcard target entry.
    pub fn allows_any_target(&self) -> bool {
        self.required.contains_key(WILDCARD)
    }

    /// True when `target_name` is granted exactly or via the wildcard.
    pub fn allows_target(&self, target_name: &str) -> bool {
        self.allows_any_target() || self.required.contains_key(target_name)
    }

    /// Whether the spec requests `class` of the service named `target_name`.
    pub fn has_class(&self, target_name: &str, class: &str) -> bool {
        self.required
            .get(target_name)
            .map(|request| request.classes.contains(class))
            .unwrap_or(false)
    }
}

/// The singleton `{"*": {interfaces: {"*"}}}` spec.
pub fn permissive_capabilities() -> CapabilitySpec {
    CapabilitySpec::default().require(WILDCARD, CapabilityRequest::any_interface())
}

/// What `source_spec` requests of `target`: exact name first, then the
/// wildcard, otherwise nothing.
pub fn resolve_capability_request(source_spec: &CapabilitySpec, target: &Identity) -> CapabilityRequest {
    source_spec
        .required
        .get(target.name())
        .or_else(|| source_spec.required.get(WILDCARD))
        .cloned()
        .unwrap_or_default()
}

/// Union into `request.interfaces` every interface the target provides under
/// the classes named in `request.classes`.
pub fn expand_classes(mut request: CapabilityRequest, target_spec: &CapabilitySpec) -> CapabilityRequest {
    for class_name in &request.classes {
        if let Some(interfaces) = target_spec.provided.get(class_name) {
            request.interfaces.extend(interfaces.iter().cloned());
        }
    }
    request
}

/// Effective request for a connection from a source with `source_spec` to
/// `target` described by `target_spec`.
pub fn generate_capability_request_for_connection(
    source_spec: &CapabilitySpec,
    target: &Identity,
    target_spec: &CapabilitySpec,
) -> CapabilityRequest {
    expand_classes(resolve_capability_request(source_spec, target), target_spec)
}
