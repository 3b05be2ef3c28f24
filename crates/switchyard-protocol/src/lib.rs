//! Public data model shared by the switchyard broker, its services and tools.

pub mod capabilities;
pub mod client;
pub mod identity;
pub mod jsonrpc;
pub mod types;

pub use capabilities::{
    expand_classes, generate_capability_request_for_connection, permissive_capabilities,
    resolve_capability_request, CapabilityRequest, CapabilitySpec, WILDCARD,
};
pub use client::{default_socket_path, SocketClient};
pub use identity::{
    generate_user_id, is_valid_name, is_valid_user_id, name_path, name_type, shell_identity,
    Identity, INHERIT_USER_ID, INVALID_INSTANCE_ID, ROOT_USER_ID, SHELL_NAME,
};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use types::{ConnectResponse, ConnectResult, InstanceInfo};
