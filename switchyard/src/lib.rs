//! Switchyard
//!
//! A service broker: resolves service names, enforces capability policy on
//! every connect, and owns the lifecycle of the instances it launches.

pub mod bindings;
pub mod catalog;
pub mod common;
pub mod config;
pub mod connect_params;
pub mod interfaces;
pub mod loader;
pub mod resolver;
pub mod runner;
pub mod server;
pub mod shell;

pub use bindings::{interface_pair, AnyInterfaceRequest, ChannelClosed, InterfacePtr, InterfaceRequest};
pub use catalog::ManifestCatalog;
pub use config::ShellConfig;
pub use connect_params::ConnectParams;
pub use loader::Loader;
pub use resolver::{ResolvedName, Resolver};
pub use server::ControlServer;
pub use shell::{Shell, ShellHandle, ShellOptions, TestApi, SHELL_IDENTITY};

pub use switchyard_protocol as protocol;
