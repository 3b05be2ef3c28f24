//! In-process service construction, chosen by name ahead of process launch.

use crate::interfaces::ShellClientRequest;

/// Constructs a named service in the broker's process
pub trait Loader: Send {
    /// Take ownership of `request` and serve it, or drop it to refuse.
    fn load(&mut self, name: &str, request: ShellClientRequest);
}

impl<F> Loader for F
where
    F: FnMut(&str, ShellClientRequest) + Send,
{
    fn load(&mut self, name: &str, request: ShellClientRequest) {
        self(name, request)
    }
}
