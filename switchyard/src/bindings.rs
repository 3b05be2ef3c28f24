//! Channel Bindings
//!
//! Typed, move-only channel endpoints. An `InterfacePtr<T>` sends messages of
//! type `T`; its paired `InterfaceRequest<T>` receives them. Dropping either end
//! is observed by the other as a connection error. Messages sent before the
//! receiving end is serviced stay queued.

use std::any::Any;
use std::fmt;

use tokio::sync::{mpsc, oneshot};

/// Sending on a channel whose far end is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("channel closed")]
pub struct ChannelClosed;

/// Create a connected pointer/request pair.
pub fn interface_pair<T>() -> (InterfacePtr<T>, InterfaceRequest<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InterfacePtr { tx }, InterfaceRequest { rx })
}

/// Sending end of an interface channel
pub struct InterfacePtr<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> InterfacePtr<T> {
    pub fn send(&self, message: T) -> Result<(), ChannelClosed> {
        self.tx.send(message).map_err(|_| ChannelClosed)
    }

    /// True once the request end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the request end is dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl<T: Send + 'static> InterfacePtr<T> {
    /// Run `on_close` once the request end goes away. Dropping the returned
    /// guard cancels the watch without running it.
    pub(crate) fn watch_closed<F>(&self, on_close: F) -> WatchGuard
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.clone();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => on_close(),
                _ = cancel_rx => {}
            }
        });
        WatchGuard { _cancel: cancel_tx }
    }
}

impl<T> fmt::Debug for InterfacePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfacePtr")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiving end of an interface channel
pub struct InterfaceRequest<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> InterfaceRequest<T> {
    /// Next message, or `None` once every pointer is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting messages; queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close()
    }
}

impl<T> fmt::Debug for InterfaceRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceRequest").finish_non_exhaustive()
    }
}

/// Cancels a `watch_closed` task when dropped
#[derive(Debug)]
pub struct WatchGuard {
    _cancel: oneshot::Sender<()>,
}

/// Type-erased `InterfaceRequest<T>`, passed through interface providers and
/// recovered by the service that knows the interface type
pub struct AnyInterfaceRequest {
    inner: Box<dyn Any + Send>,
}

impl AnyInterfaceRequest {
    pub fn new<T: Send + 'static>(request: InterfaceRequest<T>) -> Self {
        Self {
            inner: Box::new(request),
        }
    }

    pub fn downcast<T: Send + 'static>(self) -> Result<InterfaceRequest<T>, Self> {
        self.inner
            .downcast::<InterfaceRequest<T>>()
            .map(|request| *request)
            .map_err(|inner| Self { inner })
    }
}

impl fmt::Debug for AnyInterfaceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyInterfaceRequest").finish_non_exhaustive()
    }
}
