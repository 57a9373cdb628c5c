use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Outbound handler a component emits its events into.
///
/// Emitting never blocks and never fails; a sink whose receiver is gone
/// silently discards.
pub struct Sink<E> {
    emit: Arc<dyn Fn(E) + Send + Sync>,
}

impl<E> Clone for Sink<E> {
    fn clone(&self) -> Self {
        Self { emit: self.emit.clone() }
    }
}

impl<E: Send + 'static> Sink<E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(E) + Send + Sync + 'static, {
        Self { emit: Arc::new(f) }
    }

    /// Wraps every event with `wrap` before sending it on `tx`.
    pub fn forward<T, W>(tx: UnboundedSender<T>, wrap: W) -> Self
    where
        T: Send + 'static,
        W: Fn(E) -> T + Send + Sync + 'static, {
        Self::new(move |event| {
            let _ = tx.send(wrap(event));
        })
    }

    pub fn channel() -> (Self, UnboundedReceiver<E>) {
        let (tx, rx) = unbounded_channel();
        (Self::forward(tx, |e| e), rx)
    }

    pub fn emit(&self, event: E) {
        (self.emit)(event)
    }
}
