//! Cooperative cancellation for long-running operations.
//!
//! A [`CancelHandle`] is checked between units of work (one record, one
//! page). Cancelling a handle cancels every child derived from it; the
//! manager's shutdown handle is the root of all of them.

use std::sync::Arc;

use futures_util::future::select_all;
use tokio::sync::watch;

#[derive(Debug)]
struct Node {
    signal: watch::Sender<bool>,
    parent: Option<Arc<Node>>,
}

/// Cloneable cancellation flag with parent propagation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    node: Arc<Node>,
}

impl CancelHandle {
    /// A root handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            node: Arc::new(Node {
                signal,
                parent: None,
            }),
        }
    }

    /// A handle cancelled by either itself or `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            node: Arc::new(Node {
                signal,
                parent: Some(Arc::clone(&self.node)),
            }),
        }
    }

    /// Cancels this handle and its children. Idempotent.
    pub fn cancel(&self) {
        self.node.signal.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.chain().any(|node| *node.signal.borrow())
    }

    /// Resolves once this handle or an ancestor is cancelled.
    pub async fn cancelled(&self) {
        let waits = self.chain().map(|node| {
            let mut rx = node.signal.subscribe();
            Box::pin(async move {
                // The sender lives in `node`, which `self` keeps alive.
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });
        select_all(waits).await;
    }

    fn chain(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(Some(self.node.as_ref()), |node| node.parent.as_deref())
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn parent_cancels_child() {
        let root = CancelHandle::new();
        let child = root.child();
        let grandchild = child.child();
        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn child_does_not_cancel_parent() {
        let root = CancelHandle::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_on_ancestor_cancel() {
        let root = CancelHandle::new();
        let child = root.child();
        let waiter = tokio::spawn(async move { child.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
