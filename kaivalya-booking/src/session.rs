use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Cancellation scope for one opening of the wizard.
///
/// Dropping or closing the session flips the flag every receiver watches. The flag
/// never goes back to open: reopening the wizard makes a new session.
#[derive(Debug)]
pub struct CheckoutSession {
    id: Uuid,
    closed: Arc<watch::Sender<bool>>,
}

/// Cloneable way to close a session from outside the wizard, e.g. a page teardown
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    closed: Arc<watch::Sender<bool>>,
}

impl CheckoutSession {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            closed: Arc::new(tx),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receiver handed to the coordinator
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn close(&self) {
        close(&self.closed);
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            closed: Arc::clone(&self.closed),
        }
    }
}

impl Default for CheckoutSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CheckoutSession {
    fn drop(&mut self) {
        close(&self.closed);
    }
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn close(&self) {
        close(&self.closed);
    }
}

fn close(tx: &watch::Sender<bool>) {
    // send_replace works with no receivers left
    if !tx.send_replace(true) {
        tracing::debug!("Checkout session closed");
    }
}
