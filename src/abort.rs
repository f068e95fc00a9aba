use tokio::sync::watch;

/// Operator-side half of the stop signal.
pub struct AbortHandle(watch::Sender<bool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.send_replace(true);
    }
}

/// Controller-side half of the stop signal, checked between ticks and raced
/// against every guard wait.
#[derive(Clone)]
pub struct AbortSignal(watch::Receiver<bool>);

pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), AbortSignal(rx))
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        abort_channel().1
    }

    pub fn is_aborted(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once abort is requested. Pends forever if the handle was
    /// dropped without aborting.
    pub async fn triggered(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
