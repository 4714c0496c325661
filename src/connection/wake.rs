use tokio::sync::Notify;

/// One park/wake handoff point.
///
/// A wake that arrives before the matching wait is not lost (`Notify`
/// stores the permit), and wakes may coalesce, so waiters always re-check
/// the guarded state in a loop around `wait`.
pub(crate) struct WakeToken {
    notify: Notify,
}

impl WakeToken {
    pub(crate) fn new() -> Self {
        Self { notify: Notify::new() }
    }

    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }

    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }
}
