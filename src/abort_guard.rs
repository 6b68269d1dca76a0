use tokio::task::JoinHandle;

/// Owns a background task and aborts it when dropped.
///
/// Timers that feed observable state (the progress ticker, the narration
/// worker) are held through this guard so that every exit path of their
/// owner, including an early return or a dropped future, stops them.
#[derive(Debug)]
pub struct AbortGuard {
    handle: Option<JoinHandle<()>>,
}

impl AbortGuard {
    /// Spawn `fut` on the current runtime and guard it.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self::new(tokio::spawn(fut))
    }

    /// Guard an already spawned task.
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Whether the guarded task has run to completion (or was aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Abort the task now rather than at drop time.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn aborts_task_on_drop() {
        // Given a task waiting on a channel
        let (tx, rx) = oneshot::channel::<()>();
        {
            let _guard = AbortGuard::spawn(async move {
                let _ = rx.await;
            });
        }
        tokio::task::yield_now().await;
        // Then sending fails because the receiver was dropped with the task
        assert!(tx.send(()).is_err());
    }

    #[tokio::test]
    async fn explicit_abort_marks_finished() {
        let mut guard = AbortGuard::spawn(std::future::pending());
        assert!(!guard.is_finished());
        guard.abort();
        assert!(guard.is_finished());
    }
}
