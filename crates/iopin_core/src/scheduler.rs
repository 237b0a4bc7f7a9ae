//!Background execution for waveforms.

use std::future::Future;

use tokio::{runtime::Handle, task::JoinHandle};

use crate::error::DeviceError;

///Submits units of work to the tokio runtime.
///
///Tasks are daemon-like: the runtime drops whatever is still outstanding when it shuts down, so a
///forever-running waveform never holds the process open. Cancelling a task is the task's own job;
///see `TaskHandle::interrupt` for the one exception.
#[derive(Clone, Debug)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    ///Uses the runtime the caller is running on.
    pub fn current() -> Result<Self, DeviceError> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|_| DeviceError::NoRuntime)
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    ///Start `work` immediately without blocking the caller.
    pub fn submit<F>(&self, work: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            join_handle: self.handle.spawn(work),
        }
    }
}

///Opaque reference to a submitted unit of work.
#[derive(Debug)]
pub struct TaskHandle {
    join_handle: JoinHandle<()>,
}

impl TaskHandle {
    ///Wake the task out of whatever it is waiting on and drop it at that point.
    ///
    ///Only shortens shutdown latency. Work that must stop cleanly watches its cancellation token.
    pub fn interrupt(&self) {
        self.join_handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    ///Wait for the task to exit, however it exits.
    pub async fn join(self) {
        let _ = self.join_handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[test]
    fn current_requires_a_runtime() {
        assert!(matches!(Scheduler::current(), Err(DeviceError::NoRuntime)));
    }

    #[tokio::test]
    async fn submit_runs_without_blocking_the_caller() {
        let scheduler = Scheduler::current().unwrap();
        let (tx, rx) = oneshot::channel();
        let task = scheduler.submit(async move {
            tx.send(42).unwrap();
        });
        assert_eq!(rx.await.unwrap(), 42);
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_stops_a_sleeping_task() {
        let scheduler = Scheduler::current().unwrap();
        let task = scheduler.submit(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!task.is_finished());
        task.interrupt();
        task.join().await;
    }
}
