//! The execution context: one single-threaded tokio runtime driven on its own OS thread.
//!
//! Work may be spawned through [`IoContext::handle`] from any thread, before or after the
//! thread is launched; it only makes progress while the thread runs. Stopping the context
//! drops every outstanding task, which closes the sockets those tasks own.

use std::future::Future;
use std::io;
use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::broadcast;

pub struct IoContext {
    handle: Handle,
    /// Present until [`IoContext::run`] moves it onto the I/O thread.
    runtime: Option<Runtime>,
    shutdown: broadcast::Sender<()>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IoContext {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            shutdown,
            shutdown_rx: Some(shutdown_rx),
            thread: None,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Queue a task on the context.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(task);
    }

    /// Launch the I/O thread. A context runs at most once; later calls are no-ops.
    pub fn run(&mut self, name: &str) -> io::Result<()> {
        let (Some(runtime), Some(mut shutdown_rx)) = (self.runtime.take(), self.shutdown_rx.take())
        else {
            return Ok(());
        };
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.recv().await;
                });
                // Dropping the runtime here cancels whatever is still in flight.
                drop(runtime);
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Signal the I/O thread and wait for it to finish.
    pub fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("I/O thread panicked");
            }
        }
        // Never launched: tasks queued on it are dropped with it.
        self.runtime = None;
        self.shutdown_rx = None;
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn work_queued_before_run_executes_on_io_thread() {
        let mut ctx = IoContext::new().unwrap();
        let (tx, rx) = mpsc::channel();
        ctx.spawn(async move {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        });
        ctx.run("ctx-test").unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("ctx-test"));
        ctx.stop();
        assert!(!ctx.is_running());
    }

    #[test]
    fn stop_drops_pending_tasks() {
        let mut ctx = IoContext::new().unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        ctx.spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = tx.send(());
        });
        ctx.run("ctx-test").unwrap();
        ctx.stop();
        // The sender was dropped with the task.
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }

    #[test]
    fn stop_without_run_is_harmless() {
        let mut ctx = IoContext::new().unwrap();
        ctx.stop();
        ctx.stop();
        assert!(!ctx.is_running());
    }
}
