//! Synchronous bind on top of the asynchronous engine.
//!
//! [`OperationPoller`] waits for a binding stack to settle. [`CleanupGuard`]
//! deletes the binding stack unless the bind completed, including when the
//! waiting future is dropped half way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sqs_broker_core::{LastOperation, LastOperationState, Operation};

use crate::error::BrokerError;
use crate::stack::StackClient;
use crate::status::{last_operation, DESCRIPTION_READY};

/// Budget for the detached delete of a failed binding stack.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OperationPoller {
    client: Arc<dyn StackClient>,
    interval: Duration,
    timeout: Duration,
    deadline: Instant,
}

impl OperationPoller {
    /// The deadline starts counting now and covers every call made through
    /// this poller.
    pub fn new(client: Arc<dyn StackClient>, interval: Duration, timeout: Duration) -> Self {
        Self {
            client,
            interval,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    /// Poll `stack_name` until it reaches a terminal state.
    ///
    /// Returns the succeeded state, [`BrokerError::BindingFailed`] for a
    /// failed stack and [`BrokerError::BindingDeadlineExceeded`] when the
    /// deadline passes or `cancel` fires first, including while a describe
    /// call is outstanding. Describe errors end the wait immediately.
    pub async fn wait(
        &self,
        stack_name: &str,
        cancel: &CancellationToken,
    ) -> Result<LastOperation, BrokerError> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // skip immediate tick

        loop {
            self.within(stack_name, cancel, async {
                interval.tick().await;
                Ok::<(), BrokerError>(())
            })
            .await?;

            let poll = last_operation(
                self.client.as_ref(),
                stack_name,
                Operation::Bind,
                DESCRIPTION_READY,
            );
            let state = self.within(stack_name, cancel, poll).await?;

            match state.state {
                LastOperationState::Succeeded => return Ok(state),
                LastOperationState::Failed => {
                    warn!(stack_name = %stack_name, description = %state.description, "binding stack failed");
                    return Err(BrokerError::BindingFailed(state.description));
                }
                LastOperationState::InProgress => {
                    debug!(stack_name = %stack_name, "binding stack still pending");
                }
            }
        }
    }

    /// Run `work` unless `cancel` fires or the deadline passes first; both
    /// end in [`BrokerError::BindingDeadlineExceeded`] and drop `work`.
    pub async fn within<T, F>(
        &self,
        stack_name: &str,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, BrokerError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(stack_name = %stack_name, "bind wait cancelled");
                Err(BrokerError::BindingDeadlineExceeded(stack_name.to_string()))
            }
            _ = tokio::time::sleep_until(self.deadline) => {
                warn!(
                    stack_name = %stack_name,
                    timeout_secs = self.timeout.as_secs(),
                    "bind wait deadline exceeded"
                );
                Err(BrokerError::BindingDeadlineExceeded(stack_name.to_string()))
            }
            result = work => result,
        }
    }
}

/// Deletes a binding stack on drop unless [`CleanupGuard::disarm`] was
/// called.
///
/// The delete runs as a detached task with its own [`CLEANUP_TIMEOUT`], so it
/// outlives a cancelled caller. Its errors are logged and dropped: nobody is
/// left to receive them. The task is registered on `tasks` so a process can
/// wait for it before exiting.
pub struct CleanupGuard {
    client: Arc<dyn StackClient>,
    stack_name: String,
    tasks: TaskTracker,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(
        client: Arc<dyn StackClient>,
        stack_name: impl Into<String>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            client,
            stack_name: stack_name.into(),
            tasks,
            armed: true,
        }
    }

    /// The bind succeeded; keep the stack.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let stack_name = std::mem::take(&mut self.stack_name);
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(stack_name = %stack_name, "no runtime available, binding stack left for manual cleanup");
                return;
            }
        };

        let client = Arc::clone(&self.client);
        let cleanup = async move {
            info!(stack_name = %stack_name, "deleting failed binding stack");
            match tokio::time::timeout(CLEANUP_TIMEOUT, client.delete_stack(&stack_name)).await {
                Ok(Ok(())) => debug!(stack_name = %stack_name, "binding stack delete requested"),
                Ok(Err(e)) => {
                    warn!(stack_name = %stack_name, error = %e, "failed to delete binding stack")
                }
                Err(_) => warn!(
                    stack_name = %stack_name,
                    timeout_secs = CLEANUP_TIMEOUT.as_secs(),
                    "timed out deleting binding stack"
                ),
            }
        };
        self.tasks.spawn_on(cleanup, &handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{
        CreateStackInput, StackDescription, StackError, UpdateStackInput,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Reports a fixed sequence of statuses, repeating the last one.
    struct ScriptedClient {
        statuses: Mutex<Vec<&'static str>>,
        describes: Mutex<usize>,
        deletes: Mutex<Vec<String>>,
        describe_delay: Duration,
    }

    impl ScriptedClient {
        fn new(statuses: Vec<&'static str>) -> Arc<Self> {
            Self::slow(statuses, Duration::ZERO)
        }

        /// Every describe call takes `delay` before answering.
        fn slow(statuses: Vec<&'static str>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses),
                describes: Mutex::new(0),
                deletes: Mutex::new(Vec::new()),
                describe_delay: delay,
            })
        }

        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StackClient for ScriptedClient {
        async fn create_stack(&self, _input: CreateStackInput) -> Result<(), StackError> {
            Ok(())
        }

        async fn update_stack(&self, _input: UpdateStackInput) -> Result<(), StackError> {
            Ok(())
        }

        async fn delete_stack(&self, stack_name: &str) -> Result<(), StackError> {
            self.deletes.lock().unwrap().push(stack_name.to_string());
            Ok(())
        }

        async fn get_template(&self, _stack_name: &str) -> Result<Option<String>, StackError> {
            Ok(None)
        }

        async fn describe_stacks(
            &self,
            stack_name: &str,
        ) -> Result<Vec<StackDescription>, StackError> {
            *self.describes.lock().unwrap() += 1;
            if !self.describe_delay.is_zero() {
                tokio::time::sleep(self.describe_delay).await;
            }
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            };
            Ok(vec![StackDescription {
                name: stack_name.to_string(),
                status: Some(status.to_string()),
                outputs: Vec::new(),
            }])
        }

        async fn get_secret_value(&self, _secret_id: &str) -> Result<Option<String>, StackError> {
            Ok(None)
        }
    }

    fn poller(client: Arc<ScriptedClient>, timeout: Duration) -> OperationPoller {
        OperationPoller::new(client, Duration::from_millis(5), timeout)
    }

    #[tokio::test]
    async fn returns_once_stack_completes() {
        let client = ScriptedClient::new(vec!["CREATE_IN_PROGRESS", "CREATE_IN_PROGRESS", "CREATE_COMPLETE"]);
        let state = poller(client.clone(), Duration::from_secs(5))
            .wait("p-b1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.state, LastOperationState::Succeeded);
        assert_eq!(state.description, "ready");
        assert_eq!(*client.describes.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_stack_reports_status() {
        let client = ScriptedClient::new(vec!["CREATE_IN_PROGRESS", "ROLLBACK_COMPLETE"]);
        let err = poller(client, Duration::from_secs(5))
            .wait("p-b1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BindingFailed(ref d) if d == "failed: ROLLBACK_COMPLETE"));
    }

    #[tokio::test]
    async fn deadline_ends_the_wait() {
        let client = ScriptedClient::new(vec!["CREATE_IN_PROGRESS"]);
        let err = poller(client, Duration::from_millis(40))
            .wait("p-b1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BindingDeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let client = ScriptedClient::new(vec!["CREATE_IN_PROGRESS"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poller(client.clone(), Duration::from_secs(5))
            .wait("p-b1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BindingDeadlineExceeded(_)));
        assert_eq!(*client.describes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn slow_describe_is_bounded_by_deadline() {
        let client = ScriptedClient::slow(vec!["CREATE_COMPLETE"], Duration::from_secs(3));
        let started = Instant::now();
        let err = poller(client.clone(), Duration::from_millis(100))
            .wait("p-b1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BindingDeadlineExceeded(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(*client.describes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn slow_describe_observes_cancellation() {
        let client = ScriptedClient::slow(vec!["CREATE_COMPLETE"], Duration::from_secs(3));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = poller(client, Duration::from_secs(5))
            .wait("p-b1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BindingDeadlineExceeded(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn within_passes_results_through() {
        let client = ScriptedClient::new(vec!["CREATE_COMPLETE"]);
        let poller = poller(client, Duration::from_secs(5));
        let value = poller
            .within("p-b1", &CancellationToken::new(), async { Ok::<_, BrokerError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = poller
            .within("p-b1", &CancellationToken::new(), async {
                Err::<(), _>(BrokerError::UnexpectedResponse("boom".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn armed_guard_deletes_on_drop() {
        let client = ScriptedClient::new(vec!["CREATE_FAILED"]);
        let tasks = TaskTracker::new();
        drop(CleanupGuard::new(client.clone(), "p-b1", tasks.clone()));
        tasks.close();
        tasks.wait().await;
        assert_eq!(client.deletes(), vec!["p-b1".to_string()]);
    }

    #[tokio::test]
    async fn disarmed_guard_keeps_stack() {
        let client = ScriptedClient::new(vec!["CREATE_COMPLETE"]);
        let tasks = TaskTracker::new();
        CleanupGuard::new(client.clone(), "p-b1", tasks.clone()).disarm();
        tasks.close();
        tasks.wait().await;
        assert!(tasks.is_empty());
        assert!(client.deletes().is_empty());
    }

    #[test]
    fn guard_without_runtime_does_not_panic() {
        let client = ScriptedClient::new(vec!["CREATE_FAILED"]);
        let tasks = TaskTracker::new();
        drop(CleanupGuard::new(client.clone(), "p-b1", tasks.clone()));
        assert!(tasks.is_empty());
        assert!(client.deletes().is_empty());
    }
}
