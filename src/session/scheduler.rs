use super::*;

/// Result of one connect attempt inside a scheduling round.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The reply satisfied the configured success check.
    Connected,
    /// The tool answered, but not with a success reply.
    Rejected { response: String },
    /// The command itself failed (startup, stderr output, or timeout).
    Errored(ManagerError),
}

impl AttemptOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, AttemptOutcome::Connected)
    }
}

/// A connect attempt for one address, tracked for a single round.
#[derive(Debug)]
pub struct ConnectionAttempt {
    pub address: String,
    pub outcome: AttemptOutcome,
}

/// Outcomes of one scheduling round, in submission order.
#[derive(Debug, Default)]
pub struct RoundReport {
    pub attempts: Vec<ConnectionAttempt>,
}

impl RoundReport {
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Addresses that connected successfully.
    pub fn connected(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.outcome.is_connected())
            .map(|a| a.address.as_str())
            .collect()
    }

    /// Attempts that were rejected or errored.
    pub fn failed(&self) -> Vec<&ConnectionAttempt> {
        self.attempts
            .iter()
            .filter(|a| !a.outcome.is_connected())
            .collect()
    }
}

/// Bounded pool that issues one `connect` command per address.
///
/// The pool is sized once from `max_connections` and shared by every round,
/// so at most that many connect processes run at the same time. A round
/// returns only after every attempt has finished, and a failing attempt
/// never affects its siblings.
#[derive(Clone)]
pub struct ConnectionScheduler {
    runner: Arc<dyn CommandRunner>,
    permits: Arc<Semaphore>,
    capacity: usize,
    timeout: Duration,
    check: Arc<ResponseCheck>,
}

impl ConnectionScheduler {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        capacity: usize,
        timeout: Duration,
        check: ResponseCheck,
    ) -> Result<Self, ManagerError> {
        if capacity == 0 {
            return Err(ManagerError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            runner,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            timeout,
            check: Arc::new(check),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connects to every address, at most `capacity` at a time.
    ///
    /// Per-address failures are logged and reported in the returned
    /// [`RoundReport`]; they are never returned as an error.
    pub async fn connect_all<S: AsRef<str>>(&self, addresses: &[S]) -> RoundReport {
        let mut tasks = JoinSet::new();
        for (index, address) in addresses.iter().enumerate() {
            let address: &str = address.as_ref();
            let address = address.to_string();
            let permits = self.permits.clone();
            let runner = self.runner.clone();
            let check = self.check.clone();
            let timeout = self.timeout;

            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        match try_connect(runner.as_ref(), &address, timeout, &check).await {
                            Ok(Ok(())) => AttemptOutcome::Connected,
                            Ok(Err(response)) => AttemptOutcome::Rejected { response },
                            Err(e) => {
                                error!("Connect attempt for {} failed: {}", address, e);
                                AttemptOutcome::Errored(e)
                            }
                        }
                    }
                    Err(e) => AttemptOutcome::Errored(ManagerError::Startup {
                        command: connect_command(&address),
                        reason: format!("connection pool unavailable: {e}"),
                    }),
                };
                (index, ConnectionAttempt { address, outcome })
            });
        }

        let mut slots: Vec<Option<ConnectionAttempt>> =
            std::iter::repeat_with(|| None).take(addresses.len()).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, attempt)) => slots[index] = Some(attempt),
                Err(e) => error!("Connect task aborted: {}", e),
            }
        }

        let attempts = slots
            .into_iter()
            .zip(addresses)
            .map(|(slot, address)| {
                slot.unwrap_or_else(|| {
                    let address: &str = address.as_ref();
                    let address = address.to_string();
                    ConnectionAttempt {
                        outcome: AttemptOutcome::Errored(ManagerError::Execution {
                            command: connect_command(&address),
                            errors: "connect task aborted".to_string(),
                        }),
                        address,
                    }
                })
            })
            .collect();

        info!("All device connection attempts are complete.");
        RoundReport { attempts }
    }
}

/// Issues one `connect` and applies the success check.
///
/// Returns `Ok(Err(response))` when the tool answered without success.
pub(super) async fn try_connect(
    runner: &dyn CommandRunner,
    address: &str,
    timeout: Duration,
    check: &ResponseCheck,
) -> Result<Result<(), String>, ManagerError> {
    let output = runner
        .execute(&connect_command(address), Some(timeout))
        .await?;
    if check.is_success(&output) {
        info!("Successfully connected to {}.", address);
        Ok(Ok(()))
    } else {
        error!("Failed to connect to {}.", address);
        Ok(Err(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runner that answers `connect` after a delay and tracks concurrency.
    struct SlowRunner {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<String>>,
        finished: Mutex<Vec<String>>,
    }

    impl SlowRunner {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                finished: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for SlowRunner {
        async fn execute(
            &self,
            command: &str,
            _timeout: Option<Duration>,
        ) -> Result<String, ManagerError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.started.lock().unwrap().push(command.to_string());

            tokio::time::sleep(self.delay).await;

            self.finished.lock().unwrap().push(command.to_string());
            self.active.fetch_sub(1, Ordering::SeqCst);

            if command.ends_with(":03") {
                Err(ManagerError::Timeout {
                    command: command.to_string(),
                    errors: None,
                })
            } else if command.ends_with(":02") {
                Ok("Failed to connect: org.bluez.Error.Failed".to_string())
            } else {
                Ok("Attempting to connect\nConnection successful".to_string())
            }
        }
    }

    fn scheduler(runner: Arc<SlowRunner>, capacity: usize) -> ConnectionScheduler {
        ConnectionScheduler::new(
            runner,
            capacity,
            Duration::from_secs(5),
            ResponseCheck::contains("successful"),
        )
        .expect("valid capacity")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_bounds_concurrency_and_waits_for_all() {
        let runner = Arc::new(SlowRunner::new(Duration::from_millis(150)));
        let pool = scheduler(runner.clone(), 2);
        let addresses = ["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:04", "AA:BB:CC:DD:EE:05"];

        let report = pool.connect_all(&addresses).await;

        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
        assert_eq!(runner.active.load(Ordering::SeqCst), 0);
        assert_eq!(runner.finished.lock().unwrap().len(), 3);
        assert_eq!(report.len(), 3);
        assert_eq!(report.connected().len(), 3);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_address() {
        let runner = Arc::new(SlowRunner::new(Duration::from_millis(10)));
        let pool = scheduler(runner.clone(), 3);
        let addresses = vec![
            "AA:BB:CC:DD:EE:01".to_string(),
            "AA:BB:CC:DD:EE:02".to_string(),
            "AA:BB:CC:DD:EE:03".to_string(),
        ];

        let report = pool.connect_all(&addresses).await;

        let addrs: Vec<&str> = report.attempts.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addrs, addresses);
        assert!(report.attempts[0].outcome.is_connected());
        assert!(matches!(
            &report.attempts[1].outcome,
            AttemptOutcome::Rejected { response } if response.contains("Failed")
        ));
        assert!(matches!(
            report.attempts[2].outcome,
            AttemptOutcome::Errored(ManagerError::Timeout { .. })
        ));
        assert_eq!(report.failed().len(), 2);
    }

    #[tokio::test]
    async fn pool_is_reused_across_rounds() {
        let runner = Arc::new(SlowRunner::new(Duration::from_millis(5)));
        let pool = scheduler(runner.clone(), 1);

        pool.connect_all(&["AA:BB:CC:DD:EE:01"]).await;
        pool.connect_all(&["AA:BB:CC:DD:EE:04", "AA:BB:CC:DD:EE:05"]).await;

        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
        assert_eq!(
            *runner.started.lock().unwrap(),
            vec![
                "connect AA:BB:CC:DD:EE:01",
                "connect AA:BB:CC:DD:EE:04",
                "connect AA:BB:CC:DD:EE:05",
            ]
        );
        assert_eq!(pool.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn empty_round_completes_immediately() {
        let runner = Arc::new(SlowRunner::new(Duration::from_millis(5)));
        let pool = scheduler(runner.clone(), 2);
        let report = pool.connect_all::<&str>(&[]).await;
        assert!(report.is_empty());
        assert!(runner.started.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let runner = Arc::new(SlowRunner::new(Duration::ZERO));
        let result = ConnectionScheduler::new(
            runner,
            0,
            Duration::from_secs(1),
            ResponseCheck::contains("ok"),
        );
        assert!(matches!(result, Err(ManagerError::InvalidConfig(_))));
    }
}
