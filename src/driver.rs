use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dom;
use crate::engine::Engine;
use crate::errors::{DriverError, Result};
use crate::session::Session;
use crate::task::{Step, Task, TaskOutput};
use crate::types::DriverConfig;

/// Driver lifecycle. `Stopped` is terminal; a stopped driver cannot be
/// restarted, a fresh instance is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
}

/// Owns one engine session and executes tasks against it sequentially.
///
/// Every exit path releases the engine process: explicit `stop()`,
/// failed starts, engine death, cancellation, and drop (the engine
/// handle terminates its process when dropped).
pub struct Driver<E: Engine> {
    engine: E,
    config: DriverConfig,
    state: DriverState,
    page: Option<E::Page>,
    session: Option<Session>,
}

impl<E: Engine> Driver<E> {
    pub fn new(engine: E, config: DriverConfig) -> Self {
        Self {
            engine,
            config,
            state: DriverState::Uninitialized,
            page: None,
            session: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Launch the engine and establish a session. Bounded by the config
    /// timeout; a failed or timed-out start tears the engine down and
    /// leaves the driver `Stopped`.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            DriverState::Uninitialized => {}
            DriverState::Starting | DriverState::Ready | DriverState::Running => {
                return Err(DriverError::AlreadyStarted);
            }
            DriverState::Stopping | DriverState::Stopped => {
                return Err(DriverError::InvalidState {
                    operation: "start",
                    state: self.state,
                });
            }
        }

        self.state = DriverState::Starting;
        let bound = Duration::from_millis(self.config.timeout_ms);

        match timeout(bound, self.launch_session()).await {
            Ok(Ok(page)) => {
                let session = Session::new();
                info!(session_id = %session.id, "engine session established");
                self.page = Some(page);
                self.session = Some(session);
                self.state = DriverState::Ready;
                Ok(())
            }
            Ok(Err(err)) => {
                self.teardown().await;
                Err(err)
            }
            Err(_) => {
                self.teardown().await;
                Err(DriverError::Timeout {
                    operation: "start".to_string(),
                    timeout_ms: self.config.timeout_ms,
                })
            }
        }
    }

    async fn launch_session(&mut self) -> Result<E::Page> {
        self.engine.launch(&self.config).await?;
        self.engine.open_page().await
    }

    /// Execute a task's steps in order against the current session.
    pub async fn run(&mut self, task: &Task) -> Result<TaskOutput> {
        self.run_with_cancel(task, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), but the caller can abort mid-task. A
    /// cancelled run takes the same cleanup path as `stop()` and reports
    /// the step it was interrupted at.
    pub async fn run_with_cancel(
        &mut self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput> {
        if self.state != DriverState::Ready || self.page.is_none() {
            return Err(DriverError::InvalidState {
                operation: "run",
                state: self.state,
            });
        }

        self.state = DriverState::Running;
        let started = Instant::now();
        let mut payload = Map::new();

        // The page handle is restored on every path that leaves the
        // driver usable; fatal paths tear the whole session down.
        let page = match self.page.take() {
            Some(page) => page,
            None => {
                return Err(DriverError::InvalidState {
                    operation: "run",
                    state: self.state,
                })
            }
        };

        for (index, step) in task.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                drop(page);
                self.teardown().await;
                return Err(DriverError::Cancelled { index });
            }

            debug!(task_id = %task.id, index, kind = step.kind(), "executing step");

            let bound_ms = step.timeout_override().unwrap_or(self.config.timeout_ms);
            let bound = Duration::from_millis(bound_ms);

            let raced = {
                let engine = &self.engine;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    outcome = timeout(
                        bound,
                        execute_step(engine, &page, &self.config, step, &mut payload),
                    ) => Some(outcome),
                }
            };

            match raced {
                None => {
                    drop(page);
                    self.teardown().await;
                    return Err(DriverError::Cancelled { index });
                }
                Some(Err(_elapsed)) => {
                    if !self.engine.is_alive() {
                        drop(page);
                        self.teardown().await;
                        return Err(DriverError::SessionDied { index });
                    }
                    self.page = Some(page);
                    self.state = DriverState::Ready;
                    return Err(DriverError::Timeout {
                        operation: format!("step {} ({})", index, step.kind()),
                        timeout_ms: bound_ms,
                    });
                }
                Some(Ok(Err(err))) => {
                    // Engine death is fatal for the session; a plain step
                    // failure leaves the driver ready for another task.
                    if !self.engine.is_alive() {
                        drop(page);
                        self.teardown().await;
                        return Err(DriverError::SessionDied { index });
                    }
                    self.page = Some(page);
                    self.state = DriverState::Ready;
                    return Err(DriverError::Step {
                        index,
                        kind: step.kind(),
                        message: err.to_string(),
                    });
                }
                Some(Ok(Ok(()))) => {}
            }
        }

        let session_id = self
            .session
            .as_ref()
            .map(|session| session.id.clone())
            .unwrap_or_default();

        self.page = Some(page);
        self.state = DriverState::Ready;
        info!(task_id = %task.id, steps = task.steps.len(), "task completed");

        Ok(TaskOutput {
            task_id: task.id.clone(),
            session_id,
            payload: Value::Object(payload),
            steps_completed: task.steps.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Terminate the session and release the engine. Idempotent, safe in
    /// any state.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == DriverState::Stopped {
            return Ok(());
        }
        self.teardown().await;
        Ok(())
    }

    async fn teardown(&mut self) {
        self.state = DriverState::Stopping;
        self.page = None;
        if let Err(err) = self.engine.shutdown().await {
            warn!(error = %err, "engine shutdown reported an error");
        }
        self.session = None;
        self.state = DriverState::Stopped;
    }
}

async fn execute_step<E: Engine>(
    engine: &E,
    page: &E::Page,
    config: &DriverConfig,
    step: &Step,
    payload: &mut Map<String, Value>,
) -> Result<()> {
    let poll = Duration::from_millis(config.poll_interval_ms);

    match step {
        Step::Navigate { url } => {
            let parsed = url::Url::parse(url)
                .map_err(|e| DriverError::Engine(format!("invalid url '{}': {}", url, e)))?;
            engine.navigate(page, parsed.as_str()).await
        }
        Step::WaitForLoad { .. } => loop {
            if engine.ready(page).await? {
                return Ok(());
            }
            sleep(poll).await;
        },
        Step::WaitForElement { selector, .. } => loop {
            if engine.element_exists(page, selector).await? {
                return Ok(());
            }
            sleep(poll).await;
        },
        Step::WaitForText { pattern, .. } => {
            let re = Regex::new(pattern)
                .map_err(|e| DriverError::Engine(format!("invalid pattern '{}': {}", pattern, e)))?;
            loop {
                let html = engine.page_source(page).await?;
                if dom::text_matches(&html, &re) {
                    return Ok(());
                }
                sleep(poll).await;
            }
        }
        Step::Click { selector } => engine.click(page, selector).await,
        Step::Fill { selector, text } => engine.fill(page, selector, text).await,
        Step::Extract {
            selector,
            target,
            store_as,
        } => {
            let html = engine.page_source(page).await?;
            match dom::extract(&html, selector, target)? {
                Some(value) => {
                    payload.insert(store_as.clone(), Value::String(value));
                    Ok(())
                }
                None => Err(DriverError::Engine(format!(
                    "no element matched '{}'",
                    selector
                ))),
            }
        }
        Step::ExtractTitle { store_as } => {
            let title = engine.title(page).await?;
            payload.insert(store_as.clone(), Value::String(title));
            Ok(())
        }
        Step::ExtractUrl { store_as } => {
            let url = engine.current_url(page).await?;
            payload.insert(store_as.clone(), Value::String(url));
            Ok(())
        }
        Step::Evaluate { script, store_as } => {
            let value = engine.evaluate(page, script).await?;
            if let Some(key) = store_as {
                payload.insert(key.clone(), value);
            }
            Ok(())
        }
        Step::Screenshot { store_as } => {
            let bytes = engine.screenshot(page).await?;
            payload.insert(store_as.clone(), Value::String(BASE64.encode(bytes)));
            Ok(())
        }
        Step::Sleep { duration_ms } => {
            sleep(Duration::from_millis(*duration_ms)).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ExtractTarget;
    use crate::testing::MockEngine;

    fn fast_config() -> DriverConfig {
        DriverConfig {
            timeout_ms: 1000,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    fn title_task() -> Task {
        Task::new("audit")
            .navigate("https://example.test/")
            .extract_title("title")
    }

    #[tokio::test]
    async fn run_before_start_fails_with_invalid_state() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        let err = driver.run(&title_task()).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::InvalidState {
                operation: "run",
                state: DriverState::Uninitialized,
            }
        ));
    }

    #[tokio::test]
    async fn start_twice_fails_with_already_started() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();
        let err = driver.start().await.unwrap_err();
        assert!(matches!(err, DriverError::AlreadyStarted));
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn launch_failure_surfaces_and_leaves_stop_safe() {
        let mut driver = Driver::new(MockEngine::new().failing_launch(), fast_config());
        let err = driver.start().await.unwrap_err();
        assert!(matches!(err, DriverError::Launch(_)));
        assert_eq!(driver.state(), DriverState::Stopped);
        driver.stop().await.unwrap();
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_timeout_leaves_stop_safe() {
        let engine = MockEngine::new().with_launch_delay(Duration::from_millis(500));
        let config = DriverConfig {
            timeout_ms: 50,
            ..fast_config()
        };
        let mut driver = Driver::new(engine, config);

        let err = driver.start().await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Timeout { timeout_ms: 50, .. }
        ));
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(!driver.engine().is_alive());
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_kills_the_engine() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();
        assert!(driver.engine().is_alive());

        driver.stop().await.unwrap();
        driver.stop().await.unwrap();
        driver.stop().await.unwrap();

        assert!(!driver.engine().is_alive());
        assert_eq!(driver.engine().shutdown_count(), 1);
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(driver.session().is_none());

        // Stopped is terminal: no restart, no new tasks.
        let err = driver.start().await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::InvalidState {
                state: DriverState::Stopped,
                ..
            }
        ));
        let err = driver.run(&title_task()).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.stop().await.unwrap();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(!driver.engine().is_alive());
    }

    #[tokio::test]
    async fn first_failing_step_reports_its_exact_index() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();

        let task = Task::new("bad-click")
            .navigate("https://example.test/")
            .click("#does-not-exist")
            .extract_title("title")
            .extract_url("url");

        let err = driver.run(&task).await.unwrap_err();
        match err {
            DriverError::Step { index, kind, .. } => {
                assert_eq!(index, 1);
                assert_eq!(kind, "click");
            }
            other => panic!("expected Step error, got {:?}", other),
        }

        // A plain step failure leaves the driver ready for another task.
        assert_eq!(driver.state(), DriverState::Ready);
        let output = driver.run(&title_task()).await.unwrap();
        assert_eq!(output.payload["title"], "Example Domain");
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn navigate_and_extract_title_scenario() {
        let config = DriverConfig {
            headless: true,
            timeout_ms: 5000,
            poll_interval_ms: 10,
            ..Default::default()
        };
        let mut driver = Driver::new(MockEngine::new(), config);
        driver.start().await.unwrap();

        let output = driver.run(&title_task()).await.unwrap();
        assert_eq!(output.payload["title"], "Example Domain");
        assert_eq!(output.steps_completed, 2);
        assert_eq!(
            output.session_id,
            driver.session().map(|s| s.id.clone()).unwrap()
        );
        assert_eq!(
            driver.engine().navigations(),
            vec!["https://example.test/".to_string()]
        );
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn engine_death_mid_run_is_fatal_for_the_session() {
        // One successful engine operation (the navigation), then the
        // process dies; the extraction at index 1 observes it.
        let mut driver = Driver::new(MockEngine::new().dying_after_ops(1), fast_config());
        driver.start().await.unwrap();

        let err = driver.run(&title_task()).await.unwrap_err();
        assert!(matches!(err, DriverError::SessionDied { index: 1 }));
        assert_eq!(driver.state(), DriverState::Stopped);

        // Cleanup stays safe after the crash.
        driver.stop().await.unwrap();
        let err = driver.run(&title_task()).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_before_the_first_step() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = driver
            .run_with_cancel(&title_task(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Cancelled { index: 0 }));
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(!driver.engine().is_alive());
    }

    #[tokio::test]
    async fn cancellation_interrupts_an_in_flight_step() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();

        let task = Task::new("slow")
            .navigate("https://example.test/")
            .sleep_ms(10000);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = driver.run_with_cancel(&task, &cancel).await.unwrap_err();
        assert!(matches!(err, DriverError::Cancelled { index: 1 }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(!driver.engine().is_alive());
    }

    #[tokio::test]
    async fn wait_step_times_out_without_stopping_the_driver() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();

        let task = Task::new("wait").step(Step::WaitForElement {
            selector: "#never-appears".to_string(),
            timeout_ms: Some(80),
        });

        let err = driver.run(&task).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout { timeout_ms: 80, .. }));
        assert_eq!(driver.state(), DriverState::Ready);
        assert!(driver.engine().is_alive());
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_text_succeeds_on_matching_page() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();

        let task = Task::new("verify")
            .navigate("https://example.test/")
            .wait_for_text(r"illustrative\s+examples")
            .extract("a", ExtractTarget::Attribute("href".to_string()), "link");

        let output = driver.run(&task).await.unwrap();
        assert_eq!(
            output.payload["link"],
            "https://www.iana.org/domains/example"
        );
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn screenshot_payload_is_base64() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();

        let task = Task::new("capture")
            .navigate("https://example.test/")
            .screenshot("shot");

        let output = driver.run(&task).await.unwrap();
        let encoded = output.payload["shot"].as_str().unwrap();
        let decoded = BASE64.decode(encoded).unwrap();
        assert!(decoded.starts_with(&[0x89, b'P', b'N', b'G']));
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_navigation_url_is_a_step_failure() {
        let mut driver = Driver::new(MockEngine::new(), fast_config());
        driver.start().await.unwrap();

        let task = Task::new("bad-url").navigate("not a url");
        let err = driver.run(&task).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Step {
                index: 0,
                kind: "navigate",
                ..
            }
        ));
        assert_eq!(driver.state(), DriverState::Ready);
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_drivers_share_no_session_state() {
        let mut first = Driver::new(MockEngine::new(), fast_config());
        let mut second = Driver::new(
            MockEngine::with_page(
                "<html><head><title>Other Page</title></head><body><p>other</p></body></html>",
            ),
            fast_config(),
        );

        let (a, b) = tokio::join!(first.start(), second.start());
        a.unwrap();
        b.unwrap();

        let first_task = Task::new("one").navigate("https://one.test/").extract_title("title");
        let second_task = Task::new("two").navigate("https://two.test/").extract_title("title");

        let (one, two) = tokio::join!(first.run(&first_task), second.run(&second_task));
        let one = one.unwrap();
        let two = two.unwrap();

        assert_ne!(one.session_id, two.session_id);
        assert_eq!(one.payload["title"], "Example Domain");
        assert_eq!(two.payload["title"], "Other Page");
        assert_eq!(first.engine().navigations(), vec!["https://one.test/"]);
        assert_eq!(second.engine().navigations(), vec!["https://two.test/"]);

        let (a, b) = tokio::join!(first.stop(), second.stop());
        a.unwrap();
        b.unwrap();
        assert!(!first.engine().is_alive());
        assert!(!second.engine().is_alive());
    }
}
