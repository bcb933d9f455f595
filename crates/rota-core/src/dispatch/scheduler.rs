//! Periodic message dispatch across account sessions.
//!
//! One run owns one session per configured account (created in the
//! scheduler's registry), a wiring task per session that logs in and resolves
//! the destination, and a single ticker task. Ticks run inside that task, so a
//! slow send delays the next tick instead of overlapping with it.

use std::sync::Arc;

use rand::{rngs::StdRng, SeedableRng};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::{
        sanitize::{sanitize, RawDispatchConfig},
        selection::{select, Cursors},
        types::DispatchConfig,
    },
    domain::{ChannelId, Credential},
    session::{Session, SessionRegistry},
};

#[derive(Clone)]
pub struct DispatchScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: Arc<SessionRegistry>,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    config: Option<DispatchConfig>,
    run: Option<ActiveRun>,
}

struct ActiveRun {
    accounts: Vec<Credential>,
    cancel: CancellationToken,
    ticker: JoinHandle<()>,
    wiring: Vec<JoinHandle<()>>,
}

impl DispatchScheduler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Replace the stored config. Does not start or stop a run.
    pub async fn configure(&self, config: DispatchConfig) {
        self.inner.state.lock().await.config = Some(config);
    }

    pub async fn config(&self) -> Option<DispatchConfig> {
        self.inner.state.lock().await.config.clone()
    }

    /// Whether the stored config is admissible for [`start`](Self::start).
    pub async fn is_configured(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .config
            .as_ref()
            .is_some_and(DispatchConfig::is_dispatchable)
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.run.is_some()
    }

    /// Start a run and return the number of sessions it spawned.
    ///
    /// An inadmissible config leaves any current run untouched.
    pub async fn start(&self) -> usize {
        let mut st = self.inner.state.lock().await;

        let admitted = st.config.clone().filter(DispatchConfig::is_dispatchable);
        let Some((config, channel_id)) = admitted.and_then(|config| {
            let channel_id = config.destination_channel_id().cloned()?;
            Some((config, channel_id))
        }) else {
            warn!(
                "dispatch not started: needs at least 2 accounts, \
                 a destination channel and one message"
            );
            return 0;
        };

        self.stop_locked(&mut st).await;

        let mut sessions = Vec::with_capacity(config.accounts().len());
        let mut wiring = Vec::with_capacity(config.accounts().len());
        for credential in config.accounts() {
            let session = self.inner.registry.create(credential).await;
            wiring.push(tokio::spawn(wire_session(session.clone(), channel_id.clone())));
            sessions.push(session);
        }

        let cancel = CancellationToken::new();
        let tick_loop = TickLoop {
            config: config.clone(),
            sessions,
            cursors: Cursors::default(),
            rng: StdRng::from_entropy(),
        };
        let ticker = tokio::spawn(tick_loop.run(cancel.clone()));

        let spawned = config.accounts().len();
        info!(
            accounts = spawned,
            delay_seconds = config.delay_seconds(),
            mode = config.dispatch_mode().as_str(),
            channel = %channel_id,
            "dispatch started"
        );
        st.run = Some(ActiveRun {
            accounts: config.accounts().to_vec(),
            cancel,
            ticker,
            wiring,
        });
        spawned
    }

    /// Stop the current run and destroy its sessions. Silent when idle.
    pub async fn stop(&self) {
        let mut st = self.inner.state.lock().await;
        self.stop_locked(&mut st).await;
    }

    async fn stop_locked(&self, st: &mut SchedulerState) {
        let Some(run) = st.run.take() else {
            return;
        };

        run.cancel.cancel();
        run.ticker.abort();
        let _ = run.ticker.await;
        for handle in run.wiring {
            handle.abort();
        }

        let closed = self.inner.registry.destroy_many(&run.accounts).await;
        info!(sessions = closed, "dispatch stopped");
    }

    /// Apply `edit` to the current settings: stop, re-sanitize, store, and
    /// restart if a run was active and the result is still dispatchable.
    pub async fn reconfigure<F>(&self, edit: F) -> DispatchConfig
    where
        F: FnOnce(&mut RawDispatchConfig),
    {
        let was_running = self.is_running().await;
        self.stop().await;

        let current = self.config().await.unwrap_or_default();
        let mut raw = RawDispatchConfig::from(&current);
        edit(&mut raw);
        let next = sanitize(&raw);
        self.configure(next.clone()).await;

        if was_running && next.is_dispatchable() {
            self.start().await;
        }
        next
    }
}

async fn wire_session(session: Arc<Session>, channel_id: ChannelId) {
    if let Err(e) = session.authenticate().await {
        error!(account = %session.credential(), "login failed: {e}");
        return;
    }
    let res = session.resolve_destination(&channel_id).await;
    let account = session.label().await;
    match res {
        Ok(()) => info!(account = %account, "ready for dispatch"),
        Err(e) => error!(
            account = %account,
            channel = %channel_id,
            "destination unavailable: {e}"
        ),
    }
}

struct TickLoop {
    config: DispatchConfig,
    sessions: Vec<Arc<Session>>,
    cursors: Cursors,
    rng: StdRng,
}

impl TickLoop {
    async fn run(mut self, cancel: CancellationToken) {
        let period = self.config.tick_period();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&mut self) {
        let mut ready = Vec::with_capacity(self.sessions.len());
        for session in &self.sessions {
            if session.is_dispatch_ready().await {
                ready.push(session.credential().clone());
            }
        }

        let Some(pick) = select(&self.config, &ready, &mut self.cursors, &mut self.rng) else {
            debug!(ready = ready.len(), "dispatch tick skipped");
            return;
        };
        let (Some(session), Some(message)) = (
            self.sessions.iter().find(|s| s.credential() == &pick.credential),
            self.config.message(pick.message_id),
        ) else {
            return;
        };

        let account = session.label().await;
        match session.send_to_destination(&message.text).await {
            Ok(()) => info!(
                account = %account,
                message_id = %pick.message_id,
                source = ?pick.source,
                "message dispatched"
            ),
            Err(e) => warn!(
                account = %account,
                message_id = %pick.message_id,
                "dispatch failed: {e}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::sleep;

    use super::*;
    use crate::{
        client::loopback::LoopbackNetwork,
        dispatch::{sanitize_value, DispatchMode},
    };

    fn cred(s: &str) -> Credential {
        Credential::new(s)
    }

    type Fixture = (
        LoopbackNetwork,
        Arc<SessionRegistry>,
        DispatchScheduler,
        DispatchConfig,
    );

    fn setup(value: serde_json::Value) -> Fixture {
        let network = LoopbackNetwork::new();
        network.add_channel(ChannelId("chan".to_string()));
        let registry = Arc::new(SessionRegistry::new(network.factory()));
        let scheduler = DispatchScheduler::new(registry.clone());
        (network, registry, scheduler, sanitize_value(&value))
    }

    fn senders(network: &LoopbackNetwork) -> Vec<String> {
        network
            .sent()
            .iter()
            .map(|m| m.credential.expose().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_start_creates_no_sessions() {
        let (network, registry, scheduler, cfg) = setup(json!({
            "accounts": ["A"],
            "channelId": "chan",
            "messages": ["hi"]
        }));
        assert_eq!(scheduler.start().await, 0);

        scheduler.configure(cfg).await;
        assert!(!scheduler.is_configured().await);
        assert_eq!(scheduler.start().await, 0);
        assert!(!scheduler.is_running().await);
        assert_eq!(network.clients_created(), 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn inadmissible_start_keeps_current_run() {
        let (network, registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"],
            "delaySeconds": 1
        }));
        scheduler.configure(cfg).await;
        assert_eq!(scheduler.start().await, 2);
        sleep(Duration::from_millis(10)).await;

        scheduler
            .configure(sanitize_value(&json!({
                "accounts": ["A"],
                "channelId": "chan",
                "messages": ["hi"]
            })))
            .await;
        assert_eq!(scheduler.start().await, 0);

        assert!(scheduler.is_running().await);
        assert_eq!(registry.len().await, 2);
        assert!(network.logouts().is_empty());

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(network.sent().len(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn spawned_futures_are_send() {
        fn require_send<F: std::future::Future + Send>(_: F) {}

        let (_network, registry, scheduler, _cfg) = setup(json!({}));
        let session = registry.create(&cred("A")).await;
        require_send(wire_session(session, ChannelId("chan".to_string())));
        require_send(scheduler.start());
        require_send(scheduler.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_run_alternates_accounts() {
        let (network, _registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": [{"id": 1, "text": "hi"}],
            "dispatchMode": "sequential",
            "delaySeconds": 1
        }));
        scheduler.configure(cfg).await;
        assert!(scheduler.is_configured().await);
        assert_eq!(scheduler.start().await, 2);

        sleep(Duration::from_millis(4500)).await;
        assert_eq!(senders(&network), vec!["A", "B", "A", "B"]);
        assert!(network.sent().iter().all(|m| m.text == "hi" && m.channel_id.0 == "chan"));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_uses_minimum_period() {
        let (network, _registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"],
            "delaySeconds": 0
        }));
        scheduler.configure(cfg).await;
        scheduler.start().await;

        sleep(Duration::from_millis(2200)).await;
        assert_eq!(network.sent().len(), 4);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_destroys_sessions_and_halts_ticks() {
        let (network, registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"],
            "delaySeconds": 1
        }));
        scheduler.configure(cfg).await;
        scheduler.start().await;
        sleep(Duration::from_millis(1500)).await;

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        assert!(registry.is_empty().await);
        assert_eq!(network.logouts().len(), 2);

        let sent = network.sent().len();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(network.sent().len(), sent);

        scheduler.stop().await;
        assert_eq!(network.logouts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_run() {
        let (network, registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"]
        }));
        scheduler.configure(cfg).await;
        scheduler.start().await;
        sleep(Duration::from_millis(10)).await;
        scheduler.start().await;

        assert_eq!(network.logouts().len(), 2);
        assert_eq!(registry.len().await, 2);
        assert_eq!(network.clients_created(), 4);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_destination_is_excluded_from_pool() {
        let (network, _registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"],
            "dispatchMode": "sequential",
            "delaySeconds": 1
        }));
        network.deny_channels(&cred("A"));
        scheduler.configure(cfg).await;
        scheduler.start().await;

        sleep(Duration::from_millis(3500)).await;
        assert_eq!(senders(&network), vec!["B", "B", "B"]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_does_not_stop_run() {
        let (network, _registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"],
            "dispatchMode": "sequential",
            "delaySeconds": 1
        }));
        network.fail_sends(&cred("A"));
        scheduler.configure(cfg).await;
        scheduler.start().await;

        sleep(Duration::from_millis(4500)).await;
        assert!(scheduler.is_running().await);
        assert_eq!(senders(&network), vec!["B", "B"]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_session_leaves_ready_set() {
        let (network, _registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"],
            "dispatchMode": "sequential",
            "delaySeconds": 1
        }));
        scheduler.configure(cfg).await;
        scheduler.start().await;
        sleep(Duration::from_millis(2500)).await;
        network.drop_connection(&cred("A"));

        sleep(Duration::from_secs(3)).await;
        assert_eq!(senders(&network), vec!["A", "B", "B", "B", "B"]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn assignment_wins_over_random_mode() {
        let (network, _registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": [{"id": 1, "text": "x"}, {"id": 2, "text": "y"}],
            "assignments": [{"credential": "A", "messageId": 1}],
            "dispatchMode": "random",
            "delaySeconds": 1
        }));
        scheduler.configure(cfg).await;
        scheduler.start().await;

        sleep(Duration::from_millis(10_500)).await;
        let sent = network.sent();
        assert_eq!(sent.len(), 10);
        assert!(sent.iter().all(|m| m.credential == cred("A") && m.text == "x"));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_restarts_running_scheduler() {
        let (network, _registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["old"],
            "dispatchMode": "sequential",
            "delaySeconds": 1
        }));
        scheduler.configure(cfg).await;
        scheduler.start().await;
        sleep(Duration::from_millis(1500)).await;

        let next = scheduler
            .reconfigure(|raw| {
                raw.messages.clear();
                raw.add_message("new");
                raw.set_mode(DispatchMode::Random);
            })
            .await;
        assert_eq!(next.dispatch_mode(), DispatchMode::Random);
        assert!(scheduler.is_running().await);

        sleep(Duration::from_millis(2500)).await;
        let texts: Vec<String> = network.sent().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["old", "new", "new"]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_into_undispatchable_stays_stopped() {
        let (_network, registry, scheduler, cfg) = setup(json!({
            "accounts": ["A", "B"],
            "channelId": "chan",
            "messages": ["hi"]
        }));
        scheduler.configure(cfg).await;
        scheduler.start().await;

        let next = scheduler.reconfigure(|raw| raw.set_destination("none")).await;
        assert!(!next.is_dispatchable());
        assert!(!scheduler.is_running().await);
        assert!(registry.is_empty().await);
    }
}
