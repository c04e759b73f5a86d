//! Async shell around the synchronous engine.
//!
//! Owns the engine lock and the optional collaborators. Every engine call
//! goes through [`GameRuntime::with_engine`], which drains the outbox while
//! the lock is held and performs the network work after it is released.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{EngineError, Outbox, SessionEngine, TickReport};
use crate::chain::{self, ChainAdapter};
use crate::config::ReputationConfig;
use crate::oracle::Attestor;
use crate::reputation::mirror::{self, ReputationMirror};

pub struct GameRuntime {
    engine: Arc<Mutex<SessionEngine>>,
    chain: Option<Arc<dyn ChainAdapter>>,
    attestor: Option<Arc<dyn Attestor>>,
    mirror: Option<Arc<dyn ReputationMirror>>,
    reputation: ReputationConfig,
    ticks: AtomicU64,
}

impl GameRuntime {
    pub fn new(engine: SessionEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            chain: None,
            attestor: None,
            mirror: None,
            reputation: ReputationConfig::default(),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainAdapter>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_attestor(mut self, attestor: Arc<dyn Attestor>) -> Self {
        self.attestor = Some(attestor);
        self
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn ReputationMirror>, config: ReputationConfig) -> Self {
        self.mirror = Some(mirror);
        self.reputation = config;
        self
    }

    pub fn engine(&self) -> &Arc<Mutex<SessionEngine>> {
        &self.engine
    }

    /// Run `f` under the engine lock, then flush whatever it queued.
    pub async fn with_engine<T>(&self, f: impl FnOnce(&mut SessionEngine) -> T) -> T {
        let (out, outbox) = {
            let mut engine = self.engine.lock().await;
            let out = f(&mut engine);
            (out, engine.drain_outbox())
        };
        self.flush_outbox(outbox).await;
        out
    }

    /// One clock tick plus the periodic reputation sync.
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        let result = self.with_engine(|engine| engine.tick()).await;
        let n = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if self.mirror.is_some() && n % self.reputation.flush_every_ticks.max(1) == 0 {
            self.sync_reputation().await;
        }
        result
    }

    /// Attest new commitments and replay chain ops. Never fails.
    pub async fn flush_outbox(&self, outbox: Outbox) {
        if outbox.is_empty() {
            return;
        }

        if let Some(attestor) = &self.attestor {
            for published in outbox.attest {
                match attestor.attest(&published).await {
                    Ok(attestation) => {
                        let mut engine = self.engine.lock().await;
                        engine.record_attestation(&published.session_id, attestation);
                    }
                    Err(e) => {
                        warn!(session_id = %published.session_id, error = %e, "Attestation unavailable");
                    }
                }
            }
        }

        if let Some(adapter) = &self.chain {
            chain::sync(adapter.as_ref(), outbox.chain).await;
        }
    }

    /// Push pending feedback to the mirror and adopt its scores.
    pub async fn sync_reputation(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let (pending, agents) = {
            let mut engine = self.engine.lock().await;
            let agents = engine.known_agents();
            (engine.reputation_mut().take_pending(), agents)
        };

        let failed = mirror::flush(
            mirror.as_ref(),
            pending,
            self.reputation.batch_size,
            Duration::from_millis(self.reputation.batch_delay_ms),
        )
        .await;
        let fetched = mirror::fetch_all(mirror.as_ref(), &agents).await;

        let mut engine = self.engine.lock().await;
        engine.reputation_mut().requeue(failed);
        for (agent_id, external) in fetched {
            let overall = engine.reputation_mut().merge_external(&agent_id, external).overall_score;
            engine.sync_agent_reputation(&agent_id, overall);
        }
    }

    /// Tick every `interval` until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(interval);
        tokio::pin!(shutdown);

        info!(interval_ms = interval.period().as_millis() as u64, "Game clock running");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.started || report.resolved || report.archived => {
                            info!(
                                session_id = ?report.session_id,
                                phase = ?report.phase,
                                day = report.day,
                                "Session milestone"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Tick failed, session halted");
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Game clock stopped.");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
