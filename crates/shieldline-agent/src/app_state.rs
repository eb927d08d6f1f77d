//! Shared agent state.
//!
//! Wires the store, host collaborators, orchestrator, guard and router into
//! one cloneable handle. Every inbound event handler waits on the boot
//! barrier before doing anything.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::OnceCell;

use shieldline_core::error::{Result, ShieldError};
use shieldline_core::protocol::{reply_json, ErrorPayload, MessageSender, Reply, Request};

use crate::config::AgentConfig;
use crate::dispatch::{CommandTable, MessageRouter};
use crate::guard::{BootOutcome, CrashLoopGuard};
use crate::host::Hosts;
use crate::obs::AgentMetrics;
use crate::policy::{GrantOutcome, PolicyReconciler};
use crate::rules::RuleLifecycle;
use crate::scripting::InjectableRegistrar;
use crate::session::{detect_wakeup, BootBarrier, BootStatus, SessionOrchestrator};
use crate::store::{ConfigStore, KeyValueStore};

#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    cfg: AgentConfig,
    hosts: Hosts,
    session_kv: Arc<dyn KeyValueStore>,
    store: Arc<ConfigStore>,
    rules: Arc<RuleLifecycle>,
    reconciler: Arc<PolicyReconciler>,
    orchestrator: SessionOrchestrator,
    guard: CrashLoopGuard,
    router: MessageRouter,
    commands: CommandTable,
    barrier: BootBarrier,
    boot: OnceCell<BootOutcome>,
    metrics: Arc<AgentMetrics>,
}

impl Agent {
    /// Build the agent over a durable `local` store and a `session` store
    /// that the host clears on browser restart.
    pub fn new(
        cfg: AgentConfig,
        hosts: Hosts,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        cfg.validate()?;
        let engine_max = hosts.engine.max_enabled_rule_sets();
        if engine_max != cfg.engine.max_enabled_rule_sets {
            tracing::warn!(
                configured = cfg.engine.max_enabled_rule_sets,
                engine = engine_max,
                "engine rule set limit differs from config, engine wins"
            );
        }

        let metrics = Arc::new(AgentMetrics::default());
        let store = Arc::new(ConfigStore::new(Arc::clone(&local)));
        let rules = Arc::new(RuleLifecycle::new(Arc::clone(&store), hosts.clone()));
        let injectables = Arc::new(InjectableRegistrar::new(hosts.clone(), Arc::clone(&store)));
        let reconciler = Arc::new(PolicyReconciler::new(
            Arc::clone(&store),
            hosts.clone(),
            Arc::clone(&rules),
            Arc::clone(&injectables),
            Duration::from_millis(cfg.agent.reload_delay_ms),
        ));
        let orchestrator = SessionOrchestrator::new(
            cfg.agent.clone(),
            Arc::clone(&store),
            hosts.clone(),
            Arc::clone(&rules),
            Arc::clone(&reconciler),
            Arc::clone(&injectables),
        );
        let guard = CrashLoopGuard::new(local, Arc::clone(&hosts.runtime));
        let router = MessageRouter::new(
            &cfg.agent,
            Arc::clone(&store),
            hosts.clone(),
            Arc::clone(&rules),
            Arc::clone(&reconciler),
            injectables,
            Arc::clone(&metrics),
        );

        Ok(Self {
            inner: Arc::new(AgentInner {
                cfg,
                hosts,
                session_kv: session,
                store,
                rules,
                reconciler,
                orchestrator,
                guard,
                router,
                commands: CommandTable::default(),
                barrier: BootBarrier::new(),
                boot: OnceCell::new(),
                metrics,
            }),
        })
    }

    /// Run the boot sequence under the crash-loop guard and open the
    /// barrier. Runs once per process; later calls return the first outcome.
    pub async fn boot(&self) -> &BootOutcome {
        self.inner.boot.get_or_init(|| self.run_boot()).await
    }

    async fn run_boot(&self) -> BootOutcome {
        let inner = &self.inner;
        let wakeup_run = detect_wakeup(inner.session_kv.as_ref()).await;
        tracing::info!(version = %inner.cfg.agent.version, wakeup_run, "agent booting");

        let outcome = inner
            .guard
            .supervise(wakeup_run, inner.orchestrator.start(wakeup_run))
            .await;
        inner.metrics.boots.inc(&[("outcome", outcome.as_str())]);

        let status = if outcome.is_ready() {
            BootStatus::Ready
        } else {
            BootStatus::Failed
        };
        inner.barrier.resolve(status);
        outcome
    }

    pub async fn on_message(&self, req: Request, sender: &MessageSender) -> Reply {
        self.inner.barrier.wait().await;
        self.inner.router.handle(req, sender).await
    }

    /// Raw message channel entry: decode, handle, encode.
    pub async fn on_message_json(&self, msg: Value, sender: &MessageSender) -> Value {
        let req: Request = match serde_json::from_value(msg) {
            Ok(req) => req,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable message");
                let err = ShieldError::BadRequest(format!("invalid request: {e}"));
                return reply_json(&Err(ErrorPayload::from(err)));
            }
        };
        reply_json(&self.on_message(req, sender).await)
    }

    pub async fn on_permissions_added(&self, origins: &[String]) -> Result<GrantOutcome> {
        self.inner.barrier.wait().await;
        let out = self.inner.reconciler.on_grant_added(origins).await;
        let outcome = match &out {
            Ok(GrantOutcome::Resynced { .. }) => "resynced",
            Ok(GrantOutcome::Upgraded { .. }) => "upgraded",
            Ok(GrantOutcome::NotApplicable) => "not_applicable",
            Ok(GrantOutcome::Stale) => "stale",
            Err(_) => "error",
        };
        self.inner
            .metrics
            .grant_events
            .inc(&[("event", "added"), ("outcome", outcome)]);
        if let Err(e) = &out {
            tracing::warn!(error = %e, "grant added handling failed");
        }
        out
    }

    pub async fn on_permissions_removed(&self) -> Result<bool> {
        self.inner.barrier.wait().await;
        let out = self.inner.reconciler.on_grant_revoked().await;
        let outcome = match &out {
            Ok(true) => "downgraded",
            Ok(false) => "unchanged",
            Err(_) => "error",
        };
        self.inner
            .metrics
            .grant_events
            .inc(&[("event", "removed"), ("outcome", outcome)]);
        if let Err(e) = &out {
            tracing::warn!(error = %e, "grant removed handling failed");
        }
        out
    }

    pub async fn on_command(&self, command: &str, tab_id: i64) -> Result<()> {
        self.inner.barrier.wait().await;
        let out = self
            .inner
            .commands
            .run(&self.inner.hosts, command, tab_id)
            .await;
        let outcome = if out.is_ok() { "ok" } else { "error" };
        self.inner
            .metrics
            .commands
            .inc(&[("command", command), ("outcome", outcome)]);
        if let Err(e) = &out {
            tracing::warn!(command, tab_id, error = %e, "command failed");
        }
        out
    }

    /// Status of the boot barrier, `None` until boot resolves it.
    pub fn boot_status(&self) -> Option<BootStatus> {
        self.inner.barrier.status()
    }

    pub fn cfg(&self) -> &AgentConfig {
        &self.inner.cfg
    }

    pub fn store(&self) -> Arc<ConfigStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn rules(&self) -> Arc<RuleLifecycle> {
        Arc::clone(&self.inner.rules)
    }

    pub fn reconciler(&self) -> Arc<PolicyReconciler> {
        Arc::clone(&self.inner.reconciler)
    }

    pub fn orchestrator(&self) -> &SessionOrchestrator {
        &self.inner.orchestrator
    }

    pub fn guard(&self) -> &CrashLoopGuard {
        &self.inner.guard
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Prometheus text plus a one-line summary of the boot barrier.
    pub fn render_metrics(&self) -> String {
        let mut out = self.inner.metrics.render();
        let ready = matches!(self.boot_status(), Some(BootStatus::Ready));
        out.push_str(&format!(
            "# TYPE shieldline_ready gauge\nshieldline_ready {}\n",
            u8::from(ready)
        ));
        out
    }

    /// Summary for logs and the demo binary.
    pub async fn describe(&self) -> Value {
        let cfg = self.inner.store.snapshot().await;
        json!({
            "version": self.inner.cfg.agent.version,
            "state": format!("{:?}", self.inner.orchestrator.state()),
            "defaultLevel": cfg.default_level,
            "enabledRuleSets": cfg.enabled_rule_sets,
            "perHostLevel": cfg.per_host_level,
            "firstRun": cfg.first_run,
        })
    }
}
