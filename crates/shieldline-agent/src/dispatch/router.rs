//! Two-tier request routing.
//!
//! Tier 1 requests act on the sending tab/frame only and are served without
//! an origin check; their failures are logged and never reported. Tier 2
//! requests read or mutate policy and require the sender origin to be our
//! own. Mutating tier-2 handlers persist first, then broadcast the delta,
//! then reply.

use std::sync::Arc;

use shieldline_core::error::{Result, ShieldError};
use shieldline_core::protocol::{
    ErrorPayload, LevelDetails, MessageSender, OptionsData, PopupData, Reply, Request, Response, StateDelta, Tier,
};
use shieldline_core::FilteringLevel;

use crate::config::{AgentSection, Flavor};
use crate::host::{FrameTarget, Hosts};
use crate::obs::AgentMetrics;
use crate::policy::{normalize_hostname, PolicyReconciler};
use crate::rules::RuleLifecycle;
use crate::scripting::InjectableRegistrar;
use crate::store::ConfigStore;

const PROCEDURAL_API_SCRIPT: &str = "/js/scripting/css-procedural-api.js";
const DEVELOPER_FEATURE: &str = "develop";

pub struct MessageRouter {
    flavor: Flavor,
    origin: String,
    store: Arc<ConfigStore>,
    hosts: Hosts,
    rules: Arc<RuleLifecycle>,
    reconciler: Arc<PolicyReconciler>,
    injectables: Arc<InjectableRegistrar>,
    metrics: Arc<AgentMetrics>,
}

impl MessageRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent: &AgentSection,
        store: Arc<ConfigStore>,
        hosts: Hosts,
        rules: Arc<RuleLifecycle>,
        reconciler: Arc<PolicyReconciler>,
        injectables: Arc<InjectableRegistrar>,
        metrics: Arc<AgentMetrics>,
    ) -> Self {
        Self {
            flavor: agent.flavor,
            origin: agent.normalized_origin(),
            store,
            hosts,
            rules,
            reconciler,
            injectables,
            metrics,
        }
    }

    /// Whether `sender` may issue tier-2 requests. Hosts that do not report
    /// an origin are let through.
    pub fn is_trusted(&self, sender: &MessageSender) -> bool {
        match &sender.origin {
            None => true,
            Some(origin) => origin.trim_end_matches('/').eq_ignore_ascii_case(&self.origin),
        }
    }

    pub async fn handle(&self, req: Request, sender: &MessageSender) -> Reply {
        let kind = req.kind();
        let tier = req.tier();
        self.metrics
            .messages
            .inc(&[("kind", kind), ("tier", tier.as_str())]);

        let out = match tier {
            Tier::Context => Ok(self.handle_context(req, sender).await),
            Tier::Trusted => {
                if !self.is_trusted(sender) {
                    self.metrics.untrusted_rejections.inc(&[("kind", kind)]);
                    tracing::warn!(kind, origin = ?sender.origin, "request from untrusted origin");
                    return Err(ErrorPayload::from(ShieldError::NotAllowed(format!(
                        "{kind}: untrusted origin"
                    ))));
                }
                self.handle_trusted(req).await
            }
        };

        out.map_err(|e| {
            let code = e.client_code().as_str();
            self.metrics
                .request_errors
                .inc(&[("kind", kind), ("code", code)]);
            tracing::debug!(kind, code, error = %e, "request failed");
            ErrorPayload::from(e)
        })
    }

    fn frame_target(&self, sender: &MessageSender) -> Option<FrameTarget> {
        Some(FrameTarget {
            tab_id: sender.tab_id?,
            frame_id: Some(sender.frame_id?),
        })
    }

    async fn handle_context(&self, req: Request, sender: &MessageSender) -> Response {
        match req {
            Request::InsertStyle { css } => {
                let Some(target) = self.frame_target(sender) else {
                    return Response::None;
                };
                // Sub-frame style injection is broken on this host.
                if self.flavor == Flavor::Safari && target.frame_id != Some(0) {
                    tracing::debug!(?target, "sub-frame style insertion skipped");
                    return Response::None;
                }
                let scripting = Arc::clone(&self.hosts.scripting);
                tokio::spawn(async move {
                    if let Err(e) = scripting.insert_css(target, &css).await {
                        tracing::warn!(?target, error = %e, "insert css failed");
                    }
                });
            }
            Request::RemoveStyle { css } => {
                let Some(target) = self.frame_target(sender) else {
                    return Response::None;
                };
                let scripting = Arc::clone(&self.hosts.scripting);
                tokio::spawn(async move {
                    if let Err(e) = scripting.remove_css(target, &css).await {
                        tracing::warn!(?target, error = %e, "remove css failed");
                    }
                });
            }
            Request::ToggleIcon => {
                let Some(tab_id) = sender.tab_id else {
                    return Response::None;
                };
                let tabs = Arc::clone(&self.hosts.tabs);
                tokio::spawn(async move {
                    if let Err(e) = tabs.toggle_icon(tab_id).await {
                        tracing::warn!(tab_id, error = %e, "icon toggle failed");
                    }
                });
            }
            Request::InjectProceduralApi => {
                let Some(target) = self.frame_target(sender) else {
                    return Response::None;
                };
                if let Err(e) = self
                    .hosts
                    .scripting
                    .execute_script(target, &[PROCEDURAL_API_SCRIPT])
                    .await
                {
                    tracing::warn!(?target, error = %e, "procedural api injection failed");
                }
            }
            other => {
                tracing::debug!(kind = other.kind(), "not a context request");
            }
        }
        Response::None
    }

    async fn handle_trusted(&self, req: Request) -> Result<Response> {
        match req {
            Request::ApplyRuleSets { enabled_rule_sets } => self.apply_rule_sets(&enabled_rule_sets).await,
            Request::GetDefaultLevel => Ok(Response::Level(self.reconciler.get_default_level().await)),
            Request::SetDefaultLevel { level } => self.set_default_level(level).await,
            Request::GetLevel { hostname } => Ok(Response::Level(self.reconciler.get_level(&hostname).await?)),
            Request::SetLevel { hostname, level } => self.set_level(&hostname, level).await,
            Request::GetLevelDetails => Ok(Response::LevelDetails(self.reconciler.level_details().await)),
            Request::SetLevelDetails { details } => self.set_level_details(&details).await,
            Request::RequestUpgrade {
                hostname,
                tab_id,
                url,
                level,
            } => {
                let generation = self
                    .reconciler
                    .request_upgrade(&hostname, tab_id, &url, level)
                    .await?;
                tracing::debug!(%hostname, tab_id, %level, generation, "upgrade pending");
                Ok(Response::None)
            }
            Request::ExcludeFromStrict { hostname, permanent } => {
                let hostname = normalize_hostname(&hostname)?;
                self.rules.exclude_from_strict(&hostname, permanent).await?;
                tracing::info!(%hostname, permanent, "strict block exclusion added");
                Ok(Response::None)
            }
            Request::GetOptionsData => self.options_data().await,
            Request::GetPopupData { hostname } => self.popup_data(&hostname).await,
            Request::GetRuleSetDetails => Ok(Response::RuleSetDetails(self.hosts.engine.catalog().await?)),
            Request::SetAutoReload { state } => {
                self.store.update(|cfg| cfg.auto_reload = state).await?;
                self.hosts.broadcaster.broadcast(StateDelta::AutoReload(state));
                Ok(Response::None)
            }
            Request::SetShowBlockedCount { state } => {
                self.store.update(|cfg| cfg.show_blocked_count = state).await?;
                if self.hosts.engine.supports_blocked_count() {
                    if let Err(e) = self.hosts.engine.set_blocked_count_badge(state).await {
                        tracing::warn!(error = %e, "blocked count badge not set");
                    }
                }
                self.hosts.broadcaster.broadcast(StateDelta::ShowBlockedCount(state));
                Ok(Response::None)
            }
            Request::SetStrictBlockMode { state } => {
                self.store.update(|cfg| cfg.strict_block_mode = state).await?;
                if let Err(e) = self.rules.refresh_session_rules().await {
                    tracing::warn!(error = %e, "session rule refresh failed");
                }
                self.hosts.broadcaster.broadcast(StateDelta::StrictBlockMode(state));
                Ok(Response::None)
            }
            Request::SetDeveloperMode { state } => self.set_developer_mode(state).await,
            Request::GotoUrl { url } => {
                self.hosts.tabs.open_url(&url).await?;
                Ok(Response::None)
            }
            Request::GetEffectiveDynamicRules => {
                Ok(Response::Rules(self.hosts.engine.effective_dynamic_rules().await?))
            }
            Request::GetEffectiveSessionRules => {
                Ok(Response::Rules(self.hosts.engine.effective_session_rules().await?))
            }
            other => Err(ShieldError::BadRequest(format!("{}: not a trusted request", other.kind()))),
        }
    }

    async fn apply_rule_sets(&self, ids: &[String]) -> Result<Response> {
        let result = self.rules.set_enabled_rule_sets(ids).await;
        if result.is_ok() {
            self.injectables.refresh().await;
        }
        // Listeners resync even when the request was refused.
        let enabled = self.store.snapshot().await.enabled_rule_sets;
        self.hosts
            .broadcaster
            .broadcast(StateDelta::EnabledRuleSets(enabled.into_iter().collect()));
        Ok(Response::RuleSets(result?))
    }

    async fn set_default_level(&self, level: FilteringLevel) -> Result<Response> {
        let (before, after) = self.reconciler.set_default_level(level).await?;
        if after != before {
            self.injectables.refresh().await;
            self.hosts.broadcaster.broadcast(StateDelta::DefaultLevel(after));
        }
        Ok(Response::Level(after))
    }

    async fn set_level(&self, hostname: &str, level: FilteringLevel) -> Result<Response> {
        let (before, after) = self.reconciler.set_level(hostname, level).await?;
        if after != before {
            self.injectables.refresh().await;
            self.hosts.broadcaster.broadcast(StateDelta::Level {
                hostname: normalize_hostname(hostname)?,
                level: after,
            });
        }
        Ok(Response::Level(after))
    }

    async fn set_level_details(&self, details: &LevelDetails) -> Result<Response> {
        let applied = self.reconciler.set_level_details(details).await?;
        self.injectables.refresh().await;
        self.hosts
            .broadcaster
            .broadcast(StateDelta::DefaultLevel(applied.default_level));
        Ok(Response::LevelDetails(applied))
    }

    async fn set_developer_mode(&self, state: bool) -> Result<Response> {
        if state && self.admin_disabled(DEVELOPER_FEATURE).await {
            return Err(ShieldError::NotAllowed("developer mode disabled by admin".into()));
        }
        let changed = self
            .store
            .update(|cfg| std::mem::replace(&mut cfg.developer_mode, state) != state)
            .await?;
        if changed {
            if let Err(e) = self.rules.recompile_dynamic_rules().await {
                tracing::warn!(error = %e, "user rules not refreshed");
            }
            if let Err(e) = self.hosts.runtime.set_developer_mode(state).await {
                tracing::warn!(error = %e, developer_mode = state, "developer mode not applied");
            }
        }
        self.hosts.broadcaster.broadcast(StateDelta::DeveloperMode(state));
        Ok(Response::None)
    }

    async fn admin_disabled(&self, feature: &str) -> bool {
        match self.hosts.admin.disabled_features().await {
            Ok(disabled) => disabled.iter().any(|f| f == feature),
            Err(e) => {
                tracing::warn!(error = %e, "admin disabled features unreadable");
                false
            }
        }
    }

    async fn disabled_features(&self) -> Vec<String> {
        self.hosts.admin.disabled_features().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "admin disabled features unreadable");
            Vec::new()
        })
    }

    async fn options_data(&self) -> Result<Response> {
        let (broad, catalog, enabled, admin, disabled_features) = futures_util::join!(
            self.reconciler.has_broad_grant(),
            self.hosts.engine.catalog(),
            self.hosts.engine.enabled_rule_sets(),
            self.hosts.admin.rule_set_overrides(),
            self.disabled_features(),
        );
        let mut enabled = enabled?;
        enabled.sort();
        let cfg = self.store.snapshot().await;
        Ok(Response::Options(Box::new(OptionsData {
            has_broad_grant: broad?,
            default_level: cfg.default_level,
            enabled_rule_sets: enabled,
            admin_rule_sets: admin.unwrap_or_default(),
            max_enabled_rule_sets: self.rules.max_enabled(),
            rule_set_details: catalog?,
            auto_reload: cfg.auto_reload,
            show_blocked_count: cfg.show_blocked_count,
            can_show_blocked_count: self.hosts.engine.supports_blocked_count(),
            strict_block_mode: cfg.strict_block_mode,
            first_run: cfg.first_run,
            developer_mode: cfg.developer_mode,
            disabled_features,
        })))
    }

    async fn popup_data(&self, hostname: &str) -> Result<Response> {
        let (broad, level, disabled_features) = futures_util::join!(
            self.reconciler.has_broad_grant(),
            self.reconciler.get_level(hostname),
            self.disabled_features(),
        );
        let cfg = self.store.snapshot().await;
        Ok(Response::Popup(PopupData {
            has_broad_grant: broad?,
            level: level?,
            auto_reload: cfg.auto_reload,
            developer_mode: cfg.developer_mode,
            disabled_features,
        }))
    }
}
