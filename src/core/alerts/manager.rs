//! Rule evaluation with sustained-condition hysteresis, rule management and
//! event history.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::notifier::{format_message, Notifier};
use super::rules::{builtin_rule, builtin_rules, preset, sustain_duration, validate_rule, RulePreset, PRESETS};
use super::store::AlertStore;
use super::types::*;
use crate::core::telemetry::hub::{AlertSink, MetricValues};
use crate::error::AlertError;
use crate::utils::format::format_elapsed;

/// Oldest events are evicted past this many.
pub const MAX_HISTORY: usize = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 1000;

/// `{unix-nanos}-{16 hex chars}`
pub fn new_event_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", nanos, &random[..16])
}

#[derive(Debug, Default)]
struct AlertState {
    config: AlertConfig,
    rules: HashMap<String, AlertRule>,
    states: HashMap<String, RuleState>,
    history: Vec<AlertEvent>,
}

impl AlertState {
    fn sorted_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    fn push_event(&mut self, event: AlertEvent) {
        self.history.push(event);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    fn fire(&mut self, rule: &AlertRule, value: f64, now: DateTime<Utc>) -> AlertEvent {
        let mut event = AlertEvent {
            id: new_event_id(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            metric: rule.metric.clone(),
            status: AlertStatus::Firing,
            severity: rule.severity,
            value,
            threshold: rule.threshold,
            operator: rule.operator,
            message: String::new(),
            fired_at: now,
            resolved_at: None,
            notified: false,
            notified_at: None,
        };
        event.message = format_message(&event);

        let state = self.states.entry(rule.id.clone()).or_default();
        state.firing = true;
        state.firing_event_id = Some(event.id.clone());
        self.push_event(event.clone());

        log::info!(
            "FIRING: {} ({:.2} {} {:.2})",
            rule.name,
            value,
            rule.operator,
            rule.threshold
        );
        event
    }

    /// Resolve the rule's firing event and return the copy to notify, if any.
    /// The runtime state is left idle either way.
    fn resolve(&mut self, rule_id: &str, value: f64, now: DateTime<Utc>) -> Option<AlertEvent> {
        let state = self.states.get_mut(rule_id)?;
        if !state.firing {
            return None;
        }
        let event_id = state.firing_event_id.take();
        state.firing = false;
        state.first_triggered = None;

        let rule_name = self
            .rules
            .get(rule_id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| rule_id.to_string());

        let event = event_id
            .as_deref()
            .and_then(|id| self.history.iter_mut().rev().find(|e| e.id == id));
        let Some(event) = event else {
            log::warn!(
                "Firing event for rule {} is no longer in history, resetting rule state",
                rule_id
            );
            return None;
        };

        event.status = AlertStatus::Resolved;
        event.resolved_at = Some(now);
        log::info!("RESOLVED: {} ({:.2})", rule_name, value);

        if !self.config.notify_on_resolved {
            return None;
        }
        let mut notice = event.clone();
        notice.value = value;
        notice.message = format_message(&notice);
        Some(notice)
    }

    /// Resolve if firing, then return the rule to idle.
    fn reset(&mut self, rule_id: &str, now: DateTime<Utc>) -> Option<AlertEvent> {
        let last = self.states.get(rule_id).map(|s| s.last_value).unwrap_or(0.0);
        let notice = self.resolve(rule_id, last, now);
        self.states.insert(rule_id.to_string(), RuleState::default());
        notice
    }

    /// Rebuild firing runtime state from persisted history: the newest firing
    /// event of each rule stays open, older ones are closed.
    fn restore_firing(&mut self, now: DateTime<Utc>) {
        let mut seen = HashSet::new();
        for event in self.history.iter_mut().rev() {
            if event.status != AlertStatus::Firing {
                continue;
            }
            let open = self.rules.get(&event.rule_id).is_some_and(|r| r.enabled);
            if !open || !seen.insert(event.rule_id.clone()) {
                event.status = AlertStatus::Resolved;
                event.resolved_at = Some(now);
                continue;
            }
            let state = self.states.entry(event.rule_id.clone()).or_default();
            state.firing = true;
            state.first_triggered = Some(event.fired_at);
            state.firing_event_id = Some(event.id.clone());
            state.last_value = event.value;
        }
    }
}

/// Work produced under the lock and carried out after it is released.
#[derive(Default)]
struct Followup {
    notify: Vec<AlertEvent>,
    save_history: bool,
}

struct Shared {
    state: RwLock<AlertState>,
    store: AlertStore,
    notifier: Notifier,
    history_write: Mutex<()>,
}

impl Shared {
    fn persist_rules(&self, rules: &[AlertRule]) {
        if let Err(e) = self.store.save_rules(rules) {
            log::warn!("Failed to save alert rules: {}", e);
        }
    }

    fn persist_history(&self) {
        let _guard = self.history_write.lock();
        let history = self.state.read().history.clone();
        if let Err(e) = self.store.save_history(&history) {
            log::warn!("Failed to save alert history: {}", e);
        }
    }

    fn mark_notified(&self, event_id: &str) {
        let mut state = self.state.write();
        if let Some(event) = state.history.iter_mut().rev().find(|e| e.id == event_id) {
            event.notified = true;
            event.notified_at = Some(Utc::now());
        }
    }

    async fn dispatch(self: Arc<Self>, event: AlertEvent) {
        let channels: Vec<NotificationChannel> = self
            .state
            .read()
            .config
            .channels
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();

        let mut failed = 0;
        for channel in &channels {
            if let Err(e) = self.notifier.send(&event, channel).await {
                failed += 1;
                log::warn!("Failed to notify via {}: {}", channel.kind, e);
            }
        }

        if channels.is_empty() || failed < channels.len() {
            self.mark_notified(&event.id);
            let shared = Arc::clone(&self);
            let _ = tokio::task::spawn_blocking(move || shared.persist_history()).await;
        }
    }
}

/// Evaluates rules against metric values and owns the alert documents.
/// Clones share the same state.
#[derive(Clone)]
pub struct AlertManager {
    shared: Arc<Shared>,
}

impl AlertManager {
    /// Load config, rules and history from `data_dir`. Unreadable documents
    /// are logged and replaced by defaults.
    pub fn open<P: Into<PathBuf>>(data_dir: P) -> Self {
        let store = AlertStore::new(data_dir);
        let mut state = AlertState::default();

        state.config = match store.load_config() {
            Ok(Some(config)) => config,
            Ok(None) => AlertConfig::default(),
            Err(e) => {
                log::warn!("Failed to load alert config: {}, using defaults", e);
                AlertConfig::default()
            }
        };

        let loaded = match store.load_rules() {
            Ok(rules) => rules,
            Err(e) => {
                log::warn!("Failed to load alert rules: {}, using builtins", e);
                None
            }
        };
        for rule in loaded.unwrap_or_default() {
            state.rules.insert(rule.id.clone(), rule);
        }
        for builtin in builtin_rules() {
            state.rules.entry(builtin.id.clone()).or_insert(builtin);
        }
        for id in state.rules.keys() {
            state.states.insert(id.clone(), RuleState::default());
        }

        match store.load_history() {
            Ok(history) => state.history = history.unwrap_or_default(),
            Err(e) => log::warn!("Failed to load alert history: {}", e),
        }
        if state.history.len() > MAX_HISTORY {
            let excess = state.history.len() - MAX_HISTORY;
            state.history.drain(..excess);
        }
        state.restore_firing(Utc::now());

        log::info!(
            "Alert engine initialized with {} rules, {} history events",
            state.rules.len(),
            state.history.len()
        );

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                store,
                notifier: Notifier::new(),
                history_write: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &AlertStore {
        &self.shared.store
    }

    /// Evaluate every enabled rule against `metrics` at `now`.
    pub fn check_at(&self, metrics: &HashMap<String, f64>, now: DateTime<Utc>) {
        let mut followup = Followup::default();
        {
            let mut state = self.shared.state.write();
            if !state.config.enabled {
                return;
            }

            for rule in state.sorted_rules() {
                if !rule.enabled {
                    continue;
                }
                let Some(&value) = metrics.get(&rule.metric) else {
                    continue;
                };

                let runtime = state.states.entry(rule.id.clone()).or_default();
                runtime.last_value = value;

                if rule.operator.evaluate(value, rule.threshold) {
                    match runtime.first_triggered {
                        None => runtime.first_triggered = Some(now),
                        Some(first) => {
                            let held = now.signed_duration_since(first).to_std().unwrap_or_default();
                            if !runtime.firing && held >= sustain_duration(&rule) {
                                let event = state.fire(&rule, value, now);
                                followup.notify.push(event);
                                followup.save_history = true;
                            }
                        }
                    }
                } else {
                    if runtime.firing {
                        if let Some(notice) = state.resolve(&rule.id, value, now) {
                            followup.notify.push(notice);
                        }
                        followup.save_history = true;
                    }
                    if let Some(runtime) = state.states.get_mut(&rule.id) {
                        runtime.first_triggered = None;
                        runtime.firing = false;
                    }
                }
            }
        }
        self.run(followup);
    }

    fn run(&self, followup: Followup) {
        if followup.notify.is_empty() && !followup.save_history {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            if followup.save_history {
                self.shared.persist_history();
            }
            if !followup.notify.is_empty() {
                log::debug!("No async runtime, {} notifications skipped", followup.notify.len());
            }
            return;
        };

        if followup.save_history {
            let shared = Arc::clone(&self.shared);
            handle.spawn_blocking(move || shared.persist_history());
        }
        for event in followup.notify {
            handle.spawn(Arc::clone(&self.shared).dispatch(event));
        }
    }

    /// Runtime state of one rule.
    pub fn rule_state(&self, id: &str) -> Option<RuleState> {
        self.shared.state.read().states.get(id).cloned()
    }

    pub fn config(&self) -> AlertConfig {
        self.shared.state.read().config.clone()
    }

    pub fn update_config(&self, config: AlertConfig) {
        self.shared.state.write().config = config.clone();
        if let Err(e) = self.shared.store.save_config(&config) {
            log::warn!("Failed to save alert config: {}", e);
        }
    }

    /// All rules sorted by id.
    pub fn rules(&self) -> Vec<AlertRule> {
        self.shared.state.read().sorted_rules()
    }

    pub fn rule(&self, id: &str) -> Result<AlertRule, AlertError> {
        self.shared
            .state
            .read()
            .rules
            .get(id)
            .cloned()
            .ok_or(AlertError::RuleNotFound)
    }

    pub fn presets(&self) -> &'static [RulePreset] {
        &PRESETS
    }

    /// Apply `change` under the write lock, then persist rules and run any
    /// resulting notifications.
    fn mutate<T, F>(&self, change: F) -> Result<T, AlertError>
    where
        F: FnOnce(&mut AlertState, &mut Followup) -> Result<T, AlertError>,
    {
        let mut followup = Followup::default();
        let (result, rules) = {
            let mut state = self.shared.state.write();
            let result = change(&mut state, &mut followup)?;
            (result, state.sorted_rules())
        };
        self.shared.persist_rules(&rules);
        self.run(followup);
        Ok(result)
    }

    pub fn create_rule(&self, mut rule: AlertRule) -> Result<AlertRule, AlertError> {
        validate_rule(&rule)?;
        self.mutate(|state, _| {
            if state.rules.contains_key(&rule.id) {
                return Err(AlertError::RuleExists);
            }
            let now = Utc::now();
            rule.created_at = now;
            rule.updated_at = now;
            rule.builtin = false;
            state.states.insert(rule.id.clone(), RuleState::default());
            state.rules.insert(rule.id.clone(), rule.clone());
            Ok(rule)
        })
    }

    /// Replace a rule's definition, keeping its id, builtin flag and creation time.
    pub fn update_rule(&self, id: &str, mut updates: AlertRule) -> Result<AlertRule, AlertError> {
        self.mutate(|state, followup| {
            let existing = state.rules.get(id).ok_or(AlertError::RuleNotFound)?;
            if existing.builtin && !updates.id.is_empty() && updates.id != id {
                return Err(AlertError::BuiltinRule);
            }
            updates.id = id.to_string();
            updates.builtin = existing.builtin;
            updates.created_at = existing.created_at;
            updates.updated_at = Utc::now();
            validate_rule(&updates)?;

            state.rules.insert(id.to_string(), updates.clone());
            if !updates.enabled {
                followup.save_history = true;
                followup.notify.extend(state.reset(id, Utc::now()));
            }
            Ok(updates)
        })
    }

    /// Remove a rule. Builtin rules are reset to their defaults instead.
    pub fn delete_rule(&self, id: &str) -> Result<(), AlertError> {
        self.mutate(|state, followup| {
            let builtin = state.rules.get(id).ok_or(AlertError::RuleNotFound)?.builtin;
            followup.save_history = true;
            followup.notify.extend(state.reset(id, Utc::now()));

            match builtin_rule(id).filter(|_| builtin) {
                Some(default) => {
                    state.rules.insert(id.to_string(), default);
                }
                None => {
                    state.rules.remove(id);
                    state.states.remove(id);
                }
            }
            Ok(())
        })
    }

    pub fn enable_rule(&self, id: &str) -> Result<AlertRule, AlertError> {
        self.mutate(|state, _| {
            let rule = state.rules.get_mut(id).ok_or(AlertError::RuleNotFound)?;
            rule.enabled = true;
            rule.updated_at = Utc::now();
            Ok(rule.clone())
        })
    }

    /// Disable a rule; a firing rule is resolved with its last observed value.
    pub fn disable_rule(&self, id: &str) -> Result<AlertRule, AlertError> {
        self.mutate(|state, followup| {
            let rule = state.rules.get_mut(id).ok_or(AlertError::RuleNotFound)?;
            rule.enabled = false;
            rule.updated_at = Utc::now();
            let rule = rule.clone();
            followup.save_history = true;
            followup.notify.extend(state.reset(id, Utc::now()));
            Ok(rule)
        })
    }

    /// Enable every rule of a preset; returns how many rules it touched.
    pub fn enable_preset(&self, preset_id: &str) -> Result<usize, AlertError> {
        let preset = preset(preset_id).ok_or_else(|| AlertError::PresetNotFound(preset_id.to_string()))?;
        self.mutate(|state, _| {
            let now = Utc::now();
            let mut touched = 0;
            for id in preset.rule_ids {
                if let Some(rule) = state.rules.get_mut(*id) {
                    rule.enabled = true;
                    rule.updated_at = now;
                    touched += 1;
                }
            }
            Ok(touched)
        })
    }

    pub fn disable_all(&self) -> Result<(), AlertError> {
        self.mutate(|state, followup| {
            let now = Utc::now();
            let ids: Vec<String> = state.rules.keys().cloned().collect();
            for id in ids {
                if let Some(rule) = state.rules.get_mut(&id) {
                    rule.enabled = false;
                    rule.updated_at = now;
                }
                followup.notify.extend(state.reset(&id, now));
            }
            followup.save_history = true;
            Ok(())
        })
    }

    /// Filtered history, newest first, one page at a time.
    pub fn history(&self, query: &HistoryQuery) -> PaginatedHistory {
        let state = self.shared.state.read();
        let mut events: Vec<AlertEvent> = state
            .history
            .iter()
            .rev()
            .filter(|e| query.rule_id.as_deref().map_or(true, |id| id.is_empty() || e.rule_id == id))
            .filter(|e| query.status.map_or(true, |s| e.status == s))
            .filter(|e| query.severity.map_or(true, |s| e.severity == s))
            .filter(|e| query.since.map_or(true, |since| e.fired_at >= since))
            .filter(|e| query.until.map_or(true, |until| e.fired_at <= until))
            .cloned()
            .collect();
        drop(state);
        events.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));

        let total = events.len();
        let limit = match query.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let start = query.offset.min(total);
        let end = start.saturating_add(limit).min(total);

        PaginatedHistory {
            events: events.drain(start..end).collect(),
            total,
            page: query.offset / limit + 1,
            page_size: limit,
            total_pages: total.div_ceil(limit),
        }
    }

    /// Firing events, newest first.
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        let now = Utc::now();
        let mut active: Vec<ActiveAlert> = self
            .shared
            .state
            .read()
            .history
            .iter()
            .filter(|e| e.status == AlertStatus::Firing)
            .map(|e| ActiveAlert {
                event: e.clone(),
                duration: format_elapsed(now.signed_duration_since(e.fired_at).num_seconds()),
            })
            .collect();
        active.sort_by(|a, b| b.event.fired_at.cmp(&a.event.fired_at));
        active
    }

    pub fn summary(&self) -> AlertSummary {
        let midnight = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|t| t.and_local_timezone(Local).earliest())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let state = self.shared.state.read();
        AlertSummary {
            total_rules: state.rules.len(),
            enabled_rules: state.rules.values().filter(|r| r.enabled).count(),
            firing_alerts: state
                .history
                .iter()
                .filter(|e| e.status == AlertStatus::Firing)
                .count(),
            today_events: state.history.iter().filter(|e| e.fired_at >= midnight).count(),
        }
    }

    /// Send a synthetic event through the first channel of `kind`.
    pub async fn test_notification(&self, kind: &str) -> Result<(), AlertError> {
        let channel = self
            .shared
            .state
            .read()
            .config
            .channels
            .iter()
            .find(|c| c.kind == kind)
            .cloned()
            .ok_or_else(|| AlertError::ChannelNotConfigured(kind.to_string()))?;

        let mut event = AlertEvent {
            id: format!("test-{}", new_event_id()),
            rule_id: "test".to_string(),
            rule_name: "Test Alert".to_string(),
            metric: "cpu".to_string(),
            status: AlertStatus::Firing,
            severity: Severity::Warning,
            value: 50.0,
            threshold: 80.0,
            operator: Operator::Gt,
            message: String::new(),
            fired_at: Utc::now(),
            resolved_at: None,
            notified: false,
            notified_at: None,
        };
        event.message = "This is a test alert from opswatch".to_string();
        self.shared.notifier.send(&event, &channel).await
    }
}

impl AlertSink for AlertManager {
    fn check(&self, metrics: &MetricValues) {
        self.check_at(metrics, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn metrics(cpu: f64) -> HashMap<String, f64> {
        HashMap::from([("cpu".to_string(), cpu)])
    }

    fn enabled_manager(dir: &TempDir) -> AlertManager {
        let manager = AlertManager::open(dir.path());
        manager.update_config(AlertConfig {
            enabled: true,
            ..AlertConfig::default()
        });
        manager
    }

    #[test]
    fn test_event_id_format() {
        let id = new_event_id();
        let (nanos, hex) = id.split_once('-').unwrap();
        assert!(nanos.parse::<i64>().is_ok());
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_open_seeds_builtins() {
        let dir = TempDir::new().unwrap();
        let manager = AlertManager::open(dir.path());
        assert_eq!(manager.rules().len(), 8);
        assert!(!manager.config().enabled);
        assert!(manager.rules().iter().all(|r| r.builtin && !r.enabled));
    }

    #[test]
    fn test_disabled_config_ignores_metrics() {
        let dir = TempDir::new().unwrap();
        let manager = AlertManager::open(dir.path());
        manager.enable_rule("cpu_high").unwrap();
        manager.check_at(&metrics(99.0), Utc::now());
        assert!(manager.rule_state("cpu_high").unwrap().is_idle());
    }

    #[test]
    fn test_pending_then_idle() {
        let dir = TempDir::new().unwrap();
        let manager = enabled_manager(&dir);
        manager.enable_rule("cpu_high").unwrap();

        let t0 = Utc::now();
        manager.check_at(&metrics(95.0), t0);
        let state = manager.rule_state("cpu_high").unwrap();
        assert_eq!(state.first_triggered, Some(t0));
        assert!(!state.firing);

        manager.check_at(&metrics(50.0), t0 + ChronoDuration::seconds(30));
        let state = manager.rule_state("cpu_high").unwrap();
        assert!(state.is_idle());
        assert_eq!(state.last_value, 50.0);
        assert_eq!(manager.history(&HistoryQuery::default()).total, 0);
    }

    #[test]
    fn test_fire_and_resolve_without_runtime() {
        let dir = TempDir::new().unwrap();
        let manager = enabled_manager(&dir);
        manager.enable_rule("cpu_high").unwrap();

        let t0 = Utc::now();
        manager.check_at(&metrics(95.0), t0);
        manager.check_at(&metrics(96.0), t0 + ChronoDuration::seconds(60));
        let active = manager.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].event.value, 96.0);
        assert_eq!(active[0].event.message, "FIRING [critical] CPU High Usage: 96.00% > 90.00%");

        // Still firing: no second event.
        manager.check_at(&metrics(97.0), t0 + ChronoDuration::seconds(90));
        assert_eq!(manager.history(&HistoryQuery::default()).total, 1);

        manager.check_at(&metrics(10.0), t0 + ChronoDuration::seconds(120));
        let history = manager.history(&HistoryQuery::default());
        assert_eq!(history.events[0].status, AlertStatus::Resolved);
        assert!(history.events[0].resolved_at.unwrap() >= history.events[0].fired_at);
        assert!(manager.rule_state("cpu_high").unwrap().is_idle());

        // Persisted inline when no runtime is around.
        let saved = manager.store().load_history().unwrap().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].status, AlertStatus::Resolved);
    }

    #[test]
    fn test_disable_firing_rule_resolves() {
        let dir = TempDir::new().unwrap();
        let manager = enabled_manager(&dir);
        manager.enable_rule("cpu_high").unwrap();
        let t0 = Utc::now();
        manager.check_at(&metrics(95.0), t0);
        manager.check_at(&metrics(95.0), t0 + ChronoDuration::seconds(61));
        assert_eq!(manager.summary().firing_alerts, 1);

        manager.disable_rule("cpu_high").unwrap();
        assert_eq!(manager.summary().firing_alerts, 0);
        assert!(manager.rule_state("cpu_high").unwrap().is_idle());
    }

    #[test]
    fn test_history_bounded() {
        let mut state = AlertState::default();
        let rule = builtin_rule("cpu_high").unwrap();
        let t0 = Utc::now();
        for i in 0..(MAX_HISTORY + 5) {
            state.fire(&rule, i as f64, t0);
            state.resolve(&rule.id, 0.0, t0);
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].value, 5.0);
        assert!(state.history.iter().all(|e| e.status == AlertStatus::Resolved));
    }

    #[test]
    fn test_evicted_firing_event_resets_state() {
        let dir = TempDir::new().unwrap();
        let manager = enabled_manager(&dir);
        manager.enable_rule("cpu_high").unwrap();
        let t0 = Utc::now();
        manager.check_at(&metrics(95.0), t0);
        manager.check_at(&metrics(95.0), t0 + ChronoDuration::seconds(60));

        manager.shared.state.write().history.clear();
        manager.check_at(&metrics(5.0), t0 + ChronoDuration::seconds(70));
        assert!(manager.rule_state("cpu_high").unwrap().is_idle());
        assert_eq!(manager.history(&HistoryQuery::default()).total, 0);
    }

    #[test]
    fn test_rule_management_errors() {
        let dir = TempDir::new().unwrap();
        let manager = AlertManager::open(dir.path());

        assert_eq!(manager.rule("missing"), Err(AlertError::RuleNotFound));
        assert_eq!(
            manager.create_rule(builtin_rule("cpu_high").unwrap()),
            Err(AlertError::RuleExists)
        );
        assert_eq!(
            manager.enable_preset("extreme"),
            Err(AlertError::PresetNotFound("extreme".into()))
        );

        let mut renamed = builtin_rule("cpu_high").unwrap();
        renamed.id = "cpu_renamed".into();
        assert_eq!(
            manager.update_rule("cpu_high", renamed),
            Err(AlertError::BuiltinRule)
        );
    }

    #[test]
    fn test_delete_builtin_resets_to_default() {
        let dir = TempDir::new().unwrap();
        let manager = AlertManager::open(dir.path());
        let mut rule = manager.rule("cpu_high").unwrap();
        rule.threshold = 42.0;
        rule.enabled = true;
        manager.update_rule("cpu_high", rule).unwrap();
        assert_eq!(manager.rule("cpu_high").unwrap().threshold, 42.0);

        manager.delete_rule("cpu_high").unwrap();
        let reset = manager.rule("cpu_high").unwrap();
        assert_eq!(reset.threshold, 90.0);
        assert!(!reset.enabled);
    }

    #[test]
    fn test_reopen_restores_firing_state() {
        let dir = TempDir::new().unwrap();
        {
            let manager = enabled_manager(&dir);
            manager.enable_rule("cpu_high").unwrap();
            let t0 = Utc::now();
            manager.check_at(&metrics(95.0), t0);
            manager.check_at(&metrics(95.0), t0 + ChronoDuration::seconds(60));
        }
        let manager = AlertManager::open(dir.path());
        let state = manager.rule_state("cpu_high").unwrap();
        assert!(state.firing);
        assert!(manager.config().enabled);

        manager.check_at(&metrics(1.0), Utc::now() + ChronoDuration::seconds(120));
        assert_eq!(manager.summary().firing_alerts, 0);
    }

    #[test]
    fn test_history_query_filters_and_pages() {
        let dir = TempDir::new().unwrap();
        let manager = enabled_manager(&dir);
        manager.enable_preset("standard").unwrap();

        let t0 = Utc::now();
        let mut values = HashMap::from([("cpu".to_string(), 95.0), ("memory".to_string(), 95.0)]);
        manager.check_at(&values, t0);
        manager.check_at(&values, t0 + ChronoDuration::seconds(130));
        values.insert("cpu".to_string(), 10.0);
        manager.check_at(&values, t0 + ChronoDuration::seconds(140));

        let all = manager.history(&HistoryQuery::default());
        assert_eq!(all.total, 4);

        let cpu = manager.history(&HistoryQuery {
            rule_id: Some("cpu_high".into()),
            ..Default::default()
        });
        assert_eq!(cpu.total, 1);

        let firing = manager.history(&HistoryQuery {
            status: Some(AlertStatus::Firing),
            ..Default::default()
        });
        assert!(firing.events.iter().all(|e| e.metric == "memory"));
        assert_eq!(firing.total, 2);

        let page = manager.history(&HistoryQuery {
            limit: 3,
            offset: 3,
            ..Default::default()
        });
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.page, 2);
        assert_eq!(page.total_pages, 2);

        let summary = manager.summary();
        assert_eq!(summary.enabled_rules, 6);
        assert_eq!(summary.firing_alerts, 2);
        assert_eq!(summary.today_events, 4);
    }

    #[test]
    fn test_history_huge_limit_is_capped() {
        let dir = TempDir::new().unwrap();
        let manager = enabled_manager(&dir);
        manager.enable_rule("cpu_high").unwrap();

        let t0 = Utc::now();
        let values = HashMap::from([("cpu".to_string(), 95.0)]);
        manager.check_at(&values, t0);
        manager.check_at(&values, t0 + ChronoDuration::seconds(61));

        let page = manager.history(&HistoryQuery {
            limit: usize::MAX,
            offset: 1,
            ..Default::default()
        });
        assert_eq!(page.total, 1);
        assert!(page.events.is_empty());
        assert_eq!(page.page_size, MAX_PAGE_SIZE);

        let page = manager.history(&HistoryQuery {
            limit: usize::MAX,
            offset: usize::MAX,
            ..Default::default()
        });
        assert!(page.events.is_empty());
        assert_eq!(page.total_pages, 1);
    }

    #[tokio::test]
    async fn test_notification_requires_channel() {
        let dir = TempDir::new().unwrap();
        let manager = AlertManager::open(dir.path());
        assert_eq!(
            manager.test_notification("webhook").await,
            Err(AlertError::ChannelNotConfigured("webhook".into()))
        );

        manager.update_config(AlertConfig {
            channels: vec![NotificationChannel {
                kind: "dashboard".into(),
                enabled: true,
                config: Default::default(),
            }],
            ..AlertConfig::default()
        });
        assert_eq!(manager.test_notification("dashboard").await, Ok(()));
    }
}
