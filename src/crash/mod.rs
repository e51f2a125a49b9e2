// ProcessGuard - Crash Policy Engine
//
// Arbitrates whether a process may be restarted after a crash, and what
// side effects (disable, quarantine, cascade to dependents) a crash
// triggers. The per-process crash ring follows the same cap-then-compact
// shape as the alert history ring in `monitoring/alerts.rs`.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// Per-process crash ring cap.
pub const CRASH_RING_CAP: usize = 100;

#[derive(Debug, Clone)]
pub struct CrashRecord {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashAction {
    Restart,
    Disable,
    Quarantine,
    KillDependencies,
}

#[derive(Debug, Clone)]
pub struct CrashPolicy {
    pub max_crashes: u32,
    pub time_window_minutes: i64,
    pub action: CrashAction,
    pub quarantine_duration_minutes: i64,
}

impl Default for CrashPolicy {
    fn default() -> Self {
        Self {
            max_crashes: 5,
            time_window_minutes: 10,
            action: CrashAction::Disable,
            quarantine_duration_minutes: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrashStatistics {
    pub process_name: String,
    pub crashes_last_24h: u32,
    pub crashes_in_policy_window: u32,
    pub most_common_reason: Option<String>,
    pub disabled: bool,
    pub quarantined: bool,
    pub quarantine_expires_at: Option<DateTime<Utc>>,
    pub last_crash_at: Option<DateTime<Utc>>,
}

pub struct CrashPolicyEngine {
    rings: RwLock<HashMap<String, VecDeque<CrashRecord>>>,
    policies: RwLock<HashMap<String, CrashPolicy>>,
    disabled: RwLock<HashSet<String>>,
    quarantined: RwLock<HashMap<String, DateTime<Utc>>>,
    /// `depends_on -> dependents`, built up via `set_dependency`.
    dependents: RwLock<HashMap<String, Vec<String>>>,
}

impl CrashPolicyEngine {
    pub fn new() -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashSet::new()),
            quarantined: RwLock::new(HashMap::new()),
            dependents: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_policy(&self, name: &str, policy: CrashPolicy) {
        self.policies.write().await.insert(name.to_string(), policy);
    }

    /// Records that `name` depends on `depends_on`, so a `kill_dependencies`
    /// action against `depends_on` cascades to `name`.
    pub async fn set_dependency(&self, name: &str, depends_on: &str) {
        self.dependents
            .write()
            .await
            .entry(depends_on.to_string())
            .or_default()
            .push(name.to_string());
    }

    /// Records a crash and evaluates the configured policy, returning the
    /// action taken.
    pub async fn record_crash(
        &self,
        name: &str,
        reason: &str,
        exit_code: Option<i32>,
    ) -> CrashAction {
        let now = Utc::now();
        {
            let mut rings = self.rings.write().await;
            let ring = rings.entry(name.to_string()).or_default();
            ring.push_back(CrashRecord {
                timestamp: now,
                reason: reason.to_string(),
                exit_code,
            });
            while ring.len() > CRASH_RING_CAP {
                ring.pop_front();
            }
        }

        let policy = self
            .policies
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default();

        let recent = self.count_recent(name, policy.time_window_minutes).await;

        if recent < policy.max_crashes {
            return CrashAction::Restart;
        }

        match policy.action {
            CrashAction::Restart => CrashAction::Restart,
            CrashAction::Disable => {
                self.disabled.write().await.insert(name.to_string());
                CrashAction::Disable
            }
            CrashAction::Quarantine => {
                let expiry = now + chrono::Duration::minutes(policy.quarantine_duration_minutes);
                self.quarantined.write().await.insert(name.to_string(), expiry);
                CrashAction::Quarantine
            }
            CrashAction::KillDependencies => {
                self.disable_with_dependents(name).await;
                CrashAction::KillDependencies
            }
        }
    }

    /// Single-level-by-default closure over the dependents graph, disabling
    /// `name` and everything transitively downstream. A visited set makes
    /// the walk terminate even if the dependency graph has a cycle.
    async fn disable_with_dependents(&self, name: &str) {
        let mut visited = HashSet::new();
        let mut queue = vec![name.to_string()];
        let dependents = self.dependents.read().await;
        let mut disabled = self.disabled.write().await;

        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            disabled.insert(current.clone());
            if let Some(children) = dependents.get(&current) {
                for child in children {
                    if !visited.contains(child) {
                        queue.push(child.clone());
                    }
                }
            }
        }
    }

    async fn count_recent(&self, name: &str, window_minutes: i64) -> u32 {
        let rings = self.rings.read().await;
        let Some(ring) = rings.get(name) else {
            return 0;
        };
        let cutoff = Utc::now() - chrono::Duration::minutes(window_minutes);
        ring.iter().filter(|r| r.timestamp >= cutoff).count() as u32
    }

    /// Gate consulted before any restart attempt. Lazily reaps expired
    /// quarantine entries.
    pub async fn can_restart(&self, name: &str) -> (bool, Option<String>) {
        if self.disabled.read().await.contains(name) {
            return (false, Some(format!("process '{name}' is disabled")));
        }

        let mut quarantined = self.quarantined.write().await;
        if let Some(&expiry) = quarantined.get(name) {
            if Utc::now() < expiry {
                return (false, Some(format!("process '{name}' is quarantined until {expiry}")));
            }
            quarantined.remove(name);
        }

        (true, None)
    }

    pub async fn cleanup_expired_quarantines(&self) -> usize {
        let now = Utc::now();
        let mut quarantined = self.quarantined.write().await;
        let before = quarantined.len();
        quarantined.retain(|_, expiry| *expiry > now);
        before - quarantined.len()
    }

    pub async fn force_enable(&self, name: &str) {
        self.disabled.write().await.remove(name);
        self.quarantined.write().await.remove(name);
        self.rings.write().await.remove(name);
    }

    pub async fn reset_crash_history(&self, name: &str) {
        self.rings.write().await.remove(name);
    }

    pub async fn get_crash_statistics(&self, name: &str) -> CrashStatistics {
        let rings = self.rings.read().await;
        let ring = rings.get(name);

        let now = Utc::now();
        let day_cutoff = now - chrono::Duration::hours(24);
        let crashes_last_24h = ring
            .map(|r| r.iter().filter(|c| c.timestamp >= day_cutoff).count() as u32)
            .unwrap_or(0);

        let window_minutes = self
            .policies
            .read()
            .await
            .get(name)
            .map(|p| p.time_window_minutes)
            .unwrap_or_else(|| CrashPolicy::default().time_window_minutes);
        let crashes_in_policy_window = self.count_recent(name, window_minutes).await;

        let most_common_reason = ring.and_then(|r| {
            let mut counts: HashMap<&str, u32> = HashMap::new();
            for record in r {
                *counts.entry(record.reason.as_str()).or_insert(0) += 1;
            }
            counts
                .into_iter()
                .max_by_key(|(_, count)| *count)
                .map(|(reason, _)| reason.to_string())
        });

        let last_crash_at = ring.and_then(|r| r.back()).map(|r| r.timestamp);

        CrashStatistics {
            process_name: name.to_string(),
            crashes_last_24h,
            crashes_in_policy_window,
            most_common_reason,
            disabled: self.disabled.read().await.contains(name),
            quarantined: self.quarantined.read().await.contains_key(name),
            quarantine_expires_at: self.quarantined.read().await.get(name).copied(),
            last_crash_at,
        }
    }

    /// Aggregate report across every process that has ever crashed.
    pub async fn get_crash_report(&self) -> Vec<CrashStatistics> {
        let names: Vec<String> = self.rings.read().await.keys().cloned().collect();
        let mut report = Vec::with_capacity(names.len());
        for name in names {
            report.push(self.get_crash_statistics(&name).await);
        }
        report
    }
}

impl Default for CrashPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_restart_below_threshold() {
        let engine = CrashPolicyEngine::new();
        let action = engine.record_crash("worker", "unexpected_exit", Some(1)).await;
        assert_eq!(action, CrashAction::Restart);
        let (can, _) = engine.can_restart("worker").await;
        assert!(can);
    }

    #[tokio::test]
    async fn test_disable_after_threshold() {
        let engine = CrashPolicyEngine::new();
        engine
            .set_policy(
                "flapper",
                CrashPolicy {
                    max_crashes: 3,
                    ..CrashPolicy::default()
                },
            )
            .await;

        for _ in 0..3 {
            engine.record_crash("flapper", "unexpected_exit", Some(1)).await;
        }

        let (can, reason) = engine.can_restart("flapper").await;
        assert!(!can);
        assert!(reason.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_kill_dependencies_cascades() {
        let engine = CrashPolicyEngine::new();
        engine.set_dependency("worker-b", "worker-a").await;
        engine.set_dependency("worker-c", "worker-a").await;
        engine
            .set_policy(
                "worker-a",
                CrashPolicy {
                    max_crashes: 1,
                    action: CrashAction::KillDependencies,
                    ..CrashPolicy::default()
                },
            )
            .await;

        engine.record_crash("worker-a", "unexpected_exit", Some(1)).await;

        let (can_a, _) = engine.can_restart("worker-a").await;
        let (can_b, _) = engine.can_restart("worker-b").await;
        let (can_c, _) = engine.can_restart("worker-c").await;
        assert!(!can_a);
        assert!(!can_b);
        assert!(!can_c);
    }

    #[tokio::test]
    async fn test_force_enable_clears_disabled_and_ring() {
        let engine = CrashPolicyEngine::new();
        engine
            .set_policy(
                "flapper",
                CrashPolicy {
                    max_crashes: 1,
                    ..CrashPolicy::default()
                },
            )
            .await;
        engine.record_crash("flapper", "unexpected_exit", Some(1)).await;
        assert!(!engine.can_restart("flapper").await.0);

        engine.force_enable("flapper").await;
        assert!(engine.can_restart("flapper").await.0);
        let stats = engine.get_crash_statistics("flapper").await;
        assert_eq!(stats.crashes_last_24h, 0);
    }

    #[tokio::test]
    async fn test_quarantine_expires() {
        let engine = CrashPolicyEngine::new();
        engine
            .set_policy(
                "shaky",
                CrashPolicy {
                    max_crashes: 1,
                    action: CrashAction::Quarantine,
                    quarantine_duration_minutes: -1, // already expired, for a deterministic test
                    ..CrashPolicy::default()
                },
            )
            .await;
        engine.record_crash("shaky", "unexpected_exit", Some(1)).await;

        let (can, _) = engine.can_restart("shaky").await;
        assert!(can);
    }
}
