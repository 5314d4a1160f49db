//! Structured gate artifact and the per-request decision procedure.
//!
//! The compiler turns one [`Outage`] plus the resolved allow-list into a
//! [`GatePolicy`], serialized to a small JSON document. The host loads it back
//! into a [`Gate`] and calls [`Gate::decide`] on every request. Features that
//! are not configured are absent from the document and treated as passing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

use crate::ip_list::AllowList;
use crate::outage::Outage;

pub const GATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate artifact is not valid: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported gate artifact version {0}")]
    UnsupportedVersion(u32),
    #[error("gate window is empty")]
    EmptyWindow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPolicy {
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    pub access_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub version: u32,
    pub outage_id: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub starts_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub stops_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_policy: Option<IpPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_policy: Option<KeyPolicy>,
}

impl GatePolicy {
    /// `allowed_ips` is the resolved list (own entries then forced ones).
    pub fn compile(outage: &Outage, allowed_ips: &[String]) -> Self {
        let allowed: Vec<String> = allowed_ips
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();

        let ip_policy = (!allowed.is_empty()).then_some(IpPolicy { allowed });
        let key_policy = outage
            .access_key
            .as_ref()
            .map(|key| KeyPolicy {
                access_key: key.clone(),
            });

        Self {
            version: GATE_FORMAT_VERSION,
            outage_id: outage.id,
            starts_at: outage.start_time,
            stops_at: outage.stop_time,
            ip_policy,
            key_policy,
        }
    }

    pub fn has_ip_policy(&self) -> bool {
        self.ip_policy.is_some()
    }

    pub fn has_key_policy(&self) -> bool {
        self.key_policy.is_some()
    }

    /// A policy without any check never blocks anyone.
    pub fn has_checks(&self) -> bool {
        self.has_ip_policy() || self.has_key_policy()
    }

    pub fn to_artifact(&self) -> Result<String, GateError> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    pub fn from_artifact(text: &str) -> Result<Self, GateError> {
        let policy: GatePolicy = serde_json::from_str(text)?;
        if policy.version != GATE_FORMAT_VERSION {
            return Err(GateError::UnsupportedVersion(policy.version));
        }
        if policy.starts_at >= policy.stops_at {
            return Err(GateError::EmptyWindow);
        }
        Ok(policy)
    }
}

/// What the host knows about the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Caller<'a> {
    pub ip: Option<IpAddr>,
    /// Live parameter key if given, else the remembered one.
    pub access_key: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Passed,
    Failed,
}

impl Check {
    fn from_pass(pass: bool) -> Self {
        if pass { Check::Passed } else { Check::Failed }
    }

    pub fn failed(self) -> bool {
        self == Check::Failed
    }
}

/// Outcome of each compiled-in check; `None` means the feature is not compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checks {
    pub ip: Option<Check>,
    pub key: Option<Check>,
}

impl Checks {
    pub fn blocked(&self) -> bool {
        self.ip.is_some_and(Check::failed) || self.key.is_some_and(Check::failed)
    }

    /// One line per compiled-in check, for diagnostic execution.
    pub fn diagnostics(&self, caller: &Caller<'_>) -> Vec<String> {
        let shown_ip = caller
            .ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        let mut lines = Vec::new();
        match self.ip {
            Some(Check::Failed) => lines.push(format!("<!-- Blocked by ip, your ip: {} -->", shown_ip)),
            Some(Check::Passed) => lines.push(format!("<!-- Your IP is allowed: {} -->", shown_ip)),
            None => {}
        }
        match self.key {
            Some(Check::Failed) => {
                lines.push("<!-- Blocked by missing or incorrect access key -->".to_string())
            }
            Some(Check::Passed) => lines.push("<!-- Your access key is allowed -->".to_string()),
            None => {}
        }
        lines
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Now is outside `[starts_at, stops_at)`.
    OutsideWindow,
    Allowed(Checks),
    Blocked(Checks),
}

impl GateDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GateDecision::Blocked(_))
    }
}

/// A loaded gate, ready for evaluation on the request path.
#[derive(Debug, Clone)]
pub struct Gate {
    policy: GatePolicy,
    allow_list: Option<AllowList>,
}

impl Gate {
    pub fn new(policy: GatePolicy) -> Self {
        let allow_list = policy
            .ip_policy
            .as_ref()
            .map(|p| AllowList::parse(p.allowed.iter().map(String::as_str)));
        Self { policy, allow_list }
    }

    pub fn from_artifact(text: &str) -> Result<Self, GateError> {
        GatePolicy::from_artifact(text).map(Self::new)
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.policy.starts_at <= now && now < self.policy.stops_at
    }

    /// True only when a key policy exists and `key` equals it.
    pub fn key_matches(&self, key: &str) -> bool {
        self.policy
            .key_policy
            .as_ref()
            .is_some_and(|p| p.access_key == key)
    }

    pub fn checks(&self, caller: &Caller<'_>) -> Checks {
        let ip = self.allow_list.as_ref().map(|list| {
            Check::from_pass(caller.ip.is_some_and(|ip| list.contains(ip)))
        });
        let key = self.policy.key_policy.as_ref().map(|p| {
            Check::from_pass(caller.access_key == Some(p.access_key.as_str()))
        });
        Checks { ip, key }
    }

    pub fn decide(&self, now: DateTime<Utc>, caller: &Caller<'_>) -> GateDecision {
        if !self.in_window(now) {
            return GateDecision::OutsideWindow;
        }
        let checks = self.checks(caller);
        if checks.blocked() {
            GateDecision::Blocked(checks)
        } else {
            GateDecision::Allowed(checks)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outage::tests::{at, outage};

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn gate(ips: &[&str], key: Option<&str>) -> Gate {
        let mut o = outage(1, 100, 123, 456);
        o.access_key = key.map(str::to_string);
        let ips: Vec<String> = ips.iter().map(|s| s.to_string()).collect();
        Gate::new(GatePolicy::compile(&o, &ips))
    }

    #[test]
    fn decision_table_covers_every_feature_combination() {
        let member = ip("10.0.0.1");
        let stranger = ip("9.9.9.9");
        // (ips, key, caller ip, caller key, blocked)
        let cases: [(&[&str], Option<&str>, Option<IpAddr>, Option<&str>, bool); 8] = [
            (&[], None, stranger, None, false),
            (&[], None, stranger, Some("x"), false),
            (&["10.0.0.1"], None, member, None, false),
            (&["10.0.0.1"], None, stranger, None, true),
            (&[], Some("k"), stranger, Some("k"), false),
            (&[], Some("k"), member, Some("x"), true),
            (&["10.0.0.1"], Some("k"), member, Some("k"), false),
            (&["10.0.0.1"], Some("k"), member, Some("x"), true),
        ];
        for (ips, key, caller_ip, caller_key, blocked) in cases {
            let caller = Caller {
                ip: caller_ip,
                access_key: caller_key,
            };
            let decision = gate(ips, key).decide(at(200), &caller);
            assert_eq!(decision.is_blocked(), blocked, "{:?} {:?} {:?} {:?}", ips, key, caller_ip, caller_key);
        }
    }

    #[test]
    fn either_failing_check_blocks_when_both_are_compiled() {
        let g = gate(&["10.0.0.1"], Some("k"));
        let wrong_ip = Caller { ip: ip("9.9.9.9"), access_key: Some("k") };
        assert_eq!(
            g.decide(at(200), &wrong_ip),
            GateDecision::Blocked(Checks { ip: Some(Check::Failed), key: Some(Check::Passed) })
        );
    }

    #[test]
    fn scenario_member_with_key_passes_and_stranger_fails_both_checks() {
        let g = gate(&["10.1.2.3", "172.16.0.0/20"], Some("12345"));

        let operator = Caller { ip: ip("10.1.2.3"), access_key: Some("12345") };
        assert!(!g.decide(at(200), &operator).is_blocked());

        let stranger = Caller { ip: ip("9.9.9.9"), access_key: Some("wrong") };
        let GateDecision::Blocked(checks) = g.decide(at(200), &stranger) else {
            panic!("stranger must be blocked");
        };
        let lines = checks.diagnostics(&stranger);
        assert!(lines.contains(&"<!-- Blocked by ip, your ip: 9.9.9.9 -->".to_string()));
        assert!(lines.contains(&"<!-- Blocked by missing or incorrect access key -->".to_string()));
    }

    #[test]
    fn key_only_policy_blocks_caller_without_key() {
        let g = gate(&[], Some("12345"));
        let caller = Caller { ip: ip("127.0.0.1"), access_key: None };
        let GateDecision::Blocked(checks) = g.decide(at(200), &caller) else {
            panic!("caller without key must be blocked");
        };
        assert_eq!(checks.ip, None);
        assert_eq!(checks.key, Some(Check::Failed));
        assert_eq!(
            checks.diagnostics(&caller),
            vec!["<!-- Blocked by missing or incorrect access key -->".to_string()]
        );
    }

    #[test]
    fn nothing_is_blocked_outside_the_window() {
        let g = gate(&["10.0.0.1"], Some("k"));
        let caller = Caller::default();
        assert_eq!(g.decide(at(122), &caller), GateDecision::OutsideWindow);
        assert_eq!(g.decide(at(456), &caller), GateDecision::OutsideWindow);
        assert!(g.decide(at(123), &caller).is_blocked());
    }

    #[test]
    fn unknown_caller_address_fails_the_ip_check() {
        let g = gate(&["10.0.0.1"], None);
        assert!(g.decide(at(200), &Caller::default()).is_blocked());
    }

    #[test]
    fn disabled_features_are_absent_from_the_artifact() {
        let policy = gate(&[" ", ""], None).policy().clone();
        assert!(!policy.has_checks());
        let text = policy.to_artifact().unwrap();
        assert!(!text.contains("ip_policy"));
        assert!(!text.contains("key_policy"));
    }

    #[test]
    fn artifact_is_deterministic_and_loadable() {
        let mut o = outage(4, 100, 123, 456);
        o.access_key = Some("5678".into());
        let ips = vec!["127.0.0.1".to_string()];
        let first = GatePolicy::compile(&o, &ips).to_artifact().unwrap();
        let second = GatePolicy::compile(&o, &ips).to_artifact().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("\"starts_at\": 123"));
        assert!(first.contains("\"stops_at\": 456"));

        let loaded = Gate::from_artifact(&first).unwrap();
        assert_eq!(loaded.policy(), &GatePolicy::compile(&o, &ips));
    }

    #[test]
    fn rejects_foreign_versions_and_garbage() {
        let text = r#"{"version": 9, "outage_id": 1, "starts_at": 1, "stops_at": 2}"#;
        assert!(matches!(GatePolicy::from_artifact(text), Err(GateError::UnsupportedVersion(9))));
        assert!(matches!(GatePolicy::from_artifact("<?php"), Err(GateError::Decode(_))));
    }

    #[test]
    fn key_matches_requires_a_key_policy() {
        assert!(!gate(&["10.0.0.1"], None).key_matches(""));
        assert!(gate(&[], Some("k")).key_matches("k"));
        assert!(!gate(&[], Some("k")).key_matches("K"));
    }
}
