//! Convergence phases and their record keys

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convergence phases, in order
///
/// `Created` and `Bootstrapped` are host-scoped; the rest are tracked per
/// environment on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Created,
    Bootstrapped,
    SourceChecked,
    Synced,
    Activated,
}

impl Phase {
    /// Every phase in convergence order
    pub const ALL: [Phase; 5] = [
        Phase::Created,
        Phase::Bootstrapped,
        Phase::SourceChecked,
        Phase::Synced,
        Phase::Activated,
    ];

    /// Whether records for this phase are keyed by `host:env`
    #[must_use]
    pub fn is_env_scoped(self) -> bool {
        matches!(
            self,
            Phase::SourceChecked | Phase::Synced | Phase::Activated
        )
    }

    /// CLI sub-command that reaches this phase
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Phase::Created => "create",
            Phase::Bootstrapped => "bootstrap",
            Phase::SourceChecked => "checkout",
            Phase::Synced => "sync",
            Phase::Activated => "activate",
        }
    }

    /// Exact command that re-runs this phase
    #[must_use]
    pub fn resume_command(self, host: &str, env: Option<&str>) -> String {
        match env {
            Some(env) if self.is_env_scoped() => {
                format!("provision {} {host} {env}", self.command())
            }
            _ => format!("provision {} {host}", self.command()),
        }
    }

    /// Phase that must be recorded before this one may run
    #[must_use]
    pub fn predecessor(self) -> Option<Phase> {
        match self {
            Phase::Created | Phase::Bootstrapped => None,
            Phase::SourceChecked => Some(Phase::Bootstrapped),
            Phase::Synced => Some(Phase::SourceChecked),
            Phase::Activated => Some(Phase::Synced),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Bootstrapped => "bootstrapped",
            Phase::SourceChecked => "source-checked",
            Phase::Synced => "synced",
            Phase::Activated => "activated",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "created" => Ok(Phase::Created),
            "bootstrapped" => Ok(Phase::Bootstrapped),
            "source-checked" | "sourcechecked" => Ok(Phase::SourceChecked),
            "synced" => Ok(Phase::Synced),
            "activated" => Ok(Phase::Activated),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

/// Record key: `host` or `host:env`
///
/// Hosts containing `:` (IPv6 literals) are written bracketed,
/// `[2001:db8::7]:dev`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhaseKey {
    pub host: String,
    pub env: Option<String>,
}

impl PhaseKey {
    /// Host-scoped key
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            env: None,
        }
    }

    /// Environment-scoped key
    pub fn env(host: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            env: Some(env.into()),
        }
    }

    /// Key under which `phase` is recorded
    #[must_use]
    pub fn for_phase(host: &str, env: Option<&str>, phase: Phase) -> Self {
        match env {
            Some(env) if phase.is_env_scoped() => Self::env(host, env),
            _ => Self::host(host),
        }
    }
}

impl fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        match &self.env {
            Some(env) => write!(f, ":{env}"),
            None => Ok(()),
        }
    }
}

impl FromStr for PhaseKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unclosed bracket: {s}"))?;
            if host.is_empty() {
                return Err(format!("malformed key: {s}"));
            }
            return match tail.strip_prefix(':') {
                Some(env) if !env.is_empty() && !env.contains(':') => Ok(Self::env(host, env)),
                None if tail.is_empty() => Ok(Self::host(host)),
                _ => Err(format!("malformed key: {s}")),
            };
        }
        match s.split_once(':') {
            Some((host, env)) if !host.is_empty() && !env.is_empty() => Ok(Self::env(host, env)),
            Some(_) => Err(format!("malformed key: {s}")),
            None if s.is_empty() => Err("empty key".to_string()),
            None => Ok(Self::host(s)),
        }
    }
}

/// Last completed phase for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_convergence_order() {
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
        assert!(Phase::Activated > Phase::Bootstrapped);
    }

    #[test]
    fn test_phase_parse_display() {
        for phase in Phase::ALL {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!("Source_Checked".parse::<Phase>().unwrap(), Phase::SourceChecked);
        assert!("deployed".parse::<Phase>().is_err());
    }

    #[test]
    fn test_key_scoping() {
        assert_eq!(
            PhaseKey::for_phase("web-1", Some("dev"), Phase::Bootstrapped),
            PhaseKey::host("web-1")
        );
        assert_eq!(
            PhaseKey::for_phase("web-1", Some("dev"), Phase::Synced).to_string(),
            "web-1:dev"
        );
        assert_eq!("web-1:dev".parse::<PhaseKey>().unwrap(), PhaseKey::env("web-1", "dev"));
        assert!("web-1:".parse::<PhaseKey>().is_err());
    }

    #[test]
    fn test_ipv6_keys_are_bracketed() {
        let host = PhaseKey::host("2001:db8::7");
        let env = PhaseKey::env("::1", "dev");

        assert_eq!(host.to_string(), "[2001:db8::7]");
        assert_eq!(env.to_string(), "[::1]:dev");
        assert_eq!(host.to_string().parse::<PhaseKey>().unwrap(), host);
        assert_eq!(env.to_string().parse::<PhaseKey>().unwrap(), env);
        assert!("[::1".parse::<PhaseKey>().is_err());
        assert!("[::1]x".parse::<PhaseKey>().is_err());
    }

    #[test]
    fn test_resume_command() {
        assert_eq!(
            Phase::Synced.resume_command("web-1", Some("dev")),
            "provision sync web-1 dev"
        );
        assert_eq!(
            Phase::Bootstrapped.resume_command("web-1", Some("dev")),
            "provision bootstrap web-1"
        );
    }
}
