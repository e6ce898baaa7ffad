//! Human-readable progress and tables on stdout

use std::io::Write;

use provision_core::{
    EnvironmentTable, PhaseKey, PhaseRecord, PhaseReport, ProvisionEvent, ResolvedHost,
    StepStatus,
};

/// Print one progress event
///
/// Step lines are written in two halves so a long remote step shows
/// `[n/total] <step>...` while it runs.
pub fn print_event(event: &ProvisionEvent) {
    let mut stdout = std::io::stdout().lock();
    let _ = match event {
        ProvisionEvent::StepStarted { index, total, name } => {
            write!(stdout, "{} ", ProvisionEvent::step_prefix(*index, *total, name))
        }
        other => writeln!(stdout, "{}", render_event(other)),
    };
    let _ = stdout.flush();
}

/// Text for every event except the opening half of a step line
#[must_use]
pub fn render_event(event: &ProvisionEvent) -> String {
    match event {
        ProvisionEvent::PhaseStarted { host, env, phase } => {
            format!("==> {phase}: {}", scope(host, env.as_deref()))
        }
        ProvisionEvent::StepStarted { index, total, name } => {
            ProvisionEvent::step_prefix(*index, *total, name)
        }
        ProvisionEvent::StepFinished { status, detail, .. } => match (status, detail) {
            (StepStatus::Ok, _) | (_, None) => status.to_string(),
            (_, Some(detail)) => format!("{status}\n      {detail}"),
        },
        ProvisionEvent::PhaseFinished {
            host,
            env,
            phase,
            success,
            warnings,
        } => {
            let scope = scope(host, env.as_deref());
            match (success, warnings) {
                (false, _) => format!("==> {phase}: {scope} failed"),
                (true, 0) => format!("==> {phase}: {scope} done"),
                (true, n) => format!("==> {phase}: {scope} done with {n} warning(s)"),
            }
        }
    }
}

fn scope(host: &str, env: Option<&str>) -> String {
    match env {
        Some(env) => format!("{host} [{env}]"),
        None => host.to_string(),
    }
}

/// Trailing summary of a successful phase
#[must_use]
pub fn render_report(report: &PhaseReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.dry_run {
        lines.push(format!("dry run: nothing changed for {}", report.host));
    }
    if let Some(address) = report.address {
        lines.push(format!("{} {} at {address}", report.phase, report.host));
    }
    if !report.users_created.is_empty() {
        lines.push(format!("users created: {}", report.users_created.join(", ")));
    }
    for warning in &report.warnings {
        lines.push(format!("warning: {warning}"));
    }
    lines
}

#[must_use]
pub fn render_status(records: &[(PhaseKey, PhaseRecord)]) -> Vec<String> {
    if records.is_empty() {
        return vec!["no phase records".to_string()];
    }
    let width = records
        .iter()
        .map(|(key, _)| key.to_string().len())
        .max()
        .unwrap_or(0)
        .max(3);

    let mut lines = vec![format!("{:<width$}  {:<14}  RECORDED", "KEY", "PHASE")];
    for (key, record) in records {
        lines.push(format!(
            "{:<width$}  {:<14}  {}",
            key.to_string(),
            record.phase.to_string(),
            record.timestamp.format("%Y-%m-%d %H:%M:%SZ"),
        ));
    }
    lines
}

#[must_use]
pub fn render_environments(table: &EnvironmentTable) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<10}  {:<14}  {:<10}  PORT",
        "NAME", "BRANCH", "USER"
    )];
    for env in &table.environments {
        lines.push(format!(
            "{:<10}  {:<14}  {:<10}  {}",
            env.name,
            env.branch,
            env.user,
            env.port(table.base_port)
        ));
    }
    lines
}

#[must_use]
pub fn render_resolved(host: &ResolvedHost) -> String {
    format!("{} -> {} (via {})", host.identifier, host.address, host.via)
}

#[cfg(test)]
mod tests {
    use provision_core::{Environment, Phase, Resolution};

    use super::*;

    #[test]
    fn test_step_line_halves() {
        let start = render_event(&ProvisionEvent::StepStarted {
            index: 3,
            total: 10,
            name: "base packages".to_string(),
        });
        let finish = render_event(&ProvisionEvent::StepFinished {
            index: 3,
            total: 10,
            name: "base packages".to_string(),
            status: StepStatus::Failed,
            detail: Some("E: Unable to locate package".to_string()),
        });

        assert_eq!(start, "[3/10] base packages...");
        assert_eq!(finish, "failed\n      E: Unable to locate package");
    }

    #[test]
    fn test_phase_lines() {
        let done = render_event(&ProvisionEvent::PhaseFinished {
            host: "web-1".to_string(),
            env: Some("dev".to_string()),
            phase: Phase::Synced,
            success: true,
            warnings: 2,
        });
        assert_eq!(done, "==> synced: web-1 [dev] done with 2 warning(s)");
    }

    #[test]
    fn test_environment_ports() {
        let table = EnvironmentTable {
            base_port: 4000,
            environments: vec![Environment::new("staging", "staging", 100, "staging")],
        };
        let lines = render_environments(&table);
        assert!(lines[1].ends_with("4100"));
    }

    #[test]
    fn test_resolved_line() {
        let host = ResolvedHost {
            identifier: "web-1".to_string(),
            address: "192.0.2.10".parse().unwrap(),
            via: Resolution::Bound,
        };
        assert_eq!(render_resolved(&host), "web-1 -> 192.0.2.10 (via bound)");
    }

    #[test]
    fn test_empty_status() {
        assert_eq!(render_status(&[]), vec!["no phase records"]);
    }
}
