//! Bootstrap step sequence
//!
//! Every step converges rather than creates: users are added only when
//! absent and keys are appended only when the exact line is missing, so the
//! sequence can be re-run on an already-bootstrapped host.

use std::time::Duration;

use crate::config::{ProvisionerConfig, SourceConfig};
use crate::environment::Environment;
use crate::error::EnvFailure;
use crate::steps::{SequenceReport, Step, StepStatus, shell_quote};

/// Where the runtime-manager installer is staged for per-user installs
pub const NVM_INSTALLER: &str = "/usr/local/share/provision/nvm-install.sh";

/// Builds the ordered bootstrap steps for one host
pub struct BootstrapSequencer<'a> {
    config: &'a ProvisionerConfig,
    environments: Vec<&'a Environment>,
}

impl<'a> BootstrapSequencer<'a> {
    pub fn new(
        config: &'a ProvisionerConfig,
        environments: impl IntoIterator<Item = &'a Environment>,
    ) -> Self {
        Self {
            config,
            environments: environments.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn environments(&self) -> &[&'a Environment] {
        &self.environments
    }

    /// Step name of the user-creation sub-step for `env`
    #[must_use]
    pub fn user_step_name(env: &Environment) -> String {
        format!("create user {} ({})", env.user, env.name)
    }

    /// The full ordered sequence
    #[must_use]
    pub fn steps(&self, connect_timeout: Duration) -> Vec<Step> {
        let mut steps = vec![
            Step::probe("connectivity probe", connect_timeout),
            Step::command(
                "runtime version",
                "uname -sr; node --version 2>/dev/null || echo 'node: not installed'",
            )
            .continue_on_failure(),
            Step::command("base packages", self.packages_command()),
        ];

        for env in &self.environments {
            steps.push(
                Step::command(
                    Self::user_step_name(env),
                    user_command(env, &self.config.source),
                )
                .continue_on_failure(),
            );
        }

        steps.extend(self.key_steps());

        steps.push(
            Step::command(
                "verify toolchain",
                format!(
                    "git --version && rsync --version | head -n 1 && test -s {}",
                    shell_quote(NVM_INSTALLER)
                ),
            )
            .continue_on_failure(),
        );
        steps.push(
            Step::command(
                "verify runtime",
                "for n in /home/*/.nvm/versions/node/*/bin/node; do \
                   [ -x \"$n\" ] && \"$n\" --version && exit 0; \
                 done; \
                 echo 'node not installed yet (installed by activate)' >&2; exit 1",
            )
            .continue_on_failure(),
        );
        let supervisor = shell_quote(&self.config.runtime.supervisor);
        steps.push(
            Step::command(
                "verify supervisor",
                format!(
                    "ls /home/*/.nvm/versions/node/*/bin/{supervisor} >/dev/null 2>&1 \
                     || {{ echo {supervisor}' not installed yet (installed by activate)' >&2; exit 1; }}"
                ),
            )
            .continue_on_failure(),
        );

        steps
    }

    fn packages_command(&self) -> String {
        let packages = self
            .config
            .runtime
            .packages
            .iter()
            .map(|p| shell_quote(p))
            .collect::<Vec<_>>()
            .join(" ");
        let installer = shell_quote(NVM_INSTALLER);
        let url = format!(
            "https://raw.githubusercontent.com/nvm-sh/nvm/{}/install.sh",
            self.config.runtime.nvm_version
        );

        format!(
            "export DEBIAN_FRONTEND=noninteractive \
             && apt-get update -qq \
             && apt-get install -y -qq {packages} \
             && mkdir -p /usr/local/share/provision \
             && if [ ! -s {installer} ]; then curl -fsSL {url} -o {installer}; fi \
             && chmod 0755 {installer}",
            url = shell_quote(&url),
        )
    }

    fn key_steps(&self) -> Vec<Step> {
        let Some(key) = self.config.authorized_key.as_deref() else {
            return vec![Step::skip(
                "authorize key",
                "no public key configured (set ssh.public_key_path)",
            )];
        };

        let mut accounts = vec![self.config.ssh.privileged_user.clone()];
        accounts.extend(self.environments.iter().map(|e| e.user.clone()));

        accounts
            .into_iter()
            .map(|user| {
                Step::command(format!("authorize key for {user}"), authorize_command(&user, key))
                    .continue_on_failure()
            })
            .collect()
    }
}

fn user_command(env: &Environment, source: &SourceConfig) -> String {
    let user = shell_quote(&env.user);
    let home = env.home();
    let mut dirs = ancestors_below(&home, &env.source_root(source));
    for dir in ancestors_below(&home, &env.runtime_root(source)) {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    let dirs = dirs
        .iter()
        .map(|d| shell_quote(d))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "if id -u {user} >/dev/null 2>&1; then echo exists; \
         else useradd --create-home --shell /bin/bash {user} && echo created; fi \
         && install -d -m 0750 -o {user} -g {user} {dirs}"
    )
}

/// `path` and its parents, stopping below `home`, outermost first
fn ancestors_below(home: &str, path: &str) -> Vec<String> {
    let Some(rest) = path.strip_prefix(home) else {
        return vec![path.to_string()];
    };
    let mut current = home.to_string();
    rest.split('/')
        .filter(|part| !part.is_empty())
        .map(|part| {
            current = format!("{current}/{part}");
            current.clone()
        })
        .collect()
}

fn authorize_command(user: &str, key: &str) -> String {
    let user = shell_quote(user);
    let key = shell_quote(key.trim());
    format!(
        "h=$(getent passwd {user} | cut -d: -f6) && [ -n \"$h\" ] \
         && install -d -m 0700 -o {user} \"$h/.ssh\" \
         && touch \"$h/.ssh/authorized_keys\" \
         && {{ grep -qxF {key} \"$h/.ssh/authorized_keys\" \
         || printf '%s\\n' {key} >> \"$h/.ssh/authorized_keys\"; }} \
         && chmod 0600 \"$h/.ssh/authorized_keys\" \
         && chown -R {user}: \"$h/.ssh\""
    )
}

/// What bootstrap did to the environment users
#[derive(Debug, Clone, Default)]
pub struct UserSummary {
    /// Users that did not exist before this run
    pub created: Vec<String>,
    /// Users whose sub-step failed
    pub failed: Vec<EnvFailure>,
}

impl UserSummary {
    /// Read the user sub-step outcomes out of a finished sequence
    #[must_use]
    pub fn from_report(report: &SequenceReport, environments: &[&Environment]) -> Self {
        let mut summary = Self::default();
        for env in environments {
            let Some(outcome) = report.outcome(&BootstrapSequencer::user_step_name(env)) else {
                continue;
            };
            match outcome.status {
                StepStatus::Ok => {
                    if outcome.output.lines().any(|l| l.trim() == "created") {
                        summary.created.push(env.user.clone());
                    }
                }
                _ => summary.failed.push(EnvFailure {
                    env: env.name.clone(),
                    reason: outcome.detail.clone().unwrap_or_default(),
                }),
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{OnFailure, StepAction};

    fn command_of(step: &Step) -> &str {
        match &step.action {
            StepAction::Command(cmd) => cmd,
            other => panic!("not a command: {other:?}"),
        }
    }

    #[test]
    fn test_sequence_order_and_policies() {
        let envs = [
            Environment::new("dev", "development", 0, "dev"),
            Environment::new("prod", "main", 200, "prod"),
        ];
        let config = ProvisionerConfig {
            authorized_key: Some("ssh-ed25519 AAAA operator@laptop".to_string()),
            ..ProvisionerConfig::default()
        };
        let steps = BootstrapSequencer::new(&config, &envs).steps(Duration::from_secs(5));

        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "connectivity probe",
                "runtime version",
                "base packages",
                "create user dev (dev)",
                "create user prod (prod)",
                "authorize key for root",
                "authorize key for dev",
                "authorize key for prod",
                "verify toolchain",
                "verify runtime",
                "verify supervisor",
            ]
        );

        let policy = |name: &str| steps.iter().find(|s| s.name == name).unwrap().on_failure;
        assert_eq!(policy("connectivity probe"), OnFailure::Abort);
        assert_eq!(policy("runtime version"), OnFailure::Continue);
        assert_eq!(policy("base packages"), OnFailure::Abort);
        assert_eq!(policy("create user dev (dev)"), OnFailure::Continue);
        assert_eq!(policy("authorize key for root"), OnFailure::Continue);
        assert_eq!(policy("verify runtime"), OnFailure::Continue);
        assert_eq!(policy("verify supervisor"), OnFailure::Continue);
        assert!(steps[0].probe);
    }

    #[test]
    fn test_verification_checks_runtime_and_quotes_supervisor() {
        let envs = [Environment::new("dev", "development", 0, "dev")];
        let mut config = ProvisionerConfig::default();
        config.runtime.supervisor = "pm2; rm -rf /".to_string();
        let steps = BootstrapSequencer::new(&config, &envs).steps(Duration::from_secs(5));
        let find = |name: &str| steps.iter().find(|s| s.name == name).unwrap();

        assert!(command_of(find("verify runtime")).contains("\"$n\" --version"));
        let supervisor = command_of(find("verify supervisor"));
        assert!(supervisor.contains("bin/'pm2; rm -rf /' >/dev/null"));
        assert!(!supervisor.contains("bin/pm2;"));
    }

    #[test]
    fn test_user_creation_is_guarded() {
        let env = Environment::new("dev", "development", 0, "dev");
        let cmd = user_command(&env, &SourceConfig::default());

        assert!(cmd.starts_with("if id -u 'dev'"));
        assert!(cmd.contains("'/home/dev/src' '/home/dev/src/app' '/home/dev/runtime'"));
    }

    #[test]
    fn test_key_append_is_guarded() {
        let cmd = authorize_command("dev", "ssh-ed25519 AAAA op\n");
        assert!(cmd.contains("grep -qxF 'ssh-ed25519 AAAA op'"));
        assert!(cmd.contains(">> \"$h/.ssh/authorized_keys\""));
    }

    #[test]
    fn test_missing_key_is_skipped() {
        let envs = [Environment::new("dev", "development", 0, "dev")];
        let config = ProvisionerConfig::default();
        let steps = BootstrapSequencer::new(&config, &envs).steps(Duration::from_secs(5));

        let skip = steps.iter().find(|s| s.name == "authorize key").unwrap();
        assert!(matches!(skip.action, StepAction::Skip(_)));
        assert!(command_of(&steps[2]).contains("apt-get install -y -qq 'git' 'curl'"));
    }

    #[test]
    fn test_ancestors_below_home() {
        assert_eq!(
            ancestors_below("/home/dev", "/home/dev/src/app"),
            vec!["/home/dev/src", "/home/dev/src/app"]
        );
        assert_eq!(ancestors_below("/home/dev", "/srv/app"), vec!["/srv/app"]);
    }
}
