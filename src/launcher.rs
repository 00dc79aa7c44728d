//! Spawns a debuggee process and wires its correlation id, mirroring
//! `SPEC_FULL.md` §4.8's launch argv contract. The host never dials out to
//! the debuggee; the debuggee always connects back to the host's listener
//! with the correlation id it was launched with, so this module's only job
//! is to build the right argv and own the resulting [`std::process::Child`].

use std::io;
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::CorrelationId;

/// What to launch and how. `redirect_output` asks the agent to forward the
/// target's stdout/stderr as `OUTP` events instead of inheriting the host's
/// streams.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub interpreter: String,
    pub agent_entry: String,
    pub cwd: String,
    pub port: u16,
    pub wait_on_exception: bool,
    pub wait_on_exit: bool,
    pub redirect_output: bool,
    pub target: String,
    pub target_args: Vec<String>,
}

impl LaunchConfig {
    /// Builds the argv the spawned agent process expects: interpreter,
    /// agent entry point, cwd, port, correlation id, then flags (only those
    /// that are set), then the target script and its own arguments.
    fn argv(&self, correlation_id: &CorrelationId) -> Vec<String> {
        let mut argv = vec![
            self.agent_entry.clone(),
            self.cwd.clone(),
            self.port.to_string(),
            encode_correlation_id(correlation_id),
        ];
        if self.wait_on_exception {
            argv.push("--wait-on-exception".to_string());
        }
        if self.wait_on_exit {
            argv.push("--wait-on-exit".to_string());
        }
        if self.redirect_output {
            argv.push("--redirect-output".to_string());
        }
        argv.push(self.target.clone());
        argv.extend(self.target_args.iter().cloned());
        argv
    }
}

fn encode_correlation_id(id: &CorrelationId) -> String {
    id.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generates a process-local correlation id. Not a cryptographic token:
/// just needs to be unique among processes this host currently has pending,
/// which a monotonic counter folded with the clock and pid already gives
/// us without pulling in a random-number crate for it.
pub fn new_correlation_id() -> CorrelationId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;

    let mut id = [0u8; 16];
    id[0..8].copy_from_slice(&nanos.to_be_bytes());
    id[8..16].copy_from_slice(&(counter ^ pid.rotate_left(17)).to_be_bytes());
    id
}

/// Spawns the debuggee. Stdout/stderr are piped whenever `redirect_output`
/// is set so a caller can forward them; otherwise they're inherited so a
/// CLI invocation behaves like running the target directly.
pub fn spawn(config: &LaunchConfig, correlation_id: &CorrelationId) -> io::Result<std::process::Child> {
    let mut cmd = ProcessCommand::new(&config.interpreter);
    cmd.args(config.argv(correlation_id));
    cmd.current_dir(&config.cwd);

    if config.redirect_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    }
    cmd.stdin(Stdio::null());

    cmd.spawn()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn argv_omits_unset_flags() {
        let config = LaunchConfig {
            interpreter: "script-vm".to_string(),
            agent_entry: "/opt/agent/entry".to_string(),
            cwd: "/work".to_string(),
            port: 8000,
            wait_on_exception: false,
            wait_on_exit: false,
            redirect_output: false,
            target: "s.py".to_string(),
            target_args: vec!["--flag".to_string()],
        };
        let argv = config.argv(&[0u8; 16]);
        assert!(!argv.iter().any(|a| a.starts_with("--")));
        assert_eq!(argv.last(), Some(&"--flag".to_string()));
    }

    #[test]
    fn argv_includes_set_flags_in_order() {
        let config = LaunchConfig {
            interpreter: "script-vm".to_string(),
            agent_entry: "/opt/agent/entry".to_string(),
            cwd: "/work".to_string(),
            port: 8000,
            wait_on_exception: true,
            wait_on_exit: true,
            redirect_output: true,
            target: "s.py".to_string(),
            target_args: vec![],
        };
        let argv = config.argv(&[1u8; 16]);
        let flags: Vec<&String> = argv.iter().filter(|a| a.starts_with("--")).collect();
        assert_eq!(
            flags,
            vec!["--wait-on-exception", "--wait-on-exit", "--redirect-output"]
        );
    }

    #[test]
    fn correlation_ids_are_unique_across_calls() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
    }
}
