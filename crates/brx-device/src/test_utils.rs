//! Test utilities for command-driven components
//!
//! [`FakeRunner`] stands in for the host: tests script responses per
//! program and argument prefix, then inspect the calls that were made.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use brx_core::prelude::*;

use crate::runner::{CommandResult, CommandRunner, CommandSpec};

type Responder = Arc<dyn Fn(&CommandSpec) -> CommandResult + Send + Sync>;

#[derive(Clone)]
enum Response {
    Fixed(CommandResult),
    Dynamic(Responder),
}

impl Response {
    fn produce(&self, spec: &CommandSpec) -> CommandResult {
        match self {
            Response::Fixed(result) => result.clone(),
            Response::Dynamic(f) => f(spec),
        }
    }
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    /// Consumed front to back; the last response repeats
    responses: VecDeque<Response>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        let program_matches = spec.program == self.program || spec.program_name() == self.program;
        program_matches && spec.args.starts_with(&self.prefix)
    }
}

#[derive(Default)]
struct FakeState {
    rules: Vec<Rule>,
    calls: Vec<CommandSpec>,
}

/// Scripted [`CommandRunner`].
///
/// The most specific rule (longest argument prefix) wins. Unscripted
/// commands fail to spawn, so a test notices calls it did not expect.
#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fixed result for `program` invoked with `prefix`
    pub fn respond(&self, program: &str, prefix: &[&str], result: CommandResult) -> &Self {
        self.push(program, prefix, Response::Fixed(result));
        self
    }

    /// Queue a successful result with the given stdout
    pub fn respond_ok(&self, program: &str, prefix: &[&str], stdout: &str) -> &Self {
        self.respond(program, prefix, CommandResult::ok(stdout))
    }

    /// Queue a failed result with the given stderr
    pub fn respond_err(&self, program: &str, prefix: &[&str], status: i32, stderr: &str) -> &Self {
        self.respond(program, prefix, CommandResult::failed(status, stderr))
    }

    /// Queue a result computed from the invocation
    pub fn respond_with<F>(&self, program: &str, prefix: &[&str], f: F) -> &Self
    where
        F: Fn(&CommandSpec) -> CommandResult + Send + Sync + 'static,
    {
        self.push(program, prefix, Response::Dynamic(Arc::new(f)));
        self
    }

    fn push(&self, program: &str, prefix: &[&str], response: Response) {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        let mut state = self.state.lock().unwrap();
        if let Some(rule) = state
            .rules
            .iter_mut()
            .find(|r| r.program == program && r.prefix == prefix)
        {
            rule.responses.push_back(response);
            return;
        }
        state.rules.push(Rule {
            program: program.to_string(),
            prefix,
            responses: VecDeque::from([response]),
        });
    }

    /// Every command run so far, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls to `program` whose arguments start with `prefix`
    pub fn count(&self, program: &str, prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                (c.program == program || c.program_name() == program)
                    && c.args.iter().map(String::as_str).take(prefix.len()).eq(prefix.iter().copied())
            })
            .count()
    }

    /// Whether any call to `program` had `arg` among its arguments
    pub fn called_with(&self, program: &str, arg: &str) -> bool {
        self.calls().iter().any(|c| {
            (c.program == program || c.program_name() == program) && c.args.iter().any(|a| a == arg)
        })
    }

    fn answer(&self, spec: &CommandSpec) -> Option<CommandResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(spec.clone());

        let rule = state
            .rules
            .iter_mut()
            .filter(|r| r.matches(spec))
            .max_by_key(|r| r.prefix.len())?;

        let response = if rule.responses.len() > 1 {
            rule.responses.pop_front()?
        } else {
            rule.responses.front()?.clone()
        };
        drop(state);
        Some(response.produce(spec))
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        self.answer(spec).ok_or_else(|| Error::CommandSpawn {
            program: spec.program_name().to_string(),
            reason: format!("no scripted response for `{spec}`"),
        })
    }
}

/// `simctl list runtimes --json` payload for the given iOS versions
pub fn runtimes_json(versions: &[&str]) -> String {
    let runtimes: Vec<String> = versions
        .iter()
        .map(|v| {
            format!(
                r#"{{"identifier":"com.apple.CoreSimulator.SimRuntime.iOS-{}","version":"{}","name":"iOS {}","isAvailable":true}}"#,
                v.replace('.', "-"),
                v,
                v
            )
        })
        .collect();
    format!(r#"{{"runtimes":[{}]}}"#, runtimes.join(","))
}

/// `simctl list devicetypes --json` payload for the given display names
pub fn device_types_json(names: &[&str]) -> String {
    let types: Vec<String> = names
        .iter()
        .map(|n| {
            format!(
                r#"{{"identifier":"com.apple.CoreSimulator.SimDeviceType.{}","name":"{}"}}"#,
                n.replace(' ', "-"),
                n
            )
        })
        .collect();
    format!(r#"{{"devicetypes":[{}]}}"#, types.join(","))
}

/// `simctl list devices --json` payload; entries are `(runtime version, name, udid, state)`
pub fn devices_json(devices: &[(&str, &str, &str, &str)]) -> String {
    let mut by_runtime: Vec<(String, Vec<String>)> = Vec::new();
    for (version, name, udid, state) in devices {
        let key = format!("com.apple.CoreSimulator.SimRuntime.iOS-{}", version.replace('.', "-"));
        let entry = format!(
            r#"{{"udid":"{udid}","name":"{name}","state":"{state}","isAvailable":true}}"#
        );
        match by_runtime.iter_mut().find(|(k, _)| *k == key) {
            Some((_, entries)) => entries.push(entry),
            None => by_runtime.push((key, vec![entry])),
        }
    }
    let groups: Vec<String> = by_runtime
        .into_iter()
        .map(|(k, entries)| format!(r#""{}":[{}]"#, k, entries.join(",")))
        .collect();
    format!(r#"{{"devices":{{{}}}}}"#, groups.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_runner_queue_then_repeat() {
        let runner = FakeRunner::new();
        runner
            .respond_ok("xcrun", &["simctl", "list"], "first")
            .respond_ok("xcrun", &["simctl", "list"], "second");

        let spec = CommandSpec::new("xcrun").args(["simctl", "list", "devices"]);
        assert_eq!(runner.run(&spec).await.unwrap().stdout, "first");
        assert_eq!(runner.run(&spec).await.unwrap().stdout, "second");
        assert_eq!(runner.run(&spec).await.unwrap().stdout, "second");
        assert_eq!(runner.count("xcrun", &["simctl", "list"]), 3);
    }

    #[tokio::test]
    async fn test_fake_runner_prefers_longest_prefix() {
        let runner = FakeRunner::new();
        runner
            .respond_ok("xcrun", &["simctl"], "generic")
            .respond_ok("xcrun", &["simctl", "boot"], "boot");

        let boot = CommandSpec::new("xcrun").args(["simctl", "boot", "ABC"]);
        let other = CommandSpec::new("xcrun").args(["simctl", "shutdown", "ABC"]);
        assert_eq!(runner.run(&boot).await.unwrap().stdout, "boot");
        assert_eq!(runner.run(&other).await.unwrap().stdout, "generic");
    }

    #[tokio::test]
    async fn test_fake_runner_unscripted_command_errors() {
        let runner = FakeRunner::new();
        let err = runner.run(&CommandSpec::new("open")).await.unwrap_err();
        assert!(matches!(err, Error::CommandSpawn { .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fake_runner_matches_program_basename() {
        let runner = FakeRunner::new();
        runner.respond_ok("devicectl", &["list"], "ok");
        let spec = CommandSpec::new("/Applications/Xcode.app/Contents/Developer/usr/bin/devicectl")
            .args(["list", "devices"]);
        assert!(runner.run(&spec).await.unwrap().success());
        assert!(runner.called_with("devicectl", "devices"));
    }

    #[test]
    fn test_json_fixtures_parse() {
        let value: serde_json::Value =
            serde_json::from_str(&devices_json(&[("17.5", "iPhone 15", "A", "Shutdown")])).unwrap();
        assert!(value["devices"]["com.apple.CoreSimulator.SimRuntime.iOS-17-5"].is_array());

        let value: serde_json::Value = serde_json::from_str(&runtimes_json(&["17.5"])).unwrap();
        assert_eq!(value["runtimes"][0]["version"], "17.5");

        let value: serde_json::Value =
            serde_json::from_str(&device_types_json(&["iPhone 15 Pro Max"])).unwrap();
        assert_eq!(value["devicetypes"][0]["name"], "iPhone 15 Pro Max");
    }
}
