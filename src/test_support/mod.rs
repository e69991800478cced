//! Test doubles for unit tests.
//!
//! Provides a scripted [`CommandRunner`] and a scripted [`HttpClient`] so
//! probes, checks and acquisition strategies run offline and
//! deterministically, plus host and archive fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! let runner = MockRunner::new();
//! runner.expect("re2c --version", CommandOutput::from_stdout("re2c 3.1\n", 0));
//! let probe = FakeHost::new().os_release("ID=debian\n").probe(runner);
//! ```

pub mod fixtures;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::sources::error::AcquireError;
use crate::sources::http::{HttpClient, HttpResponse};
use crate::util::process::{CommandOutput, CommandRunner};

pub use fixtures::*;

/// Pattern for matching commands in [`MockRunner`].
#[derive(Debug, Clone)]
pub enum CommandPattern {
    /// Exact match on full command string.
    Exact(String),
    /// Match if command starts with prefix.
    StartsWith(String),
    /// Match if command contains substring.
    Contains(String),
}

impl CommandPattern {
    pub fn matches(&self, cmd: &str) -> bool {
        match self {
            CommandPattern::Exact(s) => cmd == s,
            CommandPattern::StartsWith(s) => cmd.starts_with(s),
            CommandPattern::Contains(s) => cmd.contains(s),
        }
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    expectations: Vec<(CommandPattern, CommandOutput)>,
    calls: Vec<String>,
    default_output: Option<CommandOutput>,
}

/// Scripted command runner that records every command it is asked to run.
#[derive(Debug, Default)]
pub struct MockRunner {
    state: Mutex<RunnerState>,
}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner::default()
    }

    /// Return `output` for exactly `cmd`.
    pub fn expect(&self, cmd: &str, output: CommandOutput) -> &Self {
        self.push(CommandPattern::Exact(cmd.to_string()), output)
    }

    /// Return `output` for commands starting with `prefix`.
    pub fn expect_prefix(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.push(CommandPattern::StartsWith(prefix.to_string()), output)
    }

    /// Return `output` for commands containing `substring`.
    pub fn expect_contains(&self, substring: &str, output: CommandOutput) -> &Self {
        self.push(CommandPattern::Contains(substring.to_string()), output)
    }

    /// Output for commands no expectation matches.
    pub fn set_default(&self, output: CommandOutput) -> &Self {
        self.lock().default_output = Some(output);
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn push(&self, pattern: CommandPattern, output: CommandOutput) -> &Self {
        self.lock().expectations.push((pattern, output));
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CommandRunner for MockRunner {
    fn run_in(
        &self,
        cmd: &str,
        _cwd: Option<&Path>,
        _env: &[(String, String)],
    ) -> Result<CommandOutput> {
        let mut state = self.lock();
        state.calls.push(cmd.to_string());

        if let Some((_, output)) = state.expectations.iter().find(|(p, _)| p.matches(cmd)) {
            return Ok(output.clone());
        }
        if let Some(ref output) = state.default_output {
            return Ok(output.clone());
        }
        bail!("no mock output for command: {}", cmd)
    }
}

/// Scripted HTTP client. A URL mocked with a sequence returns each response
/// once, then keeps returning the last.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<String>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        MockHttpClient::default()
    }

    /// Always answer `url` with `response`.
    pub fn mock_url(self, url: &str, response: HttpResponse) -> Self {
        self.mock_sequence(url, vec![response])
    }

    /// Answer `url` with each response in turn.
    pub fn mock_sequence(self, url: &str, responses: Vec<HttpResponse>) -> Self {
        if let Ok(mut map) = self.responses.lock() {
            map.insert(url.to_string(), responses.into());
        }
        self
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// How often `url` was requested.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| *r == url).count()
    }
}

impl HttpClient for MockHttpClient {
    fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<HttpResponse, AcquireError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        let mut map = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match map.get_mut(url) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap_or_default()),
            Some(queue) => Ok(queue.front().cloned().unwrap_or_default()),
            None => Ok(HttpResponse::with_status(404, "not mocked")),
        }
    }
}
