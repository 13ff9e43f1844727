// src/core/testing.rs
//
// Stub implementations of the process, DNS and host-intelligence seams.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::models::HostDetails;
use crate::core::runner::{CommandOutput, CommandRunner, ToolError};
use crate::core::scanner::service_scanner::{HostIntel, HostResolver, IntelError};

enum Reply {
    Output(CommandOutput),
    NotFound,
    TimedOut,
}

struct Rule {
    program: String,
    needle: Option<String>,
    reply: Reply,
}

/// Answers commands from a rule list; unmatched programs behave as missing binaries.
#[derive(Default)]
pub struct StubRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, program: &str, status: i32, stdout: &str) -> Self {
        self.rule(program, None, Reply::Output(output(status, stdout)))
    }

    /// Like `respond`, but only when one of the arguments contains `needle`.
    pub fn respond_when(self, program: &str, needle: &str, status: i32, stdout: &str) -> Self {
        self.rule(program, Some(needle), Reply::Output(output(status, stdout)))
    }

    pub fn missing(self, program: &str) -> Self {
        self.rule(program, None, Reply::NotFound)
    }

    pub fn timing_out_when(self, program: &str, needle: &str) -> Self {
        self.rule(program, Some(needle), Reply::TimedOut)
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    fn rule(mut self, program: &str, needle: Option<&str>, reply: Reply) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            needle: needle.map(str::to_string),
            reply,
        });
        self
    }
}

fn output(status: i32, stdout: &str) -> CommandOutput {
    CommandOutput { status: Some(status), stdout: stdout.to_string(), stderr: String::new() }
}

#[async_trait]
impl CommandRunner for StubRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        self.calls.lock().unwrap().push((program.to_string(), args.to_vec()));
        let rule = self.rules.iter().find(|r| {
            r.program == program
                && r.needle.as_ref().is_none_or(|n| args.iter().any(|a| a.contains(n.as_str())))
        });
        match rule.map(|r| &r.reply) {
            Some(Reply::Output(out)) => Ok(out.clone()),
            Some(Reply::TimedOut) => Err(ToolError::TimedOut { program: program.to_string(), timeout }),
            Some(Reply::NotFound) | None => Err(ToolError::NotFound { program: program.to_string() }),
        }
    }
}

#[derive(Default)]
pub struct StubResolver {
    answers: HashMap<String, IpAddr>,
}

impl StubResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hostname: &str, ip: &str) -> Self {
        self.answers.insert(hostname.to_string(), ip.parse().unwrap());
        self
    }
}

#[async_trait]
impl HostResolver for StubResolver {
    async fn resolve(&self, hostname: &str) -> Option<IpAddr> {
        self.answers.get(hostname).copied()
    }
}

#[derive(Default)]
pub struct StubIntel {
    answers: HashMap<IpAddr, Result<HostDetails, (u16, String)>>,
    lookups: Mutex<Vec<IpAddr>>,
}

impl StubIntel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ip: &str, details: HostDetails) -> Self {
        self.answers.insert(ip.parse().unwrap(), Ok(details));
        self
    }

    pub fn failing(mut self, ip: &str, status: u16, message: &str) -> Self {
        self.answers.insert(ip.parse().unwrap(), Err((status, message.to_string())));
        self
    }

    pub fn lookups(&self) -> Vec<IpAddr> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostIntel for StubIntel {
    async fn lookup(&self, ip: IpAddr) -> Result<HostDetails, IntelError> {
        self.lookups.lock().unwrap().push(ip);
        match self.answers.get(&ip) {
            Some(Ok(details)) => Ok(details.clone()),
            Some(Err((status, message))) => Err(IntelError::Api { status: *status, message: message.clone() }),
            None => Err(IntelError::Api { status: 404, message: "No information available for that IP.".to_string() }),
        }
    }
}
