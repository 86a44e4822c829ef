//! Stop signal parsing
//! Signal names accepted in configuration, delivered on stop requests

use serde::{Deserialize, Serialize};
use std::fmt;

/// A POSIX signal a process is asked to stop with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StopSignal(i32);

impl StopSignal {
    pub const SIGTERM: StopSignal = StopSignal(libc::SIGTERM);
    pub const SIGKILL: StopSignal = StopSignal(libc::SIGKILL);

    pub fn as_raw(&self) -> i32 {
        self.0
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let upper = s.to_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        let signo = match name {
            "HUP" => libc::SIGHUP,
            "INT" => libc::SIGINT,
            "QUIT" => libc::SIGQUIT,
            "KILL" => libc::SIGKILL,
            "USR1" => libc::SIGUSR1,
            "USR2" => libc::SIGUSR2,
            "TERM" => libc::SIGTERM,
            "STOP" => libc::SIGSTOP,
            "CONT" => libc::SIGCONT,
            _ => name
                .parse::<i32>()
                .ok()
                .filter(|n| (1..=64).contains(n))
                .ok_or_else(|| format!("Unparseable stop signal: {}", s))?,
        };
        Ok(StopSignal(signo))
    }

    fn name(&self) -> &'static str {
        match self.0 {
            libc::SIGHUP => "SIGHUP",
            libc::SIGINT => "SIGINT",
            libc::SIGQUIT => "SIGQUIT",
            libc::SIGKILL => "SIGKILL",
            libc::SIGUSR1 => "SIGUSR1",
            libc::SIGUSR2 => "SIGUSR2",
            libc::SIGTERM => "SIGTERM",
            libc::SIGSTOP => "SIGSTOP",
            libc::SIGCONT => "SIGCONT",
            _ => "SIG",
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::SIGTERM
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            "SIG" => write!(f, "{}", self.0),
            name => write!(f, "{}", name),
        }
    }
}

impl TryFrom<String> for StopSignal {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<StopSignal> for String {
    fn from(s: StopSignal) -> String {
        s.to_string()
    }
}
