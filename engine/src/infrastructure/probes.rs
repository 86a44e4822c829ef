//! Health probe execution
//! One function per probe kind behind a single `probe` entry point; HTTP uses
//! a blocking ureq agent on the blocking pool.

use crate::domain::HealthProbe;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Run one probe with the given deadline. True means healthy.
pub async fn probe(check: &HealthProbe, timeout: Duration) -> bool {
    match check {
        HealthProbe::Tcp { host, port } => probe_tcp(host, *port, timeout).await,
        HealthProbe::Http { url, .. } => probe_http(check, url, timeout).await,
        HealthProbe::Exec { command } => probe_exec(command, timeout).await,
    }
}

async fn probe_tcp(host: &str, port: u16, timeout: Duration) -> bool {
    let addr = format!("{}:{}", host, port);
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => {
            debug!(addr = %addr, "TCP probe succeeded");
            true
        }
        Ok(Err(e)) => {
            debug!(addr = %addr, error = %e, "TCP probe connection failed");
            false
        }
        Err(_) => {
            debug!(addr = %addr, "TCP probe timed out");
            false
        }
    }
}

async fn probe_http(check: &HealthProbe, url: &str, timeout: Duration) -> bool {
    let check = check.clone();
    let url = url.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        match agent.get(&url).call() {
            Ok(resp) => check.http_status_ok(resp.status()),
            Err(ureq::Error::Status(code, _)) => check.http_status_ok(code),
            Err(e) => {
                debug!(url = %url, error = %e, "HTTP probe error");
                false
            }
        }
    })
    .await;

    match result {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!(error = %e, "HTTP probe task failed");
            false
        }
    }
}

async fn probe_exec(argv: &[String], timeout: Duration) -> bool {
    let Some(program) = argv.first() else {
        warn!("Exec probe has an empty command");
        return false;
    };
    let mut cmd = Command::new(program);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            debug!(command = %program, error = %e, "Exec probe spawn failed");
            return false;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!(command = %program, "Exec probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_probe_success() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {}
        });

        let check = HealthProbe::Tcp {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
        };
        assert!(probe(&check, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        let check = HealthProbe::Tcp {
            host: "127.0.0.1".to_string(),
            port: 9, // discard port, nothing listens in test environments
        };
        assert!(!probe(&check, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_exec_probe_success_and_failure() {
        let ok = HealthProbe::Exec {
            command: vec!["/bin/true".to_string()],
        };
        assert!(probe(&ok, Duration::from_secs(2)).await);

        let fail = HealthProbe::Exec {
            command: vec!["/bin/false".to_string()],
        };
        assert!(!probe(&fail, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_exec_probe_timeout() {
        let check = HealthProbe::Exec {
            command: vec!["/bin/sleep".to_string(), "10".to_string()],
        };
        let started = std::time::Instant::now();
        assert!(!probe(&check, Duration::from_millis(300)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_exec_probe_empty_command() {
        let check = HealthProbe::Exec { command: vec![] };
        assert!(!probe(&check, Duration::from_secs(1)).await);
    }
}
