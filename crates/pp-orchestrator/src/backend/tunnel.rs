//! Tunnel collaborator that runs one tunnel client process per tunnel id
//!
//! The client (ngrok by default) is started with the proxy port substituted
//! into its arguments. Its stdout is scanned line by line until a public URL
//! appears, either as a JSON log field (`{"url": "tcp://..."}`) or a logfmt
//! token (`url=tcp://...`). After that the rest of the output is drained in
//! the background so the child never blocks on a full pipe.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use pp_core::config::TunnelConfig;
use pp_core::error::CollaboratorError;
use pp_core::traits::TunnelCollaborator;
use pp_core::types::{TunnelId, TunnelReport, TunnelStatus};

struct TunnelProcess {
    child: Child,
    url: String,
    local_port: u16,
}

/// Runs tunnel client processes
pub struct ProcessTunnels {
    config: TunnelConfig,
    processes: Mutex<HashMap<TunnelId, TunnelProcess>>,
}

impl ProcessTunnels {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Kill every child, used on shutdown
    pub async fn stop_all(&self) {
        let mut processes = self.processes.lock().await;
        for (id, mut process) in processes.drain() {
            if let Err(e) = process.child.kill().await {
                tracing::debug!("Tunnel {} already gone: {}", id, e);
            }
        }
    }
}

#[async_trait]
impl TunnelCollaborator for ProcessTunnels {
    async fn start(&self, tunnel_id: &TunnelId, local_port: u16) -> Result<String, CollaboratorError> {
        let failed = |reason: String| CollaboratorError::TunnelStartFailed {
            tunnel_id: tunnel_id.to_string(),
            reason,
        };

        // Replace any previous client for this id
        if let Some(mut old) = self.processes.lock().await.remove(tunnel_id) {
            let _ = old.child.kill().await;
        }

        let mut child = Command::new(&self.config.command)
            .args(self.config.args_for_port(local_port))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("could not launch {}: {}", self.config.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| failed("tunnel client has no stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let url = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(url) = extract_url(&line) {
                        break url;
                    }
                }
                Ok(None) => {
                    let status = child
                        .wait()
                        .await
                        .map(|s| s.to_string())
                        .unwrap_or_else(|e| e.to_string());
                    return Err(failed(format!(
                        "client exited ({}) before publishing a URL",
                        status
                    )));
                }
                Err(e) => return Err(failed(format!("reading client output: {}", e))),
            }
        };

        let id = tunnel_id.clone();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(tunnel = %id, "{}", line);
            }
        });

        tracing::info!("Tunnel {} published {} -> port {}", tunnel_id, url, local_port);
        self.processes.lock().await.insert(
            tunnel_id.clone(),
            TunnelProcess {
                child,
                url: url.clone(),
                local_port,
            },
        );
        Ok(url)
    }

    async fn stop(&self, tunnel_id: &TunnelId) -> Result<(), CollaboratorError> {
        let Some(mut process) = self.processes.lock().await.remove(tunnel_id) else {
            return Ok(());
        };

        if let Ok(Some(_)) = process.child.try_wait() {
            return Ok(());
        }
        process
            .child
            .kill()
            .await
            .map_err(|e| CollaboratorError::TunnelStopFailed {
                tunnel_id: tunnel_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn status(&self, tunnel_id: &TunnelId) -> Result<TunnelReport, CollaboratorError> {
        let mut processes = self.processes.lock().await;
        let Some(process) = processes.get_mut(tunnel_id) else {
            return Ok(TunnelReport::inactive());
        };

        match process.child.try_wait() {
            Ok(None) => Ok(TunnelReport {
                status: TunnelStatus::Active,
                public_url: Some(process.url.clone()),
                local_port: Some(process.local_port),
            }),
            Ok(Some(exit)) => {
                tracing::warn!("Tunnel {} client exited: {}", tunnel_id, exit);
                Ok(TunnelReport {
                    status: TunnelStatus::Error,
                    public_url: None,
                    local_port: Some(process.local_port),
                })
            }
            Err(e) => Err(CollaboratorError::TunnelUnavailable {
                tunnel_id: tunnel_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Pull a public URL out of one line of client output
pub fn extract_url(line: &str) -> Option<String> {
    let line = line.trim();
    if line.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            return value
                .get("url")
                .and_then(|u| u.as_str())
                .filter(|u| u.contains("://"))
                .map(String::from);
        }
    }

    line.split_whitespace()
        .filter_map(|token| token.strip_prefix("url="))
        .map(|url| url.trim_matches('"'))
        .find(|url| url.contains("://"))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_url_from_json_log() {
        let line = r#"{"addr":"localhost:30000","lvl":"info","msg":"started tunnel","name":"command_line","url":"tcp://4.tcp.ngrok.io:14321"}"#;
        assert_eq!(
            extract_url(line).as_deref(),
            Some("tcp://4.tcp.ngrok.io:14321")
        );
    }

    #[test]
    fn test_extract_url_from_logfmt() {
        let line = r#"t=2024-05-01T10:00:00 lvl=info msg="started tunnel" obj=tunnels name=command_line addr=//localhost:30000 url=tcp://2.tcp.ngrok.io:17001"#;
        assert_eq!(
            extract_url(line).as_deref(),
            Some("tcp://2.tcp.ngrok.io:17001")
        );
    }

    #[test]
    fn test_ignores_lines_without_url() {
        assert!(extract_url(r#"{"lvl":"info","msg":"client session established"}"#).is_none());
        assert!(extract_url("t=0 lvl=info msg=\"open config file\"").is_none());
        assert!(extract_url("url=").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_lifecycle() {
        let config = TunnelConfig {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo 'lvl=info msg=\"started tunnel\" url=tcp://0.tcp.ngrok.io:{port}'; sleep 30"
                    .to_string(),
            ],
            ..TunnelConfig::default()
        };
        let tunnels = ProcessTunnels::new(config);
        let id = TunnelId("tunnel_ppp0".to_string());

        let url = tunnels.start(&id, 30000).await.unwrap();
        assert_eq!(url, "tcp://0.tcp.ngrok.io:30000");

        let report = tunnels.status(&id).await.unwrap();
        assert_eq!(report.status, TunnelStatus::Active);
        assert_eq!(report.local_port, Some(30000));

        tunnels.stop(&id).await.unwrap();
        tunnels.stop(&id).await.unwrap();
        assert_eq!(tunnels.status(&id).await.unwrap().status, TunnelStatus::Inactive);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_client_exiting_early_fails_start() {
        let config = TunnelConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo 'ERR_NGROK_4018 authentication failed'".to_string()],
            ..TunnelConfig::default()
        };
        let tunnels = ProcessTunnels::new(config);
        let err = tunnels
            .start(&TunnelId("tunnel_ppp0".to_string()), 30000)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::TunnelStartFailed { .. }));
    }
}
