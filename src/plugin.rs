//! SIP003 plugin subprocess
//!
//! The plugin runs as a child process wired up through environment
//! variables. On the client it listens on a loopback port and talks to the
//! real server; on the server it owns the public address and forwards to a
//! loopback port the real listener moves to.

use crate::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// A running plugin child process.
pub struct Plugin {
    child: Child,
    name: String,
}

/// Pick a currently free loopback TCP port.
async fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

fn split_host_port(addr: &str) -> Result<(String, String)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::config(format!("invalid address {:?}", addr)))?;
    Ok((host.to_string(), port.to_string()))
}

/// Launch `plugin` for the Shadowsocks endpoint `ss_addr`. Returns the
/// address the core should use instead, plus the child handle.
pub async fn start(
    plugin: &str,
    plugin_opts: &str,
    ss_addr: &str,
    is_server: bool,
) -> Result<(String, Plugin)> {
    info!("starting plugin ({}) with options ({})", plugin, plugin_opts);

    let (mut ss_host, ss_port) = split_host_port(ss_addr)?;
    let local_host = "127.0.0.1".to_string();
    let local_port = free_port().await?.to_string();
    let new_addr = format!("{}:{}", local_host, local_port);

    if is_server {
        if ss_host.is_empty() {
            ss_host = "0.0.0.0".to_string();
        }
        info!("plugin ({}) will listen on {}:{}", plugin, ss_host, ss_port);
    } else {
        info!("plugin ({}) will listen on {}", plugin, new_addr);
    }

    let mut child = Command::new(plugin)
        .env("SS_REMOTE_HOST", &ss_host)
        .env("SS_REMOTE_PORT", &ss_port)
        .env("SS_LOCAL_HOST", &local_host)
        .env("SS_LOCAL_PORT", &local_port)
        .env("SS_PLUGIN_OPTIONS", plugin_opts)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::config(format!("failed to start plugin {:?}: {}", plugin, e)))?;

    if let Some(stdout) = child.stdout.take() {
        forward_output(plugin.to_string(), stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_output(plugin.to_string(), stderr);
    }

    Ok((
        new_addr,
        Plugin {
            child,
            name: plugin.to_string(),
        },
    ))
}

fn forward_output<R>(name: String, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("[{}]: {}", name, line);
        }
    });
}

impl Plugin {
    /// Resolves when the plugin exits on its own.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// SIGTERM, give the plugin 3 seconds, then SIGKILL.
    pub async fn shutdown(mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            match tokio::time::timeout(Duration::from_secs(3), self.child.wait()).await {
                Ok(_) => return,
                Err(_) => warn!("plugin ({}) ignored SIGTERM, killing", self.name),
            }
        }
        let _ = self.child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:8488").unwrap(),
            ("example.com".to_string(), "8488".to_string())
        );
        assert_eq!(
            split_host_port(":8488").unwrap(),
            ("".to_string(), "8488".to_string())
        );
        assert!(split_host_port("no-port").is_err());
    }

    #[tokio::test]
    async fn test_free_port_is_nonzero() {
        assert_ne!(free_port().await.unwrap(), 0);
    }
}
