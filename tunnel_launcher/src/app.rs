use crate::{config::Config, error::LauncherError, ngrok::NgrokAgent, process::ManagedProcess};
use std::future::Future;
use tokio::signal;

pub async fn start_launcher(config: Config) -> Result<(), LauncherError> {
    run_launcher(config, async {
        let received = wait_for_signal().await;
        tracing::info!("Received {}, closing tunnel and stopping the server.", received);
    })
    .await
}

/// Runs server and tunnel until `shutdown` resolves. Every child is reaped on every exit path.
pub(crate) async fn run_launcher(
    config: Config,
    shutdown: impl Future<Output = ()>,
) -> Result<(), LauncherError> {
    let tunnel_config = &config.tunnel;
    let stop_timeout = tunnel_config.stop_timeout();

    let mut server = ManagedProcess::spawn(
        "Detection server",
        &tunnel_config.server_command,
        &tunnel_config.server_args,
        &[],
        false,
    )?;

    let agent = match NgrokAgent::start(tunnel_config).await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!("Failed to start ngrok agent: {}", e);
            server.stop(stop_timeout).await;
            return Err(e);
        }
    };

    if server.has_exited() {
        agent.kill(&tunnel_config.tunnel_name).await;
        server.stop(stop_timeout).await;
        return Err(LauncherError::ServerExited);
    }

    match agent
        .connect(&tunnel_config.tunnel_name, config.server.port)
        .await
    {
        Ok(tunnel) => tracing::info!("Public URL: {}", tunnel.public_url),
        Err(e) => {
            tracing::error!("Failed to open tunnel: {}", e);
            agent.kill(&tunnel_config.tunnel_name).await;
            server.stop(stop_timeout).await;
            return Err(e);
        }
    }

    shutdown.await;

    agent.kill(&tunnel_config.tunnel_name).await;
    server.stop(stop_timeout).await;

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and names the signal received.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        received = ctrl_c => received,
        received = terminate => received,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        config::{LogLevel, ServerConfig, TunnelConfig},
        ngrok::tests::{fake_agent, Tunnels, REJECTED_TUNNEL},
        process::tests::{is_present, wait_for_file},
    };
    use std::{path::Path, time::Duration};
    use tokio::sync::oneshot;

    /// Shell command that records its pid in `pid_file` and then sleeps.
    fn sleeper_args(pid_file: &Path) -> Vec<String> {
        vec![
            "-c".to_string(),
            format!("echo $$ > {}; exec sleep 30", pid_file.display()),
        ]
    }

    fn read_pid(pid_file: &Path) -> u32 {
        std::fs::read_to_string(pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    /// Writes an executable agent stand-in that ignores its arguments.
    fn agent_script(dir: &Path, pid_file: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ngrok");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.display().to_string()
    }

    fn launcher_config(dir: &Path, ngrok_api: &str, server_args: Vec<String>) -> Config {
        Config {
            server: ServerConfig { port: 3000 },
            log_level: LogLevel::Debug,
            tunnel: TunnelConfig {
                server_command: "sh".to_string(),
                server_args,
                ngrok_command: agent_script(dir, &dir.join("agent.pid")),
                ngrok_api: ngrok_api.to_string(),
                authtoken: Some("test-token".to_string()),
                tunnel_name: "detection-server".to_string(),
                startup_timeout_ms: 2_000,
                poll_interval_ms: 20,
                stop_timeout_ms: 2_000,
            },
        }
    }

    fn tunnel_count(tunnels: &Tunnels) -> usize {
        tunnels.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_opens_tunnel_and_tears_down_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (ngrok_api, tunnels) = fake_agent(Duration::ZERO).await;
        let server_pid = dir.path().join("server.pid");
        let config = launcher_config(dir.path(), &ngrok_api, sleeper_args(&server_pid));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let launcher = tokio::spawn(run_launcher(config, async move {
            shutdown_rx.await.ok();
        }));

        for _ in 0..200 {
            if tunnel_count(&tunnels) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tunnels.lock().unwrap()[0].name, "detection-server");
        wait_for_file(&server_pid).await;
        let server = read_pid(&server_pid);
        let agent = read_pid(&dir.path().join("agent.pid"));
        assert!(is_present(server) && is_present(agent));

        shutdown_tx.send(()).unwrap();
        launcher.await.unwrap().unwrap();

        assert_eq!(tunnel_count(&tunnels), 0);
        assert!(!is_present(server));
        assert!(!is_present(agent));
    }

    #[tokio::test]
    async fn test_agent_timeout_stops_server() {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_api = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let server_pid = dir.path().join("server.pid");
        let mut config = launcher_config(dir.path(), &closed_api, sleeper_args(&server_pid));
        config.tunnel.startup_timeout_ms = 300;

        let result = run_launcher(config, std::future::pending::<()>()).await;

        assert!(matches!(result, Err(LauncherError::StartupTimeout(_))));
        assert!(!is_present(read_pid(&server_pid)));
        assert!(!is_present(read_pid(&dir.path().join("agent.pid"))));
    }

    #[tokio::test]
    async fn test_missing_agent_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ngrok_api, tunnels) = fake_agent(Duration::ZERO).await;
        let server_pid = dir.path().join("server.pid");
        let mut config = launcher_config(dir.path(), &ngrok_api, sleeper_args(&server_pid));
        let missing = dir.path().join("no-such-ngrok").display().to_string();
        config.tunnel.ngrok_command = missing.clone();

        let result = run_launcher(config, std::future::pending::<()>()).await;

        match result {
            Err(LauncherError::Spawn { program, .. }) => assert_eq!(program, missing),
            other => panic!("expected spawn error, got {:?}", other),
        }
        assert_eq!(tunnel_count(&tunnels), 0);
    }

    #[tokio::test]
    async fn test_server_exiting_early_closes_agent() {
        let dir = tempfile::tempdir().unwrap();
        let (ngrok_api, tunnels) = fake_agent(Duration::from_millis(500)).await;
        let config = launcher_config(
            dir.path(),
            &ngrok_api,
            vec!["-c".to_string(), "exit 1".to_string()],
        );

        let result = run_launcher(config, std::future::pending::<()>()).await;

        assert!(matches!(result, Err(LauncherError::ServerExited)));
        assert_eq!(tunnel_count(&tunnels), 0);
        assert!(!is_present(read_pid(&dir.path().join("agent.pid"))));
    }

    #[tokio::test]
    async fn test_rejected_tunnel_stops_both_children() {
        let dir = tempfile::tempdir().unwrap();
        let (ngrok_api, tunnels) = fake_agent(Duration::ZERO).await;
        let server_pid = dir.path().join("server.pid");
        let mut config = launcher_config(dir.path(), &ngrok_api, sleeper_args(&server_pid));
        config.tunnel.tunnel_name = REJECTED_TUNNEL.to_string();

        let result = run_launcher(config, std::future::pending::<()>()).await;

        match result {
            Err(LauncherError::ApiStatus { status, .. }) => assert_eq!(status, 502),
            other => panic!("expected status error, got {:?}", other),
        }
        assert_eq!(tunnel_count(&tunnels), 0);
        assert!(!is_present(read_pid(&server_pid)));
        assert!(!is_present(read_pid(&dir.path().join("agent.pid"))));
    }
}
