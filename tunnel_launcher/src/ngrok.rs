use crate::{config::TunnelConfig, error::LauncherError, process::ManagedProcess};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    pub name: String,
    pub public_url: String,
    #[serde(default)]
    pub proto: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TunnelRequest {
    addr: String,
    proto: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TunnelList {
    tunnels: Vec<Tunnel>,
}

/// Client for the agent's local REST API.
#[derive(Debug, Clone)]
pub struct NgrokApi {
    client: reqwest::Client,
    base_url: String,
}

impl NgrokApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn list_tunnels(&self) -> Result<Vec<Tunnel>, LauncherError> {
        let response = self
            .client
            .get(format!("{}/api/tunnels", self.base_url))
            .send()
            .await?;
        let list: TunnelList = check_status(response).await?.json().await?;
        Ok(list.tunnels)
    }

    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), LauncherError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.list_tunnels().await {
                Ok(_) => return Ok(()),
                Err(e) => tracing::debug!("ngrok API not ready yet: {}", e),
            }
            if Instant::now() >= deadline {
                return Err(LauncherError::StartupTimeout(timeout));
            }
            sleep(interval).await;
        }
    }

    pub async fn create_tunnel(&self, name: &str, port: u16) -> Result<Tunnel, LauncherError> {
        let request = TunnelRequest {
            addr: port.to_string(),
            proto: "http".to_string(),
            name: name.to_string(),
        };
        let response = self
            .client
            .post(format!("{}/api/tunnels", self.base_url))
            .json(&request)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn delete_tunnel(&self, name: &str) -> Result<(), LauncherError> {
        let response = self
            .client
            .delete(format!("{}/api/tunnels/{}", self.base_url, name))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LauncherError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LauncherError::ApiStatus {
        status: status.as_u16(),
        body,
    })
}

/// A running ngrok agent process together with its API client.
pub struct NgrokAgent {
    process: ManagedProcess,
    api: NgrokApi,
    stop_timeout: Duration,
}

impl NgrokAgent {
    pub async fn start(config: &TunnelConfig) -> Result<Self, LauncherError> {
        let args = ["start", "--none", "--log", "stdout"].map(String::from);
        let envs: Vec<(&str, &str)> = config
            .authtoken
            .as_deref()
            .map(|token| ("NGROK_AUTHTOKEN", token))
            .into_iter()
            .collect();

        let process = ManagedProcess::spawn("ngrok agent", &config.ngrok_command, &args, &envs, true)?;
        let api = NgrokApi::new(&config.ngrok_api);

        if let Err(e) = api
            .wait_until_ready(config.startup_timeout(), config.poll_interval())
            .await
        {
            process.stop(config.stop_timeout()).await;
            return Err(e);
        }

        Ok(Self {
            process,
            api,
            stop_timeout: config.stop_timeout(),
        })
    }

    pub async fn connect(&self, name: &str, port: u16) -> Result<Tunnel, LauncherError> {
        let tunnel = self.api.create_tunnel(name, port).await?;
        tracing::info!("ngrok tunnel created: {} -> {}", tunnel.public_url, port);
        Ok(tunnel)
    }

    pub async fn kill(self, tunnel_name: &str) {
        if let Err(e) = self.api.delete_tunnel(tunnel_name).await {
            tracing::warn!("Failed to close tunnel {}: {}", tunnel_name, e);
        }
        self.process.stop(self.stop_timeout).await;
    }
}
