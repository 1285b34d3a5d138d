use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::config::AppConfig;
use crate::events::{BurnEvent, EventSink};

/// Last GPU utilization sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "percent", rename_all = "snake_case")]
pub enum MonitorReading {
    Utilization(u8),
    Unavailable,
}

impl fmt::Display for MonitorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorReading::Utilization(pct) => write!(f, "{}%", pct),
            MonitorReading::Unavailable => write!(f, "N/A"),
        }
    }
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output; first GPU wins
pub fn parse_utilization(stdout: &str) -> Option<u8> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.trim_end_matches('%').trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.round().clamp(0.0, 100.0) as u8)
}

/// Periodic, advisory GPU telemetry sampler
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    program: PathBuf,
    args: Vec<String>,
    period: Duration,
    query_timeout: Duration,
}

impl SystemMonitor {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            program: cfg.monitor_bin.clone(),
            args: cfg.monitor_args.clone(),
            period: cfg.monitor_interval(),
            query_timeout: cfg.monitor_timeout(),
        }
    }

    /// One telemetry query. Any failure maps to `Unavailable`.
    pub async fn sample(&self) -> MonitorReading {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.query_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("Telemetry query {} failed: {}", self.program.display(), e);
                return MonitorReading::Unavailable;
            }
            Err(_) => {
                debug!("Telemetry query {} timed out after {:?}", self.program.display(), self.query_timeout);
                return MonitorReading::Unavailable;
            }
        };

        if !output.status.success() {
            debug!("Telemetry query exited with {:?}", output.status.code());
            return MonitorReading::Unavailable;
        }

        parse_utilization(&String::from_utf8_lossy(&output.stdout))
            .map(MonitorReading::Utilization)
            .unwrap_or(MonitorReading::Unavailable)
    }

    /// Sample forever on a fixed interval.
    ///
    /// Each result replaces the previous one in the returned watch channel and
    /// is also emitted as `MonitorSample`. Abort the handle to stop sampling.
    pub fn spawn(self, sink: Arc<dyn EventSink>) -> (JoinHandle<()>, watch::Receiver<MonitorReading>) {
        let (tx, rx) = watch::channel(MonitorReading::Unavailable);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reading = self.sample().await;
                tx.send_replace(reading);
                sink.emit(BurnEvent::MonitorSample { reading });
            }
        });
        (handle, rx)
    }
}
