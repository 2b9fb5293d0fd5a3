use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
};

use anyhow::{Result, ensure};
use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    // The control plane deployment historically passed levels as numbers,
    // 0 (trace) through 5 (fatal).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "trace" | "0" => Self::Trace,
            "debug" | "1" => Self::Debug,
            "info" | "2" => Self::Info,
            "warn" | "warning" | "3" => Self::Warn,
            "error" | "fatal" | "4" | "5" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogType {
    #[default]
    Text,
    Json,
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "text" => Self::Text,
            "json" => Self::Json,
            _ => return Err(format!("unknown log type: {value}")),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Config {
    ///
    /// control plane port
    ///
    /// TCP port of the gRPC server the control plane uses to register
    /// streams and subscribers.
    ///
    #[arg(long, env = "MSM_DP_PORT", default_value_t = 9000)]
    pub port: u16,
    ///
    /// rtp port
    ///
    /// UDP port receiving RTP from media sources. RTCP is received on the
    /// next port up, so this must leave room for it.
    ///
    #[arg(long, alias = "rtpPort", env = "MSM_DP_RTP_PORT", default_value_t = 8050)]
    pub rtp_port: u16,
    ///
    /// listen address
    ///
    /// Local address the gRPC server and both UDP sockets bind to.
    ///
    #[arg(long, env = "MSM_DP_LISTEN_IP", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_ip: IpAddr,
    ///
    /// log level
    ///
    /// One of trace, debug, info, warn, error.
    ///
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,
    ///
    /// log type
    ///
    /// text for human readable lines, json for one object per line.
    ///
    #[arg(long, env = "LOG_TYPE", default_value = "text")]
    pub log_type: LogType,
    ///
    /// worker threads
    ///
    /// Number of runtime worker threads, defaults to the number of cpus.
    ///
    #[arg(long, env = "MSM_DP_THREADS")]
    pub threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            log_level: LogLevel::default(),
            log_type: LogType::default(),
            threads: None,
            rtp_port: 8050,
            port: 9000,
        }
    }
}

impl Config {
    ///
    /// Load configure from command line parameters and environment
    /// variables, then check it.
    ///
    pub fn load() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.rtp_port != 0, "rtp port must not be 0");
        ensure!(
            self.rtp_port != u16::MAX,
            "rtp port {} leaves no room for the rtcp port",
            self.rtp_port
        );

        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn rpc_listen(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.port)
    }

    pub fn rtp_listen(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.rtp_port)
    }

    pub fn rtcp_listen(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.rtp_port.saturating_add(1))
    }
}
