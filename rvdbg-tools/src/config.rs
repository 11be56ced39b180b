use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::providers::{Data, Env, Format as _, Json, Toml, Yaml};
use figment::Figment;
use rvdbg::config::{
    DsuConfig, GenericClientConfig, JtagTapConfig, LogLevel, ProtocolConfig, ServerConfig,
};
use serde::{Deserialize, Serialize};

/// Base name of the configuration files, searched in `.` and the home directory.
const CONFIG_FILE: &str = "rvdbg";

/// Prefix of environment variables overriding the configuration.
const ENV_PREFIX: &str = "RVDBG_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dsu: DsuConfig,
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dsu: DsuConfig::default(),
            servers: vec![ServerConfig::default()],
        }
    }
}

/// Protocol selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolArg {
    Generic,
    Openocd,
}

/// Command line overrides for the first endpoint.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerOverrides {
    pub host_ip: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<ProtocolArg>,
    pub log_level: Option<LogLevel>,
}

impl ServerOverrides {
    pub fn apply(&self, config: &mut Config) {
        if self == &Self::default() {
            return;
        }
        if config.servers.is_empty() {
            config.servers.push(ServerConfig::default());
        }
        let server = &mut config.servers[0];

        if let Some(host_ip) = &self.host_ip {
            server.host_ip = Some(host_ip.clone());
        }
        if let Some(port) = self.port {
            server.host_port = port;
        }
        if let Some(log_level) = self.log_level {
            server.log_level = log_level;
        }
        match (self.protocol, &server.protocol) {
            (Some(ProtocolArg::Generic), ProtocolConfig::Openocd(_)) => {
                server.protocol = ProtocolConfig::Generic(GenericClientConfig::default());
            }
            (Some(ProtocolArg::Openocd), ProtocolConfig::Generic(_)) => {
                server.protocol = ProtocolConfig::Openocd(JtagTapConfig::default());
            }
            _ => {}
        }
    }
}

/// Parse a log level name, case insensitive.
pub fn parse_log_level(level: &str) -> Result<LogLevel, String> {
    serde_json::from_value(serde_json::Value::String(level.to_uppercase()))
        .map_err(|_| format!("unknown log level '{level}'"))
}

/// Merge the built in defaults, the configuration files, `explicit` and the
/// environment, later sources taking precedence.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    // Paths to search for the configuration file.
    let mut paths = vec![PathBuf::from(".")];
    if let Some(home) = directories::UserDirs::new().map(|user| user.home_dir().to_path_buf()) {
        paths.push(home);
    }

    let default_config = serde_json::to_string_pretty(&Config::default())?;
    let mut figment = Figment::from(Data::<Json>::string(&default_config));
    for path in paths.iter().rev() {
        figment = figment
            .merge(Toml::file(path.join(format!("{CONFIG_FILE}.toml"))))
            .merge(Json::file(path.join(format!("{CONFIG_FILE}.json"))))
            .merge(Yaml::file(path.join(format!("{CONFIG_FILE}.yaml"))))
            .merge(Yaml::file(path.join(format!("{CONFIG_FILE}.yml"))));
    }

    if let Some(path) = explicit {
        anyhow::ensure!(path.exists(), "Configuration file {path:?} does not exist.");
        figment = match path.extension().and_then(|extension| extension.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment
        .extract::<Config>()
        .context("Invalid configuration.")
}
