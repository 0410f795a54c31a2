//! Optional TOML config file layered beneath CLI flags (§1.1, A2). Following
//! the sibling daemon's config module: falls back to [`Default`] on a
//! missing or unreadable file rather than treating that as fatal.

use log::warn;
use serde::Deserialize;

use crate::error::CliError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kpi_mode: bool,
    pub combined_stdout: bool,
    pub json_udp: bool,
    pub host: String,
    pub cp_port: u16,
    pub up_port: u16,
    pub json_udp_port: u16,
    pub pcap_path: Option<String>,
    pub raw_capture_path: Option<String>,
    pub hash_files: Vec<String>,
    pub layers: Vec<String>,
    pub no_gsmtap: bool,
    pub disable_crc_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            kpi_mode: true,
            combined_stdout: false,
            json_udp: false,
            host: "127.0.0.1".to_string(),
            cp_port: 4729,
            up_port: 47290,
            json_udp_port: 4730,
            pcap_path: None,
            raw_capture_path: None,
            hash_files: Vec::new(),
            layers: Vec::new(),
            no_gsmtap: false,
            disable_crc_check: false,
        }
    }
}

/// Loads `path` as TOML, falling back to [`Config::default`] on any read or
/// parse failure that isn't a malformed file the user clearly meant to use
/// (a missing file is silent; a present-but-unparseable one is a warning).
pub fn parse_config(path: &str) -> Result<Config, CliError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) => {
            warn!("could not read config file {path}: {e}; using defaults");
            Ok(Config::default())
        }
    }
}
