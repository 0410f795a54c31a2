use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config file parsing error: {0}")]
    ConfigFileParsingError(#[from] toml::de::Error),
    #[error("requested transport is not implemented in this build: {0}")]
    TransportNotImplemented(&'static str),
    #[error("invalid layer name {0:?} (expected one of ip,nas,rrc,pdcp,rlc,mac,qmi)")]
    InvalidLayer(String),
    #[error("mask negotiation failed: {0}")]
    MaskNegotiation(#[from] diagcap_engine::mask::MaskNegotiatorError),
    #[error("session loop failed: {0}")]
    Session(#[from] diagcap_engine::session::SessionError),
    #[error("hash store load failed: {0}")]
    HashStore(#[from] diagcap_engine::hashdb::HashStoreError),
    #[error("pcap writer error: {0}")]
    Pcap(#[from] diagcap_engine::pcap::GsmtapPcapError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
