//! Expose binary and system information for embedding in pcap section
//! headers and session-summary output.

#[derive(Debug, Clone)]
pub struct RuntimeMetadata {
    pub engine_version: String,
    pub system_os: String,
    pub arch: String,
}

impl Default for RuntimeMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeMetadata {
    pub fn new() -> Self {
        RuntimeMetadata {
            engine_version: env!("CARGO_PKG_VERSION").to_owned(),
            system_os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}
