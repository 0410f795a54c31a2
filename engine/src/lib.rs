pub mod clock;
pub mod diag;
pub mod dispatch;
pub mod event;
pub mod fmt;
pub mod gsmtap;
pub mod gsmtap_parser;
pub mod hashdb;
pub mod hdlc;
pub mod kpi_json;
pub mod log_codes;
pub mod mask;
pub mod ndjson_writer;
pub mod pcap;
pub mod postproc;
pub mod qmdl;
pub mod session;
pub mod state;
pub mod transport;
pub mod util;
