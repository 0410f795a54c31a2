//! Translates an emitted KPI stdout line into the typed JSON/UDP KPI
//! datagram described in §6. One datagram is emitted per surviving stdout
//! line, carrying `{ts, radio, type, ...}`; lines that don't match a known
//! pattern fall back to the generic `log` type with the raw text.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum KpiEvent {
    #[serde(rename = "lte_kpi_dl")]
    LteKpiDl { bw_mhz: f64, mcs: i64 },
    #[serde(rename = "lte_kpi_ul")]
    LteKpiUl { mcs: i64 },
    #[serde(rename = "lte_kpi_tx")]
    LteKpiTx { tx_power_dbm: i64 },
    #[serde(rename = "lte_kpi_ta")]
    LteKpiTa { ta: i64 },
    #[serde(rename = "lte_uplink_kpi")]
    LteUplinkKpi {
        ul_mcs: Option<i64>,
        tx_power_dbm: Option<i64>,
        ta: Option<i64>,
    },
    #[serde(rename = "lte_rach")]
    LteRach {
        result: String,
        attempt: i64,
        contention: bool,
        preamble: i64,
        preamble_power_dbm: i64,
        ta: i64,
        tc_rnti: i64,
        earfcn: i64,
    },
    #[serde(rename = "lte_throughput")]
    LteThroughput { mbps: f64 },
    #[serde(rename = "lte_rrc_state")]
    LteRrcState { state: String },
    #[serde(rename = "lte_rrc_state_cause")]
    LteRrcStateCause { cause: String },
    #[serde(rename = "lte_primary_cell")]
    LtePrimaryCell {
        earfcn: i64,
        pci: i64,
        rsrp: f64,
        rssi: f64,
        rsrq: f64,
        priority: Option<i64>,
    },
    #[serde(rename = "lte_scell_connected")]
    LteScellConnected {
        pci: i64,
        rsrp: f64,
        rssi: f64,
        rsrq: f64,
    },
    #[serde(rename = "lte_ncell")]
    LteNcell {
        cell_index: i64,
        earfcn: i64,
        pci: i64,
        rsrp: f64,
        rssi: f64,
        rsrq: f64,
    },
    #[serde(rename = "rrc_event")]
    RrcEvent { event_name: String },
    #[serde(rename = "log")]
    Log { message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KpiDatagram {
    pub ts: DateTime<Utc>,
    pub radio: u8,
    #[serde(flatten)]
    pub event: KpiEvent,
}

impl KpiDatagram {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Pulls `key:value` / `key=value` tokens out of a line, tolerant of the
/// small punctuation variance across the lines this crate itself emits.
fn tokens(rest: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for part in rest.split_whitespace() {
        let part = part.trim_end_matches(',');
        if let Some((k, v)) = part.split_once(['=', ':']) {
            map.insert(k.to_string(), v.to_string());
        }
    }
    map
}

fn parse_f64(map: &std::collections::HashMap<String, String>, key: &str) -> f64 {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

fn parse_i64(map: &std::collections::HashMap<String, String>, key: &str) -> i64 {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn dash_or(value: &str) -> Option<i64> {
    if value == "-" {
        None
    } else {
        value.parse().ok()
    }
}

/// Classifies a KPI stdout line and builds the corresponding [`KpiEvent`].
/// Any line that doesn't match a recognized shape becomes a generic `log`
/// event carrying the verbatim text -- this function never fails.
pub fn classify_line(line: &str) -> KpiEvent {
    if let Some(rest) = line.strip_suffix("dBm").and_then(|s| {
        let s = s.trim();
        s.strip_prefix("LTE KPI TX: est. TX power=")
    }) {
        return KpiEvent::LteKpiTx {
            tx_power_dbm: rest.trim().parse().unwrap_or(0),
        };
    }
    if let Some(rest) = line.strip_prefix("LTE KPI UL: MCS=") {
        return KpiEvent::LteKpiUl {
            mcs: rest.trim().parse().unwrap_or(0),
        };
    }
    if let Some(rest) = line.strip_prefix("LTE KPI: TA=") {
        return KpiEvent::LteKpiTa {
            ta: rest.trim().parse().unwrap_or(0),
        };
    }
    if let Some(rest) = line.strip_prefix("LTE KPI: UL MCS=") {
        // "<a>, TX power=<b> dBm, TA=<c>"
        let parts: Vec<&str> = rest.split(", ").collect();
        let ul_mcs = parts.first().and_then(|p| dash_or(p.trim()));
        let tx_power_dbm = parts
            .get(1)
            .and_then(|p| p.trim().strip_prefix("TX power="))
            .and_then(|p| dash_or(p.trim_end_matches(" dBm").trim()));
        let ta = parts
            .get(2)
            .and_then(|p| p.trim().strip_prefix("TA="))
            .and_then(|p| dash_or(p.trim()));
        return KpiEvent::LteUplinkKpi {
            ul_mcs,
            tx_power_dbm,
            ta,
        };
    }
    if let Some(rest) = line.strip_prefix("LTE KPI RACH:") {
        let map = tokens(rest);
        return KpiEvent::LteRach {
            result: map.get("result").cloned().unwrap_or_default(),
            attempt: parse_i64(&map, "attempt"),
            contention: map.get("contention").map(|v| v == "true").unwrap_or(false),
            preamble: parse_i64(&map, "preamble"),
            preamble_power_dbm: parse_i64(&map, "preamble_power"),
            ta: parse_i64(&map, "TA"),
            tc_rnti: parse_i64(&map, "TC-RNTI"),
            earfcn: parse_i64(&map, "EARFCN"),
        };
    }
    if let Some(rest) = line.strip_prefix("LTE throughput: ") {
        let mbps = rest
            .trim_end_matches(" Mbps")
            .parse::<f64>()
            .unwrap_or(0.0);
        return KpiEvent::LteThroughput { mbps };
    }
    if let Some(rest) = line.strip_prefix("LTE RRC State Cause: ") {
        return KpiEvent::LteRrcStateCause {
            cause: rest.trim().to_string(),
        };
    }
    if let Some(rest) = line.strip_prefix("LTE RRC State: ") {
        return KpiEvent::LteRrcState {
            state: rest.trim().to_string(),
        };
    }
    if let Some(rest) = line.strip_prefix("LTE Primary Cell (Connected): ") {
        let map = tokens(rest);
        return KpiEvent::LteScellConnected {
            pci: parse_i64(&map, "PCI"),
            rsrp: parse_f64(&map, "RSRP"),
            rssi: parse_f64(&map, "RSSI"),
            rsrq: parse_f64(&map, "RSRQ"),
        };
    }
    if let Some(rest) = line.strip_prefix("LTE Primary Cell: ") {
        let map = tokens(rest);
        return KpiEvent::LtePrimaryCell {
            earfcn: parse_i64(&map, "EARFCN"),
            pci: parse_i64(&map, "PCI"),
            rsrp: parse_f64(&map, "RSRP"),
            rssi: parse_f64(&map, "RSSI"),
            rsrq: parse_f64(&map, "RSRQ"),
            priority: map.get("Priority").and_then(|v| v.parse().ok()),
        };
    }
    if let Some(rest) = line.strip_prefix("Neighbor cell ") {
        if let Some((idx, tail)) = rest.split_once(':') {
            let map = tokens(tail);
            return KpiEvent::LteNcell {
                cell_index: idx.trim().parse().unwrap_or(0),
                earfcn: parse_i64(&map, "EARFCN"),
                pci: parse_i64(&map, "PCI"),
                rsrp: parse_f64(&map, "RSRP"),
                rssi: parse_f64(&map, "RSSI"),
                rsrq: parse_f64(&map, "RSRQ"),
            };
        }
    }
    if let Some(rest) = line.strip_prefix("RRC event: ") {
        return KpiEvent::RrcEvent {
            event_name: rest.trim().to_string(),
        };
    }
    // "<bw>MHz BW MCS=<n>" -- matched last since it has no fixed literal prefix.
    if let Some((bw_part, mcs_part)) = line.split_once("MHz BW MCS=") {
        if let Ok(bw_mhz) = bw_part.trim().parse::<f64>() {
            if let Ok(mcs) = mcs_part.trim().parse::<i64>() {
                return KpiEvent::LteKpiDl { bw_mhz, mcs };
            }
        }
    }
    KpiEvent::Log {
        message: line.to_string(),
    }
}

pub fn build_datagram(radio: u8, ts: DateTime<Utc>, line: &str) -> KpiDatagram {
    KpiDatagram {
        ts,
        radio,
        event: classify_line(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dl_mcs_line() {
        assert_eq!(
            classify_line("20MHz BW MCS=15"),
            KpiEvent::LteKpiDl {
                bw_mhz: 20.0,
                mcs: 15
            }
        );
    }

    #[test]
    fn classifies_combined_kpi_with_dashes() {
        assert_eq!(
            classify_line("LTE KPI: UL MCS=-, TX power=7 dBm, TA=12"),
            KpiEvent::LteUplinkKpi {
                ul_mcs: None,
                tx_power_dbm: Some(7),
                ta: Some(12),
            }
        );
    }

    #[test]
    fn unrecognized_line_falls_back_to_log() {
        assert_eq!(
            classify_line("some unrelated text"),
            KpiEvent::Log {
                message: "some unrelated text".to_string()
            }
        );
    }

    #[test]
    fn classifies_rrc_state() {
        assert_eq!(
            classify_line("LTE RRC State: RRC_CONNECTED"),
            KpiEvent::LteRrcState {
                state: "RRC_CONNECTED".to_string()
            }
        );
    }
}
