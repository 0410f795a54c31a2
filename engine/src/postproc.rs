//! Post-Processor / Emitter (§4.11, C11 + C12): turns a stream of
//! [`DispatchResult`]s into the final output lines and bytes. Owns
//! per-radio throughput accounting, de-duplication, RRC-state gating,
//! throttling, and the combined-KPI grouping that swallows UL MCS / TX
//! power / TA lines into a single once-per-second line while connected.

use std::time::Instant;

use chrono::Utc;

use crate::dispatch::DispatchResult;
use crate::mask::Layer;
use crate::state::{RadioStateTable, RrcState};

const THROUGHPUT_WINDOW: std::time::Duration = std::time::Duration::from_secs(1);
const DL_MCS_THROTTLE: std::time::Duration = std::time::Duration::from_secs(2);
const SERVING_CELL_THROTTLE: std::time::Duration = std::time::Duration::from_secs(1);
const SERVING_CELL_REFRESH_AFTER: std::time::Duration = std::time::Duration::from_secs(2);
const COMBINED_KPI_THROTTLE: std::time::Duration = std::time::Duration::from_secs(1);

/// Where surviving output goes. The CLI layer supplies a concrete
/// implementation (stdout + optional PCAP/JSON-UDP sinks); this crate only
/// defines the seam.
pub trait OutputSink {
    fn write_cp(&mut self, radio_id: u8, layer: Option<Layer>, bytes: &[u8]);
    fn write_up(&mut self, radio_id: u8, layer: Option<Layer>, bytes: &[u8]);
    fn print_kpi(&mut self, radio_id: u8, line: &str);
    fn send_kpi_json(&mut self, _radio_id: u8, _line: &str) {}
}

pub struct PostProcessorConfig {
    pub kpi_mode: bool,
    /// Fold KPI lines into the same GSMTAP/Osmocore stream as control-plane
    /// traffic instead of (or in addition to) a separate stdout stream.
    pub combined_stdout: bool,
    /// `None` means every layer is passed through.
    pub active_layers: Option<Vec<Layer>>,
    pub json_udp: bool,
}

pub struct PostProcessor<'a> {
    state: RadioStateTable,
    config: PostProcessorConfig,
    sink: &'a mut dyn OutputSink,
}

impl<'a> PostProcessor<'a> {
    pub fn new(config: PostProcessorConfig, sink: &'a mut dyn OutputSink) -> Self {
        PostProcessor {
            state: RadioStateTable::new(),
            config,
            sink,
        }
    }

    pub fn handle(&mut self, result: DispatchResult) {
        let now = Instant::now();

        if self.layer_allowed(result.layer) {
            for bytes in &result.cp {
                self.sink.write_cp(result.radio_id, result.layer, bytes);
            }
            for bytes in &result.up {
                self.sink.write_up(result.radio_id, result.layer, bytes);
            }
        }

        if self.config.kpi_mode && (result.dl_bytes > 0 || result.ul_bytes > 0) {
            self.accumulate_throughput(result.radio_id, result.dl_bytes, result.ul_bytes, now);
        }

        for line in &result.stdout {
            self.emit_line(result.radio_id, line, now);
        }
    }

    fn layer_allowed(&self, layer: Option<Layer>) -> bool {
        match (&self.config.active_layers, layer) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(active), Some(l)) => active.iter().any(|a| *a == l),
        }
    }

    fn accumulate_throughput(&mut self, radio_id: u8, dl: u64, ul: u64, now: Instant) {
        let state = self.state.get_mut(radio_id, now);
        state.throughput_window.dl_bytes += dl;
        state.throughput_window.ul_bytes += ul;
        let connected = state.rrc_state.is_connected();
        let due = now.duration_since(state.throughput_window.window_start) >= THROUGHPUT_WINDOW;
        if connected && due {
            let total = state.throughput_window.dl_bytes + state.throughput_window.ul_bytes;
            let mbps = (total as f64 * 8.0) / 1_000_000.0;
            state.throughput_window.dl_bytes = 0;
            state.throughput_window.ul_bytes = 0;
            state.throughput_window.window_start = now;
            let line = format!("LTE throughput: {mbps:.2} Mbps");
            self.sink_line(radio_id, &line);
        }
    }

    fn emit_line(&mut self, radio_id: u8, line: &str, now: Instant) {
        if let Some(captured) = self.maybe_capture_state(radio_id, line, now) {
            self.sink_line(radio_id, &captured);
            return;
        }

        let is_dl_mcs = is_dl_mcs_line(line);
        let is_ta = line.starts_with("LTE KPI: TA=");
        if is_dl_mcs || is_ta {
            let connected = self.state.get_mut(radio_id, now).rrc_state.is_connected();
            if !connected {
                return;
            }
        }

        if is_dl_mcs {
            let state = self.state.get_mut(radio_id, now);
            if let Some(last) = state.last_dl_mcs_emit {
                if now.duration_since(last) < DL_MCS_THROTTLE {
                    return;
                }
            }
            state.last_dl_mcs_emit = Some(now);
            self.maybe_refresh_serving_cell(radio_id, now);
            self.sink_line_dedup(radio_id, line, now);
            return;
        }

        if let Some(combined) = self.group_combined_kpi(radio_id, line, now) {
            self.maybe_refresh_serving_cell(radio_id, now);
            self.sink_line_dedup(radio_id, &combined, now);
            return;
        }
        if swallowed_into_combined(line) {
            return;
        }

        if is_serving_cell_line(line) {
            let state = self.state.get_mut(radio_id, now);
            let ok = state
                .last_serving_cell_emit
                .map(|t| now.duration_since(t) >= SERVING_CELL_THROTTLE)
                .unwrap_or(true);
            if ok {
                state.last_serving_cell_emit = Some(now);
            } else {
                return;
            }
        }

        self.sink_line_dedup(radio_id, line, now);
    }

    /// Swallows UL MCS / TX power / TA lines into the radio's slots while
    /// connected. The combined line fires once all three slots have a value
    /// or, failing that, once a full second has passed since the first
    /// slot in this round was set -- whichever comes first (§4.11.6).
    /// `last_combined_kpi_emit` doubles as the "first slot touched at" mark
    /// for the in-progress round; it's cleared back to `None` once the
    /// round closes.
    fn group_combined_kpi(&mut self, radio_id: u8, line: &str, now: Instant) -> Option<String> {
        let state = self.state.get_mut(radio_id, now);
        if !state.rrc_state.is_connected() {
            return None;
        }
        let matched = if let Some(rest) = line.strip_prefix("LTE KPI UL: MCS=") {
            state.combined_kpi.ul_mcs = rest.trim().parse().ok();
            true
        } else if let Some(rest) = line
            .strip_prefix("LTE KPI TX: est. TX power=")
            .and_then(|s| s.strip_suffix("dBm"))
        {
            state.combined_kpi.tx_power_dbm = rest.trim().parse().ok();
            true
        } else if let Some(rest) = line.strip_prefix("LTE KPI: TA=") {
            state.combined_kpi.ta = rest.trim().parse().ok();
            true
        } else {
            false
        };
        if !matched {
            return None;
        }
        if state.last_combined_kpi_emit.is_none() {
            state.last_combined_kpi_emit = Some(now);
        }

        let complete = state.combined_kpi.ul_mcs.is_some()
            && state.combined_kpi.tx_power_dbm.is_some()
            && state.combined_kpi.ta.is_some();
        let round_expired = state
            .last_combined_kpi_emit
            .map(|started| now.duration_since(started) >= COMBINED_KPI_THROTTLE)
            .unwrap_or(false);
        if !complete && !round_expired {
            return None;
        }

        let fmt = |v: Option<i64>| v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string());
        let combined = format!(
            "LTE KPI: UL MCS={}, TX power={} dBm, TA={}",
            fmt(state.combined_kpi.ul_mcs),
            fmt(state.combined_kpi.tx_power_dbm),
            fmt(state.combined_kpi.ta),
        );
        state.combined_kpi.clear();
        state.last_combined_kpi_emit = None;
        Some(combined)
    }

    /// Shared by the combined-KPI path and the plain serving-cell path: if
    /// the cached serving-cell line hasn't been re-emitted recently, send it
    /// again alongside whatever else is being emitted right now. Resolves
    /// the double serving-cell emission path the reference keeps separate.
    fn maybe_refresh_serving_cell(&mut self, radio_id: u8, now: Instant) {
        let state = self.state.get_mut(radio_id, now);
        if !state.rrc_state.is_connected() {
            return;
        }
        let stale = state
            .last_serving_cell_emit
            .map(|t| now.duration_since(t) > SERVING_CELL_REFRESH_AFTER)
            .unwrap_or(true);
        if !stale {
            return;
        }
        let Some(line) = state.last_serving_cell_line.clone() else {
            return;
        };
        state.last_serving_cell_emit = Some(now);
        self.sink_line(radio_id, &line);
    }

    fn maybe_capture_state(&mut self, radio_id: u8, line: &str, now: Instant) -> Option<String> {
        if let Some(name) = line.strip_prefix("LTE RRC State: ") {
            let state = self.state.get_mut(radio_id, now);
            state.rrc_state = RrcState::parse(name.trim());
            return Some(line.to_string());
        }
        if is_serving_cell_line(line) {
            self.state.get_mut(radio_id, now).last_serving_cell_line = Some(line.to_string());
        }
        None
    }

    fn sink_line_dedup(&mut self, radio_id: u8, line: &str, now: Instant) {
        let state = self.state.get_mut(radio_id, now);
        if !line.starts_with("LTE KPI RACH:") && state.last_kpi_line.as_deref() == Some(line) {
            return;
        }
        state.last_kpi_line = Some(line.to_string());
        self.sink_line(radio_id, line);
    }

    fn sink_line(&mut self, radio_id: u8, line: &str) {
        self.sink.print_kpi(radio_id, line);
        if self.config.json_udp {
            self.sink.send_kpi_json(radio_id, line);
        }
        if self.config.combined_stdout {
            let gsmtap = crate::gsmtap::build_osmocore_log_record(
                Utc::now().timestamp() as u32,
                "diagcap",
                0,
                0,
                "kpi",
                "postproc.rs",
                0,
                line,
            );
            self.sink.write_cp(radio_id, None, &gsmtap);
        }
    }
}

fn is_dl_mcs_line(line: &str) -> bool {
    line.contains("MHz BW MCS=")
}

fn is_serving_cell_line(line: &str) -> bool {
    line.starts_with("LTE Primary Cell:") || line.starts_with("LTE Primary Cell (Connected):")
}

fn swallowed_into_combined(line: &str) -> bool {
    line.starts_with("LTE KPI UL: MCS=")
        || line.starts_with("LTE KPI TX: est. TX power=")
        || line.starts_with("LTE KPI: TA=")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        kpi_lines: Vec<(u8, String)>,
        cp_frames: usize,
    }

    impl OutputSink for RecordingSink {
        fn write_cp(&mut self, _radio_id: u8, _layer: Option<Layer>, _bytes: &[u8]) {
            self.cp_frames += 1;
        }
        fn write_up(&mut self, _radio_id: u8, _layer: Option<Layer>, _bytes: &[u8]) {}
        fn print_kpi(&mut self, radio_id: u8, line: &str) {
            self.kpi_lines.push((radio_id, line.to_string()));
        }
    }

    fn config() -> PostProcessorConfig {
        PostProcessorConfig {
            kpi_mode: true,
            combined_stdout: false,
            active_layers: None,
            json_udp: false,
        }
    }

    fn result_with_lines(lines: Vec<&str>) -> DispatchResult {
        DispatchResult {
            radio_id: 0,
            stdout: lines.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn dl_mcs_line_suppressed_while_disconnected() {
        let mut sink = RecordingSink::default();
        let mut pp = PostProcessor::new(config(), &mut sink);
        pp.handle(result_with_lines(vec!["20MHz BW MCS=10"]));
        assert!(sink.kpi_lines.is_empty());
    }

    #[test]
    fn dl_mcs_line_emitted_once_connected_and_throttled_after() {
        let mut sink = RecordingSink::default();
        let mut pp = PostProcessor::new(config(), &mut sink);
        pp.handle(result_with_lines(vec!["LTE RRC State: RRC_CONNECTED"]));
        pp.handle(result_with_lines(vec!["20MHz BW MCS=10"]));
        pp.handle(result_with_lines(vec!["20MHz BW MCS=11"]));
        let dl_mcs_count = sink
            .kpi_lines
            .iter()
            .filter(|(_, l)| l.contains("MHz BW MCS="))
            .count();
        assert_eq!(dl_mcs_count, 1);
    }

    #[test]
    fn duplicate_non_rach_lines_are_suppressed() {
        let mut sink = RecordingSink::default();
        let mut pp = PostProcessor::new(config(), &mut sink);
        pp.handle(result_with_lines(vec!["Build ID: X"]));
        pp.handle(result_with_lines(vec!["Build ID: X"]));
        let count = sink
            .kpi_lines
            .iter()
            .filter(|(_, l)| l == "Build ID: X")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn rach_lines_are_never_deduplicated() {
        let mut sink = RecordingSink::default();
        let mut pp = PostProcessor::new(config(), &mut sink);
        let rach = "LTE KPI RACH: result=success attempt=1 contention=false preamble=0 preamble_power=0dBm TA=0 TC-RNTI=0 EARFCN=0";
        pp.handle(result_with_lines(vec![rach]));
        pp.handle(result_with_lines(vec![rach]));
        let count = sink.kpi_lines.iter().filter(|(_, l)| l == rach).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn combined_kpi_groups_and_swallows_individual_lines() {
        let mut sink = RecordingSink::default();
        let mut pp = PostProcessor::new(config(), &mut sink);
        pp.handle(result_with_lines(vec!["LTE RRC State: RRC_CONNECTED"]));
        pp.handle(result_with_lines(vec![
            "LTE KPI UL: MCS=5",
            "LTE KPI TX: est. TX power=10dBm",
            "LTE KPI: TA=2",
        ]));
        let combined: Vec<_> = sink
            .kpi_lines
            .iter()
            .filter(|(_, l)| l.starts_with("LTE KPI: UL MCS="))
            .collect();
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].1, "LTE KPI: UL MCS=5, TX power=10 dBm, TA=2");
        let individual_survivors = sink
            .kpi_lines
            .iter()
            .filter(|(_, l)| l.starts_with("LTE KPI UL: MCS=") || l.starts_with("LTE KPI TX:"))
            .count();
        assert_eq!(individual_survivors, 0);
    }
}
