//! Per-radio state tracked by the post-processor (§4.11, C11). A radio's
//! state is created lazily on first reference and mutated only by
//! [`crate::postproc::PostProcessor`]; nothing else ever touches it.

use std::collections::HashMap;
use std::time::Instant;

/// 3GPP RRC connection state, plus `Unknown` for before the first
/// `LTE RRC State:` line has been observed for a radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RrcState {
    #[default]
    Unknown,
    Idle,
    Connecting,
    Connected,
    Inactive,
    Reestablishing,
    HandoverInProgress,
    Released,
}

impl RrcState {
    /// Parses the state name as it appears in an `LTE RRC State: <name>`
    /// stdout line (and the event-id 1606 decoder's name map, §4.6.1).
    pub fn parse(name: &str) -> Self {
        match name {
            "RRC_IDLE" => RrcState::Idle,
            "RRC_CONNECTING" => RrcState::Connecting,
            "RRC_CONNECTED" => RrcState::Connected,
            "RRC_INACTIVE" => RrcState::Inactive,
            "RRC_REESTABLISHING" => RrcState::Reestablishing,
            "RRC_HANDOVER_IN_PROGRESS" => RrcState::HandoverInProgress,
            "RRC_RELEASED" => RrcState::Released,
            _ => RrcState::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RrcState::Unknown => "RRC_UNKNOWN",
            RrcState::Idle => "RRC_IDLE",
            RrcState::Connecting => "RRC_CONNECTING",
            RrcState::Connected => "RRC_CONNECTED",
            RrcState::Inactive => "RRC_INACTIVE",
            RrcState::Reestablishing => "RRC_REESTABLISHING",
            RrcState::HandoverInProgress => "RRC_HANDOVER_IN_PROGRESS",
            RrcState::Released => "RRC_RELEASED",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, RrcState::Connected)
    }
}

/// Rolling DL/UL byte-count accumulator for the throughput KPI (§4.11.1).
#[derive(Debug, Clone)]
pub struct ThroughputWindow {
    pub window_start: Instant,
    pub dl_bytes: u64,
    pub ul_bytes: u64,
}

impl ThroughputWindow {
    fn new(now: Instant) -> Self {
        ThroughputWindow {
            window_start: now,
            dl_bytes: 0,
            ul_bytes: 0,
        }
    }
}

/// Per-radio slots the combined-KPI grouping logic (§4.11.6) accumulates
/// into before the once-per-second emission.
#[derive(Debug, Clone, Default)]
pub struct CombinedKpiSlots {
    pub ul_mcs: Option<i64>,
    pub tx_power_dbm: Option<i64>,
    pub ta: Option<i64>,
}

impl CombinedKpiSlots {
    pub fn is_empty(&self) -> bool {
        self.ul_mcs.is_none() && self.tx_power_dbm.is_none() && self.ta.is_none()
    }

    pub fn clear(&mut self) {
        *self = CombinedKpiSlots::default();
    }
}

/// All mutable state the post-processor tracks for a single radio-id.
#[derive(Debug, Clone)]
pub struct RadioState {
    pub rrc_state: RrcState,
    pub last_serving_cell_line: Option<String>,
    pub last_serving_cell_emit: Option<Instant>,
    pub last_dl_mcs_emit: Option<Instant>,
    pub last_combined_kpi_emit: Option<Instant>,
    pub last_kpi_line: Option<String>,
    pub throughput_window: ThroughputWindow,
    pub combined_kpi: CombinedKpiSlots,
}

impl RadioState {
    fn new(now: Instant) -> Self {
        RadioState {
            rrc_state: RrcState::Unknown,
            last_serving_cell_line: None,
            last_serving_cell_emit: None,
            last_dl_mcs_emit: None,
            last_combined_kpi_emit: None,
            last_kpi_line: None,
            throughput_window: ThroughputWindow::new(now),
            combined_kpi: CombinedKpiSlots::default(),
        }
    }
}

/// Owns the per-radio state map. Radios are keyed by the normalized
/// `radio_id` produced by the multi-radio demultiplexer (C8): 0 or 1.
#[derive(Debug, Default)]
pub struct RadioStateTable {
    radios: HashMap<u8, RadioState>,
}

impl RadioStateTable {
    pub fn new() -> Self {
        RadioStateTable::default()
    }

    /// Creates the radio's state lazily on first reference.
    pub fn get_mut(&mut self, radio_id: u8, now: Instant) -> &mut RadioState {
        self.radios
            .entry(radio_id)
            .or_insert_with(|| RadioState::new(now))
    }
}
