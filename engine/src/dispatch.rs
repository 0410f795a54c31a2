//! Command Dispatcher (§4.5, C5): given an unwrapped, CRC-verified diag
//! frame, routes on the first byte to a sub-decoder. Also houses the
//! Log-Item Dispatcher (§4.7, C7), the Multi-Radio Demultiplexer (§4.8, C8),
//! and the leaf sub-decoders outlined in §4.12 that don't warrant their own
//! module.
//!
//! Per the "dynamic dispatch table" design note, the opcode table is an
//! explicit registry built once (via [`OnceLock`]), not a match buried
//! inside the wire-format enum.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::debug;

use crate::diag::{self, diaglog::LogBody};
use crate::gsmtap_parser;
use crate::hashdb::{HashStore, MtraceLine};
use crate::mask::Layer;

/// The result of dispatching one frame: zero or more GSMTAP byte vectors
/// (control-plane / user-plane) and zero or more stdout KPI lines, plus
/// optional throughput byte counts for the post-processor's accumulator.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub radio_id: u8,
    pub cp: Vec<Vec<u8>>,
    pub up: Vec<Vec<u8>>,
    pub stdout: Vec<String>,
    pub dl_bytes: u64,
    pub ul_bytes: u64,
    pub layer: Option<Layer>,
}

/// Shared, read-only state every decoder may consult (§5: hash stores are
/// read-only after load and freely shared via `Arc`).
pub struct DispatchContext {
    pub hash_store: Arc<HashStore>,
    pub events_enabled: bool,
    pub msgs_enabled: bool,
}

impl DispatchContext {
    pub fn new(hash_store: Arc<HashStore>) -> Self {
        DispatchContext {
            hash_store,
            events_enabled: true,
            msgs_enabled: true,
        }
    }
}

type DecoderFn = fn(&[u8], u8, &DispatchContext) -> Option<DispatchResult>;

fn registry() -> &'static HashMap<u8, DecoderFn> {
    static REGISTRY: OnceLock<HashMap<u8, DecoderFn>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<u8, DecoderFn> = HashMap::new();
        m.insert(diag::VERNO_F, decode_version);
        m.insert(diag::LOG_F, decode_log);
        m.insert(diag::EVENT_REPORT_F, decode_event_report);
        m.insert(diag::EXT_MSG_F, decode_ext_msg);
        m.insert(diag::EXT_BUILD_ID_F, decode_build_id);
        m.insert(diag::QSR_EXT_MSG_TERSE_F, decode_qsr_legacy);
        m.insert(diag::MULTI_RADIO_CMD_F, decode_multi_radio);
        m.insert(diag::QSR4_EXT_MSG_TERSE_F, decode_qsr4);
        m.insert(diag::QSH_TRACE_PAYLOAD_F, decode_qsh);
        m.insert(diag::SECURE_LOG_F, decode_secure_log);
        m
    })
}

/// Entry point for the session loop (C10): `frame` is HDLC-unwrapped and, in
/// live/QMDL mode, CRC-verified. Unknown opcodes are logged at debug and
/// dropped (return `None`), per §4.5 and §7's `UnknownOpcode` policy.
pub fn dispatch(frame: &[u8], radio_id: u8, ctx: &DispatchContext) -> Option<DispatchResult> {
    let opcode = *frame.first()?;
    match registry().get(&opcode) {
        Some(decoder) => decoder(frame, radio_id, ctx),
        None => {
            debug!("unhandled diag opcode {opcode:#04x}");
            None
        }
    }
}

/// Decodes bytes that came from the reserved `field - 0x13` → (width, count)
/// pair QSR4/QSH encode their packed argument vectors with (§4.12): high
/// nibble of `num_size_args` is the per-argument byte width (1-4), low
/// nibble is the argument count. A 1-3 byte argument is zero-extended to a
/// u32 little-endian.
fn decode_packed_args(buf: &[u8], num_size_args: u8) -> Vec<u32> {
    let count = (num_size_args & 0x0f) as usize;
    let width = (((num_size_args >> 4) & 0x0f).max(1) as usize).min(4);
    let mut args = Vec::with_capacity(count);
    let mut off = 0;
    for _ in 0..count {
        if off + width > buf.len() {
            break;
        }
        let mut word = [0u8; 4];
        word[..width].copy_from_slice(&buf[off..off + width]);
        args.push(u32::from_le_bytes(word));
        off += width;
    }
    args
}

fn args_join(args: &[u32]) -> String {
    args.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decodes a field that is either plain UTF-8 or, on decode failure,
/// backslash-escaped byte-by-byte rather than rejected outright (§4.12).
fn field_str(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_end_matches('\0').to_string(),
        Err(_) => bytes
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    (*b as char).to_string()
                } else {
                    format!("\\x{b:02x}")
                }
            })
            .collect(),
    }
}

/// VERNO_F: chipset/build version response. 47-byte fixed layout: a
/// component-version byte followed by four fixed-width date/time fields and
/// a chipset name. Stdout only, no GSMTAP (§4.12).
fn decode_version(frame: &[u8], radio_id: u8, _ctx: &DispatchContext) -> Option<DispatchResult> {
    let rest = &frame[1..];
    const LENS: [usize; 4] = [11, 8, 11, 8];
    const CHIPSET_LEN: usize = 8;
    let needed = 1 + LENS.iter().sum::<usize>() + CHIPSET_LEN;
    if rest.len() < needed {
        debug!("VERNO_F reply too short: {} bytes", rest.len());
        return None;
    }
    let mut off = 1; // skip comp_ver
    let mut fields = Vec::with_capacity(4);
    for len in LENS {
        fields.push(field_str(&rest[off..off + len]));
        off += len;
    }
    let chipset = field_str(&rest[off..off + CHIPSET_LEN]);
    let line = format!(
        "Compile: {} {}, Release: {} {}, Chipset: {}",
        fields[0].trim(),
        fields[1].trim(),
        fields[2].trim(),
        fields[3].trim(),
        chipset.trim(),
    );
    Some(DispatchResult {
        radio_id,
        stdout: vec![line],
        ..Default::default()
    })
}

/// EXT_BUILD_ID_F: a NUL-terminated/padded build-id string. Stdout only.
fn decode_build_id(frame: &[u8], radio_id: u8, _ctx: &DispatchContext) -> Option<DispatchResult> {
    let text = field_str(&frame[1..]);
    Some(DispatchResult {
        radio_id,
        stdout: vec![format!("Build ID: {}", text.trim())],
        ..Default::default()
    })
}

/// SECURE_LOG_F: an opaque, never-decrypted record. Stdout only: the
/// unencrypted envelope fields plus a hex dump of the encrypted body.
fn decode_secure_log(frame: &[u8], radio_id: u8, _ctx: &DispatchContext) -> Option<DispatchResult> {
    let rest = &frame[1..];
    const ENVELOPE_LEN: usize = 4 + 4 + 8 * 4; // seq + log_item_id + 8 reserved words
    if rest.len() < ENVELOPE_LEN {
        debug!("SECURE_LOG_F record too short: {} bytes", rest.len());
        return None;
    }
    let seq = u32::from_le_bytes(rest[0..4].try_into().ok()?);
    let log_item_id = u32::from_le_bytes(rest[4..8].try_into().ok()?);
    let body = &rest[ENVELOPE_LEN..];
    let hex: String = body.iter().map(|b| format!("{b:02x}")).collect();
    let line = format!("Secure log seq={seq} item_id={log_item_id:#010x} encrypted_body={hex}");
    Some(DispatchResult {
        radio_id,
        stdout: vec![line],
        ..Default::default()
    })
}

/// EXT_MSG_F: an extended text message carrying its own inline template, not
/// a hash reference. 20-byte header (opcode + 19 more bytes) followed by
/// `num_args` little-endian u32 arguments, then a NUL-terminated template
/// and NUL-terminated filename (§4.12).
fn decode_ext_msg(frame: &[u8], radio_id: u8, ctx: &DispatchContext) -> Option<DispatchResult> {
    if !ctx.msgs_enabled {
        return None;
    }
    let rest = &frame[1..];
    const HEADER_LEN: usize = 19; // ts_type, num_args, drop_cnt, ts:u64, line_no:u16, subsys_id:u16, reserved1:u32
    if rest.len() < HEADER_LEN {
        debug!("EXT_MSG_F header too short: {} bytes", rest.len());
        return None;
    }
    let num_args = rest[1] as usize;
    let line_no = u16::from_le_bytes(rest[11..13].try_into().ok()?);
    let mut off = HEADER_LEN;
    let mut args = Vec::with_capacity(num_args);
    for _ in 0..num_args {
        if off + 4 > rest.len() {
            debug!("EXT_MSG_F truncated argument list");
            return None;
        }
        args.push(u32::from_le_bytes(rest[off..off + 4].try_into().ok()?));
        off += 4;
    }
    let tail = &rest[off..];
    let mut parts = tail.splitn(2, |&b| b == 0);
    let message_bytes = parts.next().unwrap_or(&[]);
    let filename_bytes = parts.next().map_or(&[][..], |f| {
        let end = f.iter().position(|&b| b == 0).unwrap_or(f.len());
        &f[..end]
    });
    let template = String::from_utf8_lossy(message_bytes);
    let filename = String::from_utf8_lossy(filename_bytes);
    let text = crate::fmt::format_template(&template, &args);
    let gsmtap = crate::gsmtap::build_osmocore_log_record(
        0,
        "diag",
        0,
        0,
        "ext_msg",
        &filename,
        line_no,
        &text,
    );
    Some(DispatchResult {
        radio_id,
        cp: vec![gsmtap],
        ..Default::default()
    })
}

/// QSR_EXT_MSG_TERSE_F: legacy hash-referenced terse message, looked up in
/// the plain-string `qtrace_str` map (§3.1).
fn decode_qsr_legacy(frame: &[u8], radio_id: u8, ctx: &DispatchContext) -> Option<DispatchResult> {
    let rest = &frame[1..];
    if rest.len() < 5 {
        debug!("QSR_EXT_MSG_TERSE_F record too short: {} bytes", rest.len());
        return None;
    }
    let hash = u32::from_le_bytes(rest[0..4].try_into().ok()?);
    let num_args = rest[4] as usize;
    let mut off = 5;
    let mut args = Vec::with_capacity(num_args);
    for _ in 0..num_args {
        if off + 4 > rest.len() {
            break;
        }
        args.push(u32::from_le_bytes(rest[off..off + 4].try_into().ok()?));
        off += 4;
    }
    let text = match ctx.hash_store.lookup_qtrace_str(hash) {
        Some(template) => crate::fmt::format_template(template, &args),
        None => format!("QSR Ext Msg Terse: 0x{hash:08X}, {}", args_join(&args)),
    };
    let gsmtap = crate::gsmtap::build_osmocore_log_record(0, "diag", 0, 0, "qsr", "", 0, &text);
    Some(DispatchResult {
        radio_id,
        cp: vec![gsmtap],
        ..Default::default()
    })
}

/// QSR4_EXT_MSG_TERSE_F: QDB4 hash-referenced terse message with a packed,
/// variable-width argument vector, looked up in the `content` map (§3.1,
/// §4.12).
fn decode_qsr4(frame: &[u8], radio_id: u8, ctx: &DispatchContext) -> Option<DispatchResult> {
    let rest = &frame[1..];
    if rest.len() < 5 {
        debug!("QSR4_EXT_MSG_TERSE_F record too short: {} bytes", rest.len());
        return None;
    }
    let hash = u32::from_le_bytes(rest[0..4].try_into().ok()?);
    let num_size_args = rest[4];
    let args = decode_packed_args(&rest[5..], num_size_args);
    let text = match ctx.hash_store.lookup_content(hash) {
        Some(row) => crate::fmt::format_template(&row.string, &args),
        None => format!("QSR4 Ext Msg Terse: 0x{hash:08X}, {}", args_join(&args)),
    };
    let gsmtap = crate::gsmtap::build_osmocore_log_record(0, "diag", 0, 0, "qsr4", "", 0, &text);
    Some(DispatchResult {
        radio_id,
        cp: vec![gsmtap],
        ..Default::default()
    })
}

/// QSH_TRACE_PAYLOAD_F: a QDB4 mtrace entry. Argument count is `field -
/// 0x13`; arguments are then unpacked the same way as QSR4's. A stored
/// `MtraceLine::Preformatted` row is emitted verbatim, with `line_number`
/// forced to 0, taking precedence over `_snprintf` expansion (§3.1, §4.12,
/// seed scenario 8).
fn decode_qsh(frame: &[u8], radio_id: u8, ctx: &DispatchContext) -> Option<DispatchResult> {
    let rest = &frame[1..];
    if rest.len() < 5 {
        debug!("QSH_TRACE_PAYLOAD_F record too short: {} bytes", rest.len());
        return None;
    }
    let hash = u32::from_le_bytes(rest[0..4].try_into().ok()?);
    let field = rest[4];
    let count = field.saturating_sub(0x13).min(0x0f);
    let synthetic_num_size_args = (4u8 << 4) | count;
    let args = decode_packed_args(&rest[5..], synthetic_num_size_args);

    let row = ctx.hash_store.lookup_mtrace(hash);
    let (text, line_number) = match row {
        Some(row) => match &row.line {
            MtraceLine::Preformatted(s) => (s.clone(), 0u16),
            MtraceLine::Numeric(n) => (
                crate::fmt::format_template(&row.string, &args),
                (*n).min(u16::MAX as u32) as u16,
            ),
        },
        None => (
            format!("QSH Trace Payload: 0x{hash:08X}, {}", args_join(&args)),
            0,
        ),
    };
    let gsmtap =
        crate::gsmtap::build_osmocore_log_record(0, "diag", 0, 0, "qsh", "", line_number, &text);
    Some(DispatchResult {
        radio_id,
        cp: vec![gsmtap],
        ..Default::default()
    })
}

/// MULTI_RADIO_CMD_F (C8): an 8-byte envelope (opcode + radio-id + 6
/// reserved bytes) wrapping an inner, already-unwrapped diag frame for a
/// second SIM. Normalizes the radio-id and re-enters the dispatcher with no
/// further HDLC/CRC handling (§4.8).
fn decode_multi_radio(
    frame: &[u8],
    _radio_id: u8,
    ctx: &DispatchContext,
) -> Option<DispatchResult> {
    let rest = &frame[1..];
    if rest.len() < 7 {
        debug!("MULTI_RADIO_CMD_F envelope too short: {} bytes", rest.len());
        return None;
    }
    let raw_radio_id = rest[0];
    let inner = &rest[7..];
    let radio_id = normalize_radio_id(raw_radio_id);
    dispatch(inner, radio_id, ctx)
}

/// Radio-id normalization (§4.8, invariant 9): only ever 0 or 1, dual-SIM
/// only -- a third index collapses into SIM 2.
fn normalize_radio_id(raw: u8) -> u8 {
    if raw <= 1 {
        0
    } else {
        1
    }
}

fn decode_event_report(frame: &[u8], radio_id: u8, ctx: &DispatchContext) -> Option<DispatchResult> {
    if !ctx.events_enabled {
        return None;
    }
    crate::event::decode_batch(frame, radio_id)
}

/// LOG_F (C7, Log-Item Dispatcher): parses the 16-byte log header and
/// dispatches by `log_type`. RRC/NAS OTA logs are reframed as GSMTAP via
/// [`gsmtap_parser`]; ML1 measurement logs are translated directly into KPI
/// stdout lines (serving-cell / neighbor-cell); anything else is logged at
/// debug and dropped (§4.7's "no_process"/implicit-suppression behavior).
fn decode_log(frame: &[u8], radio_id: u8, _ctx: &DispatchContext) -> Option<DispatchResult> {
    let msg = match diag::Message::from_bytes((frame, 0)) {
        Ok((leftover, msg)) => {
            if !leftover.0.is_empty() {
                debug!("{} leftover bytes parsing log item", leftover.0.len());
            }
            msg
        }
        Err(e) => {
            debug!("failed to parse log item: {e}");
            return None;
        }
    };

    if let diag::Message::Log { body, .. } = &msg {
        match body {
            LogBody::LteMl1ServingCellMeasurementAndEvaluation { data } => {
                return serving_cell_kpi(radio_id, data);
            }
            LogBody::LteMl1NeighborCellsMeasurements { data } => {
                return neighbor_cell_kpi(radio_id, data);
            }
            _ => {}
        }
    }

    match gsmtap_parser::parse(msg) {
        Ok(Some((_ts, gsmtap_msg))) => Some(DispatchResult {
            radio_id,
            cp: vec![gsmtap_msg.to_bytes().ok()?],
            ..Default::default()
        }),
        Ok(None) => None,
        Err(e) => {
            debug!("gsmtap_parser declined log item: {e}");
            None
        }
    }
}

fn serving_cell_kpi(
    radio_id: u8,
    data: &crate::diag::diaglog::measurement::serving_cell::MeasurementAndEvaluation,
) -> Option<DispatchResult> {
    let line = format!(
        "LTE Primary Cell: EARFCN:{} PCI:{} RSRP:{:.2} RSSI:{:.2} RSRQ:{:.2}",
        data.get_earfcn(),
        data.get_pci(),
        data.get_meas_rsrp(),
        data.get_meas_rssi(),
        data.get_meas_rsrq(),
    );
    Some(DispatchResult {
        radio_id,
        stdout: vec![line],
        ..Default::default()
    })
}

fn neighbor_cell_kpi(
    radio_id: u8,
    data: &crate::diag::diaglog::measurement::neighbor_cells::Measurements,
) -> Option<DispatchResult> {
    if data.cells.is_empty() {
        return None;
    }
    let earfcn = data.get_earfcn();
    let stdout = data
        .cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            format!(
                "Neighbor cell {i}: EARFCN:{earfcn} PCI:{} RSRP:{:.2} RSSI:{:.2} RSRQ:{:.2}",
                cell.pci,
                cell.get_meas_rsrp(),
                cell.get_meas_rssi(),
                cell.get_meas_rsrq(),
            )
        })
        .collect();
    Some(DispatchResult {
        radio_id,
        stdout,
        ..Default::default()
    })
}
