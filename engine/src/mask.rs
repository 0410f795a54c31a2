//! Mask Negotiator (§4.9, C9): the bounded startup handshake that must
//! complete before the session loop starts reading log traffic. Queries
//! version/build-id, disables event reporting during setup, retrieves each
//! subsystem's log-id range, and primes every negotiated subsystem with an
//! empty mask. `prepare_diag` then installs the real masks the caller asked
//! for, restricted to the subsystems this lineage's devices actually
//! support (§4.9 invariant: DTV and TD-SCDMA stay silent).

use std::collections::HashMap;
use std::time::Duration;

use log::warn;
use thiserror::Error;

use crate::diag::{self, CRC_CCITT, LogConfigRequest, Request};
use crate::hdlc;
use crate::transport::AbstractIoDevice;

/// Protocol layers selectable from the CLI surface (§6); narrows which
/// `accepted_log_codes` a caller passes into [`MaskNegotiator::prepare_diag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Ip,
    Nas,
    Rrc,
    Pdcp,
    Rlc,
    Mac,
    Qmi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Subsystem {
    OneX,
    Wcdma,
    Gsm,
    Umts,
    Dtv,
    Lte,
    TdScdma,
}

impl Subsystem {
    fn log_type(self) -> u32 {
        match self {
            Subsystem::OneX => 1,
            Subsystem::Wcdma => 4,
            Subsystem::Gsm => 8,
            Subsystem::Umts => 9,
            Subsystem::Dtv => 10,
            Subsystem::Lte => 11,
            Subsystem::TdScdma => 12,
        }
    }
}

/// All subsystems negotiated at startup (§4.9 step 6: each gets an
/// empty-mask priming query regardless of whether it will carry real
/// traffic later).
const NEGOTIATED_SUBSYSTEMS: [Subsystem; 7] = [
    Subsystem::OneX,
    Subsystem::Wcdma,
    Subsystem::Gsm,
    Subsystem::Umts,
    Subsystem::Dtv,
    Subsystem::Lte,
    Subsystem::TdScdma,
];

/// Subsystems that receive a real mask during `prepare_diag`. DTV and
/// TD-SCDMA are deliberately excluded -- the reference device-support
/// scoping never lights them up even when the user asks for every layer.
const PREPARE_DIAG_SUBSYSTEMS: [Subsystem; 5] = [
    Subsystem::OneX,
    Subsystem::Wcdma,
    Subsystem::Gsm,
    Subsystem::Umts,
    Subsystem::Lte,
];

const DEFAULT_MASK_BITSIZE: u32 = 513;
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(3);

const EMR_SUBOP_RETRIEVE_RANGES: u8 = 0x01;
const EMR_SUBOP_RETRIEVE_LEVELS: u8 = 0x02;
const EMR_SUBOP_SET_MASK: u8 = 0x05;

/// `EXT_MSG_CONFIG_F` sub-op 2 request: `<BBHH>` cmd, sub-op, start id, end id.
fn ext_msg_config_levels_request(start: u16, end: u16) -> Vec<u8> {
    let mut buf = vec![diag::EXT_MSG_CONFIG_F, EMR_SUBOP_RETRIEVE_LEVELS];
    buf.extend_from_slice(&start.to_le_bytes());
    buf.extend_from_slice(&end.to_le_bytes());
    buf
}

/// `EXT_MSG_CONFIG_F` sub-op 5 request: `<BBHH>` header followed by one u32
/// verbosity level per id in `[start, end]`.
fn ext_msg_config_set_mask_request(start: u16, end: u16, levels: &[u32]) -> Vec<u8> {
    let mut buf = vec![diag::EXT_MSG_CONFIG_F, EMR_SUBOP_SET_MASK];
    buf.extend_from_slice(&start.to_le_bytes());
    buf.extend_from_slice(&end.to_le_bytes());
    for level in levels {
        buf.extend_from_slice(&level.to_le_bytes());
    }
    buf
}

/// Parses a sub-op 1 reply: 8-byte header (`cmd_code, ts_type, unk1:u16,
/// num_ranges:u16, unk2:u16`) followed by `num_ranges` `(start:u16, end:u16)`
/// pairs.
fn parse_ext_msg_ranges(pkt: &[u8]) -> Vec<(u16, u16)> {
    if pkt.len() < 8 || pkt.get(1) != Some(&EMR_SUBOP_RETRIEVE_RANGES) {
        return Vec::new();
    }
    let num_ranges = u16::from_le_bytes([pkt[4], pkt[5]]) as usize;
    let mut out = Vec::with_capacity(num_ranges);
    let mut pos = 8;
    for _ in 0..num_ranges {
        if pos + 4 > pkt.len() {
            break;
        }
        let start = u16::from_le_bytes([pkt[pos], pkt[pos + 1]]);
        let end = u16::from_le_bytes([pkt[pos + 2], pkt[pos + 3]]);
        out.push((start, end));
        pos += 4;
    }
    out
}

/// Parses a sub-op 2 reply: 8-byte header (`cmd_code, ts_type, start_id:u16,
/// end_id:u16, unk1:u16`) followed by `end_id - start_id + 1` u32 levels.
fn parse_ext_msg_levels(pkt: &[u8]) -> Option<Vec<u32>> {
    if pkt.len() < 8 || pkt.get(1) != Some(&EMR_SUBOP_RETRIEVE_LEVELS) {
        return None;
    }
    let start = u16::from_le_bytes([pkt[2], pkt[3]]);
    let end = u16::from_le_bytes([pkt[4], pkt[5]]);
    let count = (end.saturating_sub(start) as usize) + 1;
    let mut levels = Vec::with_capacity(count);
    let mut pos = 8;
    for _ in 0..count {
        if pos + 4 > pkt.len() {
            break;
        }
        levels.push(u32::from_le_bytes(pkt[pos..pos + 4].try_into().ok()?));
        pos += 4;
    }
    Some(levels)
}

#[derive(Debug, Error)]
pub enum MaskNegotiatorError {
    #[error("transport I/O error during mask negotiation: {0}")]
    Io(#[from] std::io::Error),
    #[error("mask negotiation failed after exhausting retries")]
    NegotiationFailed,
}

/// Tracks the per-subsystem log-id range returned by `RetrieveIdRanges`, so
/// later mask requests use the device's actual range instead of a guess.
#[derive(Debug, Default)]
pub struct MaskNegotiator {
    log_id_range: HashMap<u32, u32>,
}

impl MaskNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the full init sequence, retrying the whole bundle up to
    /// [`MAX_RETRIES`] times with a fixed backoff on transport failure
    /// (§4.9).
    pub async fn init_diag(
        &mut self,
        device: &mut dyn AbstractIoDevice,
    ) -> Result<(), MaskNegotiatorError> {
        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            match self.init_diag_once(device).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("mask negotiation attempt {attempt}/{MAX_RETRIES} failed: {e}");
                    last_err = Some(e);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
        warn!("mask negotiation exhausted retries: {:?}", last_err);
        Err(MaskNegotiatorError::NegotiationFailed)
    }

    async fn init_diag_once(
        &mut self,
        device: &mut dyn AbstractIoDevice,
    ) -> Result<(), MaskNegotiatorError> {
        let mut scratch = [0u8; 4096];
        let _ = device.read(&mut scratch).await?;

        self.send_raw(device, &[diag::VERNO_F]).await?;
        self.send_raw(device, &[diag::EXT_BUILD_ID_F]).await?;
        self.send_event_toggle(device, false).await?;

        let reply = self
            .send_raw(device, &log_config_bytes(LogConfigRequest::RetrieveIdRanges))
            .await?;
        self.parse_id_ranges(&reply);

        for subsystem in NEGOTIATED_SUBSYSTEMS {
            self.send_mask(device, subsystem, &[]).await?;
        }

        self.negotiate_ext_msg_verbosity(device).await?;
        Ok(())
    }

    /// §4.9 step 7: query the device's extended-message id ranges (sub-op
    /// 1); for each range that comes back, fetch its per-id verbosity levels
    /// (sub-op 2) and reapply them (sub-op 5) so the device resumes logging
    /// at the same verbosity it already had rather than reverting to a
    /// default. A device that reports no ranges is left alone -- there is
    /// nothing to restore.
    async fn negotiate_ext_msg_verbosity(
        &mut self,
        device: &mut dyn AbstractIoDevice,
    ) -> Result<(), MaskNegotiatorError> {
        let reply = self
            .send_raw(device, &[diag::EXT_MSG_CONFIG_F, EMR_SUBOP_RETRIEVE_RANGES])
            .await?;
        let ranges = hdlc::hdlc_decapsulate(&reply, &CRC_CCITT)
            .ok()
            .map(|unwrapped| parse_ext_msg_ranges(&unwrapped))
            .unwrap_or_default();

        for (start, end) in ranges {
            let level_reply = self
                .send_raw(device, &ext_msg_config_levels_request(start, end))
                .await?;
            let Some(levels) = hdlc::hdlc_decapsulate(&level_reply, &CRC_CCITT)
                .ok()
                .and_then(|unwrapped| parse_ext_msg_levels(&unwrapped))
            else {
                continue;
            };
            self.send_raw(device, &ext_msg_config_set_mask_request(start, end, &levels))
                .await?;
        }
        Ok(())
    }

    /// Installs real masks for the subsystems this lineage's devices
    /// support, enables event reporting, and is the last step before the
    /// session loop starts reading (§4.9).
    pub async fn prepare_diag(
        &mut self,
        device: &mut dyn AbstractIoDevice,
        _layers: &[Layer],
        accepted_log_codes: &[u32],
    ) -> Result<(), MaskNegotiatorError> {
        self.send_event_toggle(device, true).await?;
        for subsystem in PREPARE_DIAG_SUBSYSTEMS {
            self.send_mask(device, subsystem, accepted_log_codes).await?;
        }
        Ok(())
    }

    /// Disables event reporting and clears every subsystem's mask, for a
    /// clean shutdown. Best-effort: individual failures are logged, not
    /// propagated, since the caller is already tearing down.
    pub async fn stop_diag(&mut self, device: &mut dyn AbstractIoDevice) {
        if let Err(e) = self.send_event_toggle(device, false).await {
            warn!("stop_diag: failed to disable event reporting: {e}");
        }
        for subsystem in PREPARE_DIAG_SUBSYSTEMS {
            if let Err(e) = self.send_mask(device, subsystem, &[]).await {
                warn!("stop_diag: failed to clear mask for {subsystem:?}: {e}");
            }
        }
    }

    async fn send_mask(
        &self,
        device: &mut dyn AbstractIoDevice,
        subsystem: Subsystem,
        accepted_log_codes: &[u32],
    ) -> Result<(), MaskNegotiatorError> {
        let bitsize = self
            .log_id_range
            .get(&subsystem.log_type())
            .copied()
            .unwrap_or(DEFAULT_MASK_BITSIZE);
        let req = diag::build_log_mask_request(subsystem.log_type(), bitsize, accepted_log_codes);
        self.send_raw(device, &req.to_bytes().unwrap_or_default())
            .await?;
        Ok(())
    }

    async fn send_event_toggle(
        &self,
        device: &mut dyn AbstractIoDevice,
        enabled: bool,
    ) -> Result<(), MaskNegotiatorError> {
        self.send_raw(device, &[diag::EVENT_REPORT_F, enabled as u8])
            .await?;
        Ok(())
    }

    async fn send_raw(
        &self,
        device: &mut dyn AbstractIoDevice,
        payload: &[u8],
    ) -> Result<Vec<u8>, MaskNegotiatorError> {
        let framed = hdlc::hdlc_encapsulate(payload, &CRC_CCITT);
        device.write(&framed).await?;
        let mut buf = [0u8; 4096];
        let n = device.read(&mut buf).await?;
        Ok(buf[..n].to_vec())
    }

    fn parse_id_ranges(&mut self, reply: &[u8]) {
        let Ok(unwrapped) = hdlc::hdlc_decapsulate(reply, &CRC_CCITT) else {
            return;
        };
        let Ok((_, msg)) = diag::Message::from_bytes((&unwrapped, 0)) else {
            return;
        };
        if let diag::Message::Response {
            payload:
                diag::ResponsePayload::LogConfig(diag::LogConfigResponse::RetrieveIdRanges {
                    log_mask_sizes,
                }),
            ..
        } = msg
        {
            for (log_type, size) in log_mask_sizes.iter().enumerate() {
                if *size > 0 {
                    self.log_id_range.insert(log_type as u32, *size);
                }
            }
        }
    }
}

fn log_config_bytes(req: LogConfigRequest) -> Vec<u8> {
    Request::LogConfig(req).to_bytes().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockIoDevice;

    fn id_range_reply() -> Vec<u8> {
        let mut log_mask_sizes = [0u32; 16];
        log_mask_sizes[11] = 800; // LTE
        let msg_bytes = {
            let mut bytes = vec![0x73, 0x00, 0x00, 0x00, 1, 0, 0, 0, 0, 0, 0, 0];
            for size in log_mask_sizes {
                bytes.extend_from_slice(&size.to_le_bytes());
            }
            bytes
        };
        hdlc::hdlc_encapsulate(&msg_bytes, &CRC_CCITT)
    }

    #[tokio::test]
    async fn init_diag_survives_a_minimal_canned_device() {
        let mut device = MockIoDevice::new(vec![]);
        // drain, version, build-id, event-toggle, id-ranges, 7x mask, ext-msg-config
        device.push_reply(vec![0u8; 8]); // consumed by the leading throwaway drain
        device.push_reply(vec![0u8; 8]);
        device.push_reply(vec![0u8; 8]);
        device.push_reply(vec![0u8; 8]);
        device.push_reply(id_range_reply());
        for _ in 0..7 {
            device.push_reply(vec![0u8; 8]);
        }
        device.push_reply(vec![0u8; 8]);

        let mut negotiator = MaskNegotiator::new();
        negotiator.init_diag_once(&mut device).await.unwrap();
        assert_eq!(negotiator.log_id_range.get(&11), Some(&800));
    }

    #[tokio::test]
    async fn prepare_diag_skips_dtv_and_tdscdma() {
        let mut device = MockIoDevice::new(vec![]);
        for _ in 0..6 {
            device.push_reply(vec![0u8; 8]);
        }
        let mut negotiator = MaskNegotiator::new();
        negotiator
            .prepare_diag(&mut device, &[Layer::Rrc], &[])
            .await
            .unwrap();
        // 1 event toggle + 5 prepare-diag subsystems == 6 HDLC-terminated writes.
        assert_eq!(device.written.iter().filter(|&&b| b == 0x7e).count(), 6);
    }

    #[test]
    fn parses_ext_msg_ranges_and_levels() {
        let mut ranges_pkt = vec![diag::EXT_MSG_CONFIG_F, 0x01, 0, 0, 1, 0, 0, 0];
        ranges_pkt.extend_from_slice(&100u16.to_le_bytes());
        ranges_pkt.extend_from_slice(&102u16.to_le_bytes());
        assert_eq!(parse_ext_msg_ranges(&ranges_pkt), vec![(100, 102)]);

        let mut levels_pkt = vec![diag::EXT_MSG_CONFIG_F, 0x02];
        levels_pkt.extend_from_slice(&100u16.to_le_bytes());
        levels_pkt.extend_from_slice(&102u16.to_le_bytes());
        levels_pkt.extend_from_slice(&0u16.to_le_bytes());
        for level in [1u32, 2, 3] {
            levels_pkt.extend_from_slice(&level.to_le_bytes());
        }
        assert_eq!(parse_ext_msg_levels(&levels_pkt), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn reapplies_levels_for_each_discovered_range() {
        let mut device = MockIoDevice::new(vec![]);
        device.push_reply(vec![0u8; 8]); // consumed by the leading throwaway drain
        device.push_reply(vec![0u8; 8]); // version
        device.push_reply(vec![0u8; 8]); // build-id
        device.push_reply(vec![0u8; 8]); // event-toggle
        device.push_reply(id_range_reply());
        for _ in 0..7 {
            device.push_reply(vec![0u8; 8]); // 7x empty mask
        }

        let mut ranges_pkt = vec![diag::EXT_MSG_CONFIG_F, 0x01, 0, 0, 1, 0, 0, 0];
        ranges_pkt.extend_from_slice(&10u16.to_le_bytes());
        ranges_pkt.extend_from_slice(&11u16.to_le_bytes());
        device.push_reply(hdlc::hdlc_encapsulate(&ranges_pkt, &CRC_CCITT));

        let mut levels_pkt = vec![diag::EXT_MSG_CONFIG_F, 0x02];
        levels_pkt.extend_from_slice(&10u16.to_le_bytes());
        levels_pkt.extend_from_slice(&11u16.to_le_bytes());
        levels_pkt.extend_from_slice(&0u16.to_le_bytes());
        levels_pkt.extend_from_slice(&7u32.to_le_bytes());
        levels_pkt.extend_from_slice(&9u32.to_le_bytes());
        device.push_reply(hdlc::hdlc_encapsulate(&levels_pkt, &CRC_CCITT));

        device.push_reply(vec![0u8; 8]); // reply to the sub-op 5 reapply

        let mut negotiator = MaskNegotiator::new();
        negotiator.init_diag_once(&mut device).await.unwrap();

        // the device should have seen a sub-op 5 reapply carrying both levels
        // fed back from the sub-op 2 query, framed exactly like any other
        // outbound request.
        let reapply = ext_msg_config_set_mask_request(10, 11, &[7, 9]);
        let reapply_framed = hdlc::hdlc_encapsulate(&reapply, &CRC_CCITT);
        assert!(device
            .written
            .windows(reapply_framed.len())
            .any(|w| w == reapply_framed.as_slice()));
    }
}
