//! The transport boundary (§6, A3). Concrete serial/USB backends are out of
//! scope for this crate (§1) -- only a file-backed dump device and an
//! in-memory test double are provided here. Real device backends implement
//! the same [`AbstractIoDevice`] trait outside this crate.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// The boundary the session loop (C10) and mask negotiator (C9) use to talk
/// to a diagnostic port, whatever it actually is underneath.
#[async_trait]
pub trait AbstractIoDevice: Send {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// True if the device would report `WouldBlock` rather than EOF when no
    /// data is currently available (live serial/USB devices); false for a
    /// dump file, where a zero-byte read means "end of input".
    fn block_until_data(&self) -> bool {
        false
    }

    /// Closes and reopens the underlying device, for recovery after
    /// transport errors during high-bandwidth downloads. The default no-op
    /// implementation suits a dump file (nothing to reopen).
    async fn reopen(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads a previously captured dump file as a byte stream. Framing
/// (QMDL/live-equivalent vs. DLF vs. HDF) is interpreted by the session
/// loop (C10), not here -- this device just hands back raw bytes.
pub struct DumpFileDevice {
    file: tokio::fs::File,
}

impl DumpFileDevice {
    pub async fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(DumpFileDevice {
            file: tokio::fs::File::open(path).await?,
        })
    }
}

#[async_trait]
impl AbstractIoDevice for DumpFileDevice {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf).await
    }

    async fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "dump files are read-only; mask negotiation does not run against a dump",
        ))
    }

    fn block_until_data(&self) -> bool {
        false
    }
}

/// An in-memory device fed by a fixed byte buffer and a queue of canned
/// replies, for exercising the mask negotiator and session loop in tests
/// without a real transport.
#[derive(Default)]
pub struct MockIoDevice {
    pub inbound: std::collections::VecDeque<u8>,
    /// Discrete canned replies queued via [`Self::push_reply`]. When
    /// non-empty, `read` pops exactly one whole frame per call instead of
    /// draining `inbound` byte-by-byte -- this models a request/reply
    /// transport (one read per write) as opposed to `inbound`'s raw
    /// continuous byte stream (used by the session-loop framing tests).
    pub reply_frames: std::collections::VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    pub block: bool,
    pub reopen_count: u32,
}

impl MockIoDevice {
    pub fn new(inbound: impl Into<Vec<u8>>) -> Self {
        MockIoDevice {
            inbound: inbound.into().into(),
            reply_frames: Default::default(),
            written: Vec::new(),
            block: false,
            reopen_count: 0,
        }
    }

    /// Queues one discrete reply frame; see the field doc on
    /// [`Self::reply_frames`] for how this differs from the raw stream
    /// passed to [`Self::new`].
    pub fn push_reply(&mut self, bytes: impl Into<Vec<u8>>) {
        self.reply_frames.push_back(bytes.into());
    }
}

#[async_trait]
impl AbstractIoDevice for MockIoDevice {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(frame) = self.reply_frames.pop_front() {
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            return Ok(n);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn block_until_data(&self) -> bool {
        self.block
    }

    async fn reopen(&mut self) -> io::Result<()> {
        self.reopen_count += 1;
        Ok(())
    }
}

/// Closes and reopens `device` up to `max_retries` times with `delay`
/// between attempts, for use after port errors during high-bandwidth
/// downloads (§5).
pub async fn reopen_with_retries(
    device: &mut dyn AbstractIoDevice,
    max_retries: u32,
    delay: Duration,
) -> io::Result<()> {
    let mut last_err = None;
    for attempt in 1..=max_retries {
        match device.reopen().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("reopen attempt {attempt}/{max_retries} failed: {e}");
                last_err = Some(e);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("reopen failed with no recorded error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_device_reads_queued_bytes() {
        let mut dev = MockIoDevice::new(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        assert_eq!(dev.read(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [1, 2]);
    }

    #[tokio::test]
    async fn mock_device_records_writes() {
        let mut dev = MockIoDevice::new(vec![]);
        dev.write(&[9, 9]).await.unwrap();
        assert_eq!(dev.written, vec![9, 9]);
    }
}
