//! Loads vendor "hash file" templates keyed by a 32-bit hash, in either of
//! the two formats this lineage's chipsets ship: plain-text legacy files and
//! binary QDB4 containers. Used by the QSR/QSR4/QSH terse-message
//! sub-decoders to expand a hash reference back into a format string.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use log::warn;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRow {
    pub subsys_mask: u32,
    pub ssid: u32,
    pub line: u32,
    pub file: String,
    pub string: String,
}

/// The mtrace row's `line` field: usually a source line number, but the QDB4
/// body also carries rows whose stored line text contains a literal `|`
/// (observed form `"int|hex"`) — those rows are already-formatted text, not
/// a format template, and must be emitted verbatim with no `%`-expansion.
#[derive(Debug, Clone, PartialEq)]
pub enum MtraceLine {
    Numeric(u32),
    Preformatted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MtraceRow {
    pub line: MtraceLine,
    pub level: u32,
    pub client: String,
    pub file: String,
    pub tag: String,
    pub string: String,
}

#[derive(Debug, Error)]
pub enum HashStoreError {
    #[error("I/O error loading hash file: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad QDB4 magic: {0:?}")]
    BadMagic(Vec<u8>),
    #[error("QDB4 body is not valid deflate data: {0}")]
    Inflate(std::io::Error),
    #[error("QDB4 body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("unbalanced section tag: {0}")]
    UnbalancedTag(String),
}

const QDB4_MAGIC: &[u8] = b"\x7FQDB";
const QDB4_HEADER_LEN: usize = 64;
const QDB4_UUID_LEN: usize = 16;

#[derive(Debug, Default)]
pub struct HashStore {
    content: HashMap<u32, TemplateRow>,
    mtrace: HashMap<u32, MtraceRow>,
    qtrace_str: HashMap<u32, String>,
    /// The QDB4 body's embedded UUID, recorded but not otherwise used.
    pub uuid: Option<[u8; QDB4_UUID_LEN]>,
}

impl HashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.mtrace.is_empty() && self.qtrace_str.is_empty()
    }

    pub fn lookup_content(&self, hash: u32) -> Option<&TemplateRow> {
        self.content.get(&hash)
    }

    pub fn lookup_mtrace(&self, hash: u32) -> Option<&MtraceRow> {
        self.mtrace.get(&hash)
    }

    pub fn lookup_qtrace_str(&self, hash: u32) -> Option<&str> {
        self.qtrace_str.get(&hash).map(String::as_str)
    }

    /// Loads a file, auto-detecting legacy vs. QDB4 by magic bytes. A
    /// load failure leaves the store empty (callers should treat this as
    /// "extended-message parsing stays disabled", never fatal).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HashStoreError> {
        let bytes = std::fs::read(path)?;
        if bytes.starts_with(QDB4_MAGIC) {
            Self::load_qdb4(&bytes)
        } else {
            Ok(Self::load_legacy(&String::from_utf8_lossy(&bytes)))
        }
    }

    /// `hash:file:string` per line, `#`-comments and `<tag>value</tag>`
    /// metadata lines ignored.
    fn load_legacy(text: &str) -> Self {
        let mut store = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('<') {
                continue;
            }
            let mut parts = line.splitn(3, ':');
            let (Some(hash_str), Some(file), Some(string)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Ok(hash) = u32::from_str_radix(hash_str.trim_start_matches("0x"), 16)
                .or_else(|_| hash_str.parse::<u32>())
            else {
                continue;
            };
            store.content.insert(
                hash,
                TemplateRow {
                    subsys_mask: 0,
                    ssid: 0,
                    line: 0,
                    file: file.to_string(),
                    string: string.to_string(),
                },
            );
        }
        store
    }

    fn load_qdb4(bytes: &[u8]) -> Result<Self, HashStoreError> {
        if !bytes.starts_with(QDB4_MAGIC) {
            return Err(HashStoreError::BadMagic(
                bytes.get(..QDB4_MAGIC.len()).unwrap_or(bytes).to_vec(),
            ));
        }
        if bytes.len() < QDB4_HEADER_LEN {
            return Err(HashStoreError::BadMagic(bytes.to_vec()));
        }
        let mut uuid = [0u8; QDB4_UUID_LEN];
        uuid.copy_from_slice(&bytes[QDB4_MAGIC.len()..QDB4_MAGIC.len() + QDB4_UUID_LEN]);

        let mut decoder = ZlibDecoder::new(&bytes[QDB4_HEADER_LEN..]);
        let mut body = String::new();
        decoder
            .read_to_string(&mut body)
            .map_err(HashStoreError::Inflate)?;

        let mut store = Self::new();
        store.uuid = Some(uuid);
        store.parse_tagged_sections(&body)?;
        Ok(store)
    }

    /// Small mode state machine over `<Content>`/`<MtraceContent>`/
    /// `<QtraceStrContent>` tagged sections. `<X>` opens a section, `</X>`
    /// (the close form this lineage actually emits) must match the
    /// currently open tag.
    fn parse_tagged_sections(&mut self, body: &str) -> Result<(), HashStoreError> {
        #[derive(PartialEq)]
        enum Mode {
            None,
            Content,
            Mtrace,
            QtraceStr,
        }
        let mut mode = Mode::None;
        for raw_line in body.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(tag) = line.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                if let Some(close_tag) = tag.strip_prefix('/') {
                    let expected = match mode {
                        Mode::Content => "Content",
                        Mode::Mtrace => "MtraceContent",
                        Mode::QtraceStr => "QtraceStrContent",
                        Mode::None => "",
                    };
                    if close_tag != expected {
                        return Err(HashStoreError::UnbalancedTag(line.to_string()));
                    }
                    mode = Mode::None;
                } else {
                    mode = match tag {
                        "Content" => Mode::Content,
                        "MtraceContent" => Mode::Mtrace,
                        "QtraceStrContent" => Mode::QtraceStr,
                        _ => Mode::None,
                    };
                }
                continue;
            }
            match mode {
                Mode::Content => self.parse_content_row(line),
                Mode::Mtrace => self.parse_mtrace_row(line),
                Mode::QtraceStr => self.parse_qtrace_str_row(line),
                Mode::None => {}
            }
        }
        Ok(())
    }

    fn parse_content_row(&mut self, line: &str) {
        let mut parts = line.splitn(6, ':');
        let (Some(hash), Some(subsys_mask), Some(ssid), Some(line_no), Some(file), Some(string)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            warn!("malformed Content row in hash file: {line}");
            return;
        };
        let Ok(hash) = parse_hex_or_dec(hash) else {
            return;
        };
        self.content.insert(
            hash,
            TemplateRow {
                subsys_mask: parse_hex_or_dec(subsys_mask).unwrap_or(0),
                ssid: parse_hex_or_dec(ssid).unwrap_or(0),
                line: parse_hex_or_dec(line_no).unwrap_or(0),
                file: file.to_string(),
                string: string.to_string(),
            },
        );
    }

    fn parse_mtrace_row(&mut self, line: &str) {
        let mut parts = line.splitn(6, ':');
        let (Some(hash), Some(line_field), Some(level), Some(client), Some(file), rest) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            warn!("malformed MtraceContent row in hash file: {line}");
            return;
        };
        let Ok(hash) = parse_hex_or_dec(hash) else {
            return;
        };
        // `rest` still holds `tag:string`; split once more.
        let (tag, string) = match rest {
            Some(tail) => tail.split_once(':').unwrap_or(("", tail)),
            None => ("", ""),
        };
        let mtrace_line = if line_field.contains('|') {
            MtraceLine::Preformatted(string.to_string())
        } else {
            MtraceLine::Numeric(parse_hex_or_dec(line_field).unwrap_or(0))
        };
        self.mtrace.insert(
            hash,
            MtraceRow {
                line: mtrace_line,
                level: parse_hex_or_dec(level).unwrap_or(0),
                client: client.to_string(),
                file: file.to_string(),
                tag: tag.to_string(),
                string: string.to_string(),
            },
        );
    }

    fn parse_qtrace_str_row(&mut self, line: &str) {
        let Some((hash, string)) = line.split_once(':') else {
            warn!("malformed QtraceStrContent row in hash file: {line}");
            return;
        };
        let Ok(hash) = parse_hex_or_dec(hash) else {
            return;
        };
        self.qtrace_str.insert(hash, string.to_string());
    }
}

fn parse_hex_or_dec(s: &str) -> Result<u32, std::num::ParseIntError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_legacy_skips_comments_and_metadata() {
        let text = "# a comment\n<Date>2020-01-01</Date>\n0xdeadbeef:foo.c:hello %d\n";
        let store = HashStore::load_legacy(text);
        let row = store.lookup_content(0xdeadbeef).expect("row present");
        assert_eq!(row.file, "foo.c");
        assert_eq!(row.string, "hello %d");
    }

    #[test]
    fn test_load_qdb4_round_trip() {
        let body = "<Content>\n\
                     0x1:10:2:99:a.c:value=%d\n\
                     </Content>\n\
                     <MtraceContent>\n\
                     0x2:12|0xc:0:cl:b.c:tag:literal line\n\
                     </MtraceContent>\n\
                     <QtraceStrContent>\n\
                     0x3:plain string\n\
                     </QtraceStrContent>\n";
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(body.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(QDB4_MAGIC);
        bytes.extend_from_slice(&[0u8; QDB4_UUID_LEN]);
        bytes.resize(QDB4_HEADER_LEN, 0);
        bytes.extend_from_slice(&compressed);

        let store = HashStore::load_qdb4(&bytes).expect("qdb4 parses");
        assert_eq!(store.lookup_content(1).unwrap().string, "value=%d");
        let mtrace_row = store.lookup_mtrace(2).unwrap();
        assert_eq!(
            mtrace_row.line,
            MtraceLine::Preformatted("literal line".to_string())
        );
        assert_eq!(mtrace_row.string, "literal line");
        assert_eq!(store.lookup_qtrace_str(3).unwrap(), "plain string");
    }
}
