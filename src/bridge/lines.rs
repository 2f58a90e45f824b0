//! Byte-level line splitter used for stdout/stderr capture.

/// Accumulates written bytes and hands out complete lines.
///
/// Works on bytes so a multi-byte character split across two writes is
/// only decoded once its line is complete.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                lines.push(decode(&self.pending));
                self.pending.clear();
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    /// The unterminated tail, if any.
    pub(crate) fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
