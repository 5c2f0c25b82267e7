//! Result markers and the streaming scanner that isolates the payload.
//!
//! The harness prints its JSON result between a begin and an end marker,
//! each carrying a per-run nonce. User code never sees the nonce, so it
//! cannot forge a payload.

/// Begin/end marker pair for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    nonce: String,
    begin: String,
    end: String,
}

impl Markers {
    /// Fresh markers with a random nonce.
    pub fn generate() -> Self {
        Self::with_nonce(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn with_nonce(nonce: impl Into<String>) -> Self {
        let nonce = nonce.into();
        Self {
            begin: format!("<<<ZERO_SCREENER_RESULT_BEGIN:{}>>>", nonce),
            end: format!("<<<ZERO_SCREENER_RESULT_END:{}>>>", nonce),
            nonce,
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn begin(&self) -> &str {
        &self.begin
    }

    pub fn end(&self) -> &str {
        &self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Outside,
    Inside,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Incremental marker scanner.
///
/// Fed arbitrary byte chunks as they arrive; markers split across chunk
/// boundaries are handled. Text outside markers is discarded as it is
/// scanned, so memory use is bounded by the payload size.
#[derive(Debug)]
pub struct MarkerScanner {
    begin: Vec<u8>,
    end: Vec<u8>,
    state: ScanState,
    pending: Vec<u8>,
    last_payload: Option<String>,
}

impl MarkerScanner {
    pub fn new(markers: &Markers) -> Self {
        Self {
            begin: markers.begin().as_bytes().to_vec(),
            end: markers.end().as_bytes().to_vec(),
            state: ScanState::Outside,
            pending: Vec::new(),
            last_payload: None,
        }
    }

    /// Scan a complete output in one go.
    pub fn scan(markers: &Markers, output: &str) -> Option<String> {
        let mut scanner = Self::new(markers);
        scanner.feed(output.as_bytes());
        scanner.finish()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        loop {
            match self.state {
                ScanState::Outside => match find(&self.pending, &self.begin) {
                    Some(idx) => {
                        self.pending.drain(..idx + self.begin.len());
                        self.state = ScanState::Inside;
                    }
                    None => {
                        // Keep just enough to match a marker split across chunks
                        let keep = self.begin.len().saturating_sub(1);
                        if self.pending.len() > keep {
                            self.pending.drain(..self.pending.len() - keep);
                        }
                        return;
                    }
                },
                ScanState::Inside => match find(&self.pending, &self.end) {
                    Some(idx) => {
                        let payload = String::from_utf8_lossy(&self.pending[..idx])
                            .trim()
                            .to_string();
                        self.last_payload = Some(payload);
                        self.pending.drain(..idx + self.end.len());
                        self.state = ScanState::Outside;
                    }
                    None => return,
                },
            }
        }
    }

    /// True once a complete payload has been seen.
    pub fn has_payload(&self) -> bool {
        self.last_payload.is_some()
    }

    /// The last complete payload, if any. An unterminated block is dropped.
    pub fn finish(self) -> Option<String> {
        self.last_payload
    }
}
