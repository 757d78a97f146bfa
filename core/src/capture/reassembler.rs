use crate::capture::protocol::DataPacketHeader;
use crate::telemetry::log::LogManager;
use std::collections::BTreeMap;
use std::mem;

/// One complete frame of raw interleaved IQ bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub index: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub packets: u64,
    /// Datagrams too short to carry a payload.
    pub undersized: u64,
    /// Payload whose bytes were all placed already.
    pub duplicates: u64,
    /// Payload belonging to frames already emitted or abandoned.
    pub stale: u64,
    pub discarded_frames: u64,
    pub emitted_frames: u64,
}

/// Rebuilds fixed-size frames from offset-tagged data packets.
///
/// Only one frame is accumulated at a time. Payload for a newer frame
/// abandons the incomplete current one; payload for an older frame is
/// dropped. A frame is emitted once every byte of it has been covered, so
/// overlapping retransmissions never count twice.
pub struct FrameReassembler {
    frame_bytes: usize,
    current: Option<u64>,
    buffer: Vec<u8>,
    written: usize,
    /// Disjoint covered byte ranges of the current frame, start to end.
    covered: BTreeMap<usize, usize>,
    next_index: u64,
    stats: ReassemblyStats,
    logger: LogManager,
}

impl FrameReassembler {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(1),
            current: None,
            buffer: Vec::new(),
            written: 0,
            covered: BTreeMap::new(),
            next_index: 0,
            stats: ReassemblyStats::default(),
            logger: LogManager::new("reassembler"),
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Bytes accumulated for the frame in progress.
    pub fn pending_bytes(&self) -> usize {
        self.written
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.buffer.clear();
        self.written = 0;
        self.covered.clear();
        self.next_index = 0;
        self.stats = ReassemblyStats::default();
    }

    pub fn push_packet(&mut self, datagram: &[u8]) -> Vec<RawFrame> {
        self.stats.packets += 1;
        match DataPacketHeader::parse(datagram) {
            Some((header, payload)) => self.push_payload(header.byte_offset, payload),
            None => {
                self.stats.undersized += 1;
                self.logger
                    .warn(&format!("skipping {} byte packet without payload", datagram.len()));
                Vec::new()
            }
        }
    }

    /// Places payload that starts at `offset` in the byte stream, splitting
    /// it at frame boundaries.
    pub fn push_payload(&mut self, offset: u64, payload: &[u8]) -> Vec<RawFrame> {
        let frame_bytes = self.frame_bytes as u64;
        let mut frames = Vec::new();
        let mut offset = offset;
        let mut rest = payload;
        while !rest.is_empty() {
            let index = offset / frame_bytes;
            let pos = (offset % frame_bytes) as usize;
            let take = rest.len().min(self.frame_bytes - pos);
            if let Some(frame) = self.place(index, pos, &rest[..take]) {
                frames.push(frame);
            }
            offset += take as u64;
            rest = &rest[take..];
        }
        frames
    }

    fn start(&mut self, index: u64) {
        self.current = Some(index);
        self.buffer.clear();
        self.buffer.resize(self.frame_bytes, 0);
        self.written = 0;
        self.covered.clear();
    }

    /// Marks `start..end` as covered and returns how many of its bytes were
    /// not covered before. Touching ranges are merged.
    fn cover(&mut self, start: usize, end: usize) -> usize {
        let touching: Vec<(usize, usize)> = self
            .covered
            .range(..=end)
            .rev()
            .take_while(|(_, &e)| e >= start)
            .map(|(&s, &e)| (s, e))
            .collect();
        let mut merged = (start, end);
        let mut overlap = 0;
        for (s, e) in touching {
            self.covered.remove(&s);
            overlap += e.min(end).saturating_sub(s.max(start));
            merged = (merged.0.min(s), merged.1.max(e));
        }
        self.covered.insert(merged.0, merged.1);
        (end - start) - overlap
    }

    fn place(&mut self, index: u64, pos: usize, chunk: &[u8]) -> Option<RawFrame> {
        if index < self.next_index {
            self.stats.stale += 1;
            return None;
        }
        match self.current {
            Some(current) if index < current => {
                self.stats.stale += 1;
                return None;
            }
            Some(current) if index > current => {
                self.stats.discarded_frames += 1;
                self.logger.warn(&format!(
                    "discarding incomplete frame {} ({} of {} bytes) for frame {}",
                    current, self.written, self.frame_bytes, index
                ));
                self.start(index);
            }
            Some(_) => {}
            None => self.start(index),
        }

        let fresh = self.cover(pos, pos + chunk.len());
        if fresh == 0 {
            self.stats.duplicates += 1;
            return None;
        }
        self.buffer[pos..pos + chunk.len()].copy_from_slice(chunk);
        self.written += fresh;

        if self.written < self.frame_bytes {
            return None;
        }
        let bytes = mem::take(&mut self.buffer);
        self.current = None;
        self.written = 0;
        self.covered.clear();
        self.next_index = index + 1;
        self.stats.emitted_frames += 1;
        Some(RawFrame { index, bytes })
    }
}
