//! The append-only extent structure backing one series.
//!
//! Samples accumulate in an open leaf; when the leaf reaches capacity it is
//! sealed — encoded, checksummed, appended to the block store — and its
//! address joins the root set. The root set is everything needed to recover
//! the sealed portion of the series after a restart.
//!
//! An [`ExtentList`] is not internally synchronised. Single-writer
//! discipline is enforced one layer up, by the ingestion registry.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::sync::Arc;

use block_store::BlockStore;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use data_types::{LogicAddr, SeriesId};
use snafu::{ensure, ResultExt, Snafu};

/// Default number of samples buffered before a leaf is sealed.
pub const DEFAULT_LEAF_CAPACITY: usize = 128;

/// Bytes of framing ahead of the block payload: checksum and payload length.
const BLOCK_HEADER_LEN: usize = 8;
/// Payload bytes ahead of the samples: series id and sample count.
const PAYLOAD_HEADER_LEN: usize = 12;
/// Encoded size of one `(timestamp, value)` pair.
const SAMPLE_LEN: usize = 16;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("unable to persist sealed block for series {series_id}: {source}"))]
    PersistBlock {
        source: block_store::Error,
        series_id: SeriesId,
    },

    #[snafu(display("unable to read block {addr}: {source}"))]
    ReadBlock {
        source: block_store::Error,
        addr: LogicAddr,
    },

    #[snafu(display("block checksum mismatch: expected {expected:#010x}, got {actual:#010x}"))]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[snafu(display("block belongs to series {actual}, expected series {expected}"))]
    SeriesMismatch {
        expected: SeriesId,
        actual: SeriesId,
    },

    #[snafu(display("block of {len} bytes is truncated or malformed"))]
    TruncatedBlock { len: usize },
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The result of appending one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The sample was buffered.
    Ok,
    /// The sample was buffered and a leaf was sealed; the root set changed
    /// and should be published as the series' rescue point.
    FlushNeeded,
    /// The sample's timestamp is behind the series tail; nothing was
    /// written.
    LateWrite,
    /// No live writer backs the addressed series. Produced by the ingestion
    /// layer's broadcast fallback, not by [`ExtentList::append`] itself.
    BadId,
}

/// A decoded sealed block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// The series the block belongs to.
    pub series_id: SeriesId,
    /// The samples in append order.
    pub samples: Vec<(i64, f64)>,
}

/// The persistent append structure for one series.
#[derive(Debug)]
pub struct ExtentList {
    series_id: SeriesId,
    store: Arc<dyn BlockStore>,
    roots: Vec<LogicAddr>,
    /// The open leaf, not yet persisted.
    leaf: Vec<(i64, f64)>,
    last_timestamp: Option<i64>,
    leaf_capacity: usize,
}

impl ExtentList {
    /// Create an empty extent list for `series_id`.
    pub fn new(series_id: SeriesId, store: Arc<dyn BlockStore>, leaf_capacity: usize) -> Self {
        Self {
            series_id,
            store,
            roots: Vec::new(),
            leaf: Vec::new(),
            last_timestamp: None,
            leaf_capacity: leaf_capacity.max(1),
        }
    }

    /// Rebuild an extent list from the root set recorded at the last
    /// metadata sync.
    ///
    /// Every root block is re-read and verified so the restored series tail
    /// is trustworthy; samples that were only in the open leaf at crash time
    /// are gone, which is exactly what the rescue point promises.
    pub fn recover(
        series_id: SeriesId,
        roots: Vec<LogicAddr>,
        store: Arc<dyn BlockStore>,
        leaf_capacity: usize,
    ) -> Result<Self> {
        let mut last_timestamp = None;
        for &addr in &roots {
            let data = store.read(addr).context(ReadBlockSnafu { addr })?;
            let block = decode_block(&data)?;
            ensure!(
                block.series_id == series_id,
                SeriesMismatchSnafu {
                    expected: series_id,
                    actual: block.series_id,
                }
            );
            if let Some(&(ts, _)) = block.samples.last() {
                last_timestamp = Some(ts);
            }
        }

        Ok(Self {
            series_id,
            store,
            roots,
            leaf: Vec::new(),
            last_timestamp,
            leaf_capacity: leaf_capacity.max(1),
        })
    }

    /// The series this extent list backs.
    pub fn series_id(&self) -> SeriesId {
        self.series_id
    }

    /// Append one sample.
    ///
    /// Timestamps must be non-decreasing; a timestamp strictly behind the
    /// series tail is rejected as [`AppendOutcome::LateWrite`]. Equal
    /// timestamps are accepted in arrival order.
    pub fn append(&mut self, timestamp: i64, value: f64) -> Result<AppendOutcome> {
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Ok(AppendOutcome::LateWrite);
            }
        }

        self.leaf.push((timestamp, value));
        self.last_timestamp = Some(timestamp);

        if self.leaf.len() >= self.leaf_capacity {
            self.seal_leaf()?;
            return Ok(AppendOutcome::FlushNeeded);
        }
        Ok(AppendOutcome::Ok)
    }

    /// The current root set: the addresses of every sealed block, in seal
    /// order.
    pub fn get_roots(&self) -> Vec<LogicAddr> {
        self.roots.clone()
    }

    /// Samples buffered in the open leaf, not yet sealed.
    pub fn buffered(&self) -> &[(i64, f64)] {
        &self.leaf
    }

    fn seal_leaf(&mut self) -> Result<()> {
        let block = encode_block(self.series_id, &self.leaf);
        // On a store failure the leaf is kept; the next append retries the
        // seal, so the leaf may transiently exceed its capacity.
        let addr = self.store.append(block).context(PersistBlockSnafu {
            series_id: self.series_id,
        })?;
        self.roots.push(addr);
        self.leaf.clear();
        Ok(())
    }
}

fn encode_block(series_id: SeriesId, samples: &[(i64, f64)]) -> Bytes {
    let mut payload = BytesMut::with_capacity(PAYLOAD_HEADER_LEN + samples.len() * SAMPLE_LEN);
    payload.put_u64(series_id.get());
    payload.put_u32(samples.len() as u32);
    for &(timestamp, value) in samples {
        payload.put_i64(timestamp);
        payload.put_f64(value);
    }

    let checksum = crc32fast::hash(&payload);
    let mut block = BytesMut::with_capacity(BLOCK_HEADER_LEN + payload.len());
    block.put_u32(checksum);
    block.put_u32(payload.len() as u32);
    block.extend_from_slice(&payload);
    block.freeze()
}

/// Decode and verify one sealed block.
pub fn decode_block(data: &[u8]) -> Result<Block> {
    let total = data.len();
    ensure!(total >= BLOCK_HEADER_LEN, TruncatedBlockSnafu { len: total });

    let mut buf = data;
    let expected = buf.get_u32();
    let payload_len = buf.get_u32() as usize;
    ensure!(buf.remaining() == payload_len, TruncatedBlockSnafu { len: total });

    let actual = crc32fast::hash(buf);
    ensure!(actual == expected, ChecksumMismatchSnafu { expected, actual });

    ensure!(
        payload_len >= PAYLOAD_HEADER_LEN,
        TruncatedBlockSnafu { len: total }
    );
    let series_id = SeriesId::new(buf.get_u64());
    let count = buf.get_u32() as usize;
    ensure!(
        payload_len == PAYLOAD_HEADER_LEN + count * SAMPLE_LEN,
        TruncatedBlockSnafu { len: total }
    );

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let timestamp = buf.get_i64();
        let value = buf.get_f64();
        samples.push((timestamp, value));
    }

    Ok(Block { series_id, samples })
}
