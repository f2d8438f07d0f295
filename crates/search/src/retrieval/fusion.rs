//! Reciprocal Rank Fusion (RRF) for combining channel results
//!
//! RRF combines ranked lists using only rank positions, so channels with
//! incomparable score scales (cosine similarity, term overlap, slot match
//! fractions) fuse cleanly without cross-channel calibration. Raw channel
//! scores are carried through, min-max normalized per channel, purely for
//! display in the per-result score breakdown.

use super::ChannelHit;
use std::collections::HashMap;
use uuid::Uuid;

/// RRF smoothing constant; dampens the dominance of top ranks
pub const RRF_K: f32 = 60.0;

/// The three ranked lists produced by the retrieval fan-out.
/// A channel that timed out or failed contributes an empty list.
#[derive(Debug, Clone, Default)]
pub struct ChannelLists {
    pub semantic: Vec<ChannelHit>,
    pub lexical: Vec<ChannelHit>,
    pub relation: Vec<ChannelHit>,
}

/// One channel's contribution to a fused chunk
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalScore {
    /// Raw channel score, in the channel's own scale
    pub raw: f32,
    /// Raw score min-max normalized within the channel's list
    pub normalized: f32,
    /// 1-based rank within the channel's list, if the chunk appeared there
    pub rank: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct FusedChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub page_num: u32,
    pub chunk_index: u32,
    pub semantic: SignalScore,
    pub lexical: SignalScore,
    pub relation: SignalScore,
    pub fusion_score: f32,
}

impl FusedChunk {
    fn new(hit: &ChannelHit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            page_num: hit.page_num,
            chunk_index: hit.chunk_index,
            semantic: SignalScore::default(),
            lexical: SignalScore::default(),
            relation: SignalScore::default(),
            fusion_score: 0.0,
        }
    }
}

/// Fuse the three channel lists into a single ranking.
///
/// fusion(d) = sum over channels of 1 / (RRF_K + rank(d)), rank 1-based.
/// Absent channels contribute nothing. Ties break by (document_id,
/// page_num, chunk_index) ascending, so equal inputs always yield
/// identical output order.
pub fn fuse(lists: &ChannelLists) -> Vec<FusedChunk> {
    let mut fused: HashMap<Uuid, FusedChunk> = HashMap::new();

    let channels: [(&[ChannelHit], fn(&mut FusedChunk) -> &mut SignalScore); 3] = [
        (&lists.semantic, |c| &mut c.semantic),
        (&lists.lexical, |c| &mut c.lexical),
        (&lists.relation, |c| &mut c.relation),
    ];

    for (hits, signal_of) in channels {
        let (min, max) = score_range(hits);
        for (idx, hit) in hits.iter().enumerate() {
            let entry = fused
                .entry(hit.chunk_id)
                .or_insert_with(|| FusedChunk::new(hit));
            let rank = idx + 1;
            let signal = signal_of(entry);
            signal.raw = hit.raw_score;
            signal.normalized = min_max(hit.raw_score, min, max);
            signal.rank = Some(rank);
            entry.fusion_score += 1.0 / (RRF_K + rank as f32);
        }
    }

    let mut ranked: Vec<FusedChunk> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.fusion_score
            .total_cmp(&a.fusion_score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.page_num.cmp(&b.page_num))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    ranked
}

fn score_range(hits: &[ChannelHit]) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for hit in hits {
        min = min.min(hit.raw_score);
        max = max.max(hit.raw_score);
    }
    (min, max)
}

fn min_max(score: f32, min: f32, max: f32) -> f32 {
    if max > min {
        (score - min) / (max - min)
    } else if max > 0.0 {
        // Single-score or all-equal list: treat as fully relevant
        1.0
    } else {
        0.0
    }
}
