//! Score normalization, weighted fusion, and top-k selection
//!
//! Pure functions over [`RetrievedContext`] lists. Fusion deduplicates by a
//! whitespace- and case-insensitive content hash, sums weighted scores per
//! distinct hash, and orders deterministically: fused score, then highest
//! raw score, then `created` (newer first) for cross-collection ties, then
//! earliest appearance.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::context::{meta, RetrievedContext};

/// Hash of lowercased, whitespace-collapsed content.
///
/// Stable under case differences and any run of whitespace:
///
/// ```rust
/// use ticket_rag_core::fusion::content_hash;
///
/// assert_eq!(content_hash("Region  Server\ntimeout"), content_hash("region server timeout"));
/// ```
pub fn content_hash(content: &str) -> String {
    let canonical = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Map a cosine distance onto a [0, 1] relevance score.
///
/// Non-finite inputs clamp to 0; the result is never NaN or infinite.
pub fn normalize_cosine(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Rescale keyword-rank scores by the batch maximum.
///
/// A batch whose maximum is zero (or non-finite) normalizes to all zeros;
/// empty batches are a no-op.
pub fn normalize_rank_scores(batch: &mut [RetrievedContext]) {
    let max = batch
        .iter()
        .map(|c| if c.score.is_finite() { c.score } else { 0.0 })
        .fold(0.0f32, f32::max);

    for ctx in batch.iter_mut() {
        ctx.score = if max > 0.0 && ctx.score.is_finite() {
            (ctx.score / max).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for empty or mismatched-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

struct FusedEntry {
    representative: RetrievedContext,
    fused: f32,
    raw_max: f32,
    created: Option<DateTime<Utc>>,
    first_seen: usize,
}

/// `created` carried in context metadata, for the fusion tie-break.
fn created_of(ctx: &RetrievedContext) -> Option<DateTime<Utc>> {
    ctx.metadata
        .get(meta::TIMESTAMP)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Fuse N parallel result lists under non-negative weights summing to 1.
///
/// For each distinct content hash the fused score is the weighted sum of
/// that hash's best score in each list; lists missing the hash contribute 0.
/// The representative record comes from the highest-raw-score occurrence.
/// Fused scores are clamped onto [0, 1]; scoring is invariant to the order
/// of the input lists. Ties break on higher raw score, then `created`
/// (newer first), then earliest appearance when `created` is missing or
/// equal.
pub fn fuse(lists: &[Vec<RetrievedContext>], weights: &[f32]) -> Vec<RetrievedContext> {
    debug_assert_eq!(lists.len(), weights.len());

    let mut entries: HashMap<String, FusedEntry> = HashMap::new();
    let mut appearance = 0usize;

    for (list, &weight) in lists.iter().zip(weights.iter()) {
        // Best score per hash within one list; duplicates inside a single
        // list must not double-count its weight.
        let mut best_in_list: HashMap<String, f32> = HashMap::new();

        for ctx in list {
            let hash = content_hash(&ctx.content);
            let score = if ctx.score.is_finite() { ctx.score } else { 0.0 };

            let entry = best_in_list.entry(hash.clone()).or_insert(f32::MIN);
            let counted = score > *entry;
            if counted {
                *entry = score;
            }

            match entries.get_mut(&hash) {
                Some(fused) => {
                    if score > fused.raw_max {
                        fused.raw_max = score;
                        fused.created = created_of(ctx);
                        fused.representative = ctx.clone();
                    }
                }
                None => {
                    entries.insert(
                        hash,
                        FusedEntry {
                            created: created_of(ctx),
                            representative: ctx.clone(),
                            fused: 0.0,
                            raw_max: score,
                            first_seen: appearance,
                        },
                    );
                    appearance += 1;
                }
            }
        }

        for (hash, best) in best_in_list {
            if let Some(fused) = entries.get_mut(&hash) {
                fused.fused += weight * best.max(0.0);
            }
        }
    }

    let mut out: Vec<FusedEntry> = entries.into_values().collect();
    out.sort_by(|a, b| {
        b.fused
            .total_cmp(&a.fused)
            .then(b.raw_max.total_cmp(&a.raw_max))
            .then_with(|| match (a.created, b.created) {
                // Newer first; entries without a created date fall through
                // to appearance order.
                (Some(a_created), Some(b_created)) => b_created.cmp(&a_created),
                _ => std::cmp::Ordering::Equal,
            })
            .then(a.first_seen.cmp(&b.first_seen))
    });

    out.into_iter()
        .map(|entry| {
            let mut ctx = entry.representative;
            ctx.score = entry.fused.clamp(0.0, 1.0);
            ctx
        })
        .collect()
}

/// Stable selection of the k highest-scoring entries.
///
/// Entries with equal scores keep their input order.
pub fn topk(mut list: Vec<RetrievedContext>, k: usize) -> Vec<RetrievedContext> {
    list.sort_by(|a, b| b.score.total_cmp(&a.score));
    list.truncate(k);
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(content: &str, source: &str, score: f32) -> RetrievedContext {
        RetrievedContext::new(content, source, score)
    }

    #[test]
    fn test_content_hash_whitespace_and_case() {
        assert_eq!(content_hash("Foo  Bar"), content_hash("foo\nbar"));
        assert_eq!(content_hash("  foo bar  "), content_hash("foo bar"));
        assert_ne!(content_hash("foo bar"), content_hash("foo baz"));
    }

    #[test]
    fn test_normalize_cosine_bounds() {
        assert_eq!(normalize_cosine(0.0), 1.0);
        assert_eq!(normalize_cosine(1.0), 0.0);
        assert_eq!(normalize_cosine(2.0), 0.0);
        assert_eq!(normalize_cosine(-0.5), 1.0);
        assert_eq!(normalize_cosine(f32::NAN), 0.0);
        assert_eq!(normalize_cosine(f32::INFINITY), 0.0);
    }

    #[test]
    fn test_normalize_rank_scores() {
        let mut batch = vec![ctx("a", "s", 4.0), ctx("b", "s", 2.0), ctx("c", "s", 0.0)];
        normalize_rank_scores(&mut batch);
        assert_eq!(batch[0].score, 1.0);
        assert_eq!(batch[1].score, 0.5);
        assert_eq!(batch[2].score, 0.0);
    }

    #[test]
    fn test_normalize_rank_scores_zero_max() {
        let mut batch = vec![ctx("a", "s", 0.0), ctx("b", "s", 0.0)];
        normalize_rank_scores(&mut batch);
        assert!(batch.iter().all(|c| c.score == 0.0));
    }

    #[test]
    fn test_fuse_weighted_sum() {
        let vector = vec![ctx("shared doc", "vector_bugs", 0.8), ctx("only vector", "vector_bugs", 0.6)];
        let keyword = vec![ctx("SHARED  doc", "keyword_bugs", 0.4)];

        let fused = fuse(&[vector, keyword], &[0.7, 0.3]);

        assert_eq!(fused.len(), 2);
        // shared doc: 0.7*0.8 + 0.3*0.4 = 0.68; only vector: 0.7*0.6 = 0.42
        assert!((fused[0].score - 0.68).abs() < 1e-6);
        assert_eq!(fused[0].content, "shared doc");
        assert!((fused[1].score - 0.42).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_duplicate_within_one_list_counts_once() {
        let list = vec![ctx("same", "a", 0.9), ctx("Same", "a", 0.5)];
        let fused = fuse(&[list], &[1.0]);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_score_commutative_across_list_order() {
        let a = vec![ctx("x", "a", 0.9), ctx("y", "a", 0.3)];
        let b = vec![ctx("y", "b", 0.7), ctx("z", "b", 0.2)];

        let ab = fuse(&[a.clone(), b.clone()], &[0.5, 0.5]);
        let ba = fuse(&[b, a], &[0.5, 0.5]);

        let score_of = |fused: &[RetrievedContext], content: &str| {
            fused
                .iter()
                .find(|c| content_hash(&c.content) == content_hash(content))
                .map(|c| c.score)
                .unwrap()
        };

        for content in ["x", "y", "z"] {
            assert!((score_of(&ab, content) - score_of(&ba, content)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fuse_tie_breaks_on_created_newer_first() {
        // Equal fused and raw scores from different collections: the
        // newer ticket wins regardless of list order.
        let older = ctx("bugs doc", "keyword_bugs", 0.8)
            .with_meta(meta::TIMESTAMP, "2024-01-10T00:00:00Z");
        let newer = ctx("releases doc", "keyword_releases", 0.8)
            .with_meta(meta::TIMESTAMP, "2024-03-05T00:00:00+00:00");

        let fused = fuse(&[vec![older.clone()], vec![newer.clone()]], &[0.5, 0.5]);
        assert_eq!(fused[0].content, "releases doc");
        assert_eq!(fused[1].content, "bugs doc");

        let fused = fuse(&[vec![newer], vec![older]], &[0.5, 0.5]);
        assert_eq!(fused[0].content, "releases doc");
    }

    #[test]
    fn test_fuse_missing_created_falls_back_to_appearance() {
        let first = ctx("first seen", "keyword_bugs", 0.8);
        let second = ctx("second seen", "keyword_releases", 0.8)
            .with_meta(meta::TIMESTAMP, "2024-03-05T00:00:00Z");

        // One side lacks a created date, so the tie falls through to
        // appearance order.
        let fused = fuse(&[vec![first], vec![second]], &[0.5, 0.5]);
        assert_eq!(fused[0].content, "first seen");
    }

    #[test]
    fn test_fuse_created_only_breaks_exact_ties() {
        // A higher score still wins over a newer created date.
        let older_stronger = ctx("strong doc", "keyword_bugs", 0.9)
            .with_meta(meta::TIMESTAMP, "2023-06-01T00:00:00Z");
        let newer_weaker = ctx("weak doc", "keyword_releases", 0.8)
            .with_meta(meta::TIMESTAMP, "2024-06-01T00:00:00Z");

        let fused = fuse(
            &[vec![older_stronger], vec![newer_weaker]],
            &[0.5, 0.5],
        );
        assert_eq!(fused[0].content, "strong doc");
    }

    #[test]
    fn test_fuse_idempotent() {
        let lists = vec![
            vec![ctx("x", "a", 0.9), ctx("y", "a", 0.3)],
            vec![ctx("y", "b", 0.7)],
        ];
        let once = fuse(&lists, &[0.6, 0.4]);
        let twice = fuse(&lists, &[0.6, 0.4]);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn test_topk_stable_on_ties() {
        let list = vec![ctx("first", "s", 0.5), ctx("second", "s", 0.5), ctx("third", "s", 0.9)];
        let top = topk(list, 2);
        assert_eq!(top[0].content, "third");
        assert_eq!(top[1].content, "first");
    }

    #[test]
    fn test_topk_k_larger_than_len() {
        let list = vec![ctx("a", "s", 0.2), ctx("b", "s", 0.1)];
        let top = topk(list.clone(), 10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].content, "a");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_context() -> impl Strategy<Value = RetrievedContext> {
            ("[a-z]{1,12}( [a-z]{1,12}){0,4}", 0.0f32..=1.0f32)
                .prop_map(|(content, score)| RetrievedContext::new(content, "prop", score))
        }

        fn arb_lists() -> impl Strategy<Value = Vec<Vec<RetrievedContext>>> {
            proptest::collection::vec(proptest::collection::vec(arb_context(), 0..8), 1..4)
        }

        proptest! {
            #[test]
            fn fused_scores_in_unit_interval(lists in arb_lists()) {
                let n = lists.len();
                let weights = vec![1.0 / n as f32; n];
                for ctx in fuse(&lists, &weights) {
                    prop_assert!(ctx.score.is_finite());
                    prop_assert!((0.0..=1.0).contains(&ctx.score));
                }
            }

            #[test]
            fn fuse_invariant_to_list_reordering(lists in arb_lists()) {
                let n = lists.len();
                let weights = vec![1.0 / n as f32; n];
                let forward = fuse(&lists, &weights);

                let mut reversed = lists.clone();
                reversed.reverse();
                let backward = fuse(&reversed, &weights);

                let to_map = |fused: Vec<RetrievedContext>| {
                    fused
                        .into_iter()
                        .map(|c| (content_hash(&c.content), c.score))
                        .collect::<std::collections::HashMap<_, _>>()
                };
                let fwd = to_map(forward);
                let bwd = to_map(backward);
                prop_assert_eq!(fwd.len(), bwd.len());
                for (hash, score) in fwd {
                    prop_assert!((score - bwd[&hash]).abs() < 1e-5);
                }
            }

            #[test]
            fn normalize_never_produces_non_finite(scores in proptest::collection::vec(proptest::num::f32::ANY, 0..16)) {
                let mut batch: Vec<RetrievedContext> = scores
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| RetrievedContext::new(format!("doc {i}"), "prop", s))
                    .collect();
                normalize_rank_scores(&mut batch);
                for ctx in batch {
                    prop_assert!(ctx.score.is_finite());
                    prop_assert!((0.0..=1.0).contains(&ctx.score));
                }
            }

            #[test]
            fn topk_identity_when_k_covers_list(list in proptest::collection::vec(arb_context(), 0..10)) {
                let sorted = topk(list.clone(), list.len());
                let again = topk(sorted.clone(), sorted.len() + 5);
                prop_assert_eq!(sorted.len(), again.len());
                for (a, b) in sorted.iter().zip(again.iter()) {
                    prop_assert_eq!(&a.content, &b.content);
                    prop_assert_eq!(a.score, b.score);
                }
            }

            #[test]
            fn content_hash_whitespace_case_invariant(words in proptest::collection::vec("[a-zA-Z]{1,8}", 1..6)) {
                let single = words.join(" ");
                let noisy = words.join("  \t");
                prop_assert_eq!(content_hash(&single), content_hash(&noisy.to_uppercase()));
            }
        }
    }
}
