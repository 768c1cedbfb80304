//! Cross-file token-similarity clustering.
//!
//! Runs in two phases. The map phase ([`DuplicationAnalyzer::fingerprint`])
//! is file-local: every outermost function and every run of module-level
//! statements is normalized into a token sequence (identifiers and literals collapsed), shingled and summarized by
//! a MinHash signature. The reduce phase takes ownership of all fingerprints
//! in a [`FingerprintIndex`], finds candidate pairs through LSH banding,
//! verifies them with exact Jaccard similarity and joins verified pairs into
//! clusters with petgraph's union-find.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::ast::{NodeKind, SourceUnit, Span, TokenClass};
use crate::config::DuplicationConfig;
use crate::types::SourceLocation;

const SHINGLE_SEPARATOR: u8 = 0x1f;

/// Block name for module-level statement runs.
pub const MODULE_BLOCK: &str = "<module>";

/// One fingerprinted code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockFingerprint {
    pub location: SourceLocation,
    pub end_line: usize,
    pub name: String,
    /// Effective lines of the block.
    pub loc: usize,
    pub token_count: usize,
    /// Sorted, deduplicated shingle hashes.
    shingles: Vec<u64>,
    signature: Vec<u64>,
}

/// Map-phase output for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileFingerprints {
    pub path: PathBuf,
    /// Effective lines of the whole file.
    pub total_loc: usize,
    pub blocks: Vec<BlockFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterMember {
    pub location: SourceLocation,
    pub end_line: usize,
    pub name: String,
    pub loc: usize,
}

/// A group of near-duplicate blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicationCluster {
    /// Mean verified pairwise similarity, in [0, 1].
    pub similarity: f64,
    /// The earliest member by path and line.
    pub representative: ClusterMember,
    /// All members including the representative, sorted by location.
    pub members: Vec<ClusterMember>,
}

impl DuplicationCluster {
    /// Lines that would disappear if every copy reused the representative.
    pub fn duplicated_loc(&self) -> usize {
        self.members
            .iter()
            .filter(|m| **m != self.representative)
            .map(|m| m.loc)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicationResult {
    pub clusters: Vec<DuplicationCluster>,
    pub duplicated_loc: usize,
    pub total_loc: usize,
    /// MECE score: `1 - duplicated_loc / total_loc`, clamped to [0, 1].
    pub score: f64,
}

/// MECE score for a duplicated/total line pair. No lines means nothing is
/// duplicated.
pub fn mece_score(duplicated_loc: usize, total_loc: usize) -> f64 {
    if total_loc == 0 {
        return 1.0;
    }
    (1.0 - duplicated_loc as f64 / total_loc as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct DuplicationAnalyzer {
    config: DuplicationConfig,
}

impl DuplicationAnalyzer {
    pub fn new(config: &DuplicationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Map phase: fingerprints for every outermost function in `unit` and
    /// for every run of consecutive module-level statements.
    pub fn fingerprint(&self, unit: &SourceUnit) -> FileFingerprints {
        let ast = &unit.ast;
        let mut blocks = Vec::new();

        for func in ast.of_kind(|k| k == NodeKind::Function) {
            if ast.enclosing_function(func).is_some() {
                continue;
            }
            let node = ast.node(func);
            blocks.extend(self.block(unit, node.span, node.name_str()));
        }

        for span in module_runs(unit) {
            blocks.extend(self.block(unit, span, MODULE_BLOCK));
        }
        blocks.sort_by(|a, b| a.location.cmp(&b.location));

        FileFingerprints {
            path: unit.path.clone(),
            total_loc: unit.effective_loc(),
            blocks,
        }
    }

    fn block(&self, unit: &SourceUnit, span: Span, name: &str) -> Option<BlockFingerprint> {
        let loc = unit.effective_loc_between(span.start_line, span.end_line);
        if loc < self.config.min_lines {
            return None;
        }
        let tokens = normalized_tokens(unit, &span);
        if tokens.len() < self.config.min_tokens {
            return None;
        }
        let shingles = shingle(&tokens, self.config.shingle_size);
        let signature = minhash(&shingles, self.config.num_hashes);
        Some(BlockFingerprint {
            location: SourceLocation::new(&unit.path, span.start_line, span.start_col),
            end_line: span.end_line,
            name: name.to_string(),
            loc,
            token_count: tokens.len(),
            shingles,
            signature,
        })
    }
}

/// Spans of maximal runs of module-level statements, split by definitions
/// and imports.
fn module_runs(unit: &SourceUnit) -> Vec<Span> {
    let ast = &unit.ast;
    let Some(root) = ast.root() else {
        return Vec::new();
    };
    let mut runs = Vec::new();
    let mut current: Option<Span> = None;

    for child in ast.children(root) {
        let node = ast.node(child);
        match node.kind {
            NodeKind::Comment => continue,
            NodeKind::Function | NodeKind::Class | NodeKind::Import => {
                runs.extend(current.take());
            }
            _ => {
                let span = node.span;
                current = Some(match current {
                    Some(run) => Span {
                        end_line: span.end_line,
                        end_col: span.end_col,
                        end_byte: span.end_byte,
                        ..run
                    },
                    None => span,
                });
            }
        }
    }
    runs.extend(current);
    runs
}

fn normalized_tokens<'a>(unit: &'a SourceUnit, span: &Span) -> Vec<&'a str> {
    unit.tokens_in(span)
        .iter()
        .map(|t| match t.class {
            TokenClass::Identifier => "$ID",
            TokenClass::Literal => "$LIT",
            TokenClass::Other => t.text.as_str(),
        })
        .collect()
}

fn shingle(tokens: &[&str], k: usize) -> Vec<u64> {
    let k = k.max(1).min(tokens.len().max(1));
    let mut out: Vec<u64> = tokens
        .windows(k)
        .map(|window| {
            let mut bytes = Vec::new();
            for token in window {
                bytes.extend_from_slice(token.as_bytes());
                bytes.push(SHINGLE_SEPARATOR);
            }
            xxh64(&bytes, 0)
        })
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

fn minhash(shingles: &[u64], num_hashes: usize) -> Vec<u64> {
    (0..num_hashes as u64)
        .map(|seed| {
            shingles
                .iter()
                .map(|s| xxh64(&s.to_le_bytes(), seed + 1))
                .min()
                .unwrap_or(u64::MAX)
        })
        .collect()
}

/// Exact Jaccard similarity of two sorted, deduplicated sets.
fn jaccard(a: &[u64], b: &[u64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    shared as f64 / (a.len() + b.len() - shared) as f64
}

/// Reduce-phase index. Owns every fingerprint handed over by the map phase.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    blocks: Vec<BlockFingerprint>,
    total_loc: usize,
}

impl FingerprintIndex {
    /// Build the index. Files are ordered by path so results do not depend
    /// on the order workers finished in.
    pub fn new(mut files: Vec<FileFingerprints>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let total_loc = files.iter().map(|f| f.total_loc).sum();
        let blocks = files.into_iter().flat_map(|f| f.blocks).collect();
        Self { blocks, total_loc }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn cluster(self, config: &DuplicationConfig) -> DuplicationResult {
        let pairs = self.candidate_pairs(config);
        let mut sets: UnionFind<usize> = UnionFind::new(self.blocks.len());
        let mut edges: Vec<(usize, usize, f64)> = Vec::new();

        for (a, b) in pairs {
            let similarity = jaccard(&self.blocks[a].shingles, &self.blocks[b].shingles);
            if similarity >= config.similarity_threshold {
                sets.union(a, b);
                edges.push((a, b, similarity));
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (a, _, _) in &edges {
            groups.entry(sets.find_mut(*a)).or_default();
        }
        for i in 0..self.blocks.len() {
            let root = sets.find_mut(i);
            if let Some(group) = groups.get_mut(&root) {
                group.push(i);
            }
        }

        let mut edge_sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
        for (a, _, similarity) in &edges {
            let entry = edge_sums.entry(sets.find_mut(*a)).or_insert((0.0, 0));
            entry.0 += similarity;
            entry.1 += 1;
        }

        let mut clusters: Vec<DuplicationCluster> = groups
            .into_iter()
            .filter_map(|(root, indices)| {
                let mut members: Vec<ClusterMember> = indices
                    .iter()
                    .map(|&i| {
                        let block = &self.blocks[i];
                        ClusterMember {
                            location: block.location.clone(),
                            end_line: block.end_line,
                            name: block.name.clone(),
                            loc: block.loc,
                        }
                    })
                    .collect();
                members.sort();
                let representative = members.first()?.clone();
                let (sum, count) = edge_sums.get(&root).copied().unwrap_or((0.0, 0));
                let similarity = if count == 0 { 0.0 } else { sum / count as f64 };
                Some(DuplicationCluster {
                    similarity: similarity.clamp(0.0, 1.0),
                    representative,
                    members,
                })
            })
            .collect();
        clusters.sort_by(|a, b| a.representative.cmp(&b.representative));

        let duplicated_loc = clusters.iter().map(DuplicationCluster::duplicated_loc).sum();
        let score = mece_score(duplicated_loc, self.total_loc);
        tracing::debug!(
            blocks = self.blocks.len(),
            clusters = clusters.len(),
            duplicated_loc,
            "duplication analysis complete"
        );

        DuplicationResult {
            clusters,
            duplicated_loc,
            total_loc: self.total_loc,
            score,
        }
    }

    /// Pairs sharing at least one LSH band bucket.
    fn candidate_pairs(&self, config: &DuplicationConfig) -> BTreeSet<(usize, usize)> {
        let rows = (config.num_hashes / config.bands.max(1)).max(1);
        let mut buckets: BTreeMap<(usize, u64), Vec<usize>> = BTreeMap::new();

        for (index, block) in self.blocks.iter().enumerate() {
            for (band, chunk) in block.signature.chunks(rows).enumerate() {
                let mut bytes = Vec::with_capacity(chunk.len() * 8);
                for value in chunk {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                buckets
                    .entry((band, xxh64(&bytes, band as u64)))
                    .or_default()
                    .push(index);
            }
        }

        let mut pairs = BTreeSet::new();
        for members in buckets.values() {
            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    pairs.insert((a.min(b), a.max(b)));
                }
            }
        }
        pairs
    }
}
