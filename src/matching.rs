//! Interface matching: structural overlap plus an optional semantic hook.
//!
//! Structural matching is always available and needs no external
//! dependencies. It scores a pair of interface specs from normalized name
//! similarity, kind equality (required), tag-set Jaccard, and, when both
//! specs carry a parseable signature, parameter-shape compatibility.
//!
//! ## Score
//!
//! ```text
//! both signatures parse: 0.5·name + 0.3·tags + 0.2·shape
//! otherwise:             0.6·name + 0.4·tags
//! ```
//!
//! Kind inequality zeroes the structural score outright.

use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::types::conflict::MatchReason;
use crate::types::intent::InterfaceSpec;

fn ident_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z]?[a-z0-9]+|[A-Z]+").expect("valid regex"))
}

/// Normalize an interface name for comparison: split camelCase and
/// snake_case into identifier tokens, lowercase, rejoin with spaces.
///
/// `"AuthService"`, `"auth_service"`, and `" auth  service "` all
/// normalize to `"auth service"`.
pub fn normalize_name(name: &str) -> String {
    ident_token_re()
        .find_iter(name)
        .map(|m| m.as_str().to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Levenshtein edit distance between two strings.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Name similarity in [0, 1]: 1 − normalized edit distance over the
/// normalized names.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() && nb.is_empty() {
        return 0.0;
    }
    let max_len = na.len().max(nb.len());
    1.0 - edit_distance(&na, &nb) as f64 / max_len as f64
}

/// Jaccard similarity of two tag sets (case-insensitive, unordered).
pub fn tag_jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: BTreeSet<String> = a.iter().map(|t| t.to_lowercase()).collect();
    let sb: BTreeSet<String> = b.iter().map(|t| t.to_lowercase()).collect();
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let shared = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - shared;
    shared as f64 / union as f64
}

/// A parsed signature: parameter type shapes plus an optional return type.
///
/// The parser is intentionally loose: it accepts `"(a: int, b: str) -> T"`,
/// `"fn f(a: u32) -> T"`, and `"(x, y)"` shapes alike. Anything without a
/// parenthesized parameter list fails to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureShape {
    /// Normalized parameter type (or name, when untyped) per position.
    pub params: Vec<String>,
    /// Normalized return type, when present.
    pub returns: Option<String>,
}

impl SignatureShape {
    /// Parse a signature string into a shape. Returns `None` when no
    /// parameter list is present.
    pub fn parse(signature: &str) -> Option<Self> {
        let open = signature.find('(')?;
        let close = signature[open..].find(')')? + open;
        let inner = &signature[open + 1..close];

        let params: Vec<String> = inner
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                // `name: Type` compares by type; bare `name` by name.
                match p.split_once(':') {
                    Some((_, ty)) => normalize_name(ty),
                    None => normalize_name(p),
                }
            })
            .collect();

        let returns = signature[close + 1..]
            .split_once("->")
            .map(|(_, r)| normalize_name(r.trim()))
            .filter(|r| !r.is_empty());

        Some(Self { params, returns })
    }

    /// Whether two shapes are compatible: same arity and, position by
    /// position, equal normalized types. Return types must agree when
    /// both are stated.
    pub fn compatible(&self, other: &Self) -> bool {
        if self.params.len() != other.params.len() {
            return false;
        }
        if self.params != other.params {
            return false;
        }
        match (&self.returns, &other.returns) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Verdict from a semantic matcher implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticVerdict {
    /// Whether the two specs are related.
    pub related: bool,
    /// Why.
    pub reason: String,
}

/// Hook for an external (typically LLM-backed) semantic matcher.
///
/// The engine merges a semantic verdict with the structural one using an
/// OR rule on `related`.
pub trait SemanticMatcher: Send + Sync {
    /// Judge whether two interface specs describe related ground.
    fn relate(&self, a: &InterfaceSpec, b: &InterfaceSpec) -> SemanticVerdict;
}

/// Outcome of matching one pair of interface specs.
#[derive(Debug, Clone)]
pub struct PairMatch {
    /// Combined structural score in [0, 1].
    pub score: f64,
    /// Whether the match fired (structural score over threshold, or
    /// semantic matcher related the pair).
    pub related: bool,
    /// Evidence for the verdict.
    pub reasons: Vec<MatchReason>,
    /// Whether both signatures parsed and their shapes disagree.
    pub signatures_disagree: bool,
    /// Whether the semantic matcher explicitly ruled the pair unrelated.
    pub semantically_unrelated: bool,
}

/// Structural matcher with an optional semantic hook.
pub struct Matcher {
    threshold: f64,
    semantic: Option<Box<dyn SemanticMatcher>>,
}

impl Matcher {
    /// Create a structural-only matcher.
    pub fn structural(threshold: f64) -> Self {
        Self {
            threshold,
            semantic: None,
        }
    }

    /// Attach a semantic matcher implementation.
    pub fn with_semantic(mut self, semantic: Box<dyn SemanticMatcher>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    /// Overlap threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Match one pair of specs.
    pub fn match_pair(&self, a: &InterfaceSpec, b: &InterfaceSpec) -> PairMatch {
        let mut reasons = Vec::new();
        let mut signatures_disagree = false;

        let structural_score = if a.kind == b.kind {
            reasons.push(MatchReason::KindMatch {
                kind: a.kind.as_str().to_string(),
            });

            let name = name_similarity(&a.name, &b.name);
            if name > 0.0 {
                reasons.push(MatchReason::NameSimilarity { score: name });
            }

            let tags = tag_jaccard(&a.tags, &b.tags);
            if tags > 0.0 {
                reasons.push(MatchReason::TagOverlap { jaccard: tags });
            }

            let shapes = match (&a.signature, &b.signature) {
                (Some(sa), Some(sb)) => {
                    match (SignatureShape::parse(sa), SignatureShape::parse(sb)) {
                        (Some(pa), Some(pb)) => Some(pa.compatible(&pb)),
                        _ => None,
                    }
                }
                _ => None,
            };

            match shapes {
                Some(true) => {
                    reasons.push(MatchReason::SignatureCompatible);
                    0.5 * name + 0.3 * tags + 0.2
                }
                Some(false) => {
                    signatures_disagree = true;
                    0.5 * name + 0.3 * tags
                }
                None => 0.6 * name + 0.4 * tags,
            }
        } else {
            0.0
        };

        let mut related = structural_score >= self.threshold;
        let mut semantically_unrelated = false;

        if let Some(semantic) = &self.semantic {
            let verdict = semantic.relate(a, b);
            if verdict.related {
                // OR rule: the semantic hook can fire a match on its own.
                related = true;
                reasons.push(MatchReason::SemanticRelated {
                    reason: verdict.reason,
                });
            } else if related {
                // Structure says overlap, semantics says unrelated: the
                // pair still overlaps but is flagged for classification.
                semantically_unrelated = true;
            }
        }

        PairMatch {
            score: structural_score,
            related,
            reasons,
            signatures_disagree,
            semantically_unrelated,
        }
    }

    /// Best match between two interface lists: the highest-scoring
    /// related pair, with the interface name it fired on.
    pub fn best_match(
        &self,
        left: &[InterfaceSpec],
        right: &[InterfaceSpec],
    ) -> Option<(String, PairMatch)> {
        let mut best: Option<(String, PairMatch)> = None;
        for a in left {
            for b in right {
                let m = self.match_pair(a, b);
                if !m.related {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some((_, prev)) => m.score > prev.score,
                };
                if better {
                    best = Some((a.name.clone(), m));
                }
            }
        }
        best
    }
}
