//! Automatic cluster names from TF-IDF weighted tokens.
//!
//! Every formed cluster of a run is one document. A token's idf is
//! `ln((N + 1) / (df + 1)) + 1`, so words shared by almost every cluster sink
//! to the bottom without a stopword list.

use std::collections::{HashMap, HashSet};

use jieba_rs::Jieba;
use once_cell::sync::Lazy;

use super::Point;
use crate::semantic::index::{cosine_similarity, mean_vector};

/// Share of a cluster one author must own for the name to lead with the author.
pub const AUTHOR_DOMINANCE: f32 = 0.6;

const MAX_TOPIC_TOKENS: usize = 3;
const TOPIC_SEPARATOR: &str = " · ";
const PREVIEW_CHARS: usize = 20;

static JIEBA: Lazy<Jieba> = Lazy::new(Jieba::new);

fn is_han(c: char) -> bool {
    matches!(c, '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}')
}

/// Split text into lowercase name candidates.
///
/// Han runs go through word segmentation; everything else splits on
/// non-alphanumeric characters. Single Han characters, other tokens under 3
/// characters and pure numbers are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run = String::new();
    let mut run_is_han = false;

    for c in text.chars() {
        let han = is_han(c);
        if !run.is_empty() && han != run_is_han {
            push_run(&run, run_is_han, &mut tokens);
            run.clear();
        }
        run_is_han = han;
        run.push(c);
    }
    if !run.is_empty() {
        push_run(&run, run_is_han, &mut tokens);
    }

    tokens
}

fn push_run(run: &str, is_han_run: bool, tokens: &mut Vec<String>) {
    if is_han_run {
        for word in JIEBA.cut(run, true) {
            accept(word, tokens);
        }
    } else {
        for word in run.split(|c: char| !c.is_alphanumeric()) {
            accept(word, tokens);
        }
    }
}

fn accept(word: &str, tokens: &mut Vec<String>) {
    let token = word.trim().to_lowercase();
    if token.is_empty() || !token.chars().any(char::is_alphanumeric) {
        return;
    }

    let len = token.chars().count();
    if token.chars().any(is_han) {
        if len < 2 {
            return;
        }
    } else if len < 3 {
        return;
    }

    if token.chars().all(|c| c.is_ascii_digit()) {
        return;
    }

    tokens.push(token);
}

/// Cluster-frequency statistics of one run.
#[derive(Debug, Default)]
pub struct TermWeights {
    documents: usize,
    document_frequency: HashMap<String, usize>,
}

impl TermWeights {
    /// One document per cluster, each given as the tokens of all its members.
    pub fn from_documents<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        let mut weights = Self::default();

        for tokens in documents {
            weights.documents += 1;
            let unique: HashSet<&String> = tokens.iter().collect();
            for token in unique {
                *weights.document_frequency.entry(token.clone()).or_insert(0) += 1;
            }
        }

        weights
    }

    pub fn idf(&self, token: &str) -> f32 {
        match self.document_frequency.get(token) {
            None | Some(0) => 0.0,
            Some(&df) => ((self.documents + 1) as f32 / (df + 1) as f32).ln() + 1.0,
        }
    }
}

/// Tokens ranked by `tf * idf`, ties in order of first appearance.
pub fn rank_terms(tokens: &[String], weights: &TermWeights) -> Vec<(String, f32)> {
    let mut order: Vec<&String> = Vec::new();
    let mut tf: HashMap<&String, usize> = HashMap::new();

    for token in tokens {
        let count = tf.entry(token).or_insert(0);
        if *count == 0 {
            order.push(token);
        }
        *count += 1;
    }

    let mut ranked: Vec<(String, f32)> = order
        .into_iter()
        .map(|token| (token.clone(), tf[token] as f32 * weights.idf(token)))
        .collect();

    // stable, so equal scores keep first-appearance order
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Member closest to the cluster mean. Ties go to the earliest member.
fn representative<'p, 'a>(members: &'p [Point<'a>]) -> Option<&'p Point<'a>> {
    let centroid = mean_vector(members.iter().map(|p| p.vector))?;

    let mut best: Option<(&Point, f32)> = None;
    for member in members {
        let sim = cosine_similarity(member.vector, &centroid);
        if best.map_or(true, |(_, best_sim)| sim > best_sim) {
            best = Some((member, sim));
        }
    }
    best.map(|(member, _)| member)
}

/// Author owning at least 60% of the members. Count ties go to the smaller name.
fn dominant_author<'a>(members: &[Point<'a>]) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for author in members.iter().filter_map(|p| p.author) {
        *counts.entry(author).or_insert(0) += 1;
    }

    let (author, count) = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))?;

    (count as f32 / members.len() as f32 >= AUTHOR_DOMINANCE).then_some(author)
}

/// Up to three topic tokens, taken from the representative first and padded
/// from the whole cluster ranking.
fn topic_tokens(representative: &Point, ranked: &[(String, f32)]) -> Vec<String> {
    let score_of = |token: &str| {
        ranked
            .iter()
            .find(|(t, _)| t == token)
            .map_or(0.0, |(_, score)| *score)
    };

    let mut own: Vec<String> = Vec::new();
    for token in tokenize(representative.text) {
        if !own.contains(&token) {
            own.push(token);
        }
    }
    own.sort_by(|a, b| {
        score_of(b)
            .partial_cmp(&score_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    own.truncate(MAX_TOPIC_TOKENS);

    for (token, _) in ranked {
        if own.len() >= MAX_TOPIC_TOKENS {
            break;
        }
        if !own.contains(token) {
            own.push(token.clone());
        }
    }

    own
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", head.trim_end_matches('.'))
}

/// Name a formed cluster.
pub fn cluster_name(members: &[Point], weights: &TermWeights) -> String {
    let Some(representative) = representative(members) else {
        return String::new();
    };

    let tokens: Vec<String> = members.iter().flat_map(|p| tokenize(p.text)).collect();
    let ranked = rank_terms(&tokens, weights);
    let topics = topic_tokens(representative, &ranked).join(TOPIC_SEPARATOR);

    match dominant_author(members) {
        Some(author) if topics.is_empty() => format!("{author}: collection"),
        Some(author) => format!("{author}: {topics}"),
        None if !topics.is_empty() => topics,
        None => preview(representative.text),
    }
}

/// Hands out unique names within one run, suffixing repeats with ` (2)`, ` (3)`…
#[derive(Debug, Default)]
pub struct NameRegistry {
    taken: HashSet<String>,
}

impl NameRegistry {
    /// Mark a name as used without handing it out.
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn claim(&mut self, name: &str) -> String {
        let mut candidate = name.to_string();
        let mut suffix = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{name} ({suffix})");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}
