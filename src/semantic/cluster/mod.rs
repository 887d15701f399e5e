//! Author-aware clustering of social-media captures.
//!
//! Flow:
//! 1. Split off media-only captures (no usable text or no embedding)
//! 2. Attract captures to existing groups (member centroid or group name)
//! 3. Average-linkage pass at 0.72, then again over singletons at 0.58
//! 4. Merge remaining singletons into the nearest formed centroid at 0.52
//! 5. Name formed clusters, bucket leftovers by author

pub mod naming;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::CollectionConfig;
use crate::items::{Item, ItemTree, PATH_SEPARATOR};
use crate::semantic::embeddings::{embed_all, Embedder, EmbeddingError};
use crate::semantic::index::{cosine_similarity, mean_vector, VectorStore};
use crate::semantic::preprocess::clean_title;

use naming::{cluster_name, tokenize, NameRegistry, TermWeights};

/// Acceptance bar against the centroid of a group that already has members.
pub const CENTROID_ATTRACT_THRESHOLD: f32 = 0.75;
/// Acceptance bar against the embedded name of an empty group.
pub const NAME_ATTRACT_THRESHOLD: f32 = 0.68;
/// Added to the cosine similarity of two captures by the same author.
pub const SAME_AUTHOR_BONUS: f32 = 0.08;
pub const TIGHT_THRESHOLD: f32 = 0.72;
pub const LOOSE_THRESHOLD: f32 = 0.58;
pub const MERGE_THRESHOLD: f32 = 0.52;

/// Captures with fewer characters of text are treated as media-only.
const MIN_TEXT_CHARS: usize = 5;

const MISC_GROUP: &str = "Miscellaneous";
const MEDIA_GROUP: &str = "Media & links";

/// A capture with its title split into author and text.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub item: Item,
    pub author: Option<String>,
    pub text: String,
}

/// Parse `"{prefix} {author}: {text}"`. `None` when the title has no capture prefix.
pub fn parse_capture(item: &Item, collection: &CollectionConfig) -> Option<Capture> {
    let title = clean_title(&item.title);
    let start = title.find(&collection.capture_prefix)?;
    let rest = &title[start + collection.capture_prefix.len()..];

    let (author, text) = match rest.split_once(':') {
        Some((author, text)) => {
            let author = author.trim();
            ((!author.is_empty()).then(|| author.to_string()), text.trim().to_string())
        }
        None => (None, title.clone()),
    };

    Some(Capture {
        item: item.clone(),
        author,
        text,
    })
}

/// A group that already exists in the collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExistingGroup {
    pub name: String,
    pub item_ids: Vec<String>,
}

/// Captures split into already-filed groups and the ones still to cluster.
#[derive(Debug, Default)]
pub struct CaptureSet {
    /// Ordered by name
    pub groups: Vec<ExistingGroup>,
    pub unfiled: Vec<Capture>,
}

/// Find captures in the tree and the groups they may join.
///
/// Groups are the folders directly below the capture root, plus the leaf of any
/// other folder a capture was filed into. Captures at the capture root or in an
/// unsorted location are unfiled.
pub fn discover_captures(tree: &ItemTree, collection: &CollectionConfig) -> CaptureSet {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for folder in &tree.folders {
        let segments = folder.segments();
        if segments.len() >= 2 && segments[segments.len() - 2] == collection.capture_root {
            groups.entry(folder.title.clone()).or_default();
        }
    }

    let mut unfiled = Vec::new();
    for item in &tree.items {
        let Some(capture) = parse_capture(item, collection) else {
            continue;
        };

        if collection.is_unsorted_path(&item.folder_path) {
            unfiled.push(capture);
            continue;
        }

        let segments: Vec<&str> = item.folder_path.split(PATH_SEPARATOR).collect();
        let group = match segments.iter().position(|s| *s == collection.capture_root) {
            None => item.folder_leaf(),
            Some(root) => segments.get(root + 1).copied(),
        };

        match group {
            Some(name) => groups.entry(name.to_string()).or_default().push(item.id.clone()),
            None => unfiled.push(capture),
        }
    }

    CaptureSet {
        groups: groups
            .into_iter()
            .map(|(name, item_ids)| ExistingGroup { name, item_ids })
            .collect(),
        unfiled,
    }
}

/// A named list of items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterDraft {
    pub name: String,
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterReport {
    /// Existing groups with the captures already filed in them
    pub existing: Vec<ExistingGroup>,
    /// Captures routed into an existing group, keyed by the group name
    pub attracted: Vec<ClusterDraft>,
    /// Unsupervised clusters, largest first
    pub formed: Vec<ClusterDraft>,
    /// Per-author leftovers and the miscellaneous rest
    pub unclustered: Vec<ClusterDraft>,
    pub media_only: Option<ClusterDraft>,
}

/// A capture taking part in clustering.
#[derive(Debug, Clone, Copy)]
struct Point<'a> {
    id: &'a str,
    author: Option<&'a str>,
    text: &'a str,
    vector: &'a [f32],
}

struct AttractionTarget {
    name: String,
    vector: Vec<f32>,
    threshold: f32,
}

/// One vector per existing group: the plain mean of its embedded members, or the
/// embedding of the name when the group is empty.
fn attraction_targets(
    groups: &[ExistingGroup],
    store: &VectorStore,
    embedder: &dyn Embedder,
) -> Result<Vec<AttractionTarget>, EmbeddingError> {
    let mut targets = Vec::new();
    let mut empty_names = Vec::new();

    for group in groups {
        if group.item_ids.is_empty() {
            empty_names.push(group.name.clone());
            continue;
        }

        let vectors = group
            .item_ids
            .iter()
            .filter_map(|id| store.get(id))
            .map(|entry| entry.embedding.as_slice());
        if let Some(vector) = mean_vector(vectors) {
            targets.push(AttractionTarget {
                name: group.name.clone(),
                vector,
                threshold: CENTROID_ATTRACT_THRESHOLD,
            });
        }
    }

    let name_vectors = embed_all(embedder, &empty_names)?;
    for (name, vector) in empty_names.into_iter().zip(name_vectors) {
        if vector.len() != store.dimensions() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "group name embedding has {} dimensions, index has {}",
                vector.len(),
                store.dimensions()
            )));
        }
        targets.push(AttractionTarget {
            name,
            vector,
            threshold: NAME_ATTRACT_THRESHOLD,
        });
    }

    Ok(targets)
}

fn enhanced_similarity(a: &Point, vector: &[f32], author: Option<&str>) -> f32 {
    let sim = cosine_similarity(a.vector, vector);
    match (a.author, author) {
        (Some(x), Some(y)) if x == y => (sim + SAME_AUTHOR_BONUS).min(1.0),
        _ => sim,
    }
}

/// Single sweep in arrival order: join the cluster with the best average
/// similarity if it clears `threshold`, else open a new one. Ties go to the
/// earliest cluster.
fn average_linkage<'a>(points: Vec<Point<'a>>, threshold: f32) -> Vec<Vec<Point<'a>>> {
    let mut clusters: Vec<Vec<Point<'a>>> = Vec::new();

    for point in points {
        let mut best: Option<(usize, f32)> = None;
        for (idx, cluster) in clusters.iter().enumerate() {
            let total: f32 = cluster
                .iter()
                .map(|member| enhanced_similarity(&point, member.vector, member.author))
                .sum();
            let average = total / cluster.len() as f32;
            if best.map_or(true, |(_, best_score)| average > best_score) {
                best = Some((idx, average));
            }
        }

        match best {
            Some((idx, score)) if score >= threshold => clusters[idx].push(point),
            _ => clusters.push(vec![point]),
        }
    }

    clusters
}

fn split_singletons<'a>(clusters: Vec<Vec<Point<'a>>>) -> (Vec<Vec<Point<'a>>>, Vec<Point<'a>>) {
    let mut formed = Vec::new();
    let mut singletons = Vec::new();
    for mut cluster in clusters {
        if cluster.len() >= 2 {
            formed.push(cluster);
        } else if let Some(point) = cluster.pop() {
            singletons.push(point);
        }
    }
    (formed, singletons)
}

/// Merge each singleton into the formed cluster with the most similar mean.
/// Centroids reflect earlier merges. Returns the singletons that stay alone.
fn merge_into_centroids<'a>(
    formed: &mut [Vec<Point<'a>>],
    singletons: Vec<Point<'a>>,
) -> Vec<Point<'a>> {
    let mut alone = Vec::new();

    for point in singletons {
        let mut best: Option<(usize, f32)> = None;
        for (idx, cluster) in formed.iter().enumerate() {
            let Some(centroid) = mean_vector(cluster.iter().map(|p| p.vector)) else {
                continue;
            };
            let sim = enhanced_similarity(&point, &centroid, None);
            if best.map_or(true, |(_, best_sim)| sim > best_sim) {
                best = Some((idx, sim));
            }
        }

        match best {
            Some((idx, sim)) if sim >= MERGE_THRESHOLD => formed[idx].push(point),
            _ => alone.push(point),
        }
    }

    alone
}

fn is_media_only(text: &str, collection: &CollectionConfig) -> bool {
    text.starts_with(&collection.media_placeholder) || text.chars().count() < MIN_TEXT_CHARS
}

fn ids(points: &[Point]) -> Vec<String> {
    points.iter().map(|p| p.id.to_string()).collect()
}

/// Cluster the unfiled captures of `set`.
///
/// Fails only when embedding an empty group's name fails; nothing is returned
/// in that case.
pub fn cluster_captures(
    set: &CaptureSet,
    store: &VectorStore,
    embedder: &dyn Embedder,
    collection: &CollectionConfig,
) -> Result<ClusterReport, EmbeddingError> {
    let mut media: Vec<String> = Vec::new();
    let mut pool: Vec<Point> = Vec::new();

    for capture in &set.unfiled {
        let entry = store.get(&capture.item.id);
        match entry {
            Some(entry) if !is_media_only(&capture.text, collection) => pool.push(Point {
                id: &capture.item.id,
                author: capture.author.as_deref(),
                text: &capture.text,
                vector: &entry.embedding,
            }),
            _ => media.push(capture.item.id.clone()),
        }
    }

    // attraction
    let mut attracted: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if !set.groups.is_empty() && !pool.is_empty() {
        let targets = attraction_targets(&set.groups, store, embedder)?;
        let mut remaining = Vec::with_capacity(pool.len());

        for point in pool {
            let mut best: Option<(&AttractionTarget, f32)> = None;
            for target in &targets {
                let sim = cosine_similarity(point.vector, &target.vector);
                if best.map_or(true, |(_, best_sim)| sim > best_sim) {
                    best = Some((target, sim));
                }
            }

            match best {
                Some((target, sim)) if sim >= target.threshold => attracted
                    .entry(target.name.clone())
                    .or_default()
                    .push(point.id.to_string()),
                _ => remaining.push(point),
            }
        }
        pool = remaining;
    }

    let candidates = pool.len();

    // pass 1
    let (mut formed, singletons) = split_singletons(average_linkage(pool, TIGHT_THRESHOLD));
    let tight = formed.len();

    // pass 2
    let singletons = if singletons.len() > 1 {
        let (loose, rest) = split_singletons(average_linkage(singletons, LOOSE_THRESHOLD));
        formed.extend(loose);
        rest
    } else {
        singletons
    };

    // pass 3
    let alone = merge_into_centroids(&mut formed, singletons);

    log::info!(
        "clustered {} captures: {} attracted, {} clusters ({} tight), {} unclustered, {} media-only",
        set.unfiled.len(),
        attracted.values().map(Vec::len).sum::<usize>(),
        formed.len(),
        tight,
        alone.len(),
        media.len()
    );
    log::debug!("{candidates} captures entered unsupervised clustering");

    let mut registry = NameRegistry::default();
    for group in &set.groups {
        registry.reserve(&group.name);
    }

    // naming
    let documents: Vec<Vec<String>> = formed
        .iter()
        .map(|cluster| cluster.iter().flat_map(|p| tokenize(p.text)).collect())
        .collect();
    let weights = TermWeights::from_documents(documents.iter().map(Vec::as_slice));

    formed.sort_by(|a, b| b.len().cmp(&a.len()));
    let formed: Vec<ClusterDraft> = formed
        .iter()
        .map(|cluster| ClusterDraft {
            name: registry.claim(&cluster_name(cluster, &weights)),
            item_ids: ids(cluster),
        })
        .collect();

    // leftovers
    let mut by_author: Vec<(&str, Vec<Point>)> = Vec::new();
    for point in &alone {
        if let Some(author) = point.author {
            match by_author.iter_mut().find(|(a, _)| *a == author) {
                Some((_, points)) => points.push(*point),
                None => by_author.push((author, vec![*point])),
            }
        }
    }

    let mut unclustered = Vec::new();
    let mut bucketed: Vec<&str> = Vec::new();
    for (author, points) in &by_author {
        if points.len() >= 2 {
            unclustered.push(ClusterDraft {
                name: registry.claim(&format!("{author}: other saves")),
                item_ids: ids(points),
            });
            bucketed.extend(points.iter().map(|p| p.id));
        }
    }

    let misc: Vec<String> = alone
        .iter()
        .filter(|p| !bucketed.contains(&p.id))
        .map(|p| p.id.to_string())
        .collect();
    if !misc.is_empty() {
        unclustered.push(ClusterDraft {
            name: registry.claim(MISC_GROUP),
            item_ids: misc,
        });
    }

    let media_only = (!media.is_empty()).then(|| ClusterDraft {
        name: registry.claim(MEDIA_GROUP),
        item_ids: media,
    });

    Ok(ClusterReport {
        existing: set.groups.clone(),
        attracted: attracted
            .into_iter()
            .map(|(name, item_ids)| ClusterDraft { name, item_ids })
            .collect(),
        formed,
        unclustered,
        media_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::Folder;

    fn capture_item(id: &str, author: &str, text: &str, folder_path: &str) -> Item {
        Item {
            id: id.to_string(),
            title: format!("[X推文] {author}: {text}"),
            url: format!("https://x.com/{author}/status/{id}"),
            folder_path: folder_path.to_string(),
            parent_id: None,
            added_at: None,
        }
    }

    fn point<'a>(id: &'a str, author: Option<&'a str>, vector: &'a [f32]) -> Point<'a> {
        Point {
            id,
            author,
            text: "",
            vector,
        }
    }

    struct NameEmbedder;

    impl Embedder for NameEmbedder {
        fn model_name(&self) -> &str {
            "names"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0, 1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.0, 1.0]).collect())
        }
    }

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn model_name(&self) -> &str {
            "down"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::EmbeddingFailed("offline".to_string()))
        }

        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::EmbeddingFailed("offline".to_string()))
        }
    }

    #[test]
    fn test_parse_capture() {
        let collection = CollectionConfig::default();

        let item = capture_item("1", "alice", "hello\u{200B}{}\u{200B} there", "");
        let capture = parse_capture(&item, &collection).unwrap();
        assert_eq!(capture.author.as_deref(), Some("alice"));
        assert_eq!(capture.text, "hello there");

        let mut bare = item.clone();
        bare.title = "[X推文] no colon here".to_string();
        let capture = parse_capture(&bare, &collection).unwrap();
        assert_eq!(capture.author, None);
        assert_eq!(capture.text, "[X推文] no colon here");

        let mut plain = item;
        plain.title = "Just a page".to_string();
        assert!(parse_capture(&plain, &collection).is_none());
    }

    #[test]
    fn test_discover_captures() {
        let collection = CollectionConfig::default();
        let root = "Other bookmarks > Twitter/X Bookmarks";
        let tree = ItemTree {
            items: vec![
                capture_item("1", "a", "at the root", root),
                capture_item("2", "b", "filed under AI", &format!("{root} > AI")),
                capture_item("3", "c", "filed deeper", &format!("{root} > AI > Papers")),
                capture_item("4", "d", "filed elsewhere", "Bookmarks bar > Reading"),
                capture_item("5", "e", "still unsorted", "Bookmarks bar"),
                Item {
                    title: "not a capture".to_string(),
                    ..capture_item("6", "f", "", "Bookmarks bar")
                },
            ],
            folders: vec![
                Folder {
                    id: "50".to_string(),
                    title: "Twitter/X Bookmarks".to_string(),
                    path: root.to_string(),
                },
                Folder {
                    id: "51".to_string(),
                    title: "AI".to_string(),
                    path: format!("{root} > AI"),
                },
                Folder {
                    id: "52".to_string(),
                    title: "Cooking".to_string(),
                    path: format!("{root} > Cooking"),
                },
            ],
        };

        let set = discover_captures(&tree, &collection);
        let unfiled: Vec<&str> = set.unfiled.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(unfiled, vec!["1", "5"]);

        assert_eq!(
            set.groups,
            vec![
                ExistingGroup {
                    name: "AI".to_string(),
                    item_ids: vec!["2".to_string(), "3".to_string()],
                },
                ExistingGroup {
                    name: "Cooking".to_string(),
                    item_ids: vec![],
                },
                ExistingGroup {
                    name: "Reading".to_string(),
                    item_ids: vec!["4".to_string()],
                },
            ]
        );
    }

    #[test]
    fn test_same_author_bonus_is_capped() {
        let a = [1.0f32, 0.0];
        let b = [0.6f32, 0.8];
        let p = point("1", Some("x"), &a);

        let plain = enhanced_similarity(&p, &b, Some("y"));
        let boosted = enhanced_similarity(&p, &b, Some("x"));
        assert!((boosted - plain - SAME_AUTHOR_BONUS).abs() < 1e-6);
        assert_eq!(enhanced_similarity(&p, &a, Some("x")), 1.0);
        assert_eq!(enhanced_similarity(&p, &b, None), plain);
    }

    #[test]
    fn test_tight_pass_threshold() {
        // cos(a, b) = 0.9, cos(c, d) = 0.6
        let a = [1.0f32, 0.0];
        let b = [0.9f32, (1.0f32 - 0.81).sqrt()];
        let c = [0.0f32, 1.0];
        let d = [(1.0f32 - 0.36).sqrt(), 0.6];

        let clusters = average_linkage(
            vec![
                point("a", None, &a),
                point("c", Some("p"), &c),
                point("b", None, &b),
                point("d", Some("q"), &d),
            ],
            TIGHT_THRESHOLD,
        );

        let find = |id: &str| clusters.iter().position(|cl| cl.iter().any(|p| p.id == id)).unwrap();
        assert_eq!(find("a"), find("b"));
        assert_ne!(find("c"), find("d"));
    }

    #[test]
    fn test_merge_pass_uses_centroids() {
        let a = [1.0f32, 0.0];
        let b = [0.8f32, 0.6];
        let near = [0.6f32, 0.8];
        let far = [-1.0f32, 0.0];

        let mut formed = vec![vec![point("a", None, &a), point("b", None, &b)]];
        let alone = merge_into_centroids(
            &mut formed,
            vec![point("near", None, &near), point("far", None, &far)],
        );

        assert_eq!(formed[0].len(), 3);
        assert_eq!(alone.len(), 1);
        assert_eq!(alone[0].id, "far");
    }

    fn store_with(entries: &[(&Item, [f32; 2])]) -> VectorStore {
        let mut store = VectorStore::new(2);
        for (item, vector) in entries {
            store.insert((*item).clone(), 0, vector.to_vec()).unwrap();
        }
        store
    }

    #[test]
    fn test_attraction_by_centroid_and_by_name() {
        let collection = CollectionConfig::default();
        let root = "Other bookmarks > Twitter/X Bookmarks";

        let member = capture_item("m", "a", "existing member text", &format!("{root} > AI"));
        let to_ai = capture_item("1", "b", "close to the AI group", root);
        let to_cooking = capture_item("2", "c", "matches the empty group name", root);
        let neither = capture_item("3", "d", "belongs nowhere at all", root);

        let store = store_with(&[
            (&member, [1.0, 0.0]),
            (&to_ai, [0.95, 0.1]),
            (&to_cooking, [0.1, 0.95]),
            (&neither, [-1.0, 0.0]),
        ]);

        let tree = ItemTree {
            items: vec![member, to_ai, to_cooking, neither],
            folders: vec![Folder {
                id: "52".to_string(),
                title: "Cooking".to_string(),
                path: format!("{root} > Cooking"),
            }],
        };
        let set = discover_captures(&tree, &collection);
        let report = cluster_captures(&set, &store, &NameEmbedder, &collection).unwrap();

        assert_eq!(
            report.attracted,
            vec![
                ClusterDraft {
                    name: "AI".to_string(),
                    item_ids: vec!["1".to_string()],
                },
                ClusterDraft {
                    name: "Cooking".to_string(),
                    item_ids: vec!["2".to_string()],
                },
            ]
        );
        assert!(report.formed.is_empty());
        assert_eq!(report.unclustered.len(), 1);
        assert_eq!(report.unclustered[0].name, MISC_GROUP);
        assert_eq!(report.unclustered[0].item_ids, vec!["3".to_string()]);
    }

    #[test]
    fn test_embedding_failure_aborts() {
        let collection = CollectionConfig::default();
        let root = "Other bookmarks > Twitter/X Bookmarks";
        let capture = capture_item("1", "b", "some words here", root);
        let store = store_with(&[(&capture, [1.0, 0.0])]);

        let tree = ItemTree {
            items: vec![capture],
            folders: vec![Folder {
                id: "52".to_string(),
                title: "Empty".to_string(),
                path: format!("{root} > Empty"),
            }],
        };
        let set = discover_captures(&tree, &collection);
        let result = cluster_captures(&set, &store, &DownEmbedder, &collection);
        assert!(matches!(result, Err(EmbeddingError::EmbeddingFailed(_))));
    }

    #[test]
    fn test_media_and_author_buckets() {
        let collection = CollectionConfig::default();
        let root = "Other bookmarks > Twitter/X Bookmarks";

        let media = capture_item("m1", "a", "图片/视频推文", root);
        let short = capture_item("m2", "a", "lol", root);
        let missing = capture_item("m3", "a", "never embedded text", root);
        let x1 = capture_item("x1", "xavier", "completely unrelated one", root);
        let x2 = capture_item("x2", "xavier", "completely unrelated two", root);
        let lone = capture_item("l1", "yan", "another lonely thought", root);

        // pairwise orthogonal or opposite, below every threshold
        let store = store_with(&[
            (&media, [1.0, 0.0]),
            (&short, [1.0, 0.0]),
            (&x1, [1.0, 0.0]),
            (&x2, [-0.6, 0.8]),
            (&lone, [-0.6, -0.8]),
        ]);

        let tree = ItemTree {
            items: vec![media, short, missing, x1, x2, lone],
            folders: vec![],
        };
        let set = discover_captures(&tree, &collection);
        let report = cluster_captures(&set, &store, &NameEmbedder, &collection).unwrap();

        let media_only = report.media_only.unwrap();
        assert_eq!(media_only.name, MEDIA_GROUP);
        assert_eq!(media_only.item_ids, vec!["m1", "m2", "m3"]);

        assert!(report.formed.is_empty());
        assert_eq!(
            report.unclustered,
            vec![
                ClusterDraft {
                    name: "xavier: other saves".to_string(),
                    item_ids: vec!["x1".to_string(), "x2".to_string()],
                },
                ClusterDraft {
                    name: MISC_GROUP.to_string(),
                    item_ids: vec!["l1".to_string()],
                },
            ]
        );
    }
}
