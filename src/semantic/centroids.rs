//! Robust folder centroids and nearest-centroid suggestions.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::CollectionConfig;
use crate::items::Item;
use crate::semantic::index::{cosine_similarity, mean_vector, normalize, VectorStore};

/// Members less similar to the folder mean than `mean_sim - OUTLIER_MARGIN` are trimmed.
pub const OUTLIER_MARGIN: f32 = 0.1;

/// A suggestion is only made above this confidence.
pub const SUGGESTION_THRESHOLD: f32 = 0.55;

/// Representative vector of one folder.
#[derive(Debug, Clone, Serialize)]
pub struct FolderCentroid {
    pub folder_key: String,
    pub path: String,
    /// Number of indexed items in the folder, outliers included
    pub members: usize,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

/// A proposed move of an item into an existing folder.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub item: Item,
    pub suggested_folder: String,
    pub suggested_folder_id: String,
    pub confidence: f32,
}

/// Output of a category suggestion run.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestionReport {
    /// Number of usable centroids; zero means there was nothing to compare against
    pub centroids: usize,
    pub suggestions: Vec<Suggestion>,
}

/// Why a single item got no folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoSuggestion {
    NotIndexed,
    InsufficientCentroids,
    BelowThreshold { best_folder: String, confidence: f32 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Suggested(Suggestion),
    NoSuggestion(NoSuggestion),
}

/// Mean with outlier trimming, renormalized to unit length.
///
/// A single vector is returned as is; an empty input has no centroid.
pub fn robust_centroid(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    match vectors {
        [] => None,
        [single] => Some(single.to_vec()),
        _ => {
            let mean = mean_vector(vectors.iter().copied())?;
            let similarities: Vec<f32> = vectors
                .iter()
                .map(|v| cosine_similarity(&mean, v))
                .collect();
            let mean_sim = similarities.iter().sum::<f32>() / similarities.len() as f32;

            let retained = vectors
                .iter()
                .zip(&similarities)
                .filter(|(_, sim)| **sim >= mean_sim - OUTLIER_MARGIN)
                .map(|(v, _)| *v);

            // the most typical member always survives, so the subset is never empty
            mean_vector(retained).map(normalize)
        }
    }
}

/// Whether items in `path` may serve as a classification target.
fn is_target_folder(path: &str, collection: &CollectionConfig) -> bool {
    !collection.is_unsorted_path(path) && !collection.is_capture_path(path)
}

/// Robust centroid of every categorized folder, keyed by folder id.
pub fn build_centroids(
    store: &VectorStore,
    collection: &CollectionConfig,
) -> BTreeMap<String, FolderCentroid> {
    let mut groups: BTreeMap<String, (String, Vec<&[f32]>)> = BTreeMap::new();

    for entry in store.sorted_entries() {
        if !is_target_folder(&entry.item.folder_path, collection) {
            continue;
        }

        groups
            .entry(entry.item.folder_key().to_string())
            .or_insert_with(|| (entry.item.folder_path.clone(), Vec::new()))
            .1
            .push(entry.embedding.as_slice());
    }

    let centroids: BTreeMap<String, FolderCentroid> = groups
        .into_iter()
        .filter_map(|(folder_key, (path, vectors))| {
            robust_centroid(&vectors).map(|vector| {
                let centroid = FolderCentroid {
                    folder_key: folder_key.clone(),
                    path,
                    members: vectors.len(),
                    vector,
                };
                (folder_key, centroid)
            })
        })
        .collect();

    log::debug!("built {} folder centroids", centroids.len());
    centroids
}

/// Most similar centroid. Ties go to the smallest folder key.
pub fn nearest_centroid<'a>(
    vector: &[f32],
    centroids: &'a BTreeMap<String, FolderCentroid>,
) -> Option<(&'a FolderCentroid, f32)> {
    let mut best: Option<(&FolderCentroid, f32)> = None;

    for centroid in centroids.values() {
        let score = cosine_similarity(vector, &centroid.vector);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((centroid, score));
        }
    }

    best
}

/// Suggest folders for items still sitting in an unsorted location.
///
/// Sorted by confidence descending, then item id.
pub fn suggest(
    store: &VectorStore,
    centroids: &BTreeMap<String, FolderCentroid>,
    collection: &CollectionConfig,
) -> SuggestionReport {
    let mut suggestions: Vec<Suggestion> = store
        .sorted_entries()
        .into_iter()
        .filter(|entry| collection.is_unsorted_path(&entry.item.folder_path))
        .filter_map(|entry| {
            let (centroid, confidence) = nearest_centroid(&entry.embedding, centroids)?;
            (confidence > SUGGESTION_THRESHOLD).then(|| Suggestion {
                item: entry.item.clone(),
                suggested_folder: centroid.path.clone(),
                suggested_folder_id: centroid.folder_key.clone(),
                confidence,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.id.cmp(&b.item.id))
    });

    SuggestionReport {
        centroids: centroids.len(),
        suggestions,
    }
}

/// Route one indexed item to its nearest folder.
///
/// Centroids never include the capture subtree, so captures are always routed
/// into the main collection.
pub fn dispatch(
    store: &VectorStore,
    item_id: &str,
    centroids: &BTreeMap<String, FolderCentroid>,
) -> DispatchOutcome {
    let Some(entry) = store.get(item_id) else {
        return DispatchOutcome::NoSuggestion(NoSuggestion::NotIndexed);
    };

    let Some((centroid, confidence)) = nearest_centroid(&entry.embedding, centroids) else {
        return DispatchOutcome::NoSuggestion(NoSuggestion::InsufficientCentroids);
    };

    if confidence > SUGGESTION_THRESHOLD {
        DispatchOutcome::Suggested(Suggestion {
            item: entry.item.clone(),
            suggested_folder: centroid.path.clone(),
            suggested_folder_id: centroid.folder_key.clone(),
            confidence,
        })
    } else {
        DispatchOutcome::NoSuggestion(NoSuggestion::BelowThreshold {
            best_folder: centroid.path.clone(),
            confidence,
        })
    }
}
