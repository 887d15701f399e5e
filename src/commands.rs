//! Requests the daemon accepts, and what each of them returns.

use serde::{Deserialize, Serialize};

use crate::semantic::{
    ClusterReport, DispatchOutcome, FolderCentroid, IndexSession, SearchHit, SemanticError, Status,
    SuggestionReport, SyncReport,
};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Status,
    Sync,
    Search {
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
    BuildCentroids,
    SuggestCategories,
    DispatchItem {
        id: String,
    },
    Cluster,
    Reset,
    NotifyCreated {
        id: String,
    },
    NotifyRemoved {
        id: String,
    },
    NotifyMoved {
        id: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Response {
    Status(Status),
    Sync(SyncReport),
    Search(Vec<SearchHit>),
    Centroids(Vec<FolderCentroid>),
    Suggestions(SuggestionReport),
    Dispatch(DispatchOutcome),
    Cluster(ClusterReport),
    Reset,
    /// Whether the notification was recorded
    Notified(bool),
}

pub fn dispatch(session: &IndexSession, command: Command) -> Result<Response, SemanticError> {
    log::debug!("command: {command:?}");

    let response = match command {
        Command::Status => Response::Status(session.status()?),
        Command::Sync => Response::Sync(session.sync()?),
        Command::Search { query, top_k } => Response::Search(session.search(&query, top_k)?),
        Command::BuildCentroids => Response::Centroids(session.build_centroids()?),
        Command::SuggestCategories => Response::Suggestions(session.suggest_categories()?),
        Command::DispatchItem { id } => Response::Dispatch(session.dispatch_item(&id)?),
        Command::Cluster => Response::Cluster(session.cluster_subcollection()?),
        Command::Reset => {
            session.reset()?;
            Response::Reset
        }
        Command::NotifyCreated { id } => Response::Notified(session.notify_created(&id)?),
        Command::NotifyRemoved { id } => Response::Notified(session.notify_removed(&id)?),
        Command::NotifyMoved { id } => Response::Notified(session.notify_moved(&id)?),
    };

    Ok(response)
}
