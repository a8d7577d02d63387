use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What the ingress gateway hands off on first publish. Exactly one of
/// these travels inside `analysis.payload`'s `extra` map under the key
/// `"submission"` until the Analysis transform replaces it with real
/// `tasks`/`intent`/`constraints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    NewProject {
        description: String,
        #[serde(default)]
        requirements: Vec<String>,
        #[serde(default)]
        constraints: Vec<String>,
        #[serde(default)]
        prefs: Vec<String>,
    },
    ExistingGit {
        url: String,
        branch: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        credentials: Option<String>,
    },
    ExistingArchive {
        tree: HashMap<String, String>,
    },
}
