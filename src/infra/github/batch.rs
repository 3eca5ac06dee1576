//! Aliased multi-fetch queries.
//!
//! Several thread fetches are folded into one GraphQL document, each under
//! its own alias (`d0`, `d1`, ...), and the response is routed back by alias.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::application::remote::{FetchRequest, Lookup};

use super::model::{Directory, DiscussionsRepository, RawDiscussion};
use super::queries::with_discussion_fragments;

/// How one request's result is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Route {
    ById { alias: String, page_path: String },
    ByTitle { alias: String, page_path: String },
    /// Settled without asking upstream.
    Settled(Option<Lookup>),
}

#[derive(Debug)]
pub(super) struct BatchQuery {
    pub document: String,
    pub variables: Value,
    pub routes: Vec<Route>,
}

impl BatchQuery {
    /// Build the aliased document. `directory` is `None` when categories could
    /// not be loaded; title searches then settle as unavailable.
    pub fn build(
        owner: &str,
        repo: &str,
        requests: &[FetchRequest],
        directory: Option<&Directory>,
    ) -> Self {
        let mut selections = String::new();
        let mut declarations = Vec::new();
        let mut variables = Map::new();
        let mut routes = Vec::with_capacity(requests.len());
        let mut needs_repository = false;

        for (index, request) in requests.iter().enumerate() {
            let alias = format!("d{index}");
            match request {
                FetchRequest::ById { id, thread } => {
                    let var = format!("i{index}");
                    declarations.push(format!("${var}: ID!"));
                    variables.insert(var.clone(), json!(id));
                    let _ = writeln!(
                        selections,
                        "  {alias}: node(id: ${var}) {{ ... on Discussion {{ ...DiscussionFields }} }}"
                    );
                    routes.push(Route::ById {
                        alias,
                        page_path: thread.page_path().to_string(),
                    });
                }
                FetchRequest::ByTitle(thread) => {
                    let Some(directory) = directory else {
                        routes.push(Route::Settled(None));
                        continue;
                    };
                    let Some(category_id) = directory.categories.get(thread.category()) else {
                        routes.push(Route::Settled(Some(Lookup::NotFound)));
                        continue;
                    };
                    let var = format!("c{index}");
                    declarations.push(format!("${var}: ID!"));
                    variables.insert(var.clone(), json!(category_id));
                    needs_repository = true;
                    let _ = writeln!(
                        selections,
                        "  {alias}: repository(owner: $owner, name: $name) {{ discussions(first: 50, categoryId: ${var}, orderBy: {{field: CREATED_AT, direction: DESC}}) {{ nodes {{ ...DiscussionFields }} }} }}"
                    );
                    routes.push(Route::ByTitle {
                        alias,
                        page_path: thread.page_path().to_string(),
                    });
                }
            }
        }

        if needs_repository {
            declarations.insert(0, "$name: String!".to_string());
            declarations.insert(0, "$owner: String!".to_string());
            variables.insert("owner".to_string(), json!(owner));
            variables.insert("name".to_string(), json!(repo));
        }

        let body = format!(
            "query BatchDiscussions({}) {{\n{selections}}}\n",
            declarations.join(", ")
        );

        Self {
            document: with_discussion_fragments(&body),
            variables: Value::Object(variables),
            routes,
        }
    }

    /// Whether any route needs the upstream call at all.
    pub fn has_selections(&self) -> bool {
        self.routes
            .iter()
            .any(|route| !matches!(route, Route::Settled(_)))
    }

    /// Route `data` back to positional results.
    pub fn route(self, data: Option<HashMap<String, Value>>) -> Vec<Option<Lookup>> {
        let mut data = data.unwrap_or_default();
        self.routes
            .into_iter()
            .map(|route| match route {
                Route::Settled(result) => result,
                Route::ById { alias, page_path } => {
                    let value = data.remove(&alias)?;
                    decode::<Option<RawDiscussion>>(&alias, value)
                        .map(|node| pick_by_id(node, &page_path))
                }
                Route::ByTitle { alias, page_path } => {
                    let value = data.remove(&alias)?;
                    decode::<Option<DiscussionsRepository>>(&alias, value)
                        .map(|repository| pick_by_title(repository, &page_path))
                }
            })
            .collect()
    }
}

/// The discussion whose title is exactly `page_path`.
pub(super) fn pick_by_title(repository: Option<DiscussionsRepository>, page_path: &str) -> Lookup {
    repository
        .and_then(|repository| {
            repository
                .discussions
                .into_items()
                .find(|discussion| discussion.title == page_path)
        })
        .map_or(Lookup::NotFound, |discussion| Lookup::Found(discussion.into()))
}

/// A fetched node counts only when it is the discussion titled `page_path`.
pub(super) fn pick_by_id(node: Option<RawDiscussion>, page_path: &str) -> Lookup {
    match node {
        Some(discussion) if discussion.title == page_path => Lookup::Found(discussion.into()),
        Some(discussion) => {
            debug!(
                id = %discussion.id,
                title = %discussion.title,
                page_path,
                "Discussion id belongs to another page"
            );
            Lookup::NotFound
        }
        None => Lookup::NotFound,
    }
}

fn decode<T: serde::de::DeserializeOwned>(alias: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(alias, error = %err, "Undecodable batched result");
            None
        }
    }
}
