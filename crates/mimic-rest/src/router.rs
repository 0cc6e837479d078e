//! Path-trie routing for saved REST responses.
//!
//! Routes are keyed first on HTTP method, then on `/`-split path segments.
//! A segment starting with `:` registers under the wildcard key `":"` but
//! remembers its declared name for parameter binding. Matching prefers an
//! exact literal child over the wildcard child at every level, backtracking
//! into the wildcard subtree when the literal subtree fails deeper down.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// One registered route, as stored in the response store.
#[derive(Debug, Clone, Deserialize)]
pub struct RestRoute {
    pub method: String,
    pub path: String,
    pub data: Value,
}

/// Successful match result.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    /// Registered route with parameter names, e.g. `/users/:id`.
    pub route: String,
    /// Wildcard bindings keyed by declared parameter name.
    pub params: HashMap<String, String>,
    pub data: Value,
}

#[derive(Debug, Default)]
struct Segment {
    /// Literal segment text, or the declared `:name` for wildcards.
    name: String,
    data: Option<Value>,
    children: HashMap<String, Segment>,
}

impl Segment {
    fn named(name: &str) -> Self {
        Segment {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn add(&mut self, segment: &str) -> &mut Segment {
        let key = if segment.starts_with(':') { ":" } else { segment };
        // First registration wins; a later route reusing the position with a
        // different parameter name keeps the original name.
        self.children
            .entry(key.to_string())
            .or_insert_with(|| Segment::named(segment))
    }

    fn find(&self, segments: &[&str]) -> Option<RouteMatch> {
        let Some((&segment, rest)) = segments.split_first() else {
            return self.data.clone().map(|data| RouteMatch {
                route: "/".to_string(),
                params: HashMap::new(),
                data,
            });
        };
        for key in [segment, ":"] {
            let Some(node) = self.children.get(key) else {
                continue;
            };
            if let Some(found) = node.find(rest) {
                let mut params = found.params;
                if node.name != segment {
                    let name = node.name.trim_start_matches(':').to_string();
                    params.insert(name, segment.to_string());
                }
                return Some(RouteMatch {
                    route: format!("/{}{}", node.name, normalize_tail(&found.route)),
                    params,
                    data: found.data,
                });
            }
        }
        None
    }
}

fn normalize_tail(tail: &str) -> &str {
    // A terminal match reports "/", which would leave a trailing slash.
    if tail == "/" {
        ""
    } else {
        tail
    }
}

/// Segment tree over all of one service's registered routes.
#[derive(Debug, Default)]
pub struct RouterTree {
    root: Segment,
}

impl RouterTree {
    pub fn new(routes: impl IntoIterator<Item = RestRoute>) -> Self {
        let mut tree = RouterTree::default();
        for route in routes {
            tree.add(route);
        }
        tree
    }

    pub fn add(&mut self, route: RestRoute) {
        let mut node = self.root.add(&route.method);
        for segment in route.path.split('/').filter(|s| !s.is_empty()) {
            node = node.add(segment);
        }
        node.data = Some(route.data);
    }

    /// Match an incoming `(method, path)`; `None` when the method is unknown
    /// or no registered route terminates at the exact path.
    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let node = self.root.children.get(method)?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        node.find(&segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(method: &str, path: &str, data: Value) -> RestRoute {
        RestRoute {
            method: method.into(),
            path: path.into(),
            data,
        }
    }

    #[test]
    fn test_literal_beats_wildcard() {
        let tree = RouterTree::new([
            route("GET", "/a/:id", json!("X")),
            route("GET", "/a/b", json!("Y")),
        ]);
        let hit = tree.find("GET", "/a/b").unwrap();
        assert_eq!(hit.data, json!("Y"));
        assert_eq!(hit.route, "/a/b");
        assert!(hit.params.is_empty());
    }

    #[test]
    fn test_wildcard_binds_declared_name() {
        let tree = RouterTree::new([
            route("GET", "/a/:id", json!("X")),
            route("GET", "/a/b", json!("Y")),
        ]);
        let hit = tree.find("GET", "/a/c").unwrap();
        assert_eq!(hit.data, json!("X"));
        assert_eq!(hit.route, "/a/:id");
        assert_eq!(hit.params, HashMap::from([("id".into(), "c".into())]));
    }

    #[test]
    fn test_unknown_method_is_no_match() {
        let tree = RouterTree::new([route("GET", "/a", json!(1))]);
        assert!(tree.find("POST", "/a").is_none());
    }

    #[test]
    fn test_longer_path_is_no_match() {
        let tree = RouterTree::new([route("GET", "/a/b", json!(1))]);
        assert!(tree.find("GET", "/a/b/c").is_none());
    }

    #[test]
    fn test_intermediate_node_without_payload_is_no_match() {
        let tree = RouterTree::new([route("GET", "/a/b/c", json!(1))]);
        assert!(tree.find("GET", "/a/b").is_none());
    }

    #[test]
    fn test_backtracks_into_wildcard_subtree() {
        // The literal branch exists but dead-ends; the wildcard branch
        // carries the terminal payload.
        let tree = RouterTree::new([
            route("GET", "/a/b/x", json!("literal")),
            route("GET", "/a/:id/y", json!("wild")),
        ]);
        let hit = tree.find("GET", "/a/b/y").unwrap();
        assert_eq!(hit.data, json!("wild"));
        assert_eq!(hit.params, HashMap::from([("id".into(), "b".into())]));
    }

    #[test]
    fn test_root_path_match() {
        let tree = RouterTree::new([route("GET", "/", json!("home"))]);
        let hit = tree.find("GET", "/").unwrap();
        assert_eq!(hit.route, "/");
        assert_eq!(hit.data, json!("home"));
    }

    #[test]
    fn test_nested_params_accumulate() {
        let tree = RouterTree::new([route("GET", "/u/:uid/posts/:pid", json!(1))]);
        let hit = tree.find("GET", "/u/7/posts/42").unwrap();
        assert_eq!(
            hit.params,
            HashMap::from([("uid".into(), "7".into()), ("pid".into(), "42".into())])
        );
        assert_eq!(hit.route, "/u/:uid/posts/:pid");
    }
}
