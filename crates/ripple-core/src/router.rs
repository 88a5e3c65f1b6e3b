//! Topic pattern router.
//!
//! Routes are registered as `/`-delimited patterns whose segments may be
//! literal, a named parameter (`:name`), or a trailing catch-all (`*`).
//! Patterns are stored in a compressed trie; lookup walks the trie
//! preferring static over parameter over catch-all children at each
//! level, backtracking when a deeper match fails. The trie is allocated
//! as an index arena so backtracking can follow parent links.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::{DynHandler, Method};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Static,
    Param,
    Any,
}

const PARAM_LABEL: u8 = b':';
const ANY_LABEL: u8 = b'*';

/// A registered route: the pristine pattern, the declared parameter
/// names in order, and the handler to dispatch.
pub(crate) struct RouteEntry<C> {
    pattern: Arc<str>,
    param_names: Arc<[String]>,
    handler: DynHandler<C>,
}

impl<C> Clone for RouteEntry<C> {
    fn clone(&self) -> Self {
        Self {
            pattern: Arc::clone(&self.pattern),
            param_names: Arc::clone(&self.param_names),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Per-method route table for a trie node, with fast slots for the
/// built-in methods and a side table for custom ones.
struct RouteMethods<C> {
    pub_entry: Option<RouteEntry<C>>,
    sub_entry: Option<RouteEntry<C>>,
    unsub_entry: Option<RouteEntry<C>>,
    others: HashMap<&'static str, RouteEntry<C>>,
}

impl<C> Default for RouteMethods<C> {
    fn default() -> Self {
        Self {
            pub_entry: None,
            sub_entry: None,
            unsub_entry: None,
            others: HashMap::new(),
        }
    }
}

impl<C> RouteMethods<C> {
    fn set(&mut self, method: &Method, entry: RouteEntry<C>) {
        match method {
            Method::Pub => self.pub_entry = Some(entry),
            Method::Sub => self.sub_entry = Some(entry),
            Method::Unsub => self.unsub_entry = Some(entry),
            Method::Custom(name) => {
                self.others.insert(*name, entry);
            }
        }
    }

    fn get(&self, method: &Method) -> Option<&RouteEntry<C>> {
        match method {
            Method::Pub => self.pub_entry.as_ref(),
            Method::Sub => self.sub_entry.as_ref(),
            Method::Unsub => self.unsub_entry.as_ref(),
            Method::Custom(name) => self.others.get(name),
        }
    }

    fn is_empty(&self) -> bool {
        self.pub_entry.is_none()
            && self.sub_entry.is_none()
            && self.unsub_entry.is_none()
            && self.others.is_empty()
    }
}

struct Node<C> {
    kind: NodeKind,
    label: u8,
    prefix: String,
    parent: Option<usize>,
    static_children: Vec<usize>,
    param_child: Option<usize>,
    any_child: Option<usize>,
    methods: RouteMethods<C>,
    /// The pattern which registered this node, reported on
    /// method-mismatch lookups.
    pattern: Arc<str>,
    params_count: usize,
}

impl<C> Node<C> {
    fn empty() -> Self {
        Self {
            kind: NodeKind::Static,
            label: 0,
            prefix: String::new(),
            parent: None,
            static_children: Vec::new(),
            param_child: None,
            any_child: None,
            methods: RouteMethods::default(),
            pattern: Arc::from(""),
            params_count: 0,
        }
    }

    fn is_leaf(&self) -> bool {
        self.static_children.is_empty() && self.param_child.is_none() && self.any_child.is_none()
    }
}

/// The result of matching a topic path in the router, written into a
/// caller-supplied [`RouteMatch`] by [`TopicRouter::find`].
pub struct RouteMatch {
    pattern: Option<Arc<str>>,
    param_names: Option<Arc<[String]>>,
    param_values: Vec<String>,
}

impl RouteMatch {
    /// Create a match record with parameter-value slots sized to the
    /// largest registered parameter count.
    #[must_use]
    pub fn with_capacity(max_params: usize) -> Self {
        Self {
            pattern: None,
            param_names: None,
            param_values: vec![String::new(); max_params],
        }
    }

    /// The registered pattern that matched, or `""` when none did.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or("")
    }

    /// Look up a path parameter value by its declared name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        let names = self.param_names.as_deref()?;
        names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.param_values.get(i))
            .map(String::as_str)
    }

    /// The declared parameter names of the matched route, in order.
    #[must_use]
    pub fn param_names(&self) -> &[String] {
        self.param_names.as_deref().unwrap_or(&[])
    }

    /// The extracted parameter values, one per declared name.
    #[must_use]
    pub fn param_values(&self) -> &[String] {
        let len = self.param_names().len().min(self.param_values.len());
        &self.param_values[..len]
    }

    fn reset(&mut self) {
        self.pattern = None;
        self.param_names = None;
        for value in &mut self.param_values {
            value.clear();
        }
    }
}

/// The outcome of a router lookup.
pub enum Lookup<C> {
    /// A handler was registered for the method and path.
    Matched(DynHandler<C>),
    /// The path matched a route, but not for the requested method.
    MethodNotAllowed,
    /// Nothing matched the path.
    NotFound,
}

/// Registry of routes for broker event dispatch and topic parameter
/// extraction.
pub struct TopicRouter<C> {
    nodes: Vec<Node<C>>,
    max_params: usize,
}

impl<C> Default for TopicRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TopicRouter<C> {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::empty()],
            max_params: 0,
        }
    }

    /// The largest parameter count among registered routes; sizes the
    /// value slots of [`RouteMatch`].
    #[must_use]
    pub fn max_params(&self) -> usize {
        self.max_params
    }

    /// Register a route. Re-registering the same method and pattern
    /// replaces the previous handler. An empty pattern is normalized to
    /// `/` and a missing leading `/` is prepended; `\:` escapes a
    /// literal colon.
    pub fn add(&mut self, method: Method, pattern: &str, handler: DynHandler<C>) {
        let mut path = String::from(pattern);
        if path.is_empty() {
            path.push('/');
        }
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        let pristine: Arc<str> = Arc::from(path.as_str());
        let mut param_names: Vec<String> = Vec::new();

        let mut i = 0;
        while i < path.len() {
            let byte = path.as_bytes()[i];
            if byte == PARAM_LABEL {
                if i > 0 && path.as_bytes()[i - 1] == b'\\' {
                    // Escaped colon: drop the escape and keep the literal.
                    path.remove(i - 1);
                    continue;
                }
                let name_start = i + 1;
                self.insert(&method, &path[..i], NodeKind::Static, None);

                let mut name_end = name_start;
                while name_end < path.len() && path.as_bytes()[name_end] != b'/' {
                    name_end += 1;
                }
                param_names.push(path[name_start..name_end].to_string());
                path.replace_range(name_start..name_end, "");

                i = name_start;
                if i == path.len() {
                    self.insert(
                        &method,
                        &path,
                        NodeKind::Param,
                        Some(RouteEntry {
                            pattern: Arc::clone(&pristine),
                            param_names: param_names.clone().into(),
                            handler: Arc::clone(&handler),
                        }),
                    );
                } else {
                    self.insert(&method, &path[..i], NodeKind::Param, None);
                }
                i += 1;
            } else if byte == ANY_LABEL {
                self.insert(&method, &path[..i], NodeKind::Static, None);
                param_names.push("*".to_string());
                self.insert(
                    &method,
                    &path[..=i],
                    NodeKind::Any,
                    Some(RouteEntry {
                        pattern: Arc::clone(&pristine),
                        param_names: param_names.clone().into(),
                        handler: Arc::clone(&handler),
                    }),
                );
                i += 1;
            } else {
                i += 1;
            }
        }

        self.insert(
            &method,
            &path,
            NodeKind::Static,
            Some(RouteEntry {
                pattern: pristine,
                param_names: param_names.into(),
                handler,
            }),
        );
    }

    fn insert(&mut self, method: &Method, path: &str, kind: NodeKind, mut entry: Option<RouteEntry<C>>) {
        if let Some(e) = &entry {
            if e.param_names.len() > self.max_params {
                self.max_params = e.param_names.len();
            }
        }

        let mut current = 0usize;
        let mut search = path;

        loop {
            let prefix_len = self.nodes[current].prefix.len();
            let lcp = lcp_len(search.as_bytes(), self.nodes[current].prefix.as_bytes());

            if lcp == 0 {
                // Virgin root node.
                let node = &mut self.nodes[current];
                node.label = search.as_bytes().first().copied().unwrap_or(0);
                node.prefix = search.to_string();
                if let Some(e) = entry.take() {
                    node.kind = kind;
                    node.params_count = e.param_names.len();
                    node.pattern = Arc::clone(&e.pattern);
                    node.methods.set(method, e);
                }
            } else if lcp < prefix_len {
                // Split the node: the common prefix becomes the parent,
                // the existing remainder moves into a new child.
                let child_index = self.nodes.len();
                let node = &mut self.nodes[current];
                let child = Node {
                    kind: node.kind,
                    label: node.prefix.as_bytes()[lcp],
                    prefix: node.prefix[lcp..].to_string(),
                    parent: Some(current),
                    static_children: std::mem::take(&mut node.static_children),
                    param_child: node.param_child.take(),
                    any_child: node.any_child.take(),
                    methods: std::mem::take(&mut node.methods),
                    pattern: std::mem::replace(&mut node.pattern, Arc::from("")),
                    params_count: node.params_count,
                };

                node.kind = NodeKind::Static;
                node.label = node.prefix.as_bytes()[0];
                node.prefix.truncate(lcp);
                node.params_count = 0;
                node.static_children = vec![child_index];

                let moved_static = child.static_children.clone();
                let moved_param = child.param_child;
                let moved_any = child.any_child;
                self.nodes.push(child);
                for moved in moved_static {
                    self.nodes[moved].parent = Some(child_index);
                }
                if let Some(moved) = moved_param {
                    self.nodes[moved].parent = Some(child_index);
                }
                if let Some(moved) = moved_any {
                    self.nodes[moved].parent = Some(child_index);
                }

                if lcp == search.len() {
                    // The inserted path ends at the split point.
                    if let Some(e) = entry.take() {
                        let node = &mut self.nodes[current];
                        node.kind = kind;
                        node.params_count = e.param_names.len();
                        node.pattern = Arc::clone(&e.pattern);
                        node.methods.set(method, e);
                    }
                } else {
                    let grandchild_index = self.nodes.len();
                    let mut grandchild = Node {
                        kind,
                        label: search.as_bytes()[lcp],
                        prefix: search[lcp..].to_string(),
                        parent: Some(current),
                        ..Node::empty()
                    };
                    if let Some(e) = entry.take() {
                        grandchild.params_count = e.param_names.len();
                        grandchild.pattern = Arc::clone(&e.pattern);
                        grandchild.methods.set(method, e);
                    }
                    self.nodes.push(grandchild);
                    self.nodes[current].static_children.push(grandchild_index);
                }
            } else if lcp < search.len() {
                search = &search[lcp..];
                if let Some(child) = self.find_child_with_label(current, search.as_bytes()[0]) {
                    current = child;
                    continue;
                }
                let child_index = self.nodes.len();
                let mut child = Node {
                    kind,
                    label: search.as_bytes()[0],
                    prefix: search.to_string(),
                    parent: Some(current),
                    ..Node::empty()
                };
                if let Some(e) = entry.take() {
                    child.params_count = e.param_names.len();
                    child.pattern = Arc::clone(&e.pattern);
                    child.methods.set(method, e);
                }
                self.nodes.push(child);
                match kind {
                    NodeKind::Static => self.nodes[current].static_children.push(child_index),
                    NodeKind::Param => self.nodes[current].param_child = Some(child_index),
                    NodeKind::Any => self.nodes[current].any_child = Some(child_index),
                }
            } else {
                // Node already exists for this path.
                if let Some(e) = entry.take() {
                    let node = &mut self.nodes[current];
                    node.params_count = e.param_names.len();
                    node.pattern = Arc::clone(&e.pattern);
                    node.methods.set(method, e);
                }
            }
            return;
        }
    }

    fn find_child_with_label(&self, node: usize, label: u8) -> Option<usize> {
        let n = &self.nodes[node];
        for &child in &n.static_children {
            if self.nodes[child].label == label {
                return Some(child);
            }
        }
        if label == PARAM_LABEL {
            return n.param_child;
        }
        if label == ANY_LABEL {
            return n.any_child;
        }
        None
    }

    /// Match a topic path against the registered routes, filling the
    /// matched pattern and parameters into `rmatch`.
    pub fn find(&self, method: &Method, path: &str, rmatch: &mut RouteMatch) -> Lookup<C> {
        rmatch.reset();
        let path = if path.is_empty() { "/" } else { path };

        let mut current = 0usize;
        let mut search_index = 0usize;
        let mut param_index = 0usize;
        let mut best_match: Option<usize> = None;
        let mut matched: Option<&RouteEntry<C>> = None;

        #[derive(Clone, Copy, PartialEq)]
        enum Step {
            Static,
            Param,
            Any,
        }
        let mut step = Step::Static;

        'walk: loop {
            match step {
                Step::Static => {
                    let node = &self.nodes[current];
                    let search = &path[search_index..];
                    let (prefix_len, lcp) = if node.kind == NodeKind::Static {
                        (
                            node.prefix.len(),
                            lcp_len(search.as_bytes(), node.prefix.as_bytes()),
                        )
                    } else {
                        (0, 0)
                    };

                    if lcp != prefix_len {
                        // Dead end; try the next sibling kind on the
                        // decision path. Backtracking from the static
                        // block leaves the search position untouched.
                        let (next, valid) = self.backtrack(
                            true,
                            &mut current,
                            &mut search_index,
                            &mut param_index,
                            &mut rmatch.param_values,
                        );
                        if !valid {
                            return Lookup::NotFound;
                        }
                        if next == NodeKind::Param {
                            step = Step::Param;
                            continue 'walk;
                        }
                        break 'walk;
                    }

                    search_index += lcp;
                    let search = &path[search_index..];

                    if search.is_empty() && !node.methods.is_empty() {
                        if best_match.is_none() {
                            best_match = Some(current);
                        }
                        if let Some(entry) = node.methods.get(method) {
                            matched = Some(entry);
                            break 'walk;
                        }
                    }

                    if !search.is_empty() {
                        if let Some(child) =
                            self.static_child_with_label(current, search.as_bytes()[0])
                        {
                            current = child;
                            continue 'walk;
                        }
                    }

                    step = Step::Param;
                }
                Step::Param => {
                    let search = &path[search_index..];
                    if !search.is_empty() {
                        if let Some(child) = self.nodes[current].param_child {
                            current = child;
                            let bytes = search.as_bytes();
                            let consumed = if self.nodes[child].is_leaf() {
                                // A leaf parameter swallows the rest of
                                // the path, like a catch-all.
                                search.len()
                            } else {
                                bytes.iter().take_while(|&&b| b != b'/').count()
                            };
                            let slot = &mut rmatch.param_values[param_index];
                            slot.clear();
                            slot.push_str(&search[..consumed]);
                            param_index += 1;
                            search_index += consumed;
                            step = Step::Static;
                            continue 'walk;
                        }
                    }
                    step = Step::Any;
                }
                Step::Any => {
                    if let Some(child) = self.nodes[current].any_child {
                        current = child;
                        let search = &path[search_index..];
                        let slot_index = self.nodes[child].params_count.saturating_sub(1);
                        let slot = &mut rmatch.param_values[slot_index];
                        slot.clear();
                        slot.push_str(search);
                        param_index += 1;
                        search_index = path.len();

                        let node = &self.nodes[current];
                        if let Some(entry) = node.methods.get(method) {
                            matched = Some(entry);
                            break 'walk;
                        }
                        if best_match.is_none() && !node.methods.is_empty() {
                            best_match = Some(current);
                        }
                    }

                    let (next, valid) = self.backtrack(
                        false,
                        &mut current,
                        &mut search_index,
                        &mut param_index,
                        &mut rmatch.param_values,
                    );
                    if !valid {
                        break 'walk;
                    }
                    match next {
                        NodeKind::Param => step = Step::Param,
                        NodeKind::Any => step = Step::Any,
                        NodeKind::Static => break 'walk,
                    }
                }
            }
        }

        if let Some(entry) = matched {
            rmatch.pattern = Some(Arc::clone(&entry.pattern));
            rmatch.param_names = Some(Arc::clone(&entry.param_names));
            return Lookup::Matched(Arc::clone(&entry.handler));
        }

        // No handler for the method, but possibly a matching path.
        if let Some(best) = best_match {
            rmatch.pattern = Some(Arc::clone(&self.nodes[best].pattern));
            return Lookup::MethodNotAllowed;
        }
        Lookup::NotFound
    }

    fn static_child_with_label(&self, node: usize, label: u8) -> Option<usize> {
        self.nodes[node]
            .static_children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].label == label)
    }

    /// Move to the parent node and report which child kind to try next,
    /// restoring the search position consumed by the node being left.
    /// `from_static` skips the restore, since the static block does not
    /// advance the search before failing.
    fn backtrack(
        &self,
        from_static: bool,
        current: &mut usize,
        search_index: &mut usize,
        param_index: &mut usize,
        param_values: &mut [String],
    ) -> (NodeKind, bool) {
        let previous = *current;
        let previous_kind = self.nodes[previous].kind;
        let parent = self.nodes[previous].parent;
        let valid = parent.is_some();
        *current = parent.unwrap_or(0);

        let next = match previous_kind {
            NodeKind::Any => NodeKind::Static,
            NodeKind::Static => NodeKind::Param,
            NodeKind::Param => NodeKind::Any,
        };

        if from_static {
            return (next, valid);
        }

        if previous_kind == NodeKind::Static {
            *search_index = search_index.saturating_sub(self.nodes[previous].prefix.len());
        } else {
            *param_index = param_index.saturating_sub(1);
            *search_index = search_index.saturating_sub(param_values[*param_index].len());
            param_values[*param_index].clear();
        }
        (next, valid)
    }
}

fn lcp_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler, EventContext, EventError, HandlerResult};
    use std::sync::Arc;

    struct Probe;

    impl EventContext for Probe {
        fn method(&self) -> Method {
            Method::Sub
        }
        fn topic(&self) -> &str {
            "/"
        }
    }

    fn tagged(tag: &'static str) -> DynHandler<Probe> {
        handler(move |_c: Arc<Probe>| {
            Box::pin(async move { Err::<(), _>(EventError::handler(tag)) })
        })
    }

    async fn tag_of(h: &DynHandler<Probe>) -> String {
        match h(Arc::new(Probe)).await {
            Err(EventError::Handler(e)) => e.to_string(),
            other => panic!("unexpected handler result: {other:?}"),
        }
    }

    fn must_match(
        router: &TopicRouter<Probe>,
        method: Method,
        path: &str,
        rmatch: &mut RouteMatch,
    ) -> DynHandler<Probe> {
        match router.find(&method, path, rmatch) {
            Lookup::Matched(h) => h,
            Lookup::MethodNotAllowed => panic!("method not allowed for {path}"),
            Lookup::NotFound => panic!("no match for {path}"),
        }
    }

    #[tokio::test]
    async fn static_routes_match_exactly() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/rooms", tagged("rooms"));
        router.add(Method::Sub, "/rooms/list", tagged("list"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/rooms", &mut m);
        assert_eq!(tag_of(&h).await, "rooms");
        assert_eq!(m.pattern(), "/rooms");

        let h = must_match(&router, Method::Sub, "/rooms/list", &mut m);
        assert_eq!(tag_of(&h).await, "list");

        assert!(matches!(
            router.find(&Method::Sub, "/rooms/42", &mut m),
            Lookup::NotFound
        ));
    }

    #[tokio::test]
    async fn param_routes_extract_values() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/rooms/:id", tagged("room"));
        router.add(Method::Sub, "/rooms/:id/members/:member", tagged("member"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/rooms/42", &mut m);
        assert_eq!(tag_of(&h).await, "room");
        assert_eq!(m.pattern(), "/rooms/:id");
        assert_eq!(m.param("id"), Some("42"));
        assert_eq!(m.param_names(), ["id"]);

        let h = must_match(&router, Method::Sub, "/rooms/7/members/alice", &mut m);
        assert_eq!(tag_of(&h).await, "member");
        assert_eq!(m.param("id"), Some("7"));
        assert_eq!(m.param("member"), Some("alice"));
    }

    #[tokio::test]
    async fn static_beats_param_beats_catch_all() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/f/*", tagged("any"));
        router.add(Method::Sub, "/f/:name/issues", tagged("param"));
        router.add(Method::Sub, "/f/latest/issues", tagged("static"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/f/latest/issues", &mut m);
        assert_eq!(tag_of(&h).await, "static");

        let h = must_match(&router, Method::Sub, "/f/weekly/issues", &mut m);
        assert_eq!(tag_of(&h).await, "param");
        assert_eq!(m.param("name"), Some("weekly"));

        // Neither the static nor the parameter branch matches, so the
        // catch-all takes the whole remainder.
        let h = must_match(&router, Method::Sub, "/f/weekly/authors", &mut m);
        assert_eq!(tag_of(&h).await, "any");
        assert_eq!(m.param("*"), Some("weekly/authors"));
    }

    #[tokio::test]
    async fn backtracks_to_shallower_alternative() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/users/new", tagged("new"));
        router.add(Method::Sub, "/users/:id/edit", tagged("edit"));
        router.add(Method::Sub, "/*", tagged("root-any"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        // "/users/ne/edit" walks into the "/users/ne[w]" static branch,
        // fails, and must back out to the parameter child.
        let h = must_match(&router, Method::Sub, "/users/ne/edit", &mut m);
        assert_eq!(tag_of(&h).await, "edit");
        assert_eq!(m.param("id"), Some("ne"));

        // "/users/7/delete" exhausts the static and param branches and
        // falls back to the root catch-all.
        let h = must_match(&router, Method::Sub, "/users/7/delete", &mut m);
        assert_eq!(tag_of(&h).await, "root-any");
        assert_eq!(m.param("*"), Some("users/7/delete"));
    }

    #[tokio::test]
    async fn method_mismatch_reports_matched_pattern() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/rooms/:id", tagged("sub"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        assert!(matches!(
            router.find(&Method::Pub, "/rooms/42", &mut m),
            Lookup::MethodNotAllowed
        ));
        assert_eq!(m.pattern(), "/rooms/:id");

        // The same pattern still matches for the registered method.
        assert!(matches!(
            router.find(&Method::Sub, "/rooms/42", &mut m),
            Lookup::Matched(_)
        ));
    }

    #[tokio::test]
    async fn re_adding_a_route_replaces_the_handler() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/t", tagged("first"));
        router.add(Method::Sub, "/t", tagged("second"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/t", &mut m);
        assert_eq!(tag_of(&h).await, "second");
    }

    #[tokio::test]
    async fn methods_on_one_pattern_are_independent() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/t", tagged("sub"));
        router.add(Method::Pub, "/t", tagged("pub"));
        router.add(Method::Custom("MSG"), "/t", tagged("msg"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/t", &mut m);
        assert_eq!(tag_of(&h).await, "sub");
        let h = must_match(&router, Method::Pub, "/t", &mut m);
        assert_eq!(tag_of(&h).await, "pub");
        let h = must_match(&router, Method::Custom("MSG"), "/t", &mut m);
        assert_eq!(tag_of(&h).await, "msg");
    }

    #[tokio::test]
    async fn normalizes_patterns_and_paths() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "", tagged("root"));
        router.add(Method::Sub, "rooms", tagged("rooms"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/", &mut m);
        assert_eq!(tag_of(&h).await, "root");
        let h = must_match(&router, Method::Sub, "", &mut m);
        assert_eq!(tag_of(&h).await, "root");
        let h = must_match(&router, Method::Sub, "/rooms", &mut m);
        assert_eq!(tag_of(&h).await, "rooms");
    }

    #[tokio::test]
    async fn escaped_colon_is_literal() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/odd\\:name", tagged("literal"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/odd:name", &mut m);
        assert_eq!(tag_of(&h).await, "literal");
        assert!(m.param_names().is_empty());
    }

    #[tokio::test]
    async fn trailing_param_swallows_remainder_at_leaf() {
        let mut router = TopicRouter::new();
        router.add(Method::Sub, "/files/:path", tagged("file"));

        let mut m = RouteMatch::with_capacity(router.max_params());
        let h = must_match(&router, Method::Sub, "/files/a/b/c", &mut m);
        assert_eq!(tag_of(&h).await, "file");
        assert_eq!(m.param("path"), Some("a/b/c"));
    }
}
