//! Hash-fragment navigation state.
//!
//! [`HistoryStore`] owns the current location, the per-location state, the
//! session history entries and the persisted list of recently visited
//! locations. It is created once and handed to whatever needs navigation.

use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use ahash::RandomState;
use crossbeam::channel::{unbounded, Receiver, Sender};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cell::format_number;
use crate::config::HistorySettings;
use crate::kv::KeyValueStore;

pub const STORE_HISTORY_ID: &str = "history";

const EXCLUDED_SEARCH_KEYS: [&str; 3] = ["sortBy", "pageNum", "fullscreen"];

const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// Fixed seeds: ids are persisted and must be stable between runs.
const HASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<SearchValue>),
}

impl SearchValue {
    pub fn text(s: impl Into<String>) -> Self {
        SearchValue::Text(s.into())
    }

    pub fn to_text(&self) -> String {
        match self {
            SearchValue::Bool(b) => b.to_string(),
            SearchValue::Number(n) => format_number(*n),
            SearchValue::Text(s) => s.clone(),
            SearchValue::List(items) => items.iter().map(SearchValue::to_text).collect::<Vec<_>>().join(","),
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "true" => return SearchValue::Bool(true),
            "false" => return SearchValue::Bool(false),
            _ => {}
        }
        match raw.trim().parse::<f64>() {
            Ok(n) if !raw.trim().is_empty() && n.is_finite() => SearchValue::Number(n),
            _ => SearchValue::Text(raw.to_string()),
        }
    }
}

/// Parsed query parameters, kept sorted by key.
pub type SearchParts = BTreeMap<String, SearchValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLocation {
    pub pathname: String,
    pub search: String,
    pub search_parts: SearchParts,
    pub id: String,
}

impl Default for HistoryLocation {
    fn default() -> Self {
        parse_hash("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortItem {
    pub attribute: String,
    pub descending: bool,
}

/// Stable content hash of a hash fragment, as hex.
pub fn hash_sum(s: &str) -> String {
    let [k0, k1, k2, k3] = HASH_SEEDS;
    let mut hasher = RandomState::with_seeds(k0, k1, k2, k3).build_hasher();
    s.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn has_all_search(search: &str) -> bool {
    search.starts_with('?')
}

fn decode_component(s: &str) -> String {
    percent_decode_str(&s.replace('+', " ")).decode_utf8_lossy().into_owned()
}

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, QUERY).to_string()
}

/// Parses `?a=1&b=x`. Booleans and numbers are typed; repeated keys collect into a list.
pub fn parse_all_search(search: &str) -> SearchParts {
    let mut parts = SearchParts::new();
    let Some(query) = search.strip_prefix('?') else {
        return parts;
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = SearchValue::parse(&decode_component(raw));
        match parts.remove(&key) {
            None => {
                parts.insert(key, value);
            }
            Some(SearchValue::List(mut items)) => {
                items.push(value);
                parts.insert(key, SearchValue::List(items));
            }
            Some(existing) => {
                parts.insert(key, SearchValue::List(vec![existing, value]));
            }
        }
    }
    parts
}

/// Renders search parts as `?k=v&...`, or an empty string when there are none.
pub fn join_all_search(parts: &SearchParts) -> String {
    if parts.is_empty() {
        return String::new();
    }
    let mut pairs = Vec::new();
    for (key, value) in parts {
        match value {
            SearchValue::List(items) => {
                for item in items {
                    pairs.push(format!("{}={}", encode_component(key), encode_component(&item.to_text())));
                }
            }
            other => pairs.push(format!("{}={}", encode_component(key), encode_component(&other.to_text()))),
        }
    }
    format!("?{}", pairs.join("&"))
}

pub fn parse_hash(hash: &str) -> HistoryLocation {
    let Some(fragment) = hash.strip_prefix('#') else {
        return HistoryLocation {
            pathname: "/".into(),
            search: String::new(),
            search_parts: SearchParts::new(),
            id: hash_sum("#/"),
        };
    };
    let mut parts = fragment.split('?');
    let pathname = parts.next().unwrap_or_default().to_string();
    let (search, search_parts) = match parts.next() {
        Some(query) => {
            let search = format!("?{query}");
            let parsed = parse_all_search(&search);
            (search, parsed)
        }
        None => (String::new(), SearchParts::new()),
    };
    HistoryLocation {
        pathname,
        search,
        search_parts,
        id: hash_sum(hash),
    }
}

pub fn join_hash(location: &HistoryLocation) -> String {
    format!("#{}{}", location.pathname, join_all_search(&location.search_parts))
}

/// Search parts minus the grid-view keys (`sortBy`, `pageNum`, `fullscreen`).
pub fn parse_search(search: &str) -> SearchParts {
    let mut parsed = parse_all_search(search);
    parsed.retain(|k, _| !EXCLUDED_SEARCH_KEYS.contains(&k.as_str()));
    parsed
}

pub fn parse_sort(search: Option<&str>) -> Option<SortItem> {
    let search = search.filter(|s| !s.is_empty())?;
    let parsed = parse_all_search(&ensure_query(search));
    let sort_by = parsed.get("sortBy")?.to_text();
    Some(match sort_by.strip_prefix('-') {
        Some(attribute) => SortItem { attribute: attribute.to_string(), descending: true },
        None => SortItem { attribute: sort_by, descending: false },
    })
}

pub fn parse_page(search: &str) -> u32 {
    parse_all_search(&ensure_query(search))
        .get("pageNum")
        .and_then(|v| {
            let text = v.to_text();
            let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .unwrap_or(1)
}

pub fn parse_fullscreen(search: &str) -> bool {
    match parse_all_search(&ensure_query(search)).get("fullscreen") {
        None | Some(SearchValue::Bool(false)) => false,
        Some(SearchValue::Text(s)) => s != "false",
        Some(_) => true,
    }
}

/// `#/files/abc?x=1` → `#/files`.
pub fn nav_category(hash: &str) -> String {
    let category = hash.split('/').take(2).collect::<Vec<_>>().join("/");
    match category.find('?') {
        Some(idx) => category[..idx].to_string(),
        None => category,
    }
}

fn ensure_query(search: &str) -> String {
    if search.starts_with('?') {
        search.to_string()
    } else {
        format!("?{search}")
    }
}

fn trim_right_slash(s: &str) -> &str {
    s.trim_end_matches('/')
}

fn fix_hash(hash: String) -> String {
    if hash.starts_with('#') {
        hash
    } else {
        format!("#{hash}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationAction {
    Push,
    Replace,
    HashChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationEvent {
    pub location: HistoryLocation,
    pub state: SearchParts,
    pub action: NavigationAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationTarget {
    pub pathname: Option<String>,
    pub search: Option<String>,
}

impl NavigationTarget {
    pub fn path(pathname: impl Into<String>) -> Self {
        Self { pathname: Some(pathname.into()), search: None }
    }

    pub fn search(search: impl Into<String>) -> Self {
        Self { pathname: None, search: Some(search.into()) }
    }
}

pub struct HistoryStore {
    location: HistoryLocation,
    state: SearchParts,
    entries: Vec<String>,
    cursor: usize,
    recent: Vec<HistoryLocation>,
    recent_limit: usize,
    store: Arc<dyn KeyValueStore>,
    listeners: Vec<Sender<NavigationEvent>>,
}

impl HistoryStore {
    /// Starts at `initial_hash` and restores the recent list from `store`.
    pub fn new(initial_hash: &str, store: Arc<dyn KeyValueStore>, settings: &HistorySettings) -> Self {
        let recent = match store.get(STORE_HISTORY_ID) {
            Ok(Some(raw)) => serde_json::from_str::<Vec<HistoryLocation>>(&raw).unwrap_or_else(|err| {
                error!(%err, "discarding unreadable history");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                error!(%err, "failed to load history");
                Vec::new()
            }
        };
        Self {
            location: parse_hash(initial_hash),
            state: SearchParts::new(),
            entries: vec![initial_hash.to_string()],
            cursor: 0,
            recent,
            recent_limit: settings.recent_limit,
            store,
            listeners: Vec::new(),
        }
    }

    pub fn location(&self) -> &HistoryLocation {
        &self.location
    }

    pub fn state(&self) -> &SearchParts {
        &self.state
    }

    /// The hash currently shown in the address bar.
    pub fn current_hash(&self) -> &str {
        &self.entries[self.cursor]
    }

    pub fn recent(&self) -> &[HistoryLocation] {
        &self.recent
    }

    /// Subscribes to navigation events. Dropping the receiver unsubscribes.
    pub fn listen(&mut self) -> Receiver<NavigationEvent> {
        let (tx, rx) = unbounded();
        self.listeners.push(tx);
        rx
    }

    /// Adds a history entry. Missing parts keep their current value.
    /// Nothing happens when the resulting hash is the current one.
    pub fn push(&mut self, to: NavigationTarget) {
        let pathname = to.pathname.unwrap_or_else(|| self.location.pathname.clone());
        let search = to.search.unwrap_or_else(|| self.location.search.clone());
        let new_hash = fix_hash(format!("{}{}", trim_right_slash(&pathname), search));
        if self.current_hash() != new_hash {
            self.entries.truncate(self.cursor + 1);
            self.entries.push(new_hash.clone());
            self.cursor += 1;
            self.location = parse_hash(&new_hash);
            self.state = SearchParts::new();
            self.broadcast(NavigationAction::Push);
        }
    }

    /// Rewrites the current entry. A missing search clears it.
    pub fn replace(&mut self, to: NavigationTarget) {
        let pathname = to.pathname.unwrap_or_else(|| self.location.pathname.clone());
        let search = to.search.unwrap_or_default();
        let new_hash = fix_hash(format!("{}{}", trim_right_slash(&pathname), search));
        if self.current_hash() != new_hash {
            self.entries[self.cursor] = new_hash.clone();
            self.location = parse_hash(&new_hash);
            self.broadcast(NavigationAction::Replace);
        }
    }

    /// The hash was changed from outside, e.g. typed into the address bar.
    pub fn hash_changed(&mut self, hash: &str) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(hash.to_string());
        self.cursor += 1;
        self.on_hash_change();
    }

    pub fn back(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.on_hash_change();
        true
    }

    pub fn forward(&mut self) -> bool {
        if self.cursor + 1 >= self.entries.len() {
            return false;
        }
        self.cursor += 1;
        self.on_hash_change();
        true
    }

    fn on_hash_change(&mut self) {
        let prev_id = std::mem::take(&mut self.location.id);
        self.location = parse_hash(&self.entries[self.cursor]);
        if prev_id != self.location.id {
            self.state = SearchParts::new();
        }
        self.broadcast(NavigationAction::HashChange);
    }

    fn update_recent(&mut self) {
        let id = self.location.id.clone();
        self.recent.retain(|l| l.id != id);
        self.recent.insert(0, self.location.clone());
        self.recent.truncate(self.recent_limit);
        match serde_json::to_string(&self.recent) {
            Ok(raw) => {
                if let Err(err) = self.store.set(STORE_HISTORY_ID, &raw) {
                    error!(%err, "failed to persist history");
                }
            }
            Err(err) => error!(%err, "failed to encode history"),
        }
    }

    fn broadcast(&mut self, action: NavigationAction) {
        self.update_recent();
        debug!(hash = %self.current_hash(), ?action, "navigation");
        let event = NavigationEvent {
            location: self.location.clone(),
            state: self.state.clone(),
            action,
        };
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn reset_history(&mut self) {
        self.recent.clear();
        if let Err(err) = self.store.delete(STORE_HISTORY_ID) {
            error!(%err, "failed to reset history");
        }
    }

    pub fn push_search(&mut self, parts: &SearchParts) {
        self.push(NavigationTarget::search(join_all_search(parts)));
    }

    pub fn update_search(&mut self, parts: &SearchParts) {
        self.replace(NavigationTarget::search(join_all_search(parts)));
    }

    pub fn push_url(&mut self, pathname: &str) {
        self.push(NavigationTarget::path(pathname));
    }

    pub fn replace_url(&mut self, pathname: &str) {
        self.replace(NavigationTarget::path(pathname));
    }

    pub fn push_search_item(&mut self, key: &str, value: SearchValue) {
        self.push_params(&[(key, value)], false);
    }

    /// Merges `params` into the current search and pushes. Empty strings and
    /// `false` remove their key unless `keep_empty` is set.
    pub fn push_params(&mut self, params: &[(&str, SearchValue)], keep_empty: bool) {
        let mut parts = self.location.search_parts.clone();
        for (key, value) in params {
            let empty = matches!(value, SearchValue::Bool(false))
                || matches!(value, SearchValue::Text(s) if s.is_empty());
            if !keep_empty && empty {
                parts.remove(*key);
            } else {
                parts.insert(key.to_string(), value.clone());
            }
        }
        self.push_search(&parts);
    }

    pub fn update_param(&mut self, key: &str, value: Option<SearchValue>) {
        let mut parts = self.location.search_parts.clone();
        match value {
            Some(value) => {
                parts.insert(key.to_string(), value);
            }
            None => {
                parts.remove(key);
            }
        }
        self.update_search(&parts);
    }

    pub fn update_sort(&mut self, sorted: bool, descending: bool, sort_by: &str) {
        let value = sorted.then(|| {
            SearchValue::text(format!("{}{sort_by}", if descending { "-" } else { "" }))
        });
        self.update_param("sortBy", value);
    }

    pub fn update_page(&mut self, page: u32) {
        self.update_param("pageNum", Some(SearchValue::Number(page as f64)));
    }

    pub fn update_fullscreen(&mut self, fullscreen: bool) {
        self.update_param("fullscreen", fullscreen.then_some(SearchValue::Bool(true)));
    }

    /// Per-location state; cleared when navigation lands on a different location.
    pub fn update_state(&mut self, key: &str, value: Option<SearchValue>) {
        match value {
            Some(value) => {
                self.state.insert(key.to_string(), value);
            }
            None => {
                self.state.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_without_marker_is_the_root() {
        let loc = parse_hash("files");
        assert_eq!(loc.pathname, "/");
        assert_eq!(loc.id, hash_sum("#/"));
        assert_eq!(loc, parse_hash(""));
    }

    #[test]
    fn hash_splits_path_and_search() {
        let loc = parse_hash("#/workunits?Wuid=W1&pageNum=2&protected=true");
        assert_eq!(loc.pathname, "/workunits");
        assert_eq!(loc.search, "?Wuid=W1&pageNum=2&protected=true");
        assert_eq!(loc.search_parts["Wuid"], SearchValue::text("W1"));
        assert_eq!(loc.search_parts["pageNum"], SearchValue::Number(2.0));
        assert_eq!(loc.search_parts["protected"], SearchValue::Bool(true));
        assert_eq!(loc.id, hash_sum("#/workunits?Wuid=W1&pageNum=2&protected=true"));
    }

    #[test]
    fn hash_sum_is_stable_and_distinguishes_inputs() {
        assert_eq!(hash_sum("#/a"), hash_sum("#/a"));
        assert_ne!(hash_sum("#/a"), hash_sum("#/b"));
    }

    #[test]
    fn search_round_trips_through_join() {
        let parts = parse_all_search("?b=x%20y&a=1&a=2");
        assert_eq!(
            parts["a"],
            SearchValue::List(vec![SearchValue::Number(1.0), SearchValue::Number(2.0)])
        );
        assert_eq!(parts["b"], SearchValue::text("x y"));
        assert_eq!(join_all_search(&parts), "?a=1&a=2&b=x%20y");
        assert_eq!(join_all_search(&SearchParts::new()), "");
    }

    #[test]
    fn grid_view_keys_are_split_out() {
        let search = "?Owner=me&sortBy=-Wuid&pageNum=3&fullscreen=true";
        let parts = parse_search(search);
        assert_eq!(parts.keys().collect::<Vec<_>>(), vec!["Owner"]);
        assert_eq!(
            parse_sort(Some(search)),
            Some(SortItem { attribute: "Wuid".into(), descending: true })
        );
        assert_eq!(parse_page(search), 3);
        assert!(parse_fullscreen(search));
        assert!(!parse_fullscreen("?fullscreen=false"));
        assert_eq!(parse_page("?x=1"), 1);
        assert_eq!(parse_sort(None), None);
    }

    #[test]
    fn nav_category_keeps_the_first_segment() {
        assert_eq!(nav_category("#/files/abc?x=1"), "#/files");
        assert_eq!(nav_category("#/files?x=1"), "#/files");
    }
}
