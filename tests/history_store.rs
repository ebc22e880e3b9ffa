use std::collections::HashSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use result_flattener::config::HistorySettings;
use result_flattener::history::{parse_sort, SearchValue, SortItem, STORE_HISTORY_ID};
use result_flattener::{
    HistoryStore, JsonFileStore, KeyValueStore, MemoryStore, NavigationAction, NavigationTarget,
};

fn store_at(hash: &str) -> HistoryStore {
    HistoryStore::new(hash, Arc::new(MemoryStore::new()), &HistorySettings::default())
}

#[test]
fn push_to_the_current_hash_does_nothing() {
    let mut history = store_at("#/files");
    let rx = history.listen();

    history.push(NavigationTarget::path("/files"));
    assert!(rx.try_recv().is_err());

    history.push(NavigationTarget::path("/workunits/"));
    let event = rx.try_recv().unwrap();
    assert_eq!(event.action, NavigationAction::Push);
    assert_eq!(event.location.pathname, "/workunits");
    assert_eq!(history.current_hash(), "#/workunits");
}

#[test]
fn replace_rewrites_the_current_entry() {
    let mut history = store_at("#/files?Name=a");
    let rx = history.listen();

    history.replace(NavigationTarget::path("/files"));
    assert_eq!(rx.try_recv().unwrap().action, NavigationAction::Replace);
    assert_eq!(history.current_hash(), "#/files");
    assert!(!history.back());
}

#[test]
fn back_and_forward_walk_the_entries() {
    let mut history = store_at("#/a");
    history.push_url("/b");
    let rx = history.listen();

    assert!(history.back());
    assert_eq!(history.location().pathname, "/a");
    assert_eq!(rx.try_recv().unwrap().action, NavigationAction::HashChange);
    assert!(history.forward());
    assert_eq!(history.location().pathname, "/b");
    assert!(!history.forward());
}

#[test]
fn state_is_dropped_when_the_location_changes() {
    let mut history = store_at("#/a");
    history.update_state("selection", Some(SearchValue::text("row-3")));

    history.hash_changed("#/b");
    assert!(history.state().is_empty());

    history.update_state("selection", Some(SearchValue::text("row-4")));
    history.hash_changed("#/b");
    assert_eq!(history.state().get("selection"), Some(&SearchValue::text("row-4")));
}

#[test]
fn recent_list_is_capped_and_deduplicated() {
    let mut history = store_at("#/");
    for i in 0..12 {
        history.push_url(&format!("/p{i}"));
    }
    assert_eq!(history.recent().len(), 10);
    assert_eq!(history.recent()[0].pathname, "/p11");

    history.push_url("/p5");
    let recent = history.recent();
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0].pathname, "/p5");
    let ids: HashSet<&str> = recent.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids.len(), recent.len());
}

#[test]
fn recent_list_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.json");

    {
        let mut history = HistoryStore::new("#/", Arc::new(JsonFileStore::new(&path)), &HistorySettings::default());
        history.push_url("/files");
        history.push_url("/workunits");
    }

    let mut history = HistoryStore::new("#/", Arc::new(JsonFileStore::new(&path)), &HistorySettings::default());
    let paths: Vec<&str> = history.recent().iter().map(|l| l.pathname.as_str()).collect();
    assert_eq!(paths, vec!["/workunits", "/files"]);

    history.reset_history();
    assert!(history.recent().is_empty());
    assert_eq!(JsonFileStore::new(&path).get(STORE_HISTORY_ID).unwrap(), None);
}

#[test]
fn grid_view_params_update_the_search_in_place() {
    let mut history = store_at("#/workunits?Owner=me");

    history.update_page(3);
    assert_eq!(history.current_hash(), "#/workunits?Owner=me&pageNum=3");

    history.update_sort(true, true, "Wuid");
    history.update_fullscreen(true);
    assert_eq!(
        history.current_hash(),
        "#/workunits?Owner=me&fullscreen=true&pageNum=3&sortBy=-Wuid"
    );
    assert_eq!(
        parse_sort(Some(history.location().search.as_str())),
        Some(SortItem {
            attribute: "Wuid".into(),
            descending: true
        })
    );

    history.update_sort(false, false, "Wuid");
    history.update_fullscreen(false);
    assert_eq!(history.current_hash(), "#/workunits?Owner=me&pageNum=3");
    assert!(!history.back());
}

#[test]
fn push_params_drops_empty_values_unless_asked() {
    let mut history = store_at("#/workunits?Owner=me");

    history.push_params(&[("Owner", SearchValue::text("")), ("State", SearchValue::text("failed"))], false);
    assert_eq!(history.current_hash(), "#/workunits?State=failed");

    history.push_params(&[("Owner", SearchValue::text(""))], true);
    assert_eq!(history.current_hash(), "#/workunits?Owner=&State=failed");
    assert!(history.back());
    assert_eq!(history.current_hash(), "#/workunits?State=failed");
}
