// Resource construction, diff application, and observer notification tests

mod common;

use admin_tally::event::{Alerts, ChangeEvent, MemberRef};
use admin_tally::member::MemberDirectory;
use admin_tally::resource::{EventOutcome, Resource, ResourceError, ResourceInit};
use admin_tally::tally::{AggregateState, MemberState, ResourceKey, ResourceType, Tally};
use common::{Call, Recorder, strings};
use serde_json::json;

fn servers_key() -> ResourceKey {
    ResourceKey::collection(ResourceType::Servers)
}

fn servers(dir: &mut MemberDirectory, tally: (u32, u32, u32), list: &[&str]) -> Resource {
    Resource::new(
        ResourceInit::new(ResourceType::Servers)
            .with_tally(tally.0, tally.1, tally.2)
            .with_list(list.iter().copied()),
        dir,
    )
    .unwrap()
}

#[test]
fn test_diff_overwrites_tally_and_removes_members() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (4, 0, 0), &["a", "b", "c", "d"]);
    assert_eq!(res.state(), AggregateState::Started);

    let event = ChangeEvent::from_value(json!({
        "type": "servers",
        "up": 1,
        "down": 2,
        "unknown": 3,
        "removed": ["a", "d"]
    }))
    .unwrap();
    let outcome = res.handle_change_event(&event, &mut dir);

    assert!(matches!(outcome, EventOutcome::Applied(s) if s.tally_changed && s.list_changed));
    assert_eq!(res.members(), strings(&["b", "c"]).as_slice());
    assert_eq!(res.tally(), Tally::new(1, 2, 3));
    assert_eq!(res.state(), AggregateState::PartiallyStarted);
    assert_eq!(res.child_count(), 2);
}

#[test]
fn test_missing_up_names_up() {
    let mut dir = MemberDirectory::new();
    let init = ResourceInit {
        up: None,
        ..ResourceInit::new(ResourceType::Servers)
            .with_tally(0, 1, 0)
            .with_list(["a"])
    };
    let err = Resource::new(init, &mut dir).unwrap_err();
    assert_eq!(err, ResourceError::MissingField("up"));
    assert!(err.to_string().contains("up"));
    assert!(dir.is_empty(), "failed construction must not subscribe members");
}

#[test]
fn test_missing_fields_are_reported() {
    let mut dir = MemberDirectory::new();
    let no_list = ResourceInit::new(ResourceType::Servers).with_tally(0, 0, 0);
    assert_eq!(
        Resource::new(no_list, &mut dir).unwrap_err(),
        ResourceError::MissingField("list")
    );

    let no_down = ResourceInit {
        down: None,
        ..ResourceInit::new(ResourceType::Hosts)
            .with_tally(0, 0, 0)
            .with_list(Vec::<&str>::new())
    };
    assert_eq!(
        Resource::new(no_down, &mut dir).unwrap_err(),
        ResourceError::MissingField("down")
    );

    let no_partial = ResourceInit::new(ResourceType::Clusters)
        .with_tally(0, 0, 0)
        .with_list(Vec::<&str>::new());
    assert_eq!(
        Resource::new(no_partial, &mut dir).unwrap_err(),
        ResourceError::MissingField("partial")
    );

    let no_id = ResourceInit::new(ResourceType::Cluster)
        .with_tally(0, 0, 0)
        .with_partial(0)
        .with_list(Vec::<&str>::new());
    assert_eq!(
        Resource::new(no_id, &mut dir).unwrap_err(),
        ResourceError::MissingField("id")
    );
}

#[test]
fn test_wrong_type_event_is_ignored() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (2, 0, 0), &["a", "b"]);
    let rec = Recorder::new();
    res.subscribe(rec.clone());

    let event = ChangeEvent::new(ResourceKey::collection(ResourceType::Clusters))
        .with_tally(0, 2, 0)
        .with_removed(["a"]);
    assert_eq!(res.handle_change_event(&event, &mut dir), EventOutcome::Ignored);

    assert_eq!(res.tally(), Tally::new(2, 0, 0));
    assert_eq!(res.members(), strings(&["a", "b"]).as_slice());
    assert_eq!(res.state(), AggregateState::Started);
    assert!(rec.calls().is_empty());
}

#[test]
fn test_event_for_other_named_resource_is_ignored() {
    let mut dir = MemberDirectory::new();
    let mut res = Resource::new(
        ResourceInit::new(ResourceType::Cluster)
            .with_id("c1")
            .with_tally(1, 0, 0)
            .with_partial(0)
            .with_list(["s1"]),
        &mut dir,
    )
    .unwrap();
    let event = ChangeEvent::new(ResourceKey::named(ResourceType::Cluster, "c2")).with_tally(0, 1, 0);
    assert_eq!(res.handle_change_event(&event, &mut dir), EventOutcome::Ignored);
    assert_eq!(res.tally().up, 1);
}

#[test]
fn test_removing_same_member_twice_is_harmless() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (2, 0, 0), &["a", "b"]);

    let first = ChangeEvent::new(servers_key())
        .with_tally(1, 0, 0)
        .with_removed(["a"]);
    res.handle_change_event(&first, &mut dir);
    assert_eq!(res.members(), strings(&["b"]).as_slice());
    assert_eq!(res.tally(), Tally::new(1, 0, 0));

    let rec = Recorder::new();
    res.subscribe(rec.clone());
    let again = ChangeEvent::new(servers_key()).with_removed(["a"]);
    let outcome = res.handle_change_event(&again, &mut dir);

    assert!(matches!(outcome, EventOutcome::Applied(s) if !s.tally_changed && !s.list_changed));
    assert_eq!(res.members(), strings(&["b"]).as_slice());
    assert_eq!(res.tally(), Tally::new(1, 0, 0));
    assert!(rec.calls().is_empty());
}

#[test]
fn test_observer_sees_continuous_old_new_tallies() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (2, 0, 0), &["a", "b"]);
    let rec = Recorder::new();
    res.subscribe(rec.clone());

    let first = ChangeEvent::from_value(json!({"type": "servers", "up": 1, "down": 1})).unwrap();
    let second = ChangeEvent::from_value(json!({"type": "servers", "up": 0, "down": 2})).unwrap();
    res.handle_change_event(&first, &mut dir);
    res.handle_change_event(&second, &mut dir);

    let tallies = rec.tally_calls();
    assert_eq!(tallies.len(), 2);
    assert_eq!(tallies[0], (Tally::new(1, 1, 0), Tally::new(2, 0, 0)));
    assert_eq!(tallies[1].1, tallies[0].0);
    assert_eq!(tallies[1].0, Tally::new(0, 2, 0));
    assert_eq!(res.state(), AggregateState::Stopped);
}

#[test]
fn test_notifications_are_ordered_tally_list_state() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (0, 0, 0), &[]);
    let rec = Recorder::new();
    res.subscribe(rec.clone());

    let event = ChangeEvent::new(servers_key())
        .with_tally(1, 0, 0)
        .with_added(["s1"]);
    res.handle_change_event(&event, &mut dir);

    assert_eq!(
        rec.calls(),
        vec![
            Call::Tally {
                new: Tally::new(1, 0, 0),
                old: Tally::new(0, 0, 0),
            },
            Call::List {
                new: strings(&["s1"]),
                old: vec![],
                added: strings(&["s1"]),
                removed: vec![],
            },
            Call::State {
                new: AggregateState::Started,
                old: AggregateState::Stopped,
            },
        ]
    );
}

#[test]
fn test_tally_matches_member_count_after_consistent_events() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (1, 1, 0), &["a", "b"]);
    let events = [
        json!({"type": "servers", "unknown": 1, "added": ["c"]}),
        json!({"type": "servers", "up": 0, "removed": ["a"]}),
        json!({"type": "servers", "down": 0, "unknown": 0, "removed": ["b", "c"]}),
        json!({"type": "servers", "up": 2, "added": [{"id": "d", "state": "STARTED"}, "e"]}),
    ];
    for value in events {
        let event = ChangeEvent::from_value(value).unwrap();
        res.handle_change_event(&event, &mut dir);
        assert!(res.is_consistent(), "tally {:?} vs {:?}", res.tally(), res.members());
        assert_eq!(res.child_count(), res.members().len());
    }
    assert_eq!(res.members(), strings(&["d", "e"]).as_slice());
    assert_eq!(dir.state("d"), Some(MemberState::Started));
    assert_eq!(dir.state("e"), Some(MemberState::Unknown));
    assert_eq!(dir.state("a"), None, "removed member is pruned");
}

#[test]
fn test_added_duplicates_are_kept() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (1, 0, 0), &["a"]);
    let event = ChangeEvent::new(servers_key())
        .with_tally(2, 0, 0)
        .with_added([MemberRef::from("a")]);
    res.handle_change_event(&event, &mut dir);
    assert_eq!(res.members(), strings(&["a", "a"]).as_slice());
    assert_eq!(res.child_count(), 2);
    assert_eq!(dir.observer_count("a"), 2);
}

#[test]
fn test_partial_is_tracked_only_where_applicable() {
    let mut dir = MemberDirectory::new();
    let mut hosts = Resource::new(
        ResourceInit::new(ResourceType::Hosts)
            .with_tally(1, 0, 0)
            .with_list(["h1"]),
        &mut dir,
    )
    .unwrap();
    let event = ChangeEvent::from_value(json!({"type": "hosts", "partial": 1})).unwrap();
    hosts.handle_change_event(&event, &mut dir);
    assert_eq!(hosts.tally().partial, None);

    let mut apps = Resource::new(
        ResourceInit::new(ResourceType::Applications)
            .with_tally(1, 0, 0)
            .with_partial(0)
            .with_list(["app1"]),
        &mut dir,
    )
    .unwrap();
    assert_eq!(apps.state(), AggregateState::Started);
    let event = ChangeEvent::from_value(json!({
        "type": "applications",
        "partial": 1,
        "added": ["app2"]
    }))
    .unwrap();
    apps.handle_change_event(&event, &mut dir);
    assert_eq!(apps.tally().partial, Some(1));
    assert!(apps.is_consistent());
    assert_eq!(apps.state(), AggregateState::PartiallyStarted);
}

#[test]
fn test_alerts_and_attributes_notify_on_change_only() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (0, 0, 0), &[]);
    let rec = Recorder::new();
    res.subscribe(rec.clone());

    let event = ChangeEvent::from_value(json!({
        "type": "servers",
        "alerts": {"count": 1, "messages": ["s1 needs restart"]},
        "attributes": {"note": "maintenance"}
    }))
    .unwrap();
    res.handle_change_event(&event, &mut dir);
    res.handle_change_event(&event, &mut dir);

    let alerts = Alerts {
        count: 1,
        messages: strings(&["s1 needs restart"]),
    };
    assert_eq!(
        rec.calls(),
        vec![
            Call::Alerts(alerts.clone()),
            Call::Attribute {
                name: "note".into(),
                new: Some(json!("maintenance")),
                old: None,
            },
        ]
    );
    assert_eq!(res.alerts(), &alerts);

    rec.clear();
    let removal =
        ChangeEvent::from_value(json!({"type": "servers", "attributes": {"note": null}})).unwrap();
    res.handle_change_event(&removal, &mut dir);
    assert_eq!(res.attribute("note"), None);
    assert_eq!(
        rec.calls(),
        vec![Call::Attribute {
            name: "note".into(),
            new: None,
            old: Some(json!("maintenance")),
        }]
    );
}

#[test]
fn test_destroy_releases_children_and_observers() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (2, 0, 0), &["a", "b"]);
    let rec = Recorder::new();
    res.subscribe(rec.clone());
    assert_eq!(dir.len(), 2);

    res.destroy(&mut dir);

    assert!(dir.is_empty());
    assert_eq!(res.child_count(), 0);
    assert_eq!(res.observer_count(), 0);
    assert_eq!(rec.calls(), vec![Call::Destroyed]);
}

#[test]
fn test_unsubscribed_observer_gets_nothing() {
    let mut dir = MemberDirectory::new();
    let mut res = servers(&mut dir, (1, 0, 0), &["a"]);
    let rec = Recorder::new();
    let shared: admin_tally::observer::SharedObserver = rec.clone();
    assert!(res.subscribe(shared.clone()));
    assert!(!res.subscribe(shared.clone()));
    assert!(res.unsubscribe(&shared));
    assert!(!res.unsubscribe(&shared));

    let event = ChangeEvent::new(servers_key()).with_tally(0, 1, 0);
    res.handle_change_event(&event, &mut dir);
    assert!(rec.calls().is_empty());
}
