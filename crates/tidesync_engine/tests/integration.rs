//! End-to-end scenarios driving a sync context against the mock proxy.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tidesync_engine::{
    load_errors, MockRemoteTableProxy, PushStatus, RecordedCall, RemoteError,
    SyncContext, SyncError, SyncSettings,
};
use tidesync_query::{field, lit, system, Item, QueryDescription, Value};
use tidesync_store::SqliteStore;

fn prototype() -> Item {
    Item::new()
        .with(system::ID, "")
        .with("text", "")
        .with("extra", "")
        .with(system::VERSION, "")
        .with(system::UPDATED_AT, Utc::now())
        .with(system::DELETED, false)
}

fn harness() -> (SyncContext, Arc<SqliteStore>, Arc<MockRemoteTableProxy>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.define_table("todo", &prototype()).unwrap();
    let proxy = Arc::new(MockRemoteTableProxy::new());
    let context = SyncContext::new(store.clone(), proxy.clone()).with_page_size(2);
    context.initialize().unwrap();
    (context, store, proxy)
}

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap()
}

#[test]
fn offline_insert_then_push_merges_server_fields() {
    let (context, _store, proxy) = harness();
    proxy.push_write_response(Ok(Item::new()
        .with(system::ID, "abc")
        .with("extra", "x")));

    context
        .insert("todo", Item::new().with(system::ID, "abc").with("text", "t"))
        .unwrap();
    assert_eq!(context.pending_operations(), 1);

    context.push().unwrap();

    assert_eq!(context.pending_operations(), 0);
    let row = context.lookup("todo", "abc").unwrap().unwrap();
    // server fields merge into the local row instead of replacing it
    assert_eq!(row.get("text"), Some(&Value::String("t".into())));
    assert_eq!(row.get("extra"), Some(&Value::String("x".into())));
}

#[test]
fn insert_then_delete_never_reaches_the_network() {
    let (context, _store, proxy) = harness();
    context
        .insert("todo", Item::new().with(system::ID, "abc"))
        .unwrap();
    context.delete("todo", "abc").unwrap();

    assert_eq!(context.pending_operations(), 0);
    assert!(context.lookup("todo", "abc").unwrap().is_none());

    context.push().unwrap();
    assert!(proxy.calls().is_empty());
}

#[test]
fn collapsed_delete_keeps_the_original_queue_position() {
    let (context, _store, proxy) = harness();
    // item1 exists locally without a pending operation
    context
        .insert("todo", Item::new().with(system::ID, "item1"))
        .unwrap();
    context.push().unwrap();

    context
        .update("todo", Item::new().with(system::ID, "item1").with("text", "u"))
        .unwrap();
    context
        .insert("todo", Item::new().with(system::ID, "item2"))
        .unwrap();
    context.delete("todo", "item1").unwrap();

    // one entry per item, the delete inheriting the update's position
    assert_eq!(context.pending_operations(), 2);
    context.push().unwrap();

    // call 0 is item1's initial insert; the collapsed delete replays from
    // the update's queue position, ahead of item2's insert
    let calls = proxy.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(
        &calls[1],
        RecordedCall::Delete(_, item) if item.id() == Some("item1")
    ));
    assert!(matches!(
        &calls[2],
        RecordedCall::Insert(_, item) if item.id() == Some("item2")
    ));
    assert_eq!(context.pending_operations(), 0);
}

#[test]
fn updates_on_one_item_collapse_to_a_single_push() {
    let (context, _store, proxy) = harness();
    context
        .insert("todo", Item::new().with(system::ID, "a"))
        .unwrap();
    context.push().unwrap();

    context
        .update("todo", Item::new().with(system::ID, "a").with("text", "one"))
        .unwrap();
    context
        .update("todo", Item::new().with(system::ID, "a").with("text", "two"))
        .unwrap();
    assert_eq!(context.pending_operations(), 1);

    context.push().unwrap();
    let updates: Vec<Item> = proxy
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RecordedCall::Update(_, item) => Some(item),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].get("text"), Some(&Value::String("two".into())));
}

#[test]
fn conflicts_are_recorded_and_push_continues() {
    let (context, store, proxy) = harness();
    let server_copy = Item::new().with(system::ID, "a").with("text", "server");
    proxy.push_write_response(Err(RemoteError::Conflict {
        status: 412,
        raw: Some("precondition failed".to_owned()),
        item: Some(server_copy.clone()),
    }));

    context
        .insert("todo", Item::new().with(system::ID, "a").with("text", "local"))
        .unwrap();
    context
        .insert("todo", Item::new().with(system::ID, "b"))
        .unwrap();

    let failure = context.push().unwrap_err();
    let SyncError::PushFailed(result) = failure else {
        panic!("expected an aggregate push failure");
    };
    assert_eq!(result.status, PushStatus::Complete);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].item_id, "a");
    assert_eq!(result.errors[0].status, Some(412));
    assert_eq!(result.errors[0].result, Some(server_copy));

    // the conflicted entry stays queued, the other was confirmed
    assert_eq!(context.pending_operations(), 1);
    assert_eq!(load_errors(store.as_ref()).unwrap().len(), 1);
}

#[test]
fn network_error_aborts_the_rest_of_the_queue() {
    let (context, store, proxy) = harness();
    proxy.push_write_response(Err(RemoteError::Network("connection refused".to_owned())));

    context
        .insert("todo", Item::new().with(system::ID, "a"))
        .unwrap();
    context
        .insert("todo", Item::new().with(system::ID, "b"))
        .unwrap();

    let SyncError::PushFailed(result) = context.push().unwrap_err() else {
        panic!("expected an aggregate push failure");
    };
    assert_eq!(result.status, PushStatus::CancelledByNetworkError);
    assert!(result.errors.is_empty());

    // nothing was confirmed and nothing was recorded as a conflict
    assert_eq!(context.pending_operations(), 2);
    assert_eq!(proxy.calls().len(), 1);
    assert!(load_errors(store.as_ref()).unwrap().is_empty());

    // the retry drains the queue
    context.push().unwrap();
    assert_eq!(context.pending_operations(), 0);
}

#[test]
fn authentication_error_aborts_with_its_own_status() {
    let (context, _store, proxy) = harness();
    proxy.push_write_response(Err(RemoteError::Authentication("401".to_owned())));
    context
        .insert("todo", Item::new().with(system::ID, "a"))
        .unwrap();

    let SyncError::PushFailed(result) = context.push().unwrap_err() else {
        panic!("expected an aggregate push failure");
    };
    assert_eq!(result.status, PushStatus::CancelledByAuthenticationError);
    assert_eq!(context.pending_operations(), 1);
}

#[test]
fn pull_pushes_pending_operations_exactly_once() {
    let (context, _store, proxy) = harness();
    context
        .insert("todo", Item::new().with(system::ID, "a"))
        .unwrap();

    context.pull(&QueryDescription::new("todo"), None).unwrap();

    let calls = proxy.calls();
    assert!(matches!(calls[0], RecordedCall::Insert(_, _)));
    assert!(matches!(calls[1], RecordedCall::Read(_, _)));
    assert_eq!(calls.len(), 2);
}

#[test]
fn pull_applies_pages_and_honors_soft_deletes() {
    let (context, _store, proxy) = harness();
    // full first page, short second page
    proxy.push_read_page(vec![
        Item::new()
            .with(system::ID, "keep")
            .with("text", "k")
            .with(system::UPDATED_AT, at(1_000))
            .with(system::DELETED, false),
        Item::new()
            .with(system::ID, "gone")
            .with(system::UPDATED_AT, at(2_000))
            .with(system::DELETED, true),
    ]);
    proxy.push_read_page(vec![Item::new()
        .with(system::ID, "late")
        .with(system::UPDATED_AT, at(3_000))
        .with(system::DELETED, false)]);

    context.pull(&QueryDescription::new("todo"), None).unwrap();

    assert!(context.lookup("todo", "keep").unwrap().is_some());
    assert!(context.lookup("todo", "gone").unwrap().is_none());
    assert!(context.lookup("todo", "late").unwrap().is_some());

    let queries = proxy.read_queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[0].contains("__includeDeleted=true"));
    assert!(queries[0].contains("__systemproperties="));
    assert!(queries[1].contains("$skip=2"));
}

#[test]
fn incremental_pull_advances_the_delta_token_per_page() {
    let (context, store, proxy) = harness();
    proxy.push_read_page(vec![
        Item::new()
            .with(system::ID, "a")
            .with(system::UPDATED_AT, at(1_000)),
        Item::new()
            .with(system::ID, "b")
            .with(system::UPDATED_AT, at(2_000)),
    ]);
    proxy.push_read_page(vec![Item::new()
        .with(system::ID, "c")
        .with(system::UPDATED_AT, at(3_000))]);

    context
        .pull(&QueryDescription::new("todo"), Some("all"))
        .unwrap();

    let settings = SyncSettings::new(store.clone());
    assert_eq!(settings.delta_token("todo", "all").unwrap(), at(3_000));

    let queries = proxy.read_queries();
    // the first request is bounded by the epoch, the second by page one's
    // high-water mark
    assert!(queries[0].contains("__updatedAt ge datetime'1970-01-01T00:00:00.000Z'"));
    assert!(queries[1].contains("__updatedAt ge datetime'1970-01-01T00:00:02.000Z'"));
    assert!(queries[0].contains("$orderby=__updatedAt"));
}

#[test]
fn repeating_a_pulled_page_is_idempotent() {
    let (context, _store, proxy) = harness();
    let page = vec![
        Item::new()
            .with(system::ID, "a")
            .with("text", "v")
            .with(system::UPDATED_AT, at(1_000)),
    ];
    proxy.push_read_page(page.clone());
    context
        .pull(&QueryDescription::new("todo"), Some("all"))
        .unwrap();

    // a crash before the token write re-pulls the same page
    proxy.push_read_page(page);
    context
        .pull(&QueryDescription::new("todo"), Some("all"))
        .unwrap();

    let rows = context.read(&QueryDescription::new("todo")).unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0].get("text"), Some(&Value::String("v".into())));
}

#[test]
fn invalid_pull_fails_before_pushing_pending_operations() {
    let (context, _store, proxy) = harness();
    context
        .insert("todo", Item::new().with(system::ID, "a"))
        .unwrap();

    let projected = QueryDescription::new("todo").with_selection(vec!["text".to_owned()]);
    assert!(matches!(
        context.pull(&projected, None),
        Err(SyncError::InvalidArgument(_))
    ));

    // the queued insert must not have been pushed on the way to the error
    assert!(proxy.calls().is_empty());
    assert_eq!(context.pending_operations(), 1);
}

#[test]
fn pull_caps_the_total_records_at_the_caller_top() {
    let (context, _store, proxy) = harness();
    proxy.push_read_page(vec![Item::new()
        .with(system::ID, "a")
        .with(system::UPDATED_AT, at(1_000))]);
    proxy.push_read_page(vec![Item::new()
        .with(system::ID, "b")
        .with(system::UPDATED_AT, at(2_000))]);

    let query = QueryDescription::new("todo").with_top(1);
    context.pull(&query, None).unwrap();

    // one request for exactly one record; the second page is never fetched
    let queries = proxy.read_queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].contains("$top=1"));
    assert!(context.lookup("todo", "a").unwrap().is_some());
    assert!(context.lookup("todo", "b").unwrap().is_none());
}

#[test]
fn pull_composes_paging_on_top_of_the_caller_skip() {
    let (context, _store, proxy) = harness();
    proxy.push_read_page(vec![
        Item::new()
            .with(system::ID, "b")
            .with(system::UPDATED_AT, at(2_000)),
        Item::new()
            .with(system::ID, "c")
            .with(system::UPDATED_AT, at(3_000)),
    ]);
    proxy.push_read_page(vec![Item::new()
        .with(system::ID, "d")
        .with(system::UPDATED_AT, at(4_000))]);

    let query = QueryDescription::new("todo").with_skip(1);
    context.pull(&query, None).unwrap();

    let queries = proxy.read_queries();
    assert_eq!(queries.len(), 2);
    // every request keeps the caller's offset; page advances add to it
    assert!(queries[0].contains("$skip=1"));
    assert!(queries[0].contains("$top=2"));
    assert!(queries[1].contains("$skip=3"));
}

#[test]
fn pull_validations_reject_misuse() {
    let (context, _store, _proxy) = harness();

    let projected = QueryDescription::new("todo").with_selection(vec!["text".to_owned()]);
    assert!(matches!(
        context.pull(&projected, None),
        Err(SyncError::InvalidArgument(_))
    ));

    let reserved = QueryDescription::new("todo").with_parameter("__includeDeleted", "false");
    assert!(matches!(
        context.pull(&reserved, None),
        Err(SyncError::InvalidArgument(_))
    ));

    let ordered = QueryDescription::new("todo")
        .with_order_by(tidesync_query::OrderBy::ascending("text"));
    assert!(matches!(
        context.pull(&ordered, Some("all")),
        Err(SyncError::InvalidArgument(_))
    ));

    assert!(matches!(
        context.pull(&QueryDescription::new("todo"), Some("not a key")),
        Err(SyncError::InvalidArgument(_))
    ));
}

#[test]
fn purge_refuses_pending_operations_unless_forced() {
    let (context, store, proxy) = harness();
    proxy.push_read_page(vec![Item::new()
        .with(system::ID, "remote")
        .with(system::UPDATED_AT, at(1_000))]);
    context
        .pull(&QueryDescription::new("todo"), Some("all"))
        .unwrap();
    context
        .insert("todo", Item::new().with(system::ID, "local"))
        .unwrap();

    assert!(matches!(
        context.purge(&QueryDescription::new("todo"), Some("all"), false),
        Err(SyncError::InvalidOperation(_))
    ));
    assert_eq!(context.pending_operations(), 1);

    context
        .purge(&QueryDescription::new("todo"), Some("all"), true)
        .unwrap();
    assert_eq!(context.pending_operations(), 0);
    assert!(context
        .read(&QueryDescription::new("todo"))
        .unwrap()
        .rows
        .is_empty());

    // the delta token was reset along with the rows
    let settings = SyncSettings::new(store);
    assert_eq!(
        settings.delta_token("todo", "all").unwrap(),
        Utc.timestamp_opt(0, 0).unwrap()
    );
}

#[test]
fn conflict_resolution_replaces_or_discards_the_local_row() {
    let (context, store, proxy) = harness();
    let server_copy = Item::new().with(system::ID, "a").with("text", "server");
    proxy.push_write_response(Err(RemoteError::Conflict {
        status: 412,
        raw: None,
        item: Some(server_copy.clone()),
    }));
    context
        .insert("todo", Item::new().with(system::ID, "a").with("text", "local"))
        .unwrap();

    let SyncError::PushFailed(result) = context.push().unwrap_err() else {
        panic!("expected an aggregate push failure");
    };
    let error = &result.errors[0];

    context
        .cancel_and_update_item(error, server_copy)
        .unwrap();
    assert_eq!(context.pending_operations(), 0);
    assert!(load_errors(store.as_ref()).unwrap().is_empty());
    let row = context.lookup("todo", "a").unwrap().unwrap();
    assert_eq!(row.get("text"), Some(&Value::String("server".into())));

    // cancelling twice fails: the queue entry is gone
    assert!(context.cancel_and_discard_item(error).is_err());
}

#[test]
fn cancellation_stops_a_push_before_the_next_operation() {
    let (context, _store, proxy) = harness();
    context
        .insert("todo", Item::new().with(system::ID, "a"))
        .unwrap();
    context.cancellation_token().cancel();

    assert!(matches!(context.push(), Err(SyncError::Cancelled)));
    assert_eq!(context.pending_operations(), 1);
    assert!(proxy.calls().is_empty());

    context.cancellation_token().reset();
    context.push().unwrap();
    assert_eq!(context.pending_operations(), 0);
}

#[test]
fn outbound_items_do_not_carry_server_managed_columns() {
    let (context, _store, proxy) = harness();
    proxy.push_read_page(vec![Item::new()
        .with(system::ID, "a")
        .with("text", "t")
        .with(system::VERSION, "v1")
        .with(system::UPDATED_AT, at(1_000))
        .with(system::DELETED, false)]);
    context.pull(&QueryDescription::new("todo"), None).unwrap();

    context
        .update("todo", context.lookup("todo", "a").unwrap().unwrap())
        .unwrap();
    context.push().unwrap();

    let pushed = proxy
        .calls()
        .into_iter()
        .find_map(|call| match call {
            RecordedCall::Update(_, item) => Some(item),
            _ => None,
        })
        .unwrap();
    // the version rides along for optimistic concurrency, timestamps do not
    assert_eq!(pushed.get(system::VERSION), Some(&Value::String("v1".into())));
    assert!(pushed.get(system::UPDATED_AT).is_none());
    assert!(pushed.get(system::DELETED).is_none());
}

#[test]
fn local_reads_can_filter_with_the_query_model() {
    let (context, _store, _proxy) = harness();
    for (id, text) in [("a", "alpha"), ("b", "beta")] {
        context
            .insert("todo", Item::new().with(system::ID, id).with("text", text))
            .unwrap();
    }

    let rows = context
        .read(&QueryDescription::new("todo").with_filter(field("text").eq(lit("beta"))))
        .unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0].id(), Some("b"));
}
