//! The pull cycle: bringing remote changes into the local store.

use std::sync::Arc;

use parking_lot::Mutex;
use tidesync_query::{field, ident, lit, odata, system, OrderBy, QueryDescription, Value};
use tidesync_store::{LocalStore, SystemProperties};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{SyncError, SyncResult};
use crate::errors::delete_errors_for_table;
use crate::queue::OperationQueue;
use crate::remote::{Features, RemoteTableProxy};
use crate::settings::SyncSettings;

/// Reserved wire parameter asking the server to include soft-deleted rows.
pub const INCLUDE_DELETED_PARAMETER: &str = "__includeDeleted";
/// Reserved wire parameter listing the system columns the server should
/// return.
pub const SYSTEM_PROPERTIES_PARAMETER: &str = "__systemproperties";

/// Page size used when fetching from the remote table.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

fn is_reserved_parameter(name: &str) -> bool {
    name.eq_ignore_ascii_case(INCLUDE_DELETED_PARAMETER)
        || name.eq_ignore_ascii_case(SYSTEM_PROPERTIES_PARAMETER)
}

/// Comma-joined system column names for the wire parameter; `*` when the
/// table declared none.
fn system_properties_wire(mask: SystemProperties) -> String {
    let mut names = Vec::new();
    if mask.contains(SystemProperties::CREATED_AT) {
        names.push(system::CREATED_AT);
    }
    if mask.contains(SystemProperties::UPDATED_AT) {
        names.push(system::UPDATED_AT);
    }
    if mask.contains(SystemProperties::VERSION) {
        names.push(system::VERSION);
    }
    if mask.contains(SystemProperties::DELETED) {
        names.push(system::DELETED);
    }
    if names.is_empty() {
        "*".to_owned()
    } else {
        names.join(",")
    }
}

/// Validates a pull request and resolves the table's system-property
/// mask. Runs before the push-before-pull cycle so a bad request fails
/// without any network traffic.
pub(crate) fn prepare_pull(
    settings: &SyncSettings,
    query: &QueryDescription,
    query_key: Option<&str>,
) -> SyncResult<SystemProperties> {
    let mask = settings.system_properties(&query.table_name)?;
    validate(query, query_key, mask)?;
    Ok(mask)
}

fn validate(
    query: &QueryDescription,
    query_key: Option<&str>,
    mask: SystemProperties,
) -> SyncResult<()> {
    if !query.selection.is_empty() {
        return Err(SyncError::InvalidArgument(
            "pull does not support queries with a column selection".to_owned(),
        ));
    }
    if let Some((name, _)) = query.parameters.iter().find(|(name, _)| is_reserved_parameter(name)) {
        return Err(SyncError::InvalidArgument(format!(
            "the query parameter '{name}' is reserved"
        )));
    }
    if let Some(key) = query_key {
        if !ident::is_valid_identifier(key) {
            return Err(SyncError::InvalidArgument(format!(
                "'{key}' is not a valid incremental query key"
            )));
        }
        if !query.ordering.is_empty() || query.top.is_some() || query.skip.is_some() {
            return Err(SyncError::InvalidArgument(
                "incremental pull queries may not use orderby, top or skip".to_owned(),
            ));
        }
        if !mask.contains(SystemProperties::UPDATED_AT) {
            return Err(SyncError::InvalidArgument(format!(
                "incremental pull requires the table to track the '{}' column",
                system::UPDATED_AT
            )));
        }
    }
    Ok(())
}

/// Applies one fetched page: soft-deleted rows are removed locally, the
/// rest are upserted as server state.
fn apply_page(
    store: &Arc<dyn LocalStore>,
    table_name: &str,
    items: &[tidesync_query::Item],
) -> SyncResult<()> {
    let mut deleted_ids = Vec::new();
    let mut live = Vec::new();
    for item in items {
        let id = item
            .id()
            .ok_or_else(|| SyncError::InvalidOperation("a pulled record has no id".to_owned()))?;
        let soft_deleted = item
            .get(system::DELETED)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if soft_deleted {
            deleted_ids.push(id.to_owned());
        } else {
            live.push(item.clone());
        }
    }
    if !deleted_ids.is_empty() {
        store.delete_ids(table_name, &deleted_ids)?;
    }
    if !live.is_empty() {
        store.upsert(table_name, &live, true)?;
    }
    Ok(())
}

/// Fetches remote state for one query into the local store.
///
/// The caller's `top` caps the total records pulled and its `skip` offsets
/// the whole pull; page requests compose their own paging on top of both.
/// With a `query_key` the pull is incremental: the query is bounded below
/// by the stored delta token, ordered by `__updatedAt`, and the token is
/// advanced only after each page is durably stored. A crash between pages
/// re-pulls at most one already-stored page, which the idempotent upsert
/// absorbs.
#[allow(clippy::too_many_arguments)]
pub(crate) fn pull_pages(
    store: &Arc<dyn LocalStore>,
    settings: &SyncSettings,
    proxy: &dyn RemoteTableProxy,
    store_lock: &Mutex<()>,
    cancel: &CancellationToken,
    query: &QueryDescription,
    query_key: Option<&str>,
    mask: SystemProperties,
    page_size: u64,
) -> SyncResult<()> {
    let mut features = Features::OFFLINE.union(Features::UNTYPED_TABLE);
    if !query.parameters.is_empty() {
        features = features.union(Features::ADDITIONAL_QUERY_PARAMETERS);
    }

    let mut token = match query_key {
        Some(key) => Some(settings.delta_token(&query.table_name, key)?),
        None => None,
    };
    // incremental pulls reject caller paging, so these only bite for
    // plain pulls
    let base_skip = query.skip.unwrap_or(0);
    let mut skip: u64 = 0;
    let mut pulled: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        // the caller's top caps the total record count across pages
        let request_top = match query.top {
            Some(cap) if pulled >= cap => break,
            Some(cap) => (cap - pulled).min(page_size),
            None => page_size,
        };

        let mut page_query = query.clone();
        if let Some(token) = token {
            page_query.and_filter(field(system::UPDATED_AT).ge(lit(Value::DateTime(token))));
            page_query = page_query.with_order_by(OrderBy::ascending(system::UPDATED_AT));
        }
        page_query = page_query
            .with_top(request_top)
            .with_parameter(INCLUDE_DELETED_PARAMETER, "true")
            .with_parameter(SYSTEM_PROPERTIES_PARAMETER, system_properties_wire(mask));
        if base_skip + skip > 0 {
            page_query = page_query.with_skip(base_skip + skip);
        }

        let rendered = odata::format_query(&page_query)?;
        let page = proxy.read(&query.table_name, &rendered, features)?;
        if page.items.is_empty() {
            break;
        }
        let fetched = page.items.len() as u64;
        pulled += fetched;

        {
            let _guard = store_lock.lock();
            apply_page(store, &query.table_name, &page.items)?;

            // the watermark moves only once the page is durably stored
            if let (Some(current), Some(key)) = (token, query_key) {
                let newest = page
                    .items
                    .iter()
                    .filter_map(|item| item.get(system::UPDATED_AT))
                    .filter_map(Value::as_datetime)
                    .max();
                match newest {
                    Some(newest) if newest > current => {
                        settings.set_delta_token(&query.table_name, key, newest)?;
                        token = Some(newest);
                        skip = 0;
                    }
                    // a page of rows sharing the watermark pages by skip
                    _ => skip += fetched,
                }
            } else {
                skip += fetched;
            }
        }

        if fetched < request_top {
            break;
        }
    }

    debug!(table = %query.table_name, records = pulled, "pull finished");
    Ok(())
}

/// Removes local rows matching a query without touching the server.
///
/// Refused while the table has pending operations unless `force`, which
/// discards them. Error records for the table are always cleared, and the
/// delta token is reset when a `query_key` names one.
pub(crate) fn purge_table(
    store: &Arc<dyn LocalStore>,
    queue: &OperationQueue,
    settings: &SyncSettings,
    store_lock: &Mutex<()>,
    query: &QueryDescription,
    query_key: Option<&str>,
    force: bool,
) -> SyncResult<()> {
    if let Some(key) = query_key {
        if !ident::is_valid_identifier(key) {
            return Err(SyncError::InvalidArgument(format!(
                "'{key}' is not a valid incremental query key"
            )));
        }
    }

    let _guard = store_lock.lock();
    let pending = queue.count_pending(&query.table_name)?;
    if pending > 0 {
        if !force {
            return Err(SyncError::InvalidOperation(format!(
                "cannot purge table '{}' while it has {pending} pending operation(s)",
                query.table_name
            )));
        }
        let discarded = queue.discard_table(&query.table_name)?;
        debug!(table = %query.table_name, discarded, "purge discarded pending operations");
    }

    delete_errors_for_table(store.as_ref(), &query.table_name)?;
    store.delete_by_query(query)?;
    if let Some(key) = query_key {
        settings.reset_delta_token(&query.table_name, key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_list_orders_system_columns() {
        let mask = SystemProperties::UPDATED_AT
            .union(SystemProperties::DELETED)
            .union(SystemProperties::VERSION);
        assert_eq!(
            system_properties_wire(mask),
            "__updatedAt,__version,__deleted"
        );
        assert_eq!(system_properties_wire(SystemProperties::NONE), "*");
    }

    #[test]
    fn reserved_parameter_names_are_case_insensitive() {
        assert!(is_reserved_parameter("__includeDeleted"));
        assert!(is_reserved_parameter("__INCLUDEDELETED"));
        assert!(is_reserved_parameter("__SystemProperties"));
        assert!(!is_reserved_parameter("includeDeleted"));
    }

    #[test]
    fn validation_rejects_projections_and_bad_keys() {
        let mask = SystemProperties::UPDATED_AT;
        let projected =
            QueryDescription::new("todo").with_selection(vec!["text".to_owned()]);
        assert!(matches!(
            validate(&projected, None, mask),
            Err(SyncError::InvalidArgument(_))
        ));

        let plain = QueryDescription::new("todo");
        assert!(validate(&plain, Some("all"), mask).is_ok());
        assert!(matches!(
            validate(&plain, Some("not a key"), mask),
            Err(SyncError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate(&plain, Some("all"), SystemProperties::NONE),
            Err(SyncError::InvalidArgument(_))
        ));

        let paged = QueryDescription::new("todo").with_top(5);
        assert!(validate(&paged, None, mask).is_ok());
        assert!(matches!(
            validate(&paged, Some("all"), mask),
            Err(SyncError::InvalidArgument(_))
        ));
    }
}
