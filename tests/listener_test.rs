mod common;

use common::{BuildRecord, BuildRecordApi, BuildStatus, IdArgs, RecordQuery};
use live_entity_cache::{
    CacheContext, CacheError, EntityId, EntityNotification, EntityUpdateEvent, OperationType,
};

/// Populates two cached lists and the index entries for records 1 and 2
async fn populated_context(api: &BuildRecordApi) -> CacheContext {
    let context = CacheContext::default();
    let get_all = {
        let api = api.clone();
        context
            .resources()
            .decorate("getAll", move |query: RecordQuery| api.get_all(query))
            .unwrap()
    };

    get_all.call(RecordQuery::default()).await.unwrap();
    get_all
        .call(RecordQuery::with_status(BuildStatus::Building))
        .await
        .unwrap();
    context
}

fn index_entry(context: &CacheContext, id: i64) -> Option<BuildRecord> {
    context
        .resources()
        .cached::<BuildRecord>(&EntityId::from(id))
        .unwrap()
}

fn cached_lists(context: &CacheContext) -> usize {
    context
        .resources()
        .cache()
        .paths()
        .iter()
        .filter(|path| path.starts_with("resource/BuildRecord/getAll/"))
        .count()
}

#[tokio::test]
async fn test_update_drops_lists_and_only_the_changed_index_entry() {
    let api = BuildRecordApi::new(vec![BuildRecord::building(1), BuildRecord::building(2)]);
    let context = populated_context(&api).await;
    assert_eq!(cached_lists(&context), 2);

    let event = EntityUpdateEvent::new("BuildRecord", 1, OperationType::Update);
    let removed = context
        .invalidation()
        .process_entity_update_event(&event)
        .unwrap();

    // The getAll subtree (both lists) and index entry 1
    assert_eq!(removed, 2);
    assert_eq!(cached_lists(&context), 0);
    assert_eq!(index_entry(&context, 1), None);
    assert_eq!(index_entry(&context, 2), Some(BuildRecord::building(2)));
}

#[tokio::test]
async fn test_create_keeps_every_index_entry() {
    let api = BuildRecordApi::new(vec![BuildRecord::building(1), BuildRecord::building(2)]);
    let context = populated_context(&api).await;

    let event = EntityUpdateEvent::new("BuildRecord", 3, OperationType::Create);
    context
        .invalidation()
        .process_entity_update_event(&event)
        .unwrap();

    assert_eq!(cached_lists(&context), 0);
    assert_eq!(index_entry(&context, 1), Some(BuildRecord::building(1)));
    assert_eq!(index_entry(&context, 2), Some(BuildRecord::building(2)));
}

#[tokio::test]
async fn test_create_for_existing_id_does_not_touch_its_index_entry() {
    let api = BuildRecordApi::new(vec![BuildRecord::building(1)]);
    let context = populated_context(&api).await;

    let event = EntityUpdateEvent::new("BuildRecord", 1, OperationType::Create);
    context
        .invalidation()
        .process_entity_update_event(&event)
        .unwrap();

    assert_eq!(index_entry(&context, 1), Some(BuildRecord::building(1)));
}

#[tokio::test]
async fn test_other_entity_classes_are_untouched() {
    let api = BuildRecordApi::new(vec![BuildRecord::building(1)]);
    let context = populated_context(&api).await;

    let event = EntityUpdateEvent::new("BuildConfiguration", 1, OperationType::Delete);
    let removed = context
        .invalidation()
        .process_entity_update_event(&event)
        .unwrap();

    assert_eq!(removed, 0);
    assert_eq!(cached_lists(&context), 2);
    assert!(index_entry(&context, 1).is_some());
}

#[tokio::test]
async fn test_pushed_delete_forces_refetch_of_lookup() {
    let api = BuildRecordApi::new(vec![BuildRecord::building(1)]);
    let context = populated_context(&api).await;
    let get = {
        let api = api.clone();
        context
            .resources()
            .decorate_index_id("get", None, move |args: IdArgs| api.get(args))
            .unwrap()
    };

    // Served from the index
    get.call(IdArgs { id: 1 }).await.unwrap();
    assert_eq!(api.get_calls(), 0);

    // Server finishes the build and pushes the change
    api.replace(vec![BuildRecord::new(1, BuildStatus::Done)]);
    let (tx, rx) = context.channel();
    let notification = EntityNotification::new("BuildRecord", 1, OperationType::Update);
    tx.send(serde_json::to_string(&notification).unwrap())
        .await
        .unwrap();
    drop(tx);
    assert_eq!(context.listen(rx).await, 1);

    // The lookup goes back to the server and sees the new state
    let record = get.call(IdArgs { id: 1 }).await.unwrap();
    assert_eq!(record.status, BuildStatus::Done);
    assert_eq!(api.get_calls(), 1);
}

#[tokio::test]
async fn test_malformed_notification_is_rejected() {
    let api = BuildRecordApi::new(vec![BuildRecord::building(1)]);
    let context = populated_context(&api).await;

    let result = context
        .listener()
        .process_notification(r#"{"id": 1, "operationType": "UPDATE"}"#)
        .await;

    assert!(matches!(result, Err(CacheError::MalformedEvent(_))));
    assert_eq!(cached_lists(&context), 2);
}

#[tokio::test]
async fn test_string_and_numeric_ids_address_the_same_entry() {
    let api = BuildRecordApi::new(vec![BuildRecord::building(1), BuildRecord::building(2)]);
    let context = populated_context(&api).await;

    context
        .listener()
        .process_notification(r#"{"id": "2", "entityClass": "BuildRecord", "operationType": "DELETE"}"#)
        .await
        .unwrap();

    assert_eq!(index_entry(&context, 2), None);
    assert!(index_entry(&context, 1).is_some());
}
