//! Approval flow against a file backed SQLite store

use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use workflow_core::store::{
    SqliteStore, Store, UserRepository, WorkflowOperatorRepository, WorkflowRepository,
};
use workflow_core::types::{
    NodeSpec, TemplateSpec, User, UserId, WorkflowStatus, FORM_ACTION, FORM_TITLE,
};
use workflow_core::workflow::{
    ActionRegistry, CurrentUser, Engine, RequestContext, TemplateAdmin, WorkflowRuntime,
};
use workflow_core::EngineError;

fn user(id: i64) -> Arc<dyn CurrentUser> {
    let user = User::new(id, &format!("user{}", id), &format!("User {}", id));
    Arc::new(RequestContext::authenticated(user))
}

async fn sqlite_runtime(dir: &tempfile::TempDir) -> (SqliteStore, WorkflowRuntime) {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("workflow.db").display());
    let store = SqliteStore::connect(&url, 1).await.unwrap();
    store.migrate().await.unwrap();
    let runtime = WorkflowRuntime::new(
        Arc::new(store.clone()),
        Arc::new(ActionRegistry::with_builtin_actions()),
    );
    (store, runtime)
}

#[tokio::test]
async fn test_sqlite_approval_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (store, runtime) = sqlite_runtime(&dir).await;

    let mut tx = store.begin().await.unwrap();
    for id in [4, 5, 8] {
        tx.put_user(&User::new(id, &format!("user{}", id), &format!("User {}", id))).await.unwrap();
    }
    tx.commit().await.unwrap();

    let template = TemplateSpec {
        name: "Purchase".to_string(),
        only_name: "purchase".to_string(),
        org_id: Some(3),
        system: false,
        nodes: vec![
            NodeSpec {
                node: 1,
                name: "team".to_string(),
                action: None,
                action_value: Some(vec![4, 5]),
                everyone: true,
            },
            NodeSpec {
                node: 2,
                name: "confirm".to_string(),
                action: Some("initiator".to_string()),
                action_value: None,
                everyone: false,
            },
        ],
    };
    TemplateAdmin::new(&runtime).import(&template).await.unwrap();
    assert!(matches!(
        TemplateAdmin::new(&runtime).import(&template).await,
        Err(EngineError::WorkflowTypeDuplicate(_))
    ));

    let mut engine = Engine::create_by_only_name(&runtime, user(8), "purchase").await.unwrap();
    engine.set_form_data_field(FORM_TITLE, json!("New laptops"));
    engine.initiate().await.unwrap();
    let id = engine.workflow().unwrap().id;

    let serial = Regex::new(r"^\d{8}\d{3}\d{4}$").unwrap();
    assert!(serial.is_match(&engine.workflow().unwrap().serials));
    assert!(engine.workflow().unwrap().serials.ends_with("0001"));

    // Both team members must approve
    let mut first = Engine::open(&runtime, user(4), id).await.unwrap();
    first.examine_approve().await.unwrap();
    assert_eq!(first.workflow().unwrap().node, 1);

    let mut second = Engine::open(&runtime, user(5), id).await.unwrap();
    second.examine_approve().await.unwrap();
    assert_eq!(second.workflow().unwrap().node, 2);
    assert!(second.is_operator(UserId::new(8)));

    let mut promoter = Engine::open(&runtime, user(8), id).await.unwrap();
    promoter.set_form_data_field(FORM_ACTION, json!("next"));
    promoter.examine_approve().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let stored = tx.get_workflow(id).await.unwrap();
    let leftover = tx.list_operators(id, 2).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
    assert_eq!(stored.title, "New laptops");
    assert_eq!(stored.node, 0);
    assert!(leftover.is_empty());

    // A second workflow the same day takes the next counter
    let mut engine = Engine::create_by_only_name(&runtime, user(8), "purchase").await.unwrap();
    engine.initiate().await.unwrap();
    assert!(engine.workflow().unwrap().serials.ends_with("0002"));
    assert_eq!(engine.workflow().unwrap().title, "工作流[Purchase]审批");

    store.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_failed_transition_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let (store, runtime) = sqlite_runtime(&dir).await;

    let template = TemplateSpec {
        name: "Leave".to_string(),
        only_name: "leave".to_string(),
        org_id: None,
        system: true,
        nodes: vec![NodeSpec {
            node: 1,
            name: "approver".to_string(),
            action: None,
            action_value: Some(vec![42]),
            everyone: false,
        }],
    };
    TemplateAdmin::new(&runtime).import(&template).await.unwrap();

    let mut engine = Engine::create_by_only_name(&runtime, user(8), "leave").await.unwrap();
    assert!(matches!(engine.initiate().await, Err(EngineError::UserNotExist(_))));

    let mut tx = store.begin().await.unwrap();
    let since = chrono::Utc::now() - chrono::Duration::days(1);
    let count = tx.count_workflows_since(since).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(count, 0, "The inserted workflow row is rolled back");

    store.shutdown().await;
}
