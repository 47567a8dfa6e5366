//! PostgreSQL 存储集成测试
//! 需要 TEST_DATABASE_URL 指向可写的测试库：`cargo test -- --ignored`

use erp_access::{
    db,
    error::AppError,
    models::{
        module::SyncScope,
        role::{AccessScope, GrantSpec, GrantWriteMode},
        sync::SyncOptions,
    },
    repository::{AccessRepository, ModuleRepository, PgStore, RoleRepository},
    services::SyncService,
};
use serial_test::serial;

mod common;
use common::{component_ref, hrm_manifest, simple_manifest, test_config};

/// 初始化测试数据库
async fn setup_store() -> PgStore {
    let config = test_config();
    let pool = db::create_pool(&config.database)
        .await
        .expect("Failed to create test database pool");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query(
        "TRUNCATE TABLE authentication_events, user_devices, users, role_module_access, \
         model_has_roles, roles, module_component_actions, module_components, sub_modules, modules CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean test database");

    PgStore::new(pool)
}

fn sync_service(store: &PgStore) -> SyncService<PgStore> {
    SyncService::new(store.clone(), test_config().tenancy, &[])
}

fn all_scope() -> SyncOptions {
    SyncOptions {
        scope: Some(SyncScope::All),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_sync_is_idempotent() {
    let store = setup_store().await;
    let definitions = vec![hrm_manifest(), simple_manifest("crm", "tenant")];

    let first = sync_service(&store)
        .sync_definitions(&definitions, &all_scope())
        .await
        .unwrap();
    assert_eq!(first.modules.created, 2);
    assert_eq!(first.actions.created, 5);

    let second = sync_service(&store)
        .sync_definitions(&definitions, &all_scope())
        .await
        .unwrap();
    assert!(second.is_unchanged(), "{:?}", second);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_module_delete_cascades() {
    let store = setup_store().await;
    sync_service(&store)
        .sync_definitions(&[hrm_manifest()], &all_scope())
        .await
        .unwrap();

    let counts = store.delete_module("hrm").await.unwrap().unwrap();
    assert_eq!(counts.modules, 1);
    assert_eq!(counts.sub_modules, 2);
    assert_eq!(counts.components, 3);
    assert_eq!(counts.actions, 4);

    let orphans: (i64,) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM sub_modules) + (SELECT COUNT(*) FROM module_components) \
         + (SELECT COUNT(*) FROM module_component_actions)",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(orphans.0, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_duplicate_grant_rejected() {
    let store = setup_store().await;
    sync_service(&store)
        .sync_definitions(&[hrm_manifest()], &all_scope())
        .await
        .unwrap();

    let role = store
        .create_role(&erp_access::models::role::CreateRoleRequest {
            name: "Clerk".to_string(),
            guard_name: "web".to_string(),
            scope: Default::default(),
            description: None,
        })
        .await
        .unwrap();
    let node = component_ref(&store, "hrm.employees.employee-directory.view").await;
    let spec = GrantSpec {
        node,
        access_scope: AccessScope::Own,
    };

    let first = store
        .insert_grant(role.id, spec, GrantWriteMode::Reject)
        .await
        .unwrap();
    match store.insert_grant(role.id, spec, GrantWriteMode::Reject).await {
        Err(AppError::DuplicateGrant { existing_id }) => assert_eq!(existing_id, first.id.as_uuid()),
        other => panic!("expected duplicate grant, got {:?}", other),
    }

    // 绕过应用层直接插入同样的行也会被唯一约束拒绝
    let (module_id, sub_module_id, component_id, action_id) = node.to_columns();
    let raw = sqlx::query(
        "INSERT INTO role_module_access (id, role_id, module_id, sub_module_id, component_id, action_id, access_scope) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, 'all')",
    )
    .bind(role.id)
    .bind(module_id)
    .bind(sub_module_id)
    .bind(component_id)
    .bind(action_id)
    .execute(store.pool())
    .await;
    assert!(raw.is_err());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_failed_sync_rolls_back() {
    let store = setup_store().await;
    let mut broken = simple_manifest("crm", "tenant");
    // 超出列宽，写入时失败
    broken.version = "v".repeat(200);

    let result = sync_service(&store)
        .sync_definitions(&[hrm_manifest(), broken], &all_scope())
        .await;
    assert!(result.is_err());
    assert!(store.find_module("hrm").await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_sync_removes_grants_of_deleted_nodes() {
    let store = setup_store().await;
    sync_service(&store)
        .sync_definitions(&[hrm_manifest()], &all_scope())
        .await
        .unwrap();

    let role = store
        .create_role(&erp_access::models::role::CreateRoleRequest {
            name: "Clerk".to_string(),
            guard_name: "web".to_string(),
            scope: Default::default(),
            description: None,
        })
        .await
        .unwrap();
    let node = component_ref(&store, "hrm.employees.employee-directory.view").await;
    store
        .insert_grant(
            role.id,
            GrantSpec {
                node,
                access_scope: AccessScope::All,
            },
            GrantWriteMode::Reject,
        )
        .await
        .unwrap();

    let report = sync_service(&store)
        .sync_definitions(&[], &all_scope())
        .await
        .unwrap();
    assert_eq!(report.modules.removed, 1);
    assert_eq!(report.grants_removed, 1);

    let left: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM role_module_access")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(left.0, 0);
}
