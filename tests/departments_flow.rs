mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, read_json, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct DepartmentResponse {
    id: Uuid,
    name: String,
    email: String,
    can_sign_in: bool,
}

#[derive(Deserialize)]
struct Me {
    username: String,
    role: String,
    department: Option<String>,
}

async fn create_department(
    app: &TestApp,
    token: &str,
    name: &str,
    email: &str,
    password: &str,
) -> Result<DepartmentResponse> {
    let response = app
        .post_json(
            "/api/departments",
            &json!({ "name": name, "email": email, "password": password }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

async fn me(app: &TestApp, token: &str) -> Result<Me> {
    let response = app.get("/api/auth/me", Some(token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

#[tokio::test]
async fn department_registry_crud() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.auditor_token().await?;

    let response = app
        .post_json(
            "/api/departments",
            &json!({ "name": " Finance ", "email": "Finance@Railways.gov.in", "password": "ledger-pass" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let finance: DepartmentResponse = read_json(response).await?;
    assert_eq!(finance.name, "Finance");
    assert_eq!(finance.email, "finance@railways.gov.in");
    assert!(finance.can_sign_in);

    let response = app
        .post_json(
            "/api/departments",
            &json!({ "name": "FINANCE", "email": "other@railways.gov.in", "password": "ledger-pass" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(
            "/api/departments",
            &json!({ "name": "Stores", "email": "not-an-email", "password": "ledger-pass" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/departments",
            &json!({ "name": "Stores", "email": "stores@railways.gov.in", "password": " " }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/departments",
            &json!({ "name": "Stores", "email": "stores@railways.gov.in", "password": "ledger-pass" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .patch_json(
            &format!("/api/departments/{}", finance.id),
            &json!({ "email": "accounts@railways.gov.in" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: DepartmentResponse = read_json(response).await?;
    assert_eq!(updated.name, "Finance");
    assert_eq!(updated.email, "accounts@railways.gov.in");

    let listed: Vec<DepartmentResponse> =
        read_json(app.get("/api/departments", Some(&token)).await?).await?;
    let names: Vec<&str> = listed.iter().map(|dept| dept.name.as_str()).collect();
    assert_eq!(names, vec!["Finance", "Stores"]);

    let response = app
        .delete(&format!("/api/departments/{}", finance.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app
        .get(&format!("/api/departments/{}", finance.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn department_users_cannot_edit_the_registry() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.department_token("Stores").await?;

    let response = app
        .post_json(
            "/api/departments",
            &json!({ "name": "Stores", "email": "stores@railways.gov.in", "password": "ledger-pass" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/departments", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn departments_sign_in_with_their_registry_email() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.auditor_token().await?;
    let finance =
        create_department(&app, &token, "Finance", "finance@railways.gov.in", "ledger-pass").await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "Finance@Railways.gov.in", "password": "ledger-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let department_token = app.login_token("finance@railways.gov.in", "ledger-pass").await?;
    let signed_in = me(&app, &department_token).await?;
    assert_eq!(signed_in.username, "finance@railways.gov.in");
    assert_eq!(signed_in.role, "department");
    assert_eq!(signed_in.department.as_deref(), Some("Finance"));

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "finance@railways.gov.in", "password": "wrong" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let password_path = format!("/api/departments/{}/password", finance.id);
    let response = app
        .put_json(&password_path, &json!({ "password": "" }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app
        .put_json(&password_path, &json!({ "password": "rotated-pass" }), Some(&department_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .put_json(&password_path, &json!({ "password": "rotated-pass" }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "finance@railways.gov.in", "password": "ledger-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    app.login_token("finance@railways.gov.in", "rotated-pass").await?;

    let response = app
        .put_json(
            &format!("/api/departments/{}/password", Uuid::new_v4()),
            &json!({ "password": "rotated-pass" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn renaming_and_deleting_carry_department_logins() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.auditor_token().await?;
    let finance =
        create_department(&app, &token, "Finance", "finance@railways.gov.in", "ledger-pass").await?;
    app.insert_user("finance-clerk", "clerk-pass", "department", Some("finance"))
        .await?;
    app.insert_user("stores-clerk", "clerk-pass", "department", Some("Stores"))
        .await?;

    let response = app
        .patch_json(
            &format!("/api/departments/{}", finance.id),
            &json!({ "name": "Accounts" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let clerk = app.login_token("finance-clerk", "clerk-pass").await?;
    assert_eq!(me(&app, &clerk).await?.department.as_deref(), Some("Accounts"));
    let registry = app.login_token("finance@railways.gov.in", "ledger-pass").await?;
    assert_eq!(me(&app, &registry).await?.department.as_deref(), Some("Accounts"));

    let response = app
        .delete(&format!("/api/departments/{}", finance.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    for login in ["finance-clerk", "finance@railways.gov.in"] {
        let password = if login == "finance-clerk" { "clerk-pass" } else { "ledger-pass" };
        let response = app
            .post_json(
                "/api/auth/login",
                &json!({ "username": login, "password": password }),
                None,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    app.login_token("stores-clerk", "clerk-pass").await?;

    app.cleanup().await?;
    Ok(())
}
