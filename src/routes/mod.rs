use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod departments;
pub mod elements;
pub mod files;
pub mod health;
pub mod rejoinder;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());
    let body_limit = state.config.max_upload_bytes;

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let files_routes = Router::new()
        .route("/", get(files::list_files).post(files::upload_file))
        .route("/document-types", get(files::list_document_types))
        .route("/dashboard", get(files::dashboard))
        .route("/by-department", get(files::files_by_department))
        .route("/:id", get(files::get_file).delete(files::delete_file))
        .route("/:id/download", get(files::download_file))
        .route("/:id/preview", get(files::preview_segmentation))
        .route("/:id/schedule", patch(files::update_schedule))
        .route("/:id/final-remarks", put(files::update_final_remarks))
        .route("/:id/departments", get(files::file_departments))
        .route("/:id/freeze-check", get(files::freeze_check))
        .route("/:id/freeze", post(files::freeze_file))
        .route("/:id/frozen", get(files::frozen_status))
        .route("/:id/elements", put(elements::bulk_upsert_elements))
        .route("/:id/elements/resync", post(elements::resync_elements))
        .route(
            "/:id/elements/:para_id/split",
            post(elements::split_element),
        )
        .route("/:id/tables", post(elements::insert_table))
        .route("/:id/rejoinder", get(rejoinder::get_rejoinder))
        .route("/:id/rejoinder/rounds", post(rejoinder::open_round));

    let elements_routes = Router::new()
        .route(
            "/:para_id/department-remarks",
            post(elements::submit_department_remark),
        )
        .route(
            "/:para_id/rejoinder/departments",
            put(rejoinder::set_rejoinder_departments),
        )
        .route(
            "/:para_id/rejoinder/:round/remark",
            put(rejoinder::set_rejoinder_remark),
        )
        .route(
            "/:para_id/rejoinder/:round/final-remark",
            put(rejoinder::set_rejoinder_final_remark),
        )
        .route(
            "/:para_id/rejoinder/:round/replies",
            post(rejoinder::submit_reply),
        );

    let departments_routes = Router::new()
        .route(
            "/",
            get(departments::list_departments).post(departments::create_department),
        )
        .route(
            "/:id",
            get(departments::get_department)
                .patch(departments::update_department)
                .delete(departments::delete_department),
        )
        .route(
            "/:id/password",
            put(departments::update_department_password),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/files", files_routes)
        .nest("/api/elements", elements_routes)
        .nest("/api/departments", departments_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
