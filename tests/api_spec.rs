//! Status API behavior over a seeded snapshot map.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use tokio::sync::RwLock;

use logbook::api::create_router;
use logbook::scheduler::{ProjectStatus, StatusMap};

fn status(name: &str) -> ProjectStatus {
    ProjectStatus {
        name: name.to_string(),
        root: PathBuf::from(format!("/home/sam/{name}")),
        phase: "idle".to_string(),
        bytes_pending: 0,
        session_count: 4,
        last_activity: Some(Utc.with_ymd_and_hms(2026, 8, 6, 9, 30, 0).unwrap()),
        last_extract_time: Some(Utc.with_ymd_and_hms(2026, 8, 6, 9, 31, 0).unwrap()),
        current_task: Some("Ship the importer".to_string()),
        loose_threads: vec!["Backfill old data".to_string()],
    }
}

fn setup(seed: Vec<ProjectStatus>) -> TestServer {
    let map: StatusMap = Arc::new(RwLock::new(HashMap::new()));
    {
        let map = map.clone();
        let mut guard = map.try_write().expect("fresh map is uncontended");
        for entry in seed {
            guard.insert(entry.name.clone(), entry);
        }
    }
    let app = create_router(map);
    TestServer::new(app).expect("Failed to create test server")
}

#[tokio::test]
async fn health_reports_ok() {
    let server = setup(vec![]);

    let response = server.get("/api/v1/health").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({ "status": "ok" }));
}

mod status_listing {
    use super::*;

    #[tokio::test]
    async fn empty_when_nothing_is_tracked() {
        let server = setup(vec![]);

        let response = server.get("/api/v1/status").await;
        response.assert_status_ok();
        let all: Vec<ProjectStatus> = response.json();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn lists_projects_sorted_by_name() {
        let server = setup(vec![status("zebra"), status("alpha")]);

        let response = server.get("/api/v1/status").await;
        response.assert_status_ok();
        let all: Vec<ProjectStatus> = response.json();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha");
        assert_eq!(all[1].name, "zebra");
    }

    #[tokio::test]
    async fn carries_extraction_bookkeeping() {
        let server = setup(vec![status("alpha")]);

        let all: Vec<ProjectStatus> = server.get("/api/v1/status").await.json();
        assert_eq!(all[0].session_count, 4);
        assert!(all[0].last_extract_time.is_some());
        assert_eq!(all[0].current_task.as_deref(), Some("Ship the importer"));
    }
}

mod project_lookup {
    use super::*;

    #[tokio::test]
    async fn returns_the_named_project() {
        let server = setup(vec![status("alpha"), status("beta")]);

        let response = server.get("/api/v1/projects/beta").await;
        response.assert_status_ok();
        let found: ProjectStatus = response.json();
        assert_eq!(found.name, "beta");
        assert_eq!(found.loose_threads, vec!["Backfill old data"]);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let server = setup(vec![status("alpha")]);

        let response = server.get("/api/v1/projects/missing").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }
}
