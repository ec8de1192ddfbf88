use cli::report::RunReport;
use providers::ProviderKind;
use std::fs;
use tagger_core::config::{AppConfig, GoogleVisionSettings, VisualRecognitionSettings};
use tagger_core::export::{self, OutputFormat};
use tagger_core::models::FailureKind;
use tagger_core::pipeline::{self, RunOptions};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn labels(n: usize, label: &str) -> serde_json::Value {
    let responses: Vec<_> = (0..n)
        .map(|_| serde_json::json!({"labelAnnotations": [{"description": label, "score": 0.9}]}))
        .collect();
    serde_json::json!({ "responses": responses })
}

fn google_only(server: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.run.batch_delay_ms = 0;
    cfg.providers.google_vision = Some(GoogleVisionSettings {
        api_key: Some("g-key".to_string()),
        base_url: Some(server.uri()),
        enabled: true,
        ..Default::default()
    });
    cfg
}

#[tokio::test]
async fn test_full_pipeline() {
    let temp = tempdir().unwrap();
    for i in 0..25 {
        fs::write(temp.path().join(format!("img{i:02}.jpg")), b"fake_image_bytes").unwrap();
    }
    fs::write(temp.path().join("notes.txt"), "not an image").unwrap();

    let server = MockServer::start().await;
    // Batches go out in order: 10 images, 10 images, 5 images.
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(labels(10, "Sky")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(labels(5, "Sea")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "images": [
                {"image": "images.zip/img03.jpg", "classifiers": [{"classes": [{"class": "beach", "score": 0.31}]}]},
                {"image": "images.zip/img21.jpg", "classifiers": [{"classes": [{"class": "dog", "score": 0.77}]}]}
            ],
            "images_processed": 25
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = google_only(&server);
    cfg.providers.visual_recognition = Some(VisualRecognitionSettings {
        api_key: Some("vr-key".to_string()),
        base_url: Some(format!("{}/", server.uri())),
        enabled: true,
        ..Default::default()
    });

    let outcome = pipeline::run(&cfg, temp.path(), RunOptions::default())
        .await
        .unwrap();
    let table = &outcome.table;

    assert_eq!(table.row_count(), 25);
    assert_eq!(table.columns(), &ProviderKind::ALL);
    for i in 0..10 {
        let id = format!("img{i:02}.jpg");
        assert_eq!(table.cell(&id, ProviderKind::GoogleVision).unwrap()[0].label, "Sky");
    }
    for i in 10..20 {
        let id = format!("img{i:02}.jpg");
        assert!(table.cell(&id, ProviderKind::GoogleVision).is_none(), "{id} should have no data");
    }
    for i in 20..25 {
        let id = format!("img{i:02}.jpg");
        assert_eq!(table.cell(&id, ProviderKind::GoogleVision).unwrap()[0].label, "Sea");
    }

    let beach = table.cell("img03.jpg", ProviderKind::VisualRecognition).unwrap();
    assert_eq!(beach[0].label, "beach");
    assert!((beach[0].confidence - 0.31).abs() < 1e-6);
    assert!(table.cell("img21.jpg", ProviderKind::VisualRecognition).is_some());
    assert!(table.cell("img04.jpg", ProviderKind::VisualRecognition).is_none());
    assert!(table.cell("img03.jpg", ProviderKind::Clarifai).is_none());

    let report = RunReport::from(&outcome);
    assert_eq!(report.association_failures, 0);
    let google = report
        .providers
        .iter()
        .find(|p| p.provider == ProviderKind::GoogleVision)
        .unwrap();
    assert_eq!(google.batches_planned, 3);
    assert_eq!(google.batches_issued, 3);
    assert_eq!(google.failures.len(), 1);
    assert_eq!(google.images_with_tags, 15);

    let mut csv = Vec::new();
    export::write_table(table, OutputFormat::Csv, &mut csv).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().count(), 26);
    assert_eq!(
        csv.lines().next().unwrap(),
        "image,visual_recognition,clarifai,imagga,google_vision"
    );
}

#[tokio::test]
async fn short_response_is_an_association_failure() {
    let temp = tempdir().unwrap();
    for i in 0..10 {
        fs::write(temp.path().join(format!("p{i}.png")), b"png").unwrap();
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(labels(9, "Tree")))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = pipeline::run(&google_only(&server), temp.path(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.association_failures(), 1);
    assert_eq!(outcome.table.row_count(), 10);
    assert!(outcome
        .table
        .rows()
        .iter()
        .all(|row| row.cells.iter().all(|c| c.is_none())));

    let report = RunReport::from(&outcome);
    assert_eq!(report.association_failures, 1);
    assert!(report.summary_lines()[0].starts_with("google_vision: 0 of 10 images tagged"));
}

#[tokio::test]
async fn unreadable_vendor_body_only_loses_its_batch() {
    let temp = tempdir().unwrap();
    for i in 0..15 {
        fs::write(temp.path().join(format!("img{i:02}.jpg")), b"jpg").unwrap();
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"unexpected": true})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(labels(5, "Field")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let outcome = pipeline::run(&google_only(&server), temp.path(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.table.row_count(), 15);
    for i in 0..10 {
        let id = format!("img{i:02}.jpg");
        assert!(outcome.table.cell(&id, ProviderKind::GoogleVision).is_none());
    }
    for i in 10..15 {
        let id = format!("img{i:02}.jpg");
        assert_eq!(
            outcome.table.cell(&id, ProviderKind::GoogleVision).unwrap()[0].label,
            "Field"
        );
    }

    let google = &outcome.runs[0];
    assert_eq!(google.batches_issued, 2);
    assert_eq!(google.failures.len(), 1);
    assert_eq!(google.failures[0].batch, 0);
    assert_eq!(google.failures[0].kind, FailureKind::Malformed);
    assert_eq!(google.failures[0].images.len(), 10);
    assert_eq!(outcome.association_failures(), 0);

    let report = serde_json::to_value(RunReport::from(&outcome)).unwrap();
    assert_eq!(report["providers"][0]["failures"][0]["kind"], "malformed");
}

#[tokio::test]
async fn provider_filter_limits_the_run() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.jpg"), b"jpg").unwrap();

    let server = MockServer::start().await;
    let mut cfg = google_only(&server);
    cfg.providers.visual_recognition = Some(VisualRecognitionSettings {
        api_key: Some("vr-key".to_string()),
        base_url: Some(server.uri()),
        enabled: true,
        ..Default::default()
    });
    Mock::given(method("POST"))
        .and(path("/v3/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"images": []})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(labels(1, "Cat")))
        .expect(1)
        .mount(&server)
        .await;

    let opts = RunOptions {
        only: vec![ProviderKind::GoogleVision],
        ..Default::default()
    };
    let outcome = pipeline::run(&cfg, temp.path(), opts).await.unwrap();
    assert_eq!(outcome.runs.len(), 1);
    assert_eq!(
        outcome.table.cell("a.jpg", ProviderKind::GoogleVision).unwrap()[0].label,
        "Cat"
    );
}
