//! End-to-end harvest over HTTP against a mock OAI-PMH endpoint

use oaipmh_dl::report::STATUS_REPORT_PREFIX;
use oaipmh_dl::storage::archive::count_entries;
use oaipmh_dl::{ArtifactStatus, Config, Harvester, RunKind, VerbOutcome};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(id: &str) -> String {
    format!(
        "<record><header><identifier>{id}</identifier><datestamp>2024-03-01</datestamp>\
         <setSpec>A</setSpec></header><metadata><rdf id=\"{id}\"/></metadata></record>"
    )
}

async fn mount_repository(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "ListSets"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<OAI-PMH><ListSets><set><setSpec>A</setSpec><setName>Set A</setName></set></ListSets></OAI-PMH>",
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("set", "A"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<OAI-PMH><ListRecords>{}{}<resumptionToken completeListSize=\"3\" cursor=\"0\">A-2</resumptionToken></ListRecords></OAI-PMH>",
            record("/A/one"),
            record("/A/two"),
        )))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("resumptionToken", "A-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<OAI-PMH><ListRecords>{}<resumptionToken/></ListRecords></OAI-PMH>",
            record("/A/three"),
        )))
        .expect(1)
        .mount(server)
        .await;
}

fn config(server: &MockServer, root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.harvest.endpoint = format!("{}/oai", server.uri());
    config.harvest.verb = "ListRecords".into();
    config.harvest.threads = 1;
    config.harvest.log_progress_interval = Duration::ZERO;
    config.storage.output_dir = root.to_path_buf();
    config.retry.delay = Duration::from_millis(1);
    config.notifications.slack_webhook = Some(format!("{}/slack", server.uri()));
    config
}

#[tokio::test]
async fn first_run_over_http_writes_archives_and_reports() {
    let server = MockServer::start().await;
    mount_repository(&server).await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let harvester = Harvester::new(config(&server, dir.path())).unwrap();
    let outcome = harvester.run(CancellationToken::new()).await.unwrap();

    let VerbOutcome::Harvest { run: Some(summary), .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(summary.kind, RunKind::Full);
    assert_eq!(summary.harvested, 1);
    assert_eq!(summary.record_counts.get("A"), Some(&3));
    assert_eq!(summary.failed_records.get("A"), Some(&0));
    assert_eq!(summary.status("A"), Some(ArtifactStatus::New));

    let archive = dir.path().join("XML").join("A.zip");
    assert_eq!(count_entries(&archive).unwrap(), 3);
    assert!(dir.path().join("XML").join("A.zip.md5sum").exists());

    let csv = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .find(|name| name.starts_with(STATUS_REPORT_PREFIX))
        .expect("status report written");
    let content = std::fs::read_to_string(dir.path().join(csv)).unwrap();
    assert!(content.contains("A,NEW,3,0"));
}

#[tokio::test]
async fn failing_webhook_does_not_fail_the_run() {
    let server = MockServer::start().await;
    mount_repository(&server).await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let harvester = Harvester::new(config(&server, dir.path())).unwrap();
    let outcome = harvester.run(CancellationToken::new()).await.unwrap();

    assert!(matches!(
        outcome,
        VerbOutcome::Harvest { run: Some(ref summary), .. } if summary.failed_sets.is_empty()
    ));
}

#[tokio::test]
async fn size_hint_on_an_empty_last_token_counts_missing_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("set", "S"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<OAI-PMH><ListRecords>{}{}<resumptionToken completeListSize=\"3\" cursor=\"0\"/></ListRecords></OAI-PMH>",
            record("/S/one"),
            record("/S/two"),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = config(&server, dir.path());
    config.harvest.sets = "S".into();
    config.notifications.slack_webhook = None;
    let harvester = Harvester::new(config).unwrap();

    let VerbOutcome::Harvest { run: Some(summary), .. } =
        harvester.run(CancellationToken::new()).await.unwrap()
    else {
        panic!("expected a harvest");
    };
    assert!(summary.failed_sets.is_empty());
    assert_eq!(summary.record_counts.get("S"), Some(&2));
    assert_eq!(summary.failed_records.get("S"), Some(&1));
}
