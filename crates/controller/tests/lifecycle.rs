//! End-to-end certificate and state lifecycle tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use sitefleet_common::{CertificateType, SiteState};
use sitefleet_controller::certs::{
    generate_self_signed, parse_certificate, CertificateEngine, CertificateMonitor, CertificatePolicy,
};
use sitefleet_controller::notifications::Notifier;
use sitefleet_controller::state::{ClusterBackend, FileStore, StateManager};

async fn file_backed(dir: &tempfile::TempDir) -> Arc<StateManager> {
    let state = Arc::new(StateManager::new());
    state
        .init(Arc::new(FileStore::new(dir.path().join("state.json"))))
        .await
        .unwrap();
    state
}

#[tokio::test]
async fn test_expiring_self_signed_is_renewed() {
    let dir = tempfile::tempdir().unwrap();
    let state = file_backed(&dir).await;

    let now = Utc::now();
    let domains = vec!["blog.example".to_string(), "www.blog.example".to_string()];
    let expiring = generate_self_signed(&domains, now - ChronoDuration::days(364), now + ChronoDuration::days(1))
        .unwrap();
    let old_not_after = expiring.not_after.unwrap();
    let old_id = state.store_certificate(expiring).await.unwrap();

    let mut site = SiteState::new("blog.example").with_aliases(["www.blog.example"]);
    site.generated_tls_id = Some(old_id.clone());
    state.add_site(site).await.unwrap();

    let engine = Arc::new(CertificateEngine::new(Arc::clone(&state), CertificatePolicy::default()));
    let monitor = CertificateMonitor::new(Arc::clone(&state), engine, Arc::new(Notifier::new()));

    let report = monitor.check_all_at(now).await.unwrap();
    assert_eq!(report.renewed, vec!["blog.example".to_string()]);
    assert!(report.errors.is_empty());

    let site = state.get_site("blog.example").unwrap();
    let new_id = site.generated_tls_id.clone().unwrap();
    assert_ne!(new_id, old_id);
    assert!(state.get_certificate(&old_id).is_err());

    let record = state.get_certificate_record(&new_id).unwrap();
    assert_eq!(record.cert_type, CertificateType::SelfSigned);
    assert!(record.not_after.unwrap() > old_not_after);

    let (_, cert_pem) = state.get_certificate(&new_id).unwrap();
    let info = parse_certificate(&cert_pem).unwrap();
    assert_eq!(info.domains, site.all_domains());

    // A second pass finds nothing left to do
    let report = monitor.check_all_at(now).await.unwrap();
    assert!(report.renewed.is_empty());

    // The renewed state survives a restart
    let reloaded = file_backed(&dir).await;
    assert_eq!(
        reloaded.get_site("blog.example").unwrap().generated_tls_id,
        Some(new_id)
    );
}

#[tokio::test]
async fn test_undrained_changes_coalesce() {
    let dir = tempfile::tempdir().unwrap();
    let state = file_backed(&dir).await;
    let mut subscription = state.subscribe();

    state.add_site(SiteState::new("a.example")).await.unwrap();
    assert!(subscription.try_changed());
    assert!(!subscription.try_changed());

    state.add_site(SiteState::new("b.example")).await.unwrap();
    state.add_site(SiteState::new("c.example")).await.unwrap();
    assert!(subscription.try_changed());
    assert!(!subscription.try_changed());

    assert_eq!(state.snapshot().unwrap().sites.len(), 3);
}

#[tokio::test]
async fn test_cluster_members_share_state() {
    let backend = ClusterBackend::new();

    let first = Arc::new(StateManager::new());
    first
        .init(Arc::new(backend.connect(Duration::from_secs(5))))
        .await
        .unwrap();
    let second = Arc::new(StateManager::new());
    second
        .init(Arc::new(backend.connect(Duration::from_secs(5))))
        .await
        .unwrap();

    let mut watching = second.subscribe();
    first.add_site(SiteState::new("shop.example")).await.unwrap();

    assert!(watching.try_changed());
    assert!(second.get_site("shop.example").is_some());

    // Writes from either member build on the shared state
    second.add_site(SiteState::new("blog.example")).await.unwrap();
    assert_eq!(first.snapshot().unwrap().sites.len(), 2);

    // Exactly one member leads
    let leaders = [first.is_leader().await, second.is_leader().await];
    assert_eq!(leaders.iter().filter(|l| **l).count(), 1);
}
