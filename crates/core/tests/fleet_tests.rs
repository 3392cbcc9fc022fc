mod common;

use appkeeper_core::model::ProcessStatus;
use common::{app, Harness};

#[tokio::test]
async fn undeclared_managed_app_is_removed_everywhere() {
    let h = Harness::new();
    for id in ["X", "Y", "Z"] {
        h.seed_installed(id, 1);
        h.supervisor.insert(&format!("managed.{id}"), ProcessStatus::Online);
    }
    h.supervisor.insert("unrelated", ProcessStatus::Online);

    let report = h.fleet(&["true"]).cleanup_orphans(&[app("X", "x"), app("Y", "y")]).await;

    assert_eq!(report.removed, vec!["Z".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(
        h.supervisor.names(),
        vec!["managed.X".to_string(), "managed.Y".to_string(), "unrelated".to_string()]
    );
    assert!(h.app_dir("X").is_dir());
    assert!(h.app_dir("Y").is_dir());
    assert!(!h.app_dir("Z").exists());
    assert!(!h.supervisor.persisted_names().contains(&"managed.Z".to_string()));
}

#[tokio::test]
async fn stray_directories_are_removed_only_when_they_hold_state() {
    let h = Harness::new();
    h.seed_installed("old", 3);
    std::fs::create_dir_all(h.app_dir("notes")).unwrap();
    std::fs::write(h.app_dir("notes").join("readme.txt"), "keep me").unwrap();
    std::fs::create_dir_all(h.app_dir("half")).unwrap();
    std::fs::write(h.app_dir("half").join(".staged"), r#"{"release_id":2}"#).unwrap();

    let report = h.fleet(&["true"]).cleanup_orphans(&[]).await;

    assert_eq!(report.removed, vec!["half".to_string(), "old".to_string()]);
    assert!(!h.app_dir("old").exists());
    assert!(!h.app_dir("half").exists());
    assert!(h.app_dir("notes").join("readme.txt").exists());
}

#[tokio::test]
async fn missing_apps_root_is_not_an_error() {
    let h = Harness::new();
    let report = h.fleet(&["true"]).cleanup_orphans(&[app("a", "a")]).await;
    assert!(report.removed.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn one_failing_app_does_not_stop_the_others() {
    let h = Harness::new();
    h.publish("good", 10, "v10");
    let apps = vec![app("broken", "no-such-repo"), app("good", "good")];

    let report = h.fleet(&["true"]).reconcile_all(&apps).await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "broken");
    assert!(report.failed[0].1.starts_with("resolve-release:"), "{}", report.failed[0].1);
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.succeeded[0].0, "good");
    assert_eq!(h.supervisor.status("managed.good"), Some(ProcessStatus::Online));
    assert!(!report.is_clean());
}

#[tokio::test]
async fn cleanup_failures_do_not_block_installs() {
    let h = Harness::new();
    h.publish("web", 1, "v1");
    h.seed_installed("gone", 1);
    h.supervisor.insert("managed.gone", ProcessStatus::Online);
    h.supervisor.fail_on("delete");

    let report = h.fleet(&["true"]).reconcile_all(&[app("web", "web")]).await;

    assert_eq!(report.cleanup.failed.len(), 1);
    assert_eq!(report.cleanup.failed[0].0, "managed.gone");
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(h.supervisor.status("managed.gone"), Some(ProcessStatus::Online));
    assert!(h.app_dir("gone").is_dir());
    assert!(h.app_dir("web").join("server.js").exists());
}

#[tokio::test]
async fn second_cycle_is_a_no_op() {
    let h = Harness::new();
    h.publish("a", 1, "v1");
    h.publish("b", 2, "v2");
    let apps = vec![app("a", "a"), app("b", "b")];
    let fleet = h.fleet(&["true"]);

    let first = fleet.reconcile_all(&apps).await;
    assert!(first.is_clean());
    let second = fleet.reconcile_all(&apps).await;
    assert!(second.is_clean());

    assert_eq!(h.downloader.downloads().len(), 2);
    assert!(second.succeeded.iter().all(|(_, o)| !o.installed && !o.record_written));
    assert_eq!(h.supervisor.connects(), h.supervisor.disconnects());
}

#[tokio::test]
async fn unreachable_supervisor_skips_cleanup_entirely() {
    let h = Harness::new();
    h.seed_installed("old", 1);
    h.supervisor.fail_on("connect");

    let report = h.fleet(&["true"]).cleanup_orphans(&[]).await;

    assert!(report.removed.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(h.app_dir("old").is_dir());
}
