use async_trait::async_trait;
use ferrous_lifecycle::{DiError, DiObserver, DiResult, RegisterOptions, Service, ServiceRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

struct Fragile {
    name: &'static str,
    fail: bool,
    log: Log,
}

#[async_trait]
impl Service for Fragile {
    async fn cleanup(&self) -> DiResult<()> {
        self.log.lock().unwrap().push(self.name.to_string());
        if self.fail {
            Err(DiError::failed(format!("{} refused to stop", self.name)))
        } else {
            Ok(())
        }
    }
}

fn fragile(registry: &ServiceRegistry, log: &Log, name: &'static str, fail: bool, deps: &[&str]) {
    let log = log.clone();
    registry.register(
        name,
        move |_| {
            let log = log.clone();
            async move { Ok(Fragile { name, fail, log }) }
        },
        RegisterOptions::new().depends_on(deps.iter().copied()),
    );
}

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl DiObserver for Events {
    fn resolving(&self, _name: &str) {}

    fn resolved(&self, name: &str, _duration: Duration) {
        self.0.lock().unwrap().push(format!("resolved {name}"));
    }

    fn torn_down(&self, name: &str) {
        self.0.lock().unwrap().push(format!("torn down {name}"));
    }

    fn teardown_failed(&self, name: &str, _error: &DiError) {
        self.0.lock().unwrap().push(format!("teardown failed {name}"));
    }
}

#[tokio::test]
async fn test_failures_are_aggregated_and_teardown_continues() {
    let log = Log::default();
    let registry = ServiceRegistry::new();
    fragile(&registry, &log, "db", false, &[]);
    fragile(&registry, &log, "cache", true, &["db"]);
    fragile(&registry, &log, "api", true, &["cache"]);
    fragile(&registry, &log, "web", false, &["api"]);

    registry.resolve("web").await.unwrap();
    let err = registry.teardown_all().await.err().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["web", "api", "cache", "db"]);
    match err {
        DiError::Teardown(failures) => {
            let names: Vec<_> = failures.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["api", "cache"]);
            assert_eq!(failures[0].error.to_string(), "api refused to stop");
        }
        other => panic!("expected teardown error, got {other:?}"),
    }

    // Cleared even though cleanup failed.
    assert!(registry.construction_order().is_empty());
    assert!(!registry.is_instantiated("db"));
}

#[tokio::test]
async fn test_teardown_of_empty_registry_is_ok() {
    let registry = ServiceRegistry::new();
    assert!(registry.teardown_all().await.is_ok());
}

#[tokio::test]
async fn test_second_teardown_is_a_no_op() {
    let log = Log::default();
    let registry = ServiceRegistry::new();
    fragile(&registry, &log, "db", false, &[]);

    registry.resolve("db").await.unwrap();
    registry.teardown_all().await.unwrap();
    registry.teardown_all().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["db"]);
}

#[tokio::test]
async fn test_observers_see_resolution_and_teardown() {
    let log = Log::default();
    let events = Arc::new(Events::default());
    let registry = ServiceRegistry::new();
    registry.add_observer(events.clone());
    fragile(&registry, &log, "db", false, &[]);
    fragile(&registry, &log, "api", true, &["db"]);

    registry.resolve("api").await.unwrap();
    let _ = registry.teardown_all().await;

    assert_eq!(
        *events.0.lock().unwrap(),
        vec!["resolved db", "resolved api", "teardown failed api", "torn down db"]
    );
}

#[tokio::test]
async fn test_reset_skips_cleanup_and_allows_rebuild() {
    let log = Log::default();
    let registry = ServiceRegistry::new();
    fragile(&registry, &log, "db", false, &[]);
    fragile(&registry, &log, "api", false, &["db"]);

    registry.resolve("api").await.unwrap();
    assert_eq!(registry.reset(), 2);
    assert!(log.lock().unwrap().is_empty());
    assert!(registry.dependency_edges().is_empty());

    registry.resolve("api").await.unwrap();
    assert_eq!(registry.construction_order(), vec!["db", "api"]);
}
