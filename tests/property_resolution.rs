//! Property-based tests for resolution over random acyclic graphs.

use async_trait::async_trait;
use ferrous_lifecycle::{DiResult, RegisterOptions, Service, ServiceRegistry};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

struct Node {
    name: String,
    log: Log,
}

#[async_trait]
impl Service for Node {
    async fn cleanup(&self) -> DiResult<()> {
        self.log.lock().unwrap().push(self.name.clone());
        Ok(())
    }
}

/// Node `i` may only depend on nodes with a smaller index, so the graph is acyclic.
fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        (0..n)
            .map(|i| proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i))
            .collect::<Vec<_>>()
    })
}

fn name(i: usize) -> String {
    format!("svc{i}")
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn every_service_built_once_after_its_dependencies(graph in dag(), root_pick in any::<prop::sample::Index>()) {
        let built: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let torn_down = Log::default();
        let registry = ServiceRegistry::new();

        for (i, deps) in graph.iter().enumerate() {
            let (built, log) = (built.clone(), torn_down.clone());
            registry.register(
                name(i),
                move |ctx| {
                    let (built, log) = (built.clone(), log.clone());
                    async move {
                        let name = ctx.name().to_string();
                        *built.lock().unwrap().entry(name.clone()).or_default() += 1;
                        Ok(Node { name, log })
                    }
                },
                RegisterOptions::new().depends_on(deps.iter().map(|&d| name(d))),
            );
        }

        let root = name(root_pick.index(graph.len()));
        let rt = runtime();
        rt.block_on(async {
            let first = registry.resolve(&root).await.unwrap();
            let again = registry.resolve(&root).await.unwrap();
            prop_assert!(Arc::ptr_eq(&first, &again));

            for i in 0..graph.len() {
                registry.resolve(&name(i)).await.unwrap();
            }

            let order = registry.construction_order();
            prop_assert_eq!(order.len(), graph.len());
            prop_assert!(built.lock().unwrap().values().all(|&count| count == 1));

            let position: HashMap<&str, usize> =
                order.iter().enumerate().map(|(p, n)| (n.as_str(), p)).collect();
            for (i, deps) in graph.iter().enumerate() {
                for &d in deps {
                    prop_assert!(position[name(d).as_str()] < position[name(i).as_str()]);
                }
            }

            registry.teardown_all().await.unwrap();
            let mut expected = order.clone();
            expected.reverse();
            prop_assert_eq!(&*torn_down.lock().unwrap(), &expected);
            Ok(())
        })?;
    }

    #[test]
    fn acyclic_graphs_always_validate(graph in dag()) {
        let registry = ServiceRegistry::new();
        for (i, deps) in graph.iter().enumerate() {
            registry.register(
                name(i),
                |_| async { Ok(Node { name: String::new(), log: Log::default() }) },
                RegisterOptions::new().depends_on(deps.iter().map(|&d| name(d))),
            );
        }
        let result = registry.validate();
        prop_assert!(result.is_valid(), "{}", result.format_issues());
        prop_assert!(!registry.dependency_graph().metadata.has_circular_dependencies);
    }
}
