//! Lifecycle tests for the pairing manager

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use persist_store::Persistable;
use proptest::prelude::*;
use propnet_core::prelude::*;
use propnet_pairing::{CreateArgs, PairingError, PairingManager, StaticResolver};
use rstest::rstest;
use serde_json::json;

#[derive(Debug, Clone)]
enum Op {
    Create,
    CreateBad,
    Delete(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        1 => Just(Op::CreateBad),
        2 => (0usize..8).prop_map(Op::Delete),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    /// Interleaved creates, failed creates and deletes never produce two live
    /// pairings with the same id, and both maps always agree.
    #[test]
    fn ids_stay_unique_and_maps_bijective(ops in prop::collection::vec(op(), 1..40)) {
        runtime().block_on(async {
            let manager = PairingManager::new("local");
            let mut live: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    Op::Create => {
                        let (id, _) = manager.create(CreateArgs::new()).await.unwrap();
                        assert!(!live.contains(&id), "id {id} reused while live");
                        live.push(id);
                    }
                    Op::CreateBad => {
                        let result = manager.create(CreateArgs::new().push(true).source("not a locator")).await;
                        assert!(result.is_err());
                    }
                    Op::Delete(index) => {
                        if !live.is_empty() {
                            let id = live.remove(index % live.len());
                            assert!(manager.delete_id(&id));
                        }
                    }
                }

                let ids = manager.child_ids();
                let unique: HashSet<&String> = ids.iter().collect();
                assert_eq!(unique.len(), ids.len());
                assert_eq!(unique, live.iter().collect::<HashSet<_>>());

                for id in &ids {
                    let pairing = manager.child(id).unwrap();
                    assert_eq!(manager.id_of(&pairing).as_ref(), Some(id));
                }
            }
        });
    }
}

#[rstest]
#[case(CreateArgs::new().push(true).pull(true).source("bad locator"), "src")]
#[case(CreateArgs::new().destination("/2/s/levl/v").reverse_transform("v v"), "xrev")]
#[case(CreateArgs::new().enabled(true).with(propnet_pairing::Param::Pull, json!("sometimes")), "pull")]
#[tokio::test]
async fn test_bad_argument_names_parameter(#[case] args: CreateArgs, #[case] expected: &str) {
    let manager = PairingManager::new("local");

    match manager.create(args).await {
        Err(PairingError::InvalidArguments { param, .. }) => assert_eq!(param, expected),
        other => panic!("expected invalid arguments, got {other:?}"),
    }
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_restore_round_trip_through_persisted_blob() {
    let original = PairingManager::new("local");
    for source in ["/1/s/onof/v", "/2/s/onof/v", "/3/s/onof/v"] {
        original
            .create(CreateArgs::new().source(source).push(true))
            .await
            .unwrap();
    }
    original.delete_id("2");

    let blob = original.copy_persistent_state();

    let restored = PairingManager::new("local");
    restored.init_with_persistent_state(&blob);

    assert_eq!(restored.child_ids(), vec!["1", "3"]);
    assert_eq!(restored.child("3").unwrap().source().as_deref(), Some("/3/s/onof/v"));
}

#[tokio::test]
async fn test_restored_pairing_resumes_forwarding() {
    let level = PropertyKey::new(Section::State, "levl", "v", ValueType::Number);
    let a = Arc::new(LocalEndpoint::new("a", [PropertySpec::new(level.clone())]));
    let b = Arc::new(LocalEndpoint::new("b", [PropertySpec::new(level.clone())]));

    let resolver = Arc::new(StaticResolver::new());
    resolver.insert(ResourceLink::create(a.clone(), level.clone(), "/a/s/levl/v"));
    resolver.insert(ResourceLink::create(b.clone(), level.clone(), "/b/s/levl/v"));

    let mut blob = persist_store::StateBlob::new();
    blob.insert(
        "5".into(),
        json!({
            "c/pair/src": "/a/s/levl/v",
            "c/pair/dst": "/b/s/levl/v",
            "c/pair/push": true,
            "s/enab/v": true
        }),
    );

    let manager = PairingManager::new("local").with_resolver(resolver);
    manager.init_with_persistent_state(&blob);
    assert!(manager.child("5").unwrap().is_forwarding());

    a.set_property(&level, json!(0.8)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(b.value("s/levl/v"), Some(json!(0.8)));

    manager.delete_id("5");
    a.set_property(&level, json!(0.1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(b.value("s/levl/v"), Some(json!(0.8)));
}
