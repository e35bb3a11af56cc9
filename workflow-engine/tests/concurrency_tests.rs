//! Concurrent voting and optimistic concurrency behaviour

use async_trait::async_trait;
use mockall::mock;
use std::sync::Arc;
use uuid::Uuid;
use workflow_engine::*;

mock! {
    pub Requests {}

    #[async_trait]
    impl RequestStore for Requests {
        async fn insert(&self, instance: RequestInstance) -> StoreResult<()>;
        async fn get(&self, id: Uuid) -> StoreResult<Option<RequestInstance>>;
        async fn update(&self, instance: RequestInstance, expected_version: u64) -> StoreResult<RequestInstance>;
        async fn list_pending(&self) -> StoreResult<Vec<RequestInstance>>;
        async fn list_awaiting(&self, approver_id: &str) -> StoreResult<Vec<RequestInstance>>;
        async fn list_by_requester(&self, requester_id: &str) -> StoreResult<Vec<RequestInstance>>;
    }
}

fn reviewers(n: usize) -> (InMemoryIdentityDirectory, Vec<String>) {
    let directory = InMemoryIdentityDirectory::new().with_identity("alice", Some("bob"), &[]);
    let names: Vec<String> = (0..n).map(|i| format!("reviewer-{}", i)).collect();
    for name in &names {
        directory.add_identity(name, None, &["reviewer"]);
    }
    (directory, names)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_advance_exactly_once() {
    const N: usize = 4;
    let (directory, names) = reviewers(N);
    let (notifier, mut events) = ChannelNotifier::channel();
    let engine = Arc::new(
        ApprovalEngine::builder()
            .identity_provider(Arc::new(directory))
            .notifier(Arc::new(notifier))
            .build()
            .unwrap(),
    );
    let flow = engine
        .publish_flow(
            FlowDefinition::builder("purchase", Module::Purchase)
                .add_step(StepDefinition::new(1, ApproverStrategy::role("reviewer")).parallel(N as u32))
                .add_step(StepDefinition::new(2, ApproverStrategy::fixed("director")))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    let request = engine.submit(SubmitRequest::new(flow.id, "alice", "po-1")).await.unwrap();

    let handles: Vec<_> = names
        .into_iter()
        .map(|name| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.record_decision(request.id, &name, Decision::Approve, None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = engine.get(request.id).await.unwrap();
    assert_eq!(stored.current_step, 2);
    assert_eq!(stored.approvals_at(1), N);
    assert_eq!(stored.version, 1 + N as u64);
    assert_eq!(
        stored.history.iter().filter(|h| h.action == HistoryAction::StepAdvanced).count(),
        1
    );

    let mut director_notices = 0;
    while let Ok(event) = events.try_recv() {
        if event.target_identity == "director" {
            director_notices += 1;
        }
    }
    assert_eq!(director_notices, 1);
}

#[tokio::test]
async fn test_persistent_conflicts_surface_as_concurrent_modification() {
    let (directory, _) = reviewers(1);
    let directory = Arc::new(directory);
    let flows = Arc::new(InMemoryFlowStore::new());

    // Produce a real pending request first
    let seed = ApprovalEngine::builder()
        .identity_provider(directory.clone())
        .flow_store(flows.clone())
        .build()
        .unwrap();
    let flow = seed
        .publish_flow(
            FlowDefinition::builder("leave", Module::Leave)
                .add_step(StepDefinition::new(1, ApproverStrategy::RequesterManager))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    let request = seed.submit(SubmitRequest::new(flow.id, "alice", "leave-1")).await.unwrap();

    let config = EngineConfig::default();
    let attempts = config.max_retries as usize + 1;

    let mut requests = MockRequests::new();
    let snapshot = request.clone();
    requests
        .expect_get()
        .times(attempts)
        .returning(move |_| Ok(Some(snapshot.clone())));
    requests
        .expect_update()
        .times(attempts)
        .returning(|instance, expected| Err(StoreError::VersionConflict { id: instance.id, expected }));

    let engine = ApprovalEngine::builder()
        .identity_provider(directory)
        .flow_store(flows)
        .request_store(Arc::new(requests))
        .config(config)
        .build()
        .unwrap();

    let err = engine
        .record_decision(request.id, "bob", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ConcurrentModification(id) if id == request.id));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_conflict_then_success_retries_against_fresh_state() {
    let (directory, _) = reviewers(1);
    let directory = Arc::new(directory);
    let flows = Arc::new(InMemoryFlowStore::new());
    let seed = ApprovalEngine::builder()
        .identity_provider(directory.clone())
        .flow_store(flows.clone())
        .build()
        .unwrap();
    let flow = seed
        .publish_flow(
            FlowDefinition::builder("leave", Module::Leave)
                .add_step(StepDefinition::new(1, ApproverStrategy::RequesterManager))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    let request = seed.submit(SubmitRequest::new(flow.id, "alice", "leave-2")).await.unwrap();

    let mut requests = MockRequests::new();
    let snapshot = request.clone();
    requests.expect_get().times(2).returning(move |_| Ok(Some(snapshot.clone())));

    let mut seq = mockall::Sequence::new();
    requests
        .expect_update()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|instance, expected| Err(StoreError::VersionConflict { id: instance.id, expected }));
    requests
        .expect_update()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|mut instance, expected| {
            instance.version = expected + 1;
            Ok(instance)
        });

    let engine = ApprovalEngine::builder()
        .identity_provider(directory)
        .flow_store(flows)
        .request_store(Arc::new(requests))
        .build()
        .unwrap();

    let approved = engine.record_decision(request.id, "bob", Decision::Approve, None).await.unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.version, 2);
}
