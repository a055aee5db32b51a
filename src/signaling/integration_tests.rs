//! Integration Tests for the signaling lifecycle
//!
//! Full start/suspend/terminate/provision scenarios against the in-memory
//! store, with a recording hook implementation to observe side effects.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::data_flow::{
        DataAddress, DataFlow, DataFlowState, DataFlowStore, FailureKind, FlowType,
        InMemoryDataFlowStore, StatusFailure, StatusResult,
    };
    use crate::signaling::authz::{AuthorizationHandler, Principal, ResourceContext};
    use crate::signaling::messages::{
        DataFlowProvisionMessage, DataFlowResponseMessage, DataFlowStartMessage,
    };
    use crate::signaling::sdk::{DataFlowHooks, DataPlaneSdk, ProvisionResource};
    use crate::signaling::service::SignalingService;

    /// Hook implementation that counts calls and can be told to fail
    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
        start_count: AtomicUsize,
        terminate_count: AtomicUsize,
        fail_start: Mutex<bool>,
        pending_resources: Mutex<usize>,
    }

    impl RecordingHooks {
        fn record(&self, op: &str, flow_id: &str) {
            self.calls.lock().unwrap().push(format!("{}:{}", op, flow_id));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn set_fail_start(&self, fail: bool) {
            *self.fail_start.lock().unwrap() = fail;
        }

        fn set_pending_resources(&self, n: usize) {
            *self.pending_resources.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl DataFlowHooks for RecordingHooks {
        async fn on_provision(&self, flow: &DataFlow) -> StatusResult<Vec<ProvisionResource>> {
            self.record("provision", &flow.id);
            let pending = *self.pending_resources.lock().unwrap();
            Ok((0..pending)
                .map(|i| ProvisionResource::pending(format!("{}-{}", flow.id, i), "bucket"))
                .collect())
        }

        async fn on_start(&self, flow: &DataFlow) -> StatusResult<DataFlowResponseMessage> {
            self.record("start", &flow.id);
            self.start_count.fetch_add(1, Ordering::SeqCst);
            if *self.fail_start.lock().unwrap() {
                return Err(StatusFailure::fatal("source unreachable"));
            }
            Ok(DataFlowResponseMessage::started(flow.destination.clone()))
        }

        async fn on_suspend(&self, flow: &DataFlow) -> StatusResult<()> {
            self.record("suspend", &flow.id);
            Ok(())
        }

        async fn on_terminate(&self, flow: &DataFlow) -> StatusResult<()> {
            self.record("terminate", &flow.id);
            self.terminate_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_recover(&self, flow: &DataFlow) -> StatusResult<()> {
            self.record("recover", &flow.id);
            Ok(())
        }
    }

    struct TestHarness {
        service: SignalingService,
        store: Arc<InMemoryDataFlowStore>,
        hooks: Arc<RecordingHooks>,
    }

    impl TestHarness {
        fn new() -> Self {
            let store = Arc::new(InMemoryDataFlowStore::new());
            let hooks = Arc::new(RecordingHooks::default());
            let sdk = DataPlaneSdk::builder()
                .store(store.clone())
                .runtime_id("runtime-test")
                .hooks(hooks.clone())
                .build()
                .unwrap();
            Self {
                service: SignalingService::new(sdk),
                store,
                hooks,
            }
        }

        async fn state(&self, id: &str) -> DataFlowState {
            self.service.get_transfer_state(id).await.unwrap()
        }

        async fn started(&self, id: &str) {
            self.service.start(&start_message(id)).await.unwrap();
            assert_eq!(self.state(id).await, DataFlowState::Started);
        }
    }

    fn start_message(id: &str) -> DataFlowStartMessage {
        DataFlowStartMessage {
            process_id: id.into(),
            dataset_id: "asset-1".into(),
            participant_id: "participant1".into(),
            agreement_id: "agreement-1".into(),
            source_data_address: Some(
                DataAddress::new("HttpData").with_property("baseUrl", "http://source"),
            ),
            destination_data_address: Some(
                DataAddress::new("HttpData").with_property("baseUrl", "http://sink"),
            ),
            flow_type: Some(FlowType::Push),
            transfer_type_destination: "HttpData".into(),
            ..Default::default()
        }
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// absent → STARTED in one call, response echoes the destination
    #[tokio::test]
    async fn test_start_without_resources() {
        let h = TestHarness::new();
        let msg = start_message("df1");

        let response = h.service.start(&msg).await.unwrap();

        assert!(!response.provisioning);
        assert_eq!(response.data_address, msg.destination_data_address);
        assert_eq!(h.state("df1").await, DataFlowState::Started);

        let flow = h.store.find_by_id("df1").await.unwrap().unwrap();
        assert_eq!(flow.runtime_id, "runtime-test");
        assert_eq!(flow.participant_id, "participant1");
        assert!(!flow.is_consumer);
        assert!(!flow.provision_requested);
        assert!(h.store.lease_of("df1").is_none());
        assert_eq!(h.hooks.calls(), vec!["provision:df1", "start:df1"]);
    }

    #[tokio::test]
    async fn test_start_with_default_hooks() {
        let store = Arc::new(InMemoryDataFlowStore::new());
        let sdk = DataPlaneSdk::builder().store(store).build().unwrap();
        let service = SignalingService::new(sdk);
        let msg = start_message("df1");

        let response = service.start(&msg).await.unwrap();
        assert_eq!(response.data_address, msg.destination_data_address);
        assert!(!response.provisioning);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let h = TestHarness::new();
        h.started("df1").await;

        let response = h.service.start(&start_message("df1")).await.unwrap();
        assert!(!response.provisioning);
        assert_eq!(h.hooks.start_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_start_creates_nothing() {
        let h = TestHarness::new();
        let mut msg = start_message("df1");
        msg.source_data_address = None;

        let err = h.service.start(&msg).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::BadRequest));
        assert!(h.store.is_empty());
        assert!(h.hooks.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_hook_failure_marks_failed() {
        let h = TestHarness::new();
        h.hooks.set_fail_start(true);

        let err = h.service.start(&start_message("df1")).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Fatal));

        let flow = h.store.find_by_id("df1").await.unwrap().unwrap();
        assert_eq!(flow.state, DataFlowState::Failed);
        assert_eq!(flow.error_detail.as_deref(), Some("source unreachable"));
        assert!(h.store.lease_of("df1").is_none());

        // Failed is terminal
        let err = h.service.start(&start_message("df1")).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Conflict));
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    #[tokio::test]
    async fn test_provision_completes_synchronously() {
        let h = TestHarness::new();
        let msg = DataFlowProvisionMessage::from(start_message("df1"));

        let response = h.service.provision(&msg).await.unwrap();
        assert!(!response.provisioning);

        let flow = h.store.find_by_id("df1").await.unwrap().unwrap();
        assert_eq!(flow.state, DataFlowState::Started);
        assert!(flow.is_consumer);
        assert!(flow.provision_requested);
        assert!(flow.provision_complete);
    }

    #[tokio::test]
    async fn test_pending_provisioning_then_notified() {
        let h = TestHarness::new();
        h.hooks.set_pending_resources(2);

        let response = h.service.start(&start_message("df1")).await.unwrap();
        assert!(response.provisioning);
        assert!(response.data_address.is_none());
        assert_eq!(h.state("df1").await, DataFlowState::Provisioning);
        assert!(h.store.lease_of("df1").is_none());

        // Repeated start while provisioning does not re-provision
        let again = h.service.start(&start_message("df1")).await.unwrap();
        assert!(again.provisioning);
        assert_eq!(h.hooks.calls(), vec!["provision:df1"]);

        let response = h.service.notify_provisioned("df1").await.unwrap();
        assert!(!response.provisioning);
        assert_eq!(h.state("df1").await, DataFlowState::Started);
        assert!(h.store.find_by_id("df1").await.unwrap().unwrap().provision_complete);
    }

    #[tokio::test]
    async fn test_notify_provisioned_requires_provisioning() {
        let h = TestHarness::new();
        h.service.get_transfer_state("df1").await.unwrap_err();

        let err = h.service.notify_provisioned("df1").await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::NotFound));

        h.started("df1").await;
        h.service.suspend("df1", None).await.unwrap();
        let err = h.service.notify_provisioned("df1").await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Conflict));
    }

    // ========================================================================
    // Suspend / Recover / Terminate / Complete
    // ========================================================================

    #[tokio::test]
    async fn test_suspend_requires_started() {
        let h = TestHarness::new();
        h.hooks.set_pending_resources(1);
        h.service.start(&start_message("df1")).await.unwrap();

        let err = h.service.suspend("df1", None).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Conflict));
        assert_eq!(h.state("df1").await, DataFlowState::Provisioning);
        assert!(h.store.lease_of("df1").is_none());
    }

    #[tokio::test]
    async fn test_suspend_on_received_is_conflict() {
        let h = TestHarness::new();
        let mut flow = DataFlow::new(
            "df1",
            DataAddress::new("HttpData"),
            DataAddress::new("HttpData"),
            crate::data_flow::TransferType::new(FlowType::Push, "HttpData"),
            "participant1",
        );
        flow.state = DataFlowState::Received;
        h.store.upsert(&flow, None).await.unwrap();

        let err = h.service.suspend("df1", None).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Conflict));
        assert_eq!(h.state("df1").await, DataFlowState::Received);
        assert!(!h.hooks.calls().contains(&"suspend:df1".to_string()));
    }

    #[tokio::test]
    async fn test_suspend_then_recover() {
        let h = TestHarness::new();
        h.started("df1").await;

        let state = h
            .service
            .suspend("df1", Some("maintenance".into()))
            .await
            .unwrap();
        assert_eq!(state, DataFlowState::Suspended);
        assert_eq!(h.state("df1").await, DataFlowState::Suspended);
        let flow = h.store.find_by_id("df1").await.unwrap().unwrap();
        assert_eq!(flow.state_reason.as_deref(), Some("maintenance"));
        assert_eq!(flow.error_detail, None);

        // Suspending twice is a no-op
        h.service.suspend("df1", None).await.unwrap();
        assert_eq!(
            h.hooks.calls().iter().filter(|c| c.starts_with("suspend")).count(),
            1
        );

        assert_eq!(h.service.recover("df1").await.unwrap(), DataFlowState::Started);
        assert_eq!(h.state("df1").await, DataFlowState::Started);

        // The last suspension reason survives recovery
        let flow = h.store.find_by_id("df1").await.unwrap().unwrap();
        assert_eq!(flow.state_reason.as_deref(), Some("maintenance"));
    }

    #[tokio::test]
    async fn test_start_on_suspended_recovers() {
        let h = TestHarness::new();
        h.started("df1").await;
        h.service.suspend("df1", None).await.unwrap();

        let response = h.service.start(&start_message("df1")).await.unwrap();
        assert!(!response.provisioning);
        assert_eq!(h.state("df1").await, DataFlowState::Started);
        assert!(h.hooks.calls().contains(&"recover:df1".to_string()));
        assert_eq!(h.hooks.start_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminate_twice_invokes_hook_once() {
        let h = TestHarness::new();
        h.started("df1").await;

        assert_eq!(
            h.service.terminate("df1", Some("done".into())).await.unwrap(),
            DataFlowState::Terminated
        );
        assert_eq!(
            h.service.terminate("df1", None).await.unwrap(),
            DataFlowState::Terminated
        );

        assert_eq!(h.hooks.terminate_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.state("df1").await, DataFlowState::Terminated);
    }

    #[tokio::test]
    async fn test_terminate_unknown_flow_is_not_found() {
        let h = TestHarness::new();
        let err = h.service.terminate("missing", None).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::NotFound));
        assert_eq!(h.hooks.terminate_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_complete_then_terminate() {
        let h = TestHarness::new();
        h.started("df1").await;

        assert_eq!(h.service.complete("df1").await.unwrap(), DataFlowState::Completed);
        // Already finished; terminate has nothing to do
        assert_eq!(
            h.service.terminate("df1", None).await.unwrap(),
            DataFlowState::Completed
        );
        assert_eq!(h.hooks.terminate_count.load(Ordering::SeqCst), 0);
    }

    // ========================================================================
    // Concurrency & authorization
    // ========================================================================

    #[tokio::test]
    async fn test_held_lease_rejects_signal_without_hook() {
        let h = TestHarness::new();
        h.started("df1").await;

        let held = h
            .store
            .find_by_id_and_lease("df1", "other-runtime")
            .await
            .unwrap();

        let err = h.service.terminate("df1", None).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Conflict));
        assert_eq!(h.hooks.terminate_count.load(Ordering::SeqCst), 0);

        h.store.break_lease(&held.lease).await.unwrap();
        h.service.terminate("df1", None).await.unwrap();
        assert_eq!(h.hooks.terminate_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_terminate_single_hook_call() {
        let h = Arc::new(TestHarness::new());
        h.started("df1").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.service.terminate("df1", None).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e.kind(), Some(FailureKind::Conflict)),
            }
        }

        assert!(ok >= 1);
        assert_eq!(h.hooks.terminate_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.state("df1").await, DataFlowState::Terminated);
    }

    #[tokio::test]
    async fn test_authorization_against_owner() {
        let h = TestHarness::new();
        h.started("df1").await;
        let store: Arc<dyn DataFlowStore> = h.store.clone();
        let authz = AuthorizationHandler::new(store);

        let denied = authz
            .authorize(
                &Principal::new("participant1"),
                &ResourceContext::participant("participant2"),
            )
            .await;
        assert!(denied.is_err());

        let foreign = authz
            .authorize(
                &Principal::new("participant2"),
                &ResourceContext::flow("participant2", "df1"),
            )
            .await;
        assert!(foreign.is_err());

        let owner = authz
            .authorize(
                &Principal::new("participant1"),
                &ResourceContext::flow("participant1", "df1"),
            )
            .await;
        assert!(owner.is_ok());
    }

    // ========================================================================
    // Lease expiry during a slow hook
    // ========================================================================

    /// Suspend hook that outlives a short store lease
    struct SlowSuspend;

    #[async_trait]
    impl DataFlowHooks for SlowSuspend {
        async fn on_suspend(&self, _flow: &DataFlow) -> StatusResult<()> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(())
        }
    }

    fn runtime(
        store: &Arc<InMemoryDataFlowStore>,
        runtime_id: &str,
        hooks: Arc<dyn DataFlowHooks>,
    ) -> SignalingService {
        let sdk = DataPlaneSdk::builder()
            .store(store.clone())
            .runtime_id(runtime_id)
            .hooks(hooks)
            .build()
            .unwrap();
        SignalingService::new(sdk)
    }

    #[tokio::test]
    async fn test_hook_outliving_lease_cannot_overwrite_newer_state() {
        let store = Arc::new(InMemoryDataFlowStore::with_lease_duration(
            Duration::from_millis(30),
        ));
        let slow = runtime(&store, "runtime-a", Arc::new(SlowSuspend));
        let fast = runtime(&store, "runtime-b", Arc::new(RecordingHooks::default()));

        fast.start(&start_message("df1")).await.unwrap();

        let suspending = {
            let slow = slow.clone();
            tokio::spawn(async move { slow.suspend("df1", Some("slow".into())).await })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;

        let terminated = fast.terminate("df1", Some("operator".into())).await.unwrap();
        assert_eq!(terminated, DataFlowState::Terminated);

        let err = suspending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Conflict));

        let flow = store.find_by_id("df1").await.unwrap().unwrap();
        assert_eq!(flow.state, DataFlowState::Terminated);
        assert_eq!(flow.state_reason.as_deref(), Some("operator"));
        assert_eq!(flow.runtime_id, "runtime-b");
        assert!(store.lease_of("df1").is_none());
    }

    #[tokio::test]
    async fn test_hook_outliving_lease_still_commits_when_uncontested() {
        let store = Arc::new(InMemoryDataFlowStore::with_lease_duration(
            Duration::from_millis(30),
        ));
        let slow = runtime(&store, "runtime-a", Arc::new(SlowSuspend));
        slow.start(&start_message("df1")).await.unwrap();

        let state = slow.suspend("df1", None).await.unwrap();
        assert_eq!(state, DataFlowState::Suspended);
        assert_eq!(
            store.find_by_id("df1").await.unwrap().unwrap().state,
            DataFlowState::Suspended
        );
    }
}
