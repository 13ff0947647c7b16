//! Unit tests for the Machine lifecycle reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::events::reasons;
    use crate::reconciler::Reconciler;
    use crate::reconciler::machine::INSTANCE_MISSING_MESSAGE;
    use crate::test_utils::*;
    use crds::{
        MACHINE_FINALIZER, Machine, MachineErrorReason, MachinePhase, MachineStatus, NetworkParam,
        OpenstackProviderSpec, SubnetFilter, SubnetParam,
    };
    use kube::ResourceExt;
    use kube_runtime::controller::Action;
    use openstack_client::{Network, Port, Server, Subnet};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const NAMESPACE: &str = "openshift-machine-api";

    fn reconciler(env: &TestEnv) -> Reconciler {
        Reconciler::new(
            env.actuator.clone(),
            env.store.clone(),
            Arc::new(StaticSessionProvider::new(env.cloud.clone())),
            env.events.clone(),
            env.flavors.clone(),
        )
    }

    fn new_machine() -> Machine {
        create_test_machine("worker-0", NAMESPACE, &valid_provider_spec())
    }

    fn stored(env: &TestEnv) -> Machine {
        env.store.machine(NAMESPACE, "worker-0").unwrap()
    }

    fn stored_status(env: &TestEnv) -> MachineStatus {
        stored(env).status.unwrap_or_default()
    }

    fn server(id: &str) -> Server {
        Server {
            id: id.to_string(),
            name: "worker-0".to_string(),
            status: "ACTIVE".to_string(),
            ..Default::default()
        }
    }

    fn deleting(mut machine: Machine) -> Machine {
        machine.metadata.deletion_timestamp = serde_json::from_value(json!("2026-01-01T00:00:00Z")).unwrap();
        machine.metadata.finalizers = Some(vec![MACHINE_FINALIZER.to_string()]);
        machine
    }

    #[tokio::test]
    async fn test_new_machine_is_provisioned() {
        let env = TestEnv::new();
        let machine = env.machine(new_machine());

        let action = reconciler(&env).reconcile_machine(&machine).await.unwrap();

        assert_eq!(action, Action::await_change());
        let machine = stored(&env);
        assert!(machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER));
        assert!(machine.spec.provider_id.is_some());
        let status = machine.status.unwrap();
        assert_eq!(status.phase, Some(MachinePhase::Provisioned));
        assert!(status.last_updated.is_some());
        assert_eq!(env.cloud.servers().len(), 1);
        assert_eq!(env.events.with_reason(reasons::CREATED).len(), 1);
    }

    #[tokio::test]
    async fn test_existing_instance_is_updated_not_recreated() {
        let env = TestEnv::new();
        env.cloud.add_server(server("srv-1"));
        let mut machine = new_machine();
        machine.spec.provider_id = Some("openstack:///srv-1".to_string());
        let machine = env.machine(machine);

        reconciler(&env).reconcile_machine(&machine).await.unwrap();

        assert_eq!(env.cloud.call_count("create_server"), 0);
        assert_eq!(stored_status(&env).phase, Some(MachinePhase::Provisioned));
        assert!(env.events.with_reason(reasons::CREATED).is_empty());
    }

    #[tokio::test]
    async fn test_missing_instance_with_provider_id_fails_machine() {
        let env = TestEnv::new();
        let mut machine = new_machine();
        machine.spec.provider_id = Some("openstack:///gone".to_string());
        let machine = env.machine(machine);

        let action = reconciler(&env).reconcile_machine(&machine).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = stored_status(&env);
        assert_eq!(status.phase, Some(MachinePhase::Failed));
        assert_eq!(status.error_message.as_deref(), Some(INSTANCE_MISSING_MESSAGE));
        assert_eq!(env.cloud.call_count("create_server"), 0);
    }

    #[tokio::test]
    async fn test_failed_machine_is_left_alone() {
        let env = TestEnv::new();
        let mut machine = new_machine();
        machine.metadata.finalizers = Some(vec![MACHINE_FINALIZER.to_string()]);
        machine.status = Some(MachineStatus {
            phase: Some(MachinePhase::Failed),
            ..Default::default()
        });
        let machine = env.machine(machine);

        reconciler(&env).reconcile_machine(&machine).await.unwrap();

        assert!(env.cloud.calls().is_empty());
        assert!(env.store.patches().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_machine_without_retry() {
        let env = TestEnv::new();
        let spec = OpenstackProviderSpec {
            flavor: "m1.huge".to_string(),
            ..valid_provider_spec()
        };
        let machine = env.machine(create_test_machine("worker-0", NAMESPACE, &spec));
        let reconciler = reconciler(&env);

        let action = reconciler.reconcile_machine(&machine).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = stored_status(&env);
        assert_eq!(status.phase, Some(MachinePhase::Failed));
        assert_eq!(status.error_reason, Some(MachineErrorReason::InvalidConfiguration));
        assert!(status.error_message.unwrap().contains("Machine validation failed"));
        let failed = env.events.with_reason(reasons::FAILED_CREATE);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].warning);
        assert_eq!(env.cloud.call_count("create_server"), 0);
        assert_eq!(reconciler.get_backoff_for_resource("Machine/openshift-machine-api/worker-0").1, 0);
    }

    #[tokio::test]
    async fn test_ambiguous_subnet_filter_fails_machine_without_retry() {
        let env = TestEnv::new();
        for (id, network_id) in [("subnet-a", "net-1"), ("subnet-b", "net-2")] {
            env.cloud.add_subnet(Subnet {
                id: id.to_string(),
                name: "nodes".to_string(),
                network_id: network_id.to_string(),
                ..Default::default()
            });
        }
        let spec = OpenstackProviderSpec {
            networks: vec![NetworkParam {
                subnets: vec![SubnetParam {
                    filter: SubnetFilter {
                        name: "nodes".to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..valid_provider_spec()
        };
        let machine = env.machine(create_test_machine("worker-0", NAMESPACE, &spec));
        let reconciler = reconciler(&env);

        let action = reconciler.reconcile_machine(&machine).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = stored_status(&env);
        assert_eq!(status.phase, Some(MachinePhase::Failed));
        assert_eq!(status.error_reason, Some(MachineErrorReason::InvalidConfiguration));
        let message = status.error_message.unwrap();
        assert!(message.contains(r#"2 subnets match filter {name: "nodes"}"#), "{}", message);
        assert_eq!(env.cloud.call_count("create_server"), 0);
        assert_eq!(reconciler.get_backoff_for_resource("Machine/openshift-machine-api/worker-0").1, 0);
    }

    #[tokio::test]
    async fn test_transient_error_is_recorded_and_retried() {
        let env = TestEnv::new();
        env.cloud.fail("create_server", "quota exceeded");
        let machine = env.machine(new_machine());
        let reconciler = reconciler(&env);

        let err = reconciler.reconcile_machine(&machine).await.unwrap_err();

        assert!(matches!(err, ControllerError::CreateMachine(_)));
        let status = stored_status(&env);
        assert_eq!(status.error_reason, Some(MachineErrorReason::CreateError));
        assert!(status.error_message.unwrap().contains("quota exceeded"));
        assert_eq!(status.phase, Some(MachinePhase::Provisioning));
        assert_eq!(env.events.with_reason(reasons::FAILED_CREATE).len(), 1);
        assert_eq!(reconciler.get_backoff_for_resource("Machine/openshift-machine-api/worker-0").1, 1);

        // Recovery clears the error fields
        env.cloud.clear_failure("create_server");
        reconciler.reconcile_machine(&stored(&env)).await.unwrap();
        let status = stored_status(&env);
        assert_eq!(status.phase, Some(MachinePhase::Provisioned));
        assert_eq!(status.error_reason, None);
        assert_eq!(status.error_message, None);
        assert_eq!(reconciler.get_backoff_for_resource("Machine/openshift-machine-api/worker-0").1, 0);
    }

    #[tokio::test]
    async fn test_not_ready_requeues_without_error_status() {
        let env = TestEnv::new();
        env.cloud.add_network(Network {
            id: "ext-1".to_string(),
            name: "public".to_string(),
            external: true,
            ..Default::default()
        });
        env.cloud.add_server(server("srv-1"));
        env.cloud.add_port(Port {
            id: "port-a".to_string(),
            name: "worker-0-0".to_string(),
            network_id: "net-1".to_string(),
            device_id: "srv-1".to_string(),
            ..Default::default()
        });
        let spec = OpenstackProviderSpec {
            floating_ip: "172.24.4.10".to_string(),
            ..valid_provider_spec()
        };
        let mut machine = create_test_machine("worker-0", NAMESPACE, &spec);
        machine.spec.provider_id = Some("openstack:///srv-1".to_string());
        let machine = env.machine(machine);

        let action = reconciler(&env).reconcile_machine(&machine).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        let status = stored_status(&env);
        assert_eq!(status.error_reason, None);
        assert_eq!(status.error_message, None);
        assert!(env.events.with_reason(reasons::FAILED_UPDATE).is_empty());
    }

    #[tokio::test]
    async fn test_conflict_is_returned_without_status_write() {
        let env = TestEnv::new();
        let mut machine = new_machine();
        machine.metadata.finalizers = Some(vec![MACHINE_FINALIZER.to_string()]);
        machine.status = Some(MachineStatus {
            phase: Some(MachinePhase::Provisioning),
            ..Default::default()
        });
        let machine = env.machine(machine);
        env.store.conflict_next(1);

        let err = reconciler(&env).reconcile_machine(&machine).await.unwrap_err();

        assert!(matches!(err, ControllerError::Conflict(_)));
        assert_eq!(stored_status(&env).error_reason, None);
        // The instance created by the lost pass is removed again
        assert!(env.cloud.servers().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_removes_instance_then_finalizer() {
        let env = TestEnv::new();
        env.cloud.add_server(server("srv-1"));
        let mut machine = deleting(new_machine());
        machine.spec.provider_id = Some("openstack:///srv-1".to_string());
        let machine = env.machine(machine);

        reconciler(&env).reconcile_machine(&machine).await.unwrap();

        assert!(env.cloud.servers().is_empty());
        let machine = stored(&env);
        assert!(machine.finalizers().is_empty());
        assert_eq!(machine.status.unwrap().phase, Some(MachinePhase::Deleting));
        let deleted = env.events.with_reason(reasons::DELETED);
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].note, "Deleted machine worker-0");
    }

    #[tokio::test]
    async fn test_failed_deletion_keeps_finalizer() {
        let env = TestEnv::new();
        env.cloud.add_server(server("srv-1"));
        env.cloud.fail("delete_server", "nova down");
        let mut machine = deleting(new_machine());
        machine.spec.provider_id = Some("openstack:///srv-1".to_string());
        let machine = env.machine(machine);

        reconciler(&env).reconcile_machine(&machine).await.unwrap_err();

        let machine = stored(&env);
        assert!(machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER));
        let status = machine.status.unwrap();
        assert_eq!(status.error_reason, Some(MachineErrorReason::DeleteError));
        assert_eq!(env.events.with_reason(reasons::FAILED_DELETE).len(), 1);
    }

    #[tokio::test]
    async fn test_deleting_machine_without_finalizer_is_ignored() {
        let env = TestEnv::new();
        let mut machine = deleting(new_machine());
        machine.metadata.finalizers = None;
        let machine = env.machine(machine);

        reconciler(&env).reconcile_machine(&machine).await.unwrap();

        assert!(env.cloud.calls().is_empty());
        assert!(env.store.patches().is_empty());
    }
}
