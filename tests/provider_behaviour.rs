//! Behavioural coverage for bring-up, refresh, and teardown through the
//! provider facade.

#[path = "common/provider_fixture.rs"]
mod provider_fixture;

use rstest::rstest;
use vsphere_fleet::test_support::{Call, Operation, SimResource, SimulatedInfrastructure};
use vsphere_fleet::{InstanceAddress, InstanceState, PowerState, ProviderError, TargetState};

use provider_fixture::{BASE_IMAGE, connect, props, web_address};

#[tokio::test]
async fn bring_up_of_a_new_instance_clones_boots_and_snapshots() {
    let infra = SimulatedInfrastructure::new().with_resource(SimResource::new(BASE_IMAGE));
    let mut provider = connect(&infra).await;

    let updated = provider.init_instance(&props("web-1")).await.expect("init");
    let results = provider
        .wait_instances(&[updated], TargetState::Running)
        .await
        .expect("wait");

    assert_eq!(
        infra.submissions(),
        vec![
            Call::Clone {
                source: String::from(BASE_IMAGE),
                name: String::from("web-1"),
                linked: false,
            },
            Call::PowerOn(String::from("web-1")),
            Call::Snapshot {
                vm: String::from("web-1"),
                name: String::from("pristine"),
                include_memory: true,
            },
        ]
    );
    let instance = provider.registry().get("web-1").expect("registered");
    assert_eq!(instance.state, InstanceState::Running);
    let address = instance.ipv4.expect("address recorded");
    assert_eq!(results.get("web-1"), Some(&InstanceAddress::from(address)));
    assert_eq!(
        infra.root_snapshots_of("web-1"),
        Some(vec![String::from("pristine")])
    );
}

#[tokio::test]
async fn bring_up_of_a_clean_instance_only_reverts() {
    let infra = SimulatedInfrastructure::new().with_resource(
        SimResource::new("web-1")
            .pristine()
            .with_address(web_address()),
    );
    let mut provider = connect(&infra).await;

    let updated = provider.init_instance(&props("web-1")).await.expect("init");
    let results = provider
        .wait_instances(&[updated], TargetState::Running)
        .await
        .expect("wait");

    assert_eq!(infra.submissions(), vec![Call::Revert(String::from("web-1"))]);
    let record = results.get("web-1").expect("result for web-1");
    assert_eq!(record.host, web_address());
    assert_eq!(record.private.ip, web_address());
    assert_eq!(record.private.dns, "10.0.0.5");
    assert_eq!(
        provider.registry().get("web-1").map(|i| i.state),
        Some(InstanceState::Running)
    );
}

#[tokio::test]
async fn init_downgrades_a_running_instance_so_bring_up_reverts() {
    let infra = SimulatedInfrastructure::new().with_resource(
        SimResource::new("web-1")
            .pristine()
            .powered_on()
            .with_address(web_address()),
    );
    let mut provider = connect(&infra).await;

    let updated = provider.init_instance(&props("web-1")).await.expect("init");
    assert_eq!(updated.instance.as_deref(), Some("web-1"));
    assert_eq!(
        provider.registry().get("web-1").map(|i| i.state),
        Some(InstanceState::Clean)
    );

    provider
        .wait_instances(&[updated], TargetState::Running)
        .await
        .expect("wait");
    assert_eq!(infra.submissions(), vec![Call::Revert(String::from("web-1"))]);
}

#[tokio::test]
async fn init_preserves_unrelated_properties() {
    let infra = SimulatedInfrastructure::new();
    let mut provider = connect(&infra).await;
    let mut submitted = props("web-1");
    submitted
        .extra
        .insert(String::from("flavor"), serde_json::json!("large"));

    let updated = provider.init_instance(&submitted).await.expect("init");

    assert_eq!(updated.extra, submitted.extra);
    assert_eq!(updated.vm_name, submitted.vm_name);
    assert_eq!(updated.instance.as_deref(), Some("web-1"));
}

#[tokio::test]
async fn repeated_requests_on_a_running_instance_never_clone_or_revert() {
    let infra = SimulatedInfrastructure::new().with_resource(
        SimResource::new("web-1")
            .pristine()
            .with_address(web_address()),
    );
    let mut provider = connect(&infra).await;
    let updated = provider.init_instance(&props("web-1")).await.expect("init");
    let first = provider
        .wait_instances(std::slice::from_ref(&updated), TargetState::Running)
        .await
        .expect("bring-up");
    infra.clear_calls();

    let again = provider
        .wait_instances(std::slice::from_ref(&updated), TargetState::Running)
        .await
        .expect("second bring-up");
    assert!(again.is_empty());
    assert!(infra.submissions().is_empty());

    let refreshed = provider
        .wait_instances(&[updated], TargetState::from_label("update"))
        .await
        .expect("refresh");
    assert!(infra.submissions().is_empty());
    assert_eq!(refreshed, first);
}

#[tokio::test]
async fn refresh_picks_up_a_changed_address() {
    let infra = SimulatedInfrastructure::new().with_resource(
        SimResource::new("web-1")
            .pristine()
            .powered_on()
            .with_address(web_address()),
    );
    let mut provider = connect(&infra).await;
    let moved = "10.0.0.6".parse().expect("address");
    infra.set_address("web-1", moved);

    let results = provider
        .wait_instances(&[props("web-1")], TargetState::Refresh)
        .await
        .expect("refresh");

    assert_eq!(results.get("web-1"), Some(&InstanceAddress::from(moved)));
    assert_eq!(
        provider.registry().get("web-1").and_then(|i| i.ipv4),
        Some(moved)
    );
}

#[tokio::test]
async fn terminate_powers_off_then_deletes_and_second_call_is_a_no_op() {
    let infra = SimulatedInfrastructure::new()
        .with_resource(SimResource::new("web-1").pristine().powered_on());
    let mut provider = connect(&infra).await;

    provider
        .terminate_instances(&[props("web-1")])
        .await
        .expect("terminate");

    assert_eq!(
        infra.submissions(),
        vec![
            Call::PowerOff(String::from("web-1")),
            Call::Delete(String::from("web-1")),
        ]
    );
    assert!(provider.registry().get("web-1").is_none());
    assert!(!infra.exists("web-1"));

    infra.clear_calls();
    provider
        .terminate_instances(&[props("web-1")])
        .await
        .expect("second terminate");
    assert!(infra.submissions().is_empty());
    assert!(infra.refresh_batches().is_empty());
}

#[tokio::test]
async fn terminate_skips_instances_that_do_not_exist() {
    let infra = SimulatedInfrastructure::new().with_resource(SimResource::new("web-1"));
    let mut provider = connect(&infra).await;

    provider
        .terminate_instances(&[props("web-1"), props("ghost")])
        .await
        .expect("terminate");

    assert_eq!(infra.submissions(), vec![Call::Delete(String::from("web-1"))]);
}

#[tokio::test]
async fn instances_deleted_before_a_failed_terminate_stay_forgotten() {
    let infra = SimulatedInfrastructure::new()
        .with_task_latency(0)
        .rejecting(Operation::PowerOff)
        .with_resource(SimResource::new("a-old").pristine())
        .with_resource(SimResource::new("b-new").pristine().powered_on());
    let mut provider = connect(&infra).await;

    let err = provider
        .terminate_instances(&[props("a-old"), props("b-new")])
        .await
        .expect_err("power-off is rejected");
    assert!(
        matches!(err, ProviderError::Infrastructure { action: "power_off", .. }),
        "got {err:?}"
    );
    assert!(!infra.exists("a-old"));
    assert!(provider.registry().get("a-old").is_none());

    infra.clear_calls();
    provider
        .terminate_instances(&[props("a-old")])
        .await
        .expect("second terminate is a no-op");
    assert!(infra.submissions().is_empty());
}

#[tokio::test]
async fn dirty_instance_is_removed_before_cloning() {
    let infra = SimulatedInfrastructure::new()
        .with_resource(SimResource::new(BASE_IMAGE))
        .with_resource(SimResource::new("web-1").with_root_snapshots(["manual"]).powered_on());
    let mut provider = connect(&infra).await;

    let updated = provider.init_instance(&props("web-1")).await.expect("init");
    assert_eq!(
        provider.registry().get("web-1").map(|i| i.state),
        Some(InstanceState::Dirty)
    );
    provider
        .wait_instances(&[updated], TargetState::Running)
        .await
        .expect("wait");

    let submissions = infra.submissions();
    let position = |call: &Call| submissions.iter().position(|c| c == call);
    let power_off = position(&Call::PowerOff(String::from("web-1"))).expect("power off");
    let delete = position(&Call::Delete(String::from("web-1"))).expect("delete");
    let clone = submissions
        .iter()
        .position(|c| matches!(c, Call::Clone { .. }))
        .expect("clone");
    assert!(power_off < delete && delete < clone, "order: {submissions:?}");
    assert_eq!(infra.power_of("web-1"), Some(PowerState::PoweredOn));
}

#[tokio::test]
async fn many_instances_share_each_status_poll() {
    let names = ["web-1", "web-2", "web-3", "web-4"];
    let infra = names
        .iter()
        .fold(SimulatedInfrastructure::new(), |infra, name| {
            infra.with_resource(SimResource::new(*name).pristine())
        })
        .with_task_latency(3);
    let mut provider = connect(&infra).await;
    let mut batch = Vec::new();
    for name in names {
        batch.push(provider.init_instance(&props(name)).await.expect("init"));
    }

    let results = provider
        .wait_instances(&batch, TargetState::Running)
        .await
        .expect("wait");

    assert_eq!(results.len(), names.len());
    let batches = infra.refresh_batches();
    assert!(!batches.is_empty());
    assert!(
        batches.iter().all(|size| *size == names.len()),
        "every poll should carry all instances: {batches:?}"
    );
}

#[rstest]
#[case::failed_power_off(Operation::PowerOff)]
#[case::failed_delete(Operation::Delete)]
#[tokio::test]
async fn errored_remote_tasks_do_not_stop_teardown(#[case] failing: Operation) {
    let infra = SimulatedInfrastructure::new()
        .failing(failing)
        .with_resource(SimResource::new("web-1").pristine().powered_on());
    let mut provider = connect(&infra).await;

    provider
        .terminate_instances(&[props("web-1")])
        .await
        .expect("terminate completes despite task errors");

    assert_eq!(infra.submissions().len(), 2);
    assert!(provider.registry().get("web-1").is_none());
}

#[tokio::test]
async fn missing_base_image_aborts_the_batch_without_results() {
    let infra = SimulatedInfrastructure::new().with_resource(SimResource::new("web-1").pristine());
    let mut provider = connect(&infra).await;
    let batch = vec![
        provider.init_instance(&props("web-1")).await.expect("init"),
        provider.init_instance(&props("web-2")).await.expect("init"),
    ];

    let err = provider
        .wait_instances(&batch, TargetState::Running)
        .await
        .expect_err("base image is missing");

    assert!(
        matches!(err, ProviderError::BaseImageNotFound { ref vm_name, .. } if vm_name == "web-2"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn descriptor_without_vm_name_is_rejected() {
    let infra = SimulatedInfrastructure::new();
    let mut provider = connect(&infra).await;
    let incomplete = vsphere_fleet::CloudProperties {
        vm_name: None,
        ..props("unused")
    };

    let err = provider
        .wait_instances(&[incomplete], TargetState::Running)
        .await
        .expect_err("descriptor is incomplete");

    assert!(matches!(err, ProviderError::Descriptor(_)), "got {err:?}");
    assert!(infra.calls().is_empty());
}
