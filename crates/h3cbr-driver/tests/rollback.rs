//! Every failure inside endpoint provisioning must leave no veth pair and no
//! table entry behind.
use h3cbr_common::ErrorKind;
use h3cbr_driver::api::{CreateEndpointRequest, CreateNetworkRequest, EndpointInterface, IpamData};
use h3cbr_driver::{Driver, DriverConfig};
use h3cbr_network::{LinkGateway, LinkKind, MockGateway, MockOp};
use serde_json::json;
use std::sync::Arc;

const NETWORK_ID: &str = "rollback0net";

/// Network with a custom MTU so every provisioning step runs.
async fn setup() -> (Arc<MockGateway>, Driver) {
    let gw = Arc::new(MockGateway::new());
    let gateway: Arc<dyn LinkGateway> = gw.clone();
    let driver = Driver::new(gateway, DriverConfig::default());
    driver
        .create_network(CreateNetworkRequest {
            network_id: NETWORK_ID.to_string(),
            options: serde_json::from_value(json!({
                "com.docker.network.generic": {"net.bridge.bridge.mtu": 9000}
            }))
            .expect("options"),
            ipv4_data: vec![IpamData {
                pool: "10.20.0.0/24".into(),
                gateway: "10.20.0.1/24".into(),
                ..IpamData::default()
            }],
            ipv6_data: Vec::new(),
        })
        .await
        .expect("create network");
    (gw, driver)
}

fn request() -> CreateEndpointRequest {
    CreateEndpointRequest {
        network_id: NETWORK_ID.to_string(),
        endpoint_id: "ep1".to_string(),
        interface: Some(EndpointInterface {
            address: "10.20.0.5/24".to_string(),
            ..EndpointInterface::default()
        }),
        options: Default::default(),
    }
}

async fn assert_rolled_back(gw: &MockGateway, driver: &Driver) {
    let network = driver.network(NETWORK_ID).expect("network");
    assert_eq!(network.endpoint_count(), 0, "table entry left behind");
    assert!(
        gw.links_of_kind(LinkKind::Veth).is_empty(),
        "veth left behind: {:?}",
        gw.links_of_kind(LinkKind::Veth)
    );

    // The same id can be provisioned once the fault is gone.
    gw.heal();
    driver.create_endpoint(request()).await.expect("retry");
    assert_eq!(network.endpoint_count(), 1);
}

/// Fail the `offset`th call of `op` counted from now.
async fn fail_after_setup(op: MockOp, offset: usize) {
    let (gw, driver) = setup().await;
    gw.fail_nth(op, gw.calls(op) + offset);

    let err = driver.create_endpoint(request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal, "{op:?} #{offset}: {err}");
    assert_rolled_back(&gw, &driver).await;
}

#[tokio::test]
async fn test_host_name_generation_fails() {
    fail_after_setup(MockOp::Lookup, 1).await;
}

#[tokio::test]
async fn test_container_name_generation_fails() {
    fail_after_setup(MockOp::Lookup, 2).await;
}

#[tokio::test]
async fn test_veth_creation_fails() {
    fail_after_setup(MockOp::AddVeth, 1).await;
}

#[tokio::test]
async fn test_host_lookup_fails() {
    fail_after_setup(MockOp::Lookup, 3).await;
}

#[tokio::test]
async fn test_container_lookup_fails() {
    fail_after_setup(MockOp::Lookup, 4).await;
}

#[tokio::test]
async fn test_host_mtu_fails() {
    fail_after_setup(MockOp::SetMtu, 1).await;
}

#[tokio::test]
async fn test_container_mtu_fails() {
    fail_after_setup(MockOp::SetMtu, 2).await;
}

#[tokio::test]
async fn test_mac_fails() {
    fail_after_setup(MockOp::SetMac, 1).await;
}

#[tokio::test]
async fn test_link_up_fails() {
    fail_after_setup(MockOp::SetUp, 1).await;
}

#[tokio::test]
async fn test_attach_falls_back_to_ioctl() {
    let (gw, driver) = setup().await;
    gw.fail_on(MockOp::SetMaster);

    driver.create_endpoint(request()).await.expect("create endpoint");
    assert_eq!(gw.calls(MockOp::SetMasterLegacy), 1);
}

#[tokio::test]
async fn test_attach_fails_on_both_paths() {
    let (gw, driver) = setup().await;
    gw.fail_on(MockOp::SetMaster);
    gw.fail_on(MockOp::SetMasterLegacy);

    let err = driver.create_endpoint(request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_rolled_back(&gw, &driver).await;
}

#[test_log::test(tokio::test)]
async fn test_compensation_failure_is_not_escalated() {
    let (gw, driver) = setup().await;
    gw.fail_nth(MockOp::SetUp, gw.calls(MockOp::SetUp) + 1);
    gw.fail_on(MockOp::Delete);

    let err = driver.create_endpoint(request()).await.unwrap_err();
    // The caller sees the provisioning error, not the cleanup one.
    assert!(err.to_string().contains("SetUp"), "{err}");

    let network = driver.network(NETWORK_ID).expect("network");
    assert_eq!(network.endpoint_count(), 0);
    // The pair could not be deleted; only bookkeeping is guaranteed.
    assert_eq!(gw.links_of_kind(LinkKind::Veth).len(), 2);
}
