//! Integration tests for the network and endpoint lifecycle over the mock gateway.
use h3cbr_common::ErrorKind;
use h3cbr_driver::api::{
    CreateEndpointRequest, CreateNetworkRequest, EndpointInterface, EndpointRequest, IpamData,
    JoinRequest, NetworkRequest,
};
use async_trait::async_trait;
use h3cbr_common::NetResult;
use h3cbr_driver::{Driver, DriverConfig, EndpointEntry, Network};
use h3cbr_network::{Link, LinkGateway, LinkKind, MacAddr, MockGateway};
use serde_json::json;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

const NETWORK_ID: &str = "abc123def4567890";

fn setup() -> (Arc<MockGateway>, Driver) {
    let gw = Arc::new(MockGateway::new());
    let gateway: Arc<dyn LinkGateway> = gw.clone();
    let driver = Driver::new(
        gateway,
        DriverConfig {
            assign_bridge_mac: Some(true),
        },
    );
    (gw, driver)
}

fn network_request(options: serde_json::Value) -> CreateNetworkRequest {
    CreateNetworkRequest {
        network_id: NETWORK_ID.to_string(),
        options: serde_json::from_value(options).expect("options"),
        ipv4_data: vec![IpamData {
            address_space: "LocalDefault".into(),
            pool: "172.20.0.0/16".into(),
            gateway: "172.20.0.1".into(),
            ..IpamData::default()
        }],
        ipv6_data: Vec::new(),
    }
}

fn endpoint_request(id: &str, address: &str) -> CreateEndpointRequest {
    CreateEndpointRequest {
        network_id: NETWORK_ID.to_string(),
        endpoint_id: id.to_string(),
        interface: Some(EndpointInterface {
            address: address.to_string(),
            ..EndpointInterface::default()
        }),
        options: Default::default(),
    }
}

fn endpoint_ref(id: &str) -> EndpointRequest {
    EndpointRequest {
        network_id: NETWORK_ID.to_string(),
        endpoint_id: id.to_string(),
    }
}

#[tokio::test]
async fn test_full_scenario() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();

    driver.create_network(network_request(json!({}))).await?;
    let network = driver.network(NETWORK_ID)?;
    assert_eq!(network.name(), "h3cbr-abc12");
    assert_eq!(gw.links_of_kind(LinkKind::Bridge), vec!["h3cbr-abc12".to_string()]);

    let response = driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.2"))
        .await?;
    let interface = response.interface.expect("interface in response");
    assert_eq!(interface.address, "172.20.0.2");
    assert_eq!(interface.mac_address, "7a:42:ac:14:00:02");

    // Kernel side: pair exists, host side enslaved and up, container side
    // carries the derived MAC.
    let endpoint = network.provisioned_endpoint("ep1")?;
    let host = gw.link(&endpoint.host_ifname).expect("host link");
    let container = gw.link(&endpoint.container_ifname).expect("container link");
    assert_eq!(host.master, Some(network.bridge().link().index));
    assert!(host.up);
    assert_eq!(container.mac, Some("7a:42:ac:14:00:02".parse::<MacAddr>()?));
    assert_eq!(host.mtu, 1500);

    driver.delete_endpoint(&endpoint_ref("ep1"))?;
    assert_eq!(network.endpoint_count(), 0);

    driver
        .delete_network(NetworkRequest {
            network_id: NETWORK_ID.to_string(),
        })
        .await?;
    assert!(driver.networks().is_empty());
    assert!(gw.link("h3cbr-abc12").is_none());
    Ok(())
}

#[tokio::test]
async fn test_custom_mtu_and_channel_type() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();
    driver
        .create_network(network_request(json!({
            "com.docker.network.generic": {"net.bridge.bridge.mtu": "1450"}
        })))
        .await?;

    let mut request = endpoint_request("ep1", "172.20.0.9/16");
    request.options = serde_json::from_value(json!({
        "com.h3c.network.channelType": "eth7"
    }))?;
    driver.create_endpoint(request).await?;

    let endpoint = driver.network(NETWORK_ID)?.provisioned_endpoint("ep1")?;
    assert_eq!(endpoint.container_ifname, "eth7");
    assert_eq!(gw.link(&endpoint.host_ifname).expect("host").mtu, 1450);
    assert_eq!(gw.link("eth7").expect("container").mtu, 1450);
    Ok(())
}

#[tokio::test]
async fn test_explicit_mac_wins() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();
    driver.create_network(network_request(json!({}))).await?;

    let mut request = endpoint_request("ep1", "172.20.0.2/16");
    request.options = serde_json::from_value(json!({
        "com.docker.network.endpoint.macaddress": "02:42:ac:11:00:09"
    }))?;
    let response = driver.create_endpoint(request).await?;
    assert_eq!(
        response.interface.expect("interface").mac_address,
        "02:42:ac:11:00:09"
    );

    let endpoint = driver.network(NETWORK_ID)?.provisioned_endpoint("ep1")?;
    assert_eq!(
        gw.link(&endpoint.container_ifname).expect("container").mac,
        Some("02:42:ac:11:00:09".parse()?)
    );
    Ok(())
}

#[tokio::test]
async fn test_no_address_keeps_kernel_mac() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();
    driver.create_network(network_request(json!({}))).await?;

    let mut request = endpoint_request("ep1", "");
    request.interface = None;
    let response = driver.create_endpoint(request).await?;
    assert_eq!(response.interface.expect("interface").mac_address, "");

    let endpoint = driver.network(NETWORK_ID)?.provisioned_endpoint("ep1")?;
    assert!(endpoint.mac_address.is_none());
    assert!(gw.link(&endpoint.container_ifname).expect("container").mac.is_none());
    Ok(())
}

#[tokio::test]
async fn test_wrong_shape_mac_leaves_table_unchanged() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();
    driver.create_network(network_request(json!({}))).await?;

    let mut request = endpoint_request("ep1", "172.20.0.2/16");
    request.options = serde_json::from_value(json!({
        "com.docker.network.endpoint.macaddress": 1234
    }))?;
    let err = driver.create_endpoint(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidEndpointConfig);

    let network = driver.network(NETWORK_ID)?;
    assert_eq!(network.endpoint_count(), 0);
    assert!(gw.links_of_kind(LinkKind::Veth).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_network_and_empty_ids() -> Result<(), Box<dyn Error>> {
    let (_gw, driver) = setup();

    let err = driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut request = endpoint_request("ep1", "172.20.0.2");
    request.network_id = String::new();
    let err = driver.create_endpoint(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    driver.create_network(network_request(json!({}))).await?;
    let err = driver
        .create_endpoint(endpoint_request("", "172.20.0.2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(driver.network(NETWORK_ID)?.endpoint_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_endpoint_conflicts() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();
    driver.create_network(network_request(json!({}))).await?;
    driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.2"))
        .await?;

    let err = driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.3"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // The first endpoint is untouched and no second pair was created.
    let network = driver.network(NETWORK_ID)?;
    assert!(matches!(
        network.get_endpoint("ep1"),
        Some(EndpointEntry::Provisioned(ref ep)) if ep.address == Some("172.20.0.2/32".parse()?)
    ));
    assert_eq!(gw.links_of_kind(LinkKind::Veth).len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_delete_endpoint_is_idempotent() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();

    driver.delete_endpoint(&endpoint_ref("ep1"))?;

    driver.create_network(network_request(json!({}))).await?;
    driver.delete_endpoint(&endpoint_ref("missing"))?;

    driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.2"))
        .await?;
    let veths = gw.links_of_kind(LinkKind::Veth);
    driver.delete_endpoint(&endpoint_ref("ep1"))?;
    driver.delete_endpoint(&endpoint_ref("ep1"))?;

    // Devices are left to namespace teardown.
    assert_eq!(gw.links_of_kind(LinkKind::Veth), veths);
    Ok(())
}

#[tokio::test]
async fn test_delete_network_with_endpoints_conflicts() -> Result<(), Box<dyn Error>> {
    let (gw, driver) = setup();
    driver.create_network(network_request(json!({}))).await?;
    driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.2"))
        .await?;

    let delete = NetworkRequest {
        network_id: NETWORK_ID.to_string(),
    };
    let err = driver.delete_network(delete.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(gw.link("h3cbr-abc12").is_some());
    assert_eq!(driver.networks().len(), 1);

    driver.delete_endpoint(&endpoint_ref("ep1"))?;
    driver.delete_network(delete).await?;
    assert!(driver.networks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_join_and_info() -> Result<(), Box<dyn Error>> {
    let (_gw, driver) = setup();
    driver.create_network(network_request(json!({}))).await?;
    driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.2/16"))
        .await?;
    let endpoint = driver.network(NETWORK_ID)?.provisioned_endpoint("ep1")?;

    let join = driver.join(&JoinRequest {
        network_id: NETWORK_ID.to_string(),
        endpoint_id: "ep1".to_string(),
        sandbox_key: "/var/run/docker/netns/1234".to_string(),
        options: Default::default(),
    })?;
    let name = join.interface_name.expect("interface name");
    assert_eq!(name.src_name, endpoint.container_ifname);
    assert_eq!(name.dst_prefix, "eth");
    assert_eq!(join.gateway, "172.20.0.1");

    let info = driver.endpoint_info(&endpoint_ref("ep1"))?;
    assert_eq!(info.value["host_ifname"], endpoint.host_ifname);
    assert_eq!(info.value["mac_address"], "7a:42:ac:14:00:02");

    let err = driver.endpoint_info(&endpoint_ref("ep2")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_endpoints() -> Result<(), Box<dyn Error>> {
    const COUNT: u8 = 32;
    let (gw, driver) = setup();
    let driver = Arc::new(driver);
    driver.create_network(network_request(json!({}))).await?;

    let handles: Vec<_> = (0..COUNT)
        .map(|i| {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move {
                driver
                    .create_endpoint(endpoint_request(
                        &format!("ep{i}"),
                        &format!("172.20.1.{i}/16"),
                    ))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await??;
    }

    let network = driver.network(NETWORK_ID)?;
    assert_eq!(network.endpoint_count(), usize::from(COUNT));
    assert_eq!(gw.links_of_kind(LinkKind::Veth).len(), usize::from(COUNT) * 2);
    for i in 0..COUNT {
        let endpoint = network.provisioned_endpoint(&format!("ep{i}"))?;
        assert_eq!(
            endpoint.mac_address,
            Some(MacAddr::new([0x7a, 0x42, 172, 20, 1, i]))
        );
    }
    Ok(())
}

/// Notes whether the endpoint table already lists `ep1` when its host link
/// is brought up.
#[derive(Default)]
struct UpObserver {
    inner: MockGateway,
    network: OnceLock<Arc<Network>>,
    listed_before_up: AtomicBool,
}

#[async_trait]
impl LinkGateway for UpObserver {
    async fn link_by_name(&self, name: &str) -> NetResult<Option<Link>> {
        self.inner.link_by_name(name).await
    }

    async fn add_bridge(&self, name: &str) -> NetResult<()> {
        self.inner.add_bridge(name).await
    }

    async fn add_veth(&self, host: &str, peer: &str) -> NetResult<()> {
        self.inner.add_veth(host, peer).await
    }

    async fn delete_link(&self, link: &Link) -> NetResult<()> {
        self.inner.delete_link(link).await
    }

    async fn set_master(&self, link: &Link, bridge: &Link) -> NetResult<()> {
        self.inner.set_master(link, bridge).await
    }

    async fn set_mtu(&self, link: &Link, mtu: u32) -> NetResult<()> {
        self.inner.set_mtu(link, mtu).await
    }

    async fn set_mac(&self, link: &Link, mac: MacAddr) -> NetResult<()> {
        self.inner.set_mac(link, mac).await
    }

    async fn set_up(&self, link: &Link) -> NetResult<()> {
        if link.kind == LinkKind::Veth {
            if let Some(network) = self.network.get() {
                if network.provisioned_endpoint("ep1").is_ok() {
                    self.listed_before_up.store(true, Ordering::SeqCst);
                }
            }
        }
        self.inner.set_up(link).await
    }
}

#[tokio::test]
async fn test_endpoint_listed_only_once_up() -> Result<(), Box<dyn Error>> {
    let observer = Arc::new(UpObserver::default());
    let gateway: Arc<dyn LinkGateway> = observer.clone();
    let driver = Driver::new(
        gateway,
        DriverConfig {
            assign_bridge_mac: Some(false),
        },
    );
    driver.create_network(network_request(json!({}))).await?;
    let network = driver.network(NETWORK_ID)?;
    assert!(observer.network.set(Arc::clone(&network)).is_ok());

    driver
        .create_endpoint(endpoint_request("ep1", "172.20.0.2/16"))
        .await?;
    assert!(!observer.listed_before_up.load(Ordering::SeqCst));
    let endpoint = network.provisioned_endpoint("ep1")?;
    let host = observer.inner.link(&endpoint.host_ifname).expect("host link");
    assert!(host.up);
    Ok(())
}
