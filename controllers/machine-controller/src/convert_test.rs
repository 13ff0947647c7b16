//! Unit tests for provider spec translation

#[cfg(test)]
mod tests {
    use crate::convert::*;
    use crate::infrastructure::ClusterInfrastructure;
    use crate::test_utils::*;
    use crds::{
        AdditionalBlockDevice, AddressPair as SpecAddressPair, BlockDeviceStorage, Filter,
        NetworkParam, OpenstackProviderSpec, PortOpts, RootVolume, SecurityGroupParam,
        SubnetFilter as SpecSubnetFilter, SubnetParam,
    };
    use openstack_client::{MockOpenStackClient, ServerGroup, Subnet};
    use std::collections::BTreeMap;

    fn vips() -> (Vec<String>, Vec<String>) {
        (vec!["10.0.0.5".to_string()], vec!["10.0.0.7".to_string()])
    }

    fn subnet(uuid: &str, tag: &str) -> SubnetParam {
        SubnetParam {
            uuid: uuid.to_string(),
            port_tags: vec![tag.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_binding_profile_capabilities() {
        let profile = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };

        let cases = [
            (profile(&[("foo", "bar")]), false, false),
            (profile(&[("capabilities", "[\"switchdev\"]")]), true, false),
            (profile(&[("trusted", "true")]), false, true),
            (profile(&[("capabilities", "switchdev"), ("trusted", "true")]), true, true),
            (profile(&[("trusted", "yes")]), false, false),
        ];
        for (input, offload, trusted) in cases {
            let binding = binding_profile(&input);
            assert_eq!(binding.ovs_hw_offload, offload, "{:?}", input);
            assert_eq!(binding.trusted_vf, trusted, "{:?}", input);
        }
    }

    #[test]
    fn test_subnets_only_network_yields_port_per_subnet() {
        let net = NetworkParam {
            port_tags: vec!["net-tag".to_string()],
            subnets: vec![subnet("s1", "a"), subnet("s2", "b"), subnet("s3", "c")],
            ..Default::default()
        };
        let (api, ingress) = vips();

        let ports = network_param_to_ports(&net, &api, &ingress, true, false);

        assert_eq!(ports.len(), 3);
        for (port, (id, tag)) in ports.iter().zip([("s1", "a"), ("s2", "b"), ("s3", "c")]) {
            assert!(port.network.is_empty());
            assert_eq!(port.fixed_ips.len(), 1);
            assert_eq!(port.fixed_ips[0].subnet.as_ref().unwrap().id, id);
            assert_eq!(port.tags, vec!["net-tag".to_string(), tag.to_string()]);
            assert_eq!(port.trunk, Some(true));
            assert_eq!(port.allowed_address_pairs.len(), 2);
        }
    }

    #[test]
    fn test_network_with_subnets_yields_single_port() {
        let net = NetworkParam {
            uuid: "net-1".to_string(),
            port_tags: vec!["net-tag".to_string()],
            subnets: vec![subnet("s1", "a"), subnet("s2", "b"), subnet("s3", "c")],
            ..Default::default()
        };

        let ports = network_param_to_ports(&net, &[], &[], false, false);

        assert_eq!(ports.len(), 1);
        let port = &ports[0];
        assert_eq!(port.network.id, "net-1");
        let subnet_ids = port
            .fixed_ips
            .iter()
            .map(|ip| ip.subnet.as_ref().unwrap().id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(subnet_ids, vec!["s1", "s2", "s3"]);
        assert_eq!(port.tags, vec!["net-tag", "a", "b", "c"]);
        assert_eq!(port.trunk, Some(false));
    }

    #[test]
    fn test_network_filter_coalescing() {
        let net = NetworkParam {
            filter: Filter {
                id: "filter-id".to_string(),
                tenant_id: "tenant-1".to_string(),
                ..Default::default()
            },
            subnets: vec![SubnetParam {
                filter: SpecSubnetFilter {
                    id: "subnet-filter-id".to_string(),
                    tenant_id: "tenant-2".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };

        let ports = network_param_to_ports(&net, &[], &[], false, false);
        assert_eq!(ports[0].network.id, "filter-id");
        assert_eq!(ports[0].network.project_id, "tenant-1");
        let subnet = ports[0].fixed_ips[0].subnet.as_ref().unwrap();
        assert_eq!(subnet.id, "subnet-filter-id");
        assert_eq!(subnet.project_id, "tenant-2");

        // uuid wins over the filter ID, project over tenant
        let net = NetworkParam {
            uuid: "uuid".to_string(),
            filter: Filter {
                id: "filter-id".to_string(),
                project_id: "project".to_string(),
                tenant_id: "tenant".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let ports = network_param_to_ports(&net, &[], &[], false, false);
        assert_eq!(ports[0].network.id, "uuid");
        assert_eq!(ports[0].network.project_id, "project");
    }

    #[test]
    fn test_address_pairs_are_api_then_ingress_vips() {
        let net = NetworkParam {
            uuid: "net-1".to_string(),
            ..Default::default()
        };
        let (api, ingress) = vips();

        let ports = network_param_to_ports(&net, &api, &ingress, false, false);
        let pairs = ports[0]
            .allowed_address_pairs
            .iter()
            .map(|pair| pair.ip_address.as_str())
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec!["10.0.0.5", "10.0.0.7"]);

        let opted_out = NetworkParam {
            no_allowed_address_pairs: true,
            ..net.clone()
        };
        assert!(network_param_to_ports(&opted_out, &api, &ingress, false, false)[0]
            .allowed_address_pairs
            .is_empty());

        // User-managed load balancer
        assert!(network_param_to_ports(&net, &api, &ingress, false, true)[0]
            .allowed_address_pairs
            .is_empty());
    }

    #[test]
    fn test_port_security_inversion() {
        for (input, expected) in [(None, None), (Some(true), Some(false)), (Some(false), Some(true))] {
            let net = NetworkParam {
                uuid: "net-1".to_string(),
                port_security: input,
                ..Default::default()
            };
            let ports = network_param_to_ports(&net, &[], &[], false, false);
            assert_eq!(ports[0].disable_port_security, expected, "network {:?}", input);

            let subnets_only = NetworkParam {
                subnets: vec![subnet("s1", "a")],
                port_security: input,
                ..Default::default()
            };
            let ports = network_param_to_ports(&subnets_only, &[], &[], false, false);
            assert_eq!(ports[0].disable_port_security, expected, "subnets {:?}", input);

            let port = PortOpts {
                network_id: "net-1".to_string(),
                port_security: input,
                ..Default::default()
            };
            assert_eq!(
                port_opts_to_port(&port, false).disable_port_security,
                expected,
                "port {:?}",
                input
            );
        }
    }

    #[test]
    fn test_explicit_port_translation() {
        let port = PortOpts {
            network_id: "net-2".to_string(),
            name_suffix: "storage".to_string(),
            security_groups: Some(vec!["sg-1".to_string(), "sg-2".to_string()]),
            allowed_address_pairs: vec![SpecAddressPair {
                ip_address: "192.168.0.10".to_string(),
                mac_address: String::new(),
            }],
            fixed_ips: vec![crds::FixedIps {
                subnet_id: "subnet-9".to_string(),
                ip_address: "192.168.0.20".to_string(),
            }],
            trunk: Some(true),
            ..Default::default()
        };

        let translated = port_opts_to_port(&port, false);
        assert_eq!(translated.network.id, "net-2");
        assert_eq!(translated.name_suffix, "storage");
        let groups = translated.security_groups.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, "sg-1");
        assert!(groups[0].name.is_empty());
        assert_eq!(translated.allowed_address_pairs.len(), 1);
        assert_eq!(translated.fixed_ips[0].ip_address, "192.168.0.20");
        assert_eq!(translated.fixed_ips[0].subnet.as_ref().unwrap().id, "subnet-9");
        assert_eq!(translated.trunk, Some(true));

        assert!(port_opts_to_port(&port, true).allowed_address_pairs.is_empty());
        assert!(port_opts_to_port(&PortOpts::default(), false).security_groups.is_none());
    }

    #[test]
    fn test_security_group_uuid_and_name_override_filter() {
        let params = vec![SecurityGroupParam {
            uuid: "sg-uuid".to_string(),
            name: "workers".to_string(),
            filter: crds::SecurityGroupFilter {
                id: "filter-id".to_string(),
                name: "filter-name".to_string(),
                description: "kept".to_string(),
                ..Default::default()
            },
        }];

        let filters = security_group_filters(&params);
        assert_eq!(filters[0].id, "sg-uuid");
        assert_eq!(filters[0].name, "workers");
        assert_eq!(filters[0].description, "kept");
    }

    #[test]
    fn test_ports_ordered_networks_then_explicit() {
        let spec = OpenstackProviderSpec {
            networks: vec![
                NetworkParam {
                    uuid: "net-a".to_string(),
                    ..Default::default()
                },
                NetworkParam {
                    subnets: vec![subnet("s1", "a"), subnet("s2", "b")],
                    ..Default::default()
                },
            ],
            ports: vec![PortOpts {
                network_id: "net-z".to_string(),
                ..Default::default()
            }],
            trunk: true,
            ..Default::default()
        };

        let ports = create_ports(&spec, &[], &[], false);
        assert_eq!(ports.len(), 4);
        assert_eq!(ports[0].network.id, "net-a");
        assert!(ports[1].network.is_empty());
        assert!(ports[2].network.is_empty());
        assert_eq!(ports[3].network.id, "net-z");
        // Explicit ports keep their own trunk setting
        assert_eq!(ports[3].trunk, None);
        assert_eq!(ports[0].trunk, Some(true));
    }

    #[test]
    fn test_root_volume_carries_image() {
        let spec = OpenstackProviderSpec {
            image: "ignored".to_string(),
            root_volume: Some(RootVolume {
                source_uuid: "rhcos".to_string(),
                size: 25,
                volume_type: "ssd".to_string(),
                zone: "nova".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(image_name(&spec), "rhcos");
        let root = root_volume(&spec).unwrap();
        assert_eq!(root.size, 25);
        assert_eq!(root.volume_type, "ssd");
        assert_eq!(root.availability_zone, "nova");

        let plain = OpenstackProviderSpec {
            image: "rhcos".to_string(),
            ..Default::default()
        };
        assert_eq!(image_name(&plain), "rhcos");
        assert!(root_volume(&plain).is_none());
    }

    #[tokio::test]
    async fn test_server_group_created_when_missing() {
        let mock = MockOpenStackClient::new();
        let spec = OpenstackProviderSpec {
            server_group_name: "workers".to_string(),
            ..Default::default()
        };

        let id = resolve_server_group(&spec, &mock).await.unwrap();

        assert_eq!(mock.call_count("create_server_group"), 1);
        let groups = mock.server_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, id);
        assert_eq!(groups[0].policies, vec![DEFAULT_SERVER_GROUP_POLICY.to_string()]);
    }

    #[tokio::test]
    async fn test_existing_server_group_is_reused() {
        let mock = MockOpenStackClient::new();
        mock.add_server_group(ServerGroup {
            id: "sg-1".to_string(),
            name: "workers".to_string(),
            ..Default::default()
        });
        let spec = OpenstackProviderSpec {
            server_group_name: "workers".to_string(),
            ..Default::default()
        };

        assert_eq!(resolve_server_group(&spec, &mock).await.unwrap(), "sg-1");
        assert_eq!(mock.call_count("create_server_group"), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_server_group_is_an_error() {
        let mock = MockOpenStackClient::new();
        for id in ["sg-1", "sg-2"] {
            mock.add_server_group(ServerGroup {
                id: id.to_string(),
                name: "workers".to_string(),
                ..Default::default()
            });
        }
        let spec = OpenstackProviderSpec {
            server_group_name: "workers".to_string(),
            ..Default::default()
        };

        let err = resolve_server_group(&spec, &mock).await.unwrap_err();
        assert!(err.to_string().contains("more than one server group"));
        assert!(err.is_permanent());
        assert_eq!(mock.call_count("create_server_group"), 0);
    }

    #[tokio::test]
    async fn test_server_group_id_is_used_as_is() {
        let mock = MockOpenStackClient::new();
        let spec = OpenstackProviderSpec {
            server_group_id: "given".to_string(),
            server_group_name: "workers".to_string(),
            ..Default::default()
        };

        assert_eq!(resolve_server_group(&spec, &mock).await.unwrap(), "given");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_subnet_only_ports_resolve_network() {
        let mock = MockOpenStackClient::new();
        mock.add_subnet(Subnet {
            id: "s1".to_string(),
            network_id: "net-1".to_string(),
            ..Default::default()
        });
        let mut ports = vec![PortSpec {
            fixed_ips: vec![FixedIp {
                subnet: Some(SubnetFilter {
                    id: "s1".to_string(),
                    ..Default::default()
                }),
                ip_address: String::new(),
            }],
            ..Default::default()
        }];

        resolve_subnet_networks(&mut ports, &mock).await.unwrap();
        assert_eq!(ports[0].network.id, "net-1");

        let mut missing = vec![PortSpec {
            fixed_ips: vec![FixedIp {
                subnet: Some(SubnetFilter {
                    id: "nope".to_string(),
                    ..Default::default()
                }),
                ip_address: String::new(),
            }],
            ..Default::default()
        }];
        let err = resolve_subnet_networks(&mut missing, &mock).await.unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains(r#"no subnet found matching filter {id: "nope"}"#));
    }

    #[tokio::test]
    async fn test_subnet_lookup_failure_stays_transient() {
        let mock = MockOpenStackClient::new();
        mock.fail("list_subnets", "neutron unavailable");
        let mut ports = vec![PortSpec {
            fixed_ips: vec![FixedIp {
                subnet: Some(SubnetFilter {
                    name: "nodes".to_string(),
                    ..Default::default()
                }),
                ip_address: String::new(),
            }],
            ..Default::default()
        }];

        let err = resolve_subnet_networks(&mut ports, &mock).await.unwrap_err();
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_filters_display_only_set_fields() {
        let subnet = SubnetFilter {
            name: "nodes".to_string(),
            ip_version: 4,
            ..Default::default()
        };
        assert_eq!(subnet.to_string(), r#"{name: "nodes", ipVersion: "4"}"#);

        let network = NetworkFilter {
            id: "net-1".to_string(),
            tags: "a,b".to_string(),
            ..Default::default()
        };
        assert_eq!(network.to_string(), r#"{id: "net-1", tags: "a,b"}"#);

        assert_eq!(SecurityGroupFilter::default().to_string(), "{}");
    }

    #[tokio::test]
    async fn test_machine_to_instance_spec() {
        let mock = MockOpenStackClient::new();
        let spec = OpenstackProviderSpec {
            flavor: "m1.large".to_string(),
            image: "rhcos".to_string(),
            key_name: "ops".to_string(),
            availability_zone: "az1".to_string(),
            tags: vec!["custom".to_string()],
            config_drive: Some(true),
            networks: vec![NetworkParam {
                uuid: "net-1".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let machine = create_test_machine("worker-0", "openshift-machine-api", &spec);
        let infra = ClusterInfrastructure {
            api_server_internal_ips: vec!["10.0.0.5".to_string()],
            ingress_ips: vec!["10.0.0.7".to_string()],
            user_managed_load_balancer: false,
        };

        let instance = machine_to_instance_spec(
            &machine,
            &spec,
            TranslationContext {
                infrastructure: &infra,
                user_data: "#cloud-config",
                compute: &mock,
                network: &mock,
            },
        )
        .await
        .unwrap();

        assert_eq!(instance.name, "worker-0");
        assert_eq!(instance.image, "rhcos");
        assert_eq!(instance.flavor, "m1.large");
        assert_eq!(instance.ssh_key_name, "ops");
        assert_eq!(instance.failure_domain, "az1");
        assert!(instance.config_drive);
        assert_eq!(instance.user_data, "#cloud-config");
        assert_eq!(
            instance.tags,
            vec![
                "custom".to_string(),
                PROVIDER_TAG.to_string(),
                format!("openshift-machine-api-{}", TEST_CLUSTER_ID),
            ]
        );
        assert_eq!(instance.ports.len(), 1);
        assert_eq!(instance.ports[0].allowed_address_pairs.len(), 2);
        assert!(instance.server_group_id.is_empty());
    }

    #[tokio::test]
    async fn test_block_device_errors() {
        let mock = MockOpenStackClient::new();
        let infra = ClusterInfrastructure::default();
        let translate = |devices: Vec<AdditionalBlockDevice>| {
            let spec = OpenstackProviderSpec {
                additional_block_devices: devices,
                ..Default::default()
            };
            let machine = create_test_machine("worker-0", "default", &spec);
            (machine, spec)
        };
        let ctx = TranslationContext {
            infrastructure: &infra,
            user_data: "",
            compute: &mock,
            network: &mock,
        };

        let (machine, spec) = translate(vec![AdditionalBlockDevice {
            name: "etcd".to_string(),
            size_gib: 10,
            storage: BlockDeviceStorage::default(),
        }]);
        let err = machine_to_instance_spec(&machine, &spec, ctx).await.unwrap_err();
        assert!(err.to_string().contains("missing storage"));
        assert!(err.is_permanent());

        let (machine, spec) = translate(vec![AdditionalBlockDevice {
            name: "etcd".to_string(),
            size_gib: 10,
            storage: BlockDeviceStorage {
                storage_type: "Tape".to_string(),
                volume: None,
            },
        }]);
        let err = machine_to_instance_spec(&machine, &spec, ctx).await.unwrap_err();
        assert!(err.to_string().contains("unknown block device type: Tape"));
        assert!(err.is_permanent());

        let (machine, spec) = translate(vec![AdditionalBlockDevice {
            name: "etcd".to_string(),
            size_gib: 10,
            storage: BlockDeviceStorage {
                storage_type: "Volume".to_string(),
                volume: Some(crds::BlockDeviceVolume {
                    volume_type: "fast".to_string(),
                    availability_zone: "az2".to_string(),
                }),
            },
        }]);
        let instance = machine_to_instance_spec(&machine, &spec, ctx).await.unwrap();
        assert_eq!(
            instance.additional_block_devices,
            vec![BlockDeviceSpec {
                name: "etcd".to_string(),
                size_gib: 10,
                device_type: BlockDeviceType::Volume,
                volume_type: "fast".to_string(),
                availability_zone: "az2".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_rejected_block_device_creates_no_server_group() {
        let mock = MockOpenStackClient::new();
        let infra = ClusterInfrastructure::default();
        let spec = OpenstackProviderSpec {
            server_group_name: "workers".to_string(),
            additional_block_devices: vec![AdditionalBlockDevice {
                name: "scratch".to_string(),
                size_gib: 10,
                storage: BlockDeviceStorage {
                    storage_type: "Tape".to_string(),
                    volume: None,
                },
            }],
            ..Default::default()
        };
        let machine = create_test_machine("worker-0", "default", &spec);

        let err = machine_to_instance_spec(
            &machine,
            &spec,
            TranslationContext {
                infrastructure: &infra,
                user_data: "",
                compute: &mock,
                network: &mock,
            },
        )
        .await
        .unwrap_err();

        assert!(err.is_permanent());
        assert_eq!(mock.server_groups().len(), 0);
        assert_eq!(mock.call_count("create_server_group"), 0);
    }

    #[test]
    fn test_minimal_spec_has_port_names_only() {
        let spec = OpenstackProviderSpec {
            networks: vec![NetworkParam {
                uuid: "net-1".to_string(),
                ..Default::default()
            }],
            root_volume: Some(RootVolume {
                size: 30,
                ..Default::default()
            }),
            ..Default::default()
        };
        let machine = create_test_machine("worker-0", "default", &spec);

        let minimal = minimal_instance_spec(&machine, &spec);
        assert_eq!(minimal.name, "worker-0");
        assert_eq!(minimal.ports.len(), 1);
        assert!(minimal.ports[0].allowed_address_pairs.is_empty());
        assert_eq!(minimal.root_volume.unwrap().size, 30);
    }
}
