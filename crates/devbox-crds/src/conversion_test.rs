use super::*;
use crate::common::Config;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::json;
use std::collections::BTreeMap;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_720_000_000 + secs, 0).single().unwrap()
}

fn history(id: &str, image: &str, secs: i64) -> v1alpha1::CommitHistory {
    v1alpha1::CommitHistory {
        container_id: id.to_string(),
        image: image.to_string(),
        time: at(secs),
        pod: format!("pod-{id}"),
        node: "node-a".to_string(),
        status: v1alpha1::CommitStatus::Success,
        predicated_status: v1alpha1::CommitStatus::Success,
    }
}

fn owner(api_version: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: "Devbox".to_string(),
        name: "owner".to_string(),
        uid: "uid-1".to_string(),
        ..Default::default()
    }
}

fn v1_devbox(history_entries: Vec<v1alpha1::CommitHistory>) -> v1alpha1::Devbox {
    v1alpha1::Devbox {
        metadata: ObjectMeta {
            name: Some("chisel".to_string()),
            namespace: Some("ns-dev".to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "chisel".to_string())])),
            owner_references: Some(vec![
                owner("devbox.sealos.io/v1alpha1"),
                owner("apps/v1"),
            ]),
            ..Default::default()
        },
        spec: v1alpha1::DevboxSpec {
            state: v1alpha1::DevboxState::Stopped,
            squash: true,
            image: "ghcr.io/labring/devbox/go:1.22".to_string(),
            template_id: "tpl-go".to_string(),
            config: Config {
                user: "devbox".to_string(),
                working_dir: "/home/devbox/project".to_string(),
                command: vec!["/bin/bash".to_string(), "-c".to_string()],
                ..Default::default()
            },
            network: v1alpha1::NetworkSpec {
                network_type: v1alpha1::NetworkType::Tailnet,
                extra_ports: vec![],
            },
            ..Default::default()
        },
        status: Some(v1alpha1::DevboxStatus {
            commit_history: history_entries,
            phase: v1alpha1::DevboxPhase::Stopped,
            network: v1alpha1::NetworkStatus {
                network_type: v1alpha1::NetworkType::Tailnet,
                node_port: 30022,
                tailnet: "tail-1".to_string(),
            },
            ..Default::default()
        }),
    }
}

#[test]
fn test_upgrade_copies_spec_and_retags_enums() {
    let src = v1_devbox(vec![]);

    let dst = upgrade_devbox(&src);

    assert_eq!(dst.spec.state, v1alpha2::DevboxState::Stopped);
    assert_eq!(dst.spec.network.network_type, v1alpha2::NetworkType::Tailnet);
    assert_eq!(dst.spec.image, src.spec.image);
    assert_eq!(dst.spec.template_id, "tpl-go");
    assert_eq!(dst.spec.config, src.spec.config);

    let status = dst.status.unwrap();
    assert_eq!(status.state, v1alpha2::DevboxState::Stopped);
    assert_eq!(status.phase, v1alpha2::DevboxPhase::Stopped);
    assert_eq!(status.network.node_port, 30022);
    assert_eq!(status.network.tailnet, "tail-1");
}

#[test]
fn test_upgrade_preserves_identity_and_rewrites_owner_refs() {
    let src = v1_devbox(vec![]);

    let dst = upgrade_devbox(&src);

    assert_eq!(dst.metadata.name.as_deref(), Some("chisel"));
    assert_eq!(dst.metadata.namespace.as_deref(), Some("ns-dev"));
    assert_eq!(dst.metadata.labels, src.metadata.labels);
    let owners = dst.metadata.owner_references.unwrap();
    assert_eq!(owners[0].api_version, "devbox.sealos.io/v1alpha2");
    assert_eq!(owners[1].api_version, "apps/v1");
}

#[test]
fn test_upgrade_storage_limit_default_and_overrides() {
    let mut src = v1_devbox(vec![]);
    assert_eq!(upgrade_devbox(&src).spec.storage_limit, DEFAULT_STORAGE_LIMIT);

    let options = ConversionOptions {
        default_storage_limit: "20Gi".to_string(),
    };
    assert_eq!(upgrade_devbox_with(&src, &options).spec.storage_limit, "20Gi");

    src.metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_STORAGE_LIMIT.to_string(),
        "50Gi".to_string(),
    )]));
    assert_eq!(upgrade_devbox_with(&src, &options).spec.storage_limit, "50Gi");
}

#[test]
fn test_upgrade_builds_commit_chain_from_spec_image() {
    let src = v1_devbox(vec![
        history("c2", "registry/chisel:v2", 20),
        history("c1", "registry/chisel:v1", 10),
    ]);

    let status = upgrade_devbox(&src).status.unwrap();

    assert_eq!(status.commit_records.len(), 3);
    assert_eq!(status.commit_records["c1"].base_image, src.spec.image);
    assert_eq!(status.commit_records["c2"].base_image, "registry/chisel:v1");
    let content = status.content_record().unwrap();
    assert_eq!(content.base_image, "registry/chisel:v2");
    assert_eq!(content.commit_status, v1alpha2::CommitStatus::Pending);
}

#[test]
fn test_upgrade_without_status_has_content_record() {
    let mut src = v1_devbox(vec![]);
    src.status = None;

    let status = upgrade_devbox(&src).status.unwrap();

    assert_eq!(status.commit_records.len(), 1);
    assert_eq!(status.content_record().unwrap().base_image, src.spec.image);
}

#[test]
fn test_downgrade_orders_history_by_commit_time() {
    let src = upgrade_devbox(&v1_devbox(vec![
        history("c2", "img:v2", 20),
        history("c1", "img:v1", 10),
    ]));

    let dst = downgrade_devbox(&src);
    let history = dst.status.unwrap().commit_history;

    // Content record survives as a history entry with an empty image
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].container_id, "c1");
    assert_eq!(history[1].container_id, "c2");
    assert_eq!(history[2].image, "");
    assert_eq!(history[2].status, v1alpha1::CommitStatus::Pending);
    assert_eq!(history[0].pod, "");
    assert_eq!(history[0].predicated_status, history[0].status);
}

#[test]
fn test_downgrade_drops_v2_only_fields() {
    let src = upgrade_devbox(&v1_devbox(vec![]));

    let dst = downgrade_devbox(&src);

    assert!(!dst.spec.squash);
    assert_eq!(dst.spec.state, v1alpha1::DevboxState::Stopped);
    let status = dst.status.unwrap();
    assert!(status.state.is_none());
    assert!(status.last_termination_state.is_none());
    let owners = dst.metadata.owner_references.unwrap();
    assert_eq!(owners[0].api_version, "devbox.sealos.io/v1alpha1");
}

#[test]
fn test_round_trip_preserves_name_and_count_plus_one() {
    let src = v1_devbox(vec![
        history("c1", "img:v1", 10),
        history("", "dropped", 15),
        history("c2", "img:v2", 20),
    ]);

    let upgraded = upgrade_devbox(&src);
    let back = downgrade_devbox(&upgraded);

    assert_eq!(back.metadata.name, src.metadata.name);
    assert_eq!(back.metadata.namespace, src.metadata.namespace);
    assert_eq!(upgraded.status.unwrap().commit_records.len(), 3);
}

#[test]
fn test_release_round_trip() {
    let src = v1alpha1::DevBoxRelease {
        metadata: ObjectMeta {
            name: Some("chisel-v1".to_string()),
            namespace: Some("ns-dev".to_string()),
            owner_references: Some(vec![owner("devbox.sealos.io/v1alpha1")]),
            ..Default::default()
        },
        spec: v1alpha1::DevBoxReleaseSpec {
            devbox_name: "chisel".to_string(),
            new_tag: "v1".to_string(),
            notes: "first".to_string(),
        },
        status: Some(v1alpha1::DevBoxReleaseStatus {
            phase: v1alpha1::DevboxReleasePhase::Success,
            original_image: "img:v0".to_string(),
        }),
    };

    let upgraded = upgrade_release(&src);
    assert_eq!(upgraded.spec.devbox_name, "chisel");
    assert_eq!(
        upgraded.status.as_ref().unwrap().phase,
        v1alpha2::DevboxReleasePhase::Success
    );
    assert_eq!(
        upgraded.metadata.owner_references.as_ref().unwrap()[0].api_version,
        "devbox.sealos.io/v1alpha2"
    );

    let back = downgrade_release(&upgraded);
    assert_eq!(back.spec, src.spec);
    assert_eq!(back.status, src.status);
    assert_eq!(back.metadata, src.metadata);
}

#[test]
fn test_convert_to_same_version_is_noop() {
    let hub = upgrade_devbox(&v1_devbox(vec![]));
    let content_id = hub.status.as_ref().unwrap().content_id.clone();

    let converted = DevboxVersion::V1alpha2(hub).convert_to(ApiVersion::V1alpha2);

    match converted {
        DevboxVersion::V1alpha2(devbox) => {
            assert_eq!(devbox.status.unwrap().content_id, content_id);
        }
        DevboxVersion::V1alpha1(_) => panic!("expected v1alpha2"),
    }
}

#[test]
fn test_convert_value_upgrades_json_object() {
    let value = serde_json::to_value(v1_devbox(vec![history("c1", "img:v1", 10)])).unwrap();

    let converted = convert_value(value, "devbox.sealos.io/v1alpha2").unwrap();

    assert_eq!(converted["apiVersion"], "devbox.sealos.io/v1alpha2");
    assert_eq!(converted["kind"], "Devbox");
    assert_eq!(converted["spec"]["storageLimit"], DEFAULT_STORAGE_LIMIT);
    assert_eq!(
        converted["status"]["commitRecords"]["c1"]["baseImage"],
        "ghcr.io/labring/devbox/go:1.22"
    );
    assert!(converted["spec"].get("squash").is_none());
}

#[test]
fn test_convert_value_accepts_bare_version() {
    let release = json!({
        "apiVersion": "devbox.sealos.io/v1alpha2",
        "kind": "DevBoxRelease",
        "metadata": {"name": "r1", "namespace": "ns"},
        "spec": {"devboxName": "chisel", "newTag": "v2"}
    });

    let converted = convert_value(release, "v1alpha1").unwrap();

    assert_eq!(converted["apiVersion"], "devbox.sealos.io/v1alpha1");
    assert_eq!(converted["spec"]["newTag"], "v2");
}

#[test]
fn test_convert_value_rejects_unknown_kind() {
    let value = json!({
        "apiVersion": "devbox.sealos.io/v1alpha1",
        "kind": "Deployment",
        "metadata": {"name": "x"}
    });

    let err = convert_value(value, "v1alpha2").unwrap_err();

    assert!(matches!(err, ConversionError::UnsupportedKind(kind) if kind == "Deployment"));
}

#[test]
fn test_convert_value_rejects_foreign_or_unserved_versions() {
    let foreign = json!({"apiVersion": "apps/v1", "kind": "Devbox"});
    assert!(matches!(
        convert_value(foreign, "v1alpha2"),
        Err(ConversionError::UnsupportedVersion(_))
    ));

    let unserved = json!({"apiVersion": "devbox.sealos.io/v1beta1", "kind": "Devbox"});
    assert!(matches!(
        convert_value(unserved, "v1alpha2"),
        Err(ConversionError::UnsupportedVersion(_))
    ));

    let good = serde_json::to_value(v1_devbox(vec![])).unwrap();
    assert!(matches!(
        convert_value(good, "v2"),
        Err(ConversionError::UnsupportedVersion(_))
    ));
}

#[test]
fn test_convert_value_reports_missing_type_meta_and_bad_payload() {
    let missing = json!({"kind": "Devbox"});
    assert!(matches!(
        convert_value(missing, "v1alpha2"),
        Err(ConversionError::MissingTypeMeta("apiVersion"))
    ));

    let bad_state = json!({
        "apiVersion": "devbox.sealos.io/v1alpha1",
        "kind": "Devbox",
        "metadata": {"name": "x"},
        "spec": {"state": "Exploded", "image": "img"}
    });
    assert!(matches!(
        convert_value(bad_state, "v1alpha2"),
        Err(ConversionError::Decode { .. })
    ));
}

#[test]
fn test_api_version_parsing() {
    assert_eq!("v1alpha1".parse::<ApiVersion>().unwrap(), ApiVersion::V1alpha1);
    assert_eq!(
        "devbox.sealos.io/v1alpha2".parse::<ApiVersion>().unwrap(),
        ApiVersion::V1alpha2
    );
    assert!("example.com/v1alpha2".parse::<ApiVersion>().is_err());
    assert_eq!(ApiVersion::HUB.api_version(), "devbox.sealos.io/v1alpha2");
    assert_eq!(ApiVersion::V1alpha1.to_string(), "v1alpha1");
}
