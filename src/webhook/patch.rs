//! # Injection Patch
//!
//! JSON patch operations that add the agent to a pod:
//! - an `emptyDir` volume for the agent binaries and secret volumes for its configuration
//! - an init container that installs the agent into the shared volume
//! - a volume mount and `LD_PRELOAD` for every application container
//! - the data-ingest endpoint mount when data ingest is routed into the pod
//! - the injected annotation that makes reinvocations a no-op
//!
//! Arrays that do not exist yet are added whole; existing arrays are appended to.

use crate::constants::{DATA_INGEST_SECRET_NAME, INIT_SECRET_NAME, INJECTED_ANNOTATION};
use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, PatchOperation};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector, Pod,
    SecretVolumeSource, Volume, VolumeMount,
};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub const BIN_VOLUME: &str = "agent-operator-bin";
pub const CONFIG_VOLUME: &str = "agent-operator-config";
pub const DATA_INGEST_VOLUME: &str = "agent-operator-data-ingest-endpoint";

pub const INIT_CONTAINER_NAME: &str = "install-agent";

/// Where application containers see the installed agent
pub const INSTALL_PATH: &str = "/opt/agent-operator";
pub const INIT_BIN_MOUNT_PATH: &str = "/mnt/bin";
pub const INIT_CONFIG_MOUNT_PATH: &str = "/mnt/config";
pub const DATA_INGEST_MOUNT_PATH: &str = "/var/lib/agent-operator/enrichment/endpoint";

pub const LD_PRELOAD: &str = "LD_PRELOAD";
pub const AGENT_LIBRARY: &str = "/opt/agent-operator/agent/lib64/libagentproc.so";

/// What to inject into a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionPlan {
    /// Init container image
    pub image: String,
    /// Mount the data-ingest endpoint secret into every container
    pub data_ingest: bool,
}

/// Build the patch operations that inject the agent into `pod`
pub fn build_patch_operations(pod: &Pod, plan: &InjectionPlan) -> Vec<PatchOperation> {
    let spec = pod.spec.clone().unwrap_or_default();
    let mut ops = Vec::new();

    let mut volumes = vec![
        Volume {
            name: BIN_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        secret_volume(CONFIG_VOLUME, INIT_SECRET_NAME),
    ];
    if plan.data_ingest {
        volumes.push(secret_volume(DATA_INGEST_VOLUME, DATA_INGEST_SECRET_NAME));
    }
    append_all(&mut ops, &["spec", "volumes"], spec.volumes.is_some(), &volumes);

    append_all(
        &mut ops,
        &["spec", "initContainers"],
        spec.init_containers.is_some(),
        &[init_container(&spec.containers, &plan.image)],
    );

    for (index, container) in spec.containers.iter().enumerate() {
        let index = index.to_string();
        let base = ["spec", "containers", index.as_str()];

        let mut mounts = vec![VolumeMount {
            name: BIN_VOLUME.to_string(),
            mount_path: INSTALL_PATH.to_string(),
            ..Default::default()
        }];
        if plan.data_ingest {
            mounts.push(VolumeMount {
                name: DATA_INGEST_VOLUME.to_string(),
                mount_path: DATA_INGEST_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            });
        }
        append_all(
            &mut ops,
            &[base[0], base[1], base[2], "volumeMounts"],
            container.volume_mounts.is_some(),
            &mounts,
        );

        preload_agent(&mut ops, &base, container);
    }

    ops.push(annotation_operation(pod));
    ops
}

fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn init_container(containers: &[Container], image: &str) -> Container {
    let mut env = vec![
        plain_env("CONTAINERS_COUNT", containers.len().to_string()),
        field_env("K8S_PODNAME", "metadata.name"),
        field_env("K8S_PODUID", "metadata.uid"),
        field_env("K8S_NAMESPACE", "metadata.namespace"),
        plain_env("INSTALL_PATH", INSTALL_PATH.to_string()),
    ];
    for (n, container) in containers.iter().enumerate() {
        let n = n + 1;
        env.push(plain_env(
            &format!("CONTAINER_{n}_NAME"),
            container.name.clone(),
        ));
        env.push(plain_env(
            &format!("CONTAINER_{n}_IMAGE"),
            container.image.clone().unwrap_or_default(),
        ));
    }

    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        env: Some(env),
        volume_mounts: Some(vec![
            VolumeMount {
                name: BIN_VOLUME.to_string(),
                mount_path: INIT_BIN_MOUNT_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: INIT_CONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Put the agent library in front of any preload the container already sets
fn preload_agent(ops: &mut Vec<PatchOperation>, base: &[&str; 3], container: &Container) {
    let existing = container.env.as_ref().and_then(|env| {
        env.iter()
            .position(|var| var.name == LD_PRELOAD)
            .map(|position| (position, &env[position]))
    });

    match existing {
        // A value next to valueFrom is rejected by the API server
        Some((_, var)) if var.value_from.is_some() => {
            warn!(
                container = %container.name,
                "LD_PRELOAD is set from a reference, leaving it unchanged"
            );
        }
        Some((position, var)) => {
            let value = var.value.clone();
            let position = position.to_string();
            let preload = match value.as_deref().map(str::trim) {
                Some(current) if !current.is_empty() => format!("{AGENT_LIBRARY} {current}"),
                _ => AGENT_LIBRARY.to_string(),
            };
            ops.push(add(
                PointerBuf::from_tokens([base[0], base[1], base[2], "env", position.as_str(), "value"]),
                Value::String(preload),
            ));
        }
        None => append_all(
            ops,
            &[base[0], base[1], base[2], "env"],
            container.env.is_some(),
            &[plain_env(LD_PRELOAD, AGENT_LIBRARY.to_string())],
        ),
    }
}

fn annotation_operation(pod: &Pod) -> PatchOperation {
    match pod.metadata.annotations {
        Some(_) => add(
            PointerBuf::from_tokens(["metadata", "annotations", INJECTED_ANNOTATION]),
            Value::String("true".to_string()),
        ),
        None => add(
            PointerBuf::from_tokens(["metadata", "annotations"]),
            serde_json::json!({ INJECTED_ANNOTATION: "true" }),
        ),
    }
}

/// Add `items` to the array at `path`, creating the array when it does not exist
fn append_all<T: Serialize>(
    ops: &mut Vec<PatchOperation>,
    path: &[&str],
    present: bool,
    items: &[T],
) {
    let values = items
        .iter()
        .map(|item| serde_json::to_value(item).unwrap_or_default());

    if present {
        for value in values {
            ops.push(add(
                PointerBuf::from_tokens(path.iter().copied().chain(["-"])),
                value,
            ));
        }
    } else {
        ops.push(add(
            PointerBuf::from_tokens(path.iter().copied()),
            Value::Array(values.collect()),
        ));
    }
}

fn add(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}
