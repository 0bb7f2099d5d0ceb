//! Installs the `FluentdConfig` CRD on startup if the cluster doesn't
//! already have it, and waits for it to become established.

use std::time::Duration;

use api::v1beta1::FluentdConfig;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::CustomResourceExt;
use kube::{Api, Client};
use tracing::info;

const FIELD_MANAGER: &str = "kube-fluentd-operator";
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum CrdError {
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{} CRD did not become established before the timeout", FluentdConfig::crd_name())]
    NotEstablished,
}

/// Applies the `FluentdConfig` CRD and blocks until the apiserver reports it
/// Established, so callers can safely start watching the resource right
/// after.
pub async fn ensure_installed(client: Client) -> Result<(), CrdError> {
    let api: Api<CustomResourceDefinition> = Api::all(client);
    let crd = FluentdConfig::crd();
    let name = FluentdConfig::crd_name();

    api.patch(
        name,
        &kube::api::PatchParams::apply(FIELD_MANAGER),
        &kube::api::Patch::Apply(&crd),
    )
    .await?;

    info!(name, "FluentdConfig CRD applied, waiting for it to become established");

    tokio::time::timeout(AVAILABILITY_TIMEOUT, async {
        loop {
            let current = api.get(name).await?;
            let established = current
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Established" && c.status == "True"));
            if established {
                return Ok::<(), kube::Error>(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .map_err(|_| CrdError::NotEstablished)??;

    info!(name, "FluentdConfig CRD is available");
    Ok(())
}
