//! Module `v1beta1` implements the v1beta1 `FluentdConfig` CRD API.
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VERSION is the kubernetes API group's version.
pub static VERSION: &str = "v1beta1";

/// FluentdConfigSpec holds a whole `fluent.conf` fragment as a single string,
/// the CRD-backed equivalent of a ConfigMap's `fluent.conf` key.
#[derive(
    Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema,
)]
#[kube(
    group = "logs.vdp.vmware.com",
    version = "v1beta1",
    kind = "FluentdConfig",
    plural = "fluentdconfigs",
    namespaced,
    shortname = "fconf",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct FluentdConfigSpec {
    /// The fragment text, in the same DSL accepted from the ConfigMap
    /// datasource.
    #[serde(default)]
    pub fluentconf: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::CustomResourceExt;

    #[test]
    fn crd_name_matches_group_and_plural() {
        assert_eq!(FluentdConfig::crd_name(), "fluentdconfigs.logs.vdp.vmware.com");
    }
}
