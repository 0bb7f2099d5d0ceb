#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Api contains the `FluentdConfig` CRD used by the Kubernetes datasource's
//! custom-resource mode.

pub mod v1beta1;

/// GROUP is the kubernetes API group.
pub static GROUP: &str = "logs.vdp.vmware.com";

#[cfg(test)]
mod tests {
    use super::*;

    use kube::core::{CustomResourceExt, Resource};

    #[test]
    fn dummy() {
        println!("name = {}", v1beta1::FluentdConfig::crd_name());
        println!("kind = {}", v1beta1::FluentdConfig::kind(&()));
        assert_eq!(GROUP, "logs.vdp.vmware.com");
    }
}
