pub mod client;
pub mod cluster;
pub mod error;
pub mod provision;
pub mod resources;
pub mod retry;
pub mod update;

pub use client::{ClientFactory, CredentialSource};
pub use cluster::{ClusterApi, ClusterConnector, KubeCluster};
pub use error::{ClusterError, Result};
pub use provision::provision_workload;
pub use resources::{build_workload_resources, WorkloadResources};
pub use retry::{retry_on_conflict, RetryPolicy};
pub use update::{update_deployment_with, update_image};
