pub mod workload;

pub use workload::{WorkloadIdentity, WorkloadSettings};
