//! Placement helpers: target-namespace selection, hardware signatures and
//! the labels stamped onto enrolled host records.

use gateways::{CpuInfo, HostPoolNamespace, InstanceTypeSpec};
use crds::LABEL_PREFIX;
use std::collections::BTreeMap;

/// Pick the namespace with the fewest host records.
///
/// Ties go to the earlier entry, so selection is deterministic for a stable
/// namespace listing. `None` only when no host-pool namespace exists.
pub fn select_target_namespace(
    loads: &[(HostPoolNamespace, usize)],
) -> Option<&HostPoolNamespace> {
    loads
        .iter()
        .min_by_key(|(_, count)| *count)
        .map(|(ns, _)| ns)
}

/// The hardware facts an instance type is matched on.
///
/// Matching is exact across every field; a host that differs in any one
/// dimension gets no instance type rather than a near miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareSignature {
    /// CPU model identifier
    pub cpu_id: String,
    /// Total logical CPUs (sockets x cores x threads)
    pub cpu_count: u32,
    /// GPU model, empty when none
    pub gpu_model: String,
    /// GPU count
    pub gpu_count: u32,
    /// HBM mode, empty when not applicable
    pub hbm_mode: String,
    /// Memory bucket, e.g. "512Gi"
    pub memory: String,
}

impl HardwareSignature {
    /// Whether an instance type's hardware profile matches exactly.
    pub fn matches(&self, spec: &InstanceTypeSpec) -> bool {
        self.cpu_id == spec.cpu_id
            && self.cpu_count == spec.cpu_sockets * spec.cpu_cores * spec.cpu_threads
            && self.gpu_model == spec.gpu_model
            && self.gpu_count == spec.gpu_count
            && self.hbm_mode == spec.hbm_mode
            && self.memory == spec.memory
    }
}

/// Find the instance type matching a signature, if any.
pub fn match_instance_type<'a>(
    signature: &HardwareSignature,
    types: &'a [InstanceTypeSpec],
) -> Option<&'a InstanceTypeSpec> {
    types.iter().find(|t| signature.matches(t))
}

/// Round inspected memory to the nearest power-of-two GiB bucket.
///
/// Inspection reports usable memory, which sits a little under the installed
/// capacity; bucketing recovers the nominal size ("503 GiB" -> "512Gi").
pub fn memory_bucket(ram_mebibytes: u64) -> String {
    let gib = ram_mebibytes / 1024;
    if gib == 0 {
        return "0Gi".to_string();
    }
    let mut lower: u64 = 1;
    while lower * 2 <= gib {
        lower *= 2;
    }
    let upper = lower * 2;
    let bucket = if gib - lower > upper - gib { upper } else { lower };
    format!("{}Gi", bucket)
}

/// Hardware labels attached to an enrolled host record.
///
/// Written before the instance-type match, so an unmatched host still
/// carries its raw hardware facts.
pub fn hardware_labels(signature: &HardwareSignature, cpu: &CpuInfo) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(format!("{}/cpu-id", LABEL_PREFIX), signature.cpu_id.clone());
    labels.insert(format!("{}/cpu-count", LABEL_PREFIX), signature.cpu_count.to_string());
    labels.insert(format!("{}/cpu-sockets", LABEL_PREFIX), cpu.sockets.to_string());
    labels.insert(format!("{}/cpu-cores", LABEL_PREFIX), cpu.cores.to_string());
    labels.insert(format!("{}/cpu-threads", LABEL_PREFIX), cpu.threads.to_string());
    labels.insert(format!("{}/cpu-vendor", LABEL_PREFIX), cpu.vendor.clone());
    labels.insert(format!("{}/memory", LABEL_PREFIX), signature.memory.clone());
    if !signature.gpu_model.is_empty() {
        labels.insert(format!("{}/gpu-model", LABEL_PREFIX), signature.gpu_model.clone());
        labels.insert(format!("{}/gpu-count", LABEL_PREFIX), signature.gpu_count.to_string());
    }
    if !signature.hbm_mode.is_empty() {
        labels.insert(format!("{}/hbm-mode", LABEL_PREFIX), signature.hbm_mode.clone());
    }
    labels
}

/// Label stamped once the catalog match succeeded.
pub fn instance_type_labels(instance_type: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(format!("{}/instance-type", LABEL_PREFIX), instance_type.to_string());
    labels
}

/// Cluster-membership labels for hosts destined for a named cluster, plus
/// the trigger that marks the host ready for cluster validation.
pub fn cluster_labels(cluster: &str, size: u32, network_mode: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(format!("{}/validation-ready", LABEL_PREFIX), "true".to_string());
    labels.insert(format!("{}/cluster-group-id", LABEL_PREFIX), cluster.to_string());
    labels.insert(format!("{}/cluster-size", LABEL_PREFIX), size.to_string());
    labels.insert(
        format!("{}/cluster-network-mode", LABEL_PREFIX),
        network_mode.to_string(),
    );
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str) -> HostPoolNamespace {
        HostPoolNamespace {
            name: name.to_string(),
            ironic_ip: Some("10.40.0.1".to_string()),
        }
    }

    #[test]
    fn test_select_least_loaded_namespace() {
        let loads = vec![(pool("pool-a"), 3), (pool("pool-b"), 1), (pool("pool-c"), 1)];
        let selected = select_target_namespace(&loads).unwrap();
        // pool-b and pool-c tie at 1; the earlier entry wins
        assert_eq!(selected.name, "pool-b");
    }

    #[test]
    fn test_select_single_empty_namespace() {
        let loads = vec![(pool("pool-a"), 0)];
        assert_eq!(select_target_namespace(&loads).unwrap().name, "pool-a");
    }

    #[test]
    fn test_select_no_namespaces() {
        assert!(select_target_namespace(&[]).is_none());
    }

    fn signature() -> HardwareSignature {
        HardwareSignature {
            cpu_id: "8480+".to_string(),
            cpu_count: 224,
            gpu_model: "H100".to_string(),
            gpu_count: 8,
            hbm_mode: String::new(),
            memory: "2048Gi".to_string(),
        }
    }

    fn instance_type(name: &str) -> InstanceTypeSpec {
        InstanceTypeSpec {
            name: name.to_string(),
            cpu_id: "8480+".to_string(),
            cpu_cores: 56,
            cpu_sockets: 2,
            cpu_threads: 2,
            gpu_model: "H100".to_string(),
            gpu_count: 8,
            hbm_mode: String::new(),
            memory: "2048Gi".to_string(),
        }
    }

    #[test]
    fn test_signature_matches_exact_profile() {
        let types = vec![instance_type("bm.gpu.h100.8")];
        let matched = match_instance_type(&signature(), &types).unwrap();
        assert_eq!(matched.name, "bm.gpu.h100.8");
    }

    #[test]
    fn test_signature_rejects_partial_match() {
        // Same CPU and memory, different GPU count: no match at all
        let mut other = instance_type("bm.gpu.h100.4");
        other.gpu_count = 4;
        let types = vec![other];
        assert!(match_instance_type(&signature(), &types).is_none());

        // Different memory bucket alone also disqualifies
        let mut other = instance_type("bm.gpu.h100.8.small");
        other.memory = "1024Gi".to_string();
        let types = vec![other];
        assert!(match_instance_type(&signature(), &types).is_none());
    }

    #[test]
    fn test_memory_bucket_rounds_to_power_of_two() {
        assert_eq!(memory_bucket(512 * 1024), "512Gi");
        // 503 GiB of usable memory on a 512 GiB host
        assert_eq!(memory_bucket(503 * 1024), "512Gi");
        assert_eq!(memory_bucket(257 * 1024), "256Gi");
        assert_eq!(memory_bucket(2011 * 1024), "2048Gi");
        assert_eq!(memory_bucket(0), "0Gi");
    }

    #[test]
    fn test_hardware_labels_omit_absent_gpu() {
        let sig = HardwareSignature {
            cpu_id: "8480+".to_string(),
            cpu_count: 224,
            gpu_model: String::new(),
            gpu_count: 0,
            hbm_mode: String::new(),
            memory: "512Gi".to_string(),
        };
        let cpu = CpuInfo {
            id: "8480+".to_string(),
            vendor: "Intel".to_string(),
            sockets: 2,
            cores: 56,
            threads: 2,
        };
        let labels = hardware_labels(&sig, &cpu);
        assert_eq!(labels.get("enroll.microscaler.io/cpu-count").unwrap(), "224");
        assert!(!labels.contains_key("enroll.microscaler.io/gpu-model"));
        assert!(!labels.contains_key("enroll.microscaler.io/hbm-mode"));
        // The instance type is stamped separately, after the catalog match
        assert!(!labels.contains_key("enroll.microscaler.io/instance-type"));
        let type_labels = instance_type_labels("bm.standard.112");
        assert_eq!(
            type_labels.get("enroll.microscaler.io/instance-type").unwrap(),
            "bm.standard.112"
        );
    }
}
