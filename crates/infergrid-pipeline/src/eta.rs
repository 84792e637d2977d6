//! Closed-form ETA estimation.
//!
//! The estimate for a step is the ceiling of the suffix sum of scaled
//! per-step base minutes from that step onward, so it is monotone
//! non-increasing as the pipeline advances. Scale factors depend on
//! the model-size tier and the device class doing the serving.

use infergrid_core::{DeviceType, NodeSpec};

/// Pipeline steps in execution order.
pub const STEP_ORDER: [&str; 6] = [
    "verify_cluster_connection",
    "transfer_model_to_cluster",
    "deploy_to_engine",
    "verify_deployment_status",
    "run_performance_benchmark",
    "results",
];

/// Base minutes per step, aligned with `STEP_ORDER`.
const BASE_MINUTES: [f64; 6] = [2.0, 10.0, 8.0, 4.0, 6.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeTier {
    Small,
    Mid,
    Large,
}

fn tier(size_params: u64) -> SizeTier {
    if size_params > 7_000_000_000 {
        SizeTier::Large
    } else if size_params > 3_000_000_000 {
        SizeTier::Mid
    } else {
        SizeTier::Small
    }
}

fn scale(step_index: usize, tier: SizeTier, device: DeviceType) -> f64 {
    match device {
        DeviceType::Cpu => match step_index {
            // Transfer is disk and network bound; big weights dominate.
            1 => {
                if tier == SizeTier::Small {
                    1.5
                } else {
                    2.0
                }
            }
            2 | 3 | 4 => 1.5,
            _ => 1.0,
        },
        DeviceType::Gpu => match (step_index, tier) {
            (1, SizeTier::Large) => 1.5,
            (1, SizeTier::Mid) => 1.2,
            (2, SizeTier::Large) => 1.25,
            _ => 1.0,
        },
    }
}

/// Position of a step in `STEP_ORDER`, if it is a known step.
pub fn step_index(step: &str) -> Option<usize> {
    STEP_ORDER.iter().position(|s| *s == step)
}

/// Whole minutes remaining from `step` (inclusive) to the end.
/// Unknown steps estimate zero.
pub fn estimate_minutes(step: &str, size_params: u64, device: DeviceType) -> u64 {
    let Some(start) = step_index(step) else {
        return 0;
    };
    let tier = tier(size_params);
    let total: f64 = (start..STEP_ORDER.len())
        .map(|i| BASE_MINUTES[i] * scale(i, tier, device))
        .sum();
    total.ceil() as u64
}

/// Device class used for the estimate: GPU wins if any device in the
/// request is a GPU.
pub fn dominant_device(nodes: &[NodeSpec]) -> DeviceType {
    let any_gpu = nodes
        .iter()
        .flat_map(|n| &n.devices)
        .any(|d| d.device_type == DeviceType::Gpu);
    if any_gpu { DeviceType::Gpu } else { DeviceType::Cpu }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infergrid_core::DeviceSpec;

    #[test]
    fn seven_billion_cpu_at_transfer_is_48_minutes() {
        let eta = estimate_minutes("transfer_model_to_cluster", 7_000_000_000, DeviceType::Cpu);
        assert_eq!(eta, 48);
    }

    #[test]
    fn eta_is_monotone_non_increasing_along_the_pipeline() {
        for size in [1_000_000_000u64, 3_500_000_000, 7_000_000_000, 70_000_000_000] {
            for device in [DeviceType::Cpu, DeviceType::Gpu] {
                let mut prev = u64::MAX;
                for step in STEP_ORDER {
                    let eta = estimate_minutes(step, size, device);
                    assert!(
                        eta <= prev,
                        "eta grew at {step} for size={size} device={device:?}"
                    );
                    prev = eta;
                }
            }
        }
    }

    #[test]
    fn unknown_step_estimates_zero() {
        assert_eq!(estimate_minutes("nonsense", 7_000_000_000, DeviceType::Cpu), 0);
    }

    #[test]
    fn gpu_presence_dominates_device_class() {
        let nodes = vec![NodeSpec {
            name: "n".to_string(),
            devices: vec![
                DeviceSpec {
                    name: "cpu-0".to_string(),
                    image: "img".to_string(),
                    replica: 1,
                    memory: "8Gi".to_string(),
                    device_type: DeviceType::Cpu,
                    tp_size: 1,
                    concurrency: 4,
                    args: vec![],
                    envs: Default::default(),
                },
                DeviceSpec {
                    name: "gpu-0".to_string(),
                    image: "img".to_string(),
                    replica: 1,
                    memory: "16Gi".to_string(),
                    device_type: DeviceType::Gpu,
                    tp_size: 1,
                    concurrency: 8,
                    args: vec![],
                    envs: Default::default(),
                },
            ],
        }];
        assert_eq!(dominant_device(&nodes), DeviceType::Gpu);
        assert_eq!(dominant_device(&[]), DeviceType::Cpu);
    }
}
