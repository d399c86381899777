use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionMode {
    #[default]
    OnDemand,
    Spot,
}

impl fmt::Display for ProvisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionMode::OnDemand => write!(f, "on-demand"),
            ProvisionMode::Spot => write!(f, "spot"),
        }
    }
}

/// Instance size range used for spot capacity. Memory is in GiB.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpotShape {
    pub cpu_min: u32,
    pub cpu_max: u32,
    pub mem_min: u32,
    pub mem_max: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: String,
}

impl Taint {
    /// Renders the taint the way kubelet flags expect it: `key=value:Effect`.
    pub fn to_flag_value(&self) -> String {
        if self.value.is_empty() {
            format!("{}:{}", self.key, self.effect)
        } else {
            format!("{}={}:{}", self.key, self.value, self.effect)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub node_id: String,
    pub node_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot: Option<SpotShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<String>,
    #[serde(default)]
    pub provision_mode: ProvisionMode,
    #[serde(default)]
    pub is_gpu: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

impl NodeSpec {
    pub fn is_spot(&self) -> bool {
        self.provision_mode == ProvisionMode::Spot
    }

    /// Checks the fields every provider relies on. Provider specific
    /// requirements are checked when the IaC variables are derived.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.node_id.trim().is_empty() {
            return Err(ValidationError::MissingField("nodeId"));
        }
        if self.node_name.trim().is_empty() {
            return Err(ValidationError::MissingField("nodeName"));
        }
        if self.region.trim().is_empty() {
            return Err(ValidationError::MissingField("region"));
        }
        if self.node_id.contains(['/', '\\']) || self.node_id.starts_with('.') {
            return Err(ValidationError::InvalidField {
                field: "nodeId",
                reason: format!("`{}` is not usable as a storage key", self.node_id),
            });
        }

        match self.provision_mode {
            ProvisionMode::OnDemand => {
                let has_type = self
                    .instance_type
                    .as_deref()
                    .is_some_and(|t| !t.trim().is_empty());
                if !has_type {
                    return Err(ValidationError::MissingField("instanceType"));
                }
            }
            ProvisionMode::Spot => {
                let shape = self.spot.ok_or(ValidationError::MissingField("spot"))?;
                if shape.cpu_min == 0 || shape.cpu_min > shape.cpu_max {
                    return Err(ValidationError::InvalidField {
                        field: "spot.cpuMin",
                        reason: format!("range {}..{} is empty", shape.cpu_min, shape.cpu_max),
                    });
                }
                if shape.mem_min == 0 || shape.mem_min > shape.mem_max {
                    return Err(ValidationError::InvalidField {
                        field: "spot.memMin",
                        reason: format!("range {}..{} is empty", shape.mem_min, shape.mem_max),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_demand() -> NodeSpec {
        serde_yaml::from_str(
            r#"
nodeId: n1
nodeName: worker-1
region: ap-south-1
instanceType: t2.micro
labels:
  team: infra
taints:
  - key: dedicated
    value: gpu
    effect: NoSchedule
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_decode_defaults() {
        let spec = on_demand();
        assert_eq!(spec.provision_mode, ProvisionMode::OnDemand);
        assert!(!spec.is_gpu);
        assert_eq!(spec.labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(spec.taints[0].to_flag_value(), "dedicated=gpu:NoSchedule");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_on_demand_requires_instance_type() {
        let mut spec = on_demand();
        spec.instance_type = None;
        assert_eq!(
            spec.validate(),
            Err(ValidationError::MissingField("instanceType"))
        );
    }

    #[test]
    fn test_missing_region_is_rejected() {
        let mut spec = on_demand();
        spec.region = " ".to_string();
        assert_eq!(spec.validate(), Err(ValidationError::MissingField("region")));
    }

    #[test]
    fn test_spot_range() {
        let spec: NodeSpec = serde_yaml::from_str(
            r#"
nodeId: s1
nodeName: spot-1
region: us-east-1
provisionMode: spot
spot: { cpuMin: 2, cpuMax: 4, memMin: 4, memMax: 16 }
"#,
        )
        .unwrap();
        assert!(spec.is_spot());
        assert!(spec.validate().is_ok());

        let mut inverted = spec.clone();
        inverted.spot = Some(SpotShape {
            cpu_min: 8,
            cpu_max: 4,
            mem_min: 4,
            mem_max: 16,
        });
        assert!(matches!(
            inverted.validate(),
            Err(ValidationError::InvalidField { field: "spot.cpuMin", .. })
        ));
    }

    #[test]
    fn test_node_id_must_be_key_safe() {
        let mut spec = on_demand();
        spec.node_id = "../etc".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_taint_without_value() {
        let taint = Taint {
            key: "node-role".to_string(),
            value: String::new(),
            effect: "NoExecute".to_string(),
        };
        assert_eq!(taint.to_flag_value(), "node-role:NoExecute");
    }
}
