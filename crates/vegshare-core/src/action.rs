//! Typed view over the schema-less `parameters` blob of an operation.
//!
//! The blob is stored as-is; [`ActionParams::decode`] picks a decoder by
//! action type. Action types without a decoder are kept verbatim as
//! [`ActionParams::Unknown`] instead of being guessed at.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{ExecutionMode, OperationLog};
use crate::error::CoreError;

pub const ACTION_PLANT: &str = "plant";
pub const ACTION_WATER: &str = "water";
pub const ACTION_HARVEST: &str = "harvest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantParams {
    pub item_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_liters: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionParams {
    Plant(PlantParams),
    Water(WaterParams),
    Harvest(HarvestParams),
    Unknown { action: String, raw: Value },
}

impl ActionParams {
    pub fn decode(action: &str, raw: &Value) -> Result<Self, CoreError> {
        match action {
            ACTION_PLANT => {
                let params: PlantParams = from_value(action, raw)?;
                if params.quantity <= 0 {
                    return Err(CoreError::malformed(action, "quantity must be positive"));
                }
                Ok(ActionParams::Plant(params))
            }
            ACTION_WATER => {
                let params: WaterParams = from_optional_value(action, raw)?;
                if let Some(volume) = params.volume_liters {
                    if !volume.is_finite() || volume <= 0.0 {
                        return Err(CoreError::malformed(action, "volume_liters must be positive"));
                    }
                }
                Ok(ActionParams::Water(params))
            }
            ACTION_HARVEST => {
                let params: HarvestParams = from_optional_value(action, raw)?;
                if params.quantity.is_some_and(|q| q <= 0) {
                    return Err(CoreError::malformed(action, "quantity must be positive"));
                }
                Ok(ActionParams::Harvest(params))
            }
            other => Ok(ActionParams::Unknown {
                action: other.to_owned(),
                raw: raw.clone(),
            }),
        }
    }

    pub fn action_type(&self) -> &str {
        match self {
            ActionParams::Plant(_) => ACTION_PLANT,
            ActionParams::Water(_) => ACTION_WATER,
            ActionParams::Harvest(_) => ACTION_HARVEST,
            ActionParams::Unknown { action, .. } => action,
        }
    }

    /// Canonical JSON for storage.
    pub fn to_value(&self) -> Value {
        // Serializing these plain structs cannot fail.
        match self {
            ActionParams::Plant(p) => serde_json::to_value(p).unwrap_or_default(),
            ActionParams::Water(p) => serde_json::to_value(p).unwrap_or_default(),
            ActionParams::Harvest(p) => serde_json::to_value(p).unwrap_or_default(),
            ActionParams::Unknown { raw, .. } => raw.clone(),
        }
    }

    /// Work that changes what occupies a unit needs a person on site.
    pub fn execution_mode(&self) -> ExecutionMode {
        match self {
            ActionParams::Plant(_) | ActionParams::Harvest(_) => ExecutionMode::Manual,
            ActionParams::Water(_) | ActionParams::Unknown { .. } => ExecutionMode::Automatic,
        }
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(action: &str, raw: &Value) -> Result<T, CoreError> {
    T::deserialize(raw).map_err(|e| CoreError::malformed(action, e))
}

/// Like [`from_value`] but an absent (`null`) payload means "all defaults".
fn from_optional_value<T: for<'de> Deserialize<'de> + Default>(
    action: &str,
    raw: &Value,
) -> Result<T, CoreError> {
    if raw.is_null() {
        return Ok(T::default());
    }
    from_value(action, raw)
}

impl OperationLog {
    /// Decoded parameters of this operation.
    pub fn params(&self) -> Result<ActionParams, CoreError> {
        ActionParams::decode(&self.action_type, &self.parameters)
    }

    /// Planting parameters when this is a plant operation, `None` for any
    /// other action type (whose parameters are then left undecoded).
    pub fn plant_params(&self) -> Result<Option<PlantParams>, CoreError> {
        if self.action_type != ACTION_PLANT {
            return Ok(None);
        }
        match self.params()? {
            ActionParams::Plant(params) => Ok(Some(params)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn plant_decodes_item_and_quantity() {
        let item = Uuid::new_v4();
        let params = ActionParams::decode("plant", &json!({ "item_id": item, "quantity": 3 })).unwrap();
        assert_eq!(
            params,
            ActionParams::Plant(PlantParams {
                item_id: item,
                quantity: 3
            })
        );
        assert_eq!(params.execution_mode(), ExecutionMode::Manual);
    }

    #[test]
    fn plant_with_bad_payload_is_malformed() {
        for raw in [
            json!({ "quantity": 3 }),
            json!({ "item_id": "not-a-uuid", "quantity": 3 }),
            json!({ "item_id": Uuid::new_v4(), "quantity": 0 }),
            json!("plant it"),
            Value::Null,
        ] {
            let err = ActionParams::decode("plant", &raw).unwrap_err();
            assert!(
                matches!(err, CoreError::MalformedActionParameters { ref action, .. } if action == "plant"),
                "{raw} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn water_and_harvest_accept_empty_payloads() {
        assert_eq!(
            ActionParams::decode("water", &Value::Null).unwrap(),
            ActionParams::Water(WaterParams::default())
        );
        assert_eq!(
            ActionParams::decode("harvest", &json!({})).unwrap(),
            ActionParams::Harvest(HarvestParams::default())
        );
        assert!(ActionParams::decode("water", &json!({ "volume_liters": -1.0 })).is_err());
    }

    #[test]
    fn unknown_action_keeps_raw_payload_and_runs_automatically() {
        let raw = json!({ "ph": 6.5 });
        let params = ActionParams::decode("fertilize", &raw).unwrap();
        assert_eq!(params.action_type(), "fertilize");
        assert_eq!(params.to_value(), raw);
        assert_eq!(params.execution_mode(), ExecutionMode::Automatic);
    }

    #[test]
    fn canonical_value_drops_absent_optionals() {
        let params = ActionParams::decode("water", &json!({})).unwrap();
        assert_eq!(params.to_value(), json!({}));
    }
}
