//! Data shapes crossing the host plugin boundary: reading batches coming up
//! from the south and the names used on the operation egress path.

use serde::{Deserialize, Serialize};

pub const DP_SOUTH_EVENT: &str = "south_event";
pub const DP_DATA_OBJECT: &str = "data_object";

pub const OP_COMMAND: &str = "IEC104Command";
pub const OP_REQUEST_CONNECTION_STATUS: &str = "request_connection_status";
pub const OP_NORTH_STATUS: &str = "north_status";

pub const NORTH_STATUS_INIT_SOCKET_FINISHED: &str = "init_socket_finished";

/// One reading delivered by the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub asset_name: String,
    pub datapoints: Vec<Datapoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datapoint {
    pub name: String,
    pub value: DatapointValue,
}

impl Datapoint {
    pub fn new(name: impl Into<String>, value: DatapointValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatapointValue {
    Int(i64),
    Float(f64),
    Str(String),
    Nested(Vec<Datapoint>),
}

impl DatapointValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric coercion; integer readings are accepted where floats are
    /// expected, the way host datapoint bags mix the two.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&[Datapoint]> {
        match self {
            Self::Nested(v) => Some(v),
            _ => None,
        }
    }

    /// Truthiness of 0/1 flag datapoints.
    pub fn as_flag(&self) -> bool {
        matches!(self, Self::Int(v) if *v != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_bag_deserializes_untagged() {
        let raw = serde_json::json!({
            "name": "data_object",
            "value": [
                {"name": "do_ca", "value": 41},
                {"name": "do_type", "value": "M_SP_NA_1"},
                {"name": "do_value", "value": 1.5}
            ]
        });
        let dp: Datapoint = serde_json::from_value(raw).unwrap();
        let nested = dp.value.as_nested().unwrap();
        assert_eq!(nested[0].value.as_int(), Some(41));
        assert_eq!(nested[1].value.as_str(), Some("M_SP_NA_1"));
        assert_eq!(nested[2].value.as_f64(), Some(1.5));
    }
}
