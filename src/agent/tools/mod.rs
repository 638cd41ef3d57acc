//! Tool Schema Registry.
//!
//! Static descriptions of the functions the model may call, plus the typed
//! call enum the dispatcher matches on.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::agent::dispatcher::DispatchError;
use crate::models::FunctionCall;

pub mod book_flight;
pub mod search_flights;

pub use book_flight::BookFlightArgs;
pub use search_flights::SearchFlightsArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    #[serde(skip)]
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    pub description: &'static str,
}

/// A callable function as advertised to the model. Serializes to a Gemini
/// function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterSpec>,
    pub required: Vec<&'static str>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{function}: required parameter {param:?} is not declared")]
    UndeclaredRequired { function: &'static str, param: &'static str },
    #[error("{function}: parameter {param:?} declared twice")]
    DuplicateParameter { function: &'static str, param: &'static str },
}

impl FunctionSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description, parameters: Vec::new(), required: Vec::new() }
    }

    pub fn param(mut self, name: &'static str, kind: ParamType, description: &'static str) -> Self {
        self.parameters.push(ParameterSpec { name, kind, format: None, description });
        self
    }

    pub fn formatted_param(
        mut self,
        name: &'static str,
        kind: ParamType,
        format: &'static str,
        description: &'static str,
    ) -> Self {
        self.parameters.push(ParameterSpec { name, kind, format: Some(format), description });
        self
    }

    pub fn required(mut self, names: &[&'static str]) -> Self {
        self.required = names.to_vec();
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Every required name must be a declared parameter.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (i, p) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|q| q.name == p.name) {
                return Err(SchemaError::DuplicateParameter { function: self.name, param: p.name });
            }
        }
        match self.required.iter().find(|r| self.parameter(r).is_none()) {
            Some(param) => Err(SchemaError::UndeclaredRequired { function: self.name, param: *param }),
            None => Ok(()),
        }
    }
}

struct Properties<'a>(&'a [ParameterSpec]);

impl Serialize for Properties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for p in self.0 {
            map.serialize_entry(p.name, p)?;
        }
        map.end()
    }
}

struct ObjectSchema<'a>(&'a FunctionSpec);

impl Serialize for ObjectSchema<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ObjectSchema", 3)?;
        s.serialize_field("type", "object")?;
        s.serialize_field("properties", &Properties(&self.0.parameters))?;
        s.serialize_field("required", &self.0.required)?;
        s.end()
    }
}

impl Serialize for FunctionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("FunctionSpec", 3)?;
        s.serialize_field("name", self.name)?;
        s.serialize_field("description", self.description)?;
        s.serialize_field("parameters", &ObjectSchema(self))?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    SearchFlights,
    BookFlight,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::SearchFlights, ToolKind::BookFlight];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::SearchFlights => "get_search_flights",
            ToolKind::BookFlight => "get_book_flight",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn spec(self) -> FunctionSpec {
        match self {
            ToolKind::SearchFlights => search_flights::spec(),
            ToolKind::BookFlight => book_flight::spec(),
        }
    }

    /// Shown to the user when the backend comes back empty.
    pub fn failure_message(self) -> &'static str {
        match self {
            ToolKind::SearchFlights => "Search Failed!",
            ToolKind::BookFlight => "Booking Failed!",
        }
    }
}

/// A model function call decoded into one of the known tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SearchFlights(SearchFlightsArgs),
    BookFlight(BookFlightArgs),
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::SearchFlights(_) => ToolKind::SearchFlights,
            ToolCall::BookFlight(_) => ToolKind::BookFlight,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ToolCall::SearchFlights(a) => format!("{} -> {} on {}", a.origin, a.destination, a.departure_date),
            ToolCall::BookFlight(a) => format!("flight {} x{} {}", a.flight_id, a.num_seats, a.seat_type),
        }
    }

    pub fn from_request(call: &FunctionCall) -> Result<Self, DispatchError> {
        let kind = ToolKind::from_name(&call.name)
            .ok_or_else(|| DispatchError::UnknownFunction(call.name.clone()))?;
        let args = Value::Object(call.args.clone());
        let invalid = |source| DispatchError::InvalidArguments { function: kind.name(), source };
        Ok(match kind {
            ToolKind::SearchFlights => ToolCall::SearchFlights(serde_json::from_value(args).map_err(invalid)?),
            ToolKind::BookFlight => ToolCall::BookFlight(serde_json::from_value(args).map_err(invalid)?),
        })
    }
}

/// The validated, immutable set of declarations handed to the model.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<FunctionSpec>,
}

impl ToolRegistry {
    pub fn from_specs(specs: Vec<FunctionSpec>) -> Result<Self, SchemaError> {
        for s in &specs {
            s.validate()?;
        }
        Ok(Self { specs })
    }

    pub fn flight_tools() -> Result<Self, SchemaError> {
        Self::from_specs(ToolKind::ALL.into_iter().map(ToolKind::spec).collect())
    }

    pub fn specs(&self) -> &[FunctionSpec] {
        &self.specs
    }
}

/// Accepts `3` as well as `3.0`; the model tends to emit integers as floats.
pub(crate) fn whole_number<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let n = serde_json::Number::deserialize(d)?;
    if let Some(i) = n.as_i64() {
        return Ok(i);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(serde::de::Error::custom(format!("expected a whole number, got {}", n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_holds_both_tools_in_order() {
        let reg = ToolRegistry::flight_tools().unwrap();
        let names: Vec<_> = reg.specs().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["get_search_flights", "get_book_flight"]);
        assert_eq!(ToolKind::from_name("get_book_flight"), Some(ToolKind::BookFlight));
        assert_eq!(ToolKind::from_name("get_weather"), None);
    }

    #[test]
    fn booking_requires_its_own_parameters() {
        // The booking schema once listed the search fields as required.
        let spec = ToolKind::BookFlight.spec();
        assert_eq!(spec.required, vec!["flight_id", "seat_type", "num_seats"]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn validate_rejects_undeclared_required() {
        let broken = FunctionSpec::new("get_book_flight", "copy of booking")
            .param("flight_id", ParamType::Integer, "id")
            .required(&["origin"]);
        assert_eq!(
            broken.validate(),
            Err(SchemaError::UndeclaredRequired { function: "get_book_flight", param: "origin" })
        );
        assert!(ToolRegistry::from_specs(vec![broken]).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_parameter() {
        let dup = FunctionSpec::new("f", "d")
            .param("a", ParamType::String, "x")
            .param("a", ParamType::String, "y");
        assert!(matches!(dup.validate(), Err(SchemaError::DuplicateParameter { .. })));
    }

    #[test]
    fn declaration_wire_shape() {
        let v = serde_json::to_value(ToolKind::SearchFlights.spec()).unwrap();
        assert_eq!(v["name"], "get_search_flights");
        assert_eq!(v["parameters"]["type"], "object");
        assert_eq!(v["parameters"]["properties"]["departure_date"]["format"], "date");
        assert_eq!(v["parameters"]["properties"]["origin"]["type"], "string");
        assert!(v["parameters"]["properties"]["origin"].get("format").is_none());
        assert_eq!(v["parameters"]["required"], json!(["origin", "destination", "departure_date"]));
    }

    #[test]
    fn decode_known_calls() {
        let call = FunctionCall {
            name: "get_book_flight".into(),
            args: json!({"flight_id": 2.0, "seat_type": "economy", "num_seats": 1})
                .as_object()
                .cloned()
                .unwrap(),
        };
        match ToolCall::from_request(&call).unwrap() {
            ToolCall::BookFlight(a) => {
                assert_eq!(a.flight_id, 2);
                assert_eq!(a.num_seats, 1);
                assert_eq!(a.seat_type, "economy");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_unknown_and_malformed_calls() {
        let unknown = FunctionCall { name: "get_weather".into(), args: Default::default() };
        assert!(matches!(ToolCall::from_request(&unknown), Err(DispatchError::UnknownFunction(n)) if n == "get_weather"));

        let fractional = FunctionCall {
            name: "get_book_flight".into(),
            args: json!({"flight_id": 1.5, "seat_type": "economy", "num_seats": 1})
                .as_object()
                .cloned()
                .unwrap(),
        };
        assert!(matches!(
            ToolCall::from_request(&fractional),
            Err(DispatchError::InvalidArguments { function: "get_book_flight", .. })
        ));

        let stray = FunctionCall {
            name: "get_search_flights".into(),
            args: json!({"origin": "LAX", "destination": "SFO", "departure_date": "2024-06-01", "cabin": "economy"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        assert!(matches!(
            ToolCall::from_request(&stray),
            Err(DispatchError::InvalidArguments { function: "get_search_flights", .. })
        ));
    }
}
