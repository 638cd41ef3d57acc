use serde::{Deserialize, Serialize};

use super::{FunctionSpec, ParamType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchFlightsArgs {
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
}

pub fn spec() -> FunctionSpec {
    FunctionSpec::new(
        "get_search_flights",
        "Tool for searching a flight with origin, destination, and departure date",
    )
    .param(
        "origin",
        ParamType::String,
        "The airport of departure for the flight given in airport code such as LAX, SFO, BOS, etc.",
    )
    .param(
        "destination",
        ParamType::String,
        "The airport of destination for the flight given in airport code such as LAX, SFO, BOS, etc.",
    )
    .formatted_param(
        "departure_date",
        ParamType::String,
        "date",
        "The date of departure for the flight in YYYY-MM-DD format",
    )
    .required(&["origin", "destination", "departure_date"])
}
