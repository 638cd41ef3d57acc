use serde::{Deserialize, Serialize};

use super::{FunctionSpec, ParamType, whole_number};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookFlightArgs {
    #[serde(deserialize_with = "whole_number")]
    pub flight_id: i64,
    pub seat_type: String,
    #[serde(deserialize_with = "whole_number")]
    pub num_seats: i64,
}

pub fn spec() -> FunctionSpec {
    FunctionSpec::new(
        "get_book_flight",
        "Tool for booking a flight with flight ID, type of seat, and number of seats",
    )
    .param(
        "flight_id",
        ParamType::Integer,
        "The ID of flights, in a integer; such as: 1, 2, 3, and so on",
    )
    .param(
        "seat_type",
        ParamType::String,
        "The type of seat flight, in a string; such as: economy, business, or first_class",
    )
    .param(
        "num_seats",
        ParamType::Integer,
        "The number of seats, in a integer; such as: 1, 2, 3, and so on",
    )
    .required(&["flight_id", "seat_type", "num_seats"])
}
