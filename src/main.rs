use std::env::args;
use std::str::FromStr;
use std::string::ToString;

use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};

fn main() -> Result<(), String> {
    env_logger::init();
    let workers = num_cpus::get();

    args()
        .nth(1)
        .ok_or(format!(
            "no scenario supplied, use one of {} or see unit tests",
            Scenario::iter()
                .map(|c| c.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| Scenario::from_str(&selector).map_err(|e| e.to_string()))
        .and_then(|scenario| {
            match scenario {
                Scenario::Handoff => locks_n_monitors::monitor::handoff(),
                Scenario::Broadcast => locks_n_monitors::monitor::broadcast(workers),
                Scenario::Once => locks_n_monitors::once::run(workers),
                Scenario::Misuse => locks_n_monitors::locks::run(),
            }
            .map_err(|e| e.to_string())
        })
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Scenario {
    Handoff,
    Broadcast,
    Once,
    Misuse,
}
