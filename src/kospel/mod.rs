//! Kospel `ekd` controller: session replay against ha.kospel.pl, register
//! formatting and the store-if-changed workflow.
mod parsing;
mod query;

pub use parsing::{format_float, format_payload, Field, FormatError, Payload, Reading};
pub use query::{login, query, read_body, HttpTransport, Method, Request, Response, Transport, BASE_URL, SESSION_COOKIE};

use log::{debug, info, warn};
use serde_json::{value::from_value, Value};
use std::path::PathBuf;

use crate::cache::SessionCache;
use crate::error::Error;
use crate::store;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterKind {
    /// Raw value carries tenths in its last digit.
    Temperature,
    Integer,
}

// Canonical order of the read request and of every log line.
pub const REGISTERS: &[(&str, &str, RegisterKind)] = &[
    ("TEMP_IN", "Inlet temperature", RegisterKind::Temperature),
    ("TEMP_OUT", "Outlet temperature", RegisterKind::Temperature),
    ("FACTOR_SETTING", "Heating medium setpoint", RegisterKind::Temperature),
    ("TEMP_ROOM", "Room temperature", RegisterKind::Temperature),
    ("TEMP_EXT", "Outdoor temperature", RegisterKind::Temperature),
    ("HU_INCLUDED_POWER", "Engaged power", RegisterKind::Integer),
    ("PRESSURE", "Pressure", RegisterKind::Integer),
    ("FLOW", "Flow", RegisterKind::Integer),
    ("FLAG_CH_PUMP_OFF_ON", "Circulation pump", RegisterKind::Integer),
    ("FLAG_IN_NA", "NA input", RegisterKind::Integer),
    ("FLAG_IN_RP", "RP input", RegisterKind::Integer),
    ("FLAG_IN_FUN", "FUN input", RegisterKind::Integer),
];

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// The controller the session gets bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    pub module_id: u32,
    pub device_type: u32,
}

impl Default for Device {
    fn default() -> Self {
        Device {
            serial: "mi01_00001403".to_string(),
            module_id: 101,
            device_type: 19,
        }
    }
}

/// How a run ended. Every variant is a normal exit.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// No log file configured; the payload was only reported.
    Reported(Value),
    /// API still reported an error status after re-login.
    Rejected(Value),
    /// Response had no usable register map.
    Incomplete(Value),
    Stored(Reading),
    /// Blank or equal to the last logged reading.
    Unchanged(Reading),
}

/// Human readable dump of a reading, one register per line.
pub fn describe(reading: &Reading) -> String {
    REGISTERS
        .iter()
        .zip(reading.fields())
        .map(|(&(name, label, _), field)| format!("{label: <24}{field: >8}  ({name})\n"))
        .collect()
}

pub struct Snapshot<T> {
    transport: T,
    credentials: Credentials,
    device: Device,
    cache: SessionCache,
    outfile: Option<PathBuf>,
}

impl<T: Transport> Snapshot<T> {
    pub fn new(
        transport: T,
        credentials: Credentials,
        device: Device,
        cache: SessionCache,
        outfile: Option<PathBuf>,
    ) -> Snapshot<T> {
        Snapshot {
            transport,
            credentials,
            device,
            cache,
            outfile,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn report(&self, raw: Value) -> Outcome {
        info!("{raw}");
        let reading = from_value::<Payload>(raw.clone())
            .ok()
            .and_then(|payload| payload.registers().and_then(|regs| format_payload(regs).ok()));
        match reading {
            Some(reading) => print!("{}", describe(&reading)),
            None => println!("{raw}"),
        }
        Outcome::Reported(raw)
    }

    pub fn run(&mut self) -> Result<Outcome, Error> {
        let mut raw = query(&mut self.transport, &self.device)?;
        let Some(outfile) = self.outfile.clone() else {
            return Ok(self.report(raw));
        };

        let mut payload = from_value::<Payload>(raw.clone())?;
        if !payload.is_ok() {
            warn!("{raw}");
            info!("Cannot connect to the API. Re-logging");
            login(&mut self.transport, &self.credentials, &self.device, &self.cache)?;
            raw = query(&mut self.transport, &self.device)?;
            payload = from_value::<Payload>(raw.clone())?;
            if !payload.is_ok() {
                warn!("API still failing after re-login: {raw}");
                return Ok(Outcome::Rejected(raw));
            }
        }

        let Some(regs) = payload.registers() else {
            warn!("{raw}");
            return Ok(Outcome::Incomplete(raw));
        };
        let reading = match format_payload(regs) {
            Ok(reading) => reading,
            Err(FormatError::MissingRegister(register)) => {
                warn!("Register {register} missing, skipping {raw}");
                return Ok(Outcome::Incomplete(raw));
            }
            Err(err) => return Err(err.into()),
        };

        let previous = store::read_previous(&outfile);
        if !reading.is_blank() && previous.as_ref() != Some(&reading) {
            debug!("Storing {reading:?}");
            store::store(&outfile, &reading)?;
            Ok(Outcome::Stored(reading))
        } else {
            info!("Skipping {reading:?}");
            Ok(Outcome::Unchanged(reading))
        }
    }
}
