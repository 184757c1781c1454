//! Roster records as sent by the rendezvous server
//!
//! One record per line: `name,id,connected`. The sign-in response lists the
//! caller first and every other signed-in peer after it; `/wait` notifications
//! carry single-record deltas where `connected` is `0` for a peer that left.

use crate::PeerId;
use crate::error::SignalingError;
use std::str::FromStr;

/// One `name,id,connected` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRecord {
    /// Display name
    pub name: String,
    /// Server-assigned id
    pub id: PeerId,
    /// `false` when the record announces a departure
    pub connected: bool,
}

impl FromStr for RosterRecord {
    type Err = SignalingError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || SignalingError::MalformedPayload(format!("bad roster record {line:?}"));
        let line = line.trim_end_matches('\r');

        // Names may contain commas; the numeric fields are always the last two
        let mut fields = line.rsplitn(3, ',');
        let connected = fields.next().ok_or_else(malformed)?;
        let id = fields.next().ok_or_else(malformed)?;
        let name = fields.next().ok_or_else(malformed)?;

        if name.is_empty() {
            return Err(malformed());
        }
        let id: PeerId = id.parse().map_err(|_| malformed())?;
        let connected: u32 = connected.parse().map_err(|_| malformed())?;

        Ok(Self {
            name: name.to_string(),
            id,
            connected: connected != 0,
        })
    }
}

/// Parse every non-blank line of `body`
///
/// Fails if any line is not a record or if there are no records at all.
pub fn parse_roster(body: &str) -> Result<Vec<RosterRecord>, SignalingError> {
    let records = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<RosterRecord>, _>>()?;

    if records.is_empty() {
        return Err(SignalingError::MalformedPayload("empty roster".into()));
    }
    Ok(records)
}

/// Whether `body` is entirely made of roster records
pub fn is_roster(body: &str) -> bool {
    parse_roster(body).is_ok()
}
