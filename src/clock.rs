use crate::oid::ReplicaId;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid logical clock stamp. Lexical comparison of the encoded string
/// equals temporal ordering, which is what lets stores key and scan history
/// by plain string ranges.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Timestamp(SmolStr);

impl Timestamp {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sorts before every stamp a clock can issue.
    pub(crate) fn min() -> Timestamp {
        Timestamp(SmolStr::default())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Timestamp").field(&self.0.as_str()).finish()
    }
}

impl From<&str> for Timestamp {
    fn from(s: &str) -> Self {
        Timestamp(SmolStr::new(s))
    }
}

const MILLIS_WIDTH: usize = 15;
const COUNTER_WIDTH: usize = 4;
const MAX_COUNTER: u32 = 0xffff;

/// The per-replica timestamp source.
///
/// A stamp encodes, in order: zero-padded wall-clock milliseconds, a counter
/// that advances whenever the wall clock does not, the fixed-width replica id
/// and the current schema version. The clock is a single-writer resource
/// owned by the metadata store; [`Hlc::now`] is the only mutator.
#[derive(Debug, Clone)]
pub struct Hlc {
    replica: ReplicaId,
    schema_version: u64,
    millis: u64,
    counter: u32,
}

impl Hlc {
    pub fn new(replica: ReplicaId, schema_version: u64) -> Hlc {
        Hlc {
            replica,
            schema_version,
            millis: 0,
            counter: 0,
        }
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn set_schema_version(&mut self, version: u64) {
        self.schema_version = version;
    }

    /// Issue a stamp strictly greater than every stamp previously issued or
    /// observed by this clock.
    pub fn now(&mut self) -> Timestamp {
        let wall = wall_clock_millis();
        if wall > self.millis {
            self.millis = wall;
            self.counter = 0;
        } else if self.counter < MAX_COUNTER {
            self.counter += 1;
        } else {
            // counter exhausted within one millisecond; borrow from the future
            self.millis += 1;
            self.counter = 0;
        }
        self.encode()
    }

    /// Fold a foreign stamp into the clock so the next [`Hlc::now`] exceeds
    /// it. Unparseable stamps are ignored; they cannot have been issued by a
    /// well-formed replica and must not be allowed to wedge the clock.
    pub fn observe(&mut self, timestamp: &Timestamp) {
        let (millis, counter) = match decode(timestamp) {
            Some(parts) => parts,
            None => {
                tracing::warn!(stamp = %timestamp, "ignoring malformed timestamp");
                return;
            }
        };
        if millis > self.millis {
            self.millis = millis;
            self.counter = counter;
        } else if millis == self.millis && counter > self.counter {
            self.counter = counter;
        }
    }

    fn encode(&self) -> Timestamp {
        Timestamp(SmolStr::new(format!(
            "{:0millis$}-{:0counter$x}-{}-v{}",
            self.millis,
            self.counter,
            self.replica.to_hex_string(),
            self.schema_version,
            millis = MILLIS_WIDTH,
            counter = COUNTER_WIDTH,
        )))
    }
}

fn decode(timestamp: &Timestamp) -> Option<(u64, u32)> {
    let s = timestamp.as_str();
    let millis = s.get(..MILLIS_WIDTH)?.parse().ok()?;
    if s.as_bytes().get(MILLIS_WIDTH) != Some(&b'-') {
        return None;
    }
    let counter =
        u32::from_str_radix(s.get(MILLIS_WIDTH + 1..MILLIS_WIDTH + 1 + COUNTER_WIDTH)?, 16)
            .ok()?;
    Some((millis, counter))
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
