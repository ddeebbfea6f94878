#![forbid(unsafe_code)]

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct SchemaVersion(pub u32);

/// Wall-clock instant, milliseconds since the Unix epoch, UTC.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct UtcTimeMs(pub u64);

const MS_PER_DAY: u64 = 86_400_000;
const MS_PER_MINUTE: u64 = 60_000;

impl UtcTimeMs {
    pub fn now() -> Self {
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1)
            .max(1);
        UtcTimeMs(ms)
    }

    /// Calendar date key "YYYY-MM-DD" for partition naming. Lexicographic
    /// order matches chronological order.
    pub fn date_key(self) -> String {
        let (y, m, d) = civil_from_days((self.0 / MS_PER_DAY) as i64);
        format!("{y:04}-{m:02}-{d:02}")
    }

    pub fn minute_of_day(self) -> u32 {
        ((self.0 % MS_PER_DAY) / MS_PER_MINUTE) as u32
    }

    pub fn start_of_day(self) -> UtcTimeMs {
        UtcTimeMs(self.0 - self.0 % MS_PER_DAY)
    }

    pub fn plus_ms(self, ms: u64) -> UtcTimeMs {
        UtcTimeMs(self.0.saturating_add(ms))
    }
}

// Civil-from-days conversion (proleptic Gregorian, days since 1970-01-01).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    InvalidRange {
        field: &'static str,
        reason: &'static str,
    },
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "invalid value for {field}: {reason}")
            }
            Self::InvalidRange { field, reason } => {
                write!(f, "invalid range for {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ContractViolation {}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}
