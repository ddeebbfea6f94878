#![forbid(unsafe_code)]

use std::env;

use nibandh_contracts::UtcTimeMs;

const MS_PER_DAY: u64 = 86_400_000;
const MS_PER_MINUTE: u64 = 60_000;

pub const MANUAL_DELAY_MS_DEFAULT: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    RetryPending,
    PushIndex,
    PushMaster,
}

impl SyncTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncTrigger::RetryPending => "retry_pending",
            SyncTrigger::PushIndex => "push_index",
            SyncTrigger::PushMaster => "push_master",
        }
    }
}

/// Wall-clock UTC time of day for a daily trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTime {
    hour: u32,
    minute: u32,
}

impl TriggerTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    fn offset_ms(self) -> u64 {
        u64::from(self.hour * 60 + self.minute) * MS_PER_MINUTE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub retry_at: TriggerTime,
    pub index_at: TriggerTime,
    pub master_at: TriggerTime,
    pub manual_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_at: TriggerTime { hour: 10, minute: 0 },
            index_at: TriggerTime { hour: 15, minute: 0 },
            master_at: TriggerTime { hour: 16, minute: 0 },
            manual_delay_ms: MANUAL_DELAY_MS_DEFAULT,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry_at: hour_from_env("NIBANDH_RETRY_HOUR_UTC", defaults.retry_at),
            index_at: hour_from_env("NIBANDH_INDEX_HOUR_UTC", defaults.index_at),
            master_at: hour_from_env("NIBANDH_MASTER_HOUR_UTC", defaults.master_at),
            manual_delay_ms: env::var("NIBANDH_MANUAL_SYNC_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| (100..=600_000).contains(v))
                .unwrap_or(defaults.manual_delay_ms),
        }
    }
}

fn hour_from_env(name: &str, default: TriggerTime) -> TriggerTime {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .and_then(|h| TriggerTime::new(h, 0))
        .unwrap_or(default)
}

/// The next daily occurrence strictly after `now`. A trigger landing on
/// this exact millisecond rolls to tomorrow.
fn next_occurrence_after(now: UtcTimeMs, at: TriggerTime) -> UtcTimeMs {
    let candidate = now.start_of_day().plus_ms(at.offset_ms());
    if candidate.0 > now.0 {
        candidate
    } else {
        candidate.plus_ms(MS_PER_DAY)
    }
}

#[derive(Debug)]
struct RecurringEntry {
    trigger: SyncTrigger,
    fire_time: TriggerTime,
    next_fire_at: UtcTimeMs,
}

#[derive(Debug)]
struct ManualEntry {
    trigger: SyncTrigger,
    fire_at: UtcTimeMs,
}

/// Deterministic daily schedule for the three sync triggers, plus
/// operator-requested one-shots. Pure bookkeeping: the caller polls
/// `due(now)` and runs whatever comes back.
#[derive(Debug)]
pub struct SyncScheduler {
    recurring: Vec<RecurringEntry>,
    manual: Vec<ManualEntry>,
    manual_delay_ms: u64,
}

impl SyncScheduler {
    pub fn new(config: SchedulerConfig, now: UtcTimeMs) -> Self {
        let entries = [
            (SyncTrigger::RetryPending, config.retry_at),
            (SyncTrigger::PushIndex, config.index_at),
            (SyncTrigger::PushMaster, config.master_at),
        ];
        Self {
            recurring: entries
                .into_iter()
                .map(|(trigger, fire_time)| RecurringEntry {
                    trigger,
                    fire_time,
                    next_fire_at: next_occurrence_after(now, fire_time),
                })
                .collect(),
            manual: Vec::new(),
            manual_delay_ms: config.manual_delay_ms,
        }
    }

    /// Queues a one-shot a short debounce after `now`. Used for the
    /// operator's "sync now" action.
    pub fn schedule_manual(&mut self, trigger: SyncTrigger, now: UtcTimeMs) -> UtcTimeMs {
        let fire_at = now.plus_ms(self.manual_delay_ms);
        self.manual.push(ManualEntry { trigger, fire_at });
        fire_at
    }

    /// Triggers that have come due, in schedule order. Recurring entries
    /// advance to their next occurrence; manual entries are consumed.
    pub fn due(&mut self, now: UtcTimeMs) -> Vec<SyncTrigger> {
        let mut fired = Vec::new();
        for entry in &mut self.recurring {
            if entry.next_fire_at.0 <= now.0 {
                fired.push(entry.trigger);
                entry.next_fire_at = next_occurrence_after(now, entry.fire_time);
            }
        }
        let mut remaining = Vec::new();
        for entry in self.manual.drain(..) {
            if entry.fire_at.0 <= now.0 {
                fired.push(entry.trigger);
            } else {
                remaining.push(entry);
            }
        }
        self.manual = remaining;
        fired
    }

    /// Every pending fire, soonest first. Manual one-shots included.
    pub fn upcoming(&self) -> Vec<(SyncTrigger, UtcTimeMs)> {
        let mut entries: Vec<(SyncTrigger, UtcTimeMs)> = self
            .recurring
            .iter()
            .map(|e| (e.trigger, e.next_fire_at))
            .chain(self.manual.iter().map(|e| (e.trigger, e.fire_at)))
            .collect();
        entries.sort_by_key(|(_, at)| at.0);
        entries
    }

    /// The earliest pending fire time, for idle-loop sleeping.
    pub fn next_fire(&self) -> Option<UtcTimeMs> {
        let recurring = self.recurring.iter().map(|e| e.next_fire_at);
        let manual = self.manual.iter().map(|e| e.fire_at);
        recurring.chain(manual).min_by_key(|t| t.0)
    }
}
