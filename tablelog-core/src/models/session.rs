use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session identifier. Numerically a millisecond timestamp, strictly
/// increasing per engine; rendered as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl TryFrom<String> for SessionId {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Who asked for the session. Opaque to the engine; carried through to
/// events so chat front-ends can address the right user and channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub customer_count: u32,
    #[serde(rename = "service")]
    pub service_type: String,
    pub estimated_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_amount: Option<u64>,
    #[serde(rename = "duration")]
    pub duration_minutes: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub reminder_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
}

impl Session {
    pub fn new(
        id: SessionId,
        customer_count: u32,
        service_type: String,
        estimated_amount: u64,
        duration_minutes: i64,
        start_time: DateTime<Utc>,
        origin: Option<Origin>,
    ) -> Self {
        Self {
            id,
            customer_count,
            service_type,
            estimated_amount,
            actual_amount: None,
            duration_minutes,
            start_time,
            end_time: start_time + Duration::minutes(duration_minutes),
            status: SessionStatus::Active,
            reminder_sent: false,
            ended_at: None,
            origin,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Push the scheduled end out and re-arm the reminder.
    pub fn apply_extension(&mut self, minutes: i64) -> DateTime<Utc> {
        self.end_time += Duration::minutes(minutes);
        self.duration_minutes += minutes;
        self.reminder_sent = false;
        self.end_time
    }

    /// Whole minutes until `end_time`, rounded up: a partially elapsed
    /// minute still counts as remaining. Negative once overdue.
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        ceil_minutes(self.end_time - now)
    }

    /// Whole wall-clock minutes between start and `at`, truncated.
    pub fn elapsed_minutes(&self, at: DateTime<Utc>) -> i64 {
        (at - self.start_time).num_minutes()
    }

    pub fn check_consistency(&self) -> Result<(), String> {
        if self.end_time < self.start_time {
            return Err(format!(
                "end_time {} precedes start_time {}",
                self.end_time, self.start_time
            ));
        }
        if self.duration_minutes < 0 {
            return Err(format!("negative duration {}", self.duration_minutes));
        }
        Ok(())
    }
}

fn ceil_minutes(delta: Duration) -> i64 {
    let ms = delta.num_milliseconds();
    -((-ms).div_euclid(60_000))
}

/// Activity feed entry produced when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMessage {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: SessionStatus,
}

impl BoardMessage {
    pub fn for_ended(session: &Session) -> Self {
        let ended_at = session.ended_at.unwrap_or(session.end_time);
        let amount = session.actual_amount.unwrap_or(session.estimated_amount);
        let verb = match session.status {
            SessionStatus::Cancelled => "cancelled",
            _ => "ended",
        };
        Self {
            timestamp: ended_at,
            message: format!(
                "{} {} guests {}min {} yen {}",
                session.service_type,
                session.customer_count,
                session.elapsed_minutes(ended_at),
                amount,
                verb
            ),
            kind: session.status,
        }
    }
}
