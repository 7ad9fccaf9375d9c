use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority levels for lifecycle workflows
/// Higher values = reviewed first in the pending queue
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Routine housekeeping (1)
    Low = 1,
    /// Default for operator requests (2)
    #[default]
    Medium = 2,
    /// Service-affecting work (3)
    High = 3,
    /// Outage or security response (4)
    Urgent = 4,
}

impl Priority {
    /// Get the numeric priority value
    pub fn value(self) -> u32 {
        self as u32
    }

    /// Inverse of [`Priority::value`], used when reading stored rows
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Priority::Low),
            2 => Some(Priority::Medium),
            3 => Some(Priority::High),
            4 => Some(Priority::Urgent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!(
                "unknown priority '{other}' (expected low, medium, high or urgent)"
            )),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_str() {
        assert_eq!("urgent".parse::<Priority>(), Ok(Priority::Urgent));
        assert_eq!("High".parse::<Priority>(), Ok(Priority::High));
        assert_eq!(" medium ".parse::<Priority>(), Ok(Priority::Medium));
        assert_eq!("low".parse::<Priority>(), Ok(Priority::Low));
        assert!("critical".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_values() {
        assert_eq!(Priority::Low.value(), 1);
        assert_eq!(Priority::Medium.value(), 2);
        assert_eq!(Priority::High.value(), 3);
        assert_eq!(Priority::Urgent.value(), 4);
        assert_eq!(Priority::from_value(3), Some(Priority::High));
        assert_eq!(Priority::from_value(0), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"urgent\"");
        let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
    }
}
