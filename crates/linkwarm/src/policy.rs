//! Declarative preload policies

use crate::RouteKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Event class that causes a route to be warmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Pointer rests on a link
    Hover,
    /// Link receives keyboard focus
    Focus,
    /// Link scrolls into the viewport
    Visible,
    /// Host reports idle time
    Idle,
    /// Application start
    Immediate,
}

impl Trigger {
    /// Lowercase name as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Hover => "hover",
            Trigger::Focus => "focus",
            Trigger::Visible => "visible",
            Trigger::Idle => "idle",
            Trigger::Immediate => "immediate",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hover" => Ok(Trigger::Hover),
            "focus" => Ok(Trigger::Focus),
            "visible" => Ok(Trigger::Visible),
            "idle" => Ok(Trigger::Idle),
            "immediate" => Ok(Trigger::Immediate),
            other => Err(format!("unknown trigger '{}'", other)),
        }
    }
}

/// Relative importance of a policy within one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Dispatched first
    High,
    /// Standard priority
    #[default]
    Medium,
    /// Dispatched last
    Low,
}

impl Priority {
    fn rank(&self) -> u8 {
        match self {
            Priority::High => 2,
            Priority::Medium => 1,
            Priority::Low => 0,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        // High > Medium > Low
        self.rank().cmp(&other.rank())
    }
}

/// Runtime predicate gating a policy
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Binds a route to a trigger, a priority and an optional condition
#[derive(Clone, Serialize, Deserialize)]
pub struct PreloadPolicy {
    /// Route to warm
    pub route: RouteKey,
    /// Strategy that warms it
    pub trigger: Trigger,
    /// Order within the strategy
    #[serde(default)]
    pub priority: Priority,
    /// Evaluated at dispatch time; absent means always enabled
    #[serde(skip)]
    pub condition: Option<Condition>,
}

impl PreloadPolicy {
    /// Create an unconditional policy with medium priority
    pub fn new(route: impl Into<RouteKey>, trigger: Trigger) -> Self {
        Self {
            route: route.into(),
            trigger,
            priority: Priority::default(),
            condition: None,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Gate the policy behind a predicate
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Whether the policy is currently enabled
    pub fn is_enabled(&self) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition())
    }

    /// Whether the policy belongs to a strategy and is enabled
    pub fn applies_to(&self, trigger: Trigger) -> bool {
        self.trigger == trigger && self.is_enabled()
    }
}

impl fmt::Debug for PreloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadPolicy")
            .field("route", &self.route)
            .field("trigger", &self.trigger)
            .field("priority", &self.priority)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);

        let mut priorities = vec![Priority::Low, Priority::High, Priority::Medium];
        priorities.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            priorities,
            vec![Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn test_trigger_parse() {
        assert_eq!("idle".parse::<Trigger>(), Ok(Trigger::Idle));
        assert_eq!("Immediate".parse::<Trigger>(), Ok(Trigger::Immediate));
        assert!("scroll".parse::<Trigger>().is_err());
        assert_eq!(Trigger::Visible.to_string(), "visible");
    }

    #[test]
    fn test_condition_gates_policy() {
        let online = Arc::new(AtomicBool::new(false));
        let flag = online.clone();
        let policy = PreloadPolicy::new("/analytics", Trigger::Idle)
            .with_condition(move || flag.load(AtomicOrdering::SeqCst));

        assert!(!policy.applies_to(Trigger::Idle));
        online.store(true, AtomicOrdering::SeqCst);
        assert!(policy.applies_to(Trigger::Idle));
        assert!(!policy.applies_to(Trigger::Visible));
    }

    #[test]
    fn test_policy_from_json() {
        let policy: PreloadPolicy = serde_json::from_str(
            r#"{"route": "/travel/trips", "trigger": "visible", "priority": "high"}"#,
        )
        .unwrap();

        assert_eq!(policy.route.as_str(), "/travel/trips");
        assert_eq!(policy.trigger, Trigger::Visible);
        assert_eq!(policy.priority, Priority::High);
        assert!(policy.condition.is_none());
    }

    #[test]
    fn test_policy_priority_defaults_to_medium() {
        let policy: PreloadPolicy =
            serde_json::from_str(r#"{"route": "/food", "trigger": "idle"}"#).unwrap();

        assert_eq!(policy.priority, Priority::Medium);
    }
}
