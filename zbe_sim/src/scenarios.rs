//! Drive scenarios for deterministic simulation.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// ZBE-001: Drive towards Distrito Centro from the east
    Approach,

    /// ZBE-002: Drive straight through Distrito Centro
    Crossing,

    /// ZBE-003: Park next to a zone and let the cooldown cycle
    Loiter,

    /// ZBE-004: Fast drive with a tiny cache to force evictions
    CacheChurn,

    /// ZBE-005: Shut down and warm-start from the persisted snapshot
    Restart,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Approach,
            ScenarioId::Crossing,
            ScenarioId::Loiter,
            ScenarioId::CacheChurn,
            ScenarioId::Restart,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Approach => "approach",
            ScenarioId::Crossing => "crossing",
            ScenarioId::Loiter => "loiter",
            ScenarioId::CacheChurn => "cache_churn",
            ScenarioId::Restart => "restart",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Approach => "Approach Distrito Centro at 10 m/s, verify alerts respect cooldowns",
            ScenarioId::Crossing => "Cross Distrito Centro west to east, verify containment and alert order",
            ScenarioId::Loiter => "Park 0 m/s beside a zone, verify exact cooldown cadence",
            ScenarioId::CacheChurn => "Drive at 100 m/s with a 20-entry cache, verify capacity bound",
            ScenarioId::Restart => "Restart the monitor, verify zones come back from the snapshot",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approach" | "zbe-001" => Ok(ScenarioId::Approach),
            "crossing" | "zbe-002" => Ok(ScenarioId::Crossing),
            "loiter" | "zbe-003" => Ok(ScenarioId::Loiter),
            "cache_churn" | "cachechurn" | "zbe-004" => Ok(ScenarioId::CacheChurn),
            "restart" | "zbe-005" => Ok(ScenarioId::Restart),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
        }
        assert_eq!("ZBE-004".parse::<ScenarioId>().unwrap(), ScenarioId::CacheChurn);
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
