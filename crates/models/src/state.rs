/// Lifecycle state of a Scrap row.
///
/// `Processing` is the initial state written by the collector stage.
/// All other states except `New` are terminal; `New` exists only as a
/// legacy ingest label still read by the startup reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrapState {
    New,
    Processing,
    Processed,
    NoPatternsFound,
    DuplicateExists,
    Failed,
}

impl ScrapState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapState::New => "NEW",
            ScrapState::Processing => "PROCESSING",
            ScrapState::Processed => "PROCESSED",
            ScrapState::NoPatternsFound => "NO_PATTERNS_FOUND",
            ScrapState::DuplicateExists => "DUPLICATE_EXISTS",
            ScrapState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScrapState::Processed
                | ScrapState::NoPatternsFound
                | ScrapState::DuplicateExists
                | ScrapState::Failed
        )
    }

    /// Whether a transition from `self` into `next` is legal.
    /// Terminal states never transition again.
    pub fn may_transition_to(&self, next: ScrapState) -> bool {
        match self {
            ScrapState::New | ScrapState::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::str::FromStr for ScrapState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NEW" => ScrapState::New,
            "PROCESSING" => ScrapState::Processing,
            "PROCESSED" => ScrapState::Processed,
            "NO_PATTERNS_FOUND" => ScrapState::NoPatternsFound,
            "DUPLICATE_EXISTS" => ScrapState::DuplicateExists,
            "FAILED" => ScrapState::Failed,
            other => return Err(UnknownState(other.to_string())),
        })
    }
}

impl std::fmt::Display for ScrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown scrap state: '{0}'")]
pub struct UnknownState(pub String);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            ScrapState::New,
            ScrapState::Processing,
            ScrapState::Processed,
            ScrapState::NoPatternsFound,
            ScrapState::DuplicateExists,
            ScrapState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<ScrapState>().unwrap(), state);
        }
        assert!("BOGUS".parse::<ScrapState>().is_err());
    }

    #[test]
    fn terminal_states_do_not_transition() {
        let terminals = [
            ScrapState::Processed,
            ScrapState::NoPatternsFound,
            ScrapState::DuplicateExists,
            ScrapState::Failed,
        ];

        for from in terminals {
            for to in terminals {
                assert!(!from.may_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
        for to in terminals {
            assert!(ScrapState::Processing.may_transition_to(to));
        }
        assert!(!ScrapState::Processing.may_transition_to(ScrapState::New));
        assert!(!ScrapState::Processing.may_transition_to(ScrapState::Processing));
    }
}
