use crate::models::{CheckStatus, EventKind, LastCheck};

/// A notifiable change between two consecutive checks of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub event: EventKind,
    pub previous_status: CheckStatus,
    pub current_status: CheckStatus,
    pub previous_version: Option<String>,
    pub current_version: Option<String>,
}

/// Compares a fresh check against the result stored before it.
///
/// The first check of a service never produces an event. A status change
/// takes precedence over a simultaneous version change, so at most one event
/// is returned.
pub fn evaluate(previous: Option<&LastCheck>, current: &LastCheck) -> Option<Transition> {
    let previous = previous?;

    if previous.status != current.status {
        let event = if current.status == CheckStatus::Up {
            EventKind::ServiceUp
        } else {
            EventKind::ServiceDown
        };
        return Some(Transition {
            event,
            previous_status: previous.status,
            current_status: current.status,
            previous_version: previous.detected_version.clone(),
            current_version: current.detected_version.clone(),
        });
    }

    if current.status != CheckStatus::Up {
        return None;
    }

    match (&previous.detected_version, &current.detected_version) {
        (Some(before), Some(after)) if before != after => Some(Transition {
            event: EventKind::VersionChange,
            previous_status: CheckStatus::Up,
            current_status: CheckStatus::Up,
            previous_version: Some(before.clone()),
            current_version: Some(after.clone()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CheckStatus; 3] = [CheckStatus::Up, CheckStatus::Down, CheckStatus::Error];

    fn check(status: CheckStatus, version: Option<&str>) -> LastCheck {
        LastCheck {
            status,
            detected_version: version.map(str::to_string),
        }
    }

    #[test]
    fn first_check_never_fires() {
        for status in ALL {
            assert_eq!(evaluate(None, &check(status, Some("1.0.0"))), None);
        }
    }

    #[test]
    fn every_status_change_fires_exactly_one_event() {
        for before in ALL {
            for after in ALL {
                let decision = evaluate(Some(&check(before, None)), &check(after, None));
                if before == after {
                    assert_eq!(decision, None, "{before} -> {after}");
                    continue;
                }
                let transition = decision.expect("status change must fire");
                let expected = if after == CheckStatus::Up {
                    EventKind::ServiceUp
                } else {
                    EventKind::ServiceDown
                };
                assert_eq!(transition.event, expected);
                assert_eq!(transition.previous_status, before);
                assert_eq!(transition.current_status, after);
            }
        }
    }

    #[test]
    fn status_change_wins_over_version_change() {
        let transition = evaluate(
            Some(&check(CheckStatus::Down, Some("1.0.0"))),
            &check(CheckStatus::Up, Some("2.0.0")),
        )
        .unwrap();
        assert_eq!(transition.event, EventKind::ServiceUp);
        assert_eq!(transition.previous_version.as_deref(), Some("1.0.0"));
        assert_eq!(transition.current_version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn version_change_while_up() {
        let transition = evaluate(
            Some(&check(CheckStatus::Up, Some("1.0.0"))),
            &check(CheckStatus::Up, Some("2.0.0")),
        )
        .unwrap();
        assert_eq!(transition.event, EventKind::VersionChange);
        assert_eq!(transition.previous_status, CheckStatus::Up);
        assert_eq!(transition.current_status, CheckStatus::Up);
    }

    #[test]
    fn version_change_requires_both_versions() {
        let up = CheckStatus::Up;
        assert_eq!(evaluate(Some(&check(up, None)), &check(up, Some("2.0.0"))), None);
        assert_eq!(evaluate(Some(&check(up, Some("1.0.0"))), &check(up, None)), None);
        assert_eq!(
            evaluate(Some(&check(up, Some("1.0.0"))), &check(up, Some("1.0.0"))),
            None
        );
    }

    #[test]
    fn version_change_ignored_while_down() {
        let down = CheckStatus::Down;
        assert_eq!(
            evaluate(Some(&check(down, Some("1.0.0"))), &check(down, Some("2.0.0"))),
            None
        );
    }
}
