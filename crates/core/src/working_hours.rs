//! Weekly operating hours and the parent containment check.
//!
//! A child entity (complex or clinic) may only be open when its parent is
//! open, and only inside the parent's opening interval. Times are
//! zero-padded `"HH:MM"` strings.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Format accepted for every time field.
pub const TIME_FORMAT: &str = "%H:%M";

// ---------------------------------------------------------------------------
// Schedule types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opening hours for one day. Time fields are ignored when `is_open` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub day: Weekday,
    pub is_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_end: Option<String>,
}

impl DaySchedule {
    pub fn closed(day: Weekday) -> Self {
        Self {
            day,
            is_open: false,
            open_time: None,
            close_time: None,
            break_start: None,
            break_end: None,
        }
    }

    pub fn open(day: Weekday, open_time: &str, close_time: &str) -> Self {
        Self {
            day,
            is_open: true,
            open_time: Some(open_time.to_string()),
            close_time: Some(close_time.to_string()),
            break_start: None,
            break_end: None,
        }
    }

    pub fn with_break(mut self, start: &str, end: &str) -> Self {
        self.break_start = Some(start.to_string());
        self.break_end = Some(end.to_string());
        self
    }

    /// Parsed `(open, close)` when the day is open and both times are well formed.
    fn interval(&self) -> Option<(NaiveTime, NaiveTime)> {
        if !self.is_open {
            return None;
        }
        let open = parse_time(self.open_time.as_deref()?)?;
        let close = parse_time(self.close_time.as_deref()?)?;
        Some((open, close))
    }
}

/// Seven days of opening hours, ordered Monday to Sunday.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule {
    pub days: Vec<DaySchedule>,
}

impl WeeklySchedule {
    pub fn new(days: Vec<DaySchedule>) -> Self {
        Self { days }
    }

    /// Every day closed.
    pub fn closed() -> Self {
        Self::new(Weekday::ALL.iter().map(|d| DaySchedule::closed(*d)).collect())
    }

    /// Every day open with the same hours.
    pub fn uniform(open_time: &str, close_time: &str) -> Self {
        Self::new(
            Weekday::ALL
                .iter()
                .map(|d| DaySchedule::open(*d, open_time, close_time))
                .collect(),
        )
    }

    pub fn day(&self, day: Weekday) -> Option<&DaySchedule> {
        self.days.iter().find(|d| d.day == day)
    }

    /// Replace the entry for `schedule.day`, appending it when absent.
    pub fn set(&mut self, schedule: DaySchedule) {
        match self.days.iter_mut().find(|d| d.day == schedule.day) {
            Some(existing) => *existing = schedule,
            None => {
                self.days.push(schedule);
                self.days.sort_by_key(|d| d.day);
            }
        }
    }
}

/// Parse a zero-padded `"HH:MM"` time.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    if value.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(value, TIME_FORMAT).ok()
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ParentClosed,
    OpensBeforeParent,
    ClosesAfterParent,
    MissingDay,
    DuplicateDay,
    MissingTimes,
    InvalidTime,
    OpensAfterClose,
    InvalidBreak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursViolation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<Weekday>,
    pub kind: ViolationKind,
    pub message: String,
}

impl HoursViolation {
    fn on(day: Weekday, kind: ViolationKind, message: String) -> Self {
        Self {
            day: Some(day),
            kind,
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoursReport {
    pub is_valid: bool,
    pub violations: Vec<HoursViolation>,
}

impl HoursReport {
    fn from_violations(violations: Vec<HoursViolation>) -> Self {
        Self {
            is_valid: violations.is_empty(),
            violations,
        }
    }

    pub fn valid() -> Self {
        Self::from_violations(Vec::new())
    }

    /// Combine two reports, keeping the violations of both.
    pub fn merge(mut self, other: HoursReport) -> Self {
        self.violations.extend(other.violations);
        Self::from_violations(self.violations)
    }
}

// ---------------------------------------------------------------------------
// Containment
// ---------------------------------------------------------------------------

/// Check that every open child day lies inside the parent's hours.
///
/// With no parent schedule there is no constraint and the result is always
/// valid. Malformed child times are left to [`validate_schedule_shape`].
pub fn validate_working_hours(
    child: &WeeklySchedule,
    parent: Option<&WeeklySchedule>,
) -> HoursReport {
    let Some(parent) = parent else {
        return HoursReport::valid();
    };

    let mut violations = Vec::new();
    for day in child.days.iter().filter(|d| d.is_open) {
        let parent_day = parent.day(day.day).filter(|p| p.is_open);
        let Some(parent_day) = parent_day else {
            violations.push(HoursViolation::on(
                day.day,
                ViolationKind::ParentClosed,
                format!("Cannot operate on {}; parent is closed on this day", day.day),
            ));
            continue;
        };

        let (Some((open, close)), Some((parent_open, parent_close))) =
            (day.interval(), parent_day.interval())
        else {
            continue;
        };

        if open < parent_open {
            violations.push(HoursViolation::on(
                day.day,
                ViolationKind::OpensBeforeParent,
                format!(
                    "Opening time {} on {} precedes parent's opening time {}",
                    open.format(TIME_FORMAT),
                    day.day,
                    parent_open.format(TIME_FORMAT)
                ),
            ));
        } else if close > parent_close {
            violations.push(HoursViolation::on(
                day.day,
                ViolationKind::ClosesAfterParent,
                format!(
                    "Closing time {} on {} exceeds parent's closing time {}",
                    close.format(TIME_FORMAT),
                    day.day,
                    parent_close.format(TIME_FORMAT)
                ),
            ));
        }
    }

    HoursReport::from_violations(violations)
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// Structural checks on a single schedule: seven unique days, well formed
/// times, `open < close`, and a break that sits inside opening hours.
pub fn validate_schedule_shape(schedule: &WeeklySchedule) -> HoursReport {
    let mut violations = Vec::new();

    let mut seen = HashSet::new();
    for day in &schedule.days {
        if !seen.insert(day.day) {
            violations.push(HoursViolation::on(
                day.day,
                ViolationKind::DuplicateDay,
                format!("{} appears more than once", day.day),
            ));
        }
    }
    for day in Weekday::ALL {
        if !seen.contains(&day) {
            violations.push(HoursViolation::on(
                day,
                ViolationKind::MissingDay,
                format!("No hours given for {day}"),
            ));
        }
    }

    for day in schedule.days.iter().filter(|d| d.is_open) {
        let (Some(open_raw), Some(close_raw)) = (day.open_time.as_deref(), day.close_time.as_deref())
        else {
            violations.push(HoursViolation::on(
                day.day,
                ViolationKind::MissingTimes,
                format!("{} is open but has no opening or closing time", day.day),
            ));
            continue;
        };

        let (Some(open), Some(close)) = (parse_time(open_raw), parse_time(close_raw)) else {
            violations.push(HoursViolation::on(
                day.day,
                ViolationKind::InvalidTime,
                format!("Times on {} must use the HH:MM format", day.day),
            ));
            continue;
        };

        if open >= close {
            violations.push(HoursViolation::on(
                day.day,
                ViolationKind::OpensAfterClose,
                format!("Opening time on {} must be before closing time", day.day),
            ));
            continue;
        }

        match (day.break_start.as_deref(), day.break_end.as_deref()) {
            (None, None) => {}
            (Some(start), Some(end)) => {
                let within = match (parse_time(start), parse_time(end)) {
                    (Some(s), Some(e)) => open <= s && s < e && e <= close,
                    _ => false,
                };
                if !within {
                    violations.push(HoursViolation::on(
                        day.day,
                        ViolationKind::InvalidBreak,
                        format!("Break on {} must fall inside opening hours", day.day),
                    ));
                }
            }
            _ => violations.push(HoursViolation::on(
                day.day,
                ViolationKind::InvalidBreak,
                format!("Break on {} needs both a start and an end", day.day),
            )),
        }
    }

    HoursReport::from_violations(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week_with(day: DaySchedule) -> WeeklySchedule {
        let mut schedule = WeeklySchedule::closed();
        schedule.set(day);
        schedule
    }

    // -- Containment --

    #[test]
    fn child_inside_parent_is_valid() {
        let parent = week_with(DaySchedule::open(Weekday::Monday, "08:00", "18:00"));
        let child = week_with(DaySchedule::open(Weekday::Monday, "09:00", "17:00"));
        let report = validate_working_hours(&child, Some(&parent));
        assert!(report.is_valid);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn early_opening_is_a_violation() {
        let parent = week_with(DaySchedule::open(Weekday::Monday, "08:00", "18:00"));
        let child = week_with(DaySchedule::open(Weekday::Monday, "07:00", "17:00"));
        let report = validate_working_hours(&child, Some(&parent));
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::OpensBeforeParent);
        assert_eq!(report.violations[0].day, Some(Weekday::Monday));
        assert!(report.violations[0].message.contains("opening time"));
    }

    #[test]
    fn late_closing_is_a_violation() {
        let parent = week_with(DaySchedule::open(Weekday::Friday, "08:00", "18:00"));
        let child = week_with(DaySchedule::open(Weekday::Friday, "09:00", "19:30"));
        let report = validate_working_hours(&child, Some(&parent));
        assert_eq!(report.violations[0].kind, ViolationKind::ClosesAfterParent);
    }

    #[test]
    fn only_first_breach_per_day_is_reported() {
        let parent = week_with(DaySchedule::open(Weekday::Monday, "08:00", "18:00"));
        let child = week_with(DaySchedule::open(Weekday::Monday, "07:00", "20:00"));
        let report = validate_working_hours(&child, Some(&parent));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::OpensBeforeParent);
    }

    #[test]
    fn open_when_parent_closed_is_a_violation() {
        let parent = WeeklySchedule::closed();
        let child = week_with(DaySchedule::open(Weekday::Sunday, "10:00", "12:00"));
        let report = validate_working_hours(&child, Some(&parent));
        assert_eq!(report.violations[0].kind, ViolationKind::ParentClosed);
    }

    #[test]
    fn missing_parent_day_counts_as_closed() {
        let parent = WeeklySchedule::new(vec![DaySchedule::open(Weekday::Monday, "08:00", "18:00")]);
        let child = week_with(DaySchedule::open(Weekday::Tuesday, "09:00", "10:00"));
        let report = validate_working_hours(&child, Some(&parent));
        assert_eq!(report.violations[0].kind, ViolationKind::ParentClosed);
    }

    #[test]
    fn closed_child_days_are_ignored() {
        let parent = WeeklySchedule::closed();
        let child = WeeklySchedule::closed();
        assert!(validate_working_hours(&child, Some(&parent)).is_valid);
    }

    #[test]
    fn no_parent_means_no_constraint() {
        let child = WeeklySchedule::uniform("00:00", "23:59");
        assert!(validate_working_hours(&child, None).is_valid);
    }

    #[test]
    fn violations_reported_for_each_day() {
        let parent = WeeklySchedule::uniform("08:00", "18:00");
        let child = WeeklySchedule::uniform("07:30", "17:00");
        let report = validate_working_hours(&child, Some(&parent));
        assert_eq!(report.violations.len(), 7);
    }

    // -- Shape --

    #[test]
    fn uniform_week_has_valid_shape() {
        assert!(validate_schedule_shape(&WeeklySchedule::uniform("08:00", "17:00")).is_valid);
        assert!(validate_schedule_shape(&WeeklySchedule::closed()).is_valid);
    }

    #[test]
    fn missing_and_duplicate_days_are_reported() {
        let mut schedule = WeeklySchedule::closed();
        schedule.days.pop();
        schedule.days.push(DaySchedule::closed(Weekday::Monday));
        let report = validate_schedule_shape(&schedule);
        let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::DuplicateDay));
        assert!(kinds.contains(&ViolationKind::MissingDay));
    }

    #[test]
    fn open_must_precede_close() {
        let schedule = week_with(DaySchedule::open(Weekday::Monday, "18:00", "08:00"));
        let report = validate_schedule_shape(&schedule);
        assert_eq!(report.violations[0].kind, ViolationKind::OpensAfterClose);
    }

    #[test]
    fn unpadded_times_are_rejected() {
        let schedule = week_with(DaySchedule::open(Weekday::Monday, "8:00", "18:00"));
        let report = validate_schedule_shape(&schedule);
        assert_eq!(report.violations[0].kind, ViolationKind::InvalidTime);
    }

    #[test]
    fn open_day_without_times_is_rejected() {
        let mut day = DaySchedule::closed(Weekday::Monday);
        day.is_open = true;
        let report = validate_schedule_shape(&week_with(day));
        assert_eq!(report.violations[0].kind, ViolationKind::MissingTimes);
    }

    #[test]
    fn break_must_sit_inside_hours() {
        let good = week_with(
            DaySchedule::open(Weekday::Monday, "08:00", "18:00").with_break("12:00", "13:00"),
        );
        assert!(validate_schedule_shape(&good).is_valid);

        let bad = week_with(
            DaySchedule::open(Weekday::Monday, "08:00", "18:00").with_break("17:30", "18:30"),
        );
        assert_eq!(
            validate_schedule_shape(&bad).violations[0].kind,
            ViolationKind::InvalidBreak
        );
    }

    #[test]
    fn closed_day_times_are_ignored() {
        let mut day = DaySchedule::closed(Weekday::Monday);
        day.open_time = Some("garbage".into());
        assert!(validate_schedule_shape(&week_with(day)).is_valid);
    }

    // -- Serde --

    #[test]
    fn day_schedule_uses_camel_case() {
        let json = serde_json::to_value(DaySchedule::open(Weekday::Monday, "08:00", "18:00")).unwrap();
        assert_eq!(json["day"], "monday");
        assert_eq!(json["isOpen"], true);
        assert_eq!(json["openTime"], "08:00");
        assert!(json.get("breakStart").is_none());
    }

    #[test]
    fn merged_reports_keep_all_violations() {
        let parent = WeeklySchedule::closed();
        let child = week_with(DaySchedule::open(Weekday::Monday, "18:00", "08:00"));
        let report =
            validate_schedule_shape(&child).merge(validate_working_hours(&child, Some(&parent)));
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 2);
    }
}
