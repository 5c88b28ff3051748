//! Pre-sync checks over a batch of worklog entries.
//!
//! The validator runs six independent rule families and concatenates their
//! findings in a fixed order: overlaps, durations, coverage gaps, description
//! quality, issue-key format, and business rules. Only `error`-level issues
//! block synchronization; warnings and infos are surfaced for confirmation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{Date, Time, Weekday};

use crate::clock::{self, TIME_FORMAT};
use crate::entry::WorklogEntry;
use crate::id::WorklogId;
use crate::issue_key::is_valid_issue_key;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    /// Blocks synchronization.
    Error,
    /// Needs confirmation but does not block.
    Warning,
    /// Informational only.
    Info,
}

impl IssueLevel {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable finding code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    /// Two entries on the same date intersect.
    TimeOverlap,
    /// Total logged time for a day exceeds the hard limit.
    DailyLimitExceeded,
    /// Total logged time for a day is unusually high.
    DailyHoursHigh,
    /// A weekday has little logged time.
    DailyHoursLow,
    /// A single entry is unusually long.
    EntryTooLong,
    /// A single entry is unusually short.
    EntryTooShort,
    /// Large unaccounted spans between entries of a working day.
    CoverageGap,
    /// Description is blank.
    EmptyDescription,
    /// Description is very short.
    ShortDescription,
    /// Description is a placeholder phrase.
    GenericDescription,
    /// No remote issue key.
    MissingIssueKey,
    /// Issue key does not have the expected shape.
    InvalidIssueKey,
    /// Entry is dated after today.
    FutureDate,
    /// Entry is older than the accepted window.
    StaleEntry,
    /// Same date, key, and time range as another entry.
    PossibleDuplicate,
}

impl IssueCode {
    /// Stable wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeOverlap => "TIME_OVERLAP",
            Self::DailyLimitExceeded => "DAILY_LIMIT_EXCEEDED",
            Self::DailyHoursHigh => "DAILY_HOURS_HIGH",
            Self::DailyHoursLow => "DAILY_HOURS_LOW",
            Self::EntryTooLong => "ENTRY_TOO_LONG",
            Self::EntryTooShort => "ENTRY_TOO_SHORT",
            Self::CoverageGap => "COVERAGE_GAP",
            Self::EmptyDescription => "EMPTY_DESCRIPTION",
            Self::ShortDescription => "SHORT_DESCRIPTION",
            Self::GenericDescription => "GENERIC_DESCRIPTION",
            Self::MissingIssueKey => "MISSING_ISSUE_KEY",
            Self::InvalidIssueKey => "INVALID_ISSUE_KEY",
            Self::FutureDate => "FUTURE_DATE",
            Self::StaleEntry => "STALE_ENTRY",
            Self::PossibleDuplicate => "POSSIBLE_DUPLICATE",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding against one entry or one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Machine-readable code.
    pub code: IssueCode,
    /// Human-readable description.
    pub message: String,
    /// Entry the finding is attached to, if any.
    pub entry_id: Option<WorklogId>,
    /// Day the finding is about, for day-level findings.
    pub date: Option<Date>,
    /// Suggested remediation.
    pub hint: Option<String>,
}

impl ValidationIssue {
    fn new(level: IssueLevel, code: IssueCode, message: String) -> Self {
        Self {
            level,
            code,
            message,
            entry_id: None,
            date: None,
            hint: None,
        }
    }

    fn for_entry(mut self, entry: &WorklogEntry) -> Self {
        self.entry_id = Some(entry.id);
        self.date = Some(entry.date);
        self
    }

    fn on_date(mut self, date: Date) -> Self {
        self.date = Some(date);
        self
    }

    fn hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_owned());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

/// Aggregate findings for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Findings in rule-family order.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// True when no finding has `error` level.
    #[must_use]
    pub fn can_sync(&self) -> bool {
        !self.issues.iter().any(|issue| issue.level == IssueLevel::Error)
    }

    /// Findings of the given level.
    pub fn at_level(&self, level: IssueLevel) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |issue| issue.level == level)
    }

    /// Number of findings of the given level.
    #[must_use]
    pub fn count(&self, level: IssueLevel) -> usize {
        self.at_level(level).count()
    }

    /// Findings attached to a specific entry.
    pub fn for_entry(&self, id: WorklogId) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |issue| issue.entry_id == Some(id))
    }

    /// True when a finding with the given code is present.
    #[must_use]
    pub fn has_code(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    /// True when there is nothing to report at all.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Thresholds used by the validator, all in minutes unless stated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    /// Daily total above which synchronization is blocked.
    pub max_daily_minutes: u32,
    /// Daily total above which a warning is raised.
    pub warn_daily_minutes: u32,
    /// Single entry length above which a warning is raised.
    pub max_entry_minutes: u32,
    /// Single entry length below which a warning is raised.
    pub min_entry_minutes: u32,
    /// Weekday total below which an info is raised.
    pub min_weekday_minutes: u32,
    /// Individual gaps shorter than or equal to this are ignored.
    pub gap_threshold_minutes: u32,
    /// Cumulative counted gap per day above which a warning is raised.
    pub max_gap_total_minutes: u32,
    /// Descriptions shorter than this many characters get an info.
    pub min_description_chars: usize,
    /// Entries older than this many days get a warning.
    pub max_age_days: i64,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_daily_minutes: 12 * 60,
            warn_daily_minutes: 10 * 60,
            max_entry_minutes: 8 * 60,
            min_entry_minutes: 6,
            min_weekday_minutes: 4 * 60,
            gap_threshold_minutes: 30,
            max_gap_total_minutes: 2 * 60,
            min_description_chars: 10,
            max_age_days: 30,
        }
    }
}

impl ValidationRules {
    /// Check that the thresholds are mutually consistent.
    ///
    /// # Errors
    /// Returns a message naming the first inconsistent pair.
    pub fn ensure_consistent(&self) -> Result<(), String> {
        if self.warn_daily_minutes > self.max_daily_minutes {
            return Err(format!(
                "warn_daily_minutes ({}) must not exceed max_daily_minutes ({})",
                self.warn_daily_minutes, self.max_daily_minutes
            ));
        }
        if self.min_entry_minutes > self.max_entry_minutes {
            return Err(format!(
                "min_entry_minutes ({}) must not exceed max_entry_minutes ({})",
                self.min_entry_minutes, self.max_entry_minutes
            ));
        }
        if self.max_age_days < 0 {
            return Err("max_age_days must not be negative".to_owned());
        }
        Ok(())
    }
}

/// Placeholder phrases that say nothing about the work done.
static GENERIC_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^(work|working|task|tasks|stuff|misc|various|todo|wip|dev|development|meeting|fix|fixes|bugfix)[.!]*$",
        r"(?i)^(work(ing)? on (the )?(task|ticket|issue)|did (some )?(work|stuff|things))[.!]*$",
        r"(?i)^(работа|задача|работа над задачей|разное)[.!]*$",
        r"(?i)^(n/?a|tbd|tbc|xxx+|test|asdf\w*)$",
        r"^[\s\-_.?!*#]+$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

fn is_generic_description(text: &str) -> bool {
    GENERIC_PHRASES.iter().any(|re| re.is_match(text))
}

/// Batch validator parameterized by [`ValidationRules`].
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: ValidationRules,
}

impl Validator {
    /// Build a validator with explicit rules.
    #[must_use]
    pub const fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    /// Validate against the local calendar date.
    #[must_use]
    pub fn validate(&self, entries: &[WorklogEntry]) -> ValidationResult {
        self.validate_on(entries, clock::local_today())
    }

    /// Validate with an explicit notion of "today".
    #[must_use]
    pub fn validate_on(&self, entries: &[WorklogEntry], today: Date) -> ValidationResult {
        let by_date = group_by_date(entries);
        let mut issues = Vec::new();
        Self::check_overlaps(&by_date, &mut issues);
        self.check_durations(entries, &by_date, &mut issues);
        self.check_coverage(&by_date, &mut issues);
        self.check_descriptions(entries, &mut issues);
        Self::check_issue_keys(entries, &mut issues);
        self.check_business_rules(entries, today, &mut issues);
        ValidationResult { issues }
    }

    fn check_overlaps(by_date: &BTreeMap<Date, Vec<&WorklogEntry>>, issues: &mut Vec<ValidationIssue>) {
        for day in by_date.values() {
            for (i, first) in day.iter().enumerate() {
                let (start1, end1) = first.minute_span();
                if start1 >= end1 {
                    continue;
                }
                for second in &day[i + 1..] {
                    let (start2, end2) = second.minute_span();
                    // Sorted by start: nothing later can begin before `end1`.
                    if start2 >= end1 {
                        break;
                    }
                    if start2 >= end2 {
                        continue;
                    }
                    if start1 < end2 && start2 < end1 {
                        issues.push(
                            ValidationIssue::new(
                                IssueLevel::Error,
                                IssueCode::TimeOverlap,
                                format!(
                                    "{} {} overlaps {} on {}",
                                    span_label(second),
                                    entry_label(second),
                                    span_label(first),
                                    first.date
                                ),
                            )
                            .for_entry(second)
                            .hint("adjust the start or end time so the intervals only touch"),
                        );
                    }
                }
            }
        }
    }

    fn check_durations(
        &self,
        entries: &[WorklogEntry],
        by_date: &BTreeMap<Date, Vec<&WorklogEntry>>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let rules = &self.rules;
        for (date, day) in by_date {
            let total = day
                .iter()
                .fold(0_u32, |sum, entry| sum.saturating_add(entry.duration_minutes));
            if total > rules.max_daily_minutes {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Error,
                        IssueCode::DailyLimitExceeded,
                        format!("{} logged on {date}, above the {} limit", hours(total), hours(rules.max_daily_minutes)),
                    )
                    .on_date(*date)
                    .hint("split or shorten entries for this day"),
                );
            } else if total > rules.warn_daily_minutes {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::DailyHoursHigh,
                        format!("{} logged on {date}", hours(total)),
                    )
                    .on_date(*date)
                    .hint("confirm the day really was this long"),
                );
            }
            if is_weekday(*date) && total < rules.min_weekday_minutes {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Info,
                        IssueCode::DailyHoursLow,
                        format!("only {} logged on {} {date}", hours(total), date.weekday()),
                    )
                    .on_date(*date),
                );
            }
        }

        for entry in entries {
            if entry.duration_minutes > rules.max_entry_minutes {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::EntryTooLong,
                        format!("{} lasts {}", entry_label(entry), hours(entry.duration_minutes)),
                    )
                    .for_entry(entry)
                    .hint("split long sessions into separate entries"),
                );
            } else if entry.duration_minutes < rules.min_entry_minutes {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::EntryTooShort,
                        format!("{} lasts only {} min", entry_label(entry), entry.duration_minutes),
                    )
                    .for_entry(entry)
                    .hint("merge it into a neighbouring entry or delete it"),
                );
            }
        }
    }

    fn check_coverage(&self, by_date: &BTreeMap<Date, Vec<&WorklogEntry>>, issues: &mut Vec<ValidationIssue>) {
        let rules = &self.rules;
        for (date, day) in by_date {
            if !is_weekday(*date) || day.len() < 2 {
                continue;
            }
            let mut counted = 0_u32;
            let mut gaps = 0_usize;
            let mut covered_until = day[0].minute_span().1;
            for entry in &day[1..] {
                let (start, end) = entry.minute_span();
                let gap = start.saturating_sub(covered_until);
                if gap > rules.gap_threshold_minutes {
                    counted += gap;
                    gaps += 1;
                }
                covered_until = covered_until.max(end);
            }
            if counted > rules.max_gap_total_minutes {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::CoverageGap,
                        format!("{gaps} gap(s) totalling {} between entries on {date}", hours(counted)),
                    )
                    .on_date(*date)
                    .hint("log the missing time or confirm it was a break"),
                );
            }
        }
    }

    fn check_descriptions(&self, entries: &[WorklogEntry], issues: &mut Vec<ValidationIssue>) {
        for entry in entries {
            let text = entry.description.trim();
            if text.is_empty() {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::EmptyDescription,
                        format!("{} has no description", entry_label(entry)),
                    )
                    .for_entry(entry)
                    .hint("describe what was done"),
                );
                continue;
            }
            if text.chars().count() < self.rules.min_description_chars {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Info,
                        IssueCode::ShortDescription,
                        format!("{} has a very short description: \"{text}\"", entry_label(entry)),
                    )
                    .for_entry(entry),
                );
            }
            if is_generic_description(text) {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::GenericDescription,
                        format!("{} has a generic description: \"{text}\"", entry_label(entry)),
                    )
                    .for_entry(entry)
                    .hint("name the concrete activity, e.g. review, analysis, or the feature touched"),
                );
            }
        }
    }

    fn check_issue_keys(entries: &[WorklogEntry], issues: &mut Vec<ValidationIssue>) {
        for entry in entries {
            match entry.issue_key.as_deref() {
                None => issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::MissingIssueKey,
                        format!("{} has no issue key", entry_label(entry)),
                    )
                    .for_entry(entry)
                    .hint("entries without a key cannot be sent to the tracker"),
                ),
                Some(key) if !is_valid_issue_key(key) => issues.push(
                    ValidationIssue::new(
                        IssueLevel::Error,
                        IssueCode::InvalidIssueKey,
                        format!("{} has malformed issue key \"{key}\"", entry_label(entry)),
                    )
                    .for_entry(entry)
                    .hint("expected PROJECT-123"),
                ),
                Some(_) => {}
            }
        }
    }

    fn check_business_rules(&self, entries: &[WorklogEntry], today: Date, issues: &mut Vec<ValidationIssue>) {
        for entry in entries {
            if entry.date > today {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Error,
                        IssueCode::FutureDate,
                        format!("{} is dated {} which is after today ({today})", entry_label(entry), entry.date),
                    )
                    .for_entry(entry)
                    .hint("fix the date"),
                );
            } else if (today - entry.date).whole_days() > self.rules.max_age_days {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::StaleEntry,
                        format!(
                            "{} is {} days old",
                            entry_label(entry),
                            (today - entry.date).whole_days()
                        ),
                    )
                    .for_entry(entry)
                    .hint("the tracker may reject worklogs in closed periods"),
                );
            }
        }

        let mut seen: BTreeMap<(Date, Option<&str>, Time, Time), WorklogId> = BTreeMap::new();
        for entry in entries {
            let key = (entry.date, entry.issue_key.as_deref(), entry.start_time, entry.end_time);
            if let Some(first) = seen.get(&key) {
                issues.push(
                    ValidationIssue::new(
                        IssueLevel::Warning,
                        IssueCode::PossibleDuplicate,
                        format!("{} duplicates entry {first}", entry_label(entry)),
                    )
                    .for_entry(entry)
                    .hint("delete one of the copies"),
                );
            } else {
                seen.insert(key, entry.id);
            }
        }
    }
}

/// Validate with default rules against the local calendar date.
#[must_use]
pub fn validate(entries: &[WorklogEntry]) -> ValidationResult {
    Validator::default().validate(entries)
}

fn group_by_date(entries: &[WorklogEntry]) -> BTreeMap<Date, Vec<&WorklogEntry>> {
    let mut by_date: BTreeMap<Date, Vec<&WorklogEntry>> = BTreeMap::new();
    for entry in entries {
        by_date.entry(entry.date).or_default().push(entry);
    }
    for day in by_date.values_mut() {
        day.sort_by_key(|entry| (entry.start_time, entry.end_time, entry.id));
    }
    by_date
}

const fn is_weekday(date: Date) -> bool {
    !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

fn hours(minutes: u32) -> String {
    format!("{}h{:02}", minutes / 60, minutes % 60)
}

fn span_label(entry: &WorklogEntry) -> String {
    let start = entry.start_time.format(TIME_FORMAT).unwrap_or_default();
    let end = entry.end_time.format(TIME_FORMAT).unwrap_or_default();
    format!("[{start}-{end})")
}

fn entry_label(entry: &WorklogEntry) -> String {
    match (entry.issue_key.as_deref(), entry.task_title.trim()) {
        (Some(key), "") => key.to_owned(),
        (Some(key), title) => format!("{key} \"{title}\""),
        (None, "") => format!("entry {}", entry.id),
        (None, title) => format!("\"{title}\""),
    }
}
