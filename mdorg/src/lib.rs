//! Task markup engine for Markdown notes.
//! Headings carry TODO/DONE and `[#A]` priorities, backtick-quoted lines below them carry
//! CREATED/SCHEDULED/DEADLINE/CLOSED timestamps and CLOCK sessions. Every operation re-derives
//! its tokens from the current line text; the caller owns the buffer and applies the edits.

pub mod core {
    use crate::weekday::WeekdayStyle;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------- Spans ------------------------------- */

    /// Character-column range inside one line. `end` is exclusive.
    ///
    /// Values built in memory (rather than parsed) carry `Span::default()`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Span {
        pub start: usize,
        pub end: usize,
    }

    impl Span {
        pub fn new(start: usize, end: usize) -> Self {
            Self { start, end }
        }

        /// `start <= col < end`.
        pub fn contains(&self, col: usize) -> bool {
            col >= self.start && col < self.end
        }

        /// Like `contains`, but a cursor resting right after the last character still counts.
        pub fn touches(&self, col: usize) -> bool {
            col >= self.start && col <= self.end
        }
    }

    /// Byte offset of character column `col` (clamped to the end of the line).
    pub(crate) fn byte_offset(line: &str, col: usize) -> usize {
        line.char_indices()
            .nth(col)
            .map(|(byte, _)| byte)
            .unwrap_or(line.len())
    }

    pub(crate) fn char_len(line: &str) -> usize {
        line.chars().count()
    }

    /// Replace the characters covered by `span` with `text`.
    pub(crate) fn splice(line: &str, span: Span, text: &str) -> String {
        let from = byte_offset(line, span.start);
        let to = byte_offset(line, span.end);
        let mut out = String::with_capacity(line.len() + text.len());
        out.push_str(&line[..from]);
        out.push_str(text);
        out.push_str(&line[to..]);
        out
    }

    fn render_date(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    fn render_time(time: NaiveTime) -> String {
        format!("{:02}:{:02}", time.hour(), time.minute())
    }

    fn minute_precision(dt: NaiveDateTime) -> NaiveDateTime {
        dt.with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(dt)
    }

    /* ------------------------------ Headings ------------------------------ */

    /// Task state keyword on a heading.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Status {
        Todo,
        Done,
    }

    impl Status {
        /// Cycle order used when stepping through states.
        pub const CYCLE: [Status; 2] = [Status::Todo, Status::Done];

        pub fn as_str(self) -> &'static str {
            match self {
                Status::Todo => "TODO",
                Status::Done => "DONE",
            }
        }

        pub fn from_keyword(s: &str) -> Option<Self> {
            match s {
                "TODO" => Some(Status::Todo),
                "DONE" => Some(Status::Done),
                _ => None,
            }
        }
    }

    /// Single-letter priority, e.g. `[#A]`. Always within `A..=Z`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct Priority(pub char);

    impl Priority {
        pub const HIGHEST: Priority = Priority('A');
        pub const LOWEST: Priority = Priority('Z');

        /// Shift the letter by `delta`; `None` if that would leave `A..=Z`.
        pub fn shifted(self, delta: i64) -> Option<Self> {
            let code = i64::from(u32::from(self.0)).checked_add(delta)?;
            let c = char::from_u32(u32::try_from(code).ok()?)?;
            (Self::HIGHEST.0..=Self::LOWEST.0)
                .contains(&c)
                .then_some(Priority(c))
        }

        pub fn render(self) -> String {
            format!("[#{}]", self.0)
        }
    }

    /// `## TODO [#A] Title`
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HeadingToken {
        /// Number of leading `#`.
        pub level: usize,
        pub status: Option<Status>,
        pub priority: Option<Priority>,
        pub title: String,
        pub status_span: Option<Span>,
        /// Covers the whole `[#X]` cookie.
        pub priority_span: Option<Span>,
    }

    impl HeadingToken {
        /// Canonical single-spaced form of the heading.
        pub fn render(&self) -> String {
            let mut out = "#".repeat(self.level);
            out.push(' ');
            if let Some(status) = self.status {
                out.push_str(status.as_str());
                out.push(' ');
            }
            if let Some(priority) = self.priority {
                out.push_str(&priority.render());
                out.push(' ');
            }
            out.push_str(&self.title);
            out
        }
    }

    /* ----------------------------- Timestamps ----------------------------- */

    /// Label of a backtick timestamp line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum TimestampKind {
        Created,
        Scheduled,
        Deadline,
        Closed,
    }

    impl TimestampKind {
        pub fn as_str(self) -> &'static str {
            match self {
                TimestampKind::Created => "CREATED",
                TimestampKind::Scheduled => "SCHEDULED",
                TimestampKind::Deadline => "DEADLINE",
                TimestampKind::Closed => "CLOSED",
            }
        }

        pub fn from_keyword(s: &str) -> Option<Self> {
            match s {
                "CREATED" => Some(TimestampKind::Created),
                "SCHEDULED" => Some(TimestampKind::Scheduled),
                "DEADLINE" => Some(TimestampKind::Deadline),
                "CLOSED" => Some(TimestampKind::Closed),
                _ => None,
            }
        }

        /// SCHEDULED → DEADLINE → CLOSED → SCHEDULED. CREATED never changes.
        pub fn cycled(self) -> Self {
            match self {
                TimestampKind::Created => TimestampKind::Created,
                TimestampKind::Scheduled => TimestampKind::Deadline,
                TimestampKind::Deadline => TimestampKind::Closed,
                TimestampKind::Closed => TimestampKind::Scheduled,
            }
        }
    }

    /// Column spans of the editable parts of an inline timestamp.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TimestampSpans {
        pub year: Span,
        pub month: Span,
        pub day: Span,
        pub weekday: Option<Span>,
        pub hour: Option<Span>,
        pub minute: Option<Span>,
    }

    /// `<2025-12-06 Sat 10:00 +1w>`; weekday, time and repeater are optional.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InlineTimestamp {
        pub date: NaiveDate,
        pub weekday_label: Option<String>,
        pub time: Option<NaiveTime>,
        /// Kept verbatim (`+1d`, `+2wd`, ...).
        pub repeater: Option<String>,
        /// The whole `<...>` token.
        pub span: Span,
        pub fields: TimestampSpans,
    }

    impl InlineTimestamp {
        /// A timestamp with weekday and time for `dt`, seconds dropped.
        pub fn at(dt: NaiveDateTime, style: WeekdayStyle) -> Self {
            let dt = minute_precision(dt);
            Self {
                date: dt.date(),
                weekday_label: Some(style.label_for(dt.date()).to_string()),
                time: Some(dt.time()),
                repeater: None,
                span: Span::default(),
                fields: TimestampSpans::default(),
            }
        }

        /// Missing time reads as midnight.
        pub fn datetime(&self) -> NaiveDateTime {
            self.date.and_time(self.time.unwrap_or(NaiveTime::MIN))
        }

        pub fn render(&self) -> String {
            let mut out = format!("<{}", render_date(self.date));
            if let Some(label) = &self.weekday_label {
                out.push(' ');
                out.push_str(label);
            }
            if let Some(time) = self.time {
                out.push(' ');
                out.push_str(&render_time(time));
            }
            if let Some(repeater) = &self.repeater {
                out.push(' ');
                out.push_str(repeater);
            }
            out.push('>');
            out
        }
    }

    /// `` `SCHEDULED: <2025-12-06 Sat>` `` on a line of its own.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TimestampLineToken {
        pub indent: String,
        pub kind: TimestampKind,
        pub timestamp: InlineTimestamp,
        pub kind_span: Span,
    }

    impl TimestampLineToken {
        pub fn new(indent: String, kind: TimestampKind, timestamp: InlineTimestamp) -> Self {
            Self {
                indent,
                kind,
                timestamp,
                kind_span: Span::default(),
            }
        }

        pub fn render(&self) -> String {
            format!(
                "{}`{}: {}`",
                self.indent,
                self.kind.as_str(),
                self.timestamp.render()
            )
        }
    }

    /* ---------------------------- Clock entries ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum Bracket {
        /// `[` / `]`, written by this crate.
        Square,
        /// `<` / `>`, accepted from older notes.
        Angle,
    }

    impl Bracket {
        pub fn from_char(c: char) -> Self {
            match c {
                '[' | ']' => Bracket::Square,
                _ => Bracket::Angle,
            }
        }

        pub fn open(self) -> char {
            match self {
                Bracket::Square => '[',
                Bracket::Angle => '<',
            }
        }

        pub fn close(self) -> char {
            match self {
                Bracket::Square => ']',
                Bracket::Angle => '>',
            }
        }
    }

    /// `[2025-12-06 Sat 10:00]` inside a CLOCK line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ClockTimestamp {
        pub open: Bracket,
        pub date: NaiveDate,
        pub weekday_label: String,
        pub time: NaiveTime,
        pub close: Bracket,
        pub hour_span: Span,
        pub minute_span: Span,
    }

    impl ClockTimestamp {
        pub fn new(dt: NaiveDateTime, style: WeekdayStyle) -> Self {
            let dt = minute_precision(dt);
            Self {
                open: Bracket::Square,
                date: dt.date(),
                weekday_label: style.label_for(dt.date()).to_string(),
                time: dt.time(),
                close: Bracket::Square,
                hour_span: Span::default(),
                minute_span: Span::default(),
            }
        }

        pub fn datetime(&self) -> NaiveDateTime {
            self.date.and_time(self.time)
        }

        pub fn render(&self) -> String {
            format!(
                "{}{} {} {}{}",
                self.open.open(),
                render_date(self.date),
                self.weekday_label,
                render_time(self.time),
                self.close.close()
            )
        }
    }

    /// Whole minutes between the two ends of a CLOCK entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ClockDuration(pub i64);

    impl ClockDuration {
        pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
            Self((end - start).num_minutes())
        }

        pub fn hours(self) -> i64 {
            self.0 / 60
        }

        pub fn minutes(self) -> i64 {
            self.0 % 60
        }
    }

    /// `H:MM` with the hours right-aligned to two columns, e.g. ` 1:05`.
    /// Negative spans keep their sign on the hours: `-0:30`.
    impl fmt::Display for ClockDuration {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let sign = if self.0 < 0 { "-" } else { "" };
            let hours = format!("{sign}{}", self.hours().abs());
            write!(f, "{:>2}:{:02}", hours, self.minutes().abs())
        }
    }

    /// `` `CLOCK: [start]--[end] => H:MM` `` or, while running, `` `CLOCK: [start]` ``.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ClockEntry {
        pub indent: String,
        pub start: ClockTimestamp,
        pub end: Option<ClockTimestamp>,
        pub duration: Option<ClockDuration>,
    }

    impl ClockEntry {
        pub fn is_open(&self) -> bool {
            self.end.is_none()
        }

        pub fn render(&self) -> String {
            let mut out = format!("{}`CLOCK: {}", self.indent, self.start.render());
            if let Some(end) = &self.end {
                let duration = self
                    .duration
                    .unwrap_or_else(|| ClockDuration::between(self.start.datetime(), end.datetime()));
                out.push_str("--");
                out.push_str(&end.render());
                out.push_str(" => ");
                out.push_str(&duration.to_string());
            }
            out.push('`');
            out
        }
    }

    /* -------------------------------- Tokens -------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "token", rename_all = "kebab-case")]
    pub enum Token {
        Heading(HeadingToken),
        TimestampLine(TimestampLineToken),
        Timestamp(InlineTimestamp),
        Clock(ClockEntry),
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    /// Why an edit was not produced. None of these leave a partial write behind.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum EditError {
        #[error("no editable token at cursor")]
        NoTokenAtCursor,
        #[error("there is already an open CLOCK entry (line {})", .line + 1)]
        AlreadyOpenSession { line: usize },
        #[error("no open CLOCK entry found")]
        NoOpenSession,
        #[error("line {} is outside the buffer", .0 + 1)]
        LineOutOfRange(usize),
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn priority_shift_saturates_at_both_ends() {
            assert_eq!(Priority('A').shifted(1), Some(Priority('B')));
            assert_eq!(Priority('Z').shifted(1), None);
            assert_eq!(Priority('A').shifted(-1), None);
            assert_eq!(Priority('C').shifted(-2), Some(Priority('A')));
            assert_eq!(Priority('M').shifted(i64::MAX), None);
        }

        #[test]
        fn duration_pads_hours_with_spaces() {
            assert_eq!(ClockDuration(60).to_string(), " 1:00");
            assert_eq!(ClockDuration(5).to_string(), " 0:05");
            assert_eq!(ClockDuration(12 * 60 + 30).to_string(), "12:30");
            assert_eq!(ClockDuration(-30).to_string(), "-0:30");
            assert_eq!(ClockDuration(-90).to_string(), "-1:30");
        }

        #[test]
        fn splice_uses_character_columns() {
            let line = "`CLOCK: [2025-12-09 Вт 10:00]`";
            let out = splice(line, Span::new(20, 22), "Ср");
            assert_eq!(out, "`CLOCK: [2025-12-09 Ср 10:00]`");
        }

        #[test]
        fn heading_render_is_single_spaced() {
            let h = HeadingToken {
                level: 3,
                status: Some(Status::Done),
                priority: Some(Priority('B')),
                title: "Ship it".into(),
                status_span: None,
                priority_span: None,
            };
            assert_eq!(h.render(), "### DONE [#B] Ship it");
        }

        #[test]
        fn kind_cycle_skips_created() {
            assert_eq!(TimestampKind::Scheduled.cycled(), TimestampKind::Deadline);
            assert_eq!(TimestampKind::Deadline.cycled(), TimestampKind::Closed);
            assert_eq!(TimestampKind::Closed.cycled(), TimestampKind::Scheduled);
            assert_eq!(TimestampKind::Created.cycled(), TimestampKind::Created);
        }
    }
}

pub mod weekday {
    //! Weekday labels in the notation the user already wrote.

    use chrono::{Datelike, NaiveDate, Weekday};
    use serde::{Deserialize, Serialize};

    const LATIN_SHORT: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const LATIN_FULL: [&str; 7] = [
        "Sunday",
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
    ];
    const CYRILLIC_SHORT: [&str; 7] = ["Вс", "Пн", "Вт", "Ср", "Чт", "Пт", "Сб"];
    const CYRILLIC_FULL: [&str; 7] = [
        "Воскресенье",
        "Понедельник",
        "Вторник",
        "Среда",
        "Четверг",
        "Пятница",
        "Суббота",
    ];

    /// Script and length class of a weekday label.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum WeekdayStyle {
        #[default]
        LatinShort,
        LatinFull,
        CyrillicShort,
        CyrillicFull,
    }

    impl WeekdayStyle {
        /// Classify an existing label: any Cyrillic letter selects Cyrillic, more than three
        /// characters selects the full name.
        pub fn detect(label: &str) -> Self {
            let cyrillic = label
                .chars()
                .any(|c| matches!(c, 'А'..='я' | 'Ё' | 'ё'));
            let full = label.chars().count() > 3;
            match (cyrillic, full) {
                (false, false) => WeekdayStyle::LatinShort,
                (false, true) => WeekdayStyle::LatinFull,
                (true, false) => WeekdayStyle::CyrillicShort,
                (true, true) => WeekdayStyle::CyrillicFull,
            }
        }

        pub fn label(self, weekday: Weekday) -> &'static str {
            let names = match self {
                WeekdayStyle::LatinShort => &LATIN_SHORT,
                WeekdayStyle::LatinFull => &LATIN_FULL,
                WeekdayStyle::CyrillicShort => &CYRILLIC_SHORT,
                WeekdayStyle::CyrillicFull => &CYRILLIC_FULL,
            };
            names[weekday.num_days_from_sunday() as usize]
        }

        pub fn label_for(self, date: NaiveDate) -> &'static str {
            self.label(date.weekday())
        }

        /// Same script, abbreviated. Inline timestamps only carry 2-3 letter labels.
        pub fn short(self) -> Self {
            match self {
                WeekdayStyle::LatinShort | WeekdayStyle::LatinFull => WeekdayStyle::LatinShort,
                WeekdayStyle::CyrillicShort | WeekdayStyle::CyrillicFull => {
                    WeekdayStyle::CyrillicShort
                }
            }
        }
    }

    /// The correct label for `date`, written in the style of `previous`.
    pub fn relabel(date: NaiveDate, previous: &str) -> &'static str {
        WeekdayStyle::detect(previous).label_for(date)
    }

}

pub mod grammar {
    //! Single-line grammars built on `nom`.
    //!
    //! - Heading: `#+ SP [TODO|DONE SP] [[#X] SP] title`
    //! - Timestamp line: `` indent `KIND: <inline timestamp>` `` anchored to the whole line.
    //! - Inline timestamp: `<YYYY-MM-DD[ Wd][ HH:MM][ +Nu]>` anywhere in a line.
    //! - Clock entry: `` indent `CLOCK: [start][--[end] => H:MM]` ``, `[]` or legacy `<>` brackets.
    //!
    //! A line that fails a grammar, including one whose date or time is not a real calendar
    //! value, simply has no token of that kind.

    use crate::core::*;
    use chrono::{NaiveDate, NaiveTime};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while_m_n, take_while1},
        character::complete::{char, digit1, space0, space1},
        combinator::{eof, opt, recognize},
        error::{VerboseError, VerboseErrorKind},
        sequence::{terminated, tuple},
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------ Public entry points ------------------------ */

    pub fn heading(line: &str) -> Option<HeadingToken> {
        heading_token(&Cols { line }, line).ok().map(|(_, h)| h)
    }

    pub fn timestamp_line(line: &str) -> Option<TimestampLineToken> {
        timestamp_line_token(&Cols { line }, line)
            .ok()
            .map(|(_, t)| t)
    }

    pub fn clock_entry(line: &str) -> Option<ClockEntry> {
        clock_entry_token(&Cols { line }, line).ok().map(|(_, c)| c)
    }

    /// Every well-formed inline timestamp in the line, left to right.
    pub fn inline_timestamps(line: &str) -> Vec<InlineTimestamp> {
        let cols = Cols { line };
        line.char_indices()
            .filter(|(_, c)| *c == '<')
            .filter_map(|(byte, _)| inline_timestamp(&cols, &line[byte..]).ok())
            .map(|(_, ts)| ts)
            .collect()
    }

    /// The line-level token, if the whole line is one: CLOCK first, then timestamp line, then heading.
    pub fn line_token(line: &str) -> Option<Token> {
        clock_entry(line)
            .map(Token::Clock)
            .or_else(|| timestamp_line(line).map(Token::TimestampLine))
            .or_else(|| heading(line).map(Token::Heading))
    }

    /* ------------------------------- Utils ------------------------------- */

    /// Maps a suffix of the line back to the character column it starts at.
    struct Cols<'l> {
        line: &'l str,
    }

    impl Cols<'_> {
        fn at(&self, rest: &str) -> usize {
            let byte = self.line.len() - rest.len();
            self.line[..byte].chars().count()
        }

        fn span(&self, before: &str, after: &str) -> Span {
            Span::new(self.at(before), self.at(after))
        }
    }

    fn context_error<'a, T>(at: &'a str, label: &'static str) -> PResult<'a, T> {
        Err(nom::Err::Error(VerboseError {
            errors: vec![(at, VerboseErrorKind::Context(label))],
        }))
    }

    /// Run `parser` after a single space; yields (field start, rest, output).
    fn spaced<'a, O>(
        i: &'a str,
        parser: fn(&'a str) -> PResult<'a, O>,
    ) -> Option<(&'a str, &'a str, O)> {
        let (field, _) = char::<&'a str, VerboseError<&'a str>>(' ')(i).ok()?;
        let (rest, out) = parser(field).ok()?;
        Some((field, rest, out))
    }

    fn four_digits(i: &str) -> PResult<'_, &str> {
        take_while_m_n(4, 4, |c: char| c.is_ascii_digit())(i)
    }

    fn two_digits(i: &str) -> PResult<'_, &str> {
        take_while_m_n(2, 2, |c: char| c.is_ascii_digit())(i)
    }

    fn ymd(i: &str) -> PResult<'_, (&str, &str, &str)> {
        let (i, (y, _, m, _, d)) =
            tuple((four_digits, char('-'), two_digits, char('-'), two_digits))(i)?;
        Ok((i, (y, m, d)))
    }

    fn hh_mm(i: &str) -> PResult<'_, (&str, &str)> {
        let (i, (h, _, m)) = tuple((two_digits, char(':'), two_digits))(i)?;
        Ok((i, (h, m)))
    }

    fn date_from(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
    }

    fn time_from(h: &str, m: &str) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
    }

    /* ------------------------------ Headings ------------------------------ */

    fn status_keyword(i: &str) -> PResult<'_, &str> {
        terminated(alt((tag("TODO"), tag("DONE"))), space1)(i)
    }

    fn priority_cookie(i: &str) -> PResult<'_, char> {
        let (i, (_, letter, _)) = tuple((
            tag("[#"),
            take_while_m_n(1, 1, |c: char| c.is_ascii_uppercase()),
            char(']'),
        ))(i)?;
        let (i, _) = space1(i)?;
        Ok((i, letter.chars().next().unwrap_or('A')))
    }

    fn heading_token<'a>(cols: &Cols<'_>, i: &'a str) -> PResult<'a, HeadingToken> {
        let (i, hashes) = take_while1(|c: char| c == '#')(i)?;
        let (body, _) = space1(i)?;

        // Optional parts give way when taking them would leave an empty title.
        let status = status_keyword(body).ok();
        for status in [status, None] {
            let after_status = status.map_or(body, |(rest, _)| rest);
            let priority = priority_cookie(after_status).ok();
            for priority in [priority, None] {
                let title = priority.map_or(after_status, |(rest, _)| rest);
                if title.is_empty() {
                    continue;
                }
                let status_col = cols.at(body);
                let priority_col = cols.at(after_status);
                return Ok((
                    "",
                    HeadingToken {
                        level: hashes.len(),
                        status: status.and_then(|(_, kw)| Status::from_keyword(kw)),
                        priority: priority.map(|(_, c)| Priority(c)),
                        title: title.to_string(),
                        status_span: status.map(|_| Span::new(status_col, status_col + 4)),
                        priority_span: priority.map(|_| Span::new(priority_col, priority_col + 4)),
                    },
                ));
            }
        }
        context_error(body, "heading title")
    }

    /* ----------------------------- Timestamps ----------------------------- */

    fn weekday_abbrev(i: &str) -> PResult<'_, &str> {
        take_while_m_n(2, 3, |c: char| c.is_alphabetic())(i)
    }

    fn repeater_cookie(i: &str) -> PResult<'_, &str> {
        recognize(tuple((
            char('+'),
            digit1,
            take_while_m_n(1, 2, |c: char| matches!(c, 'd' | 'w' | 'm' | 'y')),
        )))(i)
    }

    fn inline_timestamp<'a>(cols: &Cols<'_>, i: &'a str) -> PResult<'a, InlineTimestamp> {
        let open = cols.at(i);
        let (i, _) = char('<')(i)?;
        let (i, (y, m, d)) = ymd(i)?;
        let Some(date) = date_from(y, m, d) else {
            return context_error(i, "calendar date");
        };

        let (i, weekday) = match spaced(i, weekday_abbrev) {
            Some((field, rest, label)) => (rest, Some((label.to_string(), cols.span(field, rest)))),
            None => (i, None),
        };
        let (i, time) = match spaced(i, hh_mm) {
            Some((field, rest, (h, min))) => {
                let Some(time) = time_from(h, min) else {
                    return context_error(field, "clock time");
                };
                (rest, Some((time, cols.at(field))))
            }
            None => (i, None),
        };
        let (i, repeater) = match spaced(i, repeater_cookie) {
            Some((_, rest, cookie)) => (rest, Some(cookie.to_string())),
            None => (i, None),
        };
        let (i, _) = char('>')(i)?;

        let (weekday_label, weekday_span) = weekday.unzip();
        Ok((
            i,
            InlineTimestamp {
                date,
                weekday_label,
                time: time.map(|(t, _)| t),
                repeater,
                span: Span::new(open, cols.at(i)),
                fields: TimestampSpans {
                    year: Span::new(open + 1, open + 5),
                    month: Span::new(open + 6, open + 8),
                    day: Span::new(open + 9, open + 11),
                    weekday: weekday_span,
                    hour: time.map(|(_, c)| Span::new(c, c + 2)),
                    minute: time.map(|(_, c)| Span::new(c + 3, c + 5)),
                },
            },
        ))
    }

    fn timestamp_line_token<'a>(cols: &Cols<'_>, i: &'a str) -> PResult<'a, TimestampLineToken> {
        let (i, indent) = space0(i)?;
        let (i, _) = char('`')(i)?;
        let (after_kind, keyword) = alt((
            tag("CREATED"),
            tag("SCHEDULED"),
            tag("DEADLINE"),
            tag("CLOSED"),
        ))(i)?;
        let kind_span = cols.span(i, after_kind);
        let Some(kind) = TimestampKind::from_keyword(keyword) else {
            return context_error(i, "timestamp kind");
        };
        let (i, _) = tag(": ")(after_kind)?;
        let (i, timestamp) = inline_timestamp(cols, i)?;
        let (i, _) = char('`')(i)?;
        let (i, _) = eof(i)?;
        Ok((
            i,
            TimestampLineToken {
                indent: indent.to_string(),
                kind,
                timestamp,
                kind_span,
            },
        ))
    }

    /* ---------------------------- Clock entries ---------------------------- */

    fn clock_stamp<'a>(cols: &Cols<'_>, i: &'a str) -> PResult<'a, ClockTimestamp> {
        let (i, open) = alt((char('['), char('<')))(i)?;
        let (i, (y, m, d)) = ymd(i)?;
        let Some(date) = date_from(y, m, d) else {
            return context_error(i, "calendar date");
        };
        let (i, _) = char(' ')(i)?;
        let (i, label) = take_while1(|c: char| c.is_alphabetic())(i)?;
        let (field, _) = char(' ')(i)?;
        let hour_col = cols.at(field);
        let (i, (h, min)) = hh_mm(field)?;
        let Some(time) = time_from(h, min) else {
            return context_error(field, "clock time");
        };
        let (i, close) = alt((char(']'), char('>')))(i)?;
        Ok((
            i,
            ClockTimestamp {
                open: Bracket::from_char(open),
                date,
                weekday_label: label.to_string(),
                time,
                close: Bracket::from_char(close),
                hour_span: Span::new(hour_col, hour_col + 2),
                minute_span: Span::new(hour_col + 3, hour_col + 5),
            },
        ))
    }

    fn clock_duration(i: &str) -> PResult<'_, ClockDuration> {
        let (i, negative) = opt(char('-'))(i)?;
        let (i, hours) = digit1(i)?;
        let (i, _) = char(':')(i)?;
        let (i, minutes) = two_digits(i)?;
        let total = hours
            .parse::<i64>()
            .ok()
            .and_then(|h| h.checked_mul(60))
            .zip(minutes.parse::<i64>().ok())
            .and_then(|(h, m)| h.checked_add(m));
        let Some(total) = total else {
            return context_error(i, "duration");
        };
        Ok((i, ClockDuration(if negative.is_some() { -total } else { total })))
    }

    fn clock_tail<'a>(cols: &Cols<'_>, i: &'a str) -> PResult<'a, (ClockTimestamp, ClockDuration)> {
        let (i, _) = tag("--")(i)?;
        let (i, end) = clock_stamp(cols, i)?;
        let (i, _) = tag(" =>")(i)?;
        let (i, _) = take_while1(|c: char| c == ' ')(i)?;
        let (i, duration) = clock_duration(i)?;
        Ok((i, (end, duration)))
    }

    fn clock_entry_token<'a>(cols: &Cols<'_>, i: &'a str) -> PResult<'a, ClockEntry> {
        let (i, indent) = space0(i)?;
        let (i, _) = tag("`CLOCK: ")(i)?;
        let (i, start) = clock_stamp(cols, i)?;
        let (i, tail) = match clock_tail(cols, i) {
            Ok((rest, tail)) => (rest, Some(tail)),
            Err(_) => (i, None),
        };
        let (i, _) = char('`')(i)?;
        let (i, _) = eof(i)?;
        let (end, duration) = tail.unzip();
        Ok((
            i,
            ClockEntry {
                indent: indent.to_string(),
                start,
                end,
                duration,
            },
        ))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
        }

        #[test]
        fn parses_heading_with_status_and_priority() {
            let h = heading("## TODO [#A] High priority task").expect("heading");
            assert_eq!(h.level, 2);
            assert_eq!(h.status, Some(Status::Todo));
            assert_eq!(h.priority, Some(Priority('A')));
            assert_eq!(h.title, "High priority task");
            assert_eq!(h.status_span, Some(Span::new(3, 7)));
            assert_eq!(h.priority_span, Some(Span::new(8, 12)));
        }

        #[test]
        fn parses_plain_heading() {
            let h = heading("### Regular heading").expect("heading");
            assert_eq!(h.level, 3);
            assert_eq!(h.status, None);
            assert_eq!(h.priority, None);
            assert_eq!(h.title, "Regular heading");
        }

        #[test]
        fn heading_keeps_keyword_when_title_would_be_empty() {
            let h = heading("## TODO").expect("heading");
            assert_eq!(h.status, None);
            assert_eq!(h.title, "TODO");

            let h = heading("## DONE [#B]").expect("heading");
            assert_eq!(h.status, Some(Status::Done));
            assert_eq!(h.priority, None);
            assert_eq!(h.title, "[#B]");
        }

        #[test]
        fn rejects_non_headings() {
            assert!(heading("TODO Task title").is_none());
            assert!(heading("##TODO Task title").is_none());
            assert!(heading("## ").is_none());
        }

        #[test]
        fn parses_inline_timestamp_variants() {
            let found = inline_timestamps("<2025-12-06 Sat>");
            assert_eq!(found.len(), 1);
            let ts = &found[0];
            assert_eq!(ts.date, date(2025, 12, 6));
            assert_eq!(ts.weekday_label.as_deref(), Some("Sat"));
            assert_eq!(ts.time, None);
            assert_eq!(ts.span, Span::new(0, 16));
            assert_eq!(ts.fields.weekday, Some(Span::new(12, 15)));

            let ts = &inline_timestamps("<2025-12-06 Sat 14:30 +1d>")[0];
            assert_eq!(ts.time, NaiveTime::from_hms_opt(14, 30, 0));
            assert_eq!(ts.repeater.as_deref(), Some("+1d"));
            assert_eq!(ts.fields.hour, Some(Span::new(16, 18)));
            assert_eq!(ts.fields.minute, Some(Span::new(19, 21)));

            let ts = &inline_timestamps("<2025-12-06 Sat +2wd>")[0];
            assert_eq!(ts.repeater.as_deref(), Some("+2wd"));

            let ts = &inline_timestamps("<2025-12-06 10:00>")[0];
            assert_eq!(ts.weekday_label, None);
            assert_eq!(ts.fields.hour, Some(Span::new(12, 14)));
        }

        #[test]
        fn finds_embedded_timestamps_in_order() {
            let found = inline_timestamps("meet <2025-12-06 Sat> then <2025-12-08 Пн 09:00>");
            assert_eq!(found.len(), 2);
            assert_eq!(found[0].span, Span::new(5, 21));
            assert_eq!(found[1].weekday_label.as_deref(), Some("Пн"));
            assert_eq!(found[1].fields.hour, Some(Span::new(42, 44)));
        }

        #[test]
        fn invalid_calendar_values_are_not_timestamps() {
            assert!(inline_timestamps("<2025-02-30 Sun>").is_empty());
            assert!(inline_timestamps("<2025-12-06 Sat 25:00>").is_empty());
            assert!(inline_timestamps("<2025-12-06 Saturday>").is_empty());
            assert!(timestamp_line("`DEADLINE: <2025-13-01>`").is_none());
        }

        #[test]
        fn parses_timestamp_lines() {
            let t = timestamp_line("`SCHEDULED: <2025-12-06 Sat 10:00>`").expect("line");
            assert_eq!(t.indent, "");
            assert_eq!(t.kind, TimestampKind::Scheduled);
            assert_eq!(t.kind_span, Span::new(1, 10));
            assert_eq!(t.timestamp.span, Span::new(12, 34));

            let t = timestamp_line("  `CLOSED: <2025-12-03 Wed>`").expect("indented");
            assert_eq!(t.indent, "  ");
            assert_eq!(t.kind, TimestampKind::Closed);

            assert!(timestamp_line("`SCHEDULED: <2025-12-06 Sat>` trailing").is_none());
            assert!(timestamp_line("`TODO: <2025-12-06 Sat>`").is_none());
        }

        #[test]
        fn parses_open_and_closed_clock_entries() {
            let open = clock_entry("`CLOCK: [2025-12-09 Вт 10:30]`").expect("open");
            assert!(open.is_open());
            assert_eq!(open.start.weekday_label, "Вт");
            assert_eq!(open.start.hour_span, Span::new(23, 25));
            assert_eq!(open.start.minute_span, Span::new(26, 28));

            let closed =
                clock_entry("  `CLOCK: [2025-12-09 Tue 10:00]--[2025-12-09 Tue 11:30] =>  1:30`")
                    .expect("closed");
            assert_eq!(closed.indent, "  ");
            assert_eq!(closed.duration, Some(ClockDuration(90)));
            let end = closed.end.expect("end");
            assert_eq!(end.time, NaiveTime::from_hms_opt(11, 30, 0).expect("time"));
            assert_eq!(end.hour_span, Span::new(50, 52));
        }

        #[test]
        fn accepts_legacy_angle_brackets_in_clock_entries() {
            let entry = clock_entry("`CLOCK: <2025-12-09 Tue 10:00>--<2025-12-09 Tue 10:45> =>  0:45`")
                .expect("legacy");
            assert_eq!(entry.start.open, Bracket::Angle);
            assert_eq!(entry.duration, Some(ClockDuration(45)));
            assert_eq!(
                entry.render(),
                "`CLOCK: <2025-12-09 Tue 10:00>--<2025-12-09 Tue 10:45> =>  0:45`"
            );
        }

        #[test]
        fn clock_line_classifies_ahead_of_heading() {
            assert!(matches!(
                line_token("`CLOCK: [2025-12-09 Tue 10:00]`"),
                Some(Token::Clock(_))
            ));
            assert!(matches!(
                line_token("`CREATED: <2025-12-01 Mon 09:15>`"),
                Some(Token::TimestampLine(_))
            ));
            assert!(matches!(line_token("# Notes"), Some(Token::Heading(_))));
            assert!(line_token("plain prose").is_none());
        }
    }
}

pub mod resolver {
    //! Cursor → (token, field).
    //!
    //! Precedence when several grammars or spans could claim the cursor:
    //! 1. CLOCK hour/minute (only when the whole line is a CLOCK entry),
    //! 2. the first inline timestamp, left to right, with a field under the cursor,
    //! 3. the kind word of a timestamp line,
    //! 4. heading status word or `[#X]` cookie.
    //!
    //! CLOCK hour/minute spans are half-open; every other field also claims the column right
    //! after its last character.

    use crate::core::*;
    use crate::grammar;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum HeadingField {
        Status,
        Priority,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum TimestampField {
        Year,
        Month,
        Day,
        Weekday,
        Hour,
        Minute,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum ClockField {
        StartHour,
        StartMinute,
        EndHour,
        EndMinute,
    }

    impl ClockField {
        pub fn is_start(self) -> bool {
            matches!(self, ClockField::StartHour | ClockField::StartMinute)
        }

        pub fn is_hour(self) -> bool {
            matches!(self, ClockField::StartHour | ClockField::EndHour)
        }
    }

    /// A token together with the field the cursor is on.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "target", rename_all = "kebab-case")]
    pub enum Resolved {
        Clock {
            entry: ClockEntry,
            field: ClockField,
        },
        Timestamp {
            timestamp: InlineTimestamp,
            field: TimestampField,
        },
        TimestampKind {
            line: TimestampLineToken,
        },
        Heading {
            heading: HeadingToken,
            field: HeadingField,
        },
    }

    pub fn resolve(line: &str, col: usize) -> Option<Resolved> {
        let resolved = resolve_clock(line, col)
            .or_else(|| resolve_timestamp(line, col))
            .or_else(|| resolve_kind(line, col))
            .or_else(|| resolve_heading(line, col));
        if let Some(r) = &resolved {
            debug!(col, kind = target_name(r), "resolved cursor");
        }
        resolved
    }

    fn target_name(r: &Resolved) -> &'static str {
        match r {
            Resolved::Clock { .. } => "clock",
            Resolved::Timestamp { .. } => "timestamp",
            Resolved::TimestampKind { .. } => "timestamp-kind",
            Resolved::Heading { .. } => "heading",
        }
    }

    fn resolve_clock(line: &str, col: usize) -> Option<Resolved> {
        let entry = grammar::clock_entry(line)?;
        let mut fields = vec![
            (entry.start.hour_span, ClockField::StartHour),
            (entry.start.minute_span, ClockField::StartMinute),
        ];
        if let Some(end) = &entry.end {
            fields.push((end.hour_span, ClockField::EndHour));
            fields.push((end.minute_span, ClockField::EndMinute));
        }
        let field = fields
            .into_iter()
            .find(|(span, _)| span.contains(col))
            .map(|(_, field)| field)?;
        Some(Resolved::Clock { entry, field })
    }

    fn resolve_timestamp(line: &str, col: usize) -> Option<Resolved> {
        grammar::inline_timestamps(line)
            .into_iter()
            .filter(|ts| ts.span.contains(col))
            .find_map(|ts| {
                let f = ts.fields;
                let field = [
                    (Some(f.year), TimestampField::Year),
                    (Some(f.month), TimestampField::Month),
                    (Some(f.day), TimestampField::Day),
                    (f.weekday, TimestampField::Weekday),
                    (f.hour, TimestampField::Hour),
                    (f.minute, TimestampField::Minute),
                ]
                .into_iter()
                .find(|(span, _)| span.is_some_and(|s| s.touches(col)))
                .map(|(_, field)| field)?;
                Some(Resolved::Timestamp {
                    timestamp: ts,
                    field,
                })
            })
    }

    fn resolve_kind(line: &str, col: usize) -> Option<Resolved> {
        let token = grammar::timestamp_line(line)?;
        token
            .kind_span
            .touches(col)
            .then_some(Resolved::TimestampKind { line: token })
    }

    fn resolve_heading(line: &str, col: usize) -> Option<Resolved> {
        let heading = grammar::heading(line)?;
        let field = if heading.status_span.is_some_and(|s| s.touches(col)) {
            HeadingField::Status
        } else if heading.priority_span.is_some_and(|s| s.touches(col)) {
            HeadingField::Priority
        } else {
            return None;
        };
        Some(Resolved::Heading { heading, field })
    }

}

pub mod mutator {
    //! Field arithmetic. Given a resolved field and a signed delta, produce the new line.
    //!
    //! Dates carry like a calendar: month 13 rolls into the next year and day overflow
    //! rolls into the next month (2025-01-31 plus one month is 2025-03-03).

    use crate::core::*;
    use crate::grammar;
    use crate::resolver::{self, ClockField, HeadingField, Resolved, TimestampField};
    use crate::weekday::relabel;
    use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, TimeDelta};

    /// Calendar unit a field edit moves by.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CalendarUnit {
        Year,
        Month,
        Day,
        Hour,
        Minute,
    }

    impl From<TimestampField> for CalendarUnit {
        fn from(field: TimestampField) -> Self {
            match field {
                TimestampField::Year => CalendarUnit::Year,
                TimestampField::Month => CalendarUnit::Month,
                TimestampField::Day | TimestampField::Weekday => CalendarUnit::Day,
                TimestampField::Hour => CalendarUnit::Hour,
                TimestampField::Minute => CalendarUnit::Minute,
            }
        }
    }

    impl From<ClockField> for CalendarUnit {
        fn from(field: ClockField) -> Self {
            if field.is_hour() {
                CalendarUnit::Hour
            } else {
                CalendarUnit::Minute
            }
        }
    }

    /// Resolve the cursor and apply `delta` to whatever is under it.
    pub fn adjust(line: &str, col: usize, delta: i64) -> Result<String, EditError> {
        let resolved = resolver::resolve(line, col).ok_or(EditError::NoTokenAtCursor)?;
        Ok(mutate(line, &resolved, delta))
    }

    /// Never fails: edits that would leave chrono's range return the line unchanged.
    pub fn mutate(line: &str, resolved: &Resolved, delta: i64) -> String {
        match resolved {
            Resolved::Heading { heading, field } => mutate_heading(line, heading, *field, delta),
            Resolved::TimestampKind { line: token } => {
                if delta == 0 {
                    return line.to_string();
                }
                splice(line, token.kind_span, token.kind.cycled().as_str())
            }
            // Legacy `<...>` CLOCK stamps also read as inline timestamps; keep the duration in step.
            Resolved::Timestamp { timestamp, field } => match grammar::clock_entry(line) {
                Some(entry) => {
                    let on_start = entry.end.is_none()
                        || timestamp.span.start <= entry.start.minute_span.end;
                    shift_clock(&entry, on_start, (*field).into(), delta)
                        .map(|e| e.render())
                        .unwrap_or_else(|| line.to_string())
                }
                None => shift_timestamp(timestamp, *field, delta)
                    .map(|ts| splice(line, timestamp.span, &ts.render()))
                    .unwrap_or_else(|| line.to_string()),
            },
            Resolved::Clock { entry, field } => {
                shift_clock(entry, field.is_start(), (*field).into(), delta)
                    .map(|e| e.render())
                    .unwrap_or_else(|| line.to_string())
            }
        }
    }

    /// Step through TODO/DONE `delta` times, wrapping.
    pub fn cycle_status(status: Status, delta: i64) -> Status {
        let cycle = &Status::CYCLE;
        let idx = cycle.iter().position(|s| *s == status).unwrap_or(0) as i64;
        let len = cycle.len() as i64;
        cycle[(idx + delta.rem_euclid(len)).rem_euclid(len) as usize]
    }

    fn mutate_heading(line: &str, heading: &HeadingToken, field: HeadingField, delta: i64) -> String {
        match field {
            HeadingField::Status => match (heading.status, heading.status_span) {
                (Some(status), Some(span)) => splice(line, span, cycle_status(status, delta).as_str()),
                _ => line.to_string(),
            },
            HeadingField::Priority => match (heading.priority, heading.priority_span) {
                (Some(priority), Some(span)) => priority
                    .shifted(delta)
                    .map(|p| splice(line, span, &p.render()))
                    .unwrap_or_else(|| line.to_string()),
                _ => line.to_string(),
            },
        }
    }

    /// Move `dt` by `delta` units, carrying into larger units as needed.
    pub fn shift_datetime(dt: NaiveDateTime, unit: CalendarUnit, delta: i64) -> Option<NaiveDateTime> {
        match unit {
            CalendarUnit::Year => add_months(dt, delta.checked_mul(12)?),
            CalendarUnit::Month => add_months(dt, delta),
            CalendarUnit::Day => dt.checked_add_signed(TimeDelta::try_days(delta)?),
            CalendarUnit::Hour => dt.checked_add_signed(TimeDelta::try_hours(delta)?),
            CalendarUnit::Minute => dt.checked_add_signed(TimeDelta::try_minutes(delta)?),
        }
    }

    /// Keeps the day-of-month offset, so a day past the end of the target month spills over.
    fn add_months(dt: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
        let total = (i64::from(dt.year()) * 12 + i64::from(dt.month0())).checked_add(months)?;
        let year = i32::try_from(total.div_euclid(12)).ok()?;
        let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;
        let date = NaiveDate::from_ymd_opt(year, month, 1)?
            .checked_add_days(Days::new(u64::from(dt.day0())))?;
        Some(date.and_time(dt.time()))
    }

    fn shift_timestamp(ts: &InlineTimestamp, field: TimestampField, delta: i64) -> Option<InlineTimestamp> {
        let shifted = shift_datetime(ts.datetime(), field.into(), delta)?;
        let mut out = ts.clone();
        out.date = shifted.date();
        out.time = ts.time.map(|_| shifted.time());
        out.weekday_label = ts
            .weekday_label
            .as_deref()
            .map(|label| relabel(shifted.date(), label).to_string());
        Some(out)
    }

    fn shift_clock(
        entry: &ClockEntry,
        on_start: bool,
        unit: CalendarUnit,
        delta: i64,
    ) -> Option<ClockEntry> {
        let mut out = entry.clone();
        let side = if on_start {
            &mut out.start
        } else {
            out.end.as_mut()?
        };
        let shifted = shift_datetime(side.datetime(), unit, delta)?;
        side.date = shifted.date();
        side.time = shifted.time();
        side.weekday_label = relabel(shifted.date(), &side.weekday_label).to_string();

        if let Some(end) = &out.end {
            out.duration = Some(ClockDuration::between(out.start.datetime(), end.datetime()));
        }
        Some(out)
    }

}

pub mod buffer {
    //! The slice of a text editor the engine talks to: read lines, and apply one patch.

    use crate::core::{byte_offset, char_len};
    use serde::{Deserialize, Serialize};

    /// Line and character column, both zero-based.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct Position {
        pub line: usize,
        pub col: usize,
    }

    impl Position {
        pub fn new(line: usize, col: usize) -> Self {
            Self { line, col }
        }
    }

    pub trait LineSource {
        fn line_count(&self) -> usize;
        fn line(&self, index: usize) -> Option<&str>;
    }

    pub trait TextBuffer: LineSource {
        /// Replace `from..to`; `text` may contain newlines.
        fn replace_range(&mut self, from: Position, to: Position, text: &str);

        fn insert_at(&mut self, at: Position, text: &str) {
            self.replace_range(at, at, text);
        }
    }

    impl LineSource for [&str] {
        fn line_count(&self) -> usize {
            self.len()
        }
        fn line(&self, index: usize) -> Option<&str> {
            self.get(index).copied()
        }
    }

    impl LineSource for [String] {
        fn line_count(&self) -> usize {
            self.len()
        }
        fn line(&self, index: usize) -> Option<&str> {
            self.get(index).map(String::as_str)
        }
    }

    /* -------------------------------- Patches -------------------------------- */

    /// A single edit produced by the engine for the caller to apply.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "op", rename_all = "kebab-case")]
    pub enum Patch {
        Insert {
            at: Position,
            text: String,
        },
        Replace {
            from: Position,
            to: Position,
            text: String,
        },
    }

    impl Patch {
        /// Insert `text` as a new line so that it ends up at `index`.
        pub fn insert_line<S: LineSource + ?Sized>(src: &S, index: usize, text: &str) -> Self {
            let count = src.line_count();
            if index < count {
                return Patch::Insert {
                    at: Position::new(index, 0),
                    text: format!("{text}\n"),
                };
            }
            match count.checked_sub(1) {
                // Past the end: break the last line instead of gluing onto it.
                Some(last) => Patch::Insert {
                    at: Position::new(last, src.line(last).map_or(0, char_len)),
                    text: format!("\n{text}"),
                },
                None => Patch::Insert {
                    at: Position::new(0, 0),
                    text: text.to_string(),
                },
            }
        }

        pub fn replace_line<S: LineSource + ?Sized>(src: &S, index: usize, text: &str) -> Self {
            Patch::Replace {
                from: Position::new(index, 0),
                to: Position::new(index, src.line(index).map_or(0, char_len)),
                text: text.to_string(),
            }
        }

        /// Remove line `index` together with one adjacent line break.
        pub fn delete_line<S: LineSource + ?Sized>(src: &S, index: usize) -> Self {
            let end_of = |i: usize| Position::new(i, src.line(i).map_or(0, char_len));
            let (from, to) = if index + 1 < src.line_count() {
                (Position::new(index, 0), Position::new(index + 1, 0))
            } else if index > 0 {
                (end_of(index - 1), end_of(index))
            } else {
                (Position::new(index, 0), end_of(index))
            };
            Patch::Replace {
                from,
                to,
                text: String::new(),
            }
        }

        pub fn apply<B: TextBuffer + ?Sized>(&self, buf: &mut B) {
            match self {
                Patch::Insert { at, text } => buf.insert_at(*at, text),
                Patch::Replace { from, to, text } => buf.replace_range(*from, *to, text),
            }
        }
    }

    /* ------------------------------- Document ------------------------------- */

    /// In-memory line buffer. Round-trips LF/CRLF and a trailing newline.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Document {
        lines: Vec<String>,
        crlf: bool,
    }

    impl Document {
        /// Every `\n` breaks a line. The first break decides the ending written back, so mixed
        /// input comes out uniform.
        pub fn from_text(text: &str) -> Self {
            let crlf = text
                .find('\n')
                .is_some_and(|at| text[..at].ends_with('\r'));
            Self {
                lines: text
                    .split('\n')
                    .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
                    .collect(),
                crlf,
            }
        }

        pub fn to_text(&self) -> String {
            self.lines.join(if self.crlf { "\r\n" } else { "\n" })
        }

        pub fn lines(&self) -> &[String] {
            &self.lines
        }

        fn clamp(&self, p: Position) -> Position {
            match self.lines.get(p.line) {
                Some(line) => Position::new(p.line, p.col.min(char_len(line))),
                None => {
                    let last = self.lines.len().saturating_sub(1);
                    Position::new(last, self.lines.get(last).map_or(0, |l| char_len(l)))
                }
            }
        }
    }

    impl LineSource for Document {
        fn line_count(&self) -> usize {
            self.lines.len()
        }
        fn line(&self, index: usize) -> Option<&str> {
            self.lines.get(index).map(String::as_str)
        }
    }

    impl TextBuffer for Document {
        fn replace_range(&mut self, from: Position, to: Position, text: &str) {
            if self.lines.is_empty() {
                self.lines.push(String::new());
            }
            let (from, to) = (self.clamp(from), self.clamp(to));
            let (from, to) = if to < from { (to, from) } else { (from, to) };

            let first = &self.lines[from.line];
            let last = &self.lines[to.line];
            let joined = format!(
                "{}{}{}",
                &first[..byte_offset(first, from.col)],
                text,
                &last[byte_offset(last, to.col)..]
            );
            let replacement: Vec<String> = joined.split('\n').map(str::to_string).collect();
            self.lines.splice(from.line..=to.line, replacement);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn document_round_trips_line_endings() {
            for text in ["a\nb\n", "a\nb", "a\r\nb\r\n", ""] {
                assert_eq!(Document::from_text(text).to_text(), text);
            }
        }

        #[test]
        fn mixed_line_endings_split_on_every_newline() {
            let doc = Document::from_text("# H\r\nbody\nmore\r\n");
            assert_eq!(doc.lines(), ["# H", "body", "more", ""]);
            assert_eq!(doc.to_text(), "# H\r\nbody\r\nmore\r\n");

            let doc = Document::from_text("# H\nbody\r\n");
            assert_eq!(doc.lines(), ["# H", "body", ""]);
            assert_eq!(doc.to_text(), "# H\nbody\n");
        }

        #[test]
        fn insert_line_before_existing_line() {
            let mut doc = Document::from_text("# H\nbody\n");
            Patch::insert_line(&doc, 1, "new").apply(&mut doc);
            assert_eq!(doc.to_text(), "# H\nnew\nbody\n");
        }

        #[test]
        fn insert_line_past_the_end_breaks_last_line() {
            let mut doc = Document::from_text("# H\nbody");
            Patch::insert_line(&doc, 2, "tail").apply(&mut doc);
            assert_eq!(doc.to_text(), "# H\nbody\ntail");
        }

        #[test]
        fn delete_line_variants() {
            let mut doc = Document::from_text("a\nb\nc\n");
            Patch::delete_line(&doc, 1).apply(&mut doc);
            assert_eq!(doc.to_text(), "a\nc\n");

            let mut doc = Document::from_text("a\nb");
            Patch::delete_line(&doc, 1).apply(&mut doc);
            assert_eq!(doc.to_text(), "a");

            let mut doc = Document::from_text("only");
            Patch::delete_line(&doc, 0).apply(&mut doc);
            assert_eq!(doc.to_text(), "");
        }

        #[test]
        fn replace_line_with_multibyte_text() {
            let mut doc = Document::from_text("x\n`CLOCK: [2025-12-09 Вт 10:30]`\ny");
            Patch::replace_line(&doc, 1, "z").apply(&mut doc);
            assert_eq!(doc.to_text(), "x\nz\ny");
        }

        #[test]
        fn crlf_document_keeps_crlf_after_insert() {
            let mut doc = Document::from_text("# H\r\nbody\r\n");
            Patch::insert_line(&doc, 1, "new").apply(&mut doc);
            assert_eq!(doc.to_text(), "# H\r\nnew\r\nbody\r\n");
        }
    }
}

pub mod metadata {
    //! The run of timestamp and CLOCK lines directly under a heading.
    //!
    //! The scan stops at the first line that is neither a timestamp line nor a CLOCK entry,
    //! except that blank lines are skipped once at least one CLOCK entry has been seen.

    use crate::buffer::LineSource;
    use crate::core::*;
    use crate::grammar;
    use crate::weekday::WeekdayStyle;
    use tracing::debug;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MetadataBlock {
        pub heading: usize,
        pub timestamp_lines: Vec<(usize, TimestampLineToken)>,
        pub clocks: Vec<(usize, ClockEntry)>,
        /// One past the unbroken timestamp-line run right under the heading.
        pub planning_end: usize,
        /// Indentation of the line right under the heading, if that line is metadata.
        pub indent: String,
    }

    impl MetadataBlock {
        pub fn scan<S: LineSource + ?Sized>(src: &S, heading: usize) -> Result<Self, EditError> {
            if heading >= src.line_count() {
                return Err(EditError::LineOutOfRange(heading));
            }
            let mut block = MetadataBlock {
                heading,
                timestamp_lines: Vec::new(),
                clocks: Vec::new(),
                planning_end: heading + 1,
                indent: String::new(),
            };
            let mut in_planning = true;

            for index in heading + 1..src.line_count() {
                let Some(text) = src.line(index) else { break };
                if let Some(token) = grammar::timestamp_line(text) {
                    if index == heading + 1 {
                        block.indent = token.indent.clone();
                    }
                    if in_planning {
                        block.planning_end = index + 1;
                    }
                    block.timestamp_lines.push((index, token));
                    continue;
                }
                in_planning = false;
                if let Some(entry) = grammar::clock_entry(text) {
                    if index == heading + 1 {
                        block.indent = entry.indent.clone();
                    }
                    block.clocks.push((index, entry));
                    continue;
                }
                if text.trim().is_empty() && !block.clocks.is_empty() {
                    continue;
                }
                break;
            }

            debug!(
                heading,
                timestamps = block.timestamp_lines.len(),
                clocks = block.clocks.len(),
                "scanned metadata block"
            );
            Ok(block)
        }

        /// The unbroken timestamp-line run right under the heading.
        pub fn planning_lines(&self) -> impl Iterator<Item = &(usize, TimestampLineToken)> {
            self.timestamp_lines
                .iter()
                .filter(|(line, _)| *line < self.planning_end)
        }

        pub fn open_clock(&self) -> Option<(usize, &ClockEntry)> {
            self.clocks
                .iter()
                .find(|(_, entry)| entry.is_open())
                .map(|(line, entry)| (*line, entry))
        }

        /// After the last CLOCK entry, or after the planning run when there is none.
        pub fn clock_insert_line(&self) -> usize {
            self.clocks
                .last()
                .map_or(self.planning_end, |(line, _)| line + 1)
        }

        /// Style of the first weekday label already written in the block.
        pub fn weekday_style(&self) -> Option<WeekdayStyle> {
            self.timestamp_lines
                .iter()
                .find_map(|(_, t)| t.timestamp.weekday_label.as_deref())
                .or_else(|| {
                    self.clocks
                        .first()
                        .map(|(_, c)| c.start.weekday_label.as_str())
                })
                .map(WeekdayStyle::detect)
        }
    }

}

pub mod clock {
    //! CLOCK sessions per heading: Closed (no open entry) or Open (one entry without an end).

    use crate::buffer::{LineSource, Patch};
    use crate::core::*;
    use crate::metadata::MetadataBlock;
    use crate::weekday::WeekdayStyle;
    use chrono::{NaiveDateTime, TimeDelta, Timelike};
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ClockPolicy {
        /// Snap starts down and ends up to this many minutes. `None` or `Some(0)` disables it.
        pub round_minutes: Option<u32>,
        /// Label style for new entries when the heading has no labels to copy.
        pub weekday_style: WeekdayStyle,
    }

    impl ClockPolicy {
        fn step(&self) -> Option<u32> {
            self.round_minutes.filter(|m| *m > 0)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SessionState {
        Closed,
        Open { line: usize, entry: ClockEntry },
    }

    impl SessionState {
        pub fn of(block: &MetadataBlock) -> Self {
            match block.open_clock() {
                Some((line, entry)) => SessionState::Open {
                    line,
                    entry: entry.clone(),
                },
                None => SessionState::Closed,
            }
        }
    }

    pub fn session_state<S: LineSource + ?Sized>(
        src: &S,
        heading: usize,
    ) -> Result<SessionState, EditError> {
        Ok(SessionState::of(&MetadataBlock::scan(src, heading)?))
    }

    fn to_minute(dt: NaiveDateTime) -> NaiveDateTime {
        dt.with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(dt)
    }

    /// Floor the minute to a multiple of `step`.
    pub fn round_start(now: NaiveDateTime, step: Option<u32>) -> NaiveDateTime {
        let now = to_minute(now);
        let Some(step) = step.filter(|s| *s > 0) else {
            return now;
        };
        now.with_minute(now.minute() / step * step).unwrap_or(now)
    }

    /// Ceil the minute to a multiple of `step`; if that does not land strictly after `start`,
    /// push it one more step.
    pub fn round_end(start: NaiveDateTime, now: NaiveDateTime, step: Option<u32>) -> NaiveDateTime {
        let now = to_minute(now);
        let Some(step) = step.filter(|s| *s > 0) else {
            return now;
        };
        let up = i64::from(now.minute().div_ceil(step) * step) - i64::from(now.minute());
        let mut end = now
            .checked_add_signed(TimeDelta::minutes(up))
            .unwrap_or(now);
        if end <= start {
            end = end
                .checked_add_signed(TimeDelta::minutes(i64::from(step)))
                .unwrap_or(end);
        }
        end
    }

    /// Closed → Open: insert a new running entry after the existing ones.
    pub fn start_session<S: LineSource + ?Sized>(
        src: &S,
        heading: usize,
        now: NaiveDateTime,
        policy: &ClockPolicy,
    ) -> Result<Patch, EditError> {
        let block = MetadataBlock::scan(src, heading)?;
        if let SessionState::Open { line, .. } = SessionState::of(&block) {
            return Err(EditError::AlreadyOpenSession { line });
        }

        let started = round_start(now, policy.step());
        let style = block.weekday_style().unwrap_or(policy.weekday_style);
        let entry = ClockEntry {
            indent: block.indent.clone(),
            start: ClockTimestamp::new(started, style),
            end: None,
            duration: None,
        };
        let at = block.clock_insert_line();
        debug!(heading, line = at, %started, "clock in");
        Ok(Patch::insert_line(src, at, &entry.render()))
    }

    /// Open → Closed: stamp the end and the duration onto the running entry.
    pub fn finish_session<S: LineSource + ?Sized>(
        src: &S,
        heading: usize,
        now: NaiveDateTime,
        policy: &ClockPolicy,
    ) -> Result<Patch, EditError> {
        let block = MetadataBlock::scan(src, heading)?;
        let SessionState::Open { line, entry } = SessionState::of(&block) else {
            return Err(EditError::NoOpenSession);
        };

        let start = entry.start.datetime();
        let end = round_end(start, now, policy.step());
        let style = WeekdayStyle::detect(&entry.start.weekday_label);

        let mut closed = entry;
        closed.start.weekday_label = style.label_for(start.date()).to_string();
        closed.end = Some(ClockTimestamp {
            open: closed.start.open,
            close: closed.start.close,
            ..ClockTimestamp::new(end, style)
        });
        closed.duration = Some(ClockDuration::between(start, end));
        debug!(heading, line, %start, %end, "clock out");
        Ok(Patch::replace_line(src, line, &closed.render()))
    }

}

pub mod planning {
    //! Heading-level commands: TODO/DONE, priority cookie, CREATED and SCHEDULED/DEADLINE lines.

    use crate::buffer::{LineSource, Patch, Position};
    use crate::core::*;
    use crate::grammar;
    use crate::metadata::MetadataBlock;
    use crate::weekday::WeekdayStyle;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    /// The two mutually exclusive planning kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum PlanningKind {
        Scheduled,
        Deadline,
    }

    impl PlanningKind {
        fn other(self) -> Self {
            match self {
                PlanningKind::Scheduled => PlanningKind::Deadline,
                PlanningKind::Deadline => PlanningKind::Scheduled,
            }
        }
    }

    impl From<PlanningKind> for TimestampKind {
        fn from(kind: PlanningKind) -> Self {
            match kind {
                PlanningKind::Scheduled => TimestampKind::Scheduled,
                PlanningKind::Deadline => TimestampKind::Deadline,
            }
        }
    }

    /// Set `status` on a heading line; setting the status it already has clears it.
    pub fn set_status(line: &str, status: Status) -> Option<String> {
        let mut heading = grammar::heading(line)?;
        heading.status = if heading.status == Some(status) {
            None
        } else {
            Some(status)
        };
        Some(heading.render())
    }

    /// Drop an existing `[#X]`, or add `[#A]`.
    pub fn toggle_priority(line: &str) -> Option<String> {
        let mut heading = grammar::heading(line)?;
        heading.priority = match heading.priority {
            Some(_) => None,
            None => Some(Priority::HIGHEST),
        };
        Some(heading.render())
    }

    fn new_line(block: &MetadataBlock, kind: TimestampKind, now: NaiveDateTime, fallback: WeekdayStyle) -> String {
        let style = block.weekday_style().unwrap_or(fallback).short();
        TimestampLineToken::new(block.indent.clone(), kind, InlineTimestamp::at(now, style)).render()
    }

    /// Remove the heading's CREATED line, or add one stamped `now` right below the heading.
    pub fn toggle_created<S: LineSource + ?Sized>(
        src: &S,
        heading: usize,
        now: NaiveDateTime,
        fallback: WeekdayStyle,
    ) -> Result<Patch, EditError> {
        let block = MetadataBlock::scan(src, heading)?;
        if let Some((line, _)) = block
            .planning_lines()
            .find(|(_, t)| t.kind == TimestampKind::Created)
        {
            debug!(heading, line, "removing CREATED");
            return Ok(Patch::delete_line(src, *line));
        }
        let text = new_line(&block, TimestampKind::Created, now, fallback);
        debug!(heading, "inserting CREATED");
        Ok(Patch::insert_line(src, heading + 1, &text))
    }

    /// Toggle SCHEDULED or DEADLINE.
    ///
    /// Same kind present: remove it. The other kind present: relabel it, keeping its timestamp.
    /// Neither: insert a new line stamped `now` after CREATED (or right below the heading).
    pub fn toggle_planning<S: LineSource + ?Sized>(
        src: &S,
        heading: usize,
        kind: PlanningKind,
        now: NaiveDateTime,
        fallback: WeekdayStyle,
    ) -> Result<Patch, EditError> {
        let block = MetadataBlock::scan(src, heading)?;
        let wanted = TimestampKind::from(kind);
        let other = TimestampKind::from(kind.other());

        let existing = block
            .planning_lines()
            .filter(|(_, t)| t.kind == wanted || t.kind == other)
            .last();
        match existing {
            Some((line, token)) if token.kind == wanted => {
                debug!(heading, line, kind = wanted.as_str(), "removing planning line");
                Ok(Patch::delete_line(src, *line))
            }
            Some((line, token)) => {
                debug!(heading, line, from = token.kind.as_str(), to = wanted.as_str(), "relabeling planning line");
                Ok(Patch::Replace {
                    from: Position::new(*line, token.kind_span.start),
                    to: Position::new(*line, token.kind_span.end),
                    text: wanted.as_str().to_string(),
                })
            }
            None => {
                let at = block
                    .planning_lines()
                    .filter(|(_, t)| t.kind == TimestampKind::Created)
                    .map(|(line, _)| line + 1)
                    .last()
                    .unwrap_or(heading + 1);
                debug!(heading, line = at, kind = wanted.as_str(), "inserting planning line");
                Ok(Patch::insert_line(src, at, &new_line(&block, wanted, now, fallback)))
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::buffer::Document;
        use chrono::NaiveDate;

        fn now() -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2025, 12, 9)
                .and_then(|d| d.and_hms_opt(10, 5, 42))
                .expect("valid instant")
        }

        fn apply(text: &str, patch: Result<Patch, EditError>) -> String {
            let mut doc = Document::from_text(text);
            patch.expect("patch").apply(&mut doc);
            doc.to_text()
        }

        #[test]
        fn set_status_toggles_and_replaces() {
            assert_eq!(
                set_status("## Task", Status::Todo).as_deref(),
                Some("## TODO Task")
            );
            assert_eq!(
                set_status("## TODO [#A] Task", Status::Done).as_deref(),
                Some("## DONE [#A] Task")
            );
            assert_eq!(
                set_status("## DONE Task", Status::Done).as_deref(),
                Some("## Task")
            );
            assert_eq!(set_status("not a heading", Status::Todo), None);
        }

        #[test]
        fn toggle_priority_adds_and_removes() {
            assert_eq!(
                toggle_priority("## TODO Task").as_deref(),
                Some("## TODO [#A] Task")
            );
            assert_eq!(
                toggle_priority("## TODO [#C] Task").as_deref(),
                Some("## TODO Task")
            );
        }

        #[test]
        fn created_inserts_then_removes() {
            let text = "## Task\nBody\n";
            let doc = Document::from_text(text);
            let added = apply(text, toggle_created(&doc, 0, now(), WeekdayStyle::LatinShort));
            assert_eq!(added, "## Task\n`CREATED: <2025-12-09 Tue 10:05>`\nBody\n");

            let doc = Document::from_text(&added);
            let removed = apply(&added, toggle_created(&doc, 0, now(), WeekdayStyle::LatinShort));
            assert_eq!(removed, text);
        }

        #[test]
        fn scheduled_goes_after_created() {
            let text = "## Task\n  `CREATED: <2025-12-01 Пн 09:00>`\n";
            let doc = Document::from_text(text);
            let out = apply(
                text,
                toggle_planning(&doc, 0, PlanningKind::Scheduled, now(), WeekdayStyle::LatinShort),
            );
            assert_eq!(
                out,
                "## Task\n  `CREATED: <2025-12-01 Пн 09:00>`\n  `SCHEDULED: <2025-12-09 Вт 10:05>`\n"
            );
        }

        #[test]
        fn deadline_replaces_scheduled_keeping_the_date() {
            let text = "## Task\n`CREATED: <2025-12-01 Mon 09:00>`\n`SCHEDULED: <2025-12-10 Wed 14:00>`\n";
            let doc = Document::from_text(text);
            let out = apply(
                text,
                toggle_planning(&doc, 0, PlanningKind::Deadline, now(), WeekdayStyle::LatinShort),
            );
            assert_eq!(
                out,
                "## Task\n`CREATED: <2025-12-01 Mon 09:00>`\n`DEADLINE: <2025-12-10 Wed 14:00>`\n"
            );
        }

        #[test]
        fn same_kind_is_removed() {
            let text = "## Task\n`DEADLINE: <2025-12-10 Wed>`\nBody";
            let doc = Document::from_text(text);
            let out = apply(
                text,
                toggle_planning(&doc, 0, PlanningKind::Deadline, now(), WeekdayStyle::LatinShort),
            );
            assert_eq!(out, "## Task\nBody");
        }

        #[test]
        fn full_name_fallback_writes_short_labels() {
            let text = "## Task\nBody\n";
            let doc = Document::from_text(text);
            let added = apply(text, toggle_created(&doc, 0, now(), WeekdayStyle::LatinFull));
            assert_eq!(added, "## Task\n`CREATED: <2025-12-09 Tue 10:05>`\nBody\n");

            let doc = Document::from_text(&added);
            let removed = apply(&added, toggle_created(&doc, 0, now(), WeekdayStyle::LatinFull));
            assert_eq!(removed, text);
        }

        #[test]
        fn full_name_clock_label_keeps_block_readable() {
            use crate::clock::{ClockPolicy, start_session};

            let policy = ClockPolicy {
                round_minutes: None,
                weekday_style: WeekdayStyle::CyrillicFull,
            };
            let mut doc = Document::from_text("## Task\n");
            start_session(&doc, 0, now(), &policy)
                .expect("clock in")
                .apply(&mut doc);
            toggle_planning(&doc, 0, PlanningKind::Scheduled, now(), WeekdayStyle::CyrillicFull)
                .expect("schedule")
                .apply(&mut doc);
            assert_eq!(
                doc.to_text(),
                "## Task\n`SCHEDULED: <2025-12-09 Вт 10:05>`\n`CLOCK: [2025-12-09 Вторник 10:05]`\n"
            );
            assert_eq!(
                start_session(&doc, 0, now(), &policy),
                Err(EditError::AlreadyOpenSession { line: 2 })
            );
        }
    }
}

pub mod outline {
    //! Fallback outline lookup: the closest heading line at or above the cursor.

    use crate::buffer::LineSource;

    pub fn nearest_heading<S: LineSource + ?Sized>(src: &S, line: usize) -> Option<usize> {
        let last = src.line_count().checked_sub(1)?;
        (0..=line.min(last))
            .rev()
            .find(|i| src.line(*i).is_some_and(is_heading_line))
    }

    fn is_heading_line(s: &str) -> bool {
        let rest = s.trim_start_matches('#');
        rest.len() < s.len() && rest.starts_with(char::is_whitespace)
    }

}
