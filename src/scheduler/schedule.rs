//! Cron expressions: parsing, next fire time, and English descriptions.
//!
//! Five-field POSIX expressions (`min hour dom mon dow`) are accepted and
//! normalized to the seconds-first form the `cron` crate expects. POSIX
//! day-of-week numbers (0-7, both 0 and 7 meaning Sunday) are rewritten as
//! day names so they keep their POSIX meaning.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{DuckyError, Result};

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// A parsed cron schedule that remembers how it was written.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    normalized: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = normalize(expression)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| DuckyError::InvalidCron {
            expr: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression: expression.trim().to_string(),
            normalized,
            schedule,
        })
    }

    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The seconds-first form handed to the `cron` crate.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }

    /// Human-readable description, e.g. `every 30 minutes`.
    pub fn describe(&self) -> String {
        describe_fields(&self.normalized)
    }
}

/// Convert a 5-field POSIX expression to the 6-field form. 6 and 7 field
/// expressions are passed through untouched.
pub fn normalize(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = normalize_dow(fields[4]).map_err(|reason| DuckyError::InvalidCron {
                expr: expression.to_string(),
                reason,
            })?;
            Ok(format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], dow))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(DuckyError::InvalidCron {
            expr: expression.to_string(),
            reason: format!("expected 5, 6 or 7 fields, got {}", n),
        }),
    }
}

fn dow_token(token: &str) -> std::result::Result<&'static str, String> {
    match token.parse::<usize>() {
        Ok(n) if n < DAY_NAMES.len() => Ok(DAY_NAMES[n]),
        Ok(n) => Err(format!("day of week {} out of range", n)),
        Err(_) => Err(format!("unrecognized day of week '{}'", token)),
    }
}

fn normalize_dow(field: &str) -> std::result::Result<String, String> {
    let mut parts = Vec::new();
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };

        let base = if base == "*" || base == "?" || !base.chars().all(|c| c.is_ascii_digit() || c == '-') {
            base.to_string()
        } else if let Some((start, end)) = base.split_once('-') {
            let start_n: usize = start.parse().map_err(|_| format!("bad range '{}'", base))?;
            let end_n: usize = end.parse().map_err(|_| format!("bad range '{}'", base))?;
            match (start_n, end_n) {
                (0, 7) => "*".to_string(),
                // Sunday as 7 closes the week
                (s, 7) if s < 6 => format!("{}-SAT,SUN", dow_token(start)?),
                (6, 7) => "SAT,SUN".to_string(),
                _ => format!("{}-{}", dow_token(start)?, dow_token(end)?),
            }
        } else {
            dow_token(base)?.to_string()
        };

        match step {
            Some(step) => parts.push(format!("{}/{}", base, step)),
            None => parts.push(base),
        }
    }
    Ok(parts.join(","))
}

fn day_name(token: &str) -> String {
    let name = match token.to_ascii_uppercase().as_str() {
        "SUN" | "1" => "Sunday",
        "MON" | "2" => "Monday",
        "TUE" | "3" => "Tuesday",
        "WED" | "4" => "Wednesday",
        "THU" | "5" => "Thursday",
        "FRI" | "6" => "Friday",
        "SAT" | "7" => "Saturday",
        _ => return token.to_string(),
    };
    name.to_string()
}

fn month_name(token: &str) -> String {
    const MONTHS: [&str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];
    match token.parse::<usize>() {
        Ok(n) if (1..=12).contains(&n) => MONTHS[n - 1].to_string(),
        _ => token.to_string(),
    }
}

fn list_phrase(field: &str, name: fn(&str) -> String) -> String {
    let items: Vec<String> = field
        .split(',')
        .map(|part| match part.split_once('-') {
            Some((a, b)) => format!("{} through {}", name(a), name(b)),
            None => name(part),
        })
        .collect();
    match items.len() {
        0 => String::new(),
        1 => items[0].clone(),
        n => format!("{} and {}", items[..n - 1].join(", "), items[n - 1]),
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn every(field: &str) -> Option<&str> {
    field.strip_prefix("*/").or_else(|| field.strip_prefix("0/"))
}

fn time_phrase(sec: &str, min: &str, hour: &str) -> String {
    if sec != "0" {
        if let Some(n) = every(sec) {
            if min == "*" && hour == "*" {
                return format!("every {} seconds", n);
            }
        }
        if sec == "*" && min == "*" && hour == "*" {
            return "every second".to_string();
        }
        return format!("at second {}, minute {}, hour {}", sec, min, hour);
    }

    match (min, hour) {
        ("*", "*") => "every minute".to_string(),
        (m, "*") if every(m).is_some() => format!("every {} minutes", every(m).unwrap_or(m)),
        (m, "*") if is_number(m) => format!("at minute {} past every hour", m),
        (m, h) if is_number(m) && every(h).is_some() => {
            format!("at minute {} every {} hours", m, every(h).unwrap_or(h))
        }
        (m, h) if is_number(m) && h.split(',').all(is_number) => {
            let minute: u32 = m.parse().unwrap_or(0);
            let times: Vec<String> = h
                .split(',')
                .map(|h| format!("at {:02}:{:02}", h.parse::<u32>().unwrap_or(0), minute))
                .collect();
            times.join(" and ")
        }
        (m, h) if is_number(m) && h.contains('-') && !h.contains('/') => {
            format!("at minute {} past every hour from {}", m, h.replace('-', " to "))
        }
        (m, h) => format!("at minute {}, hour {}", m, h),
    }
}

fn describe_fields(normalized: &str) -> String {
    let fields: Vec<&str> = normalized.split_whitespace().collect();
    if fields.len() < 6 {
        return normalized.to_string();
    }
    let (sec, min, hour, dom, month, dow) = (fields[0], fields[1], fields[2], fields[3], fields[4], fields[5]);

    let mut text = time_phrase(sec, min, hour);
    if dow != "*" && dow != "?" {
        text.push_str(&format!(" on {}", list_phrase(dow, day_name)));
    }
    if dom != "*" && dom != "?" {
        text.push_str(&format!(" on day {} of the month", dom));
    }
    if month != "*" {
        text.push_str(&format!(" in {}", list_phrase(month, month_name)));
    }
    if let Some(year) = fields.get(6) {
        if *year != "*" {
            text.push_str(&format!(" in {}", year));
        }
    }
    text
}
